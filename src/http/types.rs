//! Core request and response types.

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Ordered header list with case-insensitive (lowercased) names.
///
/// A name may repeat (`set-cookie`, `vary`) and values are kept as raw
/// bytes, so a response round-trips through storage unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<StoredHeader>", try_from = "Vec<StoredHeader>")]
pub struct Headers(Vec<(String, Bytes)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set a header, dropping every previous value with the same name.
  pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<Bytes>) {
    let name = name.as_ref().to_ascii_lowercase();
    self.0.retain(|(existing, _)| *existing != name);
    self.0.push((name, value.into()));
  }

  /// Add a value, keeping earlier ones with the same name.
  pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<Bytes>) {
    self.0.push((name.as_ref().to_ascii_lowercase(), value.into()));
  }

  /// First value for `name`, if it is valid UTF-8.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .get_all(name)
      .next()
      .and_then(|value| std::str::from_utf8(value).ok())
  }

  pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a [u8]> + 'a {
    let name = name.to_ascii_lowercase();
    self
      .0
      .iter()
      .filter(move |(existing, _)| *existing == name)
      .map(|(_, value)| value.as_ref())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get_all(name).next().is_some()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
  }
}

impl<K: AsRef<str>, V: Into<Bytes>> FromIterator<(K, V)> for Headers {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut headers = Headers::new();
    for (name, value) in iter {
      headers.append(name, value);
    }
    headers
  }
}

/// Serialized header: UTF-8 values as text, anything else hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredHeader {
  name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  value: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  hex: Option<String>,
}

impl From<Headers> for Vec<StoredHeader> {
  fn from(headers: Headers) -> Self {
    headers
      .0
      .into_iter()
      .map(|(name, value)| match std::str::from_utf8(&value) {
        Ok(text) => StoredHeader {
          name,
          value: Some(text.to_string()),
          hex: None,
        },
        Err(_) => StoredHeader {
          name,
          value: None,
          hex: Some(hex::encode(&value)),
        },
      })
      .collect()
  }
}

impl TryFrom<Vec<StoredHeader>> for Headers {
  type Error = String;

  fn try_from(stored: Vec<StoredHeader>) -> Result<Self, Self::Error> {
    stored
      .into_iter()
      .map(|header| -> Result<(String, Bytes), String> {
        let value = match (header.value, header.hex) {
          (Some(text), _) => Bytes::from(text),
          (None, Some(encoded)) => Bytes::from(
            hex::decode(&encoded).map_err(|e| format!("header {}: {}", header.name, e))?,
          ),
          (None, None) => Bytes::new(),
        };
        Ok((header.name, value))
      })
      .collect()
  }
}

/// How the page issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RequestMode {
  /// Full-page load.
  Navigate,
  #[default]
  Cors,
  NoCors,
  SameOrigin,
}

/// An intercepted outgoing request.
///
/// Requests can be re-issued (background refresh, replay), so unlike
/// [`Response`] they are freely cloneable.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Bytes>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      body: None,
      mode: RequestMode::default(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A top-level page load.
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_mode(RequestMode::Navigate)
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<Bytes>) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// True for methods that change server state.
  pub fn is_mutating(&self) -> bool {
    !matches!(
      self.method,
      Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
  }

  pub fn host(&self) -> Option<&str> {
    self.url.host_str()
  }
}

/// Where a response handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the live network
  Network,
  /// Served from the current cache generation
  Cache,
  /// The offline fallback document
  Fallback,
  /// Generated locally (offline errors, queue acknowledgements)
  Synthetic,
}

/// Body bytes that can be taken exactly once.
#[derive(Debug)]
struct Body(Bytes);

/// A response whose body can be consumed only once.
///
/// Not `Clone`. A component that both returns and persists a response must
/// call [`Response::tee`] before either side reads it.
#[derive(Debug)]
pub struct Response {
  status: u16,
  headers: Headers,
  body: Body,
  source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers,
      body: Body(body.into()),
      source: ResponseSource::Network,
    }
  }

  pub fn with_source(mut self, source: ResponseSource) -> Self {
    self.source = source;
    self
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  pub fn headers(&self) -> &Headers {
    &self.headers
  }

  pub fn source(&self) -> ResponseSource {
    self.source
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Duplicate the response into two independent single-use responses.
  pub fn tee(self) -> (Response, Response) {
    let copy = Response {
      status: self.status,
      headers: self.headers.clone(),
      body: Body(self.body.0.clone()),
      source: self.source,
    };
    (self, copy)
  }

  /// Consume the body.
  pub fn into_bytes(self) -> Bytes {
    self.body.0
  }

  /// Consume the response into an immutable, storable snapshot.
  pub fn into_snapshot(self) -> ResponseSnapshot {
    ResponseSnapshot {
      status: self.status,
      headers: self.headers,
      body: self.body.0,
    }
  }

  /// Rebuild a fresh single-use response from a stored snapshot.
  pub fn from_snapshot(snapshot: ResponseSnapshot, source: ResponseSource) -> Self {
    Self::new(snapshot.status, snapshot.headers, snapshot.body).with_source(source)
  }

  pub fn html(status: u16, document: impl Into<Bytes>) -> Self {
    let headers = Headers::from_iter([("content-type", "text/html")]);
    Self::new(status, headers, document)
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    let headers = Headers::from_iter([("content-type", "application/json")]);
    Self::new(status, headers, value.to_string())
  }

  pub fn text(status: u16, text: &'static str) -> Self {
    let headers = Headers::from_iter([("content-type", "text/plain")]);
    Self::new(status, headers, text)
  }
}

/// Immutable copy of a prior response, as kept in a cache generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Headers,
  pub body: Bytes,
}
