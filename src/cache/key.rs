//! Normalized cache keys.

use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::http::Request;

/// Normalized request identity: method plus URL with query, without fragment.
///
/// Host case and default ports are already normalized by `url::Url`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_ascii_uppercase(),
      url: url.into(),
    }
  }

  pub fn from_request(request: &Request) -> Self {
    Self::new(request.method.as_str(), &request.url)
  }

  /// GET key for a path or absolute URL resolved against `origin`.
  pub fn resolve(origin: &Url, key: &str) -> Result<Self, url::ParseError> {
    Ok(Self::new("GET", &origin.join(key)?))
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Stable digest used as the storage primary key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}
