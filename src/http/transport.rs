//! Generic network interface and its reqwest-backed implementation.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use super::types::{Headers, Request, Response, ResponseSource};
use crate::error::{OfflineError, OfflineResult};

/// Sends requests to the live network.
///
/// `Err` means the server could not be reached at all. A non-2xx answer is
/// still `Ok`; callers decide what an upstream error means for them.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: Request) -> OfflineResult<Response>;
}

/// Transport over a shared reqwest client.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  /// Build a transport whose requests give up after `timeout`.
  ///
  /// An elapsed timeout surfaces as a connectivity failure, so a hung fetch
  /// still ends in a cached or fallback response.
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("errands-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: Request) -> OfflineResult<Response> {
    let mut builder = self.client.request(request.method, request.url);
    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(connectivity_failure)?;

    let status = response.status().as_u16();
    let headers: Headers = response
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str(), Bytes::copy_from_slice(value.as_bytes())))
      .collect();
    let body = response.bytes().await.map_err(connectivity_failure)?;

    Ok(Response::new(status, headers, body).with_source(ResponseSource::Network))
  }
}

fn connectivity_failure(err: reqwest::Error) -> OfflineError {
  let kind = if err.is_timeout() {
    "timed out"
  } else if err.is_connect() {
    "connection failed"
  } else {
    "request failed"
  };
  OfflineError::ConnectivityFailure(format!("{}: {}", kind, err))
}
