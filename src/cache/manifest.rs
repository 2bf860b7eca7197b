//! Precache manifest: mandatory assets plus the offline fallback document.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::key::RequestKey;
use crate::config::Config;
use crate::http::{Response, ResponseSource};

#[derive(Debug, Clone)]
pub struct PrecacheAsset {
  pub url: Url,
  pub content_type: String,
}

impl PrecacheAsset {
  pub fn key(&self) -> RequestKey {
    RequestKey::new("GET", &self.url)
  }
}

/// Static install-time configuration, resolved against the origin.
#[derive(Debug, Clone)]
pub struct PrecacheManifest {
  pub assets: Vec<PrecacheAsset>,
  pub offline_key: RequestKey,
  pub offline_document: Bytes,
}

impl PrecacheManifest {
  pub fn from_config(config: &Config) -> Result<Self> {
    let assets = config
      .assets
      .iter()
      .map(|entry| {
        let url = config
          .origin
          .join(&entry.key)
          .map_err(|e| eyre!("Invalid asset key '{}': {}", entry.key, e))?;
        Ok(PrecacheAsset {
          url,
          content_type: entry.content_type.clone(),
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let offline_key = RequestKey::resolve(&config.origin, &config.offline_key)
      .map_err(|e| eyre!("Invalid offline_key '{}': {}", config.offline_key, e))?;

    Ok(Self {
      assets,
      offline_key,
      offline_document: Bytes::from(config.offline_document()?),
    })
  }

  /// The fallback document built straight from configuration.
  pub fn fallback_response(&self) -> Response {
    Response::html(200, self.offline_document.clone()).with_source(ResponseSource::Fallback)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_assets_resolve_in_order() {
    let config = Config::from_yaml(
      r#"
cache_version: v1
origin: https://admin.example.com/
assets:
  - key: /
    content_type: text/html
  - key: /manifest.json
    content_type: application/json
  - key: https://cdnjs.cloudflare.com/all.min.css
    content_type: text/css
"#,
    )
    .unwrap();

    let manifest = PrecacheManifest::from_config(&config).unwrap();
    let urls: Vec<_> = manifest.assets.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(
      urls,
      vec![
        "https://admin.example.com/",
        "https://admin.example.com/manifest.json",
        "https://cdnjs.cloudflare.com/all.min.css",
      ]
    );
    assert_eq!(manifest.offline_key.url(), "https://admin.example.com/offline.html");
  }

  #[test]
  fn test_fallback_response_is_html_200() {
    let config =
      Config::from_yaml("cache_version: v1\norigin: https://admin.example.com/\n").unwrap();
    let manifest = PrecacheManifest::from_config(&config).unwrap();
    let response = manifest.fallback_response();

    assert_eq!(response.status(), 200);
    assert_eq!(response.source(), ResponseSource::Fallback);
    assert_eq!(response.headers().get("content-type"), Some("text/html"));
  }
}
