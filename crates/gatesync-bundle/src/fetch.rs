//! Fetching raw bundle bytes given their source URI.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::FetchError;

/// Source of bundle bytes.
#[async_trait]
pub trait BundleFetcher: Send + Sync {
    /// Fetch the complete bytes stored at `uri`.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError>;
}

/// Where a bundle's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleLocation {
    /// http:// or https:// URL.
    Http(String),
    /// file:///abs/path, /abs/path or ./relative/path
    File(PathBuf),
}

impl BundleLocation {
    pub fn parse(uri: &str) -> Result<Self, FetchError> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            Ok(Self::Http(uri.to_string()))
        } else if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(FetchError::UnsupportedScheme(uri.to_string()));
            }
            Ok(Self::File(PathBuf::from(path)))
        } else if uri.starts_with('/') || uri.starts_with("./") {
            Ok(Self::File(PathBuf::from(uri)))
        } else {
            Err(FetchError::UnsupportedScheme(uri.to_string()))
        }
    }
}

/// Fetches over http(s) with reqwest and from the local filesystem.
#[derive(Clone)]
pub struct UriFetcher {
    client: reqwest::Client,
}

impl UriFetcher {
    /// Create a fetcher whose http requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http {
                uri: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BundleFetcher for UriFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        let bytes = match BundleLocation::parse(uri)? {
            BundleLocation::Http(url) => {
                let http_err = |e: reqwest::Error| FetchError::Http {
                    uri: url.clone(),
                    message: e.to_string(),
                };
                let resp = self.client.get(&url).send().await.map_err(http_err)?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        uri: url.clone(),
                        status: status.as_u16(),
                    });
                }
                resp.bytes().await.map_err(http_err)?.to_vec()
            }
            BundleLocation::File(path) => tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
                path: path.display().to_string(),
                source,
            })?,
        };
        debug!(%uri, size = bytes.len(), "bundle fetched");
        Ok(bytes)
    }
}
