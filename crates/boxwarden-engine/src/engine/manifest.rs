//! HTTP access to the outside world: the delivery manifest, binary
//! downloads and subscription-derived configuration text.
//!
//! Nothing here retries. Callers decide whether a failure is fatal.

use crate::engine::types::*;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Remote endpoints the supervisor depends on.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch and parse the delivery manifest.
    async fn fetch_manifest(&self) -> Result<DeliveryManifest, EngineError>;

    /// Fetch a URL as text.
    async fn fetch_text(&self, url: &str) -> Result<String, EngineError>;

    /// Stream a URL into `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, EngineError>;
}

/// `reqwest`-backed [`RemoteSource`] with a bounded per-request timeout.
#[derive(Clone)]
pub struct ManifestClient {
    http: reqwest::Client,
    manifest_url: String,
}

impl std::fmt::Debug for ManifestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestClient")
            .field("manifest_url", &self.manifest_url)
            .finish()
    }
}

impl ManifestClient {
    pub fn new(manifest_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                EngineError::new(EngineErrorKind::Internal, "Failed to build HTTP client")
                    .with_detail(e.to_string())
            })?;
        Ok(Self {
            http,
            manifest_url: manifest_url.into(),
        })
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, EngineError> {
        let resp = self.http.get(url).send().await.map_err(|e| {
            EngineError::new(EngineErrorKind::Network, format!("Failed to fetch from {url}"))
                .with_detail(e.to_string())
        })?;
        check_status(resp.status())?;
        Ok(resp)
    }
}

/// Anything but 200 is an error.
fn check_status(status: reqwest::StatusCode) -> Result<(), EngineError> {
    if status == reqwest::StatusCode::OK {
        return Ok(());
    }
    Err(
        EngineError::new(EngineErrorKind::Network, format!("HTTP {}", status.as_u16()))
            .with_detail(status.to_string())
            .with_code(i64::from(status.as_u16())),
    )
}

/// Parse a manifest body.
pub fn parse_manifest(body: &str) -> Result<DeliveryManifest, EngineError> {
    serde_json::from_str(body).map_err(|e| {
        EngineError::new(EngineErrorKind::ParseError, "Failed to parse delivery manifest")
            .with_detail(e.to_string())
    })
}

#[async_trait]
impl RemoteSource for ManifestClient {
    async fn fetch_manifest(&self) -> Result<DeliveryManifest, EngineError> {
        let body = self.fetch_text(&self.manifest_url).await?;
        parse_manifest(&body)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, EngineError> {
        let resp = self.get(url).await?;
        resp.text().await.map_err(|e| {
            EngineError::new(EngineErrorKind::Network, "Failed to read response body")
                .with_detail(e.to_string())
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, EngineError> {
        let resp = self.get(url).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| EngineError::io(format!("Cannot create {}", dest.display()), &e))?;

        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                EngineError::new(EngineErrorKind::Network, format!("Download of {url} interrupted"))
                    .with_detail(e.to_string())
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| EngineError::io(format!("Cannot write {}", dest.display()), &e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| EngineError::io(format!("Cannot flush {}", dest.display()), &e))?;
        Ok(written)
    }
}
