//! Version manifest source for the host application
//!
//! The manifest is a small JSON document:
//! `{"version": "3.3.1", "download_url": "...", "release_notes": "..."}`

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{DEFAULT_METADATA_TIMEOUT_MS, USER_AGENT};
use crate::version::error::RegistryError;
use crate::version::source::{ReleaseSource, SourceKind};
use crate::version::types::VersionDescriptor;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    version: String,
    #[serde(default)]
    download_url: String,
    #[serde(default)]
    release_notes: String,
}

/// Release source reading a version manifest from a fixed URL
pub struct ManifestSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ManifestSource {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            url: url.to_string(),
            timeout: Duration::from_millis(DEFAULT_METADATA_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl ReleaseSource for ManifestSource {
    fn kind(&self) -> SourceKind {
        SourceKind::HostApp
    }

    async fn fetch_latest(&self) -> Result<VersionDescriptor, RegistryError> {
        debug!("Fetching version manifest from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(self.url.clone()));
        }

        if !status.is_success() {
            warn!("Version manifest returned status {}: {}", status, self.url);
            return Err(RegistryError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        // Raw hosting often serves JSON as text/plain, so parse the body directly
        let body = response.text().await?;
        let manifest: Manifest = serde_json::from_str(&body).map_err(|e| {
            warn!("Failed to parse version manifest: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        if manifest.version.trim().is_empty() {
            return Err(RegistryError::InvalidResponse(
                "Manifest has no version".to_string(),
            ));
        }

        Ok(VersionDescriptor::new(
            manifest.version,
            manifest.download_url,
            manifest.release_notes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn fetch_latest_reads_manifest_fields() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/version.json")
            .with_status(200)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(
                r#"{
                    "version": "3.4.0",
                    "download_url": "https://dl.example/app.zip",
                    "release_notes": "Faster downloads"
                }"#,
            )
            .create_async()
            .await;

        let source = ManifestSource::new(&format!("{}/version.json", server.url()));
        let result = source.fetch_latest().await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            result,
            VersionDescriptor::new("3.4.0", "https://dl.example/app.zip", "Faster downloads")
        );
    }

    #[tokio::test]
    async fn fetch_latest_rejects_manifest_without_version() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/version.json")
            .with_status(200)
            .with_body(r#"{"download_url": "https://dl.example/app.zip"}"#)
            .create_async()
            .await;

        let source = ManifestSource::new(&format!("{}/version.json", server.url()));
        let result = source.fetch_latest().await;

        mock.assert_async().await;
        assert!(matches!(result, Err(RegistryError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn fetch_latest_returns_invalid_response_for_server_error() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/version.json")
            .with_status(500)
            .create_async()
            .await;

        let source = ManifestSource::new(&format!("{}/version.json", server.url()));
        let result = source.fetch_latest().await;

        mock.assert_async().await;
        assert!(matches!(result, Err(RegistryError::InvalidResponse(_))));
    }
}
