//! GitHub Releases API source for the wrapped tool

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{DEFAULT_METADATA_TIMEOUT_MS, USER_AGENT};
use crate::version::error::RegistryError;
use crate::version::source::{ReleaseSource, SourceKind};
use crate::version::types::VersionDescriptor;

/// Default base URL for GitHub API
const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Default base URL for release downloads
const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://github.com";

/// Response from the GitHub "latest release" endpoint
#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    #[serde(default)]
    browser_download_url: String,
}

/// Release source backed by the GitHub Releases API
pub struct GitHubReleaseSource {
    client: reqwest::Client,
    base_url: String,
    download_base_url: String,
    repo: String,
    asset_name: String,
    timeout: Duration,
}

impl GitHubReleaseSource {
    /// Creates a source for `repo` (e.g. "yt-dlp/yt-dlp") looking for `asset_name`
    pub fn new(repo: &str, asset_name: &str) -> Self {
        Self::with_base_urls(repo, asset_name, DEFAULT_BASE_URL, DEFAULT_DOWNLOAD_BASE_URL)
    }

    /// Creates a source with custom API and download base URLs
    pub fn with_base_urls(
        repo: &str,
        asset_name: &str,
        base_url: &str,
        download_base_url: &str,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            download_base_url: download_base_url.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            asset_name: asset_name.to_string(),
            timeout: Duration::from_millis(DEFAULT_METADATA_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Conventional download URL of the asset for a given tag
    pub fn tagged_download_url(&self, tag: &str) -> String {
        format!(
            "{}/{}/releases/download/{}/{}",
            self.download_base_url, self.repo, tag, self.asset_name
        )
    }

    /// Download URL that always points at the newest release's asset
    pub fn latest_download_url(&self) -> String {
        format!(
            "{}/{}/releases/latest/download/{}",
            self.download_base_url, self.repo, self.asset_name
        )
    }

    /// URL used when the release lookup fails: `configured` if set,
    /// otherwise [`latest_download_url`](Self::latest_download_url)
    pub fn fallback_url(&self, configured: &str) -> String {
        match configured.trim() {
            "" => self.latest_download_url(),
            url => url.to_string(),
        }
    }
}

fn is_quota_exhausted(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl ReleaseSource for GitHubReleaseSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Tool
    }

    async fn fetch_latest(&self) -> Result<VersionDescriptor, RegistryError> {
        let url = format!("{}/repos/{}/releases/latest", self.base_url, self.repo);
        debug!("Fetching latest release from {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(self.repo.clone()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || (status == reqwest::StatusCode::FORBIDDEN && is_quota_exhausted(response.headers()))
        {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(RegistryError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            warn!("GitHub API returned status {}: {}", status, url);
            return Err(RegistryError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let release: Release = response.json().await.map_err(|e| {
            warn!("Failed to parse GitHub release response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        let tag = release.tag_name.trim();
        if tag.is_empty() {
            return Err(RegistryError::InvalidResponse(
                "Release has an empty tag name".to_string(),
            ));
        }

        let download_url = release
            .assets
            .iter()
            .find(|asset| asset.name == self.asset_name && !asset.browser_download_url.is_empty())
            .map(|asset| asset.browser_download_url.clone())
            .unwrap_or_else(|| {
                debug!(
                    "Asset {} not listed in release {}; using conventional URL",
                    self.asset_name, tag
                );
                self.tagged_download_url(tag)
            });

        Ok(VersionDescriptor::new(
            tag,
            download_url,
            release.body.unwrap_or_default(),
        ))
    }
}
