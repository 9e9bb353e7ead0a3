//! Streaming download to a file with progress and cancellation

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::update::error::UpdateError;
use crate::update::events::EventSink;

/// Portion of the overall progress bar a download occupies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSpan {
    pub start: f64,
    pub width: f64,
}

impl ProgressSpan {
    pub const fn new(start: f64, width: f64) -> Self {
        Self { start, width }
    }

    fn at(&self, downloaded: u64, total: u64) -> f64 {
        self.start + (downloaded as f64 / total as f64) * self.width
    }
}

/// Download `url` into `dest`, reporting progress after every chunk.
///
/// The cancellation token is checked between chunks. On any failure the
/// partially written file is removed before the error is returned.
pub async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    timeout: Duration,
    span: ProgressSpan,
    events: &EventSink,
    cancel: &CancellationToken,
) -> Result<u64, UpdateError> {
    let result = stream_to_file(client, url, dest, timeout, span, events, cancel).await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }

    result
}

async fn stream_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    timeout: Duration,
    span: ProgressSpan,
    events: &EventSink,
    cancel: &CancellationToken,
) -> Result<u64, UpdateError> {
    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }

    debug!("Downloading {} to {:?}", url, dest);

    let mut response = client.get(url).timeout(timeout).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(UpdateError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let total = response.content_length().unwrap_or(0);
    let mut file = tokio::fs::File::create(dest).await?;
    let mut downloaded: u64 = 0;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            chunk = response.chunk() => chunk?,
        };

        let Some(chunk) = chunk else {
            break;
        };

        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if total > 0 {
            events.progress(
                format!("Downloading... {} KB", downloaded / 1024),
                span.at(downloaded, total),
            );
        }
    }

    file.flush().await?;
    file.sync_all().await?;

    debug!("Downloaded {} bytes from {}", downloaded, url);
    Ok(downloaded)
}

/// Reject artifacts too small to be a real binary
pub fn ensure_min_size(path: &Path, min_size: u64) -> Result<u64, UpdateError> {
    let size = std::fs::metadata(path)?.len();
    if size < min_size {
        return Err(UpdateError::CorruptArtifact { size, min_size });
    }
    Ok(size)
}
