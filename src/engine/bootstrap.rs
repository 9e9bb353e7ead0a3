//! First-run installation of the engine directory
//!
//! The engine consists of the wrapped tool plus `ffmpeg` and `ffprobe`. The
//! tool is installed through [`ComponentUpdater`]; ffmpeg ships as a zip
//! bundle from which only the two binaries are extracted.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{AppPaths, USER_AGENT, UpdaterConfig};
use crate::update::component::{ComponentUpdater, mark_executable};
use crate::update::download::{ProgressSpan, download_to_file};
use crate::update::error::UpdateError;
use crate::update::events::EventSink;
use crate::version::source::{ReleaseSource, resolve_latest};
use crate::version::sources::GitHubReleaseSource;

const FFMPEG_SPAN: ProgressSpan = ProgressSpan::new(45.0, 45.0);
const FFMPEG_ARCHIVE: &str = "_ffmpeg_download.zip";

/// Components installed by a bootstrap run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub tool_installed: bool,
    pub ffmpeg_installed: bool,
    pub ffprobe_installed: bool,
}

impl EngineReport {
    pub fn installed_anything(&self) -> bool {
        self.tool_installed || self.ffmpeg_installed || self.ffprobe_installed
    }
}

pub struct EngineBootstrap {
    engine_dir: PathBuf,
    tool_path: PathBuf,
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    tool_source: Arc<dyn ReleaseSource>,
    tool_fallback_url: String,
    ffmpeg_bundle_url: Option<String>,
    component: ComponentUpdater,
    client: reqwest::Client,
    ffmpeg_timeout: Duration,
    events: EventSink,
}

impl EngineBootstrap {
    pub fn new(
        paths: &AppPaths,
        tool_path: PathBuf,
        tool_source: Arc<dyn ReleaseSource>,
        component: ComponentUpdater,
        events: EventSink,
    ) -> Self {
        Self {
            engine_dir: paths.engine_dir.clone(),
            tool_path,
            ffmpeg_path: paths.ffmpeg_path(),
            ffprobe_path: paths.ffprobe_path(),
            tool_source,
            tool_fallback_url: String::new(),
            ffmpeg_bundle_url: None,
            component,
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            ffmpeg_timeout: Duration::from_secs(180),
            events,
        }
    }

    pub fn from_config(config: &UpdaterConfig, paths: &AppPaths, events: EventSink) -> Self {
        let tool_source = GitHubReleaseSource::new(&config.tool.repo, &config.tool.asset_name)
            .with_timeout(Duration::from_millis(config.http.metadata_timeout_ms));
        let fallback_url = tool_source.fallback_url(&config.tool.fallback_url);
        let component = ComponentUpdater::new(events.clone())
            .with_timeout(Duration::from_millis(config.http.tool_download_timeout_ms))
            .with_min_size(config.tool.min_size);

        Self::new(
            paths,
            paths.tool_path(&config.tool),
            Arc::new(tool_source),
            component,
            events,
        )
        .with_fallback_url(&fallback_url)
        .with_ffmpeg_bundle(config.ffmpeg.bundle_url.as_deref())
        .with_ffmpeg_timeout(Duration::from_millis(config.http.ffmpeg_download_timeout_ms))
    }

    pub fn with_fallback_url(mut self, url: &str) -> Self {
        self.tool_fallback_url = url.to_string();
        self
    }

    pub fn with_ffmpeg_bundle(mut self, url: Option<&str>) -> Self {
        self.ffmpeg_bundle_url = url.filter(|u| !u.is_empty()).map(str::to_string);
        self
    }

    pub fn with_ffmpeg_timeout(mut self, timeout: Duration) -> Self {
        self.ffmpeg_timeout = timeout;
        self
    }

    /// Whether every engine binary is present
    pub fn is_complete(&self) -> bool {
        self.tool_path.exists() && self.ffmpeg_path.exists()
    }

    /// Install whatever part of the engine is missing.
    ///
    /// Fails when ffmpeg is still absent afterwards, since downloads cannot
    /// be converted without it.
    pub async fn ensure(&self, cancel: &CancellationToken) -> Result<EngineReport, UpdateError> {
        tokio::fs::create_dir_all(&self.engine_dir).await?;
        let mut report = EngineReport::default();

        if !self.tool_path.exists() {
            self.events.progress("Installing engine...", 5.0);
            report.tool_installed = self.install_tool(cancel).await?;
        } else {
            debug!("Tool already present at {:?}", self.tool_path);
        }

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        if !self.ffmpeg_path.exists() {
            let Some(url) = &self.ffmpeg_bundle_url else {
                self.events
                    .error("ffmpeg is missing and no bundle is configured for this platform");
                return Err(UpdateError::MissingComponent("ffmpeg".to_string()));
            };
            self.events.info("Downloading ffmpeg...");
            let (ffmpeg, ffprobe) = self.install_ffmpeg(url, cancel).await?;
            report.ffmpeg_installed = ffmpeg;
            report.ffprobe_installed = ffprobe;
        }

        if !self.ffmpeg_path.exists() {
            return Err(UpdateError::MissingComponent("ffmpeg".to_string()));
        }
        if !self.ffprobe_path.exists() {
            self.events
                .warning("ffprobe is missing; metadata embedding may be incomplete");
        }

        self.events.progress("Engine ready", 100.0);
        self.events.success("Engine is ready");
        Ok(report)
    }

    async fn install_tool(&self, cancel: &CancellationToken) -> Result<bool, UpdateError> {
        let url = match resolve_latest(self.tool_source.as_ref()).await {
            Some(latest) => {
                self.events
                    .info(format!("Installing engine {}", latest.identifier));
                latest.fetch_location
            }
            None if !self.tool_fallback_url.is_empty() => {
                self.events
                    .warning("Latest engine release unavailable; using the fallback download");
                self.tool_fallback_url.clone()
            }
            None => return Err(UpdateError::MissingComponent("engine".to_string())),
        };

        if self
            .component
            .update(&url, &self.tool_path, &self.engine_dir, cancel)
            .await
        {
            Ok(true)
        } else if cancel.is_cancelled() {
            Err(UpdateError::Cancelled)
        } else {
            Err(UpdateError::MissingComponent("engine".to_string()))
        }
    }

    async fn install_ffmpeg(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(bool, bool), UpdateError> {
        let archive = self.engine_dir.join(FFMPEG_ARCHIVE);

        let result = async {
            download_to_file(
                &self.client,
                url,
                &archive,
                self.ffmpeg_timeout,
                FFMPEG_SPAN,
                &self.events,
                cancel,
            )
            .await?;

            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }

            self.events.progress("Extracting ffmpeg...", 92.0);
            let archive_path = archive.clone();
            let engine_dir = self.engine_dir.clone();
            tokio::task::spawn_blocking(move || extract_ffmpeg(&archive_path, &engine_dir))
                .await
                .map_err(|e| UpdateError::Io(std::io::Error::other(e)))?
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            debug!("Failed to remove {:?}: {}", archive, e);
        }

        let (ffmpeg, ffprobe) = result?;
        if ffmpeg {
            self.events.success("ffmpeg installed");
        }
        if ffprobe {
            self.events.success("ffprobe installed");
        }
        Ok((ffmpeg, ffprobe))
    }
}

/// Extract `ffmpeg` and `ffprobe` from the bundle into `engine_dir`.
///
/// Entries are matched by file name wherever they sit in the archive; the
/// first match of each wins. Returns which of the two were written.
pub fn extract_ffmpeg(archive: &Path, engine_dir: &Path) -> Result<(bool, bool), UpdateError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    let mut found = (false, false);

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().to_lowercase()))
        else {
            continue;
        };

        let slot = match name.trim_end_matches(".exe") {
            "ffmpeg" if !found.0 => &mut found.0,
            "ffprobe" if !found.1 => &mut found.1,
            _ => continue,
        };

        let stem = name.trim_end_matches(".exe");
        let dest = engine_dir.join(format!("{}{}", stem, std::env::consts::EXE_SUFFIX));
        let partial = dest.with_extension("partial");
        {
            let mut out = File::create(&partial)?;
            std::io::copy(&mut entry, &mut out)?;
            out.sync_all()?;
        }
        std::fs::rename(&partial, &dest)?;
        mark_executable(&dest)?;
        debug!("Extracted {} to {:?}", name, dest);
        *slot = true;

        if found.0 && found.1 {
            break;
        }
    }

    Ok(found)
}
