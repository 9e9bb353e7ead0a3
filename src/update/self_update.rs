//! Self-update of the host application ("swap & restart")
//!
//! The new build is downloaded next to the running executable, staged either
//! as a sibling `<name>.new` binary or as an extracted archive tree, and then
//! handed to a [`RelaunchMechanism`] which installs it after this process
//! exits. `update` returns as soon as the helper is running.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{
    APP_DOWNLOAD_TEMP, APP_EXTRACT_DIR, DEFAULT_APP_DOWNLOAD_TIMEOUT_MS, MIN_APP_BINARY_SIZE,
    USER_AGENT,
};
use crate::update::download::{ProgressSpan, download_to_file, ensure_min_size};
use crate::update::error::UpdateError;
use crate::update::events::EventSink;
use crate::update::outcome::UpdateOutcome;
use crate::update::relaunch::{RelaunchMechanism, RelaunchPlan, StagedPayload};

const DOWNLOAD_SPAN: ProgressSpan = ProgressSpan::new(10.0, 50.0);

pub struct SelfUpdater {
    client: reqwest::Client,
    timeout: Duration,
    min_size: u64,
    mechanism: Arc<dyn RelaunchMechanism>,
    events: EventSink,
}

impl SelfUpdater {
    pub fn new(mechanism: Arc<dyn RelaunchMechanism>, events: EventSink) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(DEFAULT_APP_DOWNLOAD_TIMEOUT_MS),
            min_size: MIN_APP_BINARY_SIZE,
            mechanism,
            events,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Download the build at `url` and schedule it to replace `current_exe`.
    ///
    /// On failure every partial artifact is removed and an outcome with
    /// `succeeded = false` is returned; the caller continues with the next
    /// update stage.
    pub async fn update(
        &self,
        url: &str,
        current_exe: &Path,
        cancel: &CancellationToken,
    ) -> UpdateOutcome {
        let mut artifacts = Vec::new();

        match self.try_update(url, current_exe, cancel, &mut artifacts).await {
            Ok(()) => {
                self.events.progress("Ready to restart", 100.0);
                self.events
                    .success("Update helper started; the application will restart");
                UpdateOutcome::restart("Please wait, the application will restart automatically")
            }
            Err(e) => {
                self.events.error(format!("Application update failed: {}", e));
                self.events.progress("Update failed", 0.0);
                remove_artifacts(&artifacts);
                UpdateOutcome::failure(e.to_string())
            }
        }
    }

    async fn try_update(
        &self,
        url: &str,
        current_exe: &Path,
        cancel: &CancellationToken,
        artifacts: &mut Vec<PathBuf>,
    ) -> Result<(), UpdateError> {
        let app_dir = current_exe
            .parent()
            .ok_or_else(|| UpdateError::InvalidPath(current_exe.to_path_buf()))?
            .to_path_buf();
        let process_name = current_exe
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UpdateError::InvalidPath(current_exe.to_path_buf()))?
            .to_string();
        let download_temp = app_dir.join(APP_DOWNLOAD_TEMP);
        let extract_dir = app_dir.join(APP_EXTRACT_DIR);

        self.events.info("Downloading new version...");
        self.events.progress("Downloading...", DOWNLOAD_SPAN.start);
        artifacts.push(download_temp.clone());
        let downloaded = download_to_file(
            &self.client,
            url,
            &download_temp,
            self.timeout,
            DOWNLOAD_SPAN,
            &self.events,
            cancel,
        )
        .await?;
        self.events
            .info(format!("Download complete: {} bytes", downloaded));

        self.events.progress("Inspecting download...", 65.0);
        let archive = {
            let path = download_temp.clone();
            tokio::task::spawn_blocking(move || is_zip_archive(&path))
                .await
                .unwrap_or(false)
        };
        self.events.info(format!(
            "Payload type: {}",
            if archive { "archive" } else { "executable" }
        ));

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        let payload = if archive {
            self.events.progress("Extracting archive...", 70.0);
            artifacts.push(extract_dir.clone());
            let source_dir =
                stage_archive(&download_temp, &extract_dir, expected_stem(current_exe)).await?;
            StagedPayload::Tree {
                source_dir,
                extract_dir,
                download_temp,
            }
        } else {
            let staged = staged_binary_path(current_exe, &app_dir);
            artifacts.push(staged.clone());
            if staged.exists() {
                std::fs::remove_file(&staged)?;
            }
            std::fs::rename(&download_temp, &staged)?;
            ensure_min_size(&staged, self.min_size)?;
            StagedPayload::Binary { staged }
        };

        let plan = RelaunchPlan {
            app_path: current_exe.to_path_buf(),
            app_dir,
            process_name,
            payload,
        };

        self.events.progress("Preparing installation...", 85.0);
        let prepared = self.mechanism.prepare(&plan)?;
        if let Some(script) = &prepared.script {
            artifacts.push(script.clone());
        }

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        self.events.progress("Starting installer...", 95.0);
        self.mechanism.launch(&plan, &prepared)?;

        Ok(())
    }
}

/// `infinity.exe` -> `infinity.new.exe`, `infinity` -> `infinity.new`
fn staged_binary_path(current_exe: &Path, app_dir: &Path) -> PathBuf {
    let stem = expected_stem(current_exe);
    let name = match current_exe.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.new.{}", stem, ext),
        None => format!("{}.new", stem),
    };
    app_dir.join(name)
}

fn expected_stem(current_exe: &Path) -> &str {
    current_exe
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
}

pub fn is_zip_archive(path: &Path) -> bool {
    File::open(path)
        .map(|file| zip::ZipArchive::new(file).is_ok())
        .unwrap_or(false)
}

/// Extract the archive and return the directory holding the new executable
async fn stage_archive(
    archive: &Path,
    extract_dir: &Path,
    expected_name: &str,
) -> Result<PathBuf, UpdateError> {
    let archive = archive.to_path_buf();
    let extract_dir = extract_dir.to_path_buf();
    let expected_name = expected_name.to_string();

    tokio::task::spawn_blocking(move || {
        if extract_dir.exists() {
            std::fs::remove_dir_all(&extract_dir)?;
        }
        std::fs::create_dir_all(&extract_dir)?;

        zip::ZipArchive::new(File::open(&archive)?)?.extract(&extract_dir)?;

        let executable =
            find_executable(&extract_dir, &expected_name).ok_or(UpdateError::ExecutableNotFound)?;
        debug!("Found executable {:?} in archive", executable);

        Ok(executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(extract_dir))
    })
    .await
    .map_err(|e| UpdateError::Io(std::io::Error::other(e)))?
}

/// Find the application executable below `root`.
///
/// Files whose stem contains `expected_name` (case-insensitive) win; otherwise
/// the first executable found is used. Each directory's files are checked
/// before its subdirectories, in name order.
pub fn find_executable(root: &Path, expected_name: &str) -> Option<PathBuf> {
    let mut executables = Vec::new();
    collect_executables(root, &mut executables);

    let expected = expected_name.to_lowercase();
    executables
        .iter()
        .find(|path| {
            !expected.is_empty()
                && path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_lowercase().contains(&expected))
                    .unwrap_or(false)
        })
        .or_else(|| executables.first())
        .cloned()
}

fn collect_executables(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(Result::ok).map(|e| e.path()).collect();
    entries.sort();

    let (dirs, files): (Vec<_>, Vec<_>) = entries.into_iter().partition(|path| path.is_dir());
    found.extend(files.into_iter().filter(|path| is_executable_file(path)));
    for sub in dirs {
        collect_executables(&sub, found);
    }
}

fn is_executable_file(path: &Path) -> bool {
    let has_exe_extension = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("exe"))
        .unwrap_or(false);
    if has_exe_extension {
        return true;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            return metadata.is_file() && metadata.permissions().mode() & 0o111 != 0;
        }
    }

    false
}

fn remove_artifacts(artifacts: &[PathBuf]) {
    for path in artifacts {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else if path.exists() {
            std::fs::remove_file(path)
        } else {
            Ok(())
        };
        if let Err(e) = result {
            debug!("Failed to clean up {:?}: {}", path, e);
        }
    }
}
