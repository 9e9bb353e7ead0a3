//! Download-and-swap updater for the wrapped tool binary

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_TOOL_DOWNLOAD_TIMEOUT_MS, MIN_COMPONENT_SIZE, USER_AGENT};
use crate::update::download::{ProgressSpan, download_to_file, ensure_min_size};
use crate::update::error::UpdateError;
use crate::update::events::EventSink;
use crate::update::process::{ProcessTerminator, SystemTerminator};

/// Filesystem operations used for the final swap
pub trait FileOps: Send + Sync {
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}

const DOWNLOAD_SPAN: ProgressSpan = ProgressSpan::new(5.0, 60.0);

/// Time given to the OS to release file handles after killing their owners
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Replaces a binary with a freshly downloaded one.
///
/// The download goes to `<stem>.new` next to the target and is renamed over
/// it only after validation, so the target is either fully replaced or left
/// untouched.
pub struct ComponentUpdater {
    client: reqwest::Client,
    timeout: Duration,
    min_size: u64,
    files: Arc<dyn FileOps>,
    terminator: Arc<dyn ProcessTerminator>,
    events: EventSink,
}

impl ComponentUpdater {
    pub fn new(events: EventSink) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(DEFAULT_TOOL_DOWNLOAD_TIMEOUT_MS),
            min_size: MIN_COMPONENT_SIZE,
            files: Arc::new(StdFileOps),
            terminator: Arc::new(SystemTerminator),
            events,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_file_ops(mut self, files: Arc<dyn FileOps>) -> Self {
        self.files = files;
        self
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn ProcessTerminator>) -> Self {
        self.terminator = terminator;
        self
    }

    /// Download `url` and install it at `target_path`.
    ///
    /// Never fails loudly: errors are logged, the staged download is removed
    /// and `false` is returned.
    pub async fn update(
        &self,
        url: &str,
        target_path: &Path,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> bool {
        let (staged, old) = match staging_paths(target_path, working_dir) {
            Ok(paths) => paths,
            Err(e) => {
                self.events.error(format!("Cannot update {:?}: {}", target_path, e));
                return false;
            }
        };

        match self
            .try_update(url, target_path, working_dir, &staged, &old, cancel)
            .await
        {
            Ok(size) => {
                self.events.progress("Update complete", 100.0);
                self.events.success(format!(
                    "{} updated ({} bytes)",
                    display_name(target_path),
                    size
                ));
                true
            }
            Err(e) => {
                self.events
                    .error(format!("Update of {} failed: {}", display_name(target_path), e));
                self.events.progress("Update failed", 0.0);
                if staged.exists() {
                    let _ = std::fs::remove_file(&staged);
                }
                false
            }
        }
    }

    async fn try_update(
        &self,
        url: &str,
        target_path: &Path,
        working_dir: &Path,
        staged: &Path,
        old: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, UpdateError> {
        tokio::fs::create_dir_all(working_dir).await?;

        self.events
            .info(format!("Downloading {}...", display_name(target_path)));
        self.events.progress("Downloading...", DOWNLOAD_SPAN.start);

        let downloaded = download_to_file(
            &self.client,
            url,
            staged,
            self.timeout,
            DOWNLOAD_SPAN,
            &self.events,
            cancel,
        )
        .await?;
        self.events
            .info(format!("Download complete: {} bytes", downloaded));

        self.events.progress("Verifying download...", 70.0);
        let size = ensure_min_size(staged, self.min_size)?;
        mark_executable(staged)?;

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        self.events.progress("Replacing old version...", 80.0);
        self.swap_into_place(staged, target_path, old).await?;

        Ok(size)
    }

    async fn swap_into_place(
        &self,
        staged: &Path,
        target: &Path,
        old: &Path,
    ) -> Result<(), UpdateError> {
        let mut set_aside = false;

        if target.exists() {
            if let Err(e) = self.remove_target(target) {
                self.events.warning(format!(
                    "{} is in use ({}); terminating processes holding it",
                    display_name(target),
                    e
                ));

                let killed = self.terminator.terminate_by_name(&display_name(target));
                if killed > 0 {
                    tokio::time::sleep(KILL_GRACE).await;
                }

                if self.remove_target(target).is_err() {
                    self.events.warning(format!(
                        "{} is still locked; moving it aside to {:?}",
                        display_name(target),
                        old
                    ));
                    let _ = self.files.remove_file(old);
                    self.files
                        .rename(target, old)
                        .map_err(|_| UpdateError::LockedFile {
                            path: target.to_path_buf(),
                        })?;
                    set_aside = true;
                }
            }
        }

        self.events.progress("Installing new version...", 90.0);
        if let Err(e) = self.files.rename(staged, target) {
            if set_aside {
                let _ = self.files.rename(old, target);
            }
            return Err(e.into());
        }

        Ok(())
    }

    fn remove_target(&self, target: &Path) -> io::Result<()> {
        match self.files.remove_file(target) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}

/// `<stem>.new` and `<stem>.old` inside `working_dir`
fn staging_paths(target: &Path, working_dir: &Path) -> Result<(PathBuf, PathBuf), UpdateError> {
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| UpdateError::InvalidPath(target.to_path_buf()))?;

    Ok((
        working_dir.join(format!("{}.new", stem)),
        working_dir.join(format!("{}.old", stem)),
    ))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Set the executable bits on Unix; a no-op elsewhere
pub fn mark_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::process::MockProcessTerminator;
    use mockito::Server;
    use tempfile::TempDir;

    const NEW_BINARY: &[u8] = &[0x7f; 4096];

    /// Simulates a target that the OS refuses to delete while it is running
    struct LockedTarget {
        locked: PathBuf,
    }

    impl FileOps for LockedTarget {
        fn remove_file(&self, path: &Path) -> io::Result<()> {
            if path == self.locked {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "The process cannot access the file",
                ));
            }
            std::fs::remove_file(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            std::fs::rename(from, to)
        }
    }

    async fn serve(server: &mut Server, body: &[u8]) -> mockito::Mock {
        server
            .mock("GET", "/yt-dlp")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn update_installs_new_binary_over_existing_target() {
        let mut server = Server::new_async().await;
        let mock = serve(&mut server, NEW_BINARY).await;

        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("yt-dlp");
        std::fs::write(&target, b"old binary").unwrap();

        let updater = ComponentUpdater::new(EventSink::disabled());
        let ok = updater
            .update(
                &format!("{}/yt-dlp", server.url()),
                &target,
                temp_dir.path(),
                &CancellationToken::new(),
            )
            .await;

        mock.assert_async().await;
        assert!(ok);
        assert_eq!(std::fs::read(&target).unwrap(), NEW_BINARY);
        assert!(!temp_dir.path().join("yt-dlp.new").exists());
    }

    #[tokio::test]
    async fn update_rejects_truncated_download_and_keeps_target() {
        let mut server = Server::new_async().await;
        let mock = serve(&mut server, b"Not Found").await;

        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("yt-dlp");
        std::fs::write(&target, b"working binary").unwrap();

        let updater = ComponentUpdater::new(EventSink::disabled());
        let ok = updater
            .update(
                &format!("{}/yt-dlp", server.url()),
                &target,
                temp_dir.path(),
                &CancellationToken::new(),
            )
            .await;

        mock.assert_async().await;
        assert!(!ok);
        assert_eq!(std::fs::read(&target).unwrap(), b"working binary");
        assert!(!temp_dir.path().join("yt-dlp.new").exists());
    }

    #[tokio::test]
    async fn update_moves_locked_target_aside_when_holder_cannot_be_killed() {
        let mut server = Server::new_async().await;
        let mock = serve(&mut server, NEW_BINARY).await;

        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("yt-dlp");
        std::fs::write(&target, b"running binary").unwrap();

        let mut terminator = MockProcessTerminator::new();
        terminator
            .expect_terminate_by_name()
            .withf(|name| name == "yt-dlp")
            .times(1)
            .return_const(0usize);

        let updater = ComponentUpdater::new(EventSink::disabled())
            .with_file_ops(Arc::new(LockedTarget {
                locked: target.clone(),
            }))
            .with_terminator(Arc::new(terminator));

        let ok = updater
            .update(
                &format!("{}/yt-dlp", server.url()),
                &target,
                temp_dir.path(),
                &CancellationToken::new(),
            )
            .await;

        mock.assert_async().await;
        assert!(ok);
        assert_eq!(std::fs::read(&target).unwrap(), NEW_BINARY);
        assert_eq!(
            std::fs::read(temp_dir.path().join("yt-dlp.old")).unwrap(),
            b"running binary"
        );
    }

    #[tokio::test]
    async fn update_installs_into_missing_working_dir() {
        let mut server = Server::new_async().await;
        let mock = serve(&mut server, NEW_BINARY).await;

        let temp_dir = TempDir::new().unwrap();
        let engine_dir = temp_dir.path().join("engine");
        let target = engine_dir.join("yt-dlp");

        let updater = ComponentUpdater::new(EventSink::disabled());
        let ok = updater
            .update(
                &format!("{}/yt-dlp", server.url()),
                &target,
                &engine_dir,
                &CancellationToken::new(),
            )
            .await;

        mock.assert_async().await;
        assert!(ok);
        assert!(target.exists());
    }

    #[tokio::test]
    async fn update_returns_false_when_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("yt-dlp");
        std::fs::write(&target, b"working binary").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let updater = ComponentUpdater::new(EventSink::disabled());
        let ok = updater
            .update("http://127.0.0.1:9/yt-dlp", &target, temp_dir.path(), &cancel)
            .await;

        assert!(!ok);
        assert_eq!(std::fs::read(&target).unwrap(), b"working binary");
    }

    #[test]
    fn staging_paths_strip_extension() {
        let (staged, old) =
            staging_paths(Path::new("/engine/yt-dlp.exe"), Path::new("/engine")).unwrap();

        assert_eq!(staged, PathBuf::from("/engine/yt-dlp.new"));
        assert_eq!(old, PathBuf::from("/engine/yt-dlp.old"));
    }
}
