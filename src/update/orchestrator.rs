//! Two-stage update routine: host application first, then the wrapped tool

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{AppPaths, DEFAULT_PROBE_TIMEOUT_MS, UpdaterConfig};
use crate::update::component::ComponentUpdater;
use crate::update::events::EventSink;
use crate::update::outcome::UpdateOutcome;
use crate::update::relaunch::{RelaunchMechanism, mechanism_for};
use crate::update::self_update::SelfUpdater;
use crate::version::compare::{CompareResult, compare_versions};
use crate::version::probe::{CommandProbe, VersionProbe};
use crate::version::source::{ReleaseSource, resolve_latest};
use crate::version::sources::{GitHubReleaseSource, ManifestSource};
use crate::version::types::VersionDescriptor;

/// Message of the outcome returned when nothing had to be installed
pub const ALREADY_CURRENT: &str = "already current";

/// Why the tool stage does or does not install a new binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDecision {
    /// The binary is not installed
    Install,
    /// The caller asked for a reinstall
    Forced,
    /// Remote release is newer than the installed one
    Upgrade,
    /// The remote release could not be resolved; keep what works
    KeepRemoteUnavailable,
    /// The installed binary did not report a version; keep what works
    KeepLocalUnknown,
    /// Installed version is the same as or newer than the remote one
    Current,
}

impl ToolDecision {
    pub fn needs_update(&self) -> bool {
        matches!(
            self,
            ToolDecision::Install | ToolDecision::Forced | ToolDecision::Upgrade
        )
    }
}

/// Decide whether the tool must be (re)installed.
///
/// Rules are applied in priority order; an absent binary always wins and an
/// unverifiable installation is never replaced unless forced.
pub fn decide_tool_update(
    binary_exists: bool,
    force: bool,
    local: Option<&str>,
    remote: Option<&VersionDescriptor>,
) -> ToolDecision {
    if !binary_exists {
        return ToolDecision::Install;
    }
    if force {
        return ToolDecision::Forced;
    }
    let Some(remote) = remote else {
        return ToolDecision::KeepRemoteUnavailable;
    };
    let Some(local) = local else {
        return ToolDecision::KeepLocalUnknown;
    };

    match compare_versions(local, &remote.identifier) {
        CompareResult::Older => ToolDecision::Upgrade,
        CompareResult::Equal | CompareResult::Newer => ToolDecision::Current,
    }
}

/// Snapshot of local and remote versions, gathered without side effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionReport {
    pub app_version: String,
    pub app_latest: Option<VersionDescriptor>,
    pub tool_installed: bool,
    pub tool_version: Option<String>,
    pub tool_latest: Option<VersionDescriptor>,
}

impl VersionReport {
    pub fn app_update_available(&self) -> bool {
        self.app_latest.as_ref().is_some_and(|latest| {
            compare_versions(&self.app_version, &latest.identifier) == CompareResult::Older
        })
    }

    pub fn tool_decision(&self) -> ToolDecision {
        decide_tool_update(
            self.tool_installed,
            false,
            self.tool_version.as_deref(),
            self.tool_latest.as_ref(),
        )
    }
}

pub struct UpdateOrchestrator {
    app_version: String,
    app_path: PathBuf,
    app_source: Option<Arc<dyn ReleaseSource>>,
    app_stage_skip: Option<String>,
    tool_path: PathBuf,
    tool_source: Arc<dyn ReleaseSource>,
    tool_fallback_url: String,
    probe: Arc<dyn VersionProbe>,
    component: ComponentUpdater,
    self_updater: SelfUpdater,
    force: bool,
    events: EventSink,
}

impl UpdateOrchestrator {
    /// Create an orchestrator that only runs the tool stage.
    ///
    /// Attach a host-app release source with [`Self::with_app_source`].
    pub fn new(
        app_path: PathBuf,
        tool_path: PathBuf,
        tool_source: Arc<dyn ReleaseSource>,
        probe: Arc<dyn VersionProbe>,
        component: ComponentUpdater,
        self_updater: SelfUpdater,
        events: EventSink,
    ) -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            app_path,
            app_source: None,
            app_stage_skip: None,
            tool_path,
            tool_source,
            tool_fallback_url: String::new(),
            probe,
            component,
            self_updater,
            force: false,
            events,
        }
    }

    /// Wire every collaborator from the loaded configuration
    pub fn from_config(config: &UpdaterConfig, paths: &AppPaths, events: EventSink) -> Self {
        let metadata_timeout = Duration::from_millis(config.http.metadata_timeout_ms);

        let tool_source = GitHubReleaseSource::new(&config.tool.repo, &config.tool.asset_name)
            .with_timeout(metadata_timeout);
        let fallback_url = tool_source.fallback_url(&config.tool.fallback_url);
        let component = ComponentUpdater::new(events.clone())
            .with_timeout(Duration::from_millis(config.http.tool_download_timeout_ms))
            .with_min_size(config.tool.min_size);
        let mechanism: Arc<dyn RelaunchMechanism> = Arc::from(mechanism_for(config.relaunch));
        let self_updater = SelfUpdater::new(mechanism, events.clone())
            .with_timeout(Duration::from_millis(config.http.app_download_timeout_ms));

        let mut orchestrator = Self::new(
            paths.app_path.clone(),
            paths.tool_path(&config.tool),
            Arc::new(tool_source),
            Arc::new(CommandProbe::new(Duration::from_millis(
                DEFAULT_PROBE_TIMEOUT_MS,
            ))),
            component,
            self_updater,
            events,
        )
        .with_fallback_url(&fallback_url);

        if let Some(url) = config.manifest_url() {
            let source = ManifestSource::new(url).with_timeout(metadata_timeout);
            orchestrator = orchestrator.with_app_source(Arc::new(source), &config.app_version);
        }

        if !config.self_update.enabled {
            orchestrator = orchestrator.skip_app_stage("Application self-update is disabled");
        } else if paths.is_development_build() {
            orchestrator =
                orchestrator.skip_app_stage("Running a development build; skipping application update");
        }

        orchestrator
    }

    pub fn with_app_source(mut self, source: Arc<dyn ReleaseSource>, app_version: &str) -> Self {
        self.app_source = Some(source);
        self.app_version = app_version.to_string();
        self
    }

    /// Download location used when the tool release cannot be resolved
    pub fn with_fallback_url(mut self, url: &str) -> Self {
        self.tool_fallback_url = url.to_string();
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Run only the tool stage; `reason` is logged as a warning on every run
    pub fn skip_app_stage(mut self, reason: &str) -> Self {
        self.app_stage_skip = Some(reason.to_string());
        self
    }

    /// Run the full update routine.
    ///
    /// A successful host-app update ends the routine with
    /// `restart_required = true`; the tool stage is not reached in that case.
    pub async fn run(&self, cancel: &CancellationToken) -> UpdateOutcome {
        if let Some(outcome) = self.run_app_stage(cancel).await {
            return outcome;
        }

        if cancel.is_cancelled() {
            self.events.warning("Update cancelled");
            return UpdateOutcome::failure("Update cancelled");
        }

        self.run_tool_stage(cancel).await
    }

    async fn run_app_stage(&self, cancel: &CancellationToken) -> Option<UpdateOutcome> {
        if let Some(reason) = &self.app_stage_skip {
            self.events.warning(reason.as_str());
            return None;
        }
        let Some(source) = &self.app_source else {
            debug!("No application release source configured");
            return None;
        };

        self.events.progress("Checking for application updates...", None);
        self.events.info("Checking for application updates...");

        let Some(latest) = resolve_latest(source.as_ref()).await else {
            self.events
                .info("Could not check for application updates; continuing");
            return None;
        };

        if compare_versions(&self.app_version, &latest.identifier) != CompareResult::Older {
            self.events.info(format!(
                "Application is up to date ({})",
                self.app_version
            ));
            return None;
        }

        self.events.info(format!(
            "New application version available: {} (installed {})",
            latest.identifier, self.app_version
        ));
        if !latest.notes.is_empty() {
            self.events.info(format!("Release notes: {}", latest.notes));
        }

        let outcome = self
            .self_updater
            .update(&latest.fetch_location, &self.app_path, cancel)
            .await;
        if outcome.succeeded {
            return Some(outcome.with_identifier(latest.identifier));
        }

        self.events.warning(format!(
            "Application update failed ({}); continuing with engine update",
            outcome.message
        ));
        None
    }

    async fn run_tool_stage(&self, cancel: &CancellationToken) -> UpdateOutcome {
        self.events.progress("Checking engine...", None);
        self.events.info("Checking engine version...");

        let binary_exists = self.tool_path.exists();
        let local = if binary_exists {
            self.probe.probe(&self.tool_path).await
        } else {
            None
        };
        let remote = resolve_latest(self.tool_source.as_ref()).await;
        if remote.is_none() {
            self.events
                .warning("Could not determine the latest engine version");
        }

        let decision =
            decide_tool_update(binary_exists, self.force, local.as_deref(), remote.as_ref());
        debug!(
            "Tool decision: {:?} (installed: {:?}, latest: {:?})",
            decision,
            local,
            remote.as_ref().map(|r| &r.identifier)
        );

        if !decision.needs_update() {
            self.log_keep(decision, local.as_deref());
            self.events.progress("Engine is up to date", 100.0);
            return UpdateOutcome::success(ALREADY_CURRENT)
                .with_identifier(local.unwrap_or_default());
        }

        let url = remote
            .as_ref()
            .map(|r| r.fetch_location.clone())
            .unwrap_or_else(|| self.tool_fallback_url.clone());
        if url.is_empty() {
            self.events.error("No download location for the engine");
            return UpdateOutcome::failure("No download location for the engine");
        }

        let Some(engine_dir) = self.engine_dir() else {
            return UpdateOutcome::failure(format!("Invalid engine path {:?}", self.tool_path));
        };
        if let Err(e) = std::fs::create_dir_all(engine_dir) {
            self.events
                .error(format!("Cannot create engine directory: {}", e));
            return UpdateOutcome::failure(e.to_string());
        }

        let target = remote
            .as_ref()
            .map(|r| r.identifier.clone())
            .unwrap_or_else(|| "latest".to_string());
        self.events.info(match decision {
            ToolDecision::Install => format!("Installing engine {}", target),
            ToolDecision::Forced => format!("Reinstalling engine {}", target),
            _ => format!(
                "Updating engine {} -> {}",
                local.as_deref().unwrap_or("unknown"),
                target
            ),
        });

        if self
            .component
            .update(&url, &self.tool_path, engine_dir, cancel)
            .await
        {
            UpdateOutcome::success(format!("Engine updated to {}", target)).with_identifier(target)
        } else {
            UpdateOutcome::failure("Engine update failed")
        }
    }

    fn log_keep(&self, decision: ToolDecision, local: Option<&str>) {
        match decision {
            ToolDecision::KeepRemoteUnavailable => self
                .events
                .info("Keeping the installed engine; its version could not be verified"),
            ToolDecision::KeepLocalUnknown => self
                .events
                .info("Keeping the installed engine; it did not report a version"),
            _ => self.events.success(format!(
                "Engine is already current ({})",
                local.unwrap_or("unknown")
            )),
        }
    }

    fn engine_dir(&self) -> Option<&Path> {
        self.tool_path.parent()
    }

    /// Gather local and remote versions without downloading anything
    pub async fn check(&self) -> VersionReport {
        let tool_installed = self.tool_path.exists();

        let app_latest = async {
            match &self.app_source {
                Some(source) => resolve_latest(source.as_ref()).await,
                None => None,
            }
        };
        let tool_latest = resolve_latest(self.tool_source.as_ref());
        let tool_version = async {
            if tool_installed {
                self.probe.probe(&self.tool_path).await
            } else {
                None
            }
        };

        let (app_latest, tool_latest, tool_version) =
            futures::join!(app_latest, tool_latest, tool_version);

        VersionReport {
            app_version: self.app_version.clone(),
            app_latest,
            tool_installed,
            tool_version,
            tool_latest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::relaunch::RenameRelaunch;
    use crate::version::error::RegistryError;
    use crate::version::probe::MockVersionProbe;
    use crate::version::source::{MockReleaseSource, SourceKind};
    use mockito::Server;
    use rstest::rstest;
    use tempfile::TempDir;

    fn descriptor(identifier: &str) -> VersionDescriptor {
        VersionDescriptor::new(identifier, "https://example.com/tool", "")
    }

    #[rstest]
    #[case(false, false, None, None, ToolDecision::Install)]
    #[case(false, false, Some("2023.01.01"), Some("2023.01.01"), ToolDecision::Install)]
    #[case(false, true, None, Some("2024.01.01"), ToolDecision::Install)]
    #[case(true, true, Some("2024.01.01"), Some("2024.01.01"), ToolDecision::Forced)]
    #[case(true, true, None, None, ToolDecision::Forced)]
    #[case(true, false, Some("2023.01.01"), None, ToolDecision::KeepRemoteUnavailable)]
    #[case(true, false, None, None, ToolDecision::KeepRemoteUnavailable)]
    #[case(true, false, None, Some("2024.01.01"), ToolDecision::KeepLocalUnknown)]
    #[case(true, false, Some("2023.01.01"), Some("2024.01.01"), ToolDecision::Upgrade)]
    #[case(true, false, Some("2023.01.01"), Some("2023.01.01"), ToolDecision::Current)]
    #[case(true, false, Some("2024.02.01"), Some("2024.01.01"), ToolDecision::Current)]
    fn decide_tool_update_follows_priority(
        #[case] binary_exists: bool,
        #[case] force: bool,
        #[case] local: Option<&str>,
        #[case] remote: Option<&str>,
        #[case] expected: ToolDecision,
    ) {
        let remote = remote.map(descriptor);
        assert_eq!(
            decide_tool_update(binary_exists, force, local, remote.as_ref()),
            expected
        );
    }

    fn tool_source(
        result: impl Fn() -> Result<VersionDescriptor, RegistryError> + Send + Sync + 'static,
    ) -> Arc<dyn ReleaseSource> {
        let mut source = MockReleaseSource::new();
        source.expect_kind().return_const(SourceKind::Tool);
        source.expect_fetch_latest().returning(move || result());
        Arc::new(source)
    }

    fn probe_reporting(version: Option<&'static str>) -> Arc<dyn VersionProbe> {
        let mut probe = MockVersionProbe::new();
        probe
            .expect_probe()
            .returning(move |_| version.map(str::to_string));
        Arc::new(probe)
    }

    fn orchestrator(
        temp_dir: &TempDir,
        source: Arc<dyn ReleaseSource>,
        probe: Arc<dyn VersionProbe>,
    ) -> UpdateOrchestrator {
        let events = EventSink::disabled();
        UpdateOrchestrator::new(
            temp_dir.path().join("app"),
            temp_dir.path().join("engine").join("tool"),
            source,
            probe,
            ComponentUpdater::new(events.clone()),
            SelfUpdater::new(Arc::new(RenameRelaunch), events.clone()),
            events,
        )
    }

    #[tokio::test]
    async fn run_keeps_installed_tool_when_remote_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("engine")).unwrap();
        let tool = temp_dir.path().join("engine").join("tool");
        std::fs::write(&tool, b"working install").unwrap();

        let orchestrator = orchestrator(
            &temp_dir,
            tool_source(|| Err(RegistryError::NotFound("gone".to_string()))),
            probe_reporting(Some("2023.01.01")),
        )
        .with_fallback_url("http://127.0.0.1:9/never");

        let outcome = orchestrator.run(&CancellationToken::new()).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.message, ALREADY_CURRENT);
        assert_eq!(std::fs::read(&tool).unwrap(), b"working install");
    }

    #[tokio::test]
    async fn run_installs_from_fallback_when_remote_unavailable_and_tool_missing() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/fallback/tool")
            .with_status(200)
            .with_body(vec![b'x'; 4096])
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(
            &temp_dir,
            tool_source(|| {
                Err(RegistryError::RateLimited {
                    retry_after_secs: Some(60),
                })
            }),
            probe_reporting(None),
        )
        .with_fallback_url(&format!("{}/fallback/tool", server.url()));

        let outcome = orchestrator.run(&CancellationToken::new()).await;

        mock.assert_async().await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.new_identifier, "latest");
        assert!(temp_dir.path().join("engine").join("tool").exists());
    }

    #[tokio::test]
    async fn run_reports_failure_when_download_is_truncated() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/tool")
            .with_status(200)
            .with_body("tiny")
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let url = format!("{}/tool", server.url());
        let source = tool_source(move || Ok(VersionDescriptor::new("2024.01.01", url.clone(), "")));
        let orchestrator = orchestrator(&temp_dir, source, probe_reporting(None));

        let outcome = orchestrator.run(&CancellationToken::new()).await;

        mock.assert_async().await;
        assert!(!outcome.succeeded);
        assert!(!outcome.restart_required);
        assert!(!temp_dir.path().join("engine").join("tool").exists());
    }

    #[tokio::test]
    async fn run_skips_app_stage_with_reason() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("engine")).unwrap();
        std::fs::write(temp_dir.path().join("engine").join("tool"), b"bin").unwrap();

        let mut app_source = MockReleaseSource::new();
        app_source.expect_kind().return_const(SourceKind::HostApp);
        app_source.expect_fetch_latest().never();

        let (events, mut rx) = EventSink::channel();
        let orchestrator = UpdateOrchestrator::new(
            temp_dir.path().join("app"),
            temp_dir.path().join("engine").join("tool"),
            tool_source(|| Ok(descriptor("2023.01.01"))),
            probe_reporting(Some("2023.01.01")),
            ComponentUpdater::new(events.clone()),
            SelfUpdater::new(Arc::new(RenameRelaunch), events.clone()),
            events,
        )
        .with_app_source(Arc::new(app_source), "1.0.0")
        .skip_app_stage("Running a development build; skipping application update");

        let outcome = orchestrator.run(&CancellationToken::new()).await;

        assert_eq!(outcome.message, ALREADY_CURRENT);
        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let crate::update::events::UpdateEvent::Log { message, .. } = event {
                messages.push(message);
            }
        }
        assert_eq!(
            messages.first().map(String::as_str),
            Some("Running a development build; skipping application update")
        );
    }

    #[tokio::test]
    async fn check_reports_versions_without_downloading() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("engine")).unwrap();
        std::fs::write(temp_dir.path().join("engine").join("tool"), b"bin").unwrap();

        let mut app_source = MockReleaseSource::new();
        app_source.expect_kind().return_const(SourceKind::HostApp);
        app_source
            .expect_fetch_latest()
            .returning(|| Ok(VersionDescriptor::new("3.4.0", "https://example.com/app", "")));

        let orchestrator = orchestrator(
            &temp_dir,
            tool_source(|| Ok(descriptor("2024.01.01"))),
            probe_reporting(Some("2023.01.01")),
        )
        .with_app_source(Arc::new(app_source), "3.3.1");

        let report = orchestrator.check().await;

        assert!(report.tool_installed);
        assert_eq!(report.tool_version.as_deref(), Some("2023.01.01"));
        assert!(report.app_update_available());
        assert_eq!(report.tool_decision(), ToolDecision::Upgrade);
    }

    #[rstest]
    #[case("", "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_test")]
    #[case("https://mirror.example/yt-dlp", "https://mirror.example/yt-dlp")]
    fn from_config_derives_tool_fallback_from_release_repo(
        #[case] configured: &str,
        #[case] expected: &str,
    ) {
        let mut config = UpdaterConfig::default();
        config.tool.asset_name = "yt-dlp_test".to_string();
        config.tool.fallback_url = configured.to_string();
        let paths = AppPaths::from_executable(Path::new("/opt/infinity/infinity"));

        let orchestrator = UpdateOrchestrator::from_config(&config, &paths, EventSink::disabled());

        assert_eq!(orchestrator.tool_fallback_url, expected);
    }
}
