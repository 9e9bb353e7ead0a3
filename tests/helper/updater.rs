//! Updater test utilities

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use infinity_updater::update::component::ComponentUpdater;
use infinity_updater::update::error::UpdateError;
use infinity_updater::update::events::{EventSink, UpdateEvent};
use infinity_updater::update::orchestrator::UpdateOrchestrator;
use infinity_updater::update::relaunch::{PreparedRelaunch, RelaunchMechanism, RelaunchPlan};
use infinity_updater::update::self_update::SelfUpdater;
use infinity_updater::version::error::RegistryError;
use infinity_updater::version::probe::VersionProbe;
use infinity_updater::version::source::{ReleaseSource, SourceKind};
use infinity_updater::version::types::VersionDescriptor;

/// Release source returning a fixed descriptor and counting calls
pub struct MockReleaseSource {
    kind: SourceKind,
    latest: Option<VersionDescriptor>,
    calls: AtomicUsize,
}

impl MockReleaseSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            latest: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latest(mut self, identifier: &str, fetch_location: &str) -> Self {
        self.latest = Some(VersionDescriptor::new(identifier, fetch_location, ""));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for MockReleaseSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_latest(&self) -> Result<VersionDescriptor, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.latest
            .clone()
            .ok_or_else(|| RegistryError::NotFound(self.kind.as_str().to_string()))
    }
}

/// Probe reporting a fixed version
pub struct FixedProbe(pub Option<String>);

impl FixedProbe {
    pub fn reporting(version: &str) -> Self {
        Self(Some(version.to_string()))
    }

    pub fn silent() -> Self {
        Self(None)
    }
}

#[async_trait]
impl VersionProbe for FixedProbe {
    async fn probe(&self, _binary: &Path) -> Option<String> {
        self.0.clone()
    }
}

/// Relaunch mechanism that records plans instead of spawning a helper
#[derive(Default)]
pub struct RecordingRelaunch {
    plans: Mutex<Vec<RelaunchPlan>>,
}

impl RecordingRelaunch {
    pub fn plans(&self) -> Vec<RelaunchPlan> {
        self.plans.lock().unwrap().clone()
    }
}

impl RelaunchMechanism for RecordingRelaunch {
    fn prepare(&self, plan: &RelaunchPlan) -> Result<PreparedRelaunch, UpdateError> {
        Ok(PreparedRelaunch {
            program: plan.app_path.clone(),
            args: vec!["--post-update".to_string()],
            working_dir: plan.app_dir.clone(),
            script: None,
        })
    }

    fn launch(&self, plan: &RelaunchPlan, _prepared: &PreparedRelaunch) -> Result<(), UpdateError> {
        self.plans.lock().unwrap().push(plan.clone());
        Ok(())
    }
}

/// Install layout inside a temporary directory
pub struct TestInstall {
    pub temp_dir: TempDir,
    pub app_path: PathBuf,
    pub tool_path: PathBuf,
}

impl TestInstall {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let app_path = temp_dir.path().join("infinity.exe");
        let tool_path = temp_dir.path().join("engine").join("yt-dlp.exe");
        std::fs::write(&app_path, b"current build").unwrap();
        std::fs::create_dir_all(tool_path.parent().unwrap()).unwrap();
        Self {
            temp_dir,
            app_path,
            tool_path,
        }
    }

    pub fn with_tool(self, contents: &[u8]) -> Self {
        std::fs::write(&self.tool_path, contents).unwrap();
        self
    }

    pub fn orchestrator(
        &self,
        tool_source: Arc<dyn ReleaseSource>,
        probe: Arc<dyn VersionProbe>,
        mechanism: Arc<dyn RelaunchMechanism>,
        events: EventSink,
    ) -> UpdateOrchestrator {
        UpdateOrchestrator::new(
            self.app_path.clone(),
            self.tool_path.clone(),
            tool_source,
            probe,
            ComponentUpdater::new(events.clone()),
            SelfUpdater::new(mechanism, events.clone()),
            events,
        )
    }
}

/// Drain every log message currently queued on the channel
pub fn log_messages(rx: &mut tokio::sync::mpsc::UnboundedReceiver<UpdateEvent>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let UpdateEvent::Log { message, .. } = event {
            messages.push(message);
        }
    }
    messages
}

/// Build an in-memory zip archive
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
