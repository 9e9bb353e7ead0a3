//! Background worker that allows a single update attempt in flight

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::update::orchestrator::UpdateOrchestrator;
use crate::update::outcome::UpdateOutcome;

#[derive(Debug, Clone, Default)]
pub struct UpdateWorker {
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag when the attempt ends, including on panic
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl UpdateWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Spawn an update attempt.
    ///
    /// Returns `None` without doing anything while another attempt runs.
    pub fn start(
        &self,
        orchestrator: Arc<UpdateOrchestrator>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<UpdateOutcome>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("An update is already in progress");
            return None;
        }

        let guard = BusyGuard(self.busy.clone());
        Some(tokio::spawn(async move {
            let _guard = guard;
            let outcome = orchestrator.run(&cancel).await;
            info!(
                "Update finished: succeeded={} restart_required={} ({})",
                outcome.succeeded, outcome.restart_required, outcome.message
            );
            outcome
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::component::ComponentUpdater;
    use crate::update::events::EventSink;
    use crate::update::orchestrator::ALREADY_CURRENT;
    use crate::update::relaunch::RenameRelaunch;
    use crate::update::self_update::SelfUpdater;
    use crate::version::probe::MockVersionProbe;
    use crate::version::source::{MockReleaseSource, SourceKind};
    use crate::version::types::VersionDescriptor;
    use std::time::Duration;
    use tempfile::TempDir;

    fn slow_orchestrator(temp_dir: &TempDir) -> Arc<UpdateOrchestrator> {
        let tool = temp_dir.path().join("tool");
        std::fs::write(&tool, b"bin").unwrap();

        let mut source = MockReleaseSource::new();
        source.expect_kind().return_const(SourceKind::Tool);
        source
            .expect_fetch_latest()
            .returning(|| Ok(VersionDescriptor::new("1.0", "https://example.com/tool", "")));

        let mut probe = MockVersionProbe::new();
        probe.expect_probe().returning(|_| {
            std::thread::sleep(Duration::from_millis(200));
            Some("1.0".to_string())
        });

        let events = EventSink::disabled();
        Arc::new(UpdateOrchestrator::new(
            temp_dir.path().join("app"),
            tool,
            Arc::new(source),
            Arc::new(probe),
            ComponentUpdater::new(events.clone()),
            SelfUpdater::new(Arc::new(RenameRelaunch), events.clone()),
            events,
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_rejects_second_attempt_while_busy() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = slow_orchestrator(&temp_dir);
        let worker = UpdateWorker::new();

        let first = worker.start(orchestrator.clone(), CancellationToken::new());
        assert!(first.is_some());
        assert!(worker.is_busy());
        assert!(
            worker
                .start(orchestrator.clone(), CancellationToken::new())
                .is_none()
        );

        let outcome = first.unwrap().await.unwrap();
        assert_eq!(outcome.message, ALREADY_CURRENT);
        assert!(!worker.is_busy());

        let again = worker.start(orchestrator, CancellationToken::new());
        assert!(again.is_some());
        again.unwrap().await.unwrap();
    }
}
