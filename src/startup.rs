//! What the application does first after it starts

use crate::settings::{SettingsError, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupAction {
    /// Relaunched by the update helper; report the finished update
    AcknowledgeUpdate,
    /// No download folder chosen yet
    ChooseDownloadPath,
    /// The engine directory is incomplete
    InstallEngine,
    Ready,
}

/// Pick the startup action.
///
/// The post-update marker wins over first-run detection so a relaunched
/// build never walks the user through setup again.
pub fn startup_action(
    post_update: bool,
    settings: &mut SettingsStore,
    engine_complete: bool,
) -> StartupAction {
    if post_update {
        return StartupAction::AcknowledgeUpdate;
    }
    if settings.is_first_run() || !settings.has_saved_path() {
        return StartupAction::ChooseDownloadPath;
    }
    if !engine_complete {
        return StartupAction::InstallEngine;
    }
    StartupAction::Ready
}

/// Record that the relaunched build came up after an update
pub fn acknowledge_update(settings: &mut SettingsStore) -> Result<(), SettingsError> {
    if settings.is_first_run() {
        settings.mark_first_run_complete()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir, contents: Option<&str>) -> SettingsStore {
        let path = temp_dir.path().join("settings.json");
        if let Some(contents) = contents {
            std::fs::write(&path, contents).unwrap();
        }
        SettingsStore::new(&path)
    }

    #[rstest]
    #[case(true, None, false, StartupAction::AcknowledgeUpdate)]
    #[case(false, None, true, StartupAction::ChooseDownloadPath)]
    #[case(
        false,
        Some(r#"{"download_path": "", "first_run_complete": true}"#),
        true,
        StartupAction::ChooseDownloadPath
    )]
    #[case(
        false,
        Some(r#"{"download_path": "/music", "first_run_complete": true}"#),
        false,
        StartupAction::InstallEngine
    )]
    #[case(
        false,
        Some(r#"{"download_path": "/music", "first_run_complete": true}"#),
        true,
        StartupAction::Ready
    )]
    fn startup_action_selects_first_step(
        #[case] post_update: bool,
        #[case] contents: Option<&str>,
        #[case] engine_complete: bool,
        #[case] expected: StartupAction,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = store(&temp_dir, contents);

        assert_eq!(
            startup_action(post_update, &mut settings, engine_complete),
            expected
        );
    }

    #[test]
    fn acknowledge_update_marks_first_run_complete() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = store(&temp_dir, None);

        acknowledge_update(&mut settings).unwrap();
        settings.invalidate();

        assert!(!settings.is_first_run());
    }
}
