//! Tracing subscriber setup

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable checked before `RUST_LOG`
pub const LOG_ENV: &str = "INFINITY_UPDATER_LOG";

const DEFAULT_DIRECTIVES: &str = "infinity_updater=info,warn";

/// Build the filter from `INFINITY_UPDATER_LOG`, then `RUST_LOG`, then the default
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber writing to `log_file`.
///
/// The returned guard flushes buffered lines on drop and must be kept alive
/// for as long as the process logs.
pub fn init(log_file: &Path, json: bool) -> std::io::Result<WorkerGuard> {
    let dir = log_file.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = log_file
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "infinity-updater.log".into());

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(layer)
            .init();
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_filter_prefers_dedicated_variable() {
        // SAFETY: serialized with the other environment tests
        unsafe {
            std::env::set_var(LOG_ENV, "debug");
            std::env::set_var("RUST_LOG", "error");
        }

        let filter = env_filter();

        unsafe {
            std::env::remove_var(LOG_ENV);
            std::env::remove_var("RUST_LOG");
        }
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    #[serial]
    fn env_filter_falls_back_to_default_directives() {
        unsafe {
            std::env::remove_var(LOG_ENV);
            std::env::remove_var("RUST_LOG");
        }

        let filter = env_filter();

        assert!(filter.to_string().contains("infinity_updater=info"));
    }
}
