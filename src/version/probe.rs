//! Local version probe for the installed tool binary

#[cfg(test)]
use mockall::automock;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::config::{DEFAULT_PROBE_TIMEOUT_MS, VERSION_FLAG};

/// Decode process output, dropping bytes that are not valid UTF-8.
///
/// Tool output on non-English systems is frequently in a legacy code page;
/// the version string itself is ASCII so discarding the rest is harmless.
pub fn decode_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Trait for asking an installed binary which version it is
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait VersionProbe: Send + Sync {
    /// Returns the self-reported version, or `None` when it cannot be determined
    async fn probe(&self, binary: &Path) -> Option<String>;
}

/// Probe that runs `<binary> --version`
pub struct CommandProbe {
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS))
    }
}

#[async_trait::async_trait]
impl VersionProbe for CommandProbe {
    async fn probe(&self, binary: &Path) -> Option<String> {
        if !binary.exists() {
            debug!("Tool binary not found at {:?}", binary);
            return None;
        }

        let mut command = Command::new(binary);
        command
            .arg(VERSION_FLAG)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("Failed to run {:?} {}: {}", binary, VERSION_FLAG, e);
                return None;
            }
            Err(_) => {
                debug!("{:?} {} timed out", binary, VERSION_FLAG);
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                "{:?} {} exited with {}",
                binary, VERSION_FLAG, output.status
            );
            return None;
        }

        let stdout = decode_output(&output.stdout);
        debug!("{:?} {} stdout: {:?}", binary, VERSION_FLAG, stdout);

        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}
