//! Forced termination of processes holding a file open

#[cfg(test)]
use mockall::automock;

use sysinfo::System;
use tracing::{debug, info};

/// Trait for terminating every process running a given executable
#[cfg_attr(test, automock)]
pub trait ProcessTerminator: Send + Sync {
    /// Kill processes whose executable name equals `name`.
    ///
    /// Returns the number of processes that were signalled.
    fn terminate_by_name(&self, name: &str) -> usize;
}

/// Terminator backed by the operating system's process table
#[derive(Debug, Default)]
pub struct SystemTerminator;

impl ProcessTerminator for SystemTerminator {
    fn terminate_by_name(&self, name: &str) -> usize {
        let mut system = System::new();
        system.refresh_processes();

        let own_pid = std::process::id();
        let killed = system
            .processes_by_exact_name(name)
            .filter(|process| process.pid().as_u32() != own_pid)
            .filter(|process| {
                let signalled = process.kill();
                debug!(
                    "Terminating {} (pid {}): {}",
                    name,
                    process.pid(),
                    signalled
                );
                signalled
            })
            .count();

        if killed > 0 {
            info!("Terminated {} process(es) named {}", killed, name);
        }
        killed
    }
}
