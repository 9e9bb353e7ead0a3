//! Events emitted by the update worker for the presentation layer
//!
//! The core never touches UI state. It pushes plain data onto an unbounded
//! channel and the receiver decides how to marshal it onto its own thread.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Severity of a user-facing log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// Progress of the current stage, 0-100 when known
    Progress { label: String, percent: Option<f64> },
    Log { level: LogLevel, message: String },
}

/// Sending half of the event channel. Cheap to clone; sending never blocks.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<UpdateEvent>>,
}

impl EventSink {
    /// Create a sink together with the receiver the presentation layer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that only mirrors log lines to `tracing`
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn progress(&self, label: impl Into<String>, percent: impl Into<Option<f64>>) {
        let percent = percent.into().map(|p| p.clamp(0.0, 100.0));
        self.send(UpdateEvent::Progress {
            label: label.into(),
            percent,
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info | LogLevel::Success => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.send(UpdateEvent::Log { level, message });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    fn send(&self, event: UpdateEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching any more
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_delivers_events_in_order() {
        let (sink, mut rx) = EventSink::channel();

        sink.progress("Downloading", 42.0);
        sink.warning("slow mirror");
        sink.progress("Converting", None);

        assert_eq!(
            rx.try_recv().unwrap(),
            UpdateEvent::Progress {
                label: "Downloading".to_string(),
                percent: Some(42.0)
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            UpdateEvent::Log {
                level: LogLevel::Warning,
                message: "slow mirror".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            UpdateEvent::Progress {
                label: "Converting".to_string(),
                percent: None
            }
        );
    }

    #[test]
    fn progress_is_clamped_to_percentage_range() {
        let (sink, mut rx) = EventSink::channel();

        sink.progress("over", 140.0);

        assert!(matches!(
            rx.try_recv().unwrap(),
            UpdateEvent::Progress { percent: Some(p), .. } if p == 100.0
        ));
    }

    #[test]
    fn sending_after_receiver_dropped_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);

        sink.info("nobody listening");
    }
}
