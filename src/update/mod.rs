//! Update layer: downloading, staging and installing new binaries
//!
//! Two artifacts are kept up to date. The host application replaces itself
//! through a relaunch helper, and the wrapped tool is swapped in place.
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │    Worker    │────▶│ Orchestrator │────▶│  SelfUpdater │──▶ Relaunch
//! │ (one at once)│     │  (2 stages)  │     │  (host app)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐     ┌──────────────┐
//!                      │  Component   │────▶│   Download   │
//!                      │   Updater    │     │  (streamed)  │
//!                      └──────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`orchestrator`]: Stage ordering and the tool update decision table
//! - [`self_update`]: Download and staging of a new host-app build
//! - [`relaunch`]: Helper scripts and direct rename that finish the host-app swap
//! - [`component`]: In-place replacement of the wrapped tool binary
//! - [`download`]: Streaming downloads with progress and cancellation
//! - [`process`]: Termination of processes holding a locked file
//! - [`events`]: Progress and log events for the presentation layer
//! - [`worker`]: Single-flight background execution

pub mod component;
pub mod download;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod outcome;
pub mod process;
pub mod relaunch;
pub mod self_update;
pub mod worker;

pub use error::UpdateError;
pub use events::{EventSink, LogLevel, UpdateEvent};
pub use orchestrator::{ToolDecision, UpdateOrchestrator, VersionReport, decide_tool_update};
pub use outcome::UpdateOutcome;
pub use worker::UpdateWorker;
