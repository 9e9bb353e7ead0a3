//! Engine directory: the wrapped tool and its ffmpeg companions
//!
//! - [`bootstrap`]: First-run installation of missing engine binaries
//! - [`progress`]: Parsing of the tool's status output

pub mod bootstrap;
pub mod progress;

pub use bootstrap::{EngineBootstrap, EngineReport};
pub use progress::{ToolOutputParser, ToolProgress, parse_tool_line};
