//! Version layer: resolving, probing and comparing versions
//!
//! This module answers two questions for the update routine: which release
//! is published remotely, and which version is installed locally.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Source    │────▶│ Descriptor  │────▶│   Compare   │
//! │  (remote)   │     │  (types)    │     │ (segments)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       ▲
//!        ▼                                       │
//! ┌─────────────┐                         ┌─────────────┐
//! │   Sources   │                         │    Probe    │
//! │(GitHub,JSON)│                         │ (--version) │
//! └─────────────┘                         └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`source`]: Release source trait and the "unavailable" resolution policy
//! - [`sources`]: GitHub releases and JSON manifest implementations
//! - [`probe`]: Local binary version probe
//! - [`compare`]: Segment-wise numeric version comparison
//! - [`error`]: Error types for release sources
//! - [`types`]: `VersionDescriptor`

pub mod compare;
pub mod error;
pub mod probe;
pub mod source;
pub mod sources;
pub mod types;
