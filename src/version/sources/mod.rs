//! Release source implementations

pub mod github;
pub mod manifest;

pub use github::GitHubReleaseSource;
pub use manifest::ManifestSource;
