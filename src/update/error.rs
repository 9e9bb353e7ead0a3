use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Download failed with status {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Downloaded file is corrupt: {size} bytes (expected at least {min_size})")]
    CorruptArtifact { size: u64, min_size: u64 },

    #[error("{path:?} is locked by a running process")]
    LockedFile { path: PathBuf },

    #[error("No executable found in the downloaded archive")]
    ExecutableNotFound,

    #[error("{0} is not installed")]
    MissingComponent(String),

    #[error("Invalid path: {0:?}")]
    InvalidPath(PathBuf),

    #[error("Failed to start relaunch helper: {0}")]
    Relaunch(String),

    #[error("Update cancelled")]
    Cancelled,
}
