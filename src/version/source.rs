//! Release source trait for resolving the latest available version

#[cfg(test)]
use mockall::automock;

use tracing::{info, warn};

use crate::version::error::RegistryError;
use crate::version::types::VersionDescriptor;

/// Which artifact a source describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// The wrapped media-extraction tool
    Tool,
    /// This application's own executable
    HostApp,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Tool => "tool",
            SourceKind::HostApp => "host_app",
        }
    }
}

/// Trait for fetching the latest release from a remote endpoint
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Returns the kind of artifact this source describes
    fn kind(&self) -> SourceKind;

    /// Fetches the latest published release
    ///
    /// # Returns
    /// * `Ok(VersionDescriptor)` - The latest release
    /// * `Err(RegistryError)` - If the endpoint could not be queried or its payload was unusable
    async fn fetch_latest(&self) -> Result<VersionDescriptor, RegistryError>;
}

/// Resolve the latest release, mapping every failure to "unavailable".
///
/// Callers treat `None` as "cannot determine" and keep whatever is installed.
pub async fn resolve_latest(source: &dyn ReleaseSource) -> Option<VersionDescriptor> {
    let kind = source.kind().as_str();

    match source.fetch_latest().await {
        Ok(descriptor) if descriptor.is_usable() => {
            info!("Latest {} release: {}", kind, descriptor.identifier);
            Some(descriptor)
        }
        Ok(descriptor) => {
            warn!(
                "Ignoring incomplete {} release descriptor: {:?}",
                kind, descriptor
            );
            None
        }
        Err(RegistryError::RateLimited { retry_after_secs }) => {
            warn!(
                "Release check for {} is rate limited (retry after {:?}s); treating as unavailable",
                kind, retry_after_secs
            );
            None
        }
        Err(e) => {
            warn!("Release check for {} unavailable: {}", kind, e);
            None
        }
    }
}
