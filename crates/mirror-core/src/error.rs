//! Error taxonomy shared by every component that talks to the remote store.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The store is not configured or has no valid session. Never retried.
    #[error("Remote store unavailable")]
    Unavailable,

    #[error("Remote error: {0}")]
    Remote(String),

    /// Prefix resolution found no candidate and creating one failed too.
    #[error("No usable folder for {name}")]
    AmbiguousMatch { name: String },

    #[error("Node not found: {0}")]
    NotFound(String),

    /// A path segment could not be materialized.
    #[error("Could not resolve {path}: {source}")]
    Unresolved {
        path: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SyncError::Unavailable)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
