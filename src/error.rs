//! Error types for the mutation engine
//!
//! Remote collaborators report [`RemoteError`]; everything the engine surfaces
//! to its callers is an [`EngineError`].

use crate::cache::key::QueryKey;
use crate::mutation::MutationKind;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The remote call backing a mutation failed; the cache has been rolled back
    #[error("{mutation} rejected by remote: {}", reason.as_deref().unwrap_or("no reason given"))]
    RemoteRejected {
        mutation: MutationKind,
        reason: Option<String>,
    },

    /// Invalid or missing mutation arguments, detected before touching the cache
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// A key in the affected set had no snapshot at rollback time
    #[error("Snapshot missing for {key}")]
    StaleSnapshot { key: QueryKey },

    /// A read against the remote failed
    #[error("Fetch of {key} failed: {reason}")]
    FetchFailed { key: QueryKey, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Reason reported by the remote, if this is a rejected mutation
    pub fn remote_reason(&self) -> Option<&str> {
        match self {
            EngineError::RemoteRejected { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    /// True when the cache was left untouched by the failing call
    pub fn is_precondition(&self) -> bool {
        matches!(self, EngineError::PreconditionFailed(_))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure signal from a remote folder or note service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The service answered with an error status
    #[error("remote returned status {status}{}", reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Rejected { status: u16, reason: Option<String> },

    /// The service could not be reached
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The addressed entity does not exist remotely
    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Cause to attach to [`EngineError::RemoteRejected`]
    pub fn reason(&self) -> Option<String> {
        match self {
            RemoteError::Rejected { reason, .. } => reason.clone(),
            RemoteError::Unavailable(msg) | RemoteError::NotFound(msg) => Some(msg.clone()),
        }
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::PreconditionFailed(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::PreconditionFailed(s.to_string())
    }
}
