//! Cache invalidation events
//!
//! Invalidation never drops a value: it marks the entry `stale` so it stays
//! displayable while the next read goes back to the remote.

use crate::cache::key::QueryKey;
use crate::mutation::MutationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// A mutation touching the key settled (success or failure)
    MutationSettled { mutation: MutationKind },

    /// Manual invalidation by key
    Manual,

    /// Invalidated by a partial key match
    PrefixMatch { filter: QueryKey },
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::MutationSettled { mutation } => {
                write!(f, "{} settled", mutation)
            }
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::PrefixMatch { filter } => write!(f, "prefix match: {}", filter),
        }
    }
}

/// Record of one invalidation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub reason: InvalidationReason,

    pub timestamp: DateTime<Utc>,

    /// Keys that were marked stale
    pub keys: Vec<QueryKey>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    pub fn new(reason: InvalidationReason, keys: Vec<QueryKey>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
