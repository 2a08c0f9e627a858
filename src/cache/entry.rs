//! Cache entry management with fetch generations and subscriber tracking

use crate::cache::key::QueryKey;
use crate::cache::types::{CacheStatus, CacheValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A cache slot: value, status and the consumers reading it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: QueryKey,

    /// The cached value, `None` until first written
    pub value: Option<CacheValue>,

    /// Current lifecycle status
    pub status: CacheStatus,

    /// Active subscribers of this key
    pub subscribers: BTreeSet<SubscriptionId>,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create an `empty` entry
    pub fn new(key: QueryKey) -> Self {
        let now = Utc::now();

        Self {
            key,
            value: None,
            status: CacheStatus::Empty,
            subscribers: BTreeSet::new(),
            metadata: CacheMetadata {
                created_at: now,
                updated_at: now,
                version: 0,
                fetch_generation: 0,
                status_before_fetch: None,
                pending_mutations: 0,
                last_error: None,
                idle_since: Some(now),
            },
        }
    }

    /// Replace the value, bumping the version
    pub fn set_value(&mut self, value: Option<CacheValue>) {
        self.value = value;
        self.metadata.updated_at = Utc::now();
        self.metadata.version += 1;
    }

    /// Move to `status`; returns whether anything changed
    pub fn transition(&mut self, status: CacheStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.metadata.updated_at = Utc::now();
        true
    }

    /// Start a fetch, returning its generation
    pub fn begin_fetch(&mut self) -> u64 {
        self.metadata.fetch_generation += 1;
        if self.status != CacheStatus::Fetching {
            self.metadata.status_before_fetch = Some(self.status);
        }
        self.transition(CacheStatus::Fetching);
        self.metadata.fetch_generation
    }

    /// Abandon the in-flight fetch, if any.
    ///
    /// The generation moves on so the pending result no longer matches, and
    /// status falls back to what it was before the fetch began.
    pub fn cancel_fetch(&mut self) -> bool {
        if self.status != CacheStatus::Fetching {
            return false;
        }
        self.metadata.fetch_generation += 1;
        let previous = self
            .metadata
            .status_before_fetch
            .take()
            .unwrap_or(CacheStatus::Empty);
        self.transition(previous);
        true
    }

    /// Whether a fetch with `generation` may still write its result
    pub fn accepts_fetch(&self, generation: u64) -> bool {
        self.status == CacheStatus::Fetching && self.metadata.fetch_generation == generation
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    pub fn has_pending_mutations(&self) -> bool {
        self.metadata.pending_mutations > 0
    }

    pub fn add_subscriber(&mut self, id: SubscriptionId) {
        self.subscribers.insert(id);
        self.metadata.idle_since = None;
    }

    pub fn remove_subscriber(&mut self, id: SubscriptionId) {
        self.subscribers.remove(&id);
        if self.subscribers.is_empty() && self.metadata.idle_since.is_none() {
            self.metadata.idle_since = Some(Utc::now());
        }
    }

    /// Whether garbage collection may drop this entry
    pub fn is_collectible(&self, grace: Duration) -> bool {
        if self.has_subscribers() || self.has_pending_mutations() {
            return false;
        }
        if self.status == CacheStatus::Fetching {
            return false;
        }
        match self.metadata.idle_since {
            Some(since) => (Utc::now() - since)
                .to_std()
                .map(|idle| idle >= grace)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub created_at: DateTime<Utc>,

    /// Last value or status change
    pub updated_at: DateTime<Utc>,

    /// Incremented on every value write
    pub version: u64,

    /// Bumped by every fetch start and cancellation
    pub fetch_generation: u64,

    /// Status to restore if the in-flight fetch is cancelled
    pub status_before_fetch: Option<CacheStatus>,

    /// Mutations between apply and settle on this key
    pub pending_mutations: u32,

    /// Message of the last failed fetch
    pub last_error: Option<String>,

    /// When the last subscriber left; `None` while subscribed
    pub idle_since: Option<DateTime<Utc>>,
}
