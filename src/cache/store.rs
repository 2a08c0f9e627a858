//! Main cache store implementation with subscriber notification
//!
//! All operations are synchronous. Writes commit under the store lock and
//! subscribers are called after the lock is released, before the writing call
//! returns, so a listener may read the cache and always sees fully committed
//! state.

use crate::cache::{
    config::CacheConfig,
    entry::{CacheEntry, SubscriptionId},
    invalidation::{InvalidationEvent, InvalidationReason},
    key::{QueryKey, QueryKind},
    types::{CacheStats, CacheStatus, CacheValue},
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Callback invoked on every value or status change of a subscribed key
pub type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// What a subscriber sees after a change
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub status: CacheStatus,
    pub value: Option<CacheValue>,
    pub version: u64,
}

/// Proof that a fetch was started; completing with a cancelled ticket is a no-op
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub key: QueryKey,
    pub generation: u64,
}

/// Shared keyed store of query results
///
/// Pass it around as `Arc<QueryCache>`; there is no process-wide instance.
pub struct QueryCache {
    pub(crate) config: CacheConfig,

    store: RwLock<CacheStore>,

    next_subscription: AtomicU64,
}

/// Internal cache storage
struct CacheStore {
    entries: HashMap<QueryKey, CacheEntry>,

    listeners: HashMap<SubscriptionId, (QueryKey, Listener)>,

    stats: CacheStats,
}

impl CacheStore {
    fn entry_mut(&mut self, key: &QueryKey) -> &mut CacheEntry {
        self.entries.entry(key.clone()).or_insert_with(|| {
            debug!("Creating cache entry: {}", key);
            CacheEntry::new(key.clone())
        })
    }
}

/// A batch of cache changes committed as one step
///
/// Obtained through [`QueryCache::transact`]. Nothing written here is visible
/// to subscribers until the closure returns.
pub struct Transaction<'a> {
    store: &'a mut CacheStore,
    touched: BTreeSet<QueryKey>,
}

impl<'a> Transaction<'a> {
    /// Current value of `key`, if cached
    pub fn get(&self, key: &QueryKey) -> Option<&CacheValue> {
        self.store.entries.get(key).and_then(|e| e.value.as_ref())
    }

    pub fn entry(&self, key: &QueryKey) -> Option<&CacheEntry> {
        self.store.entries.get(key)
    }

    /// Keys changed so far in this transaction
    pub fn touched(&self) -> impl Iterator<Item = &QueryKey> + '_ {
        self.touched.iter()
    }

    /// Mutate the cached value in place; a no-op returning `false` when the
    /// key holds no value
    pub fn update<F>(&mut self, key: &QueryKey, f: F) -> bool
    where
        F: FnOnce(&mut CacheValue),
    {
        let Some(entry) = self.store.entries.get_mut(key) else {
            return false;
        };
        let Some(mut value) = entry.value.take() else {
            return false;
        };
        f(&mut value);
        entry.set_value(Some(value));
        self.store.stats.writes += 1;
        self.touched.insert(key.clone());
        true
    }

    /// Set the value outright, creating the entry if needed
    pub fn replace(&mut self, key: &QueryKey, value: Option<CacheValue>) {
        let entry = self.store.entry_mut(key);
        entry.set_value(value);
        self.store.stats.writes += 1;
        self.touched.insert(key.clone());
    }

    pub fn set_status(&mut self, key: &QueryKey, status: CacheStatus) {
        if self.store.entry_mut(key).transition(status) {
            self.touched.insert(key.clone());
        }
    }

    /// See [`QueryCache::cancel_in_flight`]
    pub fn cancel_in_flight(&mut self, key: &QueryKey) -> bool {
        let Some(entry) = self.store.entries.get_mut(key) else {
            return false;
        };
        if !entry.cancel_fetch() {
            return false;
        }
        debug!("Cancelled in-flight fetch: {}", key);
        self.store.stats.fetches_cancelled += 1;
        self.touched.insert(key.clone());
        true
    }

    /// Write a fetch result if its ticket is still current.
    ///
    /// Returns `false` when the fetch was cancelled or superseded.
    pub fn complete_fetch(
        &mut self,
        ticket: &FetchTicket,
        result: Result<CacheValue, String>,
    ) -> bool {
        let accepted = self
            .store
            .entries
            .get(&ticket.key)
            .map(|e| e.accepts_fetch(ticket.generation))
            .unwrap_or(false);

        if !accepted {
            debug!("Ignoring result of cancelled fetch: {}", ticket.key);
            self.store.stats.fetch_results_ignored += 1;
            return false;
        }

        let entry = self.store.entry_mut(&ticket.key);
        entry.metadata.status_before_fetch = None;
        match result {
            Ok(value) => {
                entry.set_value(Some(value));
                entry.metadata.last_error = None;
                entry.transition(CacheStatus::Fresh);
                self.store.stats.writes += 1;
            }
            Err(reason) => {
                entry.metadata.last_error = Some(reason);
                entry.transition(CacheStatus::Error);
            }
        }
        self.touched.insert(ticket.key.clone());
        true
    }

    /// Count a mutation as pending on `key` until [`Self::settle_pending`]
    pub fn mark_pending(&mut self, key: &QueryKey) {
        self.store.entry_mut(key).metadata.pending_mutations += 1;
    }

    pub fn settle_pending(&mut self, key: &QueryKey) {
        if let Some(entry) = self.store.entries.get_mut(key) {
            entry.metadata.pending_mutations = entry.metadata.pending_mutations.saturating_sub(1);
        }
    }

    /// Cached keys of one kind
    pub fn keys_of_kind(&self, kind: QueryKind) -> Vec<QueryKey> {
        self.store
            .entries
            .keys()
            .filter(|k| k.kind() == kind)
            .cloned()
            .collect()
    }

    /// Mark the existing entries among `keys` stale; see [`QueryCache::invalidate`]
    pub fn invalidate(&mut self, keys: &[QueryKey], reason: InvalidationReason) -> InvalidationEvent {
        let mut invalidated = Vec::new();

        for key in keys {
            let Some(entry) = self.store.entries.get_mut(key) else {
                continue;
            };
            let mut changed = entry.cancel_fetch();
            if changed {
                self.store.stats.fetches_cancelled += 1;
            }
            if entry.value.is_some() {
                changed |= entry.transition(CacheStatus::Stale);
            }
            if changed {
                self.touched.insert(key.clone());
            }
            self.store.stats.invalidations += 1;
            invalidated.push(key.clone());
        }

        debug!("Invalidated {} keys ({})", invalidated.len(), reason);
        InvalidationEvent::new(reason, invalidated)
    }

    pub(crate) fn record_rollback(&mut self) {
        self.store.stats.rollbacks += 1;
    }
}

impl QueryCache {
    /// Create a new cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing query cache with config: {:?}", config);

        let store = CacheStore {
            entries: HashMap::new(),
            listeners: HashMap::new(),
            stats: CacheStats::default(),
        };

        Self {
            config,
            store: RwLock::new(store),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, CacheStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_store(&self) -> RwLockReadGuard<'_, CacheStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` as one atomic step, then notify subscribers of every key whose
    /// value or status changed
    pub fn transact<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Transaction<'_>) -> R,
    {
        let (result, pending) = {
            let mut store = self.write_store();
            let mut tx = Transaction {
                store: &mut *store,
                touched: BTreeSet::new(),
            };
            let result = f(&mut tx);
            let touched = std::mem::take(&mut tx.touched);
            let pending = Self::collect_notifications(&mut store, touched);
            (result, pending)
        };

        for (listener, event) in pending {
            listener(&event);
        }

        result
    }

    fn collect_notifications(
        store: &mut CacheStore,
        touched: BTreeSet<QueryKey>,
    ) -> Vec<(Listener, CacheEvent)> {
        let mut pending = Vec::new();

        for key in touched {
            let Some(entry) = store.entries.get(&key) else {
                continue;
            };
            let event = CacheEvent {
                key: key.clone(),
                status: entry.status,
                value: entry.value.clone(),
                version: entry.metadata.version,
            };
            for id in &entry.subscribers {
                if let Some((_, listener)) = store.listeners.get(id) {
                    pending.push((Arc::clone(listener), event.clone()));
                }
            }
        }

        store.stats.entries = store.entries.len();
        store.stats.notifications += pending.len() as u64;
        pending
    }

    /// Current entry for `key`, creating an `empty` one if absent.
    ///
    /// Never starts a fetch.
    pub fn read(&self, key: &QueryKey) -> CacheEntry {
        let mut store = self.write_store();
        store.stats.reads += 1;
        store.entry_mut(key).clone()
    }

    /// Entry for `key` without creating it
    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.read_store().entries.get(key).cloned()
    }

    /// Cached value for `key`, if any
    pub fn value(&self, key: &QueryKey) -> Option<CacheValue> {
        self.read_store()
            .entries
            .get(key)
            .and_then(|e| e.value.clone())
    }

    pub fn status(&self, key: &QueryKey) -> CacheStatus {
        self.read_store()
            .entries
            .get(key)
            .map(|e| e.status)
            .unwrap_or(CacheStatus::Empty)
    }

    /// Apply `updater` to the value, leaving status unchanged
    pub fn write<F>(&self, key: &QueryKey, updater: F)
    where
        F: FnOnce(Option<&CacheValue>) -> Option<CacheValue>,
    {
        self.transact(|tx| {
            let next = updater(tx.get(key));
            tx.replace(key, next);
        })
    }

    pub fn set_status(&self, key: &QueryKey, status: CacheStatus) {
        self.transact(|tx| tx.set_status(key, status))
    }

    /// Abandon any pending fetch for `key`.
    ///
    /// Best-effort: the network call keeps running, only its effect on the
    /// cache is suppressed.
    pub fn cancel_in_flight(&self, key: &QueryKey) -> bool {
        self.transact(|tx| tx.cancel_in_flight(key))
    }

    /// Mark `key` as fetching and hand out the ticket its result must carry
    pub fn begin_fetch(&self, key: &QueryKey) -> FetchTicket {
        self.transact(|tx| {
            tx.store.stats.fetches_started += 1;
            let generation = tx.store.entry_mut(key).begin_fetch();
            tx.touched.insert(key.clone());
            FetchTicket {
                key: key.clone(),
                generation,
            }
        })
    }

    /// See [`Transaction::complete_fetch`]
    pub fn complete_fetch(&self, ticket: &FetchTicket, result: Result<CacheValue, String>) -> bool {
        self.transact(|tx| tx.complete_fetch(ticket, result))
    }

    /// Register `listener` for changes to `key`
    pub fn subscribe(&self, key: &QueryKey, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut store = self.write_store();
        store.entry_mut(key).add_subscriber(id);
        store.listeners.insert(id, (key.clone(), listener));
        debug!("Subscribed {} to {}", id, key);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut store = self.write_store();
        let Some((key, _)) = store.listeners.remove(&id) else {
            return false;
        };
        if let Some(entry) = store.entries.get_mut(&key) {
            entry.remove_subscriber(id);
        }
        debug!("Unsubscribed {} from {}", id, key);
        true
    }

    /// Mark existing entries among `keys` stale so their next read refreshes.
    ///
    /// Absent keys are skipped, entries without a value stay `empty`, and any
    /// in-flight fetch on them is cancelled. Repeating the call changes nothing
    /// further.
    pub fn invalidate(&self, keys: &[QueryKey], reason: InvalidationReason) -> InvalidationEvent {
        self.transact(|tx| tx.invalidate(keys, reason))
    }

    /// Invalidate every cached key partially matching `filter`
    pub fn invalidate_matching(&self, filter: &QueryKey) -> InvalidationEvent {
        let keys: Vec<QueryKey> = self
            .read_store()
            .entries
            .keys()
            .filter(|k| k.matches(filter))
            .cloned()
            .collect();

        self.invalidate(
            &keys,
            InvalidationReason::PrefixMatch {
                filter: filter.clone(),
            },
        )
    }

    /// Keys with subscribers whose status calls for a refresh
    pub fn keys_needing_refresh(&self) -> Vec<QueryKey> {
        self.read_store()
            .entries
            .values()
            .filter(|e| e.has_subscribers() && e.status.needs_refresh())
            .map(|e| e.key.clone())
            .collect()
    }

    /// Drop entries nobody has read for the grace period
    pub fn collect_garbage(&self) -> usize {
        let grace = self.config.gc_grace_period;
        let mut store = self.write_store();

        let before = store.entries.len();
        store.entries.retain(|_, entry| !entry.is_collectible(grace));
        let collected = before - store.entries.len();

        store.stats.collected += collected as u64;
        store.stats.entries = store.entries.len();

        if collected > 0 {
            debug!("Collected {} idle entries", collected);
        }
        collected
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let store = self.read_store();
        let mut stats = store.stats.clone();
        stats.entries = store.entries.len();
        stats
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.read_store().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_store().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_store().entries.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Background task for periodic garbage collection
pub async fn start_gc_task(cache: Arc<QueryCache>) {
    if !cache.config.enable_gc {
        warn!("Garbage collection disabled, gc task not started");
        return;
    }

    let interval = cache.config.gc_interval;
    info!("Starting cache gc task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;
        let collected = cache.collect_garbage();
        if collected > 0 {
            info!("Cache gc removed {} entries", collected);
        }
    }
}
