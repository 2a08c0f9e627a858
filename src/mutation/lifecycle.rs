//! The four-phase optimistic mutation protocol
//!
//! 1. cancel in-flight fetches of the affected keys
//! 2. snapshot and apply the speculative transform, in one atomic step
//! 3. call the remote; commit on success, restore the snapshot on failure
//! 4. reconcile: settle pending counts and mark everything touched stale
//!
//! An invocation dropped while its remote call is outstanding is settled on
//! drop: the snapshot is restored and every affected key left stale.
//!
//! Overlapping invocations are not ordered against each other unless
//! `serialize_overlapping_mutations` is set, in which case each invocation
//! holds per-key locks on its affected set from phase 1 to phase 4.

use crate::cache::{
    invalidation::{InvalidationEvent, InvalidationReason},
    key::QueryKey,
    store::QueryCache,
};
use crate::error::{EngineError, RemoteError, Result};
use crate::mutation::{Mutation, MutationId, MutationKind, MutationSnapshot};
use crate::remote::RemoteServices;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Hook fired once the speculative state is visible
pub type OnBegin = Box<dyn FnOnce() + Send>;

/// Runs mutation invocations against a shared cache
pub struct MutationController {
    cache: Arc<QueryCache>,
    remote: RemoteServices,
    serialize_overlapping: bool,
    key_locks: Mutex<HashMap<QueryKey, Arc<AsyncMutex<()>>>>,
}

impl MutationController {
    pub fn new(cache: Arc<QueryCache>, remote: RemoteServices, serialize_overlapping: bool) -> Self {
        Self {
            cache,
            remote,
            serialize_overlapping,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Run `mutation` through all phases
    pub async fn run<M: Mutation>(&self, mutation: &M) -> Result<M::Output> {
        self.run_with(mutation, None).await
    }

    /// Like [`Self::run`], calling `on_begin` right after the speculative apply
    pub async fn run_with<M: Mutation>(&self, mutation: &M, on_begin: Option<OnBegin>) -> Result<M::Output> {
        self.validate(mutation)?;

        let affected = dedup(mutation.affected_keys());
        let _queue = self.acquire_queue(&affected).await;

        let id = MutationId::new();
        debug!("Mutation {} ({}) started on {} keys", id, mutation.kind(), affected.len());

        self.cancel(&affected);
        let snapshot = self.snapshot_and_apply(id, mutation, &affected);
        let mut in_flight = InFlight {
            controller: self,
            kind: mutation.kind(),
            snapshot,
            affected: &affected,
            armed: true,
        };
        if let Some(on_begin) = on_begin {
            on_begin();
        }

        let outcome = self.execute(mutation).await;
        in_flight.armed = false;

        let result = match outcome {
            Ok(response) => Ok(self.commit(mutation, &affected, response)),
            Err(remote_error) => Err(self.rollback(mutation.kind(), &in_flight.snapshot, &affected, remote_error)),
        };

        self.reconcile(mutation.kind(), &affected);
        result
    }

    /// Phase 0: reject bad arguments before the cache is touched
    pub fn validate<M: Mutation>(&self, mutation: &M) -> Result<()> {
        mutation.validate().map_err(|e| {
            debug!("Mutation {} rejected: {}", mutation.kind(), e);
            e
        })
    }

    /// Phase 1: abandon in-flight fetches so they cannot overwrite the
    /// speculative values
    pub fn cancel(&self, affected: &[QueryKey]) {
        self.cache.transact(|tx| {
            for key in affected {
                tx.cancel_in_flight(key);
            }
        });
    }

    /// Phase 2: capture the snapshot and apply the transform in one step
    pub fn snapshot_and_apply<M: Mutation>(
        &self,
        id: MutationId,
        mutation: &M,
        affected: &[QueryKey],
    ) -> MutationSnapshot {
        self.cache.transact(|tx| {
            let snapshot = MutationSnapshot::capture(tx, id, mutation.kind(), affected);
            mutation.apply(tx);
            debug_assert!(
                tx.touched().all(|key| affected.contains(key)),
                "{} wrote outside its affected keys",
                mutation.kind()
            );
            for key in affected {
                tx.mark_pending(key);
            }
            snapshot
        })
    }

    /// Phase 3: the remote call
    pub async fn execute<M: Mutation>(&self, mutation: &M) -> std::result::Result<M::Response, RemoteError> {
        mutation.execute(&self.remote).await
    }

    /// Phase 3, success branch
    pub fn commit<M: Mutation>(&self, mutation: &M, affected: &[QueryKey], response: M::Response) -> M::Output {
        self.cache.transact(|tx| {
            let output = mutation.commit(tx, response);
            tx.invalidate(
                affected,
                InvalidationReason::MutationSettled {
                    mutation: mutation.kind(),
                },
            );
            output
        })
    }

    /// Phase 3, failure branch: put back exactly what this invocation saw
    pub fn rollback(
        &self,
        kind: MutationKind,
        snapshot: &MutationSnapshot,
        affected: &[QueryKey],
        remote_error: RemoteError,
    ) -> EngineError {
        warn!("Mutation {} ({}) failed, rolling back: {}", snapshot.mutation_id, kind, remote_error);

        let restored = self.cache.transact(|tx| {
            let restored = snapshot.restore(tx, affected);
            if restored.is_ok() {
                tx.invalidate(affected, InvalidationReason::MutationSettled { mutation: kind });
            }
            restored
        });

        match restored {
            Ok(()) => EngineError::RemoteRejected {
                mutation: kind,
                reason: remote_error.reason(),
            },
            Err(stale) => {
                error!("Rollback of {} ({}) aborted: {}", snapshot.mutation_id, kind, stale);
                stale
            }
        }
    }

    /// Settle an invocation dropped before the remote answered. The outcome
    /// is unknown, so the snapshot goes back and everything is left stale.
    pub fn abandon(&self, kind: MutationKind, snapshot: &MutationSnapshot, affected: &[QueryKey]) {
        warn!("Mutation {} ({}) dropped before the remote answered, rolling back", snapshot.mutation_id, kind);

        if let Err(stale) = self.cache.transact(|tx| snapshot.restore(tx, affected)) {
            error!("Rollback of {} ({}) aborted: {}", snapshot.mutation_id, kind, stale);
        }
        self.reconcile(kind, affected);
    }

    /// Phase 4: runs on every path; repeating it changes nothing further
    pub fn reconcile(&self, kind: MutationKind, affected: &[QueryKey]) -> InvalidationEvent {
        let mut keys: BTreeSet<QueryKey> = affected.iter().cloned().collect();
        keys.extend(affected.iter().flat_map(QueryKey::ancestors));
        let keys: Vec<QueryKey> = keys.into_iter().collect();

        let event = self.cache.transact(|tx| {
            for key in affected {
                tx.settle_pending(key);
            }
            tx.invalidate(&keys, InvalidationReason::MutationSettled { mutation: kind })
        });

        info!("Mutation {} settled, {} keys marked stale", kind, event.keys.len());
        event
    }

    async fn acquire_queue(&self, affected: &[QueryKey]) -> Vec<OwnedMutexGuard<()>> {
        if !self.serialize_overlapping {
            return Vec::new();
        }

        // `affected` is sorted, so every invocation locks in the same order
        let locks: Vec<Arc<AsyncMutex<()>>> = {
            let mut table = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            affected
                .iter()
                .map(|key| Arc::clone(table.entry(key.clone()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}

/// Armed from the speculative apply until the remote outcome is known
struct InFlight<'a> {
    controller: &'a MutationController,
    kind: MutationKind,
    snapshot: MutationSnapshot,
    affected: &'a [QueryKey],
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon(self.kind, &self.snapshot, self.affected);
        }
    }
}

fn dedup(keys: Vec<QueryKey>) -> Vec<QueryKey> {
    keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}
