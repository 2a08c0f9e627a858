//! Per-invocation rollback snapshots

use crate::cache::{key::QueryKey, store::Transaction, types::CacheValue};
use crate::error::{EngineError, Result};
use crate::mutation::MutationKind;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Identity of one mutation invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pre-mutation values of the affected set, owned by a single invocation
#[derive(Debug)]
pub struct MutationSnapshot {
    pub mutation_id: MutationId,
    pub kind: MutationKind,
    pub taken_at: DateTime<Utc>,
    values: HashMap<QueryKey, Option<CacheValue>>,
}

impl MutationSnapshot {
    /// Record the current value (or absence) of every key
    pub fn capture(
        tx: &Transaction<'_>,
        mutation_id: MutationId,
        kind: MutationKind,
        keys: &[QueryKey],
    ) -> Self {
        let values = keys
            .iter()
            .map(|key| (key.clone(), tx.get(key).cloned()))
            .collect();

        Self {
            mutation_id,
            kind,
            taken_at: Utc::now(),
            values,
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<&Option<CacheValue>> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write the recorded values back over whatever is there now.
    ///
    /// Every key is checked first so a missing one aborts without a partial
    /// restore.
    pub fn restore(&self, tx: &mut Transaction<'_>, keys: &[QueryKey]) -> Result<()> {
        if let Some(missing) = keys.iter().find(|k| !self.values.contains_key(*k)) {
            return Err(EngineError::StaleSnapshot {
                key: missing.clone(),
            });
        }

        for key in keys {
            let recorded = self.values.get(key).cloned().flatten();
            if recorded.is_none() && tx.get(key).is_none() {
                continue;
            }
            tx.replace(key, recorded);
        }
        tx.record_rollback();
        Ok(())
    }
}
