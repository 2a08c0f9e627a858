//! Debounced autosave for a single note
//!
//! Edits land in one pending slot. Each `notify` restarts the quiet timer;
//! when it runs out, one update-note mutation carries the latest draft. A
//! timer that fires while a previous save is still in flight waits for it.

use crate::client::QueryClient;
use crate::error::{EngineError, Result};
use crate::schema::{FolderId, NoteDraft, NoteId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Default)]
struct PendingSlot {
    draft: Option<NoteDraft>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    issued: u64,
    last_error: Option<EngineError>,
}

struct AutosaveState {
    client: QueryClient,
    note_id: NoteId,
    folder_id: FolderId,
    quiet_period: Duration,
    slot: Mutex<PendingSlot>,
    flight: AsyncMutex<()>,
}

impl AutosaveState {
    fn slot(&self) -> MutexGuard<'_, PendingSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fire(&self, generation: u64) {
        {
            let mut slot = self.slot();
            if slot.generation != generation {
                return;
            }
            // detach: a later notify must not abort this save
            slot.timer.take();
        }

        if let Err(e) = self.issue().await {
            warn!("Autosave of note {} failed: {}", self.note_id, e);
        }
    }

    /// Send whatever is pending; waits for an in-flight save first
    async fn issue(&self) -> Result<bool> {
        let _flight = self.flight.lock().await;

        let draft = self.slot().draft.take();
        let Some(draft) = draft else {
            return Ok(false);
        };

        debug!("Autosaving note {}", self.note_id);
        let result = self
            .client
            .update_note(&self.note_id, &self.folder_id, draft)
            .await;

        let mut slot = self.slot();
        slot.issued += 1;
        match result {
            Ok(()) => {
                slot.last_error = None;
                Ok(true)
            }
            Err(e) => {
                slot.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}

/// Coalesces rapid edits of one note into few update-note mutations
///
/// Dropping the coordinator abandons a draft whose timer has not fired;
/// call [`Self::flush`] first to keep it.
pub struct AutosaveCoordinator {
    state: Arc<AutosaveState>,
}

impl AutosaveCoordinator {
    pub fn new(
        client: QueryClient,
        note_id: impl Into<NoteId>,
        folder_id: impl Into<FolderId>,
        quiet_period: Duration,
    ) -> Self {
        Self {
            state: Arc::new(AutosaveState {
                client,
                note_id: note_id.into(),
                folder_id: folder_id.into(),
                quiet_period,
                slot: Mutex::new(PendingSlot::default()),
                flight: AsyncMutex::new(()),
            }),
        }
    }

    pub fn note_id(&self) -> &str {
        &self.state.note_id
    }

    /// Record the latest draft and restart the quiet timer
    pub fn notify(&self, draft: NoteDraft) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| EngineError::Config("autosave needs a tokio runtime".to_string()))?;

        let mut slot = self.state.slot();
        slot.draft = Some(draft);
        slot.generation += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }

        let generation = slot.generation;
        let state = Arc::clone(&self.state);
        slot.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(state.quiet_period).await;
            state.fire(generation).await;
        }));
        Ok(())
    }

    /// Cancel the timer and save now.
    ///
    /// Returns `Ok(false)` when nothing was pending.
    pub async fn flush(&self) -> Result<bool> {
        {
            let mut slot = self.state.slot();
            slot.generation += 1;
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
        }
        self.state.issue().await
    }

    /// A draft is waiting for its timer
    pub fn has_pending(&self) -> bool {
        self.state.slot().draft.is_some()
    }

    /// Error of the most recent save, cleared by the next successful one
    pub fn last_error(&self) -> Option<EngineError> {
        self.state.slot().last_error.clone()
    }

    /// Number of update-note mutations issued so far
    pub fn issued(&self) -> u64 {
        self.state.slot().issued
    }
}

impl Drop for AutosaveCoordinator {
    fn drop(&mut self) {
        if let Some(timer) = self.state.slot().timer.take() {
            timer.abort();
        }
    }
}
