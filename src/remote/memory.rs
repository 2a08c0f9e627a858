//! In-memory backend with latency and failure injection

use crate::error::RemoteError;
use crate::remote::{RemoteFolderService, RemoteNoteService};
use crate::schema::{Folder, FolderId, FolderTree, Note};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

struct RemoteState {
    folders: Vec<Folder>,
    notes: Vec<Note>,
    current_folder: Option<FolderId>,
    next_id: u64,
    latency: Duration,
    failure_rate: f64,
    forced_failures: usize,
    calls: HashMap<&'static str, usize>,
}

impl RemoteState {
    fn has_children(&self, id: &str) -> bool {
        self.folders.iter().any(|f| f.parent_id.as_deref() == Some(id))
    }

    fn with_flag(&self, folder: &Folder) -> Folder {
        folder.clone().with_children(self.has_children(&folder.id))
    }

    fn folder_exists(&self, id: &str) -> bool {
        self.folders.iter().any(|f| f.id == id)
    }

    fn ancestry(&self) -> Vec<FolderId> {
        let mut path = Vec::new();
        let mut cursor = self.current_folder.clone();
        while let Some(id) = cursor {
            cursor = self
                .folders
                .iter()
                .find(|f| f.id == id)
                .and_then(|f| f.parent_id.clone());
            path.push(id);
        }
        path.reverse();
        path
    }

    fn descendants(&self, id: &str) -> Vec<FolderId> {
        let mut found = vec![id.to_string()];
        let mut i = 0;
        while i < found.len() {
            let parent = found[i].clone();
            found.extend(
                self.folders
                    .iter()
                    .filter(|f| f.parent_id.as_deref() == Some(parent.as_str()))
                    .map(|f| f.id.clone()),
            );
            i += 1;
        }
        found
    }

    fn allocate(&mut self, prefix: &str) -> String {
        let id = format!("{}{}", prefix, self.next_id);
        self.next_id += 1;
        id
    }
}

/// A folder/note backend living in process memory
///
/// Server ids are `f<n>` for folders and `n<n>` for notes, drawn from one
/// counter.
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                folders: Vec::new(),
                notes: Vec::new(),
                current_folder: None,
                next_id: 1,
                latency: Duration::ZERO,
                failure_rate: 0.0,
                forced_failures: 0,
                calls: HashMap::new(),
            }),
        }
    }

    /// Builder-style latency and random failure rate (clamped to 0..=1)
    pub fn with_faults(self, latency: Duration, failure_rate: f64) -> Self {
        self.set_latency(latency);
        self.set_failure_rate(failure_rate);
        self
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay applied to calls started from now on
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn set_failure_rate(&self, rate: f64) {
        self.state().failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Reject the next `count` write calls
    pub fn fail_next(&self, count: usize) {
        self.state().forced_failures = count;
    }

    pub fn set_next_id(&self, next: u64) {
        self.state().next_id = next;
    }

    pub fn set_current_folder(&self, id: Option<FolderId>) {
        self.state().current_folder = id;
    }

    pub fn seed_folder(&self, folder: Folder) {
        self.state().folders.push(folder);
    }

    pub fn seed_note(&self, note: Note) {
        self.state().notes.push(note);
    }

    /// How many times `operation` was called
    pub fn calls(&self, operation: &str) -> usize {
        self.state().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn note(&self, id: &str) -> Option<Note> {
        self.state().notes.iter().find(|n| n.id == id).cloned()
    }

    pub fn folder(&self, id: &str) -> Option<Folder> {
        let state = self.state();
        state.folders.iter().find(|f| f.id == id).map(|f| state.with_flag(f))
    }

    /// Count the call, decide whether it fails, then wait out the latency
    async fn enter(&self, operation: &'static str, write: bool) -> Result<(), RemoteError> {
        let (latency, fail) = {
            let mut state = self.state();
            *state.calls.entry(operation).or_default() += 1;

            let forced = write && state.forced_failures > 0;
            if forced {
                state.forced_failures -= 1;
            }
            let random = state.failure_rate > 0.0 && rand::thread_rng().gen_bool(state.failure_rate);
            (state.latency, forced || random)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if fail {
            debug!("Injected failure for {}", operation);
            return Err(RemoteError::Rejected {
                status: 500,
                reason: Some(format!("injected failure in {}", operation)),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFolderService for InMemoryRemote {
    async fn create_folder(&self, parent_id: Option<&str>, name: &str) -> Result<Folder, RemoteError> {
        self.enter("create_folder", true).await?;
        let mut state = self.state();
        if let Some(parent) = parent_id {
            if !state.folder_exists(parent) {
                return Err(RemoteError::NotFound(format!("folder {}", parent)));
            }
        }
        let id = state.allocate("f");
        let folder = Folder::new(id, name, parent_id.map(str::to_string));
        state.folders.push(folder.clone());
        Ok(folder)
    }

    async fn rename_folder(&self, id: &str, name: &str) -> Result<Folder, RemoteError> {
        self.enter("rename_folder", true).await?;
        let mut state = self.state();
        let folder = state
            .folders
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("folder {}", id)))?;
        folder.name = name.to_string();
        let renamed = folder.clone();
        Ok(state.with_flag(&renamed))
    }

    async fn delete_folder(&self, id: &str) -> Result<(), RemoteError> {
        self.enter("delete_folder", true).await?;
        let mut state = self.state();
        if !state.folder_exists(id) {
            return Err(RemoteError::NotFound(format!("folder {}", id)));
        }
        let doomed = state.descendants(id);
        state.folders.retain(|f| !doomed.contains(&f.id));
        state.notes.retain(|n| !doomed.contains(&n.folder_id));
        if state
            .current_folder
            .as_ref()
            .map(|c| doomed.contains(c))
            .unwrap_or(false)
        {
            state.current_folder = None;
        }
        Ok(())
    }

    async fn list_folders(&self) -> Result<FolderTree, RemoteError> {
        self.enter("list_folders", false).await?;
        let state = self.state();
        let folders = state
            .folders
            .iter()
            .filter(|f| f.is_root())
            .map(|f| state.with_flag(f))
            .collect();
        Ok(FolderTree {
            folders,
            current_folder_ancestry: state.ancestry(),
        })
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<Folder>, RemoteError> {
        self.enter("list_children", false).await?;
        let state = self.state();
        Ok(state
            .folders
            .iter()
            .filter(|f| f.parent_id.as_deref() == Some(parent_id))
            .map(|f| state.with_flag(f))
            .collect())
    }
}

#[async_trait]
impl RemoteNoteService for InMemoryRemote {
    async fn create_note(&self, folder_id: &str, title: &str, content: &str) -> Result<Note, RemoteError> {
        self.enter("create_note", true).await?;
        let mut state = self.state();
        if !state.folder_exists(folder_id) {
            return Err(RemoteError::NotFound(format!("folder {}", folder_id)));
        }
        let id = state.allocate("n");
        let note = Note::new(id, folder_id, title, content);
        state.notes.insert(0, note.clone());
        Ok(note)
    }

    async fn update_note(&self, id: &str, title: &str, content: &str) -> Result<(), RemoteError> {
        self.enter("update_note", true).await?;
        let mut state = self.state();
        let note = state
            .notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("note {}", id)))?;
        note.title = title.to_string();
        note.content = content.to_string();
        note.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_note(&self, id: &str) -> Result<(), RemoteError> {
        self.enter("delete_note", true).await?;
        let mut state = self.state();
        let before = state.notes.len();
        state.notes.retain(|n| n.id != id);
        if state.notes.len() == before {
            return Err(RemoteError::NotFound(format!("note {}", id)));
        }
        Ok(())
    }

    async fn list_notes(&self, folder_id: &str) -> Result<Vec<Note>, RemoteError> {
        self.enter("list_notes", false).await?;
        Ok(self
            .state()
            .notes
            .iter()
            .filter(|n| n.folder_id == folder_id)
            .cloned()
            .collect())
    }

    async fn get_note(&self, id: &str) -> Result<Note, RemoteError> {
        self.enter("get_note", false).await?;
        self.note(id)
            .ok_or_else(|| RemoteError::NotFound(format!("note {}", id)))
    }
}
