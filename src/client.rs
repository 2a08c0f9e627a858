//! Query client: the entry point for views and editors
//!
//! Owns the shared cache, the remote services and the mutation controller.
//! Reads never fetch on their own; `fetch`, `ensure_fresh` and
//! `refresh_stale` are the only paths that hit the remote for data.

use crate::cache::{
    entry::{CacheEntry, SubscriptionId},
    key::{QueryKey, QueryKind, PARAM_FOLDER_ID, PARAM_ID},
    store::{start_gc_task, Listener, QueryCache},
    types::{CacheStatus, CacheValue},
};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::mutation::{
    lifecycle::OnBegin,
    rules::{self, CreateFolder, CreateNote, DeleteFolder, DeleteNote, RenameFolder, UpdateNote},
    AutosaveCoordinator, Mutation, MutationController,
};
use crate::remote::RemoteServices;
use crate::schema::{Folder, Note, NoteDraft, NoteId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ClientInner {
    cache: Arc<QueryCache>,
    remote: RemoteServices,
    controller: MutationController,
    config: EngineConfig,
}

/// Cheap to clone; clones share one cache
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

impl QueryClient {
    /// Create a client with its own cache
    pub fn new(config: EngineConfig, remote: RemoteServices) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(QueryCache::new(config.cache.clone()));
        Ok(Self::with_cache(cache, remote, config))
    }

    /// Create a client over an existing cache
    pub fn with_cache(cache: Arc<QueryCache>, remote: RemoteServices, config: EngineConfig) -> Self {
        let controller = MutationController::new(
            Arc::clone(&cache),
            remote.clone(),
            config.serialize_overlapping_mutations,
        );
        info!(
            "Query client ready (serialize_overlapping_mutations: {}, refetch_on_settle: {})",
            config.serialize_overlapping_mutations, config.refetch_on_settle
        );

        Self {
            inner: Arc::new(ClientInner {
                cache,
                remote,
                controller,
                config,
            }),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn controller(&self) -> &MutationController {
        &self.inner.controller
    }

    pub fn read(&self, key: &QueryKey) -> CacheEntry {
        self.inner.cache.read(key)
    }

    pub fn subscribe(&self, key: &QueryKey, listener: Listener) -> SubscriptionId {
        self.inner.cache.subscribe(key, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.cache.unsubscribe(id)
    }

    /// Load `key` from the remote and store it.
    ///
    /// If a mutation cancelled this fetch meanwhile, the result is dropped and
    /// the cached (speculative) value is returned instead.
    pub async fn fetch(&self, key: &QueryKey) -> Result<CacheValue> {
        let cache = &self.inner.cache;
        let ticket = cache.begin_fetch(key);

        let value = match self.load(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Fetch of {} failed: {}", key, e);
                cache.complete_fetch(&ticket, Err(e.to_string()));
                return Err(e);
            }
        };

        let accepted = cache.transact(|tx| {
            let accepted = tx.complete_fetch(&ticket, Ok(value.clone()));
            if accepted && key.kind() == QueryKind::ChildrenFolders {
                if let Some(parent) = key.param(PARAM_ID) {
                    let non_empty = value.as_folder_list().map(|l| !l.is_empty()).unwrap_or(false);
                    rules::rederive_has_children(tx, parent, non_empty);
                }
            }
            accepted
        });

        if accepted {
            Ok(value)
        } else {
            Ok(cache.value(key).unwrap_or(value))
        }
    }

    /// Cached value if fresh, otherwise fetch
    pub async fn ensure_fresh(&self, key: &QueryKey) -> Result<CacheValue> {
        let entry = self.inner.cache.read(key);
        match (entry.status, entry.value) {
            (CacheStatus::Fresh, Some(value)) => Ok(value),
            _ => self.fetch(key).await,
        }
    }

    /// Refetch every subscribed key that needs it, skipping keys a mutation is
    /// still pending on. Returns how many were refreshed.
    pub async fn refresh_stale(&self) -> usize {
        let cache = &self.inner.cache;
        let keys: Vec<QueryKey> = cache
            .keys_needing_refresh()
            .into_iter()
            .filter(|key| {
                !cache
                    .peek(key)
                    .map(|e| e.has_pending_mutations())
                    .unwrap_or(false)
            })
            .collect();

        let mut refreshed = 0;
        for key in &keys {
            match self.fetch(key).await {
                Ok(_) => refreshed += 1,
                Err(e) => debug!("Background refresh of {} failed: {}", key, e),
            }
        }
        refreshed
    }

    async fn load(&self, key: &QueryKey) -> Result<CacheValue> {
        let remote = &self.inner.remote;
        let param = |name: &str| {
            key.param(name)
                .map(str::to_string)
                .ok_or_else(|| EngineError::PreconditionFailed(format!("{} is missing {}", key, name)))
        };
        let failed = |e: crate::error::RemoteError| EngineError::FetchFailed {
            key: key.clone(),
            reason: e.to_string(),
        };

        match key.kind() {
            QueryKind::Folders => remote
                .folders
                .list_folders()
                .await
                .map(CacheValue::FolderTree)
                .map_err(failed),
            QueryKind::ChildrenFolders => remote
                .folders
                .list_children(&param(PARAM_ID)?)
                .await
                .map(CacheValue::FolderList)
                .map_err(failed),
            QueryKind::Notes => remote
                .notes
                .list_notes(&param(PARAM_FOLDER_ID)?)
                .await
                .map(CacheValue::NoteList)
                .map_err(failed),
            QueryKind::Note => remote
                .notes
                .get_note(&param(PARAM_ID)?)
                .await
                .map(CacheValue::Note)
                .map_err(failed),
        }
    }

    /// Placeholder id with the configured prefix
    pub fn temp_id(&self) -> String {
        rules::temp_id(&self.inner.config.temp_id_prefix)
    }

    /// Run any mutation through the lifecycle
    pub async fn mutate<M: Mutation>(&self, mutation: &M) -> Result<M::Output> {
        let result = self.inner.controller.run(mutation).await;
        self.after_settle();
        result
    }

    /// Like [`Self::mutate`], calling `on_begin` once the optimistic state is visible
    pub async fn mutate_with<M: Mutation>(&self, mutation: &M, on_begin: OnBegin) -> Result<M::Output> {
        let result = self.inner.controller.run_with(mutation, Some(on_begin)).await;
        self.after_settle();
        result
    }

    pub async fn create_folder(&self, parent_id: Option<&str>, name: &str) -> Result<Folder> {
        let mutation = CreateFolder::new(parent_id.map(str::to_string), name, self.temp_id());
        self.mutate(&mutation).await
    }

    pub async fn rename_folder(&self, id: Option<&str>, parent_id: Option<&str>, name: &str) -> Result<Folder> {
        let mutation = RenameFolder::new(id.map(str::to_string), parent_id.map(str::to_string), name);
        self.mutate(&mutation).await
    }

    pub async fn delete_folder(&self, id: &str, parent_id: Option<&str>) -> Result<()> {
        self.mutate(&DeleteFolder::new(id, parent_id.map(str::to_string))).await
    }

    pub async fn create_note(&self, folder_id: &str, title: &str, content: &str) -> Result<Note> {
        let mutation = CreateNote::new(folder_id, title, content, self.temp_id());
        self.mutate(&mutation).await
    }

    pub async fn update_note(&self, id: &str, folder_id: &str, draft: NoteDraft) -> Result<()> {
        self.mutate(&UpdateNote::new(id, folder_id, draft)).await
    }

    /// Delete a note; resolves to the note that should become current
    pub async fn delete_note(&self, id: &str, folder_id: &str) -> Result<Option<NoteId>> {
        self.mutate(&DeleteNote::new(id, folder_id)).await
    }

    /// Debounced saver for one note, using the configured quiet period
    pub fn autosave(&self, note_id: &str, folder_id: &str) -> AutosaveCoordinator {
        AutosaveCoordinator::new(
            self.clone(),
            note_id,
            folder_id,
            self.inner.config.autosave_quiet_period,
        )
    }

    /// Start the background gc loop if gc is enabled
    pub fn spawn_gc(&self) -> Option<JoinHandle<()>> {
        if !self.inner.config.cache.enable_gc {
            return None;
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        Some(handle.spawn(start_gc_task(Arc::clone(&self.inner.cache))))
    }

    fn after_settle(&self) {
        if !self.inner.config.refetch_on_settle {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.clone();
        handle.spawn(async move {
            let refreshed = client.refresh_stale().await;
            if refreshed > 0 {
                debug!("Refreshed {} keys after mutation settled", refreshed);
            }
        });
    }
}
