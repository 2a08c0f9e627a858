//! Remote collaborators
//!
//! The engine never talks to a network itself. Whatever sits behind these
//! traits (HTTP client, RPC stub, the in-memory implementation in [`memory`])
//! is the source of truth the cache converges to.

pub mod memory;

use crate::error::RemoteError;
use crate::schema::{Folder, FolderTree, Note};
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::InMemoryRemote;

/// Folder operations of the backend
#[async_trait]
pub trait RemoteFolderService: Send + Sync {
    async fn create_folder(&self, parent_id: Option<&str>, name: &str) -> Result<Folder, RemoteError>;

    async fn rename_folder(&self, id: &str, name: &str) -> Result<Folder, RemoteError>;

    async fn delete_folder(&self, id: &str) -> Result<(), RemoteError>;

    /// Root folders plus the ancestry of the current folder
    async fn list_folders(&self) -> Result<FolderTree, RemoteError>;

    async fn list_children(&self, parent_id: &str) -> Result<Vec<Folder>, RemoteError>;
}

/// Note operations of the backend
#[async_trait]
pub trait RemoteNoteService: Send + Sync {
    async fn create_note(&self, folder_id: &str, title: &str, content: &str) -> Result<Note, RemoteError>;

    async fn update_note(&self, id: &str, title: &str, content: &str) -> Result<(), RemoteError>;

    async fn delete_note(&self, id: &str) -> Result<(), RemoteError>;

    async fn list_notes(&self, folder_id: &str) -> Result<Vec<Note>, RemoteError>;

    async fn get_note(&self, id: &str) -> Result<Note, RemoteError>;
}

/// The pair of services a client works against
#[derive(Clone)]
pub struct RemoteServices {
    pub folders: Arc<dyn RemoteFolderService>,
    pub notes: Arc<dyn RemoteNoteService>,
}

impl RemoteServices {
    pub fn new(folders: Arc<dyn RemoteFolderService>, notes: Arc<dyn RemoteNoteService>) -> Self {
        Self { folders, notes }
    }

    /// Use one object for both services
    pub fn from_shared<T>(service: Arc<T>) -> Self
    where
        T: RemoteFolderService + RemoteNoteService + 'static,
    {
        Self {
            folders: service.clone(),
            notes: service,
        }
    }
}

impl std::fmt::Debug for RemoteServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServices").finish_non_exhaustive()
    }
}
