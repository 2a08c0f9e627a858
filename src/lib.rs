//! # DelNotes Engine (delnotes-engine)
//!
//! Optimistic mutation and cache-consistency engine for a folder/note client.
//!
//! ## Features
//!
//! - Shared query cache with subscriber notification and atomic transactions
//! - Four-phase mutation lifecycle: cancel, snapshot and apply, remote call, reconcile
//! - Exact per-invocation rollback when the remote rejects a mutation
//! - Aggregate consistency rules keeping `hasChildren` in line with children lists
//! - Debounced autosave coalescing rapid edits into one update
//! - Optional per-key queuing of overlapping mutations
//!
//! ## Mutations
//!
//! Each mutation changes the cache before the remote answers, and is undone
//! exactly if the remote rejects it.
//!
//! ```no_run
//! use delnotes_engine::{EngineConfig, InMemoryRemote, QueryClient, QueryKey, RemoteServices};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let remote = Arc::new(InMemoryRemote::new());
//!     let client = QueryClient::new(EngineConfig::default(), RemoteServices::from_shared(remote))?;
//!
//!     client.fetch(&QueryKey::folders()).await?;
//!     let folder = client.create_folder(None, "Inbox").await?;
//!     println!("Created {}", folder.id);
//!     Ok(())
//! }
//! ```
//!
//! ## Autosave
//!
//! ```no_run
//! use delnotes_engine::{EngineConfig, InMemoryRemote, NoteDraft, QueryClient, RemoteServices};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let remote = Arc::new(InMemoryRemote::new());
//!     let client = QueryClient::new(EngineConfig::default(), RemoteServices::from_shared(remote))?;
//!
//!     let autosave = client.autosave("n1", "g1");
//!     autosave.notify(NoteDraft::new("Title", "first"))?;
//!     autosave.notify(NoteDraft::new("Title", "first draft"))?;
//!     // only the last draft is sent
//!     autosave.flush().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod mutation;
pub mod remote;
pub mod schema;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheEvent, CacheStats, CacheStatus, CacheValue,
    InvalidationEvent, InvalidationReason, QueryCache, QueryKey, QueryKind, SubscriptionId,
};
pub use client::QueryClient;
pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{EngineError, RemoteError, Result};
pub use mutation::{
    AutosaveCoordinator, CreateFolder, CreateNote, DeleteFolder, DeleteNote, Mutation,
    MutationController, MutationKind, RenameFolder, UpdateNote,
};
pub use remote::{InMemoryRemote, RemoteFolderService, RemoteNoteService, RemoteServices};
pub use schema::{Folder, FolderId, FolderTree, Note, NoteDraft, NoteId};
