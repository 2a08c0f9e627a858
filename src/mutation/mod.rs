//! Optimistic mutations
//!
//! Every mutation type implements [`Mutation`]: it declares the cache keys it
//! touches, the speculative transform applied before the remote call, the
//! remote call itself, and what to keep once the remote confirms. The
//! [`lifecycle::MutationController`] drives these pieces through the
//! cancel / apply / remote / reconcile protocol; the per-type rules live in
//! [`rules`].

pub mod autosave;
pub mod lifecycle;
pub mod rules;
pub mod snapshot;

use crate::cache::{key::QueryKey, store::Transaction};
use crate::error::{RemoteError, Result};
use crate::remote::RemoteServices;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use autosave::AutosaveCoordinator;
pub use lifecycle::MutationController;
pub use rules::{CreateFolder, CreateNote, DeleteFolder, DeleteNote, RenameFolder, UpdateNote};
pub use snapshot::{MutationId, MutationSnapshot};

/// Mutation types known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    CreateFolder,
    RenameFolder,
    DeleteFolder,
    CreateNote,
    UpdateNote,
    DeleteNote,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::CreateFolder => write!(f, "create_folder"),
            MutationKind::RenameFolder => write!(f, "rename_folder"),
            MutationKind::DeleteFolder => write!(f, "delete_folder"),
            MutationKind::CreateNote => write!(f, "create_note"),
            MutationKind::UpdateNote => write!(f, "update_note"),
            MutationKind::DeleteNote => write!(f, "delete_note"),
        }
    }
}

/// One row of the aggregate consistency table
#[async_trait]
pub trait Mutation: Send + Sync + fmt::Debug {
    /// What the remote call returns
    type Response: Send;

    /// What the caller gets back on success
    type Output: Send;

    fn kind(&self) -> MutationKind;

    /// Reject bad arguments before anything touches the cache
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Keys to cancel, snapshot, transform and reconcile
    fn affected_keys(&self) -> Vec<QueryKey>;

    /// Speculative transform; must only touch keys from `affected_keys`
    fn apply(&self, tx: &mut Transaction<'_>);

    /// The remote operation
    async fn execute(&self, remote: &RemoteServices) -> std::result::Result<Self::Response, RemoteError>;

    /// Runs in one transaction after the remote confirmed; may swap
    /// speculative data for server data
    fn commit(&self, tx: &mut Transaction<'_>, response: Self::Response) -> Self::Output;
}
