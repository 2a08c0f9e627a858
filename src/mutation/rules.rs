//! Aggregate consistency rules
//!
//! One struct per mutation type. Each knows which cached lists it touches and
//! how to transform them speculatively; all transforms are no-ops on keys that
//! hold no value and on entities missing from a list.

use crate::cache::{
    key::{QueryKey, QueryKind},
    store::Transaction,
    types::CacheValue,
};
use crate::error::{EngineError, RemoteError, Result};
use crate::mutation::{Mutation, MutationKind};
use crate::remote::RemoteServices;
use crate::schema::{Folder, FolderId, Note, NoteDraft, NoteId};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

/// Placeholder id for an entity the remote has not created yet
pub fn temp_id(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4())
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::PreconditionFailed(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Set `has_children` on folder `folder_id` inside the value at `key`.
///
/// Only writes when the flag actually changes.
fn set_has_children(tx: &mut Transaction<'_>, key: &QueryKey, folder_id: &str, flag: bool) -> bool {
    let differs = tx
        .get(key)
        .and_then(|v| match v {
            CacheValue::FolderTree(tree) => tree.find(folder_id).map(|f| f.has_children != flag),
            CacheValue::FolderList(list) => list.iter().find(|f| f.id == folder_id).map(|f| f.has_children != flag),
            _ => None,
        })
        .unwrap_or(false);

    if !differs {
        return false;
    }

    tx.update(key, |value| {
        if let Some(folder) = value
            .folders_mut()
            .and_then(|folders| folders.iter_mut().find(|f| f.id == folder_id))
        {
            folder.has_children = flag;
        }
    })
}

/// Make `folder_id`'s `has_children` agree with a freshly fetched children list,
/// everywhere the folder is cached
pub fn rederive_has_children(tx: &mut Transaction<'_>, folder_id: &str, children_non_empty: bool) -> usize {
    let mut keys = vec![QueryKey::folders()];
    keys.extend(tx.keys_of_kind(QueryKind::ChildrenFolders));

    let changed = keys
        .iter()
        .filter(|key| set_has_children(tx, key, folder_id, children_non_empty))
        .count();

    if changed > 0 {
        debug!("Re-derived hasChildren={} for {} in {} lists", children_non_empty, folder_id, changed);
    }
    changed
}

fn rename_in(tx: &mut Transaction<'_>, key: &QueryKey, id: &str, name: &str) {
    let present = tx
        .get(key)
        .and_then(|v| match v {
            CacheValue::FolderTree(tree) => tree.find(id).map(|_| ()),
            CacheValue::FolderList(list) => list.iter().find(|f| f.id == id).map(|_| ()),
            _ => None,
        })
        .is_some();

    if present {
        tx.update(key, |value| {
            if let Some(folder) = value
                .folders_mut()
                .and_then(|folders| folders.iter_mut().find(|f| f.id == id))
            {
                folder.name = name.to_string();
            }
        });
    }
}

/// Create a folder under `parent_id`, or at the root when it is `None`
#[derive(Debug, Clone)]
pub struct CreateFolder {
    pub parent_id: Option<FolderId>,
    pub name: String,
    pub temp_id: FolderId,
}

impl CreateFolder {
    pub fn new(parent_id: Option<FolderId>, name: impl Into<String>, temp_id: impl Into<FolderId>) -> Self {
        Self {
            parent_id,
            name: name.into(),
            temp_id: temp_id.into(),
        }
    }

    fn placeholder(&self) -> Folder {
        Folder::new(self.temp_id.clone(), self.name.clone(), self.parent_id.clone())
    }
}

#[async_trait]
impl Mutation for CreateFolder {
    type Response = Folder;
    type Output = Folder;

    fn kind(&self) -> MutationKind {
        MutationKind::CreateFolder
    }

    fn validate(&self) -> Result<()> {
        if let Some(parent) = &self.parent_id {
            require(parent, "parent folder id")?;
        }
        require(&self.name, "folder name")
    }

    fn affected_keys(&self) -> Vec<QueryKey> {
        match &self.parent_id {
            Some(parent) => vec![QueryKey::folders(), QueryKey::children_folders(parent.clone())],
            None => vec![QueryKey::folders()],
        }
    }

    fn apply(&self, tx: &mut Transaction<'_>) {
        let placeholder = self.placeholder();
        match &self.parent_id {
            Some(parent) => {
                tx.update(&QueryKey::children_folders(parent.clone()), |value| {
                    if let Some(list) = value.folders_mut() {
                        list.push(placeholder);
                    }
                });
                set_has_children(tx, &QueryKey::folders(), parent, true);
            }
            None => {
                tx.update(&QueryKey::folders(), |value| {
                    if let Some(list) = value.folders_mut() {
                        list.push(placeholder);
                    }
                });
            }
        }
    }

    async fn execute(&self, remote: &RemoteServices) -> std::result::Result<Folder, RemoteError> {
        remote
            .folders
            .create_folder(self.parent_id.as_deref(), &self.name)
            .await
    }

    fn commit(&self, _tx: &mut Transaction<'_>, response: Folder) -> Folder {
        // the placeholder stays until the next refresh of the list
        response
    }
}

/// Rename folder `id`; `id` is optional because callers may not have a
/// selection yet, which fails validation
#[derive(Debug, Clone)]
pub struct RenameFolder {
    pub id: Option<FolderId>,
    pub parent_id: Option<FolderId>,
    pub name: String,
}

impl RenameFolder {
    pub fn new(id: Option<FolderId>, parent_id: Option<FolderId>, name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
        }
    }

    fn target(&self) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| EngineError::PreconditionFailed("no folder selected for rename".to_string()))
    }
}

#[async_trait]
impl Mutation for RenameFolder {
    type Response = Folder;
    type Output = Folder;

    fn kind(&self) -> MutationKind {
        MutationKind::RenameFolder
    }

    fn validate(&self) -> Result<()> {
        require(self.target()?, "folder id")?;
        require(&self.name, "folder name")
    }

    fn affected_keys(&self) -> Vec<QueryKey> {
        let mut keys = vec![QueryKey::folders()];
        if let Some(parent) = &self.parent_id {
            keys.push(QueryKey::children_folders(parent.clone()));
        }
        keys
    }

    fn apply(&self, tx: &mut Transaction<'_>) {
        let Ok(id) = self.target() else {
            return;
        };
        for key in self.affected_keys() {
            rename_in(tx, &key, id, &self.name);
        }
    }

    async fn execute(&self, remote: &RemoteServices) -> std::result::Result<Folder, RemoteError> {
        let id = self
            .target()
            .map_err(|e| RemoteError::NotFound(e.to_string()))?;
        remote.folders.rename_folder(id, &self.name).await
    }

    fn commit(&self, _tx: &mut Transaction<'_>, response: Folder) -> Folder {
        response
    }
}

/// Delete folder `id` together with its cached children and notes lists
#[derive(Debug, Clone)]
pub struct DeleteFolder {
    pub id: FolderId,
    pub parent_id: Option<FolderId>,
}

impl DeleteFolder {
    pub fn new(id: impl Into<FolderId>, parent_id: Option<FolderId>) -> Self {
        Self {
            id: id.into(),
            parent_id,
        }
    }
}

#[async_trait]
impl Mutation for DeleteFolder {
    type Response = ();
    type Output = ();

    fn kind(&self) -> MutationKind {
        MutationKind::DeleteFolder
    }

    fn validate(&self) -> Result<()> {
        require(&self.id, "folder id")
    }

    fn affected_keys(&self) -> Vec<QueryKey> {
        let mut keys = vec![QueryKey::folders()];
        if let Some(parent) = &self.parent_id {
            keys.push(QueryKey::children_folders(parent.clone()));
        }
        keys.push(QueryKey::children_folders(self.id.clone()));
        keys.push(QueryKey::notes(self.id.clone()));
        keys
    }

    fn apply(&self, tx: &mut Transaction<'_>) {
        let id = self.id.as_str();

        tx.update(&QueryKey::folders(), |value| {
            if let CacheValue::FolderTree(tree) = value {
                tree.folders.retain(|f| f.id != id);
                tree.current_folder_ancestry.retain(|a| a != id);
            }
        });

        if let Some(parent) = &self.parent_id {
            let siblings = QueryKey::children_folders(parent.clone());
            tx.update(&siblings, |value| {
                if let Some(list) = value.folders_mut() {
                    list.retain(|f| f.id != id);
                }
            });
            let remaining = tx
                .get(&siblings)
                .and_then(CacheValue::as_folder_list)
                .map(|list| !list.is_empty());
            // other lists showing the parent catch up once its children
            // list is refetched
            if let Some(non_empty) = remaining {
                set_has_children(tx, &QueryKey::folders(), parent, non_empty);
            }
        }

        tx.update(&QueryKey::children_folders(id), |value| {
            if let Some(list) = value.folders_mut() {
                list.clear();
            }
        });
        tx.update(&QueryKey::notes(id), |value| {
            if let Some(list) = value.notes_mut() {
                list.clear();
            }
        });
    }

    async fn execute(&self, remote: &RemoteServices) -> std::result::Result<(), RemoteError> {
        remote.folders.delete_folder(&self.id).await
    }

    fn commit(&self, _tx: &mut Transaction<'_>, _response: ()) {}
}

/// Create a note at the top of `folder_id`'s list
#[derive(Debug, Clone)]
pub struct CreateNote {
    pub folder_id: FolderId,
    pub title: String,
    pub content: String,
    pub temp_id: NoteId,
}

impl CreateNote {
    pub fn new(
        folder_id: impl Into<FolderId>,
        title: impl Into<String>,
        content: impl Into<String>,
        temp_id: impl Into<NoteId>,
    ) -> Self {
        Self {
            folder_id: folder_id.into(),
            title: title.into(),
            content: content.into(),
            temp_id: temp_id.into(),
        }
    }

    fn key(&self) -> QueryKey {
        QueryKey::notes(self.folder_id.clone())
    }
}

#[async_trait]
impl Mutation for CreateNote {
    type Response = Note;
    type Output = Note;

    fn kind(&self) -> MutationKind {
        MutationKind::CreateNote
    }

    fn validate(&self) -> Result<()> {
        require(&self.folder_id, "folder id")
    }

    fn affected_keys(&self) -> Vec<QueryKey> {
        vec![self.key()]
    }

    fn apply(&self, tx: &mut Transaction<'_>) {
        let placeholder = Note::new(
            self.temp_id.clone(),
            self.folder_id.clone(),
            self.title.clone(),
            self.content.clone(),
        );
        tx.update(&self.key(), |value| {
            if let Some(list) = value.notes_mut() {
                list.insert(0, placeholder);
            }
        });
    }

    async fn execute(&self, remote: &RemoteServices) -> std::result::Result<Note, RemoteError> {
        remote
            .notes
            .create_note(&self.folder_id, &self.title, &self.content)
            .await
    }

    fn commit(&self, tx: &mut Transaction<'_>, response: Note) -> Note {
        let has_placeholder = tx
            .get(&self.key())
            .and_then(CacheValue::as_note_list)
            .map(|list| list.iter().any(|n| n.id == self.temp_id))
            .unwrap_or(false);

        if has_placeholder {
            let confirmed = response.clone();
            tx.update(&self.key(), |value| {
                if let Some(slot) = value
                    .notes_mut()
                    .and_then(|list| list.iter_mut().find(|n| n.id == self.temp_id))
                {
                    *slot = confirmed;
                }
            });
        }
        response
    }
}

/// Overwrite a note's editable fields
#[derive(Debug, Clone)]
pub struct UpdateNote {
    pub id: NoteId,
    pub folder_id: FolderId,
    pub draft: NoteDraft,
}

impl UpdateNote {
    pub fn new(id: impl Into<NoteId>, folder_id: impl Into<FolderId>, draft: NoteDraft) -> Self {
        Self {
            id: id.into(),
            folder_id: folder_id.into(),
            draft,
        }
    }
}

#[async_trait]
impl Mutation for UpdateNote {
    type Response = ();
    type Output = ();

    fn kind(&self) -> MutationKind {
        MutationKind::UpdateNote
    }

    fn validate(&self) -> Result<()> {
        require(&self.id, "note id")?;
        require(&self.folder_id, "folder id")
    }

    fn affected_keys(&self) -> Vec<QueryKey> {
        vec![QueryKey::notes(self.folder_id.clone()), QueryKey::note(self.id.clone())]
    }

    fn apply(&self, tx: &mut Transaction<'_>) {
        let list_key = QueryKey::notes(self.folder_id.clone());
        let listed = tx
            .get(&list_key)
            .and_then(CacheValue::as_note_list)
            .map(|list| list.iter().any(|n| n.id == self.id))
            .unwrap_or(false);

        if listed {
            tx.update(&list_key, |value| {
                if let Some(note) = value
                    .notes_mut()
                    .and_then(|list| list.iter_mut().find(|n| n.id == self.id))
                {
                    note.apply_draft(&self.draft);
                }
            });
        }

        tx.update(&QueryKey::note(self.id.clone()), |value| {
            if let CacheValue::Note(note) = value {
                note.apply_draft(&self.draft);
            }
        });
    }

    async fn execute(&self, remote: &RemoteServices) -> std::result::Result<(), RemoteError> {
        remote
            .notes
            .update_note(&self.id, &self.draft.title, &self.draft.content)
            .await
    }

    fn commit(&self, _tx: &mut Transaction<'_>, _response: ()) {}
}

/// Delete a note; resolves to the note that should become current
#[derive(Debug, Clone)]
pub struct DeleteNote {
    pub id: NoteId,
    pub folder_id: FolderId,
}

impl DeleteNote {
    pub fn new(id: impl Into<NoteId>, folder_id: impl Into<FolderId>) -> Self {
        Self {
            id: id.into(),
            folder_id: folder_id.into(),
        }
    }

    fn key(&self) -> QueryKey {
        QueryKey::notes(self.folder_id.clone())
    }
}

#[async_trait]
impl Mutation for DeleteNote {
    type Response = ();
    type Output = Option<NoteId>;

    fn kind(&self) -> MutationKind {
        MutationKind::DeleteNote
    }

    fn validate(&self) -> Result<()> {
        require(&self.id, "note id")?;
        require(&self.folder_id, "folder id")
    }

    fn affected_keys(&self) -> Vec<QueryKey> {
        vec![self.key(), QueryKey::note(self.id.clone())]
    }

    fn apply(&self, tx: &mut Transaction<'_>) {
        let listed = tx
            .get(&self.key())
            .and_then(CacheValue::as_note_list)
            .map(|list| list.iter().any(|n| n.id == self.id))
            .unwrap_or(false);

        if listed {
            tx.update(&self.key(), |value| {
                if let Some(list) = value.notes_mut() {
                    list.retain(|n| n.id != self.id);
                }
            });
        }
    }

    async fn execute(&self, remote: &RemoteServices) -> std::result::Result<(), RemoteError> {
        remote.notes.delete_note(&self.id).await
    }

    fn commit(&self, tx: &mut Transaction<'_>, _response: ()) -> Option<NoteId> {
        tx.get(&self.key())
            .and_then(CacheValue::as_note_list)
            .and_then(|list| list.iter().find(|n| n.id != self.id))
            .map(|n| n.id.clone())
    }
}
