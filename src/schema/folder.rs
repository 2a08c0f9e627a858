//! Folder entities as cached by the client

use serde::{Deserialize, Serialize};

/// Folder identifier, server-assigned or a `temp-` placeholder
pub type FolderId = String;

/// A folder in the tree
///
/// `has_children` is denormalized: the authoritative answer is whether the
/// `ChildrenFolders{id}` list for this folder is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<FolderId>,
    #[serde(default)]
    pub has_children: bool,
}

impl Folder {
    /// Create a folder with no children
    pub fn new(id: impl Into<FolderId>, name: impl Into<String>, parent_id: Option<FolderId>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id,
            has_children: false,
        }
    }

    /// Builder-style setter for the denormalized children flag
    pub fn with_children(mut self, has_children: bool) -> Self {
        self.has_children = has_children;
        self
    }

    /// Whether this folder sits at the top of the tree
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Value cached under the `Folders` key: the root list plus the path to the
/// folder currently in view
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderTree {
    pub folders: Vec<Folder>,
    #[serde(default)]
    pub current_folder_ancestry: Vec<FolderId>,
}

impl FolderTree {
    pub fn new(folders: Vec<Folder>) -> Self {
        Self {
            folders,
            current_folder_ancestry: Vec::new(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == id)
    }

    /// Whether `id` is on the path to the current folder (sidebar expands it)
    pub fn is_expanded(&self, id: &str) -> bool {
        self.current_folder_ancestry.iter().any(|a| a == id)
    }
}
