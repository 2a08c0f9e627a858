//! Domain entities cached by the engine
//!
//! - [`Folder`] / [`FolderTree`]: the folder hierarchy
//! - [`Note`] / [`NoteDraft`]: notes and their editable fields

pub mod folder;
pub mod note;

pub use folder::{Folder, FolderId, FolderTree};
pub use note::{Note, NoteDraft, NoteId};
