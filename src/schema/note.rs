//! Note entities as cached by the client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::folder::FolderId;

/// Note identifier
pub type NoteId = String;

/// A note inside a folder
///
/// `content` is the serialized rich-text document; the engine never looks
/// inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub folder_id: FolderId,
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(
        id: impl Into<NoteId>,
        folder_id: impl Into<FolderId>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            folder_id: folder_id.into(),
            title: title.into(),
            content: content.into(),
            updated_at: Utc::now(),
        }
    }

    /// Overwrite the editable fields, bumping `updated_at`
    pub fn apply_draft(&mut self, draft: &NoteDraft) {
        self.title = draft.title.clone();
        self.content = draft.content.clone();
        self.updated_at = Utc::now();
    }
}

/// The editable field set of a note
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_draft() {
        let mut note = Note::new("n1", "g1", "Old", "{}");
        let before = note.updated_at;

        note.apply_draft(&NoteDraft::new("New", r#"{"root":[]}"#));

        assert_eq!(note.title, "New");
        assert_eq!(note.content, r#"{"root":[]}"#);
        assert_eq!(note.id, "n1");
        assert!(note.updated_at >= before);
    }

    #[test]
    fn test_note_wire_names() {
        let note = Note::new("n1", "g1", "Title", "body");
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["folderId"], "g1");
        assert!(json.get("updatedAt").is_some());
    }
}
