//! Core type definitions for the cache system

use crate::schema::{Folder, FolderTree, Note};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Never read or written
    #[default]
    Empty,

    /// A read is in flight
    Fetching,

    /// Last read succeeded and nothing has touched the key since
    Fresh,

    /// Usable for display, due for a background refresh
    Stale,

    /// Last read failed
    Error,
}

impl CacheStatus {
    /// Whether the next read should go to the remote
    pub fn needs_refresh(&self) -> bool {
        matches!(self, CacheStatus::Empty | CacheStatus::Stale | CacheStatus::Error)
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Empty => write!(f, "empty"),
            CacheStatus::Fetching => write!(f, "fetching"),
            CacheStatus::Fresh => write!(f, "fresh"),
            CacheStatus::Stale => write!(f, "stale"),
            CacheStatus::Error => write!(f, "error"),
        }
    }
}

/// A cached value; the variant is determined by the key's kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CacheValue {
    /// `Folders`
    FolderTree(FolderTree),

    /// `ChildrenFolders{id}`
    FolderList(Vec<Folder>),

    /// `Notes{folderId}`
    NoteList(Vec<Note>),

    /// `Note{id}`
    Note(Note),
}

impl CacheValue {
    pub fn as_folder_tree(&self) -> Option<&FolderTree> {
        match self {
            CacheValue::FolderTree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_folder_list(&self) -> Option<&[Folder]> {
        match self {
            CacheValue::FolderList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_note_list(&self) -> Option<&[Note]> {
        match self {
            CacheValue::NoteList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_note(&self) -> Option<&Note> {
        match self {
            CacheValue::Note(note) => Some(note),
            _ => None,
        }
    }

    /// Folder entities held by this value, whichever folder shape it is
    pub fn folders_mut(&mut self) -> Option<&mut Vec<Folder>> {
        match self {
            CacheValue::FolderTree(tree) => Some(&mut tree.folders),
            CacheValue::FolderList(list) => Some(list),
            _ => None,
        }
    }

    pub fn notes_mut(&mut self) -> Option<&mut Vec<Note>> {
        match self {
            CacheValue::NoteList(list) => Some(list),
            _ => None,
        }
    }
}

/// Statistics for cache traffic
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Number of `read` calls
    pub reads: u64,

    /// Number of committed value writes
    pub writes: u64,

    /// Number of listener invocations
    pub notifications: u64,

    /// Fetches started via `begin_fetch`
    pub fetches_started: u64,

    /// In-flight fetches abandoned by `cancel_in_flight`
    pub fetches_cancelled: u64,

    /// Fetch results dropped because their ticket was cancelled
    pub fetch_results_ignored: u64,

    /// Keys marked stale by invalidation
    pub invalidations: u64,

    /// Mutation rollbacks applied
    pub rollbacks: u64,

    /// Entries removed by garbage collection
    pub collected: u64,

    /// Number of entries currently in cache
    pub entries: usize,
}

impl CacheStats {
    /// Share of started fetches whose result was thrown away, as a percentage
    pub fn discarded_fetch_rate(&self) -> f64 {
        if self.fetches_started == 0 {
            0.0
        } else {
            (self.fetch_results_ignored as f64 / self.fetches_started as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ entries: {}, reads: {}, writes: {}, notifications: {}, fetches: {}, cancelled: {}, ignored: {}, invalidations: {}, rollbacks: {} }}",
            self.entries,
            self.reads,
            self.writes,
            self.notifications,
            self.fetches_started,
            self.fetches_cancelled,
            self.fetch_results_ignored,
            self.invalidations,
            self.rollbacks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_needs_refresh() {
        assert!(CacheStatus::Empty.needs_refresh());
        assert!(CacheStatus::Stale.needs_refresh());
        assert!(CacheStatus::Error.needs_refresh());
        assert!(!CacheStatus::Fresh.needs_refresh());
        assert!(!CacheStatus::Fetching.needs_refresh());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CacheStatus::Fresh.to_string(), "fresh");
        assert_eq!(CacheStatus::default(), CacheStatus::Empty);
    }

    #[test]
    fn test_value_accessors() {
        let mut value = CacheValue::FolderList(vec![Folder::new("a", "A", None)]);
        assert_eq!(value.as_folder_list().map(|l| l.len()), Some(1));
        assert!(value.as_note_list().is_none());
        assert!(value.notes_mut().is_none());

        value.folders_mut().unwrap().clear();
        assert_eq!(value.as_folder_list().map(|l| l.len()), Some(0));

        let mut tree = CacheValue::FolderTree(FolderTree::default());
        assert!(tree.folders_mut().is_some());
    }

    #[test]
    fn test_discarded_fetch_rate() {
        let stats = CacheStats {
            fetches_started: 4,
            fetch_results_ignored: 1,
            ..Default::default()
        };
        assert_eq!(stats.discarded_fetch_rate(), 25.0);
        assert_eq!(CacheStats::default().discarded_fetch_rate(), 0.0);
    }

    #[test]
    fn test_stats_display() {
        let stats = CacheStats {
            reads: 10,
            rollbacks: 2,
            ..Default::default()
        };
        let display = stats.to_string();
        assert!(display.contains("reads: 10"));
        assert!(display.contains("rollbacks: 2"));
    }
}
