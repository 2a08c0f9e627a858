//! Query key model
//!
//! A [`QueryKey`] is a resource kind plus a parameter record. Parameters live
//! in a `BTreeMap`, so two keys built from the same fields in any order are
//! equal, hash the same and address the same cache slot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter name used by `ChildrenFolders` and `Note`
pub const PARAM_ID: &str = "id";

/// Parameter name used by `Notes`
pub const PARAM_FOLDER_ID: &str = "folderId";

/// Canonicalized parameter record
pub type QueryParams = BTreeMap<String, String>;

/// Resource kind of a cached query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryKind {
    /// Root folder list plus ancestry of the folder in view
    Folders,

    /// Direct children of one folder
    ChildrenFolders,

    /// Notes of one folder
    Notes,

    /// A single note
    Note,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Folders => write!(f, "Folders"),
            QueryKind::ChildrenFolders => write!(f, "ChildrenFolders"),
            QueryKind::Notes => write!(f, "Notes"),
            QueryKind::Note => write!(f, "Note"),
        }
    }
}

/// Identity of a cached slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    kind: QueryKind,
    params: QueryParams,
}

/// Build a canonical key from a kind and any parameter list.
///
/// Later duplicates of a field name replace earlier ones.
pub fn key_for<I, K, V>(kind: QueryKind, params: I) -> QueryKey
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    QueryKey {
        kind,
        params: params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    }
}

/// Structural ancestors of a key: the same kind with every proper prefix of
/// its canonical parameter list, most general first.
///
/// Business links such as `Folders` summarizing `ChildrenFolders` are not
/// structural and never appear here.
pub fn parent_child_keys(kind: QueryKind, params: &QueryParams) -> Vec<QueryKey> {
    (0..params.len())
        .map(|len| QueryKey {
            kind,
            params: params
                .iter()
                .take(len)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
        .collect()
}

impl QueryKey {
    /// Key with no parameters
    pub fn of_kind(kind: QueryKind) -> Self {
        Self {
            kind,
            params: QueryParams::new(),
        }
    }

    /// `Folders`
    pub fn folders() -> Self {
        Self::of_kind(QueryKind::Folders)
    }

    /// `ChildrenFolders{id}`
    pub fn children_folders(parent_id: impl Into<String>) -> Self {
        key_for(QueryKind::ChildrenFolders, [(PARAM_ID, parent_id.into())])
    }

    /// `Notes{folderId}`
    pub fn notes(folder_id: impl Into<String>) -> Self {
        key_for(QueryKind::Notes, [(PARAM_FOLDER_ID, folder_id.into())])
    }

    /// `Note{id}`
    pub fn note(id: impl Into<String>) -> Self {
        key_for(QueryKind::Note, [(PARAM_ID, id.into())])
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// See [`parent_child_keys`]
    pub fn ancestors(&self) -> Vec<QueryKey> {
        parent_child_keys(self.kind, &self.params)
    }

    /// Partial match: same kind and every parameter of `filter` present with
    /// the same value. A bare kind matches every key of that kind.
    pub fn matches(&self, filter: &QueryKey) -> bool {
        self.kind == filter.kind
            && filter
                .params
                .iter()
                .all(|(k, v)| self.params.get(k) == Some(v))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{{{}}}", params.join(","))?;
        }
        Ok(())
    }
}

/// Builder for keys with several parameters
pub struct QueryKeyBuilder {
    kind: QueryKind,
    params: QueryParams,
}

impl QueryKeyBuilder {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            params: QueryParams::new(),
        }
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> QueryKey {
        QueryKey {
            kind: self.kind,
            params: self.params,
        }
    }
}
