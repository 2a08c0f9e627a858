//! # Query Cache
//!
//! Keyed store of query results shared by every view of the client.
//!
//! ## Features
//!
//! - **Structural keys**: a resource kind plus a sorted parameter map
//! - **Subscriber notification**: listeners run synchronously after each commit
//! - **Atomic transactions**: multi-key changes become visible in one step
//! - **Fetch cancellation**: generation tickets make abandoned results no-ops
//! - **Invalidation**: by key list or partial key match, never dropping values
//! - **Garbage collection**: idle unsubscribed entries are dropped after a grace period
//!
//! ## Example
//!
//! ```rust
//! use delnotes_engine::cache::{CacheValue, QueryCache, QueryKey};
//! use delnotes_engine::schema::Folder;
//!
//! let cache = QueryCache::default();
//! let key = QueryKey::children_folders("r1");
//!
//! cache.write(&key, |_| {
//!     Some(CacheValue::FolderList(vec![Folder::new("f1", "Inbox", Some("r1".into()))]))
//! });
//!
//! assert_eq!(key.to_string(), "ChildrenFolders{id=r1}");
//! assert!(cache.value(&key).is_some());
//! ```

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata, SubscriptionId};
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use key::{key_for, parent_child_keys, QueryKey, QueryKeyBuilder, QueryKind, QueryParams};
pub use store::{start_gc_task, CacheEvent, FetchTicket, Listener, QueryCache, Transaction};
pub use types::{CacheStats, CacheStatus, CacheValue};
