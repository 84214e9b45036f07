//! # treesync core
//!
//! The syncable store: a versioned, transactional tree of entries.
//!
//! This crate provides:
//! - Entries addressed by [`Id`], with parent links stored as ids
//! - A [`Directory`] shared between the sync worker and foreground edits
//! - Read and write transactions with an undo journal and savepoints
//! - Structural tree checks usable against any [`TreeView`]
//! - Snapshot persistence in memory or in a locked file-system directory
//!
//! ## Key Invariants
//!
//! - Live siblings never share a name
//! - No entry is its own ancestor
//! - A live entry never sits under a deleted parent
//! - `base_version` only increases
//! - Tombstones are kept, never purged

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backing_store;
mod config;
mod directory;
mod entry;
mod error;
mod id;
mod kernel;
pub mod transaction;
pub mod tree;

pub use backing_store::{
    BackingStore, FileBackingStore, InMemoryBackingStore, Snapshot, SNAPSHOT_FORMAT_VERSION,
    SNAPSHOT_MAGIC,
};
pub use config::DirectoryConfig;
pub use directory::Directory;
pub use entry::{EntryKernel, Update};
pub use error::{CoreError, CoreResult};
pub use id::Id;
pub use kernel::{Kernel, ShareInfo};
pub use transaction::{BaseTransaction, MutableEntry, ReadTransaction, Savepoint, WriteTransaction};
pub use tree::{TreeNode, TreeView, TreeViolation};
