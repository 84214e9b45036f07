//! # treesync engine
//!
//! Download, update application and conflict resolution for a treesync
//! directory.
//!
//! This crate provides:
//! - A syncer driving cycles (download → apply → resolve → save)
//! - An update applicator that retries out-of-order updates to a fixpoint
//! - Conflict set building against the proposed tree, and a policy-driven
//!   resolver
//! - Retry with exponential backoff and cancellation between steps
//! - A server connection abstraction with HTTP and in-memory implementations
//!
//! ## Architecture
//!
//! Every step runs in its own transaction on the [`Directory`]:
//! 1. Download reads the store and asks the server for newer entries
//! 2. Apply writes whatever fits, retrying until a pass changes nothing
//! 3. Conflicting and blocked leftovers are grouped and resolved, then
//!    retried, for a bounded number of iterations
//! 4. Save persists the leftovers and advances the timestamp
//!
//! ## Key Invariants
//!
//! - A committed tree always satisfies the store invariants
//! - The sync timestamp only advances after the batch is settled or queued
//! - Re-applying the same batch is a no-op
//! - A failed cycle never leaves partial writes from its failing step
//!
//! [`Directory`]: treesync_core::Directory

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applicator;
mod apply_updates;
mod command;
mod config;
pub mod conflict;
mod download;
mod error;
mod http;
mod persist;
mod session;
mod syncer;
mod transport;

pub use applicator::{UpdateApplicator, UpdateAttemptResponse};
pub use apply_updates::ApplyUpdatesCommand;
pub use command::{CycleOutcome, SyncerCommand, SyncerStep};
pub use config::{RetryConfig, SyncConfig};
pub use conflict::{
    ConflictKind, ConflictPolicy, ConflictResolver, ConflictSet, ConflictSetBuilder, Resolution,
};
pub use download::{build_request, update_from_entity, DownloadUpdatesCommand};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpConnection, LoopbackClient, LoopbackServer, COMMAND_PATH};
pub use persist::SaveProgressCommand;
pub use session::{
    ConflictProgress, StatusController, SyncEvent, SyncObserver, SyncSession, UpdateProgress,
};
pub use syncer::{CancelHandle, SyncCycleResult, SyncState, SyncStats, Syncer};
pub use transport::{MockServerConnection, ServerConnection};
