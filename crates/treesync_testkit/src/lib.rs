//! # treesync testkit
//!
//! Test utilities for treesync.
//!
//! This crate provides:
//! - Test fixtures: in-memory and file-backed directories, seeded entries
//! - Property-based generators for server batches
//! - Tree invariant assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use treesync_testkit::prelude::*;
//!
//! #[test]
//! fn applies_batch() {
//!     let dir = TestDirectory::memory();
//!     // ... run a sync cycle
//!     assert_tree_invariants(&dir);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod checks;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checks::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_test_tracing;
}

pub use checks::*;
pub use fixtures::*;
pub use generators::*;

/// Installs a test-friendly `tracing` subscriber.
///
/// Honours `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
