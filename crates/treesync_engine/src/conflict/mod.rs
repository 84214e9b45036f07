//! Conflict detection and resolution.
//!
//! Updates the applicator could not apply are grouped into conflict sets
//! against the *proposed* tree: the store overlaid with every residual
//! update. Each set is then handed to the resolver, which settles it
//! according to the configured [`ConflictPolicy`].

mod builder;
mod policy;
mod process;
mod resolver;
mod view;

pub use builder::ConflictSetBuilder;
pub use policy::{ConflictPolicy, Resolution};
pub use process::BuildAndProcessConflictSetsCommand;
pub use resolver::ConflictResolver;
pub use view::ProposedTree;

use treesync_core::Id;

/// Why a group of entries cannot be reconciled as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConflictKind {
    /// Live siblings would share a name.
    NameClash,
    /// Parent links would loop.
    Cycle,
    /// A deletion targets a directory that still has live children.
    NonEmptyDirectory,
    /// Live siblings would claim the same position.
    Position,
    /// A server update targets an entry with local changes.
    Simple,
    /// An entry would sit under a missing, deleted or non-directory parent.
    Hierarchy,
    /// Updates that block each other and only apply together.
    Interlocked,
}

/// A group of entries whose residual updates must be resolved together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConflictSet {
    /// Kind of conflict.
    pub kind: ConflictKind,
    /// Members, sorted and unique.
    pub members: Vec<Id>,
}

impl ConflictSet {
    /// Creates a set, normalizing the member list.
    pub fn new(kind: ConflictKind, members: impl IntoIterator<Item = Id>) -> Self {
        let mut members: Vec<Id> = members.into_iter().collect();
        members.sort();
        members.dedup();
        Self { kind, members }
    }

    /// Returns true if `id` belongs to the set.
    pub fn contains(&self, id: &Id) -> bool {
        self.members.binary_search(id).is_ok()
    }
}
