//! The store overlaid with residual updates.

use std::collections::{BTreeSet, HashMap};
use treesync_core::tree::{TreeNode, TreeView};
use treesync_core::{Id, Kernel, Update};

/// The tree that would exist if every residual update were applied.
///
/// Nothing is written; structural checks run against the overlay.
pub struct ProposedTree<'k> {
    base: &'k Kernel,
    overrides: HashMap<Id, TreeNode>,
}

impl<'k> ProposedTree<'k> {
    /// Overlays `updates` on `base`. Updates targeting the root are ignored.
    pub fn new<'u, I>(base: &'k Kernel, updates: I) -> Self
    where
        I: IntoIterator<Item = &'u Update>,
    {
        let overrides = updates
            .into_iter()
            .filter(|update| !update.id.is_root())
            .map(|update| (update.id.clone(), node_for(update)))
            .collect();
        Self { base, overrides }
    }

    /// Returns the committed tree underneath the overlay.
    pub fn base(&self) -> &Kernel {
        self.base
    }

    /// Returns true if `id` has a residual update.
    pub fn is_overridden(&self, id: &Id) -> bool {
        self.overrides.contains_key(id)
    }
}

fn node_for(update: &Update) -> TreeNode {
    TreeNode {
        id: update.id.clone(),
        parent_id: update.parent_id.clone(),
        name: update.name.clone(),
        is_dir: update.is_dir,
        is_deleted: update.is_deleted,
        position: update.position,
    }
}

impl TreeView for ProposedTree<'_> {
    fn node(&self, id: &Id) -> Option<TreeNode> {
        self.overrides
            .get(id)
            .cloned()
            .or_else(|| self.base.node(id))
    }

    fn child_ids(&self, parent: &Id) -> Vec<Id> {
        let mut ids: BTreeSet<Id> = self
            .base
            .child_ids(parent)
            .into_iter()
            .filter(|id| {
                self.overrides
                    .get(id)
                    .map_or(true, |node| &node.parent_id == parent)
            })
            .collect();
        ids.extend(
            self.overrides
                .values()
                .filter(|node| &node.parent_id == parent && !node.id.is_root())
                .map(|node| node.id.clone()),
        );
        ids.into_iter().collect()
    }
}
