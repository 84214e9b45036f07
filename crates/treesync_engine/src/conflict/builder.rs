//! Grouping residual updates into conflict sets.

use super::view::ProposedTree;
use super::{ConflictKind, ConflictSet};
use crate::session::ConflictProgress;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use treesync_core::tree::{
    cycle_through, find_name_clashes, find_position_clashes, live_children, TreeView,
};
use treesync_core::{Id, Kernel, Update};

/// Scans the proposed tree for the violations behind each residual update.
pub struct ConflictSetBuilder<'k> {
    view: ProposedTree<'k>,
    residual: &'k [Update],
}

impl<'k> ConflictSetBuilder<'k> {
    /// Creates a builder over the committed tree and the residual updates.
    pub fn new(kernel: &'k Kernel, residual: &'k [Update]) -> Self {
        Self {
            view: ProposedTree::new(kernel, residual),
            residual,
        }
    }

    /// Returns the conflict sets, sorted and without duplicates.
    ///
    /// Residual updates with no violation in the proposed tree are grouped
    /// into `Interlocked` sets when everything they are blocked on is part
    /// of the same group. Updates blocked on something with a real
    /// violation are left out; they stay blocked.
    pub fn build(&self, progress: &ConflictProgress) -> Vec<ConflictSet> {
        let mut sets = BTreeSet::new();
        let mut candidates = BTreeSet::new();

        for update in self.residual {
            if update.id.is_root() {
                continue;
            }
            if let Some(set) = self.violation(update) {
                sets.insert(set);
            } else if let Some(kind) = progress.conflict_kind(&update.id) {
                sets.insert(ConflictSet::new(kind, [update.id.clone()]));
            } else {
                candidates.insert(update.id.clone());
            }
        }

        sets.extend(interlocked_groups(&candidates, progress));
        tracing::trace!(sets = sets.len(), "built conflict sets");
        sets.into_iter().collect()
    }

    fn violation(&self, update: &Update) -> Option<ConflictSet> {
        let id = &update.id;

        if let Some(entry) = self.view.base().get(id) {
            if entry.is_unsynced && update.version > entry.base_version {
                return Some(ConflictSet::new(ConflictKind::Simple, [id.clone()]));
            }
        }

        if update.is_deleted {
            return self.non_empty(id);
        }

        if &update.parent_id == id {
            return Some(ConflictSet::new(ConflictKind::Cycle, [id.clone()]));
        }

        if !update.parent_id.is_root() {
            match self.view.node(&update.parent_id) {
                Some(parent) if parent.is_live() && parent.is_dir => {}
                Some(parent) => {
                    return Some(ConflictSet::new(
                        ConflictKind::Hierarchy,
                        [id.clone(), parent.id],
                    ));
                }
                None => {
                    return Some(ConflictSet::new(ConflictKind::Hierarchy, [id.clone()]));
                }
            }
        }

        if let Some(members) = cycle_through(&self.view, id) {
            return Some(ConflictSet::new(ConflictKind::Cycle, members));
        }

        if !update.is_dir {
            if let Some(set) = self.non_empty(id) {
                return Some(set);
            }
        }

        let clashes = find_name_clashes(&self.view, &update.parent_id, &update.name, id);
        if !clashes.is_empty() {
            return Some(ConflictSet::new(
                ConflictKind::NameClash,
                clashes.into_iter().chain([id.clone()]),
            ));
        }

        if let Some(position) = update.position {
            let clashes = find_position_clashes(&self.view, &update.parent_id, position, id);
            if !clashes.is_empty() {
                return Some(ConflictSet::new(
                    ConflictKind::Position,
                    clashes.into_iter().chain([id.clone()]),
                ));
            }
        }

        None
    }

    fn non_empty(&self, id: &Id) -> Option<ConflictSet> {
        let children = live_children(&self.view, id);
        if children.is_empty() {
            return None;
        }
        Some(ConflictSet::new(
            ConflictKind::NonEmptyDirectory,
            children.into_iter().map(|c| c.id).chain([id.clone()]),
        ))
    }
}

/// Connected components of the blocked-on relation among `candidates`,
/// keeping only components closed under it.
fn interlocked_groups(
    candidates: &BTreeSet<Id>,
    progress: &ConflictProgress,
) -> Vec<ConflictSet> {
    let mut adjacency: BTreeMap<&Id, Vec<&Id>> = BTreeMap::new();
    for id in candidates {
        adjacency.entry(id).or_default();
        if let Some(on) = progress.blocked_on(id) {
            if let Some(on) = candidates.get(on) {
                adjacency.entry(id).or_default().push(on);
                adjacency.entry(on).or_default().push(id);
            }
        }
    }

    let mut seen: HashSet<&Id> = HashSet::new();
    let mut groups = Vec::new();
    for start in candidates {
        if !seen.insert(start) {
            continue;
        }
        let mut component = vec![start];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            for &next in adjacency.get(id).into_iter().flatten() {
                if seen.insert(next) {
                    component.push(next);
                    stack.push(next);
                }
            }
        }

        let closed = component.iter().all(|id| {
            progress
                .blocked_on(id)
                .map_or(true, |on| candidates.contains(on))
        });
        if closed {
            groups.push(ConflictSet::new(
                ConflictKind::Interlocked,
                component.into_iter().cloned(),
            ));
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_core::{BaseTransaction, Directory};
    use treesync_testkit::prelude::*;

    fn build(
        dir: &Directory,
        residual: &[Update],
        progress: &ConflictProgress,
    ) -> Vec<ConflictSet> {
        let rtx = dir.read();
        ConflictSetBuilder::new(rtx.kernel(), residual).build(progress)
    }

    #[test]
    fn name_clash_with_committed_entry() {
        let dir = Directory::open_in_memory("build");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        create_synced_entry(&dir, "2", docs.clone(), "a.txt", 1, false);

        let residual = vec![Update::new(Id::server("3"), docs, "a.txt", 1, false)];
        let sets = build(&dir, &residual, &ConflictProgress::default());
        assert_eq!(
            sets,
            vec![ConflictSet::new(
                ConflictKind::NameClash,
                [Id::server("2"), Id::server("3")]
            )]
        );
    }

    #[test]
    fn cycle_members_are_collected() {
        let dir = Directory::open_in_memory("build");
        let (a, b, c) = scenarios::nested_abc(&dir);

        let residual = vec![Update::new(c.clone(), a.clone(), "C", 2, true)];
        let sets = build(&dir, &residual, &ConflictProgress::default());
        assert_eq!(sets, vec![ConflictSet::new(ConflictKind::Cycle, [a, b, c])]);
    }

    #[test]
    fn deletion_with_children() {
        let dir = Directory::open_in_memory("build");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        let child = create_local_entry(&dir, docs.clone(), "draft", false);

        let mut tombstone = Update::new(docs.clone(), Id::root(), "Docs", 2, true);
        tombstone.is_deleted = true;
        let sets = build(&dir, &[tombstone], &ConflictProgress::default());
        assert_eq!(
            sets,
            vec![ConflictSet::new(ConflictKind::NonEmptyDirectory, [docs, child])]
        );
    }

    #[test]
    fn unknown_parent_is_hierarchy_and_child_stays_blocked() {
        let dir = Directory::open_in_memory("build");
        let x = Update::new(Id::server("x"), Id::server("missing"), "x", 1, true);
        let y = Update::new(Id::server("y"), Id::server("x"), "y", 1, false);

        let mut progress = ConflictProgress::default();
        progress.add_conflicting(x.id.clone(), ConflictKind::Hierarchy);
        progress.add_blocked(y.id.clone(), x.id.clone());

        let sets = build(&dir, &[x, y], &progress);
        assert_eq!(
            sets,
            vec![ConflictSet::new(ConflictKind::Hierarchy, [Id::server("x")])]
        );
    }

    #[test]
    fn swap_is_interlocked() {
        let dir = Directory::open_in_memory("build");
        create_synced_entry(&dir, "1", Id::root(), "a", 1, false);
        create_synced_entry(&dir, "2", Id::root(), "b", 1, false);

        let residual = vec![
            Update::new(Id::server("1"), Id::root(), "b", 2, false),
            Update::new(Id::server("2"), Id::root(), "a", 2, false),
        ];
        let mut progress = ConflictProgress::default();
        progress.add_blocked(Id::server("1"), Id::server("2"));
        progress.add_blocked(Id::server("2"), Id::server("1"));

        let sets = build(&dir, &residual, &progress);
        assert_eq!(
            sets,
            vec![ConflictSet::new(
                ConflictKind::Interlocked,
                [Id::server("1"), Id::server("2")]
            )]
        );
    }

    #[test]
    fn unsynced_target_is_simple() {
        let dir = Directory::open_in_memory("build");
        let id = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        mark_unsynced(&dir, &id);

        let residual = vec![Update::new(id.clone(), Id::root(), "Server", 2, true)];
        let sets = build(&dir, &residual, &ConflictProgress::default());
        assert_eq!(sets, vec![ConflictSet::new(ConflictKind::Simple, [id])]);
    }
}
