//! Settling conflict sets.
//!
//! Every set is resolved inside its own savepoint. After each set the
//! touched entries are verified against the store invariants; a resolution
//! that would break one is a bug, so it panics in debug builds and is
//! rolled back (and logged) otherwise.

use super::view::ProposedTree;
use super::{ConflictKind, ConflictPolicy, ConflictSet, Resolution};
use crate::applicator::{attempt_update, write_update, UpdateAttemptResponse};
use crate::error::SyncResult;
use crate::session::ConflictProgress;
use std::collections::{HashMap, HashSet};
use treesync_core::tree::{
    find_name_clashes, find_position_clashes, has_live_children, live_children, live_descendants,
    verify_entries, TreeView,
};
use treesync_core::{
    BaseTransaction, Id, Kernel, Savepoint, TreeNode, Update, WriteTransaction,
};

/// Where the current state of a conflict member comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Committed and confirmed by the server.
    Synced,
    /// A server update not yet applied.
    Pending,
    /// Committed with unconfirmed local changes.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separation {
    Name,
    Position,
}

impl Separation {
    fn resolution(self) -> Resolution {
        match self {
            Separation::Name => Resolution::Renamed,
            Separation::Position => Resolution::Repositioned,
        }
    }
}

/// What resolving one set did.
#[derive(Debug, Default)]
struct SetOutcome {
    resolutions: Vec<(Id, Resolution)>,
    /// Residual updates the resolution used up.
    consumed: Vec<Id>,
    /// Entries written to.
    touched: Vec<Id>,
}

impl SetOutcome {
    fn record(&mut self, id: &Id, resolution: Resolution) {
        self.resolutions.push((id.clone(), resolution));
    }

    fn consume(&mut self, id: &Id) {
        self.consumed.push(id.clone());
    }

    fn touch(&mut self, id: &Id) {
        self.touched.push(id.clone());
    }
}

/// Applies a [`ConflictPolicy`] to conflict sets.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Resolves `sets` in order.
    ///
    /// Residual updates used up by a resolution (absorbed, or applied in a
    /// modified form) are removed from `residual`; the rest are left for the
    /// applicator to retry. Every resolution is recorded in `progress` and
    /// returned.
    pub fn resolve(
        &self,
        txn: &mut WriteTransaction<'_>,
        sets: &[ConflictSet],
        residual: &mut Vec<Update>,
        progress: &mut ConflictProgress,
    ) -> SyncResult<Vec<(Id, Resolution)>> {
        let mut pending: HashMap<Id, Update> = residual
            .iter()
            .map(|update| (update.id.clone(), update.clone()))
            .collect();
        let mut resolved = Vec::new();

        for set in sets {
            let savepoint = txn.savepoint();
            let outcome = self.resolve_set(txn, set, &pending)?;
            if !check_invariants(txn, savepoint, &outcome.touched)? {
                continue;
            }
            for id in &outcome.consumed {
                pending.remove(id);
            }
            for (id, resolution) in outcome.resolutions {
                tracing::debug!(%id, ?resolution, kind = ?set.kind, "resolved conflict");
                progress.add_resolved(id.clone(), resolution);
                resolved.push((id, resolution));
            }
        }

        residual.retain(|update| pending.contains_key(&update.id));
        Ok(resolved)
    }

    fn resolve_set(
        &self,
        txn: &mut WriteTransaction<'_>,
        set: &ConflictSet,
        pending: &HashMap<Id, Update>,
    ) -> SyncResult<SetOutcome> {
        let mut out = SetOutcome::default();
        match set.kind {
            ConflictKind::Interlocked => self.apply_together(txn, set, pending, &mut out)?,
            _ if !self.policy.auto_resolves() => {
                for id in &set.members {
                    out.record(id, Resolution::Skip);
                }
            }
            ConflictKind::NameClash => {
                self.separate(txn, set, pending, Separation::Name, &mut out)?;
            }
            ConflictKind::Position => {
                self.separate(txn, set, pending, Separation::Position, &mut out)?;
            }
            ConflictKind::Cycle => self.break_cycle(txn, set, pending, &mut out)?,
            ConflictKind::NonEmptyDirectory => {
                self.resolve_non_empty(txn, set, pending, &mut out)?;
            }
            ConflictKind::Simple => self.resolve_simple(txn, set, pending, &mut out)?,
            ConflictKind::Hierarchy => self.resolve_hierarchy(txn, set, pending, &mut out)?,
        }
        Ok(out)
    }

    /// Lets one member keep the contested name or slot and moves the others
    /// aside.
    fn separate(
        &self,
        txn: &mut WriteTransaction<'_>,
        set: &ConflictSet,
        pending: &HashMap<Id, Update>,
        by: Separation,
        out: &mut SetOutcome,
    ) -> SyncResult<()> {
        let winner = set
            .members
            .iter()
            .min_by_key(|id| self.precedence(txn.kernel(), pending, id))
            .cloned();
        let Some(winner) = winner else {
            return Ok(());
        };

        for loser in set.members.iter().filter(|id| **id != winner) {
            let Some(node) = ProposedTree::new(txn.kernel(), pending.values()).node(loser) else {
                continue;
            };
            if !node.is_live() || !still_clashes(txn.kernel(), pending, &node, by) {
                continue;
            }

            match pending.get(loser) {
                Some(update) => {
                    let modified = match by {
                        Separation::Name => update.with_name(unique_name(
                            txn.kernel(),
                            pending,
                            &node.parent_id,
                            &node.name,
                            loser,
                        )),
                        Separation::Position => update.with_position(Some(next_free_position(
                            txn.kernel(),
                            pending,
                            &node.parent_id,
                        ))),
                    };
                    let savepoint = txn.savepoint();
                    let others = pending_ids(pending, out, loser);
                    if attempt_update(txn, &modified, &others)? == UpdateAttemptResponse::Success {
                        txn.mutate(loser)?.put_is_unsynced(true)?;
                        out.consume(loser);
                        out.touch(loser);
                        out.record(loser, by.resolution());
                    } else {
                        txn.rollback_to(savepoint)?;
                        tracing::debug!(id = %loser, "could not move clashing update aside");
                    }
                }
                None => {
                    let name = match by {
                        Separation::Name => Some(unique_name(
                            txn.kernel(),
                            pending,
                            &node.parent_id,
                            &node.name,
                            loser,
                        )),
                        Separation::Position => None,
                    };
                    let position = match by {
                        Separation::Name => None,
                        Separation::Position => {
                            Some(next_free_position(txn.kernel(), pending, &node.parent_id))
                        }
                    };
                    let mut entry = txn.mutate(loser)?;
                    if let Some(name) = name {
                        entry.put_name(name)?;
                    }
                    if position.is_some() {
                        entry.put_position(position)?;
                    }
                    entry.put_is_unsynced(true)?;
                    out.touch(loser);
                    out.record(loser, by.resolution());
                }
            }
        }
        Ok(())
    }

    /// Keeps the local structure: cycle-closing updates are absorbed without
    /// being applied.
    fn break_cycle(
        &self,
        txn: &mut WriteTransaction<'_>,
        set: &ConflictSet,
        pending: &HashMap<Id, Update>,
        out: &mut SetOutcome,
    ) -> SyncResult<()> {
        for id in &set.members {
            let Some(update) = pending.get(id) else {
                continue;
            };
            match txn.get_entry(id).map(|entry| entry.base_version) {
                Some(base_version) => {
                    let mut entry = txn.mutate(id)?;
                    entry.put_base_version(update.version.max(base_version))?;
                    entry.put_is_unsynced(true)?;
                    out.consume(id);
                    out.touch(id);
                    out.record(id, Resolution::KeepLocal);
                }
                None => {
                    tracing::warn!(%id, "cycle through entries never seen locally, skipping");
                    out.record(id, Resolution::Skip);
                }
            }
        }
        Ok(())
    }

    fn resolve_non_empty(
        &self,
        txn: &mut WriteTransaction<'_>,
        set: &ConflictSet,
        pending: &HashMap<Id, Update>,
        out: &mut SetOutcome,
    ) -> SyncResult<()> {
        let view = ProposedTree::new(txn.kernel(), pending.values());
        let Some((dir, update)) = set.members.iter().find_map(|id| {
            pending
                .get(id)
                .filter(|u| (u.is_deleted || !u.is_dir) && has_live_children(&view, id))
                .map(|u| (id, u))
        }) else {
            return Ok(());
        };
        if txn.get_entry(dir).is_none() {
            return Ok(());
        }

        let descendants = live_descendants(txn.kernel(), dir);
        let local_mtime = descendants
            .iter()
            .filter_map(|node| txn.get_entry(&node.id))
            .map(|entry| entry.mtime)
            .max()
            .unwrap_or(0);

        if self.policy.server_wins(local_mtime, update.mtime) {
            if let Some(node) = descendants.iter().find(|node| view.is_overridden(&node.id)) {
                tracing::debug!(%dir, child = %node.id, "child update pending, deferring delete");
                return Ok(());
            }
            for node in &descendants {
                let mut entry = txn.mutate(&node.id)?;
                entry.put_is_deleted(true)?;
                entry.put_is_unsynced(true)?;
                out.touch(&node.id);
            }
            out.touch(dir);
            out.record(dir, Resolution::AcceptServer);
        } else {
            let base_version = txn.get_entry(dir).map_or(0, |e| e.base_version);
            let mut entry = txn.mutate(dir)?;
            entry.put_base_version(update.version.max(base_version))?;
            entry.put_is_unsynced(true)?;
            out.consume(dir);
            out.touch(dir);
            out.record(dir, Resolution::KeepLocal);
        }
        Ok(())
    }

    fn resolve_simple(
        &self,
        txn: &mut WriteTransaction<'_>,
        set: &ConflictSet,
        pending: &HashMap<Id, Update>,
        out: &mut SetOutcome,
    ) -> SyncResult<()> {
        for id in &set.members {
            let Some(update) = pending.get(id) else {
                continue;
            };
            let Some(local) = txn.get_entry(id).cloned() else {
                continue;
            };
            if !local.is_unsynced {
                continue;
            }

            if self.policy.server_wins(local.mtime, update.mtime) {
                txn.mutate(id)?.put_is_unsynced(false)?;
                out.record(id, Resolution::AcceptServer);
            } else {
                txn.mutate(id)?
                    .put_base_version(update.version.max(local.base_version))?;
                out.consume(id);
                out.record(id, Resolution::KeepLocal);
            }
            out.touch(id);
        }
        Ok(())
    }

    /// Only a parent deleted locally can be settled here. A parent the
    /// server deleted, or never sent, waits for a later batch.
    fn resolve_hierarchy(
        &self,
        txn: &mut WriteTransaction<'_>,
        set: &ConflictSet,
        pending: &HashMap<Id, Update>,
        out: &mut SetOutcome,
    ) -> SyncResult<()> {
        for id in &set.members {
            let Some(update) = pending.get(id).filter(|u| !u.is_deleted) else {
                continue;
            };
            let Some(parent) = txn.get_entry(&update.parent_id).cloned() else {
                tracing::warn!(%id, parent = %update.parent_id, "parent unknown, leaving unresolved");
                continue;
            };
            if !(parent.is_deleted && parent.is_unsynced && parent.is_dir) {
                tracing::warn!(%id, parent = %parent.id, "parent unusable, leaving unresolved");
                continue;
            }

            if self.policy.server_wins(parent.mtime, update.mtime) {
                if !can_restore(txn.kernel(), &parent.id) {
                    tracing::debug!(%id, parent = %parent.id, "cannot undelete parent");
                    continue;
                }
                txn.mutate(&parent.id)?.put_is_deleted(false)?;
                out.touch(&parent.id);
                out.record(id, Resolution::AcceptServer);
            } else {
                let tombstone = Update {
                    is_deleted: true,
                    ..update.clone()
                };
                let savepoint = txn.savepoint();
                let others = pending_ids(pending, out, id);
                if attempt_update(txn, &tombstone, &others)? == UpdateAttemptResponse::Success {
                    txn.mutate(id)?.put_is_unsynced(true)?;
                    out.consume(id);
                    out.touch(id);
                    out.record(id, Resolution::KeepLocal);
                } else {
                    txn.rollback_to(savepoint)?;
                }
            }
        }
        Ok(())
    }

    /// Writes every member's update, then keeps the result only if the
    /// members verify.
    fn apply_together(
        &self,
        txn: &mut WriteTransaction<'_>,
        set: &ConflictSet,
        pending: &HashMap<Id, Update>,
        out: &mut SetOutcome,
    ) -> SyncResult<()> {
        let savepoint = txn.savepoint();
        let mut written = Vec::new();

        for id in &set.members {
            let Some(update) = pending.get(id) else {
                continue;
            };
            let existing = txn.get_entry(id).map(|e| (e.is_unsynced, e.base_version));
            match existing {
                Some((true, _)) => {
                    txn.rollback_to(savepoint)?;
                    return Ok(());
                }
                Some((false, base_version)) if update.version <= base_version => continue,
                _ => {}
            }
            write_update(txn, update, existing.is_some())?;
            written.push(id.clone());
        }

        match verify_entries(txn.kernel(), &written) {
            Ok(()) => {
                for id in &written {
                    out.consume(id);
                    out.touch(id);
                    out.record(id, Resolution::AppliedTogether);
                }
            }
            Err(violation) => {
                tracing::debug!(%violation, "interlocked updates do not fit together");
                txn.rollback_to(savepoint)?;
            }
        }
        Ok(())
    }

    fn precedence(&self, kernel: &Kernel, pending: &HashMap<Id, Update>, id: &Id) -> (i64, u8, Id) {
        let origin = if pending.contains_key(id) {
            Origin::Pending
        } else if kernel.get(id).is_some_and(|entry| entry.is_unsynced) {
            Origin::Local
        } else {
            Origin::Synced
        };

        let rank = match (self.policy, origin) {
            (ConflictPolicy::ClientWins, Origin::Local) => 0,
            (ConflictPolicy::ClientWins, Origin::Synced) => 1,
            (ConflictPolicy::ClientWins, Origin::Pending) => 2,
            (_, Origin::Synced) => 0,
            (_, Origin::Pending) => 1,
            (_, Origin::Local) => 2,
        };

        let recency = if self.policy == ConflictPolicy::LastWriteWins {
            let mtime = pending
                .get(id)
                .map(|update| update.mtime)
                .or_else(|| kernel.get(id).map(|entry| entry.mtime))
                .unwrap_or(0);
            mtime.saturating_neg()
        } else {
            0
        };

        (recency, rank, id.clone())
    }
}

/// Verifies the entries a resolution touched. On a violation, rolls back to
/// `savepoint` and returns false.
///
/// # Panics
///
/// In debug builds, on any violation.
fn check_invariants(
    txn: &mut WriteTransaction<'_>,
    savepoint: Savepoint,
    touched: &[Id],
) -> SyncResult<bool> {
    let Err(violation) = verify_entries(txn.kernel(), touched) else {
        return Ok(true);
    };
    if cfg!(debug_assertions) {
        panic!("conflict resolution broke a tree invariant: {violation}");
    }
    tracing::error!(%violation, "conflict resolution broke a tree invariant, rolling back");
    txn.rollback_to(savepoint)?;
    Ok(false)
}

fn pending_ids(pending: &HashMap<Id, Update>, out: &SetOutcome, except: &Id) -> HashSet<Id> {
    pending
        .keys()
        .filter(|id| *id != except && !out.consumed.contains(id))
        .cloned()
        .collect()
}

fn still_clashes(
    kernel: &Kernel,
    pending: &HashMap<Id, Update>,
    node: &TreeNode,
    by: Separation,
) -> bool {
    let view = ProposedTree::new(kernel, pending.values());
    match by {
        Separation::Name => {
            !find_name_clashes(&view, &node.parent_id, &node.name, &node.id).is_empty()
        }
        Separation::Position => node.position.is_some_and(|position| {
            !find_position_clashes(&view, &node.parent_id, position, &node.id).is_empty()
        }),
    }
}

/// Splits `name` into stem and extension (`"a.txt"` gives `("a", ".txt")`).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

/// Returns `"stem (n).ext"` with the smallest `n` free under `parent`, in
/// both the store and the proposed tree.
fn unique_name(
    kernel: &Kernel,
    pending: &HashMap<Id, Update>,
    parent: &Id,
    name: &str,
    exclude: &Id,
) -> String {
    let view = ProposedTree::new(kernel, pending.values());
    let (stem, extension) = split_extension(name);
    let mut n: u64 = 1;
    loop {
        let candidate = format!("{stem} ({n}){extension}");
        if find_name_clashes(kernel, parent, &candidate, exclude).is_empty()
            && find_name_clashes(&view, parent, &candidate, exclude).is_empty()
        {
            return candidate;
        }
        n += 1;
    }
}

/// One past the highest position claimed under `parent` in either the store
/// or the proposed tree.
fn next_free_position(kernel: &Kernel, pending: &HashMap<Id, Update>, parent: &Id) -> i64 {
    let view = ProposedTree::new(kernel, pending.values());
    live_children(kernel, parent)
        .into_iter()
        .chain(live_children(&view, parent))
        .filter_map(|node| node.position)
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

/// Returns true if the deleted entry `id` can come back without breaking
/// an invariant.
fn can_restore(kernel: &Kernel, id: &Id) -> bool {
    let Some(entry) = kernel.get(id) else {
        return false;
    };
    let parent_usable = entry.parent_id.is_root()
        || kernel
            .get(&entry.parent_id)
            .is_some_and(|parent| parent.is_live() && parent.is_dir);
    let name_free = find_name_clashes(kernel, &entry.parent_id, &entry.name, id).is_empty();
    let position_free = entry.position.map_or(true, |position| {
        find_position_clashes(kernel, &entry.parent_id, position, id).is_empty()
    });
    parent_usable && name_free && position_free
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_core::Directory;
    use treesync_testkit::prelude::*;

    fn resolve(
        dir: &Directory,
        policy: ConflictPolicy,
        sets: &[ConflictSet],
        residual: &mut Vec<Update>,
    ) -> Vec<(Id, Resolution)> {
        let mut progress = ConflictProgress::default();
        let mut wtx = dir.write();
        let resolved = ConflictResolver::new(policy)
            .resolve(&mut wtx, sets, residual, &mut progress)
            .unwrap();
        wtx.commit().unwrap();
        resolved
    }

    #[test]
    fn extension_split() {
        assert_eq!(split_extension("a.txt"), ("a", ".txt"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".profile"), (".profile", ""));
        assert_eq!(split_extension("Docs"), ("Docs", ""));
    }

    #[test]
    fn pending_loser_is_renamed() {
        let dir = Directory::open_in_memory("resolve");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        create_synced_entry(&dir, "2", docs.clone(), "a.txt", 2, false);
        create_synced_entry(&dir, "9", docs.clone(), "a (1).txt", 1, false);

        let incoming = Update::new(Id::server("3"), docs.clone(), "a.txt", 3, false);
        let mut residual = vec![incoming];
        let set = ConflictSet::new(ConflictKind::NameClash, [Id::server("2"), Id::server("3")]);
        let resolved = resolve(&dir, ConflictPolicy::ServerWins, &[set], &mut residual);

        assert_eq!(resolved, vec![(Id::server("3"), Resolution::Renamed)]);
        assert!(residual.is_empty());
        let rtx = dir.read();
        let renamed = rtx.get_entry(&Id::server("3")).unwrap();
        assert_eq!(renamed.name, "a (2).txt");
        assert!(renamed.is_unsynced);
        assert_eq!(rtx.get_entry(&Id::server("2")).unwrap().name, "a.txt");
    }

    #[test]
    fn client_wins_renames_synced_entry() {
        let dir = Directory::open_in_memory("resolve");
        let local = create_local_entry(&dir, Id::root(), "foo", false);
        let synced = create_synced_entry(&dir, "s", Id::root(), "bar", 1, false);
        {
            let mut wtx = dir.write();
            // Setters do not check siblings, so both entries now hold the name.
            wtx.mutate(&synced).unwrap().put_name("foo").unwrap();
            wtx.commit().unwrap();
        }

        let set = ConflictSet::new(ConflictKind::NameClash, [local.clone(), synced.clone()]);
        let resolved = resolve(&dir, ConflictPolicy::ClientWins, &[set], &mut Vec::new());

        assert_eq!(resolved, vec![(synced.clone(), Resolution::Renamed)]);
        let rtx = dir.read();
        assert_eq!(rtx.get_entry(&local).unwrap().name, "foo");
        assert_eq!(rtx.get_entry(&synced).unwrap().name, "foo (1)");
    }

    #[test]
    fn position_loser_moves_to_free_slot() {
        let dir = Directory::open_in_memory("resolve");
        {
            let mut wtx = dir.write();
            for (id, position) in [("p1", 0), ("p2", 4)] {
                let mut update = Update::new(Id::server(id), Id::root(), id, 1, false);
                update.position = Some(position);
                wtx.create_entry(treesync_core::EntryKernel::from_update(&update))
                    .unwrap();
            }
            wtx.commit().unwrap();
        }
        let mut incoming = Update::new(Id::server("p3"), Id::root(), "p3", 1, false);
        incoming.position = Some(4);
        let mut residual = vec![incoming];

        let set = ConflictSet::new(ConflictKind::Position, [Id::server("p2"), Id::server("p3")]);
        let resolved = resolve(&dir, ConflictPolicy::ServerWins, &[set], &mut residual);

        assert_eq!(resolved, vec![(Id::server("p3"), Resolution::Repositioned)]);
        assert_eq!(
            dir.read().get_entry(&Id::server("p3")).unwrap().position,
            Some(5)
        );
    }

    #[test]
    fn cycle_update_is_absorbed() {
        let dir = Directory::open_in_memory("resolve");
        let (a, b, c) = scenarios::nested_abc(&dir);
        let mut residual = vec![Update::new(c.clone(), a.clone(), "C", 4, true)];

        let set = ConflictSet::new(ConflictKind::Cycle, [a, b, c.clone()]);
        let resolved = resolve(&dir, ConflictPolicy::ServerWins, &[set], &mut residual);

        assert_eq!(resolved, vec![(c.clone(), Resolution::KeepLocal)]);
        assert!(residual.is_empty());
        let rtx = dir.read();
        let entry = rtx.get_entry(&c).unwrap();
        assert!(entry.parent_id.is_root());
        assert_eq!(entry.base_version, 4);
        assert!(entry.is_unsynced);
    }

    #[test]
    fn server_wins_deletes_subtree() {
        let dir = Directory::open_in_memory("resolve");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        let sub = create_synced_entry(&dir, "2", docs.clone(), "sub", 1, true);
        let leaf = create_local_entry(&dir, sub.clone(), "leaf", false);

        let mut tombstone = Update::new(docs.clone(), Id::root(), "Docs", 2, true);
        tombstone.is_deleted = true;
        let mut residual = vec![tombstone];
        let set = ConflictSet::new(ConflictKind::NonEmptyDirectory, [docs.clone(), sub.clone()]);
        let resolved = resolve(&dir, ConflictPolicy::ServerWins, &[set], &mut residual);

        assert_eq!(resolved, vec![(docs.clone(), Resolution::AcceptServer)]);
        assert_eq!(residual.len(), 1);
        let rtx = dir.read();
        assert!(rtx.get_entry(&sub).unwrap().is_deleted);
        assert!(rtx.get_entry(&leaf).unwrap().is_deleted);
        assert!(rtx.get_entry(&leaf).unwrap().is_unsynced);
        assert!(rtx.get_entry(&docs).unwrap().is_live());
    }

    #[test]
    fn server_wins_waits_for_pending_child() {
        let dir = Directory::open_in_memory("resolve");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        let sub = create_synced_entry(&dir, "2", docs.clone(), "sub", 1, true);

        let mut tombstone = Update::new(docs.clone(), Id::root(), "Docs", 2, true);
        tombstone.is_deleted = true;
        let renamed = Update::new(sub.clone(), docs.clone(), "sub2", 2, true);
        let mut residual = vec![tombstone, renamed];
        let set = ConflictSet::new(ConflictKind::NonEmptyDirectory, [docs.clone(), sub.clone()]);
        let resolved = resolve(&dir, ConflictPolicy::ServerWins, &[set], &mut residual);

        assert!(resolved.is_empty());
        assert_eq!(residual.len(), 2);
        let rtx = dir.read();
        assert!(rtx.get_entry(&sub).unwrap().is_live());
        assert!(rtx.get_entry(&docs).unwrap().is_live());
    }

    #[test]
    fn client_wins_keeps_directory() {
        let dir = Directory::open_in_memory("resolve");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        let child = create_local_entry(&dir, docs.clone(), "draft", false);

        let mut tombstone = Update::new(docs.clone(), Id::root(), "Docs", 2, true);
        tombstone.is_deleted = true;
        let mut residual = vec![tombstone];
        let set = ConflictSet::new(ConflictKind::NonEmptyDirectory, [docs.clone(), child]);
        let resolved = resolve(&dir, ConflictPolicy::ClientWins, &[set], &mut residual);

        assert_eq!(resolved, vec![(docs.clone(), Resolution::KeepLocal)]);
        assert!(residual.is_empty());
        let rtx = dir.read();
        let entry = rtx.get_entry(&docs).unwrap();
        assert!(entry.is_live());
        assert_eq!(entry.base_version, 2);
    }

    #[test]
    fn simple_conflict_by_policy() {
        let dir = Directory::open_in_memory("resolve");
        let id = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        mark_unsynced(&dir, &id);
        let update = Update::new(id.clone(), Id::root(), "Server", 3, true);
        let set = ConflictSet::new(ConflictKind::Simple, [id.clone()]);

        let mut residual = vec![update.clone()];
        let resolved = resolve(&dir, ConflictPolicy::ClientWins, &[set.clone()], &mut residual);
        assert_eq!(resolved, vec![(id.clone(), Resolution::KeepLocal)]);
        assert!(residual.is_empty());
        {
            let rtx = dir.read();
            let entry = rtx.get_entry(&id).unwrap();
            assert_eq!(entry.base_version, 3);
            assert!(entry.is_unsynced);
        }

        let newer = Update::new(id.clone(), Id::root(), "Server", 4, true);
        let mut residual = vec![newer];
        let resolved = resolve(&dir, ConflictPolicy::ServerWins, &[set], &mut residual);
        assert_eq!(resolved, vec![(id.clone(), Resolution::AcceptServer)]);
        assert_eq!(residual.len(), 1);
        assert!(!dir.read().get_entry(&id).unwrap().is_unsynced);
    }

    #[test]
    fn locally_deleted_parent_is_restored() {
        let dir = Directory::open_in_memory("resolve");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        {
            let mut wtx = dir.write();
            let mut entry = wtx.mutate(&docs).unwrap();
            entry.put_is_deleted(true).unwrap();
            entry.put_is_unsynced(true).unwrap();
            wtx.commit().unwrap();
        }
        let child = Update::new(Id::server("2"), docs.clone(), "a.txt", 1, false);
        let set = ConflictSet::new(ConflictKind::Hierarchy, [child.id.clone(), docs.clone()]);

        let mut residual = vec![child.clone()];
        let resolved = resolve(&dir, ConflictPolicy::ServerWins, &[set], &mut residual);
        assert_eq!(resolved, vec![(child.id.clone(), Resolution::AcceptServer)]);
        assert!(dir.read().get_entry(&docs).unwrap().is_live());
        assert_eq!(residual, vec![child]);
    }

    #[test]
    fn client_wins_tombstones_incoming_child() {
        let dir = Directory::open_in_memory("resolve");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        {
            let mut wtx = dir.write();
            let mut entry = wtx.mutate(&docs).unwrap();
            entry.put_is_deleted(true).unwrap();
            entry.put_is_unsynced(true).unwrap();
            wtx.commit().unwrap();
        }
        let child = Update::new(Id::server("2"), docs.clone(), "a.txt", 1, false);
        let set = ConflictSet::new(ConflictKind::Hierarchy, [child.id.clone(), docs.clone()]);

        let mut residual = vec![child.clone()];
        let resolved = resolve(&dir, ConflictPolicy::ClientWins, &[set], &mut residual);
        assert_eq!(resolved, vec![(child.id.clone(), Resolution::KeepLocal)]);
        assert!(residual.is_empty());
        let rtx = dir.read();
        assert!(rtx.get_entry(&docs).unwrap().is_deleted);
        let entry = rtx.get_entry(&child.id).unwrap();
        assert!(entry.is_deleted);
        assert!(entry.is_unsynced);
    }

    #[test]
    fn missing_parent_stays_unresolved() {
        let dir = Directory::open_in_memory("resolve");
        let orphan = Update::new(Id::server("x"), Id::server("missing"), "x", 1, false);
        let set = ConflictSet::new(ConflictKind::Hierarchy, [orphan.id.clone()]);
        let mut residual = vec![orphan];
        let resolved = resolve(&dir, ConflictPolicy::ServerWins, &[set], &mut residual);
        assert!(resolved.is_empty());
        assert_eq!(residual.len(), 1);
    }

    #[test]
    fn swap_is_applied_together() {
        let dir = Directory::open_in_memory("resolve");
        create_synced_entry(&dir, "1", Id::root(), "a", 1, false);
        create_synced_entry(&dir, "2", Id::root(), "b", 1, false);
        let mut residual = vec![
            Update::new(Id::server("1"), Id::root(), "b", 2, false),
            Update::new(Id::server("2"), Id::root(), "a", 2, false),
        ];
        let set = ConflictSet::new(ConflictKind::Interlocked, [Id::server("1"), Id::server("2")]);

        let resolved = resolve(&dir, ConflictPolicy::Manual, &[set], &mut residual);
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|(_, r)| *r == Resolution::AppliedTogether));
        assert!(residual.is_empty());
        assert_eq!(live_child_names(&dir, &Id::root()), vec!["a", "b"]);
        assert_eq!(dir.read().get_entry(&Id::server("1")).unwrap().name, "b");
        assert_tree_invariants(&dir);
    }

    #[test]
    fn manual_skips() {
        let dir = Directory::open_in_memory("resolve");
        let id = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        mark_unsynced(&dir, &id);
        let mut residual = vec![Update::new(id.clone(), Id::root(), "Server", 2, true)];
        let set = ConflictSet::new(ConflictKind::Simple, [id.clone()]);

        let resolved = resolve(&dir, ConflictPolicy::Manual, &[set], &mut residual);
        assert_eq!(resolved, vec![(id, Resolution::Skip)]);
        assert_eq!(residual.len(), 1);
    }
}
