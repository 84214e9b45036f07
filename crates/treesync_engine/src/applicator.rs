//! Applying a batch of server updates to the store.
//!
//! Updates arrive in no particular order: a child may precede its parent, a
//! rename may precede the rename that frees its target name. The applicator
//! therefore retries the remaining updates pass after pass until a full pass
//! makes no progress (or every update is in). Whatever is left is either
//! *blocked* on another pending update or *conflicting* with committed
//! state, and is handed to conflict resolution.

use crate::conflict::ConflictKind;
use crate::error::SyncResult;
use crate::session::StatusController;
use std::collections::{HashMap, HashSet};
use treesync_core::tree::{
    find_name_clashes, find_position_clashes, live_children, would_create_cycle,
};
use treesync_core::{BaseTransaction, CoreResult, EntryKernel, Id, Update, WriteTransaction};

/// Outcome of trying one update against the current store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAttemptResponse {
    /// Applied, or already reflected in the store.
    Success,
    /// Depends on another pending update.
    Blocked {
        /// The pending update this one waits for.
        on: Id,
    },
    /// Cannot be applied without resolution.
    Conflict(ConflictKind),
}

/// Applies a batch of updates by retrying until a fixpoint.
#[derive(Debug)]
pub struct UpdateApplicator {
    pending: Vec<Update>,
    outcomes: HashMap<Id, UpdateAttemptResponse>,
    applied: Vec<Id>,
    passes: usize,
    max_passes: usize,
}

impl UpdateApplicator {
    /// Creates an applicator over `updates`.
    ///
    /// Several updates for the same entry collapse into the one with the
    /// highest version, kept at the position where the entry first appeared.
    pub fn new<I>(updates: I, max_passes: usize) -> Self
    where
        I: IntoIterator<Item = Update>,
    {
        let mut pending: Vec<Update> = Vec::new();
        let mut index: HashMap<Id, usize> = HashMap::new();
        for update in updates {
            match index.get(&update.id) {
                Some(&i) => {
                    if update.version > pending[i].version {
                        pending[i] = update;
                    }
                }
                None => {
                    index.insert(update.id.clone(), pending.len());
                    pending.push(update);
                }
            }
        }

        Self {
            pending,
            outcomes: HashMap::new(),
            applied: Vec::new(),
            passes: 0,
            max_passes,
        }
    }

    /// Runs passes until every update is applied, a pass makes no progress,
    /// or the pass cap is reached.
    pub fn run(&mut self, txn: &mut WriteTransaction<'_>) -> SyncResult<()> {
        while !self.all_updates_applied() {
            if self.passes >= self.max_passes {
                tracing::warn!(
                    passes = self.passes,
                    remaining = self.pending.len(),
                    "applicator pass cap reached"
                );
                break;
            }
            if !self.attempt_one_pass(txn)? {
                break;
            }
        }
        tracing::debug!(
            applied = self.applied.len(),
            remaining = self.pending.len(),
            passes = self.passes,
            "applicator finished"
        );
        Ok(())
    }

    /// Tries every pending update once. Returns true if any was applied.
    fn attempt_one_pass(&mut self, txn: &mut WriteTransaction<'_>) -> SyncResult<bool> {
        self.passes += 1;
        let mut pending_ids: HashSet<Id> = self.pending.iter().map(|u| u.id.clone()).collect();
        let mut still_pending = Vec::with_capacity(self.pending.len());
        let mut progress = false;

        for update in std::mem::take(&mut self.pending) {
            let response = attempt_update(txn, &update, &pending_ids)?;
            tracing::trace!(id = %update.id, ?response, pass = self.passes, "attempted update");
            if response == UpdateAttemptResponse::Success {
                pending_ids.remove(&update.id);
                self.outcomes.remove(&update.id);
                self.applied.push(update.id);
                progress = true;
            } else {
                self.outcomes.insert(update.id.clone(), response);
                still_pending.push(update);
            }
        }

        self.pending = still_pending;
        Ok(progress)
    }

    /// Returns the number of passes run.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Returns true if nothing is left pending.
    pub fn all_updates_applied(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns the updates still pending.
    pub fn residual(&self) -> &[Update] {
        &self.pending
    }

    /// Returns the latest outcome recorded for a pending update.
    pub fn outcome(&self, id: &Id) -> Option<&UpdateAttemptResponse> {
        self.outcomes.get(id)
    }

    /// Moves the results into the session: applied ids, blocked and
    /// conflicting entries, and the residual updates.
    pub fn save_progress_into_session_state(self, status: &mut StatusController) {
        status.update_progress.passes += self.passes;
        for id in self.applied {
            status.update_progress.add_applied(id);
        }
        for update in &self.pending {
            match self.outcomes.get(&update.id) {
                Some(UpdateAttemptResponse::Blocked { on }) => status
                    .conflict_progress
                    .add_blocked(update.id.clone(), on.clone()),
                Some(UpdateAttemptResponse::Conflict(kind)) => status
                    .conflict_progress
                    .add_conflicting(update.id.clone(), *kind),
                Some(UpdateAttemptResponse::Success) | None => {}
            }
        }
        status.residual = self.pending;
    }
}

/// Tries to apply one update.
///
/// `pending` holds the ids of every update not yet applied; a problem caused
/// by one of them makes this update blocked rather than conflicting. Nothing
/// is written unless the result is `Success`.
pub(crate) fn attempt_update(
    txn: &mut WriteTransaction<'_>,
    update: &Update,
    pending: &HashSet<Id>,
) -> CoreResult<UpdateAttemptResponse> {
    use UpdateAttemptResponse::{Blocked, Conflict, Success};

    if update.id.is_root() {
        return Ok(Success);
    }

    let existing = txn.get_entry(&update.id).cloned();
    if let Some(entry) = &existing {
        if update.version <= entry.base_version {
            return Ok(Success);
        }
        if entry.is_unsynced {
            return Ok(Conflict(ConflictKind::Simple));
        }
    }

    let is_pending = |id: &Id| id != &update.id && pending.contains(id);
    let blocked_or = |ids: &[Id], kind: ConflictKind| {
        match ids.iter().find(|&id| is_pending(id)) {
            Some(on) => Blocked { on: on.clone() },
            None => Conflict(kind),
        }
    };

    if update.is_deleted {
        if let Some(entry) = &existing {
            if entry.is_live() {
                let children: Vec<Id> = live_children(txn.kernel(), &update.id)
                    .into_iter()
                    .map(|node| node.id)
                    .collect();
                if !children.is_empty() {
                    return Ok(blocked_or(&children, ConflictKind::NonEmptyDirectory));
                }
            }
        }
        write_update(txn, update, existing.is_some())?;
        return Ok(Success);
    }

    if update.parent_id == update.id {
        return Ok(Conflict(ConflictKind::Cycle));
    }

    if !update.parent_id.is_root() {
        let usable = txn
            .get_entry(&update.parent_id)
            .is_some_and(|parent| parent.is_live() && parent.is_dir);
        if !usable {
            return Ok(blocked_or(
                std::slice::from_ref(&update.parent_id),
                ConflictKind::Hierarchy,
            ));
        }
    }

    if let Some(entry) = &existing {
        if entry.is_live() && entry.is_dir && !update.is_dir {
            let children: Vec<Id> = live_children(txn.kernel(), &update.id)
                .into_iter()
                .map(|node| node.id)
                .collect();
            if !children.is_empty() {
                return Ok(blocked_or(&children, ConflictKind::NonEmptyDirectory));
            }
        }
    }

    if let Some(path) = would_create_cycle(txn.kernel(), &update.id, &update.parent_id) {
        return Ok(blocked_or(&path[1..], ConflictKind::Cycle));
    }

    let clashes = find_name_clashes(txn.kernel(), &update.parent_id, &update.name, &update.id);
    if !clashes.is_empty() {
        return Ok(blocked_or(&clashes, ConflictKind::NameClash));
    }

    if let Some(position) = update.position {
        let clashes =
            find_position_clashes(txn.kernel(), &update.parent_id, position, &update.id);
        if !clashes.is_empty() {
            return Ok(blocked_or(&clashes, ConflictKind::Position));
        }
    }

    write_update(txn, update, existing.is_some())?;
    Ok(Success)
}

pub(crate) fn write_update(
    txn: &mut WriteTransaction<'_>,
    update: &Update,
    exists: bool,
) -> CoreResult<()> {
    if exists {
        txn.mutate(&update.id)?.apply_update(update)
    } else {
        txn.create_entry(EntryKernel::from_update(update)).map(|_| ())
    }
}
