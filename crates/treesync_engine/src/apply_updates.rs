//! Applying the downloaded batch.

use crate::applicator::UpdateApplicator;
use crate::command::{CycleOutcome, SyncerCommand, SyncerStep};
use crate::error::SyncResult;
use crate::session::SyncSession;
use treesync_core::BaseTransaction;

/// Runs the [`UpdateApplicator`] over the queued and downloaded updates in
/// one write transaction.
///
/// Updates queued by earlier cycles go first; the applicator keeps the
/// highest version per entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyUpdatesCommand;

impl SyncerCommand for ApplyUpdatesCommand {
    fn step(&self) -> SyncerStep {
        SyncerStep::ApplyUpdates
    }

    fn execute_impl(&self, session: &mut SyncSession<'_>) -> SyncResult<CycleOutcome> {
        let directory = session.directory();
        let max_passes = session.config().max_apply_passes;
        let mut wtx = directory.write();

        let mut updates = wtx.unapplied_updates();
        updates.extend(session.status.updates.iter().cloned());
        let mut applicator = UpdateApplicator::new(updates, max_passes);
        applicator.run(&mut wtx)?;

        session.status.conflict_progress.clear_unresolved();
        applicator.save_progress_into_session_state(&mut session.status);
        wtx.commit()?;

        let status = &session.status;
        tracing::debug!(
            applied = status.update_progress.applied_count(),
            conflicting = status.conflict_progress.conflicting_count(),
            blocked = status.conflict_progress.blocked_count(),
            "applied updates"
        );
        Ok(CycleOutcome::Continue)
    }
}
