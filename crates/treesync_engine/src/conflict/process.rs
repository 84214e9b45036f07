//! The conflict step of a sync cycle.

use super::{ConflictResolver, ConflictSet, ConflictSetBuilder};
use crate::applicator::UpdateApplicator;
use crate::command::{CycleOutcome, SyncerCommand, SyncerStep};
use crate::error::{SyncError, SyncResult};
use crate::session::{SyncEvent, SyncSession};
use treesync_core::BaseTransaction;

/// Builds conflict sets from the residual updates, resolves them and
/// retries the residual, until nothing is left or a round changes nothing.
///
/// Runs in one write transaction. Hitting the iteration bound fails the
/// cycle and rolls back every resolution made in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildAndProcessConflictSetsCommand;

impl SyncerCommand for BuildAndProcessConflictSetsCommand {
    fn step(&self) -> SyncerStep {
        SyncerStep::ResolveConflicts
    }

    fn execute_impl(&self, session: &mut SyncSession<'_>) -> SyncResult<CycleOutcome> {
        if session.status.residual.is_empty() {
            return Ok(CycleOutcome::Continue);
        }

        let config = session.config();
        let resolver = ConflictResolver::new(config.conflict_policy);
        let mut wtx = session.directory().write();
        let status = &mut session.status;

        let mut previous: Option<Vec<ConflictSet>> = None;
        let mut iterations = 0;
        let mut resolved = Vec::new();

        loop {
            let sets = ConflictSetBuilder::new(wtx.kernel(), &status.residual)
                .build(&status.conflict_progress);
            if sets.is_empty() {
                break;
            }
            if previous.as_ref() == Some(&sets) {
                tracing::debug!(sets = sets.len(), "conflict sets unchanged, stopping");
                break;
            }
            if iterations >= config.max_conflict_iterations {
                tracing::warn!(
                    iterations,
                    sets = sets.len(),
                    "conflict resolution did not converge"
                );
                return Err(SyncError::NonConvergence { iterations });
            }
            iterations += 1;

            resolved.extend(resolver.resolve(
                &mut wtx,
                &sets,
                &mut status.residual,
                &mut status.conflict_progress,
            )?);

            let mut applicator = UpdateApplicator::new(
                std::mem::take(&mut status.residual),
                config.max_apply_passes,
            );
            applicator.run(&mut wtx)?;
            status.conflict_progress.clear_unresolved();
            applicator.save_progress_into_session_state(status);

            previous = Some(sets);
        }

        status.conflict_iterations = iterations;
        wtx.commit()?;

        tracing::debug!(
            iterations,
            resolved = resolved.len(),
            residual = session.status.residual.len(),
            "processed conflicts"
        );
        for (id, resolution) in resolved {
            session.notify(SyncEvent::ConflictResolved { id, resolution });
        }
        Ok(CycleOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply_updates::ApplyUpdatesCommand;
    use crate::config::SyncConfig;
    use crate::conflict::{ConflictPolicy, Resolution};
    use crate::transport::MockServerConnection;
    use treesync_core::{Directory, Id, Update};
    use treesync_protocol::UpdateSource;
    use treesync_testkit::prelude::*;

    fn run_apply_and_resolve(
        dir: &Directory,
        config: &SyncConfig,
        updates: Vec<Update>,
    ) -> SyncResult<crate::session::StatusController> {
        let server = MockServerConnection::new();
        let mut session = SyncSession::new(dir, &server, config, UpdateSource::Periodic);
        session.status.updates = updates;
        ApplyUpdatesCommand.execute(&mut session)?;
        BuildAndProcessConflictSetsCommand.execute(&mut session)?;
        Ok(session.status)
    }

    #[test]
    fn duplicate_name_is_renamed_and_residual_cleared() {
        let dir = Directory::open_in_memory("process");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        create_synced_entry(&dir, "2", docs.clone(), "a.txt", 1, false);
        let config = SyncConfig::new("share");

        let status = run_apply_and_resolve(
            &dir,
            &config,
            vec![Update::new(Id::server("3"), docs.clone(), "a.txt", 1, false)],
        )
        .unwrap();

        assert!(status.residual.is_empty());
        assert_eq!(status.conflict_iterations, 1);
        assert_eq!(
            status.conflict_progress.resolved.get(&Id::server("3")),
            Some(&Resolution::Renamed)
        );
        assert_eq!(live_child_names(&dir, &docs), vec!["a (1).txt", "a.txt"]);
        assert_tree_invariants(&dir);
    }

    #[test]
    fn manual_policy_stops_after_one_round() {
        let dir = Directory::open_in_memory("process");
        let id = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        mark_unsynced(&dir, &id);
        let config = SyncConfig::new("share").with_conflict_policy(ConflictPolicy::Manual);

        let status = run_apply_and_resolve(
            &dir,
            &config,
            vec![Update::new(id.clone(), Id::root(), "Server", 2, true)],
        )
        .unwrap();

        assert_eq!(status.residual.len(), 1);
        assert_eq!(status.conflict_iterations, 1);
        assert_eq!(status.conflict_progress.conflicting_count(), 1);
        assert_eq!(dir.read().get_entry(&id).unwrap().name, "Docs");
    }

    #[test]
    fn iteration_bound_fails_the_step() {
        let dir = Directory::open_in_memory("process");
        let docs = create_synced_entry(&dir, "1", Id::root(), "Docs", 1, true);
        create_synced_entry(&dir, "2", docs.clone(), "a.txt", 1, false);
        let config = SyncConfig::new("share").with_max_conflict_iterations(0);

        let err = run_apply_and_resolve(
            &dir,
            &config,
            vec![Update::new(Id::server("3"), docs, "a.txt", 1, false)],
        )
        .unwrap_err();

        assert!(matches!(err, SyncError::NonConvergence { iterations: 0 }));
        assert!(dir.read().get_entry(&Id::server("3")).is_none());
    }
}
