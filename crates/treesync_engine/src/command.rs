//! The steps of a sync cycle.

use crate::error::SyncResult;
use crate::session::{SyncEvent, SyncSession};

/// Whether the cycle should keep going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Run the next step.
    Continue,
    /// Nothing left to do this cycle.
    Finished,
}

/// One step of a sync cycle.
pub trait SyncerCommand: Send + Sync {
    /// Which step this is.
    fn step(&self) -> SyncerStep;

    /// Runs the step.
    fn execute_impl(&self, session: &mut SyncSession<'_>) -> SyncResult<CycleOutcome>;

    /// Runs the step, reporting start and completion to the observer.
    fn execute(&self, session: &mut SyncSession<'_>) -> SyncResult<CycleOutcome> {
        let step = self.step();
        tracing::debug!(step = step.name(), "step started");
        session.notify(SyncEvent::StepStarted(step));
        let outcome = self.execute_impl(session)?;
        session.notify(SyncEvent::StepCompleted(step));
        Ok(outcome)
    }
}

/// The steps of a cycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncerStep {
    /// Fetch a batch of updates.
    DownloadUpdates,
    /// Apply the batch to the store.
    ApplyUpdates,
    /// Build and resolve conflict sets.
    ResolveConflicts,
    /// Persist the timestamp and residual updates.
    SaveProgress,
}

impl SyncerStep {
    /// Every step, in execution order.
    pub const ALL: [SyncerStep; 4] = [
        SyncerStep::DownloadUpdates,
        SyncerStep::ApplyUpdates,
        SyncerStep::ResolveConflicts,
        SyncerStep::SaveProgress,
    ];

    /// Returns the command implementing this step.
    pub fn command(self) -> &'static dyn SyncerCommand {
        match self {
            SyncerStep::DownloadUpdates => &crate::download::DownloadUpdatesCommand,
            SyncerStep::ApplyUpdates => &crate::apply_updates::ApplyUpdatesCommand,
            SyncerStep::ResolveConflicts => &crate::conflict::BuildAndProcessConflictSetsCommand,
            SyncerStep::SaveProgress => &crate::persist::SaveProgressCommand,
        }
    }

    /// Short name for logs.
    pub fn name(self) -> &'static str {
        match self {
            SyncerStep::DownloadUpdates => "download_updates",
            SyncerStep::ApplyUpdates => "apply_updates",
            SyncerStep::ResolveConflicts => "resolve_conflicts",
            SyncerStep::SaveProgress => "save_progress",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_match_steps() {
        for step in SyncerStep::ALL {
            assert_eq!(step.command().step(), step);
        }
        assert_eq!(SyncerStep::ALL[0], SyncerStep::DownloadUpdates);
        assert_eq!(SyncerStep::SaveProgress.name(), "save_progress");
    }
}
