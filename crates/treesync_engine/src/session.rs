//! Per-cycle session state.

use crate::command::SyncerStep;
use crate::config::SyncConfig;
use crate::conflict::{ConflictKind, Resolution};
use crate::transport::ServerConnection;
use std::collections::BTreeMap;
use treesync_core::{Directory, Id, Update};
use treesync_protocol::UpdateSource;

/// Something that happened during a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A step is about to run.
    StepStarted(SyncerStep),
    /// A step finished successfully.
    StepCompleted(SyncerStep),
    /// A batch arrived from the server.
    UpdatesDownloaded {
        /// Entities in the batch.
        count: usize,
        /// Changes the server still holds.
        changes_remaining: i64,
    },
    /// The resolver settled one entry.
    ConflictResolved {
        /// Entry id.
        id: Id,
        /// What was done.
        resolution: Resolution,
    },
    /// The cycle ran every step.
    CycleCompleted {
        /// Updates applied this cycle.
        applied: usize,
        /// Entries left conflicting.
        conflicting: usize,
        /// Entries left blocked.
        blocked: usize,
    },
}

/// Receives [`SyncEvent`]s as a cycle runs.
///
/// Called on the syncing thread, between store transactions.
pub trait SyncObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &SyncEvent);
}

/// Updates applied so far this cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateProgress {
    /// Ids whose updates were applied (no-ops included), in order.
    pub applied: Vec<Id>,
    /// Applicator passes run.
    pub passes: usize,
}

impl UpdateProgress {
    /// Records an applied update.
    pub fn add_applied(&mut self, id: Id) {
        self.applied.push(id);
    }

    /// Number of applied updates.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Outstanding and settled conflicts for this cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictProgress {
    /// Updates that cannot be applied as-is, by target id.
    pub conflicting: BTreeMap<Id, ConflictKind>,
    /// Updates waiting on another pending update, by target id.
    pub blocked: BTreeMap<Id, Id>,
    /// Entries the resolver settled.
    pub resolved: BTreeMap<Id, Resolution>,
}

impl ConflictProgress {
    /// Records a conflicting update.
    pub fn add_conflicting(&mut self, id: Id, kind: ConflictKind) {
        self.blocked.remove(&id);
        self.conflicting.insert(id, kind);
    }

    /// Records an update blocked on `on`.
    pub fn add_blocked(&mut self, id: Id, on: Id) {
        self.conflicting.remove(&id);
        self.blocked.insert(id, on);
    }

    /// Records a resolution.
    pub fn add_resolved(&mut self, id: Id, resolution: Resolution) {
        self.resolved.insert(id, resolution);
    }

    /// Forgets conflicting and blocked entries; resolutions are kept.
    pub fn clear_unresolved(&mut self) {
        self.conflicting.clear();
        self.blocked.clear();
    }

    /// Number of conflicting updates.
    pub fn conflicting_count(&self) -> usize {
        self.conflicting.len()
    }

    /// Number of blocked updates.
    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    /// Number of settled entries.
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    /// Returns true if any update is still conflicting or blocked.
    pub fn has_unresolved(&self) -> bool {
        !self.conflicting.is_empty() || !self.blocked.is_empty()
    }

    /// Returns the recorded conflict kind for `id`.
    pub fn conflict_kind(&self, id: &Id) -> Option<ConflictKind> {
        self.conflicting.get(id).copied()
    }

    /// Returns what `id` is blocked on.
    pub fn blocked_on(&self, id: &Id) -> Option<&Id> {
        self.blocked.get(id)
    }
}

/// Mutable state carried between the steps of one cycle.
#[derive(Debug, Clone, Default)]
pub struct StatusController {
    /// Updates downloaded this cycle.
    pub updates: Vec<Update>,
    /// Timestamp the server reported for this batch.
    pub new_timestamp: Option<i64>,
    /// Changes the server still holds after this batch.
    pub changes_remaining: i64,
    /// Birthday the server reported.
    pub store_birthday: Option<String>,
    /// Updates neither applied nor resolved.
    pub residual: Vec<Update>,
    /// Applied updates.
    pub update_progress: UpdateProgress,
    /// Conflict bookkeeping.
    pub conflict_progress: ConflictProgress,
    /// Failed downloads in a row, as known to this session.
    pub consecutive_errors: u32,
    /// Build/resolve iterations run.
    pub conflict_iterations: usize,
}

impl StatusController {
    /// Creates a controller seeded with the syncer's error counter.
    pub fn new(consecutive_errors: u32) -> Self {
        Self {
            consecutive_errors,
            ..Self::default()
        }
    }

    /// Records a failed download.
    pub fn increment_consecutive_errors(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    /// Clears the failure counter after a good response.
    pub fn reset_consecutive_errors(&mut self) {
        self.consecutive_errors = 0;
    }
}

/// Everything a step needs for one cycle.
///
/// Borrowed collaborators plus the cycle's [`StatusController`]. Steps
/// never keep a transaction open across each other.
pub struct SyncSession<'a> {
    directory: &'a Directory,
    connection: &'a dyn ServerConnection,
    config: &'a SyncConfig,
    observer: Option<&'a dyn SyncObserver>,
    source: UpdateSource,
    /// Cycle state.
    pub status: StatusController,
}

impl<'a> SyncSession<'a> {
    /// Creates a session.
    pub fn new(
        directory: &'a Directory,
        connection: &'a dyn ServerConnection,
        config: &'a SyncConfig,
        source: UpdateSource,
    ) -> Self {
        Self {
            directory,
            connection,
            config,
            observer: None,
            source,
            status: StatusController::default(),
        }
    }

    /// Attaches an observer.
    pub fn with_observer(mut self, observer: &'a dyn SyncObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Seeds the failure counter.
    pub fn with_consecutive_errors(mut self, errors: u32) -> Self {
        self.status = StatusController::new(errors);
        self
    }

    /// Returns the directory being synced.
    pub fn directory(&self) -> &'a Directory {
        self.directory
    }

    /// Returns the server connection.
    pub fn connection(&self) -> &'a dyn ServerConnection {
        self.connection
    }

    /// Returns the configuration.
    pub fn config(&self) -> &'a SyncConfig {
        self.config
    }

    /// Returns the source of the next request and resets it to
    /// [`UpdateSource::Continuation`].
    pub fn test_and_set_source(&mut self) -> UpdateSource {
        std::mem::replace(&mut self.source, UpdateSource::Continuation)
    }

    /// Sends `event` to the observer, if any.
    pub fn notify(&self, event: SyncEvent) {
        if let Some(observer) = self.observer {
            observer.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockServerConnection;

    #[test]
    fn source_resets_to_continuation() {
        let dir = Directory::open_in_memory("session");
        let server = MockServerConnection::new();
        let config = SyncConfig::new("share");
        let mut session = SyncSession::new(&dir, &server, &config, UpdateSource::Local);

        assert_eq!(session.test_and_set_source(), UpdateSource::Local);
        assert_eq!(session.test_and_set_source(), UpdateSource::Continuation);
    }

    #[test]
    fn conflict_progress_bookkeeping() {
        let mut progress = ConflictProgress::default();
        let a = Id::server("a");
        progress.add_blocked(a.clone(), Id::server("p"));
        assert_eq!(progress.blocked_on(&a), Some(&Id::server("p")));

        progress.add_conflicting(a.clone(), ConflictKind::Hierarchy);
        assert_eq!(progress.blocked_count(), 0);
        assert_eq!(progress.conflict_kind(&a), Some(ConflictKind::Hierarchy));

        progress.add_resolved(Id::server("b"), Resolution::Renamed);
        progress.clear_unresolved();
        assert!(!progress.has_unresolved());
        assert_eq!(progress.resolved_count(), 1);
    }

    #[test]
    fn error_counter_saturates() {
        let mut status = StatusController::new(u32::MAX - 1);
        status.increment_consecutive_errors();
        status.increment_consecutive_errors();
        assert_eq!(status.consecutive_errors, u32::MAX);
        status.reset_consecutive_errors();
        assert_eq!(status.consecutive_errors, 0);
    }
}
