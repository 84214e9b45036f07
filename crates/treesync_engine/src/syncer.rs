//! The syncer: runs cycles against a directory and a server.

use crate::command::{CycleOutcome, SyncerStep};
use crate::config::SyncConfig;
use crate::conflict::Resolution;
use crate::error::{SyncError, SyncResult};
use crate::session::{SyncEvent, SyncObserver, SyncSession};
use crate::transport::ServerConnection;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use treesync_core::{BaseTransaction, Directory};
use treesync_protocol::UpdateSource;

/// The current state of the syncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Fetching a batch from the server.
    Downloading,
    /// Applying the batch.
    Applying,
    /// Building and resolving conflict sets.
    Resolving,
    /// Persisting the timestamp and residual updates.
    Saving,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
    /// Waiting before a retry.
    RetryWait,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Downloading | SyncState::Applying | SyncState::Resolving | SyncState::Saving
        )
    }

    /// Returns true if a new sync can start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }

    fn for_step(step: SyncerStep) -> Self {
        match step {
            SyncerStep::DownloadUpdates => SyncState::Downloading,
            SyncerStep::ApplyUpdates => SyncState::Applying,
            SyncerStep::ResolveConflicts => SyncState::Resolving,
            SyncerStep::SaveProgress => SyncState::Saving,
        }
    }
}

/// Totals across the syncer's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Entities downloaded.
    pub updates_downloaded: u64,
    /// Updates applied.
    pub updates_applied: u64,
    /// Conflicts settled by the resolver.
    pub conflicts_resolved: u64,
    /// Retries made by [`Syncer::sync_with_retry`].
    pub retries: u64,
    /// Last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one cycle, or the sum of several.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Entities downloaded.
    pub downloaded: usize,
    /// Updates applied.
    pub applied: usize,
    /// Entries left conflicting.
    pub conflicting: usize,
    /// Entries left blocked.
    pub blocked: usize,
    /// Entries settled by the resolver, skips excluded.
    pub resolved: usize,
    /// Build/resolve iterations run.
    pub conflict_iterations: usize,
    /// Changes the server still holds.
    pub changes_remaining: i64,
    /// Cycles run.
    pub cycles: u32,
    /// Whether every cycle completed.
    pub success: bool,
    /// Wall time.
    pub duration: Duration,
}

impl SyncCycleResult {
    fn absorb(&mut self, cycle: &SyncCycleResult) {
        self.downloaded += cycle.downloaded;
        self.applied += cycle.applied;
        self.resolved += cycle.resolved;
        self.conflict_iterations += cycle.conflict_iterations;
        self.cycles += cycle.cycles;
        // Conflicting and blocked entries carry over between cycles.
        self.conflicting = cycle.conflicting;
        self.blocked = cycle.blocked;
        self.changes_remaining = cycle.changes_remaining;
        self.success = cycle.success;
    }
}

/// Cancels a running sync from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation. The running cycle stops before its next step.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Keeps one [`Directory`] in step with a server.
///
/// A cycle is download, apply, resolve conflicts, save progress. Each step
/// runs in its own transaction; the timestamp only advances in the last
/// one, so an interrupted cycle is repeated in full.
pub struct Syncer<C: ServerConnection> {
    config: SyncConfig,
    directory: Arc<Directory>,
    connection: C,
    observer: Option<Arc<dyn SyncObserver>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: Arc<AtomicBool>,
    consecutive_errors: AtomicU32,
    pending_source: Mutex<Option<UpdateSource>>,
}

impl<C: ServerConnection> Syncer<C> {
    /// Creates a syncer.
    pub fn new(config: SyncConfig, directory: Arc<Directory>, connection: C) -> Self {
        Self {
            config,
            directory,
            connection,
            observer: None,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            consecutive_errors: AtomicU32::new(0),
            pending_source: Mutex::new(None),
        }
    }

    /// Attaches an observer for [`SyncEvent`]s.
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the directory being synced.
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Returns the server connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Failed downloads in a row.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// Suggested wait before the next cycle, from the failure count.
    pub fn next_retry_delay(&self) -> Duration {
        self.retry_delay(self.consecutive_errors())
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let seed = self.directory.read().cache_guid().as_u128();
        self.config.retry.delay_for_attempt(attempt, seed)
    }

    /// Records what should trigger the next download.
    pub fn nudge(&self, source: UpdateSource) {
        *self.pending_source.lock() = Some(source);
    }

    /// Cancels any ongoing sync.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns a handle that cancels this syncer.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn check_can_start(&self) -> SyncResult<()> {
        let state = self.state();
        if state.can_start_sync() {
            Ok(())
        } else {
            Err(SyncError::InvalidStateTransition {
                from: format!("{state:?}"),
                to: "sync".into(),
            })
        }
    }

    fn take_source(&self) -> UpdateSource {
        self.pending_source.lock().take().unwrap_or_else(|| {
            if self.directory.last_sync_timestamp() == 0 {
                UpdateSource::FirstUpdate
            } else {
                UpdateSource::Periodic
            }
        })
    }

    /// Runs one cycle.
    pub fn sync_cycle(&self) -> SyncResult<SyncCycleResult> {
        self.reset_cancel();
        self.check_can_start()?;
        let source = self.take_source();
        let result = self.run_cycle(source)?;
        self.set_state(SyncState::Synced);
        Ok(result)
    }

    /// Runs cycles until the server reports no remaining changes, up to
    /// `max_cycles_per_sync`.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.reset_cancel();
        self.check_can_start()?;

        let mut source = self.take_source();
        let mut total = SyncCycleResult::default();
        for _ in 0..self.config.max_cycles_per_sync.max(1) {
            let cycle = self.run_cycle(source)?;
            total.absorb(&cycle);
            if cycle.changes_remaining <= 0 {
                break;
            }
            source = UpdateSource::Continuation;
        }
        if total.changes_remaining > 0 {
            tracing::debug!(
                cycles = total.cycles,
                changes_remaining = total.changes_remaining,
                "cycle cap reached with changes remaining"
            );
        }

        total.duration = start.elapsed();
        self.set_state(SyncState::Synced);
        Ok(total)
    }

    /// Runs [`sync`](Self::sync), retrying transient errors per the retry
    /// configuration.
    ///
    /// At least one attempt is made; the error of the last attempt is
    /// returned once attempts run out.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    tracing::debug!(error = %e, attempt, "sync failed, retrying");
                }
                Err(e) => return Err(e),
            }

            attempt += 1;
            self.set_state(SyncState::RetryWait);
            std::thread::sleep(self.retry_delay(attempt));
            self.stats.write().retries += 1;
            self.set_state(SyncState::Error);
        }
    }

    fn run_cycle(&self, source: UpdateSource) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let mut session = SyncSession::new(&self.directory, &self.connection, &self.config, source)
            .with_consecutive_errors(self.consecutive_errors());
        if let Some(observer) = self.observer.as_deref() {
            session = session.with_observer(observer);
        }

        let outcome = self.run_steps(&mut session);
        self.consecutive_errors
            .store(session.status.consecutive_errors, Ordering::SeqCst);

        if let Err(e) = outcome {
            self.handle_error(&e);
            return Err(e);
        }

        let status = &session.status;
        let result = SyncCycleResult {
            downloaded: status.updates.len(),
            applied: status.update_progress.applied_count(),
            conflicting: status.conflict_progress.conflicting_count(),
            blocked: status.conflict_progress.blocked_count(),
            resolved: status
                .conflict_progress
                .resolved
                .values()
                .filter(|r| **r != Resolution::Skip)
                .count(),
            conflict_iterations: status.conflict_iterations,
            changes_remaining: status.changes_remaining,
            cycles: 1,
            success: true,
            duration: start.elapsed(),
        };

        session.notify(SyncEvent::CycleCompleted {
            applied: result.applied,
            conflicting: result.conflicting,
            blocked: result.blocked,
        });
        tracing::info!(
            ?source,
            downloaded = result.downloaded,
            applied = result.applied,
            conflicting = result.conflicting,
            blocked = result.blocked,
            resolved = result.resolved,
            "sync cycle completed"
        );

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.updates_downloaded += result.downloaded as u64;
            stats.updates_applied += result.applied as u64;
            stats.conflicts_resolved += result.resolved as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }

        Ok(result)
    }

    fn run_steps(&self, session: &mut SyncSession<'_>) -> SyncResult<()> {
        for step in SyncerStep::ALL {
            self.check_cancelled()?;
            self.set_state(SyncState::for_step(step));
            if step.command().execute(session)? == CycleOutcome::Finished {
                break;
            }
        }
        Ok(())
    }

    fn handle_error(&self, error: &SyncError) {
        if matches!(error, SyncError::Cancelled) {
            tracing::info!("sync cancelled");
            self.set_state(SyncState::Idle);
            return;
        }
        tracing::warn!(
            error = %error,
            consecutive_errors = self.consecutive_errors(),
            "sync cycle failed"
        );
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}
