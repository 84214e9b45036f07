//! Persisting the cycle's progress.

use crate::command::{CycleOutcome, SyncerCommand, SyncerStep};
use crate::error::SyncResult;
use crate::session::SyncSession;
use treesync_core::BaseTransaction;

/// Stores the residual updates and advances the sync timestamp.
///
/// This is the only step that moves the timestamp, so a cycle that fails
/// earlier downloads the same batch again next time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveProgressCommand;

impl SyncerCommand for SaveProgressCommand {
    fn step(&self) -> SyncerStep {
        SyncerStep::SaveProgress
    }

    fn execute_impl(&self, session: &mut SyncSession<'_>) -> SyncResult<CycleOutcome> {
        let directory = session.directory();
        let status = &session.status;
        let mut wtx = directory.write();

        wtx.replace_unapplied(status.residual.iter().cloned());
        if let Some(timestamp) = status.new_timestamp {
            if timestamp > wtx.last_sync_timestamp() {
                wtx.set_last_sync_timestamp(timestamp);
            }
        }
        if status.store_birthday.is_some() {
            wtx.set_store_birthday(status.store_birthday.clone());
        }
        wtx.commit()?;

        tracing::debug!(
            timestamp = directory.last_sync_timestamp(),
            queued = status.residual.len(),
            "saved progress"
        );
        Ok(CycleOutcome::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::transport::MockServerConnection;
    use treesync_core::{Directory, Id, Update};
    use treesync_protocol::UpdateSource;

    #[test]
    fn timestamp_only_moves_forward() {
        let dir = Directory::open_in_memory("persist");
        {
            let mut wtx = dir.write();
            wtx.set_last_sync_timestamp(10);
            wtx.commit().unwrap();
        }
        let server = MockServerConnection::new();
        let config = SyncConfig::new("share");
        let mut session = SyncSession::new(&dir, &server, &config, UpdateSource::Periodic);
        session.status.new_timestamp = Some(4);
        session.status.store_birthday = Some("b".into());
        let leftover = Update::new(Id::server("x"), Id::server("gone"), "x", 1, false);
        session.status.residual = vec![leftover.clone()];

        let outcome = SaveProgressCommand.execute(&mut session).unwrap();
        assert_eq!(outcome, CycleOutcome::Finished);

        let rtx = dir.read();
        assert_eq!(rtx.last_sync_timestamp(), 10);
        assert_eq!(rtx.store_birthday(), Some("b"));
        assert_eq!(rtx.unapplied_updates(), vec![leftover]);
    }
}
