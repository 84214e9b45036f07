//! Fetching a batch of updates from the server.

use crate::command::{CycleOutcome, SyncerCommand, SyncerStep};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::{SyncEvent, SyncSession};
use treesync_core::{BaseTransaction, Id, Update};
use treesync_protocol::{
    ClientCapabilities, ClientContext, ClientToServerMessage, ErrorCode, GetUpdatesCallerInfo,
    GetUpdatesMessage, SyncEntity, UpdateSource, ROOT_ID,
};

/// Requests everything newer than the stored timestamp.
///
/// Pure fetch: the store is only read. A failed exchange bumps the
/// session's consecutive-error counter and ends the cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadUpdatesCommand;

impl SyncerCommand for DownloadUpdatesCommand {
    fn step(&self) -> SyncerStep {
        SyncerStep::DownloadUpdates
    }

    fn execute_impl(&self, session: &mut SyncSession<'_>) -> SyncResult<CycleOutcome> {
        let (timestamp, local_birthday, cache_guid, queued) = {
            let rtx = session.directory().read();
            (
                rtx.last_sync_timestamp(),
                rtx.store_birthday().map(str::to_owned),
                rtx.cache_guid().to_string(),
                rtx.kernel().unapplied().len(),
            )
        };

        let source = session.test_and_set_source();
        let message = build_request(
            session.config(),
            timestamp,
            local_birthday.clone(),
            cache_guid,
            source,
        );

        let response = match session.connection().post_client_to_server_message(&message) {
            Ok(response) => response,
            Err(e) => {
                session.status.increment_consecutive_errors();
                tracing::warn!(
                    error = %e,
                    consecutive_errors = session.status.consecutive_errors,
                    "download failed"
                );
                return Err(e);
            }
        };

        if !response.is_success() {
            session.status.increment_consecutive_errors();
            tracing::warn!(
                code = ?response.error_code,
                consecutive_errors = session.status.consecutive_errors,
                "server rejected download"
            );
            return Err(match response.error_code {
                ErrorCode::NotMyBirthday => SyncError::BirthdayMismatch {
                    local: local_birthday.unwrap_or_default(),
                    remote: response.store_birthday.unwrap_or_default(),
                },
                code => SyncError::ServerError {
                    code,
                    message: response.error_message.unwrap_or_default(),
                },
            });
        }

        if let Err(e) = response.validate() {
            session.status.increment_consecutive_errors();
            tracing::warn!(error = %e, "malformed download response");
            return Err(e.into());
        }

        if let (Some(local), Some(remote)) = (&local_birthday, &response.store_birthday) {
            if local != remote {
                session.status.increment_consecutive_errors();
                return Err(SyncError::BirthdayMismatch {
                    local: local.clone(),
                    remote: remote.clone(),
                });
            }
        }

        let get_updates = response.get_updates.unwrap_or_default();
        session.status.reset_consecutive_errors();

        let updates: Vec<Update> = get_updates.entries.iter().map(update_from_entity).collect();
        tracing::info!(
            count = updates.len(),
            from_timestamp = timestamp,
            new_timestamp = get_updates.new_timestamp,
            changes_remaining = get_updates.changes_remaining,
            "downloaded updates"
        );
        session.notify(SyncEvent::UpdatesDownloaded {
            count: updates.len(),
            changes_remaining: get_updates.changes_remaining,
        });

        let birthday_changed =
            response.store_birthday.is_some() && response.store_birthday != local_birthday;
        let nothing_to_do = updates.is_empty()
            && queued == 0
            && get_updates.new_timestamp <= timestamp
            && !birthday_changed;

        let status = &mut session.status;
        status.updates = updates;
        status.new_timestamp = Some(get_updates.new_timestamp);
        status.changes_remaining = get_updates.changes_remaining;
        status.store_birthday = response.store_birthday;

        Ok(if nothing_to_do {
            CycleOutcome::Finished
        } else {
            CycleOutcome::Continue
        })
    }
}

/// Builds the download request for the given store state.
pub fn build_request(
    config: &SyncConfig,
    from_timestamp: i64,
    store_birthday: Option<String>,
    cache_guid: String,
    source: UpdateSource,
) -> ClientToServerMessage {
    ClientToServerMessage {
        share: config.share.clone(),
        store_birthday,
        context: ClientContext {
            cache_guid,
            protocol_version: config.protocol_version,
            capabilities: ClientCapabilities {
                positions: true,
                notifications: config.notifications_enabled,
            },
        },
        get_updates: GetUpdatesMessage {
            from_timestamp,
            batch_size: config.batch_size,
            caller_info: GetUpdatesCallerInfo {
                source,
                notifications_enabled: config.notifications_enabled,
            },
        },
    }
}

/// Maps a wire id to a store id.
pub fn id_from_wire(raw: &str) -> Id {
    if raw == ROOT_ID {
        Id::root()
    } else {
        Id::server(raw)
    }
}

/// Converts a wire entity into a store update.
pub fn update_from_entity(entity: &SyncEntity) -> Update {
    Update {
        id: id_from_wire(&entity.id_string),
        parent_id: id_from_wire(&entity.parent_id_string),
        name: entity.name.clone(),
        version: entity.version,
        mtime: entity.mtime,
        is_dir: entity.folder,
        is_deleted: entity.deleted,
        position: entity.position_in_parent,
        specifics: entity.specifics.clone(),
    }
}
