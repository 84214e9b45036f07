//! Connection to the sync server.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::sync::Arc;
use treesync_protocol::{
    ClientToServerMessage, ClientToServerResponse, ErrorCode, GetUpdatesResponse, SyncEntity,
};

/// A synchronous request/response channel to the server.
///
/// Implementations own their network-level timeouts. A failed exchange is
/// reported as an error; the caller decides whether the cycle is retried.
pub trait ServerConnection: Send + Sync {
    /// Sends one message and waits for the response.
    fn post_client_to_server_message(
        &self,
        message: &ClientToServerMessage,
    ) -> SyncResult<ClientToServerResponse>;
}

impl<T: ServerConnection + ?Sized> ServerConnection for Arc<T> {
    fn post_client_to_server_message(
        &self,
        message: &ClientToServerMessage,
    ) -> SyncResult<ClientToServerResponse> {
        (**self).post_client_to_server_message(message)
    }
}

#[derive(Debug)]
struct MockState {
    log: Vec<(i64, SyncEntity)>,
    next_timestamp: i64,
    birthday: String,
    batch_limit: Option<usize>,
    failures_remaining: u32,
    error_code: Option<ErrorCode>,
    requests: Vec<ClientToServerMessage>,
}

/// An in-memory server for tests.
///
/// Keeps a change log where every pushed entity gets the next timestamp,
/// and answers downloads with the entities newer than the request's
/// `from_timestamp`.
#[derive(Debug)]
pub struct MockServerConnection {
    state: Mutex<MockState>,
}

impl MockServerConnection {
    /// Creates an empty server with birthday `"birthday-1"`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                log: Vec::new(),
                next_timestamp: 1,
                birthday: "birthday-1".into(),
                batch_limit: None,
                failures_remaining: 0,
                error_code: None,
                requests: Vec::new(),
            }),
        }
    }

    /// Appends an entity to the change log and returns its timestamp.
    pub fn push_entity(&self, entity: SyncEntity) -> i64 {
        let mut state = self.state.lock();
        let timestamp = state.next_timestamp;
        state.next_timestamp += 1;
        state.log.push((timestamp, entity));
        timestamp
    }

    /// Appends several entities in order.
    pub fn push_entities<I: IntoIterator<Item = SyncEntity>>(&self, entities: I) {
        for entity in entities {
            self.push_entity(entity);
        }
    }

    /// Caps the number of entities per response, below the request's batch size.
    pub fn set_batch_limit(&self, limit: Option<usize>) {
        self.state.lock().batch_limit = limit;
    }

    /// Makes the next `count` requests fail at the transport level.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_remaining = count;
    }

    /// Answers every request with `code` until cleared.
    pub fn set_error_code(&self, code: Option<ErrorCode>) {
        self.state.lock().error_code = code;
    }

    /// Replaces the store birthday, as if the server store was reset.
    pub fn set_birthday(&self, birthday: impl Into<String>) {
        self.state.lock().birthday = birthday.into();
    }

    /// Returns every request received, failed ones included.
    pub fn requests(&self) -> Vec<ClientToServerMessage> {
        self.state.lock().requests.clone()
    }

    /// Returns the number of requests received.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Returns the latest timestamp handed out.
    pub fn latest_timestamp(&self) -> i64 {
        self.state.lock().next_timestamp - 1
    }

    fn respond(&self, message: &ClientToServerMessage) -> SyncResult<ClientToServerResponse> {
        let mut state = self.state.lock();
        state.requests.push(message.clone());

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(SyncError::transport("injected transport failure"));
        }
        if let Some(code) = state.error_code {
            return Ok(ClientToServerResponse::error(code, "injected error"));
        }
        if let Some(local) = &message.store_birthday {
            if *local != state.birthday {
                return Ok(ClientToServerResponse::error(
                    ErrorCode::NotMyBirthday,
                    "store was reset",
                ));
            }
        }

        let from = message.get_updates.from_timestamp;
        let mut limit = message.get_updates.batch_size as usize;
        if let Some(cap) = state.batch_limit {
            limit = limit.min(cap);
        }

        let newer: Vec<&(i64, SyncEntity)> =
            state.log.iter().filter(|(ts, _)| *ts > from).collect();
        let taken = newer.len().min(limit);
        let new_timestamp = if taken == 0 { from } else { newer[taken - 1].0 };
        let entries: Vec<SyncEntity> = newer[..taken].iter().map(|(_, e)| e.clone()).collect();

        Ok(ClientToServerResponse::success(
            state.birthday.clone(),
            GetUpdatesResponse {
                entries,
                new_timestamp,
                changes_remaining: (newer.len() - taken) as i64,
            },
        ))
    }
}

impl Default for MockServerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConnection for MockServerConnection {
    fn post_client_to_server_message(
        &self,
        message: &ClientToServerMessage,
    ) -> SyncResult<ClientToServerResponse> {
        message.validate()?;
        self.respond(message)
    }
}
