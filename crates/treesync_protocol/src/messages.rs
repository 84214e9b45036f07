//! Client/server messages for downloading updates.
//!
//! The client sends one [`ClientToServerMessage`] per download and receives
//! one [`ClientToServerResponse`]. Both travel as CBOR.

use crate::codec::{from_cbor, to_cbor};
use crate::entity::SyncEntity;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// What triggered a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateSource {
    /// Unspecified.
    Unknown,
    /// The very first download for this client.
    FirstUpdate,
    /// A local change requested a sync.
    Local,
    /// The server notified the client of new changes.
    Notification,
    /// Scheduled poll.
    Periodic,
    /// Follow-up download while the server still has changes.
    Continuation,
}

impl Default for UpdateSource {
    fn default() -> Self {
        UpdateSource::Unknown
    }
}

/// Why the client is asking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUpdatesCallerInfo {
    /// Trigger of this download.
    pub source: UpdateSource,
    /// Whether the client receives push notifications.
    pub notifications_enabled: bool,
}

/// Optional features the client understands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Client honours `position_in_parent`.
    pub positions: bool,
    /// Client can receive notifications.
    pub notifications: bool,
}

/// Client identity envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    /// Client cache id.
    pub cache_guid: String,
    /// Protocol version spoken by the client.
    pub protocol_version: u16,
    /// Client capabilities.
    pub capabilities: ClientCapabilities,
}

/// Request for mutations newer than a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUpdatesMessage {
    /// Return mutations with a timestamp strictly greater than this.
    pub from_timestamp: i64,
    /// Maximum number of entities to return.
    pub batch_size: u32,
    /// Trigger information.
    pub caller_info: GetUpdatesCallerInfo,
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientToServerMessage {
    /// Account / share name.
    pub share: String,
    /// Birthday of the server store the client last synced with.
    pub store_birthday: Option<String>,
    /// Client envelope.
    pub context: ClientContext,
    /// The download request.
    pub get_updates: GetUpdatesMessage,
}

impl ClientToServerMessage {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR and validates.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let message: Self = from_cbor(bytes)?;
        message.validate()?;
        Ok(message)
    }

    /// Checks request fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessage` for an empty share, a zero batch size or a
    /// negative timestamp.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.share.is_empty() {
            return Err(ProtocolError::invalid("request without share"));
        }
        if self.get_updates.batch_size == 0 {
            return Err(ProtocolError::invalid("batch size must be positive"));
        }
        if self.get_updates.from_timestamp < 0 {
            return Err(ProtocolError::invalid("negative from_timestamp"));
        }
        Ok(())
    }
}

/// Server status for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The request succeeded.
    Success,
    /// The client's store birthday does not match the server's store.
    NotMyBirthday,
    /// The client must back off.
    Throttled,
    /// Temporary server failure.
    TransientError,
    /// Credentials were rejected.
    AuthInvalid,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// Returns true if retrying later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::Throttled | ErrorCode::TransientError)
    }
}

/// Downloaded mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUpdatesResponse {
    /// Entities in server order.
    pub entries: Vec<SyncEntity>,
    /// High-water timestamp covering `entries`.
    pub new_timestamp: i64,
    /// How many more mutations the server holds beyond this batch.
    pub changes_remaining: i64,
}

/// A server response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientToServerResponse {
    /// Status.
    pub error_code: ErrorCode,
    /// Human-readable status detail.
    pub error_message: Option<String>,
    /// Birthday of the server store.
    pub store_birthday: Option<String>,
    /// Download payload, present on success.
    pub get_updates: Option<GetUpdatesResponse>,
}

impl ClientToServerResponse {
    /// Creates a successful response.
    pub fn success(store_birthday: impl Into<String>, get_updates: GetUpdatesResponse) -> Self {
        Self {
            error_code: ErrorCode::Success,
            error_message: None,
            store_birthday: Some(store_birthday.into()),
            get_updates: Some(get_updates),
        }
    }

    /// Creates an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: code,
            error_message: Some(message.into()),
            store_birthday: None,
            get_updates: None,
        }
    }

    /// Returns true for a successful response.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_code == ErrorCode::Success
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR and validates.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let response: Self = from_cbor(bytes)?;
        response.validate()?;
        Ok(response)
    }

    /// Checks response consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessage` if a success lacks its payload, the payload
    /// holds an invalid entity, or `changes_remaining` is negative.
    pub fn validate(&self) -> ProtocolResult<()> {
        if !self.is_success() {
            return Ok(());
        }
        let updates = self
            .get_updates
            .as_ref()
            .ok_or_else(|| ProtocolError::invalid("success without get_updates payload"))?;
        if updates.changes_remaining < 0 {
            return Err(ProtocolError::invalid("negative changes_remaining"));
        }
        updates.entries.iter().try_for_each(SyncEntity::validate)
    }
}
