//! # treesync protocol
//!
//! Wire records and messages exchanged with the sync server.
//!
//! This crate provides:
//! - [`SyncEntity`], the wire form of a tree entry
//! - Download request and response messages
//! - CBOR encoding/decoding with validation
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod entity;
mod error;
mod messages;

pub use codec::{from_cbor, to_cbor};
pub use entity::{SyncEntity, ROOT_ID};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ClientCapabilities, ClientContext, ClientToServerMessage, ClientToServerResponse, ErrorCode,
    GetUpdatesCallerInfo, GetUpdatesMessage, GetUpdatesResponse, UpdateSource, PROTOCOL_VERSION,
};
