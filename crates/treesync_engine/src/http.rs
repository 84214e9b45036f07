//! HTTP connection.
//!
//! The actual HTTP client is abstracted via a trait so any library (or an
//! in-process loopback) can carry the CBOR bodies.

use crate::error::{SyncError, SyncResult};
use crate::transport::{MockServerConnection, ServerConnection};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use treesync_protocol::{ClientToServerMessage, ClientToServerResponse};

/// Path that download requests are posted to.
pub const COMMAND_PATH: &str = "/sync/command";

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// [`ServerConnection`] posting CBOR bodies over HTTP.
pub struct HttpConnection<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpConnection<C> {
    /// Creates a new HTTP connection.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Checks if the connection is usable.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Marks the connection usable again after a failure.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl<C: HttpClient> ServerConnection for HttpConnection<C> {
    fn post_client_to_server_message(
        &self,
        message: &ClientToServerMessage,
    ) -> SyncResult<ClientToServerResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = message.encode()?;
        let url = format!("{}{}", self.base_url, COMMAND_PATH);
        let response_body = self.client.post(&url, body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            self.connected.store(false, Ordering::SeqCst);
            SyncError::transport(e)
        })?;

        *self.last_error.write() = None;
        Ok(ClientToServerResponse::decode(&response_body)?)
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to a server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

impl LoopbackServer for MockServerConnection {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        if path != COMMAND_PATH {
            return Err(format!("unknown path {path}"));
        }
        let message = ClientToServerMessage::decode(body).map_err(|e| e.to_string())?;
        let response = self
            .post_client_to_server_message(&message)
            .map_err(|e| e.to_string())?;
        response.encode().map_err(|e| e.to_string())
    }
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for std::sync::Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        (**self).handle_post(path, body)
    }
}
