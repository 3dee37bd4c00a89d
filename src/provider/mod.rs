//! Messaging provider trait: the seam to the external protocol client
//!
//! The protocol itself (handshake, encryption, device linking, framing)
//! lives outside this crate. Providers adapt a concrete client to
//! `MessagingProvider`: open a session, stream its events, send messages.

use crate::error::Result;
use crate::types::{ConnectionUpdate, MessageBatch, OutboundMessage};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod bridge;
pub mod memory;

/// Capacity of the per-session event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events emitted by an open client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// `connection.update`
    Connection(ConnectionUpdate),
    /// `messages.upsert`
    Messages(MessageBatch),
    /// `creds.update`, carrying the full credential blob to persist
    CredentialsUpdated(serde_json::Value),
}

/// A freshly opened client: its handle plus its event stream
///
/// The stream ends when the handle is closed or superseded.
pub struct OpenedClient {
    pub handle: Arc<dyn ClientHandle>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Core trait for messaging backends
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Open a client for `session_id`, keeping its auth state in `auth_dir`
    async fn open(&self, session_id: &str, auth_dir: &Path) -> Result<OpenedClient>;

    /// Provider name (e.g., "bridge", "memory")
    fn name(&self) -> &str;
}

/// Handle to one open client
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Send a message to `to`, returning the client-assigned message id
    async fn send(&self, to: &str, message: OutboundMessage) -> Result<String>;

    /// Address of the logged-in account, once known
    fn own_address(&self) -> Option<String>;

    /// Close the client; its event stream ends afterwards
    async fn close(&self) -> Result<()>;
}
