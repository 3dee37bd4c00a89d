//! In-memory messaging provider
//!
//! Runs entirely in-process: nothing reaches a real network. Events are
//! injected with [`MemoryProvider::emit`] and every sent message is
//! recorded, which makes it the provider of choice for tests and local
//! dry runs.

use super::{ClientEvent, ClientHandle, MessagingProvider, OpenedClient, EVENT_CHANNEL_CAPACITY};
use crate::error::{LinkError, Result};
use crate::types::OutboundMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Configuration for the in-memory provider
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// Artificial latency of `open`
    pub open_delay: Option<Duration>,

    /// Own address reported by every handle
    pub own_address: Option<String>,
}

/// A message recorded by the in-memory provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub session_id: String,
    pub to: String,
    pub message: OutboundMessage,
}

#[derive(Default)]
struct Inner {
    /// Live event senders (session_id → latest handle's sender)
    senders: RwLock<HashMap<String, mpsc::Sender<ClientEvent>>>,
    /// Number of `open` calls per session
    opens: RwLock<HashMap<String, usize>>,
    sent: RwLock<Vec<SentMessage>>,
    fail_open: AtomicBool,
    fail_send: AtomicBool,
}

/// In-memory provider; clones share state
#[derive(Clone, Default)]
pub struct MemoryProvider {
    config: MemoryConfig,
    inner: Arc<Inner>,
}

impl MemoryProvider {
    /// Create a provider with the given configuration
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Inner::default()),
        }
    }

    /// Make subsequent `open` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent sends fail
    pub fn set_fail_send(&self, fail: bool) {
        self.inner.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event to the session's current client
    ///
    /// Returns false when no live client exists for the session.
    pub async fn emit(&self, session_id: &str, event: ClientEvent) -> bool {
        let sender = read(&self.inner.senders).get(session_id).cloned();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Number of times `open` has been called for a session
    pub fn open_count(&self, session_id: &str) -> usize {
        read(&self.inner.opens).get(session_id).copied().unwrap_or(0)
    }

    /// Whether the session currently has an open client
    pub fn is_open(&self, session_id: &str) -> bool {
        read(&self.inner.senders).contains_key(session_id)
    }

    /// Messages sent through any handle, in order
    pub fn sent(&self) -> Vec<SentMessage> {
        read(&self.inner.sent).clone()
    }

    /// Messages sent to one address
    pub fn sent_to(&self, to: &str) -> Vec<SentMessage> {
        read(&self.inner.sent)
            .iter()
            .filter(|m| m.to == to)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessagingProvider for MemoryProvider {
    async fn open(&self, session_id: &str, _auth_dir: &Path) -> Result<OpenedClient> {
        *write(&self.inner.opens)
            .entry(session_id.to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.config.open_delay {
            tokio::time::sleep(delay).await;
        }

        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(LinkError::Provider(format!(
                "memory provider refused to open '{}'",
                session_id
            )));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        write(&self.inner.senders).insert(session_id.to_string(), tx.clone());

        let handle = MemoryHandle {
            session_id: session_id.to_string(),
            own_address: self.config.own_address.clone(),
            sender: tx,
            inner: self.inner.clone(),
        };

        Ok(OpenedClient {
            handle: Arc::new(handle),
            events: rx,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryHandle {
    session_id: String,
    own_address: Option<String>,
    sender: mpsc::Sender<ClientEvent>,
    inner: Arc<Inner>,
}

#[async_trait]
impl ClientHandle for MemoryHandle {
    async fn send(&self, to: &str, message: OutboundMessage) -> Result<String> {
        if self.inner.fail_send.load(Ordering::SeqCst) {
            return Err(LinkError::SendFailed {
                target: to.to_string(),
                reason: "memory provider refused to send".to_string(),
            });
        }

        write(&self.inner.sent).push(SentMessage {
            session_id: self.session_id.clone(),
            to: to.to_string(),
            message,
        });
        Ok(format!("msg-{}", uuid::Uuid::new_v4()))
    }

    fn own_address(&self) -> Option<String> {
        self.own_address.clone()
    }

    async fn close(&self) -> Result<()> {
        let mut senders = write(&self.inner.senders);
        // Only drop the registration if it still belongs to this handle
        if senders
            .get(&self.session_id)
            .is_some_and(|tx| tx.same_channel(&self.sender))
        {
            senders.remove(&self.session_id);
        }
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
