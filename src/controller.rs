//! Per-session lifecycle controller
//!
//! A controller owns one session's client handle and drives its state
//! machine from the client's event stream:
//!
//! ```text
//!              initialize()
//!  ┌──────────────┐  open   ┌──────┐
//!  │ Initializing │ ──────▶ │ Open │
//!  └──────────────┘         └──────┘
//!         ▲                     │ close
//!         │ reconnect policy    ▼
//!         └──────────────── ┌────────┐  logged out  ┌─────────┐
//!                           │ Closed │ ───────────▶ │ removed │
//!                           └────────┘              └─────────┘
//! ```
//!
//! Each opened client gets a generation number. Events are only applied
//! while their generation is current, so a superseded client can never
//! move the session backwards.

use crate::command::{CommandContext, CommandRouter};
use crate::config::TimeoutsConfig;
use crate::error::{LinkError, Result};
use crate::provider::{ClientEvent, ClientHandle, MessagingProvider};
use crate::reconnect::ReconnectPolicy;
use crate::registry::SessionRegistry;
use crate::store::{CredentialSnapshot, CredentialStore};
use crate::types::{
    BatchKind, ConnectionPhase, ConnectionState, ConnectionUpdate, DisconnectReason,
    MessageBatch, OutboundMessage, SessionInfo,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Reads of a blob that fails to parse are retried this many times
const CREDENTIAL_READ_ATTEMPTS: u32 = 3;

/// Pause between credential read retries
const CREDENTIAL_READ_DELAY: Duration = Duration::from_millis(50);

/// Collaborators shared by every session
pub struct SessionDeps {
    pub provider: Arc<dyn MessagingProvider>,
    pub store: Arc<dyn CredentialStore>,
    pub router: Arc<CommandRouter>,
    pub policy: ReconnectPolicy,
    pub timeouts: TimeoutsConfig,
}

/// State machine for a single session
pub struct SessionController {
    session_id: String,
    deps: Arc<SessionDeps>,
    registry: Weak<SessionRegistry>,
    state: watch::Sender<ConnectionState>,
    client: RwLock<Option<Arc<dyn ClientHandle>>>,
    /// Serializes `initialize`
    init_lock: Mutex<()>,
    generation: AtomicU64,
    attempts: AtomicU32,
    last_qr: RwLock<Option<String>>,
    shut_down: AtomicBool,
}

impl SessionController {
    /// Create a controller in `Initializing` with no client yet
    pub fn new(
        session_id: impl Into<String>,
        deps: Arc<SessionDeps>,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Initializing);
        Arc::new(Self {
            session_id: session_id.into(),
            deps,
            registry,
            state,
            client: RwLock::new(None),
            init_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            attempts: AtomicU32::new(0),
            last_qr: RwLock::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether a client handle is currently held
    pub fn has_client(&self) -> bool {
        read(&self.client).is_some()
    }

    /// Reconnect attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Listing entry
    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        SessionInfo {
            session_id: self.session_id.clone(),
            connection_state: state,
            is_connected: state == ConnectionState::Open,
            qr: if state == ConnectionState::Open {
                None
            } else {
                read(&self.last_qr).clone()
            },
        }
    }

    /// Open a client handle unless a live one already exists
    ///
    /// Calls are serialized per session. A handle counts as live until the
    /// session reaches `Closed`, so repeated calls construct at most one.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        self.initialize_locked().await
    }

    /// Initialize a freshly registered session, unregistering it on failure
    ///
    /// The removal happens before the init lock is released, so a concurrent
    /// restart can never open a client on a controller that is leaving the
    /// registry.
    pub async fn initialize_or_unregister(self: &Arc<Self>) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        let result = self.initialize_locked().await;
        if result.is_err() {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove_if_same(&self.session_id, self);
            }
        }
        result
    }

    async fn initialize_locked(self: &Arc<Self>) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(self.init_error("session has been shut down"));
        }
        if let Some(registry) = self.registry.upgrade() {
            if !registry.is_current(&self.session_id, self) {
                return Err(self.init_error("session is no longer registered"));
            }
        }
        if self.has_client() && self.state() != ConnectionState::Closed {
            tracing::debug!(session = %self.session_id, "Client already live, skipping initialize");
            return Ok(());
        }

        self.set_state(ConnectionState::Initializing);

        let auth_dir = match self.deps.store.prepare(&self.session_id) {
            Ok(dir) => dir,
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                return Err(self.init_error(e));
            }
        };

        let open = self.deps.provider.open(&self.session_id, &auth_dir);
        let opened = match tokio::time::timeout(self.deps.timeouts.open(), open).await {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Closed);
                return Err(self.init_error(e));
            }
            Err(_) => {
                self.set_state(ConnectionState::Closed);
                return Err(self.init_error(format!(
                    "open timed out after {}s",
                    self.deps.timeouts.open_secs
                )));
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let stale = write(&self.client).replace(opened.handle);
        if let Some(stale) = stale {
            close_quietly(&self.session_id, stale).await;
        }

        self.spawn_event_loop(generation, opened.events);

        tracing::info!(
            session = %self.session_id,
            provider = %self.deps.provider.name(),
            generation,
            "Session client opened"
        );
        Ok(())
    }

    /// Reset the reconnect budget and initialize again
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.attempts.store(0, Ordering::SeqCst);
        self.initialize().await
    }

    /// Wait until the session reports `Open`
    pub async fn wait_until_open(&self, limit: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(limit, rx.wait_for(|s| *s == ConnectionState::Open))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LinkError::SessionNotFound(self.session_id.clone())),
            Err(_) => Err(LinkError::Timeout(format!(
                "session '{}' did not connect within {}s",
                self.session_id,
                limit.as_secs()
            ))),
        }
    }

    /// Send this session's credentials to `target`
    ///
    /// Sends a readable summary followed by the raw blob as a JSON document.
    /// Nothing is sent when no snapshot can be read.
    pub async fn pair_with(&self, target: &str) -> Result<()> {
        if self.state() == ConnectionState::Initializing {
            return Err(self.credentials_unavailable("session is not connected yet"));
        }

        let snapshot = self.read_credentials().await?;
        let handle = self.handle().ok_or_else(|| LinkError::SendFailed {
            target: target.to_string(),
            reason: "session has no live client".to_string(),
        })?;

        self.send(&handle, target, OutboundMessage::text(snapshot.summary(&self.session_id)))
            .await?;
        self.send(
            &handle,
            target,
            OutboundMessage::json_document(
                snapshot.raw().to_vec(),
                format!("creds-{}.json", self.session_id),
            ),
        )
        .await?;

        tracing::info!(session = %self.session_id, target = %target, "Credentials relayed");
        Ok(())
    }

    /// Handle an inbound message batch
    pub async fn on_message(&self, batch: MessageBatch) {
        if batch.kind != BatchKind::Notify {
            return;
        }
        let Some(message) = batch.messages.first() else {
            return;
        };
        let Some(text) = message.message.as_ref().and_then(|m| m.text()) else {
            return;
        };

        let sender = message.sender();
        tracing::debug!(session = %self.session_id, from = %sender, text = %text, "Message received");

        let router = self.deps.router.clone();
        if !router.is_command(text) {
            return;
        }
        let Some(reply) = router.dispatch(self, text).await else {
            return;
        };

        let Some(handle) = self.handle() else {
            tracing::warn!(session = %self.session_id, "Dropping reply, no live client");
            return;
        };
        if let Err(e) = self.send(&handle, sender, OutboundMessage::text(reply)).await {
            tracing::warn!(session = %self.session_id, to = %sender, error = %e, "Failed to send reply");
        }
    }

    /// Fold a partial credential update into the persisted blob
    pub fn on_credentials_updated(&self, update: &serde_json::Value) {
        if let Err(e) = self.deps.store.apply_update(&self.session_id, update) {
            tracing::error!(session = %self.session_id, error = %e, "Failed to persist credentials");
        }
    }

    /// Close the client and stop reacting to events
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.take_client() {
            close_quietly(&self.session_id, handle).await;
        }
        self.set_state(ConnectionState::Closed);
    }

    fn spawn_event_loop(self: &Arc<Self>, generation: u64, mut events: mpsc::Receiver<ClientEvent>) {
        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(controller) = this.upgrade() else {
                    break;
                };
                if controller.generation.load(Ordering::SeqCst) != generation {
                    tracing::debug!(
                        session = %controller.session_id,
                        generation,
                        "Ignoring event from superseded client"
                    );
                    break;
                }
                if !controller.handle_event(event).await {
                    break;
                }
            }
        });
    }

    /// Apply one event; returns false once the client is finished
    async fn handle_event(self: &Arc<Self>, event: ClientEvent) -> bool {
        match event {
            ClientEvent::Connection(update) => self.on_connection_update(update).await,
            ClientEvent::Messages(batch) => {
                self.on_message(batch).await;
                true
            }
            ClientEvent::CredentialsUpdated(blob) => {
                self.on_credentials_updated(&blob);
                true
            }
        }
    }

    async fn on_connection_update(self: &Arc<Self>, update: ConnectionUpdate) -> bool {
        if let Some(qr) = &update.qr {
            tracing::info!(session = %self.session_id, "Pairing code received, scan it to link the device");
            *write(&self.last_qr) = Some(qr.clone());
        }

        match update.connection {
            Some(ConnectionPhase::Open) => {
                self.on_open().await;
                true
            }
            Some(ConnectionPhase::Close) => {
                self.on_close(update.disconnect_reason()).await;
                false
            }
            _ => true,
        }
    }

    async fn on_open(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        *write(&self.last_qr) = None;
        self.set_state(ConnectionState::Open);
        tracing::info!(session = %self.session_id, "Session connected");

        let Some(handle) = self.handle() else {
            return;
        };
        let snapshot = match self.deps.store.load(&self.session_id) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::debug!(session = %self.session_id, "No credentials to announce yet");
                return;
            }
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "Could not read own credentials");
                return;
            }
        };
        let Some(own) = handle
            .own_address()
            .or_else(|| snapshot.me_id().map(str::to_string))
        else {
            return;
        };

        let notice = snapshot.self_notice(&self.session_id, true);
        if let Err(e) = self.send(&handle, &own, OutboundMessage::text(notice)).await {
            tracing::warn!(session = %self.session_id, error = %e, "Failed to send own credentials");
        }
    }

    async fn on_close(self: &Arc<Self>, reason: DisconnectReason) {
        self.set_state(ConnectionState::Closed);
        let client = self.take_client();

        if reason.is_terminal() {
            tracing::warn!(session = %self.session_id, "Session logged out, removing");
            if let Some(handle) = client {
                close_quietly(&self.session_id, handle).await;
            }
            if let Some(registry) = self.registry.upgrade() {
                registry.remove_if_same(&self.session_id, self);
            }
            return;
        }

        tracing::info!(session = %self.session_id, reason = ?reason, "Connection closed, reconnecting");
        if let Some(handle) = client {
            close_quietly(&self.session_id, handle).await;
        }
        self.spawn_reconnect();
    }

    /// Re-initialize in the background until it succeeds or the policy gives up
    fn spawn_reconnect(self: &Arc<Self>) {
        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(controller) = this.upgrade() else {
                    return;
                };
                let attempt = controller.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let Some(delay) = controller.deps.policy.delay_for(attempt) else {
                    tracing::warn!(
                        session = %controller.session_id,
                        attempts = attempt - 1,
                        "Reconnect attempts exhausted, session stays closed"
                    );
                    return;
                };
                drop(controller);

                tokio::time::sleep(delay).await;

                let Some(controller) = this.upgrade() else {
                    return;
                };
                if !controller.is_registered() || controller.shut_down.load(Ordering::SeqCst) {
                    return;
                }

                tracing::info!(session = %controller.session_id, attempt, "Reconnecting");
                match controller.initialize().await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(session = %controller.session_id, attempt, error = %e, "Reconnect failed")
                    }
                }
            }
        });
    }

    fn is_registered(self: &Arc<Self>) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.is_current(&self.session_id, self))
    }

    async fn read_credentials(&self) -> Result<CredentialSnapshot> {
        let mut attempt = 1;
        loop {
            match self.deps.store.load(&self.session_id) {
                Ok(Some(snapshot)) => return Ok(snapshot),
                Ok(None) => return Err(self.credentials_unavailable("no credentials saved yet")),
                Err(LinkError::Serialization(e)) if attempt < CREDENTIAL_READ_ATTEMPTS => {
                    tracing::debug!(session = %self.session_id, attempt, error = %e, "Credential blob unreadable, retrying");
                    attempt += 1;
                    tokio::time::sleep(CREDENTIAL_READ_DELAY).await;
                }
                Err(e) => return Err(self.credentials_unavailable(e)),
            }
        }
    }

    async fn send(
        &self,
        handle: &Arc<dyn ClientHandle>,
        to: &str,
        message: OutboundMessage,
    ) -> Result<String> {
        match tokio::time::timeout(self.deps.timeouts.send(), handle.send(to, message)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(LinkError::SendFailed { target, reason })) => {
                Err(LinkError::SendFailed { target, reason })
            }
            Ok(Err(e)) => Err(LinkError::SendFailed {
                target: to.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(LinkError::SendFailed {
                target: to.to_string(),
                reason: format!("timed out after {}s", self.deps.timeouts.send_secs),
            }),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(session = %self.session_id, from = %previous, to = %state, "State changed");
        }
    }

    fn handle(&self) -> Option<Arc<dyn ClientHandle>> {
        read(&self.client).clone()
    }

    fn take_client(&self) -> Option<Arc<dyn ClientHandle>> {
        write(&self.client).take()
    }

    fn init_error(&self, reason: impl std::fmt::Display) -> LinkError {
        LinkError::InitializationFailure {
            session_id: self.session_id.clone(),
            reason: reason.to_string(),
        }
    }

    fn credentials_unavailable(&self, reason: impl std::fmt::Display) -> LinkError {
        LinkError::CredentialsUnavailable {
            session_id: self.session_id.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CommandContext for SessionController {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn connection_state(&self) -> ConnectionState {
        self.state()
    }

    async fn pair_with(&self, target: &str) -> Result<()> {
        SessionController::pair_with(self, target).await
    }
}

async fn close_quietly(session_id: &str, handle: Arc<dyn ClientHandle>) {
    if let Err(e) = handle.close().await {
        tracing::warn!(session = %session_id, error = %e, "Failed to close client");
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
