//! Link service: the composition root behind the HTTP surface
//!
//! Owns the registry and the collaborators every session shares, and turns
//! control requests into registry and controller calls.

use crate::command::CommandRouter;
use crate::config::LinkConfig;
use crate::controller::{SessionController, SessionDeps};
use crate::error::{LinkError, Result};
use crate::provider::MessagingProvider;
use crate::registry::SessionRegistry;
use crate::store::{validate_session_id, CredentialStore};
use crate::types::{address_for, normalize_number, ConnectionState, SessionInfo};
use std::sync::Arc;

/// How a start request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was registered and initialized
    Created,
    /// The session already existed and was left alone
    Existing,
    /// The session existed but was closed, so it was initialized again
    Restarted,
}

/// Session lifecycle service
pub struct LinkService {
    registry: Arc<SessionRegistry>,
    deps: Arc<SessionDeps>,
    default_session_id: String,
    address_domain: String,
}

impl LinkService {
    pub fn new(
        deps: SessionDeps,
        default_session_id: impl Into<String>,
        address_domain: impl Into<String>,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            deps: Arc::new(deps),
            default_session_id: default_session_id.into(),
            address_domain: address_domain.into(),
        }
    }

    /// Build a service from configuration and concrete collaborators
    pub fn from_config(
        config: &LinkConfig,
        provider: Arc<dyn MessagingProvider>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let router = CommandRouter::new(
            config.sessions.command_prefix.clone(),
            config.sessions.address_domain.clone(),
        );
        Self::new(
            SessionDeps {
                provider,
                store,
                router: Arc::new(router),
                policy: config.reconnect.clone(),
                timeouts: config.timeouts.clone(),
            },
            config.sessions.default_session_id.clone(),
            config.sessions.address_domain.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn provider_name(&self) -> &str {
        self.deps.provider.name()
    }

    /// Start a session, or confirm it is already running
    ///
    /// Concurrent calls for one id share a single controller and open one
    /// client. A fresh session that fails to initialize is unregistered.
    pub async fn start_session(&self, session_id: Option<&str>) -> Result<(String, StartOutcome)> {
        let session_id = session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(self.default_session_id.as_str())
            .to_string();
        validate_session_id(&session_id)?;

        loop {
            let (session, created) = self.registry.get_or_create(&session_id, || {
                SessionController::new(
                    session_id.clone(),
                    self.deps.clone(),
                    Arc::downgrade(&self.registry),
                )
            });

            if created {
                if let Err(e) = session.initialize_or_unregister().await {
                    tracing::error!(session = %session_id, error = %e, "Session failed to start");
                    return Err(e);
                }
                tracing::info!(session = %session_id, "Session started");
                return Ok((session_id, StartOutcome::Created));
            }

            if session.state() == ConnectionState::Closed && !session.has_client() {
                tracing::info!(session = %session_id, "Restarting closed session");
                match session.restart().await {
                    Ok(()) => return Ok((session_id, StartOutcome::Restarted)),
                    // a failed create unregistered it meanwhile; start over
                    Err(_) if !self.registry.is_current(&session_id, &session) => continue,
                    Err(e) => return Err(e),
                }
            }

            return Ok((session_id, StartOutcome::Existing));
        }
    }

    /// Relay a session's credentials to a phone number
    ///
    /// Returns the normalized digits the credentials were sent to.
    pub async fn pair(&self, session_id: &str, phone_number: &str) -> Result<String> {
        let session = self.registry.get(session_id)?;
        let digits = normalize_number(phone_number);
        if digits.is_empty() {
            return Err(LinkError::InvalidRequest(
                "Phone number must contain digits".to_string(),
            ));
        }

        session
            .pair_with(&address_for(&digits, &self.address_domain))
            .await?;
        Ok(digits)
    }

    /// Start a session named after a phone number and deliver its
    /// credentials to that number once connected
    pub async fn generate_session(&self, number: &str) -> Result<String> {
        let digits = normalize_number(number);
        if digits.is_empty() {
            return Err(LinkError::InvalidRequest("Phone number required".to_string()));
        }

        let (session_id, _) = self.start_session(Some(&digits)).await?;
        let session = self.registry.get(&session_id)?;
        session
            .wait_until_open(self.deps.timeouts.connect_wait())
            .await?;
        session
            .pair_with(&address_for(&digits, &self.address_domain))
            .await?;

        tracing::info!(session = %session_id, "Session generated and delivered");
        Ok(session_id)
    }

    /// All sessions, ordered by id
    pub fn list(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    /// Close every client and forget every session
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|s| s.shutdown())).await;
        tracing::info!(sessions = count, "All sessions shut down");
    }
}
