//! HTTP bridge provider
//!
//! Talks to a protocol sidecar that hosts the actual messaging client and
//! exposes it over plain HTTP:
//!
//! | Method   | Path                                  | Purpose                      |
//! |----------|---------------------------------------|------------------------------|
//! | `POST`   | `/sessions/:id`                       | Open (or resume) a client    |
//! | `GET`    | `/sessions/:id/events?cursor=&wait=`  | Long-poll client events      |
//! | `POST`   | `/sessions/:id/messages`              | Send text or a document      |
//! | `DELETE` | `/sessions/:id`                       | Close the client             |
//!
//! Events arrive as `{"event": "<name>", "data": {...}}` frames where
//! `data` keeps the client's native shape (`connection.update`,
//! `messages.upsert`, `creds.update`).

use super::{ClientEvent, ClientHandle, MessagingProvider, OpenedClient, EVENT_CHANNEL_CAPACITY};
use crate::error::{LinkError, Result};
use crate::types::{ConnectionUpdate, MessageBatch, OutboundMessage};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Consecutive poll failures tolerated before the connection counts as lost
const MAX_POLL_FAILURES: u32 = 5;
/// Pause between failed polls
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Status code reported when the bridge stops answering
const STATUS_CONNECTION_LOST: u16 = 408;
/// Status code reported when the bridge no longer knows the session
const STATUS_CONNECTION_CLOSED: u16 = 428;

/// Bridge provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the sidecar
    pub url: String,

    /// Long-poll wait in seconds
    pub poll_wait_secs: u64,

    /// Timeout for non-polling requests in seconds
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3001".to_string(),
            poll_wait_secs: 25,
            request_timeout_secs: 30,
        }
    }
}

impl BridgeConfig {
    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.url.trim_end_matches('/'), session_id)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenRequest<'a> {
    auth_dir: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct OpenResponse {
    #[serde(default)]
    me: Option<AccountRef>,
}

#[derive(Debug, Deserialize)]
struct AccountRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    cursor: u64,
    #[serde(default)]
    events: Vec<RawFrame>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mimetype: Option<&'a str>,
}

impl<'a> SendRequest<'a> {
    fn new(to: &'a str, message: &'a OutboundMessage) -> Self {
        match message {
            OutboundMessage::Text(text) => Self {
                to,
                text: Some(text.as_str()),
                document: None,
                file_name: None,
                mimetype: None,
            },
            OutboundMessage::Document {
                data,
                file_name,
                mime_type,
            } => Self {
                to,
                text: None,
                document: Some(base64::engine::general_purpose::STANDARD.encode(data)),
                file_name: Some(file_name.as_str()),
                mimetype: Some(mime_type.as_str()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Decode a bridge frame into a client event
///
/// Returns `Ok(None)` for event names this crate does not consume.
fn decode_frame(frame: RawFrame) -> Result<Option<ClientEvent>> {
    let event = match frame.event.as_str() {
        "connection.update" => {
            let update: ConnectionUpdate = serde_json::from_value(frame.data)?;
            Some(ClientEvent::Connection(update))
        }
        "messages.upsert" => {
            let batch: MessageBatch = serde_json::from_value(frame.data)?;
            Some(ClientEvent::Messages(batch))
        }
        "creds.update" => Some(ClientEvent::CredentialsUpdated(frame.data)),
        _ => None,
    };
    Ok(event)
}

fn me_id(data: &serde_json::Value) -> Option<String> {
    data.pointer("/me/id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Provider backed by an HTTP protocol sidecar
pub struct BridgeProvider {
    config: BridgeConfig,
    client: reqwest::Client,
}

impl BridgeProvider {
    /// Create a provider for the given sidecar
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LinkError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl MessagingProvider for BridgeProvider {
    async fn open(&self, session_id: &str, auth_dir: &Path) -> Result<OpenedClient> {
        let url = self.config.session_url(session_id);
        let auth_dir = auth_dir.to_string_lossy();

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .json(&OpenRequest {
                auth_dir: &auth_dir,
            })
            .send()
            .await
            .map_err(|e| LinkError::Provider(format!("Failed to open session on bridge: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LinkError::Provider(format!(
                "Bridge open error {}: {}",
                status, error_text
            )));
        }

        let opened: OpenResponse = response.json().await.unwrap_or_default();
        let own_address = Arc::new(RwLock::new(opened.me.map(|m| m.id)));

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(poll_loop(
            self.client.clone(),
            self.config.clone(),
            session_id.to_string(),
            own_address.clone(),
            event_tx,
            shutdown_rx,
        ));

        tracing::info!(session = %session_id, bridge = %self.config.url, "Bridge session opened");

        let handle = BridgeHandle {
            session_id: session_id.to_string(),
            config: self.config.clone(),
            client: self.client.clone(),
            own_address,
            shutdown_tx,
        };

        Ok(OpenedClient {
            handle: Arc::new(handle),
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "bridge"
    }
}

/// Long-poll the bridge for events until shut down or the session is gone
async fn poll_loop(
    client: reqwest::Client,
    config: BridgeConfig,
    session_id: String,
    own_address: Arc<RwLock<Option<String>>>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let url = format!("{}/events", config.session_url(&session_id));
    let mut cursor: u64 = 0;
    let mut failures: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let request = client
            .get(&url)
            .query(&[
                ("cursor", cursor.to_string()),
                ("wait", config.poll_wait_secs.to_string()),
            ])
            .timeout(Duration::from_secs(config.poll_wait_secs + 10))
            .send();

        let result = tokio::select! {
            resp = request => resp,
            _ = shutdown_rx.changed() => break,
        };

        let response = match result {
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND
                || resp.status() == reqwest::StatusCode::GONE =>
            {
                tracing::warn!(session = %session_id, "Bridge no longer knows session");
                let _ = event_tx
                    .send(ClientEvent::Connection(ConnectionUpdate::closed(
                        STATUS_CONNECTION_CLOSED,
                    )))
                    .await;
                break;
            }
            Ok(resp) if resp.status().is_success() => resp.json::<PollResponse>().await,
            Ok(resp) => {
                tracing::warn!(session = %session_id, status = %resp.status(), "Bridge poll rejected");
                failures += 1;
                if failures >= MAX_POLL_FAILURES {
                    let _ = event_tx
                        .send(ClientEvent::Connection(ConnectionUpdate::closed(
                            STATUS_CONNECTION_LOST,
                        )))
                        .await;
                    break;
                }
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
            Err(e) => Err(e),
        };

        let poll = match response {
            Ok(poll) => {
                failures = 0;
                poll
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    session = %session_id,
                    error = %e,
                    failures,
                    "Bridge poll failed"
                );
                if failures >= MAX_POLL_FAILURES {
                    let _ = event_tx
                        .send(ClientEvent::Connection(ConnectionUpdate::closed(
                            STATUS_CONNECTION_LOST,
                        )))
                        .await;
                    break;
                }
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        cursor = poll.cursor;
        for frame in poll.events {
            if frame.event == "connection.update" {
                if let Some(id) = me_id(&frame.data) {
                    *own_address.write().unwrap_or_else(|e| e.into_inner()) = Some(id);
                }
            }

            match decode_frame(frame) {
                Ok(Some(event)) => {
                    if event_tx.send(event).await.is_err() {
                        tracing::debug!(session = %session_id, "Event receiver dropped, stopping poll loop");
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session = %session_id, error = %e, "Skipping malformed bridge frame");
                }
            }
        }
    }

    tracing::debug!(session = %session_id, "Bridge poll loop stopped");
}

struct BridgeHandle {
    session_id: String,
    config: BridgeConfig,
    client: reqwest::Client,
    own_address: Arc<RwLock<Option<String>>>,
    shutdown_tx: watch::Sender<bool>,
}

#[async_trait]
impl ClientHandle for BridgeHandle {
    async fn send(&self, to: &str, message: OutboundMessage) -> Result<String> {
        let url = format!("{}/messages", self.config.session_url(&self.session_id));

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .json(&SendRequest::new(to, &message))
            .send()
            .await
            .map_err(|e| LinkError::SendFailed {
                target: to.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LinkError::SendFailed {
                target: to.to_string(),
                reason: format!("bridge error {}: {}", status, error_text),
            });
        }

        let sent: SendResponse = response.json().await.map_err(|e| LinkError::SendFailed {
            target: to.to_string(),
            reason: format!("invalid bridge response: {}", e),
        })?;
        Ok(sent.id)
    }

    fn own_address(&self) -> Option<String> {
        self.own_address
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let response = self
            .client
            .delete(self.config.session_url(&self.session_id))
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await
            .map_err(|e| LinkError::Provider(format!("Failed to close bridge session: {}", e)))?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(LinkError::Provider(format!(
                "Bridge close error {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BatchKind, ConnectionPhase};

    fn frame(json: serde_json::Value) -> RawFrame {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_decode_connection_update() {
        let event = decode_frame(frame(serde_json::json!({
            "event": "connection.update",
            "data": {"connection": "close", "lastDisconnect": {"statusCode": 515}}
        })))
        .unwrap()
        .unwrap();

        match event {
            ClientEvent::Connection(update) => {
                assert_eq!(update.connection, Some(ConnectionPhase::Close));
                assert!(!update.disconnect_reason().is_terminal());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_messages_and_creds() {
        let event = decode_frame(frame(serde_json::json!({
            "event": "messages.upsert",
            "data": {"type": "append", "messages": []}
        })))
        .unwrap()
        .unwrap();
        assert!(matches!(event, ClientEvent::Messages(b) if b.kind == BatchKind::Append));

        let event = decode_frame(frame(serde_json::json!({
            "event": "creds.update",
            "data": {"me": {"id": "1@s"}}
        })))
        .unwrap()
        .unwrap();
        assert!(matches!(event, ClientEvent::CredentialsUpdated(v) if v["me"]["id"] == "1@s"));
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        let unknown = decode_frame(frame(serde_json::json!({"event": "presence.update"}))).unwrap();
        assert!(unknown.is_none());

        let malformed = decode_frame(frame(serde_json::json!({
            "event": "messages.upsert",
            "data": {"messages": []}
        })));
        assert!(matches!(malformed, Err(LinkError::Serialization(_))));
    }

    #[test]
    fn test_send_request_document_is_base64() {
        let message = OutboundMessage::json_document(b"{}".to_vec(), "creds-a.json");
        let json = serde_json::to_value(SendRequest::new("1@s", &message)).unwrap();

        assert_eq!(json["to"], "1@s");
        assert_eq!(json["document"], "e30=");
        assert_eq!(json["fileName"], "creds-a.json");
        assert_eq!(json["mimetype"], "application/json");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn test_session_url_trims_slash() {
        let config = BridgeConfig {
            url: "http://bridge:3001/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.session_url("a"), "http://bridge:3001/sessions/a");
    }
}
