//! Core types for the a3s-link session system
//!
//! Wire-facing types use camelCase JSON serialization, matching the event
//! shapes emitted by the external messaging client.

use serde::{Deserialize, Serialize};

/// Session id used when a start request names none
pub const DEFAULT_SESSION_ID: &str = "default";

/// Address domain appended to bare phone numbers
pub const DEFAULT_ADDRESS_DOMAIN: &str = "s.whatsapp.net";

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Client handle requested, connection not yet open
    Initializing,
    /// Connection established
    Open,
    /// Connection closed (possibly reconnecting)
    Closed,
}

impl ConnectionState {
    /// Lowercase name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection closed, decoded from the client's status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// 401: the account was unlinked; credentials are dead
    LoggedOut,
    /// 403
    Forbidden,
    /// 408: connection lost or timed out
    ConnectionLost,
    /// 411
    MultideviceMismatch,
    /// 428
    ConnectionClosed,
    /// 440: another client took over the session
    ConnectionReplaced,
    /// 500
    BadSession,
    /// 503
    UnavailableService,
    /// 515: the client asks to be restarted (normal right after linking)
    RestartRequired,
    /// Missing or unrecognized status code
    Unknown(Option<u16>),
}

impl DisconnectReason {
    /// Decode a status code
    pub fn from_status(code: Option<u16>) -> Self {
        match code {
            Some(401) => DisconnectReason::LoggedOut,
            Some(403) => DisconnectReason::Forbidden,
            Some(408) => DisconnectReason::ConnectionLost,
            Some(411) => DisconnectReason::MultideviceMismatch,
            Some(428) => DisconnectReason::ConnectionClosed,
            Some(440) => DisconnectReason::ConnectionReplaced,
            Some(500) => DisconnectReason::BadSession,
            Some(503) => DisconnectReason::UnavailableService,
            Some(515) => DisconnectReason::RestartRequired,
            other => DisconnectReason::Unknown(other),
        }
    }

    /// Only an explicit logout ends a session; everything else reconnects
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

/// Connection phase reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// Details of the last disconnect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDisconnect {
    /// Numeric reason code (e.g., 401 for logged out)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Human-readable error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A `connection.update` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,

    /// Pairing QR payload, present while the client waits to be linked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

impl ConnectionUpdate {
    /// An "open" update
    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionPhase::Open),
            ..Default::default()
        }
    }

    /// A "close" update carrying a status code
    pub fn closed(status_code: u16) -> Self {
        Self {
            connection: Some(ConnectionPhase::Close),
            last_disconnect: Some(LastDisconnect {
                status_code: Some(status_code),
                message: None,
            }),
            qr: None,
        }
    }

    /// A QR-only update
    pub fn qr(code: impl Into<String>) -> Self {
        Self {
            qr: Some(code.into()),
            ..Default::default()
        }
    }

    /// Decoded disconnect reason (meaningful for close updates)
    pub fn disconnect_reason(&self) -> DisconnectReason {
        DisconnectReason::from_status(
            self.last_disconnect.as_ref().and_then(|d| d.status_code),
        )
    }
}

/// Kind of a `messages.upsert` batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Live messages that should be acted upon
    Notify,
    /// History sync / replayed messages
    Append,
}

/// A batch of inbound messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatch {
    #[serde(rename = "type")]
    pub kind: BatchKind,

    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

impl MessageBatch {
    /// A notify batch holding a single text message from `sender`
    pub fn notify_text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: BatchKind::Notify,
            messages: vec![WireMessage::text(sender, text)],
        }
    }
}

/// Message key identifying chat and direction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat address the message belongs to
    #[serde(default)]
    pub remote_jid: String,

    #[serde(default)]
    pub from_me: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A single inbound message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub key: MessageKey,

    /// Content; absent for protocol/stub messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageContent>,
}

impl WireMessage {
    /// A plain conversation message
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: MessageKey {
                remote_jid: sender.into(),
                ..Default::default()
            },
            message: Some(MessageContent {
                conversation: Some(text.into()),
                ..Default::default()
            }),
        }
    }

    /// Sender/chat address
    pub fn sender(&self) -> &str {
        &self.key.remote_jid
    }
}

/// Message payload in one of several shapes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<ImageMessage>,
}

impl MessageContent {
    /// Plain text of the message: conversation, extended text, then image
    /// caption; the first non-empty one wins
    pub fn text(&self) -> Option<&str> {
        [
            self.conversation.as_deref(),
            self.extended_text_message
                .as_ref()
                .and_then(|m| m.text.as_deref()),
            self.image_message
                .as_ref()
                .and_then(|m| m.caption.as_deref()),
        ]
        .into_iter()
        .flatten()
        .find(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMessage {
    #[serde(default)]
    pub caption: Option<String>,
}

/// Outbound payload handed to the external client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Plain text
    Text(String),
    /// File attachment
    Document {
        data: Vec<u8>,
        file_name: String,
        mime_type: String,
    },
}

impl OutboundMessage {
    /// Build a text message
    pub fn text(text: impl Into<String>) -> Self {
        OutboundMessage::Text(text.into())
    }

    /// Build a JSON document attachment
    pub fn json_document(data: Vec<u8>, file_name: impl Into<String>) -> Self {
        OutboundMessage::Document {
            data,
            file_name: file_name.into(),
            mime_type: "application/json".to_string(),
        }
    }
}

/// Listing entry for a registered session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub connection_state: ConnectionState,
    pub is_connected: bool,

    /// Latest pairing QR payload while the session is not open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

/// Strip everything but ASCII digits from a phone number
pub fn normalize_number(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Messaging address for a digits-only number
pub fn address_for(digits: &str, domain: &str) -> String {
    format!("{}@{}", digits, domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_decoding() {
        assert_eq!(DisconnectReason::from_status(Some(401)), DisconnectReason::LoggedOut);
        assert_eq!(
            DisconnectReason::from_status(Some(515)),
            DisconnectReason::RestartRequired
        );
        assert_eq!(
            DisconnectReason::from_status(Some(999)),
            DisconnectReason::Unknown(Some(999))
        );
        assert_eq!(DisconnectReason::from_status(None), DisconnectReason::Unknown(None));
    }

    #[test]
    fn test_only_logout_is_terminal() {
        assert!(DisconnectReason::LoggedOut.is_terminal());
        for code in [403, 408, 411, 428, 440, 500, 503, 515] {
            assert!(!DisconnectReason::from_status(Some(code)).is_terminal());
        }
        assert!(!DisconnectReason::Unknown(None).is_terminal());
    }

    #[test]
    fn test_connection_update_from_client_json() {
        let json = r#"{"connection":"close","lastDisconnect":{"statusCode":401,"message":"logged out"}}"#;
        let update: ConnectionUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.connection, Some(ConnectionPhase::Close));
        assert_eq!(update.disconnect_reason(), DisconnectReason::LoggedOut);

        let update: ConnectionUpdate = serde_json::from_str(r#"{"qr":"2@abc"}"#).unwrap();
        assert!(update.connection.is_none());
        assert_eq!(update.qr.as_deref(), Some("2@abc"));
    }

    #[test]
    fn test_message_text_precedence() {
        let content = MessageContent {
            conversation: Some(String::new()),
            extended_text_message: Some(ExtendedTextMessage {
                text: Some("!status".to_string()),
            }),
            image_message: Some(ImageMessage {
                caption: Some("caption".to_string()),
            }),
        };
        assert_eq!(content.text(), Some("!status"));

        let content = MessageContent {
            image_message: Some(ImageMessage {
                caption: Some("!help".to_string()),
            }),
            ..Default::default()
        };
        assert_eq!(content.text(), Some("!help"));

        assert_eq!(MessageContent::default().text(), None);
    }

    #[test]
    fn test_message_batch_from_client_json() {
        let json = r#"{
            "type": "notify",
            "messages": [
                {"key": {"remoteJid": "155@s.whatsapp.net", "fromMe": false},
                 "message": {"extendedTextMessage": {"text": "!hello"}}},
                {"key": {"remoteJid": "166@s.whatsapp.net"}}
            ]
        }"#;
        let batch: MessageBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.kind, BatchKind::Notify);
        assert_eq!(batch.messages.len(), 2);
        assert_eq!(batch.messages[0].sender(), "155@s.whatsapp.net");
        assert_eq!(
            batch.messages[0].message.as_ref().and_then(|m| m.text()),
            Some("!hello")
        );
        assert!(batch.messages[1].message.is_none());
    }

    #[test]
    fn test_session_info_serialization() {
        let info = SessionInfo {
            session_id: "a".to_string(),
            connection_state: ConnectionState::Initializing,
            is_connected: false,
            qr: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"sessionId\":\"a\""));
        assert!(json.contains("\"connectionState\":\"initializing\""));
        assert!(json.contains("\"isConnected\":false"));
        assert!(!json.contains("qr"));
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("12-345 (678)"), "12345678");
        assert_eq!(normalize_number("+1 555 123 4567"), "15551234567");
        assert_eq!(normalize_number("abc"), "");
        assert_eq!(address_for("555", DEFAULT_ADDRESS_DOMAIN), "555@s.whatsapp.net");
    }
}
