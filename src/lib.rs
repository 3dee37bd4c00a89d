//! # a3s-link
//!
//! Messaging session lifecycle and credential relay for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-link` is a thin HTTP control surface over an external messaging
//! client. It creates per-number authenticated sessions, watches them
//! connect, reconnects them when the link drops, and relays the resulting
//! credential material to a user over the same messaging channel.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_link::{LinkConfig, LinkService, MemoryCredentialStore, MemoryProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_link::Result<()> {
//! let service = LinkService::from_config(
//!     &LinkConfig::default(),
//!     Arc::new(MemoryProvider::default()),
//!     Arc::new(MemoryCredentialStore::default()),
//! );
//!
//! let (session_id, _) = service.start_session(Some("support")).await?;
//! println!("Started {}", session_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: in-process client for tests and dry runs
//! - **bridge**: HTTP client for a protocol sidecar
//!
//! ## Architecture
//!
//! - **MessagingProvider** trait: the seam to the external client
//! - **CredentialStore** trait: per-session credential blobs on disk
//! - **SessionRegistry**: which sessions exist
//! - **SessionController**: one session's state machine
//! - **CommandRouter**: in-chat `!commands`
//! - **LinkService**: composition root behind the HTTP API

pub mod api;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod provider;
pub mod reconnect;
pub mod registry;
pub mod service;
pub mod store;
pub mod types;

// Re-export core types
pub use command::{Command, CommandContext, CommandRouter};
pub use config::LinkConfig;
pub use controller::{SessionController, SessionDeps};
pub use error::{LinkError, Result};
pub use provider::{ClientEvent, ClientHandle, MessagingProvider, OpenedClient};
pub use reconnect::ReconnectPolicy;
pub use registry::SessionRegistry;
pub use service::{LinkService, StartOutcome};
pub use store::{CredentialSnapshot, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use types::{ConnectionState, ConnectionUpdate, DisconnectReason, MessageBatch, SessionInfo};

// Re-export providers for convenience
pub use provider::bridge::{BridgeConfig, BridgeProvider};
pub use provider::memory::{MemoryConfig, MemoryProvider};
