//! In-chat command parsing and dispatch
//!
//! Parsing is a pure `text -> Option<Command>` step. Dispatch maps the
//! command name onto a fixed handler table; handlers act on the session
//! through an explicit [`CommandContext`] instead of shared state.
//!
//! Unknown commands produce no reply: the prefix filter runs over every
//! inbound message, so answering each miss would spam the chat.

use crate::error::Result;
use crate::types::{address_for, normalize_number, ConnectionState};
use async_trait::async_trait;
use std::sync::OnceLock;
use std::time::Instant;

/// Default command prefix
pub const DEFAULT_PREFIX: &str = "!";

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// When the process started, as pinned by the first call
///
/// The binary calls this first thing in `main` so `!status` uptime counts
/// from process start.
pub fn process_start() -> Instant {
    *PROCESS_START.get_or_init(Instant::now)
}

/// A parsed command: lowercase name plus whitespace-separated arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    /// Parse `text` if it starts with `prefix`
    pub fn parse(prefix: &str, text: &str) -> Option<Self> {
        let body = text.strip_prefix(prefix)?;
        let mut tokens = body.split_whitespace();
        let name = tokens.next()?.to_lowercase();
        // The name must directly follow the prefix ("! pair" is not a command)
        if body.starts_with(char::is_whitespace) {
            return None;
        }
        Some(Self {
            name,
            args: tokens.map(str::to_string).collect(),
        })
    }
}

/// Built-in command handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Pair,
    Status,
    Hello,
    Help,
}

/// Handler table: name, argument hint, description
const COMMANDS: &[(Builtin, &str, &str, &str)] = &[
    (Builtin::Pair, "pair", " <number>", "Pair with another number"),
    (Builtin::Status, "status", "", "Check bot status"),
    (Builtin::Hello, "hello", "", "Greet the bot"),
    (Builtin::Help, "help", "", "Show this help message"),
];

impl Builtin {
    /// Look up a handler by command name
    pub fn from_name(name: &str) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|(_, n, _, _)| *n == name)
            .map(|(b, _, _, _)| *b)
    }
}

/// What a handler may ask of the session it runs in
#[async_trait]
pub trait CommandContext: Send + Sync {
    /// Id of the session the command arrived on
    fn session_id(&self) -> &str;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Forward this session's credentials to `target`
    async fn pair_with(&self, target: &str) -> Result<()>;
}

/// Maps command text onto handlers and produces reply text
#[derive(Debug, Clone)]
pub struct CommandRouter {
    prefix: String,
    address_domain: String,
    /// Process start, for `!status` uptime
    process_started: Instant,
}

impl CommandRouter {
    /// Create a router for the given prefix and address domain
    pub fn new(prefix: impl Into<String>, address_domain: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            address_domain: address_domain.into(),
            process_started: process_start(),
        }
    }

    /// Whether `text` is addressed to the router at all
    pub fn is_command(&self, text: &str) -> bool {
        text.starts_with(&self.prefix)
    }

    /// Parse `text` into a command this router knows how to handle
    pub fn parse(&self, text: &str) -> Option<(Builtin, Command)> {
        let command = Command::parse(&self.prefix, text)?;
        let builtin = Builtin::from_name(&command.name)?;
        Some((builtin, command))
    }

    /// Handle `text`, returning the reply to send back (if any)
    pub async fn dispatch(&self, ctx: &dyn CommandContext, text: &str) -> Option<String> {
        let (builtin, command) = self.parse(text)?;
        tracing::debug!(session = %ctx.session_id(), command = %command.name, "Dispatching command");

        let reply = match builtin {
            Builtin::Pair => self.pair(ctx, &command.args).await,
            Builtin::Status => self.status(ctx),
            Builtin::Hello => "👋 Hello! I am your WhatsApp bot.".to_string(),
            Builtin::Help => self.help(),
        };
        Some(reply)
    }

    async fn pair(&self, ctx: &dyn CommandContext, args: &[String]) -> String {
        let digits = normalize_number(&args.join(""));
        if digits.is_empty() {
            return format!(
                "Please provide your number: {}pair 1234567890",
                self.prefix
            );
        }

        let target = address_for(&digits, &self.address_domain);
        match ctx.pair_with(&target).await {
            Ok(()) => format!(
                "✅ Credentials sent to {}\n\nSession ID: {}\nStatus: Paired successfully!",
                digits,
                ctx.session_id()
            ),
            Err(e) => {
                tracing::warn!(
                    session = %ctx.session_id(),
                    target = %target,
                    error = %e,
                    "Pairing failed"
                );
                format!("❌ Failed to send credentials to {}", digits)
            }
        }
    }

    fn status(&self, ctx: &dyn CommandContext) -> String {
        format!(
            "📊 *BOT STATUS*\n\nSession: {}\nConnected: {}\nUptime: {}s",
            ctx.session_id(),
            ctx.connection_state() == ConnectionState::Open,
            self.process_started.elapsed().as_secs()
        )
    }

    fn help(&self) -> String {
        let mut text = String::from("🛠 *AVAILABLE COMMANDS*\n");
        for (_, name, hint, description) in COMMANDS {
            text.push_str(&format!("\n{}{}{} - {}", self.prefix, name, hint, description));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::types::DEFAULT_ADDRESS_DOMAIN;
    use std::sync::Mutex;

    struct FakeContext {
        state: ConnectionState,
        fail: bool,
        paired: Mutex<Vec<String>>,
    }

    impl FakeContext {
        fn new(state: ConnectionState) -> Self {
            Self {
                state,
                fail: false,
                paired: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandContext for FakeContext {
        fn session_id(&self) -> &str {
            "s1"
        }

        fn connection_state(&self) -> ConnectionState {
            self.state
        }

        async fn pair_with(&self, target: &str) -> Result<()> {
            self.paired.lock().unwrap().push(target.to_string());
            if self.fail {
                return Err(LinkError::CredentialsUnavailable {
                    session_id: "s1".to_string(),
                    reason: "no snapshot".to_string(),
                });
            }
            Ok(())
        }
    }

    fn router() -> CommandRouter {
        CommandRouter::new(DEFAULT_PREFIX, DEFAULT_ADDRESS_DOMAIN)
    }

    #[test]
    fn test_parse_command() {
        let cmd = Command::parse("!", "!pair 12-345 (678)").unwrap();
        assert_eq!(cmd.name, "pair");
        assert_eq!(cmd.args, vec!["12-345", "(678)"]);

        let cmd = Command::parse("!", "!PAIR 555").unwrap();
        assert_eq!(cmd.name, "pair");

        assert!(Command::parse("!", "pair 555").is_none());
        assert!(Command::parse("!", "!").is_none());
        assert!(Command::parse("!", "! pair").is_none());
        assert!(Command::parse("!", "").is_none());
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(Builtin::from_name("pair"), Some(Builtin::Pair));
        assert_eq!(Builtin::from_name("status"), Some(Builtin::Status));
        assert_eq!(Builtin::from_name("hello"), Some(Builtin::Hello));
        assert_eq!(Builtin::from_name("help"), Some(Builtin::Help));
        assert_eq!(Builtin::from_name("unknown"), None);
    }

    #[tokio::test]
    async fn test_pair_strips_non_digits() {
        let ctx = FakeContext::new(ConnectionState::Open);
        let reply = router().dispatch(&ctx, "!pair 12-345 (678)").await.unwrap();

        assert_eq!(*ctx.paired.lock().unwrap(), vec!["12345678@s.whatsapp.net"]);
        assert!(reply.contains("Credentials sent to 12345678"));
        assert!(reply.contains("Session ID: s1"));
    }

    #[tokio::test]
    async fn test_pair_is_case_insensitive() {
        let ctx = FakeContext::new(ConnectionState::Open);
        router().dispatch(&ctx, "!PAIR 555").await.unwrap();
        assert_eq!(*ctx.paired.lock().unwrap(), vec!["555@s.whatsapp.net"]);
    }

    #[tokio::test]
    async fn test_pair_without_number_replies_usage() {
        let ctx = FakeContext::new(ConnectionState::Open);
        let reply = router().dispatch(&ctx, "!pair").await.unwrap();
        assert!(reply.contains("!pair 1234567890"));
        assert!(ctx.paired.lock().unwrap().is_empty());

        let reply = router().dispatch(&ctx, "!pair abc").await.unwrap();
        assert!(reply.starts_with("Please provide your number"));
    }

    #[tokio::test]
    async fn test_pair_failure_becomes_reply() {
        let mut ctx = FakeContext::new(ConnectionState::Open);
        ctx.fail = true;
        let reply = router().dispatch(&ctx, "!pair 555").await.unwrap();
        assert_eq!(reply, "❌ Failed to send credentials to 555");
    }

    #[test]
    fn test_uptime_counts_from_process_start() {
        let start = process_start();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let router = CommandRouter::new("!", DEFAULT_ADDRESS_DOMAIN);
        assert_eq!(router.process_started, start);
        assert_eq!(process_start(), start);
    }

    #[tokio::test]
    async fn test_status_reports_connection() {
        let ctx = FakeContext::new(ConnectionState::Open);
        let reply = router().dispatch(&ctx, "!status").await.unwrap();
        assert!(reply.contains("Session: s1"));
        assert!(reply.contains("Connected: true"));
        assert!(reply.contains("Uptime: "));

        let ctx = FakeContext::new(ConnectionState::Closed);
        let reply = router().dispatch(&ctx, "!Status").await.unwrap();
        assert!(reply.contains("Connected: false"));
    }

    #[tokio::test]
    async fn test_static_replies() {
        let ctx = FakeContext::new(ConnectionState::Open);
        let hello = router().dispatch(&ctx, "!hello").await.unwrap();
        assert!(hello.contains("Hello"));

        let help = router().dispatch(&ctx, "!help").await.unwrap();
        assert!(help.contains("!pair <number> - Pair with another number"));
        assert!(help.contains("!status - Check bot status"));
        assert!(help.contains("!hello - Greet the bot"));
        assert!(help.contains("!help - Show this help message"));
    }

    #[tokio::test]
    async fn test_unknown_commands_are_silent() {
        let ctx = FakeContext::new(ConnectionState::Open);
        assert!(router().dispatch(&ctx, "!dance").await.is_none());
        assert!(router().dispatch(&ctx, "hello there").await.is_none());
        assert!(ctx.paired.lock().unwrap().is_empty());
    }

    #[test]
    fn test_custom_prefix() {
        let router = CommandRouter::new("/", DEFAULT_ADDRESS_DOMAIN);
        assert!(router.is_command("/help"));
        assert!(!router.is_command("!help"));
        assert_eq!(router.parse("/help").map(|(b, _)| b), Some(Builtin::Help));
    }
}
