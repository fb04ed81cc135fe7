//! Inbound command routing.
//!
//! Classifies webhook text into the fixed command vocabulary or, for an
//! identity that is mid-handshake, a candidate authorization-code paste.
//! Text from identities that are not Pending is dropped without a reply so
//! stray messages are never misread as codes. Every state-machine failure
//! maps to its own reply; transport detail never reaches the user.

use crate::auth::{AuthError, AuthManager, AuthStatus};
use std::sync::Arc;
use tracing::{error, warn};

/// One entry of the fixed command vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Connect,
    Disconnect,
    Status,
    Unknown,
}

impl Command {
    /// Parse a slash command. Returns `None` for non-command text.
    ///
    /// Telegram appends the bot handle in group chats ("/status@kudosbot");
    /// the suffix is ignored.
    pub fn parse(text: &str) -> Option<Command> {
        let first = text.trim().split_whitespace().next()?;
        if !first.starts_with('/') {
            return None;
        }
        let name = first[1..].split('@').next().unwrap_or("");

        Some(match name {
            "start" => Command::Start,
            "help" => Command::Help,
            "connect" => Command::Connect,
            "disconnect" => Command::Disconnect,
            "status" => Command::Status,
            _ => Command::Unknown,
        })
    }
}

const HELP_TEXT: &str = "\
🏃 I cheer your Strava activities!\n\
\n\
/connect — link your Strava account\n\
/status — show your connection\n\
/disconnect — unlink your Strava account\n\
/help — this message";

pub struct Router {
    auth: Arc<AuthManager>,
}

impl Router {
    pub fn new(auth: Arc<AuthManager>) -> Self {
        Self { auth }
    }

    /// Handle one inbound `(identity, text)` pair.
    ///
    /// Returns the reply to send, or `None` when the text is dropped.
    pub async fn handle(&self, identity: &str, text: &str) -> Option<String> {
        if let Some(command) = Command::parse(text) {
            return Some(self.dispatch(identity, command).await);
        }

        // Not a command: only an identity mid-handshake may submit a code.
        match self.auth.query_status(identity) {
            Ok(AuthStatus::Pending) => Some(self.handle_code_paste(identity, text).await),
            Ok(_) => None,
            Err(e) => {
                error!(identity = %identity, error = %e, "Status query failed");
                None
            }
        }
    }

    async fn dispatch(&self, identity: &str, command: Command) -> String {
        match command {
            Command::Start | Command::Help | Command::Unknown => HELP_TEXT.to_string(),
            Command::Connect => self.handle_connect(identity),
            Command::Disconnect => self.handle_disconnect(identity),
            Command::Status => self.handle_status(identity),
        }
    }

    fn handle_connect(&self, identity: &str) -> String {
        match self.auth.start_connect(identity) {
            Ok(url) => format!(
                "Let's link your Strava account! 🚴\n\
                 Open this link, authorize the app, then paste the text from \
                 the success page back here:\n{}",
                url
            ),
            Err(e) => self.reply_for_error(identity, &e),
        }
    }

    fn handle_disconnect(&self, identity: &str) -> String {
        match self.auth.disconnect(identity) {
            Ok(true) => "Your Strava account is disconnected. See you l8r 🐊".to_string(),
            Ok(false) => "Nothing to disconnect — this chat wasn't linked.".to_string(),
            Err(e) => self.reply_for_error(identity, &e),
        }
    }

    fn handle_status(&self, identity: &str) -> String {
        match self.auth.query_status(identity) {
            Ok(AuthStatus::Connected { expires_at }) => format!(
                "✅ Connected to Strava. Access token valid until {}.",
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
            Ok(AuthStatus::Pending) => {
                "⏳ Authorization in progress — paste the text from the success page, \
                 or wait for it to expire and /connect again."
                    .to_string()
            }
            Ok(AuthStatus::Unauthenticated) => {
                "Not connected. Send /connect to link your Strava account.".to_string()
            }
            Err(e) => self.reply_for_error(identity, &e),
        }
    }

    async fn handle_code_paste(&self, identity: &str, text: &str) -> String {
        // The success page renders "<code> <state>" as one paste string.
        let mut parts = text.split_whitespace();
        let code = parts.next().unwrap_or("");
        let state = parts.next().unwrap_or("");

        match self.auth.submit_code(identity, code, state).await {
            Ok(()) => "🎉 Strava connected! I'll cheer your new activities here.".to_string(),
            Err(e) => self.reply_for_error(identity, &e),
        }
    }

    fn reply_for_error(&self, identity: &str, err: &AuthError) -> String {
        match err {
            AuthError::AlreadyPending => {
                "You already have an authorization in progress. Paste the text from \
                 the success page, or wait a few minutes and /connect again."
                    .to_string()
            }
            AuthError::AlreadyConnected => {
                "This chat is already connected to Strava. /disconnect first to re-link."
                    .to_string()
            }
            AuthError::NoSession => {
                "No authorization in progress. Send /connect to start one.".to_string()
            }
            AuthError::SessionExpired => {
                "That authorization attempt expired. Send /connect to start a fresh one."
                    .to_string()
            }
            AuthError::NonceMismatch => {
                "That doesn't match your authorization attempt. Copy the full text \
                 from the success page and paste it here."
                    .to_string()
            }
            AuthError::ExchangeFailed(source) => {
                warn!(identity = %identity, error = %source, "Code exchange failed");
                "Strava didn't accept that code. Check you copied the whole text and \
                 try again."
                    .to_string()
            }
            AuthError::RefreshFailed(source) => {
                warn!(identity = %identity, error = %source, "Token refresh failed");
                "I couldn't refresh your Strava access. Send /connect to re-link your \
                 account."
                    .to_string()
            }
            AuthError::NotConnected => {
                "This chat isn't connected. Send /connect to link your Strava account."
                    .to_string()
            }
            AuthError::Store(source) => {
                error!(identity = %identity, error = %source, "Store operation failed");
                "Something went wrong on my side — please try again.".to_string()
            }
        }
    }
}
