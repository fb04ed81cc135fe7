//! Telegram Bot API client.
//!
//! The bot only ever sends messages; inbound traffic arrives through the
//! webhook surface in `crate::api`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

/// Outbound notification channel.
///
/// Fire-and-forget from the core's perspective: a failed send is reported to
/// the caller but no retry is owed.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, identity: &str, text: &str) -> Result<()>;
}

/// Sends messages through the Telegram Bot API.
///
/// The identity key is the Telegram chat id.
pub struct TelegramNotifier {
    base_url: String,
    bot_token: String,
    http_client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(base_url: String, bot_token: String, timeout: std::time::Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token,
            http_client,
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn send(&self, identity: &str, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);

        debug!(chat_id = %identity, "Sending Telegram message");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({
                "chat_id": identity,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            .context("Failed to send Telegram request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(anyhow!("Telegram API returned status {}: {}", status, body));
        }

        Ok(())
    }
}
