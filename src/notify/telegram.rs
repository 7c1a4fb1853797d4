use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::format::format_chat_message;
use super::{NotificationSink, NotifyError};
use crate::feed::Article;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Maximum message length the Bot API accepts, in characters.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Posts articles to a Telegram channel through the Bot API.
pub struct TelegramSink {
    client: reqwest::Client,
    api_base: String,
    token: SecretString,
    channel: String,
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("api_base", &self.api_base)
            .field("token", &"[REDACTED]")
            .field("channel", &self.channel)
            .finish()
    }
}

impl TelegramSink {
    pub fn new(client: reqwest::Client, token: SecretString, channel: impl Into<String>) -> Self {
        Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
            token,
            channel: channel.into(),
        }
    }

    /// Points the sink at another Bot API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base,
            self.token.expose_secret()
        );

        let response = self
            .client
            .post(url)
            .timeout(SEND_TIMEOUT)
            .json(&SendMessage {
                chat_id: &self.channel,
                text,
                parse_mode: "HTML",
                disable_web_page_preview: false,
            })
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.without_url()))?;

        let status = response.status();
        let body: Option<ApiResponse> = response.json().await.ok();

        match body {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
            other => Err(NotifyError::Telegram {
                status: status.as_u16(),
                description: other
                    .and_then(|b| b.description)
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }
}

/// Packs lines into messages of at most `limit` characters, joined by a
/// blank line. A line longer than `limit` is cut at a character boundary.
fn batch_messages(lines: impl IntoIterator<Item = String>, limit: usize) -> Vec<String> {
    const JOINER: &str = "\n\n";

    let mut messages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in lines {
        let line = match line.char_indices().nth(limit) {
            Some((cut, _)) => line[..cut].to_string(),
            None => line,
        };
        let line_len = line.chars().count();

        if current_len > 0 && current_len + JOINER.len() + line_len > limit {
            messages.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push_str(JOINER);
            current_len += JOINER.len();
        }
        current.push_str(&line);
        current_len += line_len;
    }

    if !current.is_empty() {
        messages.push(current);
    }
    messages
}

impl NotificationSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    /// Sends the subject followed by every article, split into as few
    /// messages as the length limit allows. Stops at the first failure.
    async fn deliver(&self, subject: &str, articles: &[Article]) -> Result<(), NotifyError> {
        let lines = std::iter::once(format!(
            "<b>{}</b>",
            html_escape::encode_text(subject)
        ))
        .chain(articles.iter().map(format_chat_message));

        let messages = batch_messages(lines, TELEGRAM_MESSAGE_LIMIT);
        let total = messages.len();

        for (index, message) in messages.iter().enumerate() {
            self.send(message).await?;
            tracing::debug!(part = index + 1, total, "Telegram message sent");
        }
        Ok(())
    }
}
