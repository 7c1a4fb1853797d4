//! Delivery of a run's new articles.
//!
//! Sinks receive the final ordered, de-duplicated list plus a subject line.
//! They make no ordering guarantees beyond sending articles in list order.

mod digest;
mod format;
mod telegram;

use thiserror::Error;

use crate::feed::Article;

pub use digest::{DigestFileSink, StdoutSink};
pub use format::{
    build_digest_html, digest_subject, format_chat_message, format_digest_item, DIGEST_SEPARATOR,
};
pub use telegram::{TelegramSink, TELEGRAM_API_BASE, TELEGRAM_MESSAGE_LIMIT};

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request never got a response. The URL is stripped since it
    /// embeds the bot token.
    #[error("Notification request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Telegram rejected the message ({status}): {description}")]
    Telegram { status: u16, description: String },

    #[error("Failed to write digest: {0}")]
    Io(#[from] std::io::Error),
}

/// A transport that can deliver a batch of articles.
#[allow(async_fn_in_trait)]
pub trait NotificationSink {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, subject: &str, articles: &[Article]) -> Result<(), NotifyError>;
}
