use std::io::Write;
use std::path::PathBuf;

use super::format::{build_digest_html, format_digest_item};
use super::{NotificationSink, NotifyError};
use crate::feed::Article;

/// Writes the run's HTML digest to a file, replacing any previous one.
#[derive(Debug, Clone)]
pub struct DigestFileSink {
    path: PathBuf,
}

impl DigestFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NotificationSink for DigestFileSink {
    fn name(&self) -> &'static str {
        "digest"
    }

    async fn deliver(&self, subject: &str, articles: &[Article]) -> Result<(), NotifyError> {
        let items: Vec<String> = articles.iter().map(format_digest_item).collect();
        let html = build_digest_html(&items, subject);

        // Write-then-rename so a reader never sees a half-written digest
        let tmp = self.path.with_extension("html.tmp");
        tokio::fs::write(&tmp, html).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), articles = articles.len(), "Digest written");
        Ok(())
    }
}

/// Prints a plain listing to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl StdoutSink {
    fn render(subject: &str, articles: &[Article]) -> String {
        let mut out = format!("{subject}\n");
        for article in articles {
            if article.header.is_empty() {
                out.push_str(&format!("\n{}\n  {}\n", article.title, article.link));
            } else {
                out.push_str(&format!(
                    "\n[{}] {}\n  {}\n",
                    article.header, article.title, article.link
                ));
            }
        }
        out
    }
}

impl NotificationSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn deliver(&self, subject: &str, articles: &[Article]) -> Result<(), NotifyError> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(Self::render(subject, articles).as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}
