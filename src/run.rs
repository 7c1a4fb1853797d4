//! One ingestion-and-delivery pass.
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Timelike;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Target};
use crate::feed::{build_client, ingest_all, Article, Fetcher};
use crate::notify::{
    digest_subject, DigestFileSink, NotificationSink, NotifyError, StdoutSink, TelegramSink,
};
use crate::storage::{DedupGate, PublishRecorder, PublishedStore};

/// Delivery is attempted this many times before the run gives up.
pub const DELIVERY_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Print what would be sent instead of delivering and marking.
    pub dry_run: bool,
    /// Pause after failed delivery attempt `n` is `n * delivery_backoff`.
    pub delivery_backoff: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            delivery_backoff: Duration::from_secs(1),
        }
    }
}

/// What a run did, for the final log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub feeds: usize,
    pub failed_feeds: usize,
    pub new_articles: usize,
    /// GUIDs newly recorded as published (zero on a dry run).
    pub marked: usize,
}

/// Opens the store and HTTP client described by `config` and runs one
/// pass against the configured target.
pub async fn run(config: &Config, options: RunOptions, cancel: &CancellationToken) -> Result<RunSummary> {
    let database = config.database.to_string_lossy();
    let store = PublishedStore::open(&database)
        .await
        .with_context(|| format!("Failed to open published store at {}", database))?;

    let client = build_client().context("Failed to build HTTP client")?;
    let fetcher = Fetcher::new(client.clone(), config.user_agents.clone());

    match config.target {
        Target::Telegram => {
            let (Some(token), Some(channel)) =
                (&config.telegram.bot_token, &config.telegram.channel)
            else {
                anyhow::bail!("Telegram target requires a bot token and a channel");
            };
            let token = SecretString::from(token.expose_secret().to_owned());
            let sink = TelegramSink::new(client, token, channel.as_str());
            run_once(config, &fetcher, &store, &sink, options, cancel).await
        }
        Target::Digest => {
            let sink = DigestFileSink::new(&config.digest.path);
            run_once(config, &fetcher, &store, &sink, options, cancel).await
        }
        Target::Stdout => run_once(config, &fetcher, &store, &StdoutSink, options, cancel).await,
    }
}

/// Ingest every feed, deliver the new articles, then mark them published.
///
/// Per-feed failures are logged and do not fail the run. A delivery
/// failure does: nothing is marked, so the next run offers the same
/// articles again.
pub async fn run_once<St, Si>(
    config: &Config,
    fetcher: &Fetcher,
    store: &St,
    sink: &Si,
    options: RunOptions,
    cancel: &CancellationToken,
) -> Result<RunSummary>
where
    St: DedupGate + PublishRecorder,
    Si: NotificationSink,
{
    let report = ingest_all(fetcher, &config.feeds, store, cancel).await;

    for (feed, error) in report.failures() {
        tracing::error!(feed = %feed.url, header = %feed.header, error = %error, "Feed failed");
    }

    let mut summary = RunSummary {
        feeds: report.feeds.len(),
        failed_feeds: report.feeds.len() - report.succeeded(),
        new_articles: report.articles.len(),
        marked: 0,
    };

    if cancel.is_cancelled() {
        anyhow::bail!("Run cancelled before delivery");
    }

    if report.articles.is_empty() {
        tracing::info!(feeds = summary.feeds, failed = summary.failed_feeds, "No new articles");
        return Ok(summary);
    }

    let subject = digest_subject(report.articles.len(), chrono::Local::now().hour());

    if options.dry_run {
        StdoutSink
            .deliver(&subject, &report.articles)
            .await
            .context("Failed to print dry run")?;
        tracing::info!(new_articles = summary.new_articles, "Dry run, nothing delivered or marked");
        return Ok(summary);
    }

    deliver_with_retry(sink, &subject, &report.articles, options.delivery_backoff)
        .await
        .with_context(|| format!("Delivery via {} failed", sink.name()))?;

    summary.marked = store
        .mark_published(&report.articles)
        .await
        .context("Delivered but failed to mark articles as published")?;

    tracing::info!(
        new_articles = summary.new_articles,
        marked = summary.marked,
        failed_feeds = summary.failed_feeds,
        sink = sink.name(),
        "Run complete"
    );
    Ok(summary)
}

async fn deliver_with_retry<S: NotificationSink>(
    sink: &S,
    subject: &str,
    articles: &[Article],
    backoff: Duration,
) -> Result<(), NotifyError> {
    let mut attempt = 1;
    loop {
        match sink.deliver(subject, articles).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < DELIVERY_ATTEMPTS => {
                tracing::warn!(sink = sink.name(), attempt, error = %e, "Delivery failed, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
