use std::collections::HashSet;

use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::fetcher::{FetchError, Fetcher};
use super::parser::{parse, ParseError};
use super::types::{Article, FeedSource};
use crate::storage::DedupGate;

/// Why a single feed contributed nothing to a run.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Ingestion cancelled")]
    Cancelled,
}

/// Counters for one feed that ingested successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Articles the parser produced
    pub parsed: usize,
    /// Articles the dedup gate reported as not yet published
    pub unseen: usize,
    /// Articles skipped because the gate lookup failed
    pub lookup_failures: usize,
}

/// Outcome of one feed, reported back to the caller for logging.
#[derive(Debug)]
pub struct FeedOutcome {
    pub url: String,
    pub header: String,
    pub result: Result<FeedStats, FeedError>,
}

/// Result of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Unseen articles, in feed declaration order, unique by GUID.
    pub articles: Vec<Article>,
    /// One entry per configured source, in declaration order.
    pub feeds: Vec<FeedOutcome>,
    /// Articles dropped because an earlier feed already emitted their GUID.
    pub duplicates: usize,
}

impl IngestReport {
    /// Feeds that failed, with their error.
    pub fn failures(&self) -> impl Iterator<Item = (&FeedOutcome, &FeedError)> {
        self.feeds
            .iter()
            .filter_map(|feed| feed.result.as_ref().err().map(|e| (feed, e)))
    }

    pub fn succeeded(&self) -> usize {
        self.feeds.iter().filter(|feed| feed.result.is_ok()).count()
    }
}

/// Fetches, parses and gates every source concurrently, then merges the
/// unseen articles in declaration order.
///
/// Each feed is an independent failure domain: its error is recorded in
/// the report and the remaining feeds are unaffected.
///
/// # Arguments
///
/// * `fetcher` - Shared HTTP fetcher (retry policy and User-Agents)
/// * `sources` - Feeds in declaration order; this order is kept in the output
/// * `gate` - Published-GUID lookup used to drop already delivered articles
/// * `cancel` - Cancels every feed that has not finished yet
///
/// # Returns
///
/// An [`IngestReport`] with the unseen articles, deduplicated across feeds,
/// and one [`FeedOutcome`] per source. An empty article list is a normal
/// outcome.
///
/// # Errors
///
/// The function itself does not fail. Per-feed failures are recorded in
/// the report as:
/// - [`FeedError::Fetch`] - The body could not be fetched
/// - [`FeedError::Parse`] - The body was undecodable, malformed or had no articles
/// - [`FeedError::Cancelled`] - `cancel` fired before the feed finished
pub async fn ingest_all<G: DedupGate>(
    fetcher: &Fetcher,
    sources: &[FeedSource],
    gate: &G,
    cancel: &CancellationToken,
) -> IngestReport {
    // join_all yields results in input order, so slot i always belongs to
    // sources[i] regardless of completion order
    let slots = join_all(
        sources
            .iter()
            .map(|source| ingest_one(fetcher, source, gate, cancel)),
    )
    .await;

    let mut feeds = Vec::with_capacity(sources.len());
    let mut per_feed = Vec::with_capacity(sources.len());

    for (source, slot) in sources.iter().zip(slots) {
        let result = slot.map(|(articles, stats)| {
            per_feed.push(articles);
            stats
        });
        feeds.push(FeedOutcome {
            url: source.url.clone(),
            header: source.header.clone(),
            result,
        });
    }

    let (articles, duplicates) = merge_in_feed_order(per_feed);
    if duplicates > 0 {
        tracing::debug!(duplicates, "Dropped articles already emitted by an earlier feed");
    }

    IngestReport {
        articles,
        feeds,
        duplicates,
    }
}

async fn ingest_one<G: DedupGate>(
    fetcher: &Fetcher,
    source: &FeedSource,
    gate: &G,
    cancel: &CancellationToken,
) -> Result<(Vec<Article>, FeedStats), FeedError> {
    let body = fetcher.fetch(source, cancel).await?;
    let parsed = parse(&body, source)?;

    let mut stats = FeedStats {
        parsed: parsed.len(),
        ..FeedStats::default()
    };
    let mut unseen = Vec::with_capacity(parsed.len());

    for article in parsed {
        if cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }

        match gate.is_published(&article.guid).await {
            Ok(true) => {}
            Ok(false) => unseen.push(article),
            Err(e) => {
                // Never re-surface an article we could not check
                stats.lookup_failures += 1;
                tracing::warn!(
                    feed = %source.url,
                    guid = %article.guid,
                    error = %e,
                    "Published lookup failed, skipping article"
                );
            }
        }
    }

    stats.unseen = unseen.len();
    Ok((unseen, stats))
}

/// Concatenates per-feed lists in the given order, keeping only the first
/// occurrence of each GUID. Returns the merged list and the number of
/// articles dropped as duplicates.
pub fn merge_in_feed_order(per_feed: Vec<Vec<Article>>) -> (Vec<Article>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(per_feed.iter().map(Vec::len).sum());
    let mut duplicates = 0;

    for article in per_feed.into_iter().flatten() {
        if seen.insert(article.guid.clone()) {
            merged.push(article);
        } else {
            duplicates += 1;
        }
    }

    (merged, duplicates)
}
