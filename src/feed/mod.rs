//! Feed ingestion: fetching, format-specific parsing and aggregation.
//!
//! - **Fetching**: one GET per source with bounded retry and backoff
//! - **Parsing**: RSS 2.0, Reddit-flavored Atom and Slashdot RDF, all
//!   normalized into [`Article`] with a canonical GUID
//! - **Ingestion**: concurrent fan-out over every source, merged in
//!   declaration order and deduplicated by GUID
//!
//! # Example
//!
//! ```ignore
//! use headlines::feed::{build_client, ingest_all, Fetcher, UserAgents};
//!
//! let fetcher = Fetcher::new(build_client()?, UserAgents::for_contact("me@example.com"));
//! let report = ingest_all(&fetcher, &config.feeds, &store, &cancel).await;
//! for (feed, error) in report.failures() {
//!     tracing::warn!(feed = %feed.url, error = %error, "Feed failed");
//! }
//! ```

mod atom;
mod fetcher;
mod ingest;
mod links;
mod parser;
mod rdf;
mod rss;
mod types;

pub use fetcher::{build_client, FetchError, Fetcher, RetryPolicy, REQUEST_TIMEOUT};
pub use ingest::{ingest_all, merge_in_feed_order, FeedError, FeedOutcome, FeedStats, IngestReport};
pub use links::{is_self_host, resolve_outbound_link};
pub use parser::{parse, ParseError};
pub use types::{
    AgentClass, Article, FeedFormat, FeedSource, UserAgents, LEGACY_RDF_HEADER,
    REDDIT_HEADER_PREFIX,
};
