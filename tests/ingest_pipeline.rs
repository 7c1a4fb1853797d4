//! End-to-end ingestion over all three feed dialects.
//!
//! Feeds are served by a local mock server; the published store is an
//! in-memory SQLite database so every test starts clean.

use std::time::Duration;

use headlines::feed::{
    ingest_all, Article, FeedError, FeedFormat, FeedSource, FetchError, Fetcher, RetryPolicy,
    UserAgents,
};
use headlines::storage::PublishedStore;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
<channel>
  <title>Example News</title>
  <item>
    <title>Markets rally</title>
    <link>https://news.test/markets</link>
    <guid isPermaLink="false">n-100</guid>
  </item>
  <item>
    <title>No guid here</title>
    <link>https://news.test/no-guid</link>
  </item>
</channel>
</rss>"#;

const REDDIT_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>r/rust</title>
  <entry>
    <id>t3_111</id>
    <title>Blog post about async</title>
    <link href="https://www.reddit.com/r/rust/comments/111/blog/"/>
    <content type="html">&lt;a href=&quot;https://reddit.com/r/x&quot;&gt;in&lt;/a&gt; &lt;a href=&quot;https://news.test/y&quot;&gt;out&lt;/a&gt;</content>
  </entry>
  <entry>
    <id>t3_222</id>
    <title>Markets rally</title>
    <link href="https://www.reddit.com/r/rust/comments/222/self/"/>
    <content type="html">&lt;p&gt;self post&lt;/p&gt;</content>
  </entry>
</feed>"#;

fn slashdot_feed() -> Vec<u8> {
    let mut body = br#"<?xml version="1.0" encoding="ISO-8859-1"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
<channel><title>Slashdot</title><link>https://slashdot.org/</link></channel>
<item><title>Caf"#
        .to_vec();
    // Latin-1 e-acute
    body.push(0xe9);
    body.extend_from_slice(
        br#" &amp;amp; Code</title><link>https://slashdot.org/story/42</link></item>
</rdf:RDF>"#,
    );
    body
}

async fn serve(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn feed_server() -> MockServer {
    let server = MockServer::start().await;
    serve(
        &server,
        "/news",
        ResponseTemplate::new(200)
            .set_body_string(RSS_FEED)
            .set_delay(Duration::from_millis(200)),
    )
    .await;
    serve(&server, "/broken", ResponseTemplate::new(500)).await;
    serve(&server, "/rust", ResponseTemplate::new(200).set_body_string(REDDIT_FEED)).await;
    serve(&server, "/slashdot", ResponseTemplate::new(200).set_body_bytes(slashdot_feed())).await;
    server
}

fn sources(server: &MockServer) -> Vec<FeedSource> {
    vec![
        FeedSource::new(format!("{}/news", server.uri()), "Example News"),
        FeedSource::new(format!("{}/broken", server.uri()), "Broken"),
        FeedSource::new(format!("{}/rust", server.uri()), "r/rust"),
        FeedSource::new(format!("{}/slashdot", server.uri()), "Slashdot"),
    ]
}

fn fetcher() -> Fetcher {
    Fetcher::new(reqwest::Client::new(), UserAgents::for_contact("test@example.com")).with_retry(
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(5),
        },
    )
}

fn article(guid: &str, title: &str, header: &str, link: &str) -> Article {
    Article {
        guid: guid.to_string(),
        title: title.to_string(),
        header: header.to_string(),
        link: link.to_string(),
    }
}

#[tokio::test]
async fn test_all_dialects_merge_in_declaration_order() {
    let server = feed_server().await;
    let store = PublishedStore::open(":memory:").await.unwrap();

    let report = ingest_all(&fetcher(), &sources(&server), &store, &CancellationToken::new()).await;

    assert_eq!(
        report.articles,
        vec![
            article("ExampleNews:n-100", "Markets rally", "Example News", "https://news.test/markets"),
            article("https://news.test/no-guid", "No guid here", "Example News", "https://news.test/no-guid"),
            article("r/rust:t3_111", "Blog post about async", "r/rust", "https://news.test/y"),
            article(
                "r/rust:t3_222",
                "Markets rally",
                "r/rust",
                "https://www.reddit.com/r/rust/comments/222/self/"
            ),
            article(
                "https://slashdot.org/story/42",
                "Café & Code",
                "Slashdot",
                "https://slashdot.org/story/42"
            ),
        ]
    );

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.header, "Broken");
    assert!(matches!(failures[0].1, FeedError::Fetch(FetchError::HttpStatus(500))));
}

#[tokio::test]
async fn test_marked_articles_are_not_offered_again() {
    let server = feed_server().await;
    let store = PublishedStore::open(":memory:").await.unwrap();
    let fetcher = fetcher();
    let sources = sources(&server);
    let cancel = CancellationToken::new();

    let first = ingest_all(&fetcher, &sources, &store, &cancel).await;
    assert_eq!(first.articles.len(), 5);

    let marked = store.mark_published(&first.articles).await.unwrap();
    assert_eq!(marked, 5);

    let second = ingest_all(&fetcher, &sources, &store, &cancel).await;
    assert!(second.articles.is_empty());
    assert_eq!(second.failures().count(), 1);
    assert_eq!(second.succeeded(), 3);
}

#[tokio::test]
async fn test_explicit_format_overrides_header() {
    let server = feed_server().await;
    let store = PublishedStore::open(":memory:").await.unwrap();

    // Header does not start with "r/", but the format is declared
    let sources = vec![FeedSource::new(format!("{}/rust", server.uri()), "Rust Subreddit")
        .with_format(FeedFormat::AtomReddit)];

    let report = ingest_all(&fetcher(), &sources, &store, &CancellationToken::new()).await;

    assert_eq!(report.articles.len(), 2);
    assert_eq!(report.articles[0].guid, "RustSubreddit:t3_111");
}
