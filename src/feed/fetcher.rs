use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use reqwest::redirect::Policy;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::types::{FeedSource, UserAgents};

/// Per-request budget, independent of the retry loop.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 5;

const ACCEPT_FEEDS: &str = "application/rss+xml, application/atom+xml, application/xml, text/xml, */*";
const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.9";

/// Errors that can occur while fetching a single feed.
///
/// Only [`FetchError::Transport`] and [`FetchError::Timeout`] are produced
/// after retries; every other variant is terminal on first occurrence.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be built (malformed URL, bad header value)
    #[error("Invalid request: {0}")]
    Request(#[source] reqwest::Error),
    /// Network-level error (DNS, connection, TLS) on every attempt
    #[error("Request failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    /// Every attempt exceeded the per-request timeout
    #[error("Request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },
    /// HTTP response with non-2xx status code
    #[error("Unexpected status code: {0}")]
    HttpStatus(u16),
    /// Reading the response body failed midway
    #[error("Failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// The run was cancelled before the fetch completed
    #[error("Fetch cancelled")]
    Cancelled,
}

/// Bounded retry with exponential backoff.
///
/// Attempt `n` that fails transiently is followed by a pause of
/// `base_delay * 2^(n-1)` before attempt `n + 1`, until `max_attempts`
/// is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Pause after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Outcome of one attempt, before the retry loop decides what to do.
enum Attempt {
    Retry(Transient),
    Fail(FetchError),
}

enum Transient {
    Network(reqwest::Error),
    Timeout,
}

impl Transient {
    fn into_error(self, attempts: u32) -> FetchError {
        match self {
            Transient::Network(source) => FetchError::Transport { attempts, source },
            Transient::Timeout => FetchError::Timeout { attempts },
        }
    }
}

impl std::fmt::Display for Transient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transient::Network(e) => write!(f, "{e}"),
            Transient::Timeout => f.write_str("request timed out"),
        }
    }
}

/// Builds the shared HTTP client used for every feed.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Fetches raw feed bodies, one source at a time, with retry.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    agents: UserAgents,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, agents: UserAgents) -> Self {
        Self {
            client,
            agents,
            retry: RetryPolicy::default(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Fetches the body of `source`.
    ///
    /// Transport failures and timeouts are retried according to the
    /// [`RetryPolicy`]; a non-success status is returned immediately.
    ///
    /// # Arguments
    ///
    /// * `source` - Feed to fetch; its agent class selects the User-Agent
    /// * `cancel` - Aborts an in-flight request or a pending backoff
    ///
    /// # Returns
    ///
    /// The raw response body, at most 10MB, not yet charset-decoded.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Request`] - The request could not be built
    /// - [`FetchError::Transport`] - Connection, TLS or redirect failure on every attempt
    /// - [`FetchError::Timeout`] - Every attempt exceeded the request timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx response (not retried)
    /// - [`FetchError::Body`] - The body stream failed mid-read
    /// - [`FetchError::ResponseTooLarge`] - Response exceeded 10MB
    /// - [`FetchError::Cancelled`] - `cancel` fired first
    pub async fn fetch(
        &self,
        source: &FeedSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = self.attempt(source) => outcome,
            };

            let transient = match outcome {
                Ok(bytes) => return Ok(bytes),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry(transient)) => transient,
            };

            if attempt >= max_attempts {
                return Err(transient.into_error(attempt));
            }

            let delay = self.retry.delay_after(attempt);
            tracing::warn!(
                feed = %source.url,
                attempt,
                error = %transient,
                delay_ms = delay.as_millis() as u64,
                "Fetch failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// One request/response cycle bounded by the per-request timeout.
    async fn attempt(&self, source: &FeedSource) -> Result<Vec<u8>, Attempt> {
        tokio::time::timeout(self.request_timeout, self.send_and_read(source))
            .await
            .map_err(|_| Attempt::Retry(Transient::Timeout))?
    }

    async fn send_and_read(&self, source: &FeedSource) -> Result<Vec<u8>, Attempt> {
        let response = self.request(source).send().await.map_err(|e| {
            if e.is_builder() {
                Attempt::Fail(FetchError::Request(e))
            } else {
                Attempt::Retry(Transient::Network(e))
            }
        })?;

        if !response.status().is_success() {
            return Err(Attempt::Fail(FetchError::HttpStatus(
                response.status().as_u16(),
            )));
        }

        read_limited_bytes(response, MAX_FEED_SIZE)
            .await
            .map_err(Attempt::Fail)
    }

    fn request(&self, source: &FeedSource) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(&source.url)
            .header(USER_AGENT, self.agents.select(source.agent))
            .header(ACCEPT, ACCEPT_FEEDS)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .header(CACHE_CONTROL, "no-cache");

        if source.enhanced_headers {
            request
                .header("Sec-Fetch-Dest", "document")
                .header("Sec-Fetch-Mode", "navigate")
                .header("Sec-Fetch-Site", "none")
        } else {
            request
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Body)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::AgentClass;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn fast_fetcher() -> Fetcher {
        Fetcher::new(reqwest::Client::new(), UserAgents::for_contact("test@example.com"))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
            })
            .with_request_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fetch_success_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test");
        let body = fast_fetcher()
            .fetch(&source, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(body, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_bot_agent_and_fixed_headers_sent() {
        let mock_server = MockServer::start().await;
        let agents = UserAgents::for_contact("test@example.com");
        Mock::given(method("GET"))
            .and(header("User-Agent", agents.bot.as_str()))
            .and(header("Accept-Language", ACCEPT_LANGUAGE_VALUE))
            .and(header("Cache-Control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test");
        let result = fast_fetcher().fetch(&source, &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_chrome_agent_with_navigation_headers() {
        let mock_server = MockServer::start().await;
        let agents = UserAgents::for_contact("test@example.com");
        Mock::given(method("GET"))
            .and(header("User-Agent", agents.chrome.as_str()))
            .and(header("Sec-Fetch-Mode", "navigate"))
            .and(header("Sec-Fetch-Dest", "document"))
            .and(header("Sec-Fetch-Site", "none"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test")
            .with_agent(AgentClass::Chrome)
            .with_enhanced_headers(true);
        let result = fast_fetcher().fetch(&source, &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_http_500_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test");
        let result = fast_fetcher().fetch(&source, &CancellationToken::new()).await;
        match result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_404_is_terminal() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test");
        let result = fast_fetcher().fetch(&source, &CancellationToken::new()).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_timeout_retried_up_to_budget() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(2)),
            )
            .expect(3)
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test");
        let result = fast_fetcher().fetch(&source, &CancellationToken::new()).await;
        assert!(matches!(result, Err(FetchError::Timeout { attempts: 3 })));
    }

    #[tokio::test]
    async fn test_slow_first_attempt_then_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(2)),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test");
        let body = fast_fetcher()
            .fetch(&source, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(body, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop a listener so the port is known to be closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = FeedSource::new(format!("http://{addr}/feed"), "Test");
        let result = fast_fetcher().fetch(&source, &CancellationToken::new()).await;
        assert!(matches!(result, Err(FetchError::Transport { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_invalid_url_is_request_error() {
        let source = FeedSource::new("not a url", "Test");
        let result = fast_fetcher().fetch(&source, &CancellationToken::new()).await;
        assert!(matches!(result, Err(FetchError::Request(_))));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test");
        let result = fast_fetcher().fetch(&source, &cancel).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_oversized_content_length_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; MAX_FEED_SIZE + 1]))
            .mount(&mock_server)
            .await;

        let source = FeedSource::new(format!("{}/feed", mock_server.uri()), "Test");
        let result = fast_fetcher()
            .with_request_timeout(Duration::from_secs(10))
            .fetch(&source, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }
}
