use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::catalog::Offer;
use crate::feed::extract::{extract_offers, ExtractReport};
use crate::feed::payload::SpooledPayload;
use crate::feed::FeedDescriptor;
use crate::util::QuotePolicy;

/// Browser identity sent with every feed request. Several suppliers refuse
/// requests that do not look like a desktop browser.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_MAX_FEED_BYTES: usize = 512 * 1024 * 1024; // 512MB

/// Errors that fail a single feed.
///
/// None of these abort a run; they end up in the feed's [`FeedOutcome`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, body stream)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request plus body read exceeded the per-request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response larger than {0} bytes")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The body could not be written to its temporary file
    #[error("Failed to spool response: {0}")]
    Spool(#[from] std::io::Error),
    /// The extraction task died before producing a result
    #[error("Extraction failed: {0}")]
    Extraction(String),
}

/// Knobs for one fetch pass.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Deadline for one feed, covering connect, headers and body.
    pub timeout: Duration,
    /// Maximum feeds in flight at once.
    pub concurrency: usize,
    pub max_feed_bytes: usize,
    pub quotes: QuotePolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            quotes: QuotePolicy::Keep,
        }
    }
}

/// What happened to one feed, suitable for the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedOutcome {
    pub url: String,
    pub prefix: String,
    pub offer_count: usize,
    pub succeeded: bool,
    /// Transport failure, or the parse error that cut a payload short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Offers and diagnostics produced by one feed.
#[derive(Debug)]
pub struct FeedResult {
    pub feed: FeedDescriptor,
    pub outcome: FeedOutcome,
    pub offers: Vec<Offer>,
    pub report: ExtractReport,
}

/// Builds the HTTP client used for feed requests.
pub fn build_client(user_agent: &str) -> Result<reqwest::Client, FetchError> {
    Ok(reqwest::Client::builder().user_agent(user_agent).build()?)
}

/// Fetches and extracts every feed concurrently.
///
/// Each feed is an independent task returning a plain value; a failure,
/// timeout or malformed payload in one feed never affects another. Up to
/// `options.concurrency` feeds are in flight at once, in completion order,
/// but the returned vector is always in feed-list order so that merge
/// conflicts resolve the same way on every run.
pub async fn fetch_all(
    client: &reqwest::Client,
    feeds: &[FeedDescriptor],
    options: &FetchOptions,
) -> Vec<FeedResult> {
    if feeds.is_empty() {
        return Vec::new();
    }

    let mut results: Vec<(usize, FeedResult)> = stream::iter(feeds.iter().cloned().enumerate())
        .map(|(position, feed)| {
            let client = client.clone();
            async move { (position, fetch_feed(&client, feed, options).await) }
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(position, _)| *position);
    results.into_iter().map(|(_, result)| result).collect()
}

/// Fetches one feed and runs the extractor over its payload.
pub async fn fetch_feed(
    client: &reqwest::Client,
    feed: FeedDescriptor,
    options: &FetchOptions,
) -> FeedResult {
    let started = Instant::now();
    let prefix = feed.prefix().into_owned();

    let extracted = match download(client, &feed.url, options).await {
        Ok((payload, size)) => {
            let task_feed = feed.clone();
            let quotes = options.quotes;
            // The scan is CPU-bound and reads the spool with blocking I/O
            tokio::task::spawn_blocking(move || extract_offers(payload, &task_feed, quotes))
                .await
                .map(|extracted| (size, extracted))
                .map_err(|e| FetchError::Extraction(e.to_string()))
        }
        Err(e) => Err(e),
    };

    match extracted {
        Ok((size, (offers, report))) => {
            let succeeded = !(report.aborted.is_some() && offers.is_empty());
            let error = report
                .aborted
                .as_ref()
                .map(|e| format!("Malformed payload: {e}"));

            if let Some(e) = &error {
                tracing::warn!(feed = %feed.url, offers = offers.len(), error = %e, "Feed payload cut short");
            }
            if report.recovered > 0 || report.incomplete > 0 {
                tracing::info!(
                    feed = %feed.url,
                    recovered = report.recovered,
                    incomplete = report.incomplete,
                    duplicates = report.duplicates,
                    "Dropped offers while extracting"
                );
            }
            if offers.is_empty() && succeeded {
                tracing::warn!(feed = %feed.url, "Feed contained no usable offers");
            }
            tracing::info!(
                feed = %feed.url,
                bytes = size,
                offers = offers.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Feed processed"
            );

            FeedResult {
                outcome: FeedOutcome {
                    url: feed.url.clone(),
                    prefix,
                    offer_count: offers.len(),
                    succeeded,
                    error,
                },
                feed,
                offers,
                report,
            }
        }
        Err(e) => {
            tracing::warn!(feed = %feed.url, error = %e, "Feed failed");
            FeedResult {
                outcome: FeedOutcome {
                    url: feed.url.clone(),
                    prefix,
                    offer_count: 0,
                    succeeded: false,
                    error: Some(e.to_string()),
                },
                feed,
                offers: Vec::new(),
                report: ExtractReport::default(),
            }
        }
    }
}

async fn download(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
) -> Result<(SpooledPayload, usize), FetchError> {
    let request = async {
        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }
        spool_limited(response, options.max_feed_bytes).await
    };

    tokio::time::timeout(options.timeout, request)
        .await
        .map_err(|_| FetchError::Timeout(options.timeout))?
}

/// Streams the body into a temporary file, enforcing the size limit and
/// the advertised Content-Length. Returns the spool and its size.
async fn spool_limited(
    response: reqwest::Response,
    limit: usize,
) -> Result<(SpooledPayload, usize), FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let spool = NamedTempFile::new()?;
    let mut file = tokio::fs::File::from_std(spool.as_file().try_clone()?);
    let mut received: usize = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if received.saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        file.write_all(&chunk).await?;
        received += chunk.len();
    }
    file.flush().await?;

    if let Some(expected) = expected_length {
        if (received as u64) < expected {
            return Err(FetchError::IncompleteResponse { expected, received });
        }
    }

    Ok((SpooledPayload::new(spool), received))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    const VALID_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<yml_catalog><shop><offers>
    <offer id="1"><name>Widget</name><price>10</price></offer>
    <offer id="2"><name>Gadget</name><price>20</price></offer>
</offers></shop></yml_catalog>"#;

    fn descriptor(server: &MockServer, route: &str, index: usize) -> FeedDescriptor {
        FeedDescriptor::new(index, format!("{}{}", server.uri(), route), None)
    }

    fn client() -> reqwest::Client {
        build_client(DEFAULT_USER_AGENT).unwrap()
    }

    /// Matches the whole `User-Agent` value. wiremock's `header` matcher
    /// splits on commas, which a browser identity always contains.
    struct UserAgent(&'static str);

    impl Match for UserAgent {
        fn matches(&self, request: &Request) -> bool {
            request
                .headers
                .get("user-agent")
                .and_then(|value| value.to_str().ok())
                == Some(self.0)
        }
    }

    #[tokio::test]
    async fn test_fetch_success_sends_browser_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(UserAgent(DEFAULT_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_FEED))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetch_feed(&client(), descriptor(&server, "/feed", 1), &FetchOptions::default()).await;
        assert!(result.outcome.succeeded);
        assert_eq!(result.outcome.offer_count, 2);
        assert_eq!(result.outcome.prefix, "f1");
        assert_eq!(result.offers[0].resolved_id, "f1_1");
    }

    #[tokio::test]
    async fn test_non_success_status_fails_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1) // no retries
            .mount(&server)
            .await;

        let result = fetch_feed(&client(), descriptor(&server, "/feed", 1), &FetchOptions::default()).await;
        assert!(!result.outcome.succeeded);
        assert!(result.offers.is_empty());
        assert_eq!(result.outcome.error.as_deref(), Some("HTTP error: status 404"));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetch_feed(&client(), descriptor(&server, "/feed", 1), &FetchOptions::default()).await;
        assert!(!result.outcome.succeeded);
    }

    #[tokio::test]
    async fn test_timeout_fails_only_that_feed() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_FEED)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        Mock::given(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_FEED))
            .mount(&server)
            .await;

        let options = FetchOptions {
            timeout: Duration::from_millis(300),
            ..FetchOptions::default()
        };
        let feeds = vec![descriptor(&server, "/slow", 1), descriptor(&server, "/fast", 2)];
        let results = fetch_all(&client(), &feeds, &options).await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].outcome.succeeded);
        assert!(results[0].outcome.error.as_deref().unwrap().contains("timed out"));
        assert!(results[1].outcome.succeeded);
        assert_eq!(results[1].offers.len(), 2);
    }

    #[tokio::test]
    async fn test_results_follow_declaration_order() {
        let server = MockServer::start().await;
        Mock::given(path("/first"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_FEED)
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        Mock::given(path("/second"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_FEED))
            .mount(&server)
            .await;

        let feeds = vec![descriptor(&server, "/first", 1), descriptor(&server, "/second", 2)];
        let results = fetch_all(&client(), &feeds, &FetchOptions::default()).await;
        let prefixes: Vec<_> = results.iter().map(|r| r.outcome.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["f1", "f2"]);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_FEED))
            .mount(&server)
            .await;

        let options = FetchOptions {
            max_feed_bytes: 16,
            ..FetchOptions::default()
        };
        let result = fetch_feed(&client(), descriptor(&server, "/feed", 1), &options).await;
        assert!(!result.outcome.succeeded);
        assert!(result.outcome.error.unwrap().contains("larger than 16"));
    }

    #[tokio::test]
    async fn test_unparsable_payload_fails_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<<<definitely not xml"))
            .mount(&server)
            .await;

        let result = fetch_feed(&client(), descriptor(&server, "/feed", 1), &FetchOptions::default()).await;
        assert!(!result.outcome.succeeded);
        assert!(result.outcome.error.unwrap().starts_with("Malformed payload"));
    }

    #[tokio::test]
    async fn test_partial_payload_keeps_offers() {
        let truncated = r#"<offers><offer id="1"><name>A</name><price>1</price></offer><offer id="2"><na"#;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(truncated))
            .mount(&server)
            .await;

        let result = fetch_feed(&client(), descriptor(&server, "/feed", 1), &FetchOptions::default()).await;
        assert!(result.outcome.succeeded);
        assert_eq!(result.outcome.offer_count, 1);
        assert!(result.outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_recovered_offer_leaves_feed_error_free() {
        let repaired = r#"<yml_catalog><shop><offers>
    <offer id="1"><name>Broken</nme><price>1</price></offer>
    <offer id="2"><name>Fine</name><price>2</price></offer>
</offers></shop></yml_catalog>"#;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repaired))
            .mount(&server)
            .await;

        let result = fetch_feed(&client(), descriptor(&server, "/feed", 1), &FetchOptions::default()).await;
        assert!(result.outcome.succeeded);
        assert_eq!(result.outcome.offer_count, 1);
        assert_eq!(result.outcome.error, None);
        assert_eq!(result.report.recovered, 1);
    }

    #[tokio::test]
    async fn test_large_body_is_spooled_and_fully_extracted() {
        let offers: String = (0..2000)
            .map(|i| format!("<offer id=\"{i}\"><name>Item {i}</name><price>{i}</price></offer>\n"))
            .collect();
        let body = format!("<yml_catalog><shop><offers>\n{offers}</offers></shop></yml_catalog>");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let result = fetch_feed(&client(), descriptor(&server, "/feed", 1), &FetchOptions::default()).await;
        assert!(result.outcome.succeeded);
        assert_eq!(result.outcome.offer_count, 2000);
        assert_eq!(result.offers[1999].resolved_id, "f1_1999");
    }

    #[tokio::test]
    async fn test_fetch_all_empty() {
        let results = fetch_all(&client(), &[], &FetchOptions::default()).await;
        assert!(results.is_empty());
    }
}
