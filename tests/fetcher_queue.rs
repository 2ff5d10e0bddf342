use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use ldfjoin::config::FetchConfig;
use ldfjoin::fetch::{HttpFetcher, RawResponse, Transport, media_type};
use ldfjoin::{LdfjoinError, Result};
use tokio::sync::Semaphore;

/// Transport that answers only when the test opens the gate, one request per permit.
struct GatedTransport {
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    accept: Mutex<Option<String>>,
    status: u16,
    content_type: Option<String>,
}

impl GatedTransport {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: Mutex::default(),
            accept: Mutex::default(),
            status: 200,
            content_type: Some("text/turtle; charset=utf-8".to_string()),
        }
    }
    fn open(self) -> Self {
        self.gate.add_permits(1_000);
        self
    }
    fn started(&self) -> Vec<String> {
        self.started.lock().expect("started lock").clone()
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn get(&self, url: &str, accept: &str) -> Result<RawResponse> {
        self.started.lock().expect("started lock").push(url.to_string());
        *self.accept.lock().expect("accept lock") = Some(accept.to_string());
        let permit = self.gate.acquire().await.map_err(|e| LdfjoinError::Fetch(e.to_string()))?;
        permit.forget();
        Ok(RawResponse { status: self.status, content_type: self.content_type.clone(), body: format!("body of {url}") })
    }
}

fn config(max_parallel: usize) -> FetchConfig {
    FetchConfig { max_parallel, ..FetchConfig::default() }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn overflow_is_served_in_arrival_order() {
    let fetcher = Arc::new(HttpFetcher::with_transport(GatedTransport::new(), config(2)));
    let urls: Vec<String> = (0..5).map(|i| format!("http://example.org/page/{i}")).collect();
    let all = {
        let fetcher = Arc::clone(&fetcher);
        let urls = urls.clone();
        tokio::spawn(async move { join_all(urls.iter().map(|url| fetcher.fetch(url))).await })
    };

    eventually("two requests in flight", || fetcher.in_flight() == 2 && fetcher.queued() == 3).await;
    let transport = fetcher.transport();
    assert_eq!(transport.started(), urls[..2].to_vec());

    for expected in 3..=5 {
        transport.gate.add_permits(1);
        eventually("the next queued request", || transport.started().len() == expected).await;
        assert!(fetcher.in_flight() <= 2, "never more than max_parallel requests");
    }
    assert_eq!(transport.started(), urls, "queued requests start first come, first served");

    transport.gate.add_permits(2);
    let responses = all.await.expect("fetch task");
    for (response, url) in responses.into_iter().zip(&urls) {
        let response = response.expect("fetched");
        assert_eq!(&response.url, url);
        assert_eq!(response.content_type, "text/turtle");
    }
    assert_eq!((fetcher.in_flight(), fetcher.queued()), (0, 0));
}

#[tokio::test]
async fn cancel_all_aborts_running_and_queued_requests() {
    let fetcher = Arc::new(HttpFetcher::with_transport(GatedTransport::new(), config(1)));
    let running = tokio::spawn({
        let fetcher = Arc::clone(&fetcher);
        async move { fetcher.fetch("http://example.org/a").await }
    });
    eventually("the first request", || fetcher.in_flight() == 1).await;
    let queued = tokio::spawn({
        let fetcher = Arc::clone(&fetcher);
        async move { fetcher.fetch("http://example.org/b").await }
    });
    eventually("the second request to queue", || fetcher.queued() == 1).await;

    fetcher.cancel_all();
    assert!(matches!(running.await.expect("task"), Err(LdfjoinError::Cancelled)));
    assert!(matches!(queued.await.expect("task"), Err(LdfjoinError::Cancelled)));
    assert_eq!((fetcher.in_flight(), fetcher.queued()), (0, 0));

    // the fetcher stays usable
    fetcher.transport().gate.add_permits(1);
    let response = fetcher.fetch("http://example.org/c").await.expect("fetch after cancel");
    assert_eq!(response.body, "body of http://example.org/c");
}

#[tokio::test]
async fn non_200_responses_fail() {
    let transport = GatedTransport { status: 404, ..GatedTransport::new() }.open();
    let fetcher = HttpFetcher::with_transport(transport, config(4));
    match fetcher.fetch("http://example.org/missing").await {
        Err(LdfjoinError::RequestFailed { url, status }) => {
            assert_eq!(url, "http://example.org/missing");
            assert_eq!(status, 404);
        }
        other => panic!("expected a failed request, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_requests_time_out() {
    let fetcher = HttpFetcher::with_transport(GatedTransport::new(), FetchConfig { timeout_ms: 20, ..config(1) });
    let result = fetcher.fetch("http://example.org/slow").await;
    assert!(matches!(result, Err(LdfjoinError::Timeout { .. })));
    assert_eq!(fetcher.in_flight(), 0, "the slot is given back");
}

#[tokio::test]
async fn accept_header_lists_preferences() {
    let fetcher = HttpFetcher::with_transport(GatedTransport::new().open(), config(1));
    fetcher.fetch("http://example.org/").await.expect("fetch");
    let accept = fetcher.transport().accept.lock().expect("accept lock").clone();
    assert_eq!(accept.as_deref(), Some("text/turtle;q=1.0,text/html;q=0.5"));
}

#[tokio::test]
async fn missing_content_type_defaults_to_html() {
    let transport = GatedTransport { content_type: None, ..GatedTransport::new() }.open();
    let fetcher = HttpFetcher::with_transport(transport, config(1));
    let response = fetcher.fetch("http://example.org/").await.expect("fetch");
    assert_eq!(response.content_type, "text/html");
}

#[test]
fn media_type_drops_parameters() {
    assert_eq!(media_type(Some("text/turtle;charset=utf-8")), "text/turtle");
    assert_eq!(media_type(Some("application/n-triples")), "application/n-triples");
    assert_eq!(media_type(Some(";q=1")), "text/html");
    assert_eq!(media_type(None), "text/html");
}

#[test]
fn zero_parallelism_is_raised_to_one() {
    let fetcher = HttpFetcher::with_transport(GatedTransport::new(), config(0));
    assert_eq!(fetcher.config().max_parallel, 1);
}
