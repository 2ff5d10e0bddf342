//! Bounded-concurrency page fetching.
//!
//! [`HttpFetcher`] executes at most `max_parallel` requests at a time; excess
//! requests wait in first-come, first-served order. [`HttpFetcher::cancel_all`]
//! aborts every in-flight and queued request. The HTTP exchange itself sits
//! behind the [`Transport`] trait, with [`ReqwestTransport`] as the default.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, trace, warn};

use crate::config::FetchConfig;
use crate::error::{LdfjoinError, Result};

lazy_static! {
    static ref MEDIA_TYPE: Regex = Regex::new(r"^[^;]+").expect("media type pattern");
}

const DEFAULT_MEDIA_TYPE: &str = "text/html";

/// Media type of a `Content-Type` header, without parameters.
pub fn media_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(|header| MEDIA_TYPE.find(header))
        .map(|m| m.as_str().trim().to_string())
        .filter(|media_type| !media_type.is_empty())
        .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string())
}

/// Response as handed over by a transport, before any checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, accept: &str) -> Result<RawResponse>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, accept: &str) -> Result<RawResponse> {
        let response = self.client.get(url).header(ACCEPT, accept).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        Ok(RawResponse { status, content_type, body })
    }
}

// Keeps the queue length right when a waiting fetch is dropped.
struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct HttpFetcher<T: Transport = ReqwestTransport> {
    transport: T,
    config: FetchConfig,
    accept: String,
    slots: Semaphore,
    queued: AtomicUsize,
    cancelled: Notify,
}

impl HttpFetcher<ReqwestTransport> {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> HttpFetcher<T> {
    pub fn with_transport(transport: T, mut config: FetchConfig) -> Self {
        config.max_parallel = config.max_parallel.max(1);
        Self {
            accept: config.accept_header(),
            slots: Semaphore::new(config.max_parallel),
            transport,
            config,
            queued: AtomicUsize::new(0),
            cancelled: Notify::new(),
        }
    }
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
    pub fn transport(&self) -> &T {
        &self.transport
    }
    /// Requests currently being executed.
    pub fn in_flight(&self) -> usize {
        self.config.max_parallel - self.slots.available_permits()
    }
    /// Requests waiting for a free slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Fetches the document at `url`. Fails for anything but status 200.
    pub async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        // created up front so that cancel_all reaches this request while queued
        let cancelled = self.cancelled.notified();
        tokio::pin!(cancelled);

        let permit = {
            let _queued = Queued::enter(&self.queued);
            tokio::select! {
                biased;
                _ = &mut cancelled => return Err(LdfjoinError::Cancelled),
                permit = self.slots.acquire() => permit.map_err(|_| LdfjoinError::Cancelled)?,
            }
        };
        trace!(url, in_flight = self.in_flight(), queued = self.queued(), "fetching");
        let response = tokio::select! {
            biased;
            _ = &mut cancelled => return Err(LdfjoinError::Cancelled),
            response = tokio::time::timeout(self.config.timeout(), self.transport.get(url, &self.accept)) => response,
        };
        drop(permit);

        let response = match response {
            Ok(response) => response?,
            Err(_) => {
                warn!(url, timeout_ms = self.config.timeout_ms, "request timed out");
                return Err(LdfjoinError::Timeout { url: url.to_string() });
            }
        };
        if response.status != 200 {
            warn!(url, status = response.status, "request failed");
            return Err(LdfjoinError::RequestFailed { url: url.to_string(), status: response.status });
        }
        let content_type = media_type(response.content_type.as_deref());
        debug!(url, %content_type, bytes = response.body.len(), "fetched");
        Ok(FetchResponse {
            url: url.to_string(),
            status: response.status,
            content_type,
            body: response.body,
        })
    }

    /// Aborts every in-flight and queued request.
    pub fn cancel_all(&self) {
        info!(in_flight = self.in_flight(), queued = self.queued(), "cancelling all requests");
        self.cancelled.notify_waiters();
    }
}
