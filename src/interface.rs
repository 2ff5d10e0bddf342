//! Asynchronous interface for submitting and controlling queries.
//!
//! Each submitted [`Controller`] runs on its own tokio task. Queries are
//! identified by a [`QueryId`] and can be cancelled cooperatively: the
//! controller observes its [`CancelToken`] between and during steps, while the
//! shared [`HttpFetcher`] aborts every outstanding request so that no query
//! waits for the network on its way out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::controller::{Controller, QueryOutcome};
use crate::error::{LdfjoinError, Result};
use crate::fetch::{HttpFetcher, ReqwestTransport, Transport};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation token shared between a query and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<CancelState>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }
    /// Completes once the token has been cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.0.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Opaque query identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(u64);

/// Handle to a running or completed query.
#[derive(Debug)]
pub struct QueryHandle {
    pub id: QueryId,
    cancel: CancelToken,
    started: Instant,
    join: JoinHandle<Result<QueryOutcome>>,
}

impl QueryHandle {
    /// Request cancellation (cooperative).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    /// Wait for the query to finish.
    pub async fn join(self) -> Result<QueryOutcome> {
        self.join
            .await
            .map_err(|e| LdfjoinError::Invariant(format!("query task failed: {e}")))?
    }
    /// Elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

type ActiveQueries = Arc<Mutex<HashMap<QueryId, CancelToken>>>;

/// Registry managing query lifecycles.
pub struct QueryInterface<T: Transport = ReqwestTransport> {
    fetcher: Option<Arc<HttpFetcher<T>>>,
    next_id: AtomicU64,
    active: ActiveQueries,
}

impl<T: Transport + 'static> QueryInterface<T> {
    pub fn new() -> Self {
        Self { fetcher: None, next_id: AtomicU64::new(0), active: ActiveQueries::default() }
    }
    /// Cancelling a query also aborts every request of this fetcher.
    pub fn with_fetcher(fetcher: Arc<HttpFetcher<T>>) -> Self {
        Self { fetcher: Some(fetcher), ..Self::new() }
    }

    fn allocate_id(&self) -> QueryId {
        QueryId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Runs the controller on a background task. Must be called within a tokio runtime.
    pub fn start_query(&self, mut controller: Controller) -> QueryHandle {
        let id = self.allocate_id();
        let cancel = CancelToken::new();
        if let Ok(mut active) = self.active.lock() {
            active.insert(id, cancel.clone());
        }
        let active = Arc::clone(&self.active);
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let outcome = controller.run(&token).await;
            if let Ok(mut active) = active.lock() {
                active.remove(&id);
            }
            outcome
        });
        debug!(query = ?id, "query started");
        QueryHandle { id, cancel, started: Instant::now(), join }
    }

    /// Number of queries that have not finished yet.
    pub fn running(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    /// Cancel a query by id.
    pub fn cancel(&self, id: QueryId) -> bool {
        let token = self
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(&id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                if let Some(fetcher) = &self.fetcher {
                    fetcher.cancel_all();
                }
                info!(query = ?id, "query cancelled");
                true
            }
            None => false,
        }
    }
}

impl<T: Transport + 'static> Default for QueryInterface<T> {
    fn default() -> Self {
        Self::new()
    }
}
