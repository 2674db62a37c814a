//! Delivery client
//!
//! [`DeliveryClient::send`] hands a payload to a background task and returns
//! immediately. Delivery failures are logged and absorbed; they never reach
//! the code that made the metered call. In-flight deliveries are tracked so a
//! short-lived process can [`flush`](DeliveryClient::flush) before exiting.

pub mod http;
pub mod retry;
pub mod summary;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use crate::config::MeteringConfig;
use crate::error::MeteringError;
use crate::types::MeteringPayload;

pub use http::{HttpSink, MeteringSink, MetricsLookup, MetricsRecord};
pub use retry::{Attempt, RetryExecutor, RetryPolicy};
pub use summary::SummaryPrinter;

/// Fire-and-forget payload delivery.
#[derive(Clone)]
pub struct DeliveryClient {
    sink: Arc<dyn MeteringSink>,
    summary: Option<Arc<SummaryPrinter>>,
    retry: RetryExecutor,
    tracker: TaskTracker,
    /// Number of `flush` calls currently waiting on the tracker
    flushing: Arc<Mutex<usize>>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("sink", &self.sink.name())
            .field("summary", &self.summary)
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}

impl DeliveryClient {
    pub fn new(sink: Arc<dyn MeteringSink>) -> Self {
        Self {
            sink,
            summary: None,
            retry: RetryExecutor::new(RetryPolicy::default()),
            tracker: TaskTracker::new(),
            flushing: Arc::new(Mutex::new(0)),
        }
    }

    /// HTTP delivery configured from `config`, with the local summary when
    /// enabled.
    pub fn from_config(config: &MeteringConfig) -> Result<Self, MeteringError> {
        let sink = Arc::new(HttpSink::new(config)?);
        let mut client = Self::new(sink.clone());

        if let Some(format) = config.print_summary {
            let mut printer = SummaryPrinter::new(format).with_retry(config.metrics_retry.clone());
            if let Some(team_id) = config.team_id.as_deref() {
                printer = printer.with_lookup(team_id, sink);
            }
            client = client.with_summary(printer);
        }
        Ok(client)
    }

    pub fn with_summary(mut self, printer: SummaryPrinter) -> Self {
        self.summary = Some(Arc::new(printer));
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    /// Ship a payload in the background. Never blocks and never fails; with
    /// no Tokio runtime available the payload is dropped with a warning.
    pub fn send(&self, payload: MeteringPayload) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(
                transaction_id = %payload.transaction_id,
                "No async runtime available; dropping metering payload"
            );
            return;
        };
        let this = self.clone();
        self.tracker
            .spawn_on(async move { this.deliver(payload).await }, &handle);
    }

    /// Deliver and summarize in the current task. Returns whether the
    /// metering service accepted the payload.
    pub async fn deliver(&self, payload: MeteringPayload) -> bool {
        let delivered = match self.retry.execute(|| self.sink.submit(&payload)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    transaction_id = %payload.transaction_id,
                    sink = self.sink.name(),
                    error = %e,
                    "Failed to deliver metering payload"
                );
                false
            }
        };

        if let Some(summary) = &self.summary {
            summary.print(&payload, delivered).await;
        }
        delivered
    }

    /// Number of deliveries still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `timeout` for in-flight deliveries. Returns `true` when
    /// everything finished in time. New deliveries may start while waiting,
    /// and concurrent callers may flush at the same time.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let _waiting = FlushGuard::enter(self);
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                in_flight = self.tracker.len(),
                "Timed out waiting for metering deliveries"
            );
        }
        drained
    }
}

/// Keeps the tracker closed while any flush is waiting. The last waiter to
/// leave reopens it.
struct FlushGuard<'a> {
    client: &'a DeliveryClient,
}

impl<'a> FlushGuard<'a> {
    fn enter(client: &'a DeliveryClient) -> Self {
        if let Ok(mut waiting) = client.flushing.lock() {
            *waiting += 1;
            client.tracker.close();
        }
        Self { client }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut waiting) = self.client.flushing.lock() {
            *waiting = waiting.saturating_sub(1);
            if *waiting == 0 {
                self.client.tracker.reopen();
            }
        }
    }
}
