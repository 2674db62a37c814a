//! Process-wide metering layer
//!
//! Hosts that cannot thread a [`MeteringLayer`] through their code can use
//! the global one. Initialization runs once; callers racing to initialize
//! all wait on the same in-flight attempt. A failed attempt leaves the cell
//! empty so a later call may retry.

use std::future::Future;
use tokio::sync::OnceCell;

use crate::error::MeteringError;
use crate::layer::MeteringLayer;

/// A layer built on first use.
#[derive(Debug)]
pub struct LazyLayer {
    cell: OnceCell<MeteringLayer>,
}

impl Default for LazyLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyLayer {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// Return the layer, building it with `init` if nobody has yet.
    pub async fn get_or_init_with<F, Fut>(&self, init: F) -> Result<&MeteringLayer, MeteringError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MeteringLayer, MeteringError>>,
    {
        self.cell.get_or_try_init(init).await
    }

    pub fn get(&self) -> Option<&MeteringLayer> {
        self.cell.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

static GLOBAL: LazyLayer = LazyLayer::new();

/// Global layer configured from the process environment.
pub async fn init() -> Result<&'static MeteringLayer, MeteringError> {
    init_with(|| async { MeteringLayer::builder().init_logging(true).build() }).await
}

/// Global layer built by `build`, unless one already exists.
pub async fn init_with<F, Fut>(build: F) -> Result<&'static MeteringLayer, MeteringError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<MeteringLayer, MeteringError>>,
{
    GLOBAL.get_or_init_with(build).await.inspect_err(|e| {
        tracing::warn!(error = %e, "Failed to initialize global metering layer");
    })
}

/// The global layer, if initialized.
pub fn get() -> Option<&'static MeteringLayer> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeteringConfig;
    use crate::delivery::MeteringSink;
    use crate::types::MeteringPayload;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NullSink;

    #[async_trait]
    impl MeteringSink for NullSink {
        async fn submit(&self, _payload: &MeteringPayload) -> Result<(), MeteringError> {
            Ok(())
        }
    }

    fn build() -> Result<MeteringLayer, MeteringError> {
        MeteringLayer::builder()
            .config(
                MeteringConfig::builder()
                    .api_key("hak_test_1234567890")
                    .build()?,
            )
            .sink(Arc::new(NullSink))
            .build()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_callers_share_one_initialization() {
        let lazy = Arc::new(LazyLayer::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let lazy = lazy.clone();
            let builds = builds.clone();
            tasks.push(tokio::spawn(async move {
                let layer = lazy
                    .get_or_init_with(|| async {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        build()
                    })
                    .await
                    .unwrap();
                layer as *const MeteringLayer as usize
            }));
        }

        let mut addresses = Vec::new();
        for task in tasks {
            addresses.push(task.await.unwrap());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        addresses.dedup();
        assert_eq!(addresses.len(), 1);
    }

    #[tokio::test]
    async fn failed_initialization_can_be_retried() {
        let lazy = LazyLayer::new();
        let err = lazy
            .get_or_init_with(|| async { Err(MeteringError::Config("missing key".into())) })
            .await;
        assert!(err.is_err());
        assert!(!lazy.is_initialized());

        assert!(lazy.get_or_init_with(|| async { build() }).await.is_ok());
        assert!(lazy.get().is_some());
    }
}
