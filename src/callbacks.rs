//! Capability interfaces the manager holds per connection.
//!
//! The manager never talks to a transport directly. Every worker connection
//! is a [`WorkerCallbacks`] and the (single) presentation client is an
//! [`ObserverCallbacks`]. Implementations surface delivery failures as
//! [`RecoveryError::Connectivity`](crate::error::RecoveryError::Connectivity)
//! or [`RecoveryError::Timeout`](crate::error::RecoveryError::Timeout).

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use crate::error::{RecoveryError, Result};
use crate::scheduler::Batch;

/// Server-to-worker channel.
#[async_trait]
pub trait WorkerCallbacks: Send + Sync + std::fmt::Debug {
    /// Hand the worker a batch to test.
    async fn assign_batch(&self, batch: Batch) -> Result<()>;

    /// Ask the worker to abandon whatever batch it is testing.
    async fn poison(&self) -> Result<()>;
}

/// Progress pushed to an observer once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub worker_count: usize,
    pub tested: u64,
    pub rate: u64,
    pub elapsed_secs: u64,
}

/// Server-to-presentation-client channel.
#[async_trait]
pub trait ObserverCallbacks: Send + Sync {
    async fn on_progress(&self, progress: JobProgress) -> Result<()>;

    async fn on_result(&self, plaintext: &str) -> Result<()>;

    async fn on_worker_count_changed(&self, count: usize) -> Result<()>;
}

/// Observer that writes every event to the log.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

#[async_trait]
impl ObserverCallbacks for TracingObserver {
    async fn on_progress(&self, progress: JobProgress) -> Result<()> {
        tracing::info!(
            workers = progress.worker_count,
            tested = progress.tested,
            rate = progress.rate,
            elapsed_secs = progress.elapsed_secs,
            "Job progress"
        );
        Ok(())
    }

    async fn on_result(&self, plaintext: &str) -> Result<()> {
        tracing::info!(plaintext, "Password recovered");
        Ok(())
    }

    async fn on_worker_count_changed(&self, count: usize) -> Result<()> {
        tracing::info!(count, "Connected workers changed");
        Ok(())
    }
}

/// Run one callback bounded by `timeout`. A timeout is retried once; any
/// other failure is returned as-is.
pub async fn deliver<F, Fut>(timeout: Duration, mut call: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    match deliver_once(timeout, call()).await {
        Err(RecoveryError::Timeout(reason)) => {
            tracing::warn!(reason, "Callback timed out, retrying once");
            deliver_once(timeout, call()).await
        }
        other => other,
    }
}

/// Run one callback bounded by `timeout`, without retrying.
pub async fn deliver_once<Fut>(timeout: Duration, call: Fut) -> Result<()>
where
    Fut: Future<Output = Result<()>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RecoveryError::Timeout(format!(
            "no response within {}ms",
            timeout.as_millis()
        ))),
    }
}
