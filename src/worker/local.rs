use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::callbacks::WorkerCallbacks;
use crate::config::WorkerConfig;
use crate::error::{RecoveryError, Result};
use crate::manager::{BatchReport, Manager};
use crate::scheduler::{Batch, ConnectionId, WorkerId};
use crate::worker::executor::BatchExecutor;

/// Callback side of an in-process worker: batches go through a bounded
/// channel, poison cancels the token of the batch being tested.
#[derive(Debug)]
pub struct LocalWorker {
    tx: mpsc::Sender<Batch>,
    current: Arc<Mutex<CancellationToken>>,
}

#[async_trait]
impl WorkerCallbacks for LocalWorker {
    async fn assign_batch(&self, batch: Batch) -> Result<()> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| RecoveryError::Connectivity("local worker has stopped".to_string()))
    }

    async fn poison(&self) -> Result<()> {
        let current = self
            .current
            .lock()
            .map_err(|_| RecoveryError::Connectivity("local worker state poisoned".to_string()))?;
        current.cancel();
        Ok(())
    }
}

/// A running local worker.
#[derive(Debug)]
pub struct LocalWorkerHandle {
    pub worker_id: WorkerId,
    pub connection_id: ConnectionId,
    pub task: JoinHandle<()>,
}

impl LocalWorker {
    /// Register a new in-process worker with `manager` and start its loop.
    ///
    /// The worker stops asking for work after `config.max_batches` batches,
    /// and deregisters itself when `shutdown` is cancelled.
    pub async fn spawn(
        manager: Arc<Manager>,
        config: &WorkerConfig,
        shutdown: CancellationToken,
    ) -> Result<LocalWorkerHandle> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let current = Arc::new(Mutex::new(CancellationToken::new()));
        let callbacks = Arc::new(LocalWorker {
            tx,
            current: current.clone(),
        });

        let connection_id = Uuid::new_v4();
        let worker_id = manager.register_worker(connection_id, callbacks).await?;
        let executor = BatchExecutor::new(manager.hasher());

        let task = tokio::spawn(run(
            manager,
            worker_id,
            connection_id,
            rx,
            current,
            executor,
            config.max_batches,
            shutdown,
        ));

        Ok(LocalWorkerHandle {
            worker_id,
            connection_id,
            task,
        })
    }

    /// Spawn `config.count` local workers.
    pub async fn spawn_pool(
        manager: Arc<Manager>,
        config: &WorkerConfig,
        shutdown: CancellationToken,
    ) -> Result<Vec<LocalWorkerHandle>> {
        let mut handles = Vec::with_capacity(config.count);
        for _ in 0..config.count {
            handles.push(Self::spawn(manager.clone(), config, shutdown.clone()).await?);
        }
        tracing::info!(count = handles.len(), "Local workers started");
        Ok(handles)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    manager: Arc<Manager>,
    worker_id: WorkerId,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<Batch>,
    current: Arc<Mutex<CancellationToken>>,
    executor: BatchExecutor,
    max_batches: Option<u64>,
    shutdown: CancellationToken,
) {
    let mut finished: u64 = 0;

    loop {
        let batch = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(batch) => batch,
                None => break,
            },
        };

        // Shutdown also stops the batch in progress.
        let token = shutdown.child_token();
        if let Ok(mut slot) = current.lock() {
            *slot = token.clone();
        }

        let exec = executor.clone();
        let result = match tokio::task::spawn_blocking(move || exec.execute(batch, &token)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Batch execution panicked");
                break;
            }
        };

        // An interrupted batch was not fully tested; leave it outstanding so
        // it is reassigned.
        if result.poisoned && shutdown.is_cancelled() {
            tracing::debug!(worker_id, batch = %result.batch, "Batch interrupted by shutdown");
            break;
        }

        finished += 1;
        let wants_more = !shutdown.is_cancelled() && max_batches.map_or(true, |max| finished < max);
        manager
            .batch_complete(BatchReport {
                batch: result.batch,
                worker_id,
                wants_more,
                found: result.found,
                plaintext: result.plaintext,
            })
            .await;

        if !wants_more {
            break;
        }
    }

    manager.deregister_connection(&connection_id).await;
    tracing::info!(worker_id, batches = finished, "Local worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Alphabet;

    fn batch() -> Batch {
        Batch {
            job_id: Uuid::new_v4(),
            start: 0,
            end: 3,
            target_digest: "d".to_string(),
            alphabet: Alphabet::new("AB".chars()).unwrap(),
            length: 2,
        }
    }

    #[tokio::test]
    async fn assign_fails_once_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let worker = LocalWorker {
            tx,
            current: Arc::new(Mutex::new(CancellationToken::new())),
        };
        drop(rx);
        let err = worker.assign_batch(batch()).await.unwrap_err();
        assert!(matches!(err, RecoveryError::Connectivity(_)));
    }

    #[tokio::test]
    async fn poison_cancels_current_token() {
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let worker = LocalWorker {
            tx,
            current: Arc::new(Mutex::new(token.clone())),
        };
        worker.poison().await.unwrap();
        assert!(token.is_cancelled());
    }
}
