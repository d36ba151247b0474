use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::callbacks::deliver;
use crate::scheduler::batch::{Batch, BatchKey};
use crate::scheduler::registry::WorkerHandle;

/// A batch handed to a worker and not yet reported complete.
#[derive(Debug, Clone)]
pub struct OutstandingAssignment {
    pub batch: Batch,
    pub worker: WorkerHandle,
    assigned_at: Instant,
}

impl OutstandingAssignment {
    pub fn age(&self) -> Duration {
        self.assigned_at.elapsed()
    }

    pub fn assigned_at(&self) -> Instant {
        self.assigned_at
    }
}

/// Outstanding assignments keyed by `(job_id, start, end)`.
#[derive(Debug, Default)]
pub struct AssignmentTracker {
    entries: HashMap<BatchKey, OutstandingAssignment>,
}

impl AssignmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `batch` as held by `worker`, stamped now. Re-recording the same
    /// range replaces the owner and restarts its age.
    pub fn record(&mut self, batch: Batch, worker: WorkerHandle) {
        self.entries.insert(
            batch.key(),
            OutstandingAssignment {
                batch,
                worker,
                assigned_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, key: &BatchKey) -> Option<OutstandingAssignment> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &BatchKey) -> Option<&OutstandingAssignment> {
        self.entries.get(key)
    }

    /// The assignment that has been outstanding the longest.
    pub fn oldest(&self) -> Option<&OutstandingAssignment> {
        self.entries.values().min_by_key(|a| a.assigned_at)
    }

    /// Assignments older than `max_age`, oldest first.
    pub fn stale(&self, max_age: Duration) -> Vec<OutstandingAssignment> {
        let mut stale: Vec<OutstandingAssignment> = self
            .entries
            .values()
            .filter(|a| a.age() > max_age)
            .cloned()
            .collect();
        stale.sort_by_key(|a| a.assigned_at);
        stale
    }

    /// Every outstanding assignment belonging to `job_id`.
    pub fn for_job(&self, job_id: Uuid) -> Vec<OutstandingAssignment> {
        self.entries
            .values()
            .filter(|a| a.batch.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn for_all(&self) -> impl Iterator<Item = &OutstandingAssignment> {
        self.entries.values()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Signal every worker in `assignments` to abandon its batch.
///
/// Signals go out concurrently, so one hung worker does not hold up the
/// rest. Best-effort: a timed-out signal is retried once, any other failure
/// is logged and skipped. Returns how many signals were delivered.
pub async fn poison_all(assignments: Vec<OutstandingAssignment>, timeout: Duration) -> usize {
    let mut set = JoinSet::new();
    for assignment in assignments {
        set.spawn(async move {
            let worker_id = assignment.worker.id;
            let callbacks = assignment.worker.callbacks.clone();
            let result = deliver(timeout, move || {
                let callbacks = callbacks.clone();
                async move { callbacks.poison().await }
            })
            .await;
            match result {
                Ok(()) => {
                    tracing::debug!(worker_id, batch = %assignment.batch, "Batch poisoned");
                    true
                }
                Err(e) => {
                    tracing::warn!(worker_id, batch = %assignment.batch, error = %e, "Failed to poison worker");
                    false
                }
            }
        });
    }

    let mut delivered = 0;
    while let Some(joined) = set.join_next().await {
        if matches!(joined, Ok(true)) {
            delivered += 1;
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::WorkerCallbacks;
    use crate::error::Result;
    use crate::scheduler::permutation::Alphabet;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Debug)]
    struct NullWorker;

    #[async_trait]
    impl WorkerCallbacks for NullWorker {
        async fn assign_batch(&self, _batch: Batch) -> Result<()> {
            Ok(())
        }

        async fn poison(&self) -> Result<()> {
            Ok(())
        }
    }

    fn handle(id: u64) -> WorkerHandle {
        WorkerHandle {
            id,
            connection_id: Uuid::new_v4(),
            callbacks: Arc::new(NullWorker),
        }
    }

    fn batch(job_id: Uuid, start: u64, end: u64) -> Batch {
        Batch {
            job_id,
            start,
            end,
            target_digest: "d".to_string(),
            alphabet: Alphabet::new("AB".chars()).unwrap(),
            length: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_is_first_recorded() {
        let job = Uuid::new_v4();
        let mut tracker = AssignmentTracker::new();
        tracker.record(batch(job, 0, 1), handle(1));
        tokio::time::advance(Duration::from_millis(10)).await;
        tracker.record(batch(job, 2, 3), handle(2));

        let oldest = tracker.oldest().unwrap();
        assert_eq!(oldest.batch.start, 0);
        assert_eq!(oldest.age(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_matches_on_key_only() {
        let job = Uuid::new_v4();
        let mut tracker = AssignmentTracker::new();
        tracker.record(batch(job, 0, 1), handle(1));

        let mut report = batch(job, 0, 1);
        report.target_digest = "something else".to_string();
        assert!(tracker.remove(&report.key()).is_some());
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rerecord_resets_age_and_owner() {
        let job = Uuid::new_v4();
        let mut tracker = AssignmentTracker::new();
        let b = batch(job, 0, 1);
        tracker.record(b.clone(), handle(1));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(tracker.stale(Duration::from_secs(5)).len(), 1);

        tracker.record(b.clone(), handle(2));
        assert_eq!(tracker.len(), 1);
        let entry = tracker.get(&b.key()).unwrap();
        assert_eq!(entry.worker.id, 2);
        assert_eq!(entry.age(), Duration::ZERO);
        assert!(tracker.stale(Duration::from_secs(5)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sorted_oldest_first() {
        let job = Uuid::new_v4();
        let mut tracker = AssignmentTracker::new();
        tracker.record(batch(job, 0, 0), handle(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.record(batch(job, 1, 1), handle(2));
        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.record(batch(job, 2, 2), handle(3));
        tokio::time::advance(Duration::from_millis(1500)).await;

        let stale = tracker.stale(Duration::from_secs(2));
        let starts: Vec<u64> = stale.iter().map(|a| a.batch.start).collect();
        assert_eq!(starts, vec![0, 1]);
    }

    #[tokio::test]
    async fn for_job_filters_by_job() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut tracker = AssignmentTracker::new();
        tracker.record(batch(a, 0, 1), handle(1));
        tracker.record(batch(b, 0, 1), handle(2));
        tracker.record(batch(a, 2, 3), handle(3));
        assert_eq!(tracker.for_job(a).len(), 2);
        assert_eq!(tracker.for_job(b).len(), 1);
    }

    #[derive(Debug)]
    struct HungWorker;

    #[async_trait]
    impl WorkerCallbacks for HungWorker {
        async fn assign_batch(&self, _batch: Batch) -> Result<()> {
            Ok(())
        }

        async fn poison(&self) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poison_all_does_not_queue_behind_hung_workers() {
        let job = Uuid::new_v4();
        let mut tracker = AssignmentTracker::new();
        for id in 0..3 {
            let hung = WorkerHandle {
                id,
                connection_id: Uuid::new_v4(),
                callbacks: Arc::new(HungWorker),
            };
            tracker.record(batch(job, id * 2, id * 2 + 1), hung);
        }
        tracker.record(batch(job, 6, 7), handle(3));

        let started = Instant::now();
        let delivered = poison_all(tracker.for_job(job), Duration::from_secs(1)).await;
        assert_eq!(delivered, 1);
        // One timeout plus one retry, shared by all three hung workers.
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn poison_all_counts_deliveries() {
        let job = Uuid::new_v4();
        let mut tracker = AssignmentTracker::new();
        tracker.record(batch(job, 0, 1), handle(1));
        tracker.record(batch(job, 2, 3), handle(2));
        let delivered = poison_all(tracker.for_job(job), Duration::from_secs(1)).await;
        assert_eq!(delivered, 2);
    }
}
