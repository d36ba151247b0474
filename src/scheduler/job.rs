use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::error::{RecoveryError, Result};
use crate::scheduler::batch::Batch;
use crate::scheduler::permutation::{Alphabet, PermutationSpace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Complete,
    /// Every candidate was tested and none matched the target digest.
    NotFound,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Complete | JobState::NotFound | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Running => write!(f, "running"),
            JobState::Complete => write!(f, "complete"),
            JobState::NotFound => write!(f, "not_found"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Bounds on batch size: a batch should take roughly `target_batch_secs`
/// on a worker testing `estimated_rate` candidates per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizing {
    pub target_batch_secs: u64,
    pub estimated_rate: u64,
}

impl Default for BatchSizing {
    fn default() -> Self {
        Self {
            target_batch_secs: 10,
            estimated_rate: 150_000,
        }
    }
}

impl From<&ManagerConfig> for BatchSizing {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            target_batch_secs: config.target_batch_secs,
            estimated_rate: config.estimated_rate,
        }
    }
}

impl BatchSizing {
    /// Largest batch any worker pool size may be given.
    pub fn cap(&self) -> u64 {
        self.target_batch_secs
            .saturating_mul(self.estimated_rate)
            .max(1)
    }

    pub fn batch_size(&self, total: u64, worker_count: usize) -> u64 {
        let even = total / worker_count.max(1) as u64;
        even.min(self.cap()).max(1)
    }
}

/// Point-in-time view of a job for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub state: JobState,
    pub target_digest: String,
    pub length: usize,
    pub total: u64,
    pub batch_size: Option<u64>,
    pub completed: u64,
    pub throughput: u64,
    pub elapsed_secs: u64,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One recovery attempt over a full permutation space.
///
/// Batches are cut from the space in increasing, contiguous, non-overlapping
/// order. The batch size is fixed by the time the first batch is cut.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub target_digest: String,
    pub created_at: DateTime<Utc>,
    space: PermutationSpace,
    sizing: BatchSizing,
    state: JobState,
    batch_size: Option<u64>,
    next_batch_index: u64,
    exhausted: bool,
    completed: u64,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    result: Option<String>,
}

impl Job {
    pub fn create(
        id: Uuid,
        target_digest: impl Into<String>,
        alphabet: Alphabet,
        length: usize,
    ) -> Result<Self> {
        if id.is_nil() {
            return Err(RecoveryError::InvalidInput("job id is empty".to_string()));
        }
        let target_digest = target_digest.into();
        if target_digest.is_empty() {
            return Err(RecoveryError::InvalidInput(
                "target digest is empty".to_string(),
            ));
        }
        let space = PermutationSpace::new(alphabet, length)?;

        Ok(Self {
            id,
            target_digest,
            created_at: Utc::now(),
            space,
            sizing: BatchSizing::default(),
            state: JobState::Idle,
            batch_size: None,
            next_batch_index: 0,
            exhausted: false,
            completed: 0,
            started_at: None,
            stopped_at: None,
            result: None,
        })
    }

    pub fn with_sizing(mut self, sizing: BatchSizing) -> Self {
        self.sizing = sizing;
        self
    }

    /// Fix the batch size for `worker_count` workers. Only allowed before
    /// the first batch has been cut.
    pub fn set_batch_size(&mut self, worker_count: usize) -> Result<u64> {
        if self.next_batch_index > 0 || self.state != JobState::Idle {
            return Err(RecoveryError::AlreadyRunning);
        }
        let size = self.sizing.batch_size(self.space.total(), worker_count);
        tracing::info!(
            job_id = %self.id,
            total = self.space.total(),
            worker_count,
            batch_size = size,
            "Batch size set"
        );
        self.batch_size = Some(size);
        Ok(size)
    }

    /// Cut the next fresh batch. `None` until the job has been sized and
    /// started, and again once the space is exhausted.
    pub fn next_batch(&mut self) -> Option<Batch> {
        if !self.is_running() || !self.has_fresh_batches() {
            return None;
        }
        let size = self.batch_size?;
        let total = self.space.total();

        let start = self.next_batch_index * size;
        let end = start.saturating_add(size - 1).min(total - 1);
        self.next_batch_index += 1;
        if end == total - 1 {
            self.exhausted = true;
        }

        Some(Batch {
            job_id: self.id,
            start,
            end,
            target_digest: self.target_digest.clone(),
            alphabet: self.space.alphabet().clone(),
            length: self.space.length(),
        })
    }

    /// Move an idle job to running and start its clock.
    pub fn start(&mut self) {
        if self.state == JobState::Idle {
            self.state = JobState::Running;
            self.started_at = Some(Instant::now());
        }
    }

    /// Credit `count` tested candidates.
    pub fn record_progress(&mut self, count: u64) {
        if self.state == JobState::Cancelled {
            return;
        }
        self.completed = self
            .completed
            .saturating_add(count)
            .min(self.space.total());
    }

    /// Record the recovered plaintext. Returns `false` if a result was
    /// already recorded; the first finder wins.
    pub fn record_result(&mut self, plaintext: impl Into<String>) -> bool {
        if self.result.is_some() || self.state.is_terminal() {
            return false;
        }
        self.result = Some(plaintext.into());
        self.state = JobState::Complete;
        self.exhausted = true;
        self.stop_clock();
        true
    }

    /// Close a running job whose every batch came back without a match.
    /// Returns `false` if the job is not in that position.
    pub fn record_not_found(&mut self) -> bool {
        if !self.is_running() || self.is_resolved() || self.has_fresh_batches() {
            return false;
        }
        self.state = JobState::NotFound;
        self.stop_clock();
        true
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = JobState::Cancelled;
        }
        self.exhausted = true;
        self.stop_clock();
    }

    fn stop_clock(&mut self) {
        if self.started_at.is_some() && self.stopped_at.is_none() {
            self.stopped_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn space(&self) -> &PermutationSpace {
        &self.space
    }

    pub fn total(&self) -> u64 {
        self.space.total()
    }

    pub fn batch_size(&self) -> Option<u64> {
        self.batch_size
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// True while the sequential cursor still has ranges to hand out.
    pub fn has_fresh_batches(&self) -> bool {
        !self.exhausted && !self.state.is_terminal()
    }

    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started) => self.stopped_at.unwrap_or_else(Instant::now) - started,
            None => Duration::ZERO,
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// Candidates per second since the first batch was cut; 0 before that.
    pub fn throughput(&self) -> u64 {
        if self.started_at.is_none() {
            return 0;
        }
        self.completed / self.elapsed_secs().max(1)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            state: self.state,
            target_digest: self.target_digest.clone(),
            length: self.space.length(),
            total: self.space.total(),
            batch_size: self.batch_size,
            completed: self.completed,
            throughput: self.throughput(),
            elapsed_secs: self.elapsed_secs(),
            result: self.result.clone(),
            created_at: self.created_at,
        }
    }
}
