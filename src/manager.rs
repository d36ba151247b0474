use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::callbacks::{deliver, deliver_once, JobProgress, ObserverCallbacks, WorkerCallbacks};
use crate::config::ManagerConfig;
use crate::error::{RecoveryError, Result};
use crate::scheduler::tracker::poison_all;
use crate::scheduler::{
    Alphabet, AssignmentTracker, Batch, BatchSizing, ConnectionId, Job, JobSnapshot, WorkerHandle,
    WorkerId, WorkerRegistry,
};
use crate::worker::hasher::HashOracle;

/// What a new job should recover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    /// Generate a random password of `length` characters and recover it.
    Generate { length: usize },
    /// Hash a caller-supplied plaintext and recover it.
    Custom { plaintext: String },
    /// Recover an externally supplied digest of a `length`-character password.
    Digest { digest: String, length: usize },
}

/// A worker's report that it finished (or abandoned) a batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch: Batch,
    pub worker_id: WorkerId,
    pub wants_more: bool,
    pub found: bool,
    pub plaintext: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutstandingSummary {
    pub job_id: Uuid,
    pub start: u64,
    pub end: u64,
    pub worker_id: WorkerId,
    pub age_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub worker_count: usize,
    pub idle_queue: usize,
    pub observer_attached: bool,
    pub outstanding: Vec<OutstandingSummary>,
    pub job: Option<JobSnapshot>,
}

/// Everything guarded by the manager's single lock.
struct ManagerState {
    job: Option<Job>,
    /// Cancelled when the current job resolves, is cancelled or is replaced.
    job_token: CancellationToken,
    registry: WorkerRegistry,
    tracker: AssignmentTracker,
    reclaiming: bool,
    reporting: bool,
    observer: Option<Arc<dyn ObserverCallbacks>>,
    waiter: Option<(Uuid, oneshot::Sender<Result<String>>)>,
}

/// Background loops to start once the lock is released.
#[derive(Debug, Default)]
struct Background {
    job: Option<(Uuid, CancellationToken)>,
    progress: bool,
    reclaim: bool,
}

type Dispatch = (WorkerHandle, Batch);

/// The scheduler: owns the active job, the worker registry and the
/// outstanding-assignment tracker, and reacts to worker events.
///
/// All three collections live behind one mutex. Calls out to workers and
/// the observer are always made after the lock is released.
pub struct Manager {
    config: ManagerConfig,
    alphabet: Alphabet,
    hasher: Arc<dyn HashOracle>,
    state: Mutex<ManagerState>,
}

impl Manager {
    pub fn new(config: ManagerConfig, hasher: Arc<dyn HashOracle>) -> Result<Arc<Self>> {
        let alphabet = Alphabet::new(config.alphabet.chars())?;
        Ok(Arc::new(Self {
            config,
            alphabet,
            hasher,
            state: Mutex::new(ManagerState {
                job: None,
                job_token: CancellationToken::new(),
                registry: WorkerRegistry::new(),
                tracker: AssignmentTracker::new(),
                reclaiming: false,
                reporting: false,
                observer: None,
                waiter: None,
            }),
        }))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn hasher(&self) -> Arc<dyn HashOracle> {
        self.hasher.clone()
    }

    pub fn ping(&self) -> &'static str {
        "pong from manager"
    }

    // =========================================================================
    // Presentation-side operations
    // =========================================================================

    /// Create a new job and return the digest it will recover.
    ///
    /// Replaces an idle, completed or cancelled job. A running job that has
    /// not resolved must be cancelled first.
    pub async fn request_new_job(&self, spec: JobSpec) -> Result<String> {
        let (digest, length) = self.resolve_spec(spec)?;
        let mut state = self.state.lock().await;
        self.install_job(&mut state, &digest, length)?;
        Ok(digest)
    }

    /// Size the batches for the current worker count and hand a batch to
    /// every idle worker.
    pub async fn begin(self: &Arc<Self>) -> Result<()> {
        let (dispatches, background) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let job = state.job.as_mut().ok_or(RecoveryError::NoJob)?;
            job.set_batch_size(state.registry.live_count())?;
            job.start();

            let mut dispatches = Vec::new();
            while job.has_fresh_batches() {
                let Some(worker) = state.registry.take_idle() else {
                    break;
                };
                let Some(batch) = job.next_batch() else {
                    state.registry.enqueue_idle(worker);
                    break;
                };
                state.tracker.record(batch.clone(), worker.clone());
                dispatches.push((worker, batch));
            }
            tracing::info!(
                job_id = %job.id,
                total = job.total(),
                workers = state.registry.live_count(),
                engaged = dispatches.len(),
                "Job started"
            );
            let background = Self::plan_background(state);
            (dispatches, background)
        };

        self.dispatch_all(dispatches).await;
        self.spawn_background(background);
        Ok(())
    }

    /// End the current job. Outstanding assignments are forgotten without
    /// signalling their workers; their late reports are ignored.
    pub async fn cancel_job(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut job) = state.job.take() {
            job.cancel();
            state.job_token.cancel();
            tracing::info!(job_id = %job.id, "Job cancelled");
        }
        state.tracker.clear();
        state.reclaiming = false;
        state.reporting = false;
        // Dropping the sender releases a synchronous waiter with JobCancelled.
        state.waiter = None;
        Ok(())
    }

    /// Create a job, start it and block until its password is found.
    /// Fails with `NotFound` if the whole space is tested without a match.
    ///
    /// Only one caller may wait at a time.
    pub async fn recover_and_wait(self: &Arc<Self>, spec: JobSpec) -> Result<String> {
        let (digest, length) = self.resolve_spec(spec)?;
        let (job_id, rx) = {
            let mut state = self.state.lock().await;
            if state.waiter.is_some() {
                return Err(RecoveryError::WaiterBusy);
            }
            let job_id = self.install_job(&mut state, &digest, length)?;
            let (tx, rx) = oneshot::channel();
            state.waiter = Some((job_id, tx));
            (job_id, rx)
        };

        if let Err(e) = self.begin().await {
            let mut state = self.state.lock().await;
            if state.waiter.as_ref().is_some_and(|(id, _)| *id == job_id) {
                state.waiter = None;
            }
            return Err(e);
        }

        rx.await.map_err(|_| RecoveryError::JobCancelled)?
    }

    pub async fn attach_observer(self: &Arc<Self>, observer: Arc<dyn ObserverCallbacks>) -> Result<()> {
        let background = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.observer.is_some() {
                return Err(RecoveryError::AlreadyRegistered(
                    "an observer is already attached".to_string(),
                ));
            }
            state.observer = Some(observer);
            tracing::info!("Observer attached");
            Self::plan_background(state)
        };
        self.spawn_background(background);
        Ok(())
    }

    pub async fn detach_observer(&self) {
        if self.state.lock().await.observer.take().is_some() {
            tracing::info!("Observer detached");
        }
    }

    pub async fn status(&self) -> ManagerStatus {
        let state = self.state.lock().await;
        let mut outstanding: Vec<OutstandingSummary> = state
            .tracker
            .for_all()
            .map(|a| OutstandingSummary {
                job_id: a.batch.job_id,
                start: a.batch.start,
                end: a.batch.end,
                worker_id: a.worker.id,
                age_ms: a.age().as_millis() as u64,
            })
            .collect();
        outstanding.sort_by_key(|o| (o.start, o.end));

        ManagerStatus {
            worker_count: state.registry.live_count(),
            idle_queue: state.registry.idle_len(),
            observer_attached: state.observer.is_some(),
            outstanding,
            job: state.job.as_ref().map(Job::snapshot),
        }
    }

    // =========================================================================
    // Worker-side operations
    // =========================================================================

    /// Register a worker connection. If the running job still has fresh
    /// batches the worker is put to work immediately.
    pub async fn register_worker(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        callbacks: Arc<dyn WorkerCallbacks>,
    ) -> Result<WorkerId> {
        let (worker_id, count, dispatches, background, observer) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let handle = state.registry.register(connection_id, callbacks)?;

            let mut dispatches = Vec::new();
            if let Some(job) = state.job.as_mut().filter(|j| j.is_running()) {
                while job.has_fresh_batches() {
                    let Some(worker) = state.registry.take_idle() else {
                        break;
                    };
                    let Some(batch) = job.next_batch() else {
                        state.registry.enqueue_idle(worker);
                        break;
                    };
                    state.tracker.record(batch.clone(), worker.clone());
                    dispatches.push((worker, batch));
                }
            }
            let background = Self::plan_background(state);
            (
                handle.id,
                state.registry.live_count(),
                dispatches,
                background,
                state.observer.clone(),
            )
        };

        self.dispatch_all(dispatches).await;
        self.spawn_background(background);
        if let Some(observer) = observer {
            self.notify_worker_count(observer, count).await;
        }
        Ok(worker_id)
    }

    /// Remove a worker by id. Unknown ids are a no-op.
    pub async fn deregister_worker(&self, worker_id: WorkerId) {
        let (removed, count, observer) = {
            let mut state = self.state.lock().await;
            let removed = state.registry.deregister_id(worker_id).is_some();
            (removed, state.registry.live_count(), state.observer.clone())
        };
        if let (true, Some(observer)) = (removed, observer) {
            self.notify_worker_count(observer, count).await;
        }
    }

    /// Remove a worker by connection. Unknown connections are a no-op.
    pub async fn deregister_connection(&self, connection_id: &ConnectionId) {
        let (removed, count, observer) = {
            let mut state = self.state.lock().await;
            let removed = state.registry.deregister(connection_id).is_some();
            (removed, state.registry.live_count(), state.observer.clone())
        };
        if let (true, Some(observer)) = (removed, observer) {
            self.notify_worker_count(observer, count).await;
        }
    }

    /// Handle a completed (or abandoned) batch.
    ///
    /// Only the report that clears the outstanding entry is credited, so a
    /// reassigned batch reported by both holders counts once.
    pub async fn batch_complete(self: &Arc<Self>, report: BatchReport) {
        let key = report.batch.key();
        let mut resolved: Option<(Uuid, String)> = None;
        let mut to_poison = Vec::new();
        let mut dispatch = None;
        let mut worker_count_changed = None;

        let (background, observer) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let held = state.tracker.remove(&key).is_some();
            let job = state.job.as_mut().filter(|j| j.id == key.job_id);
            match job {
                Some(job) => {
                    if held {
                        job.record_progress(report.batch.size());
                    }
                    if report.found {
                        let plaintext = report.plaintext.clone().unwrap_or_default();
                        if self.hasher.hash(&plaintext) != job.target_digest {
                            tracing::warn!(
                                worker_id = report.worker_id,
                                batch = %report.batch,
                                "Reported plaintext does not match the target digest, ignoring"
                            );
                        } else if job.record_result(plaintext.clone()) {
                            tracing::info!(
                                job_id = %job.id,
                                worker_id = report.worker_id,
                                elapsed_secs = job.elapsed_secs(),
                                "Password found"
                            );
                            resolved = Some((job.id, plaintext));
                        }
                    }
                }
                None => {
                    tracing::debug!(batch = %report.batch, "Report for a job that is no longer active");
                }
            }

            if let Some((job_id, plaintext)) = &resolved {
                state.job_token.cancel();
                Self::release_waiter(state, *job_id, Ok(plaintext.clone()));
                to_poison = state.tracker.for_job(*job_id);
            } else {
                Self::close_if_exhausted(state, key.job_id);
            }

            match state.registry.get(report.worker_id).cloned() {
                None => {
                    tracing::debug!(
                        worker_id = report.worker_id,
                        "Report from an unregistered worker, not rescheduling"
                    );
                }
                Some(worker) if report.wants_more => {
                    let next = state
                        .job
                        .as_mut()
                        .filter(|j| j.is_running() && !j.is_resolved())
                        .and_then(Job::next_batch);
                    match next {
                        Some(batch) => {
                            state.tracker.record(batch.clone(), worker.clone());
                            dispatch = Some((worker, batch));
                        }
                        None => state.registry.enqueue_idle(worker),
                    }
                }
                Some(worker) => {
                    state.registry.deregister_id(worker.id);
                    worker_count_changed = Some(state.registry.live_count());
                }
            }

            (Self::plan_background(state), state.observer.clone())
        };

        if let (Some((_, plaintext)), Some(observer)) = (&resolved, &observer) {
            self.notify_result(observer.clone(), plaintext.clone()).await;
        }
        if !to_poison.is_empty() {
            let delivered = poison_all(to_poison, self.config.call_timeout()).await;
            tracing::info!(delivered, "Outstanding batches poisoned");
        }
        if let Some(dispatch) = dispatch {
            self.dispatch_all(vec![dispatch]).await;
        }
        if let (Some(count), Some(observer)) = (worker_count_changed, observer) {
            self.notify_worker_count(observer, count).await;
        }
        self.spawn_background(background);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn resolve_spec(&self, spec: JobSpec) -> Result<(String, usize)> {
        match spec {
            JobSpec::Generate { length } => {
                self.validate_length(length)?;
                let chars = self.alphabet.chars();
                let mut rng = rand::thread_rng();
                let plaintext: String = (0..length)
                    .map(|_| chars[rng.gen_range(0..chars.len())])
                    .collect();
                Ok((self.hasher.hash(&plaintext), length))
            }
            JobSpec::Custom { plaintext } => {
                let length = plaintext.chars().count();
                self.validate_length(length)?;
                if let Some(c) = plaintext.chars().find(|c| !self.alphabet.contains(*c)) {
                    return Err(RecoveryError::InvalidInput(format!(
                        "character {:?} is not in the alphabet",
                        c
                    )));
                }
                Ok((self.hasher.hash(&plaintext), length))
            }
            JobSpec::Digest { digest, length } => {
                self.validate_length(length)?;
                Ok((digest, length))
            }
        }
    }

    fn validate_length(&self, length: usize) -> Result<()> {
        let max = self.config.max_password_length;
        if length == 0 || length > max {
            return Err(RecoveryError::InvalidInput(format!(
                "password length must be between 1 and {}, got {}",
                max, length
            )));
        }
        Ok(())
    }

    fn install_job(&self, state: &mut ManagerState, digest: &str, length: usize) -> Result<Uuid> {
        if let Some(current) = &state.job {
            if current.is_running() && !current.is_resolved() {
                return Err(RecoveryError::JobReplaceConflict);
            }
        }

        let job = Job::create(Uuid::new_v4(), digest, self.alphabet.clone(), length)?
            .with_sizing(BatchSizing::from(&self.config));
        let job_id = job.id;
        tracing::info!(job_id = %job_id, length, total = job.total(), "Job created");

        state.job_token.cancel();
        state.job_token = CancellationToken::new();
        state.job = Some(job);
        state.tracker.clear();
        state.reclaiming = false;
        state.reporting = false;
        state.waiter = None;
        Ok(job_id)
    }

    /// End the running job as not found once every batch has been cut and
    /// none is still outstanding. Called with the lock held.
    fn close_if_exhausted(state: &mut ManagerState, job_id: Uuid) {
        let Some(job) = state.job.as_mut().filter(|j| j.id == job_id) else {
            return;
        };
        if !state.tracker.for_job(job_id).is_empty() || !job.record_not_found() {
            return;
        }
        tracing::warn!(
            job_id = %job_id,
            tested = job.completed(),
            elapsed_secs = job.elapsed_secs(),
            "Search space exhausted without a match"
        );
        state.job_token.cancel();
        Self::release_waiter(state, job_id, Err(RecoveryError::NotFound));
    }

    /// Hand `outcome` to the synchronous waiter if it is waiting on `job_id`.
    fn release_waiter(state: &mut ManagerState, job_id: Uuid, outcome: Result<String>) {
        if let Some((waiting_for, tx)) = state.waiter.take() {
            if waiting_for == job_id {
                let _ = tx.send(outcome);
            } else {
                state.waiter = Some((waiting_for, tx));
            }
        }
    }

    /// Decide which job-scoped loops need to start. Called with the lock held.
    fn plan_background(state: &mut ManagerState) -> Background {
        let Some(job) = state.job.as_ref() else {
            return Background::default();
        };
        if !job.is_running() || job.is_resolved() {
            return Background::default();
        }

        let progress = state.observer.is_some() && !state.reporting;
        let reclaim = !job.has_fresh_batches() && !state.reclaiming && !state.tracker.is_empty();
        state.reporting |= progress;
        state.reclaiming |= reclaim;

        Background {
            job: Some((job.id, state.job_token.clone())),
            progress,
            reclaim,
        }
    }

    fn spawn_background(self: &Arc<Self>, background: Background) {
        let Some((job_id, token)) = background.job else {
            return;
        };
        if background.progress {
            tokio::spawn(self.clone().progress_loop(job_id, token.clone()));
        }
        if background.reclaim {
            tokio::spawn(self.clone().reclaim_loop(job_id, token));
        }
    }

    async fn dispatch_all(&self, dispatches: Vec<Dispatch>) {
        if dispatches.is_empty() {
            return;
        }
        let timeout = self.config.call_timeout();
        let mut set = JoinSet::new();
        for (worker, batch) in dispatches {
            set.spawn(dispatch(timeout, worker, batch));
        }
        while set.join_next().await.is_some() {}
    }

    /// Reassign batches whose worker has gone quiet for longer than the
    /// allowed batch duration. Runs once every batch has been cut and stops
    /// when the job resolves or nothing is outstanding.
    async fn reclaim_loop(self: Arc<Self>, job_id: Uuid, token: CancellationToken) {
        let max_age = self.config.max_batch_duration();
        tracing::info!(
            job_id = %job_id,
            max_batch_ms = max_age.as_millis() as u64,
            "All batches assigned, watching for stalled batches"
        );

        loop {
            let step = {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;
                let active = state
                    .job
                    .as_ref()
                    .is_some_and(|j| j.id == job_id && j.is_running() && !j.is_resolved());
                if !active || state.tracker.is_empty() {
                    None
                } else {
                    let stale = state.tracker.stale(max_age);
                    if stale.is_empty() {
                        let oldest = state.tracker.oldest().map(|a| a.age()).unwrap_or_default();
                        // Wake just past the deadline: a batch is stale once its age exceeds it.
                        let wait = max_age.saturating_sub(oldest) + Duration::from_millis(1);
                        Some((Vec::new(), wait))
                    } else {
                        let mut dispatches = Vec::new();
                        for assignment in stale {
                            let Some(worker) = state.registry.take_idle() else {
                                break;
                            };
                            tracing::warn!(
                                batch = %assignment.batch,
                                stalled_worker = assignment.worker.id,
                                worker_id = worker.id,
                                age_ms = assignment.age().as_millis() as u64,
                                "Reassigning stalled batch"
                            );
                            state.tracker.record(assignment.batch.clone(), worker.clone());
                            dispatches.push((worker, assignment.batch));
                        }
                        let wait = if dispatches.is_empty() {
                            self.config.reclaim_retry()
                        } else {
                            Duration::ZERO
                        };
                        Some((dispatches, wait))
                    }
                }
            };

            let Some((dispatches, wait)) = step else {
                break;
            };
            self.dispatch_all(dispatches).await;

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let mut state = self.state.lock().await;
        if state.job.as_ref().is_some_and(|j| j.id == job_id) {
            state.reclaiming = false;
        }
        tracing::info!(job_id = %job_id, "Stalled-batch watch finished");
    }

    /// Push progress to the observer once per interval while the job runs.
    /// Two consecutive delivery failures detach the observer.
    async fn progress_loop(self: Arc<Self>, job_id: Uuid, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.progress_interval());
        let mut failures = 0;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let snapshot = {
                let state = self.state.lock().await;
                match (&state.job, &state.observer) {
                    (Some(job), Some(observer))
                        if job.id == job_id && job.is_running() && !job.is_resolved() =>
                    {
                        Some((
                            observer.clone(),
                            JobProgress {
                                worker_count: state.registry.live_count(),
                                tested: job.completed(),
                                rate: job.throughput(),
                                elapsed_secs: job.elapsed_secs(),
                            },
                        ))
                    }
                    _ => None,
                }
            };
            let Some((observer, progress)) = snapshot else {
                break;
            };

            match deliver_once(self.config.call_timeout(), observer.on_progress(progress)).await {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "Failed to push progress to observer");
                    if failures >= 2 {
                        self.detach_if_current(&observer).await;
                        break;
                    }
                }
            }
        }

        let mut state = self.state.lock().await;
        if state.job.as_ref().is_some_and(|j| j.id == job_id) {
            state.reporting = false;
        }
    }

    async fn notify_result(&self, observer: Arc<dyn ObserverCallbacks>, plaintext: String) {
        let target = observer.clone();
        let result = deliver(self.config.call_timeout(), move || {
            let target = target.clone();
            let plaintext = plaintext.clone();
            async move { target.on_result(&plaintext).await }
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to deliver result to observer, detaching it");
            self.detach_if_current(&observer).await;
        }
    }

    async fn notify_worker_count(&self, observer: Arc<dyn ObserverCallbacks>, count: usize) {
        let target = observer.clone();
        let result = deliver(self.config.call_timeout(), move || {
            let target = target.clone();
            async move { target.on_worker_count_changed(count).await }
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to deliver worker count to observer, detaching it");
            self.detach_if_current(&observer).await;
        }
    }

    async fn detach_if_current(&self, observer: &Arc<dyn ObserverCallbacks>) {
        let mut state = self.state.lock().await;
        if state
            .observer
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, observer))
        {
            state.observer = None;
            tracing::warn!("Observer detached after delivery failures");
        }
    }
}

/// Send one batch to one worker outside the lock. A failed dispatch leaves
/// the batch outstanding so the stalled-batch watch can reassign it.
async fn dispatch(timeout: Duration, worker: WorkerHandle, batch: Batch) {
    let callbacks = worker.callbacks.clone();
    let payload = batch.clone();
    let result = deliver(timeout, move || {
        let callbacks = callbacks.clone();
        let payload = payload.clone();
        async move { callbacks.assign_batch(payload).await }
    })
    .await;

    match result {
        Ok(()) => tracing::debug!(worker_id = worker.id, batch = %batch, "Batch assigned"),
        Err(e) => tracing::warn!(
            worker_id = worker.id,
            batch = %batch,
            error = %e,
            "Failed to assign batch"
        ),
    }
}
