use std::net::SocketAddr;
use std::time::Duration;

/// Default candidate alphabet: digits, lowercase, uppercase.
pub const DEFAULT_ALPHABET: &str =
    "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Scheduling parameters for the recovery manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Ordered candidate alphabet used for generated and custom passwords.
    pub alphabet: String,
    /// Longest password a job may be created for.
    pub max_password_length: usize,
    /// Target wall-clock time a worker should spend on one batch.
    pub target_batch_secs: u64,
    /// Estimated candidates per second a single worker tests.
    pub estimated_rate: u64,
    /// Allowance for one network round-trip to a worker.
    pub network_allowance_ms: u64,
    /// Explicit stale-batch threshold. When unset it is derived from the
    /// target batch time and the network allowance.
    pub max_batch_duration_ms: Option<u64>,
    /// How often progress is pushed to an attached observer.
    pub progress_interval_ms: u64,
    /// How long the reclamation loop waits when a stale batch exists but
    /// no idle worker is available to take it.
    pub reclaim_retry_ms: u64,
    /// Upper bound on every manager-to-worker and manager-to-observer call.
    pub call_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.to_string(),
            max_password_length: 10,
            target_batch_secs: 10,
            estimated_rate: 150_000,
            network_allowance_ms: 60_000,
            max_batch_duration_ms: None,
            progress_interval_ms: 1000,
            reclaim_retry_ms: 500,
            call_timeout_ms: 5000,
        }
    }
}

impl ManagerConfig {
    /// Age after which an outstanding batch is considered abandoned.
    pub fn max_batch_duration(&self) -> Duration {
        let ms = self.max_batch_duration_ms.unwrap_or_else(|| {
            2 * self.target_batch_secs * 1000 + 2 * self.network_allowance_ms
        });
        Duration::from_millis(ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn reclaim_retry(&self) -> Duration {
        Duration::from_millis(self.reclaim_retry_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn with_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.alphabet = alphabet.into();
        self
    }

    pub fn with_batch_target(mut self, target_batch_secs: u64, estimated_rate: u64) -> Self {
        self.target_batch_secs = target_batch_secs;
        self.estimated_rate = estimated_rate;
        self
    }

    pub fn with_max_batch_duration_ms(mut self, ms: u64) -> Self {
        self.max_batch_duration_ms = Some(ms);
        self
    }

    pub fn with_progress_interval_ms(mut self, ms: u64) -> Self {
        self.progress_interval_ms = ms;
        self
    }

    pub fn with_reclaim_retry_ms(mut self, ms: u64) -> Self {
        self.reclaim_retry_ms = ms;
        self
    }
}

/// Configuration for in-process worker tasks.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of local workers to spawn.
    pub count: usize,
    /// Stop asking for work after this many batches.
    pub max_batches: Option<u64>,
    /// Pending batch slots per worker.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            max_batches: None,
            queue_capacity: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub manager: ManagerConfig,
    pub workers: WorkerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            manager: ManagerConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_manager(mut self, manager: ManagerConfig) -> Self {
        self.manager = manager;
        self
    }

    pub fn with_workers(mut self, workers: WorkerConfig) -> Self {
        self.workers = workers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_config_default() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.alphabet.chars().count(), 62);
        assert_eq!(cfg.max_password_length, 10);
        assert_eq!(cfg.target_batch_secs, 10);
        assert_eq!(cfg.estimated_rate, 150_000);
        assert_eq!(cfg.progress_interval(), Duration::from_secs(1));
        assert!(cfg.max_batch_duration_ms.is_none());
    }

    #[test]
    fn max_batch_duration_derived_from_target_and_allowance() {
        let cfg = ManagerConfig::default();
        // 2 * 10s + 2 * 60s
        assert_eq!(cfg.max_batch_duration(), Duration::from_secs(140));
    }

    #[test]
    fn max_batch_duration_override() {
        let cfg = ManagerConfig::default().with_max_batch_duration_ms(5000);
        assert_eq!(cfg.max_batch_duration(), Duration::from_millis(5000));
    }

    #[test]
    fn manager_config_builders() {
        let cfg = ManagerConfig::default()
            .with_alphabet("AB")
            .with_batch_target(2, 100)
            .with_progress_interval_ms(250)
            .with_reclaim_retry_ms(50);
        assert_eq!(cfg.alphabet, "AB");
        assert_eq!(cfg.target_batch_secs, 2);
        assert_eq!(cfg.estimated_rate, 100);
        assert_eq!(cfg.progress_interval(), Duration::from_millis(250));
        assert_eq!(cfg.reclaim_retry(), Duration::from_millis(50));
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.count, 4);
        assert!(cfg.max_batches.is_none());
        assert_eq!(cfg.queue_capacity, 4);
    }

    #[test]
    fn server_config_default() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.workers.count, 4);
    }

    #[test]
    fn server_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = ServerConfig::new(addr).with_workers(WorkerConfig {
            count: 8,
            ..Default::default()
        });
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.workers.count, 8);
    }
}
