use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::callbacks::WorkerCallbacks;
use crate::error::{RecoveryError, Result};

pub type WorkerId = u64;

/// Transport-assigned identity of one worker connection.
pub type ConnectionId = Uuid;

/// A registered worker and the channel used to reach it.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub connection_id: ConnectionId,
    pub callbacks: Arc<dyn WorkerCallbacks>,
}

/// Tracks connected workers and the FIFO of idle ones.
///
/// Deregistration only touches the live set. Handles already sitting in the
/// idle queue are checked against the live set when dequeued and dropped if
/// they no longer belong to it.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    live: HashMap<WorkerId, WorkerHandle>,
    by_connection: HashMap<ConnectionId, WorkerId>,
    idle: VecDeque<WorkerHandle>,
    next_id: WorkerId,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and queue it as idle.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        callbacks: Arc<dyn WorkerCallbacks>,
    ) -> Result<WorkerHandle> {
        if self.by_connection.contains_key(&connection_id) {
            return Err(RecoveryError::AlreadyRegistered(format!(
                "connection {} is already registered",
                connection_id
            )));
        }

        let id = self.next_id;
        self.next_id += 1;
        let handle = WorkerHandle {
            id,
            connection_id,
            callbacks,
        };
        self.live.insert(id, handle.clone());
        self.by_connection.insert(connection_id, id);
        self.idle.push_back(handle.clone());
        tracing::info!(worker_id = id, connection_id = %connection_id, total = self.live.len(), "Worker registered");
        Ok(handle)
    }

    /// Remove a connection from the live set. Unknown connections are a no-op.
    pub fn deregister(&mut self, connection_id: &ConnectionId) -> Option<WorkerId> {
        let id = self.by_connection.remove(connection_id)?;
        self.live.remove(&id);
        tracing::info!(worker_id = id, total = self.live.len(), "Worker deregistered");
        Some(id)
    }

    pub fn deregister_id(&mut self, worker_id: WorkerId) -> Option<WorkerHandle> {
        let handle = self.live.remove(&worker_id)?;
        self.by_connection.remove(&handle.connection_id);
        tracing::info!(worker_id, total = self.live.len(), "Worker deregistered");
        Some(handle)
    }

    /// Dequeue the next idle worker that is still live.
    pub fn take_idle(&mut self) -> Option<WorkerHandle> {
        while let Some(handle) = self.idle.pop_front() {
            if self.is_live(handle.id) {
                return Some(handle);
            }
            tracing::debug!(worker_id = handle.id, "Discarding stale idle worker");
        }
        None
    }

    pub fn enqueue_idle(&mut self, handle: WorkerHandle) {
        self.idle.push_back(handle);
    }

    pub fn get(&self, worker_id: WorkerId) -> Option<&WorkerHandle> {
        self.live.get(&worker_id)
    }

    pub fn is_live(&self, worker_id: WorkerId) -> bool {
        self.live.contains_key(&worker_id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Queue length including entries that may since have gone stale.
    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }
}
