//! Scheduling primitives: the permutation space, batches cut from it, the
//! job that owns the cursor, and the bookkeeping for workers and the
//! batches they hold.

pub mod batch;
pub mod job;
pub mod permutation;
pub mod registry;
pub mod tracker;

pub use batch::{Batch, BatchKey};
pub use job::{BatchSizing, Job, JobSnapshot, JobState};
pub use permutation::{Alphabet, PermutationSpace};
pub use registry::{ConnectionId, WorkerHandle, WorkerId, WorkerRegistry};
pub use tracker::{AssignmentTracker, OutstandingAssignment};
