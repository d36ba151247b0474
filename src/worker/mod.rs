//! Worker-side batch testing.
//!
//! - [`HashOracle`]: the digest function shared by manager and workers
//! - [`BatchExecutor`]: tests every candidate of a batch, stopping on a match
//!   or when poisoned
//! - [`LocalWorker`]: an in-process worker that receives batches over a
//!   channel and reports back to the [`Manager`](crate::manager::Manager)

pub mod executor;
pub mod hasher;
pub mod local;

pub use executor::{BatchExecutor, ExecutionResult};
pub use hasher::{HashOracle, Sha256Oracle};
pub use local::{LocalWorker, LocalWorkerHandle};
