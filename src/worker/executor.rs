use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::scheduler::Batch;
use crate::worker::hasher::HashOracle;

/// Result of running one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// The range as originally assigned, regardless of early termination.
    pub batch: Batch,
    pub found: bool,
    pub plaintext: Option<String>,
    /// Candidates actually hashed.
    pub tested: u64,
    pub poisoned: bool,
}

/// Tests every candidate of a batch against its target digest.
///
/// Stops early on a match or when the poison token is cancelled; the token
/// is checked once per candidate.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    hasher: Arc<dyn HashOracle>,
}

impl BatchExecutor {
    pub fn new(hasher: Arc<dyn HashOracle>) -> Self {
        Self { hasher }
    }

    /// CPU-bound; run it on a blocking thread from async code.
    pub fn execute(&self, batch: Batch, poison: &CancellationToken) -> ExecutionResult {
        tracing::debug!(batch = %batch, "Executing batch");

        let mut tested = 0;
        let mut plaintext = None;
        let mut poisoned = false;

        for index in batch.start..=batch.end {
            if poison.is_cancelled() {
                poisoned = true;
                break;
            }
            let candidate = batch.candidate_at(index);
            tested += 1;
            if self.hasher.hash(&candidate) == batch.target_digest {
                plaintext = Some(candidate);
                break;
            }
        }

        if poisoned {
            tracing::info!(batch = %batch, tested, "Batch abandoned after poison");
        } else if let Some(ref found) = plaintext {
            tracing::info!(batch = %batch, plaintext = %found, "Match found, ending batch early");
        } else {
            tracing::debug!(batch = %batch, tested, "Batch finished without a match");
        }

        ExecutionResult {
            found: plaintext.is_some(),
            plaintext,
            tested,
            poisoned,
            batch,
        }
    }
}
