use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::permutation::{candidate_at, Alphabet};

/// Identity of a batch: which job, which inclusive index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub job_id: Uuid,
    pub start: u64,
    pub end: u64,
}

/// A contiguous slice `[start, end]` of one job's permutation space, plus
/// everything a worker needs to test it. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub job_id: Uuid,
    pub start: u64,
    pub end: u64,
    pub target_digest: String,
    pub alphabet: Alphabet,
    pub length: usize,
}

impl Batch {
    pub fn key(&self) -> BatchKey {
        BatchKey {
            job_id: self.job_id,
            start: self.start,
            end: self.end,
        }
    }

    /// Number of candidates in the range. Never zero: both ends are
    /// inclusive.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn candidate_at(&self, index: u64) -> String {
        candidate_at(index, &self.alphabet, self.length)
    }
}

impl std::fmt::Display for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}..={}]", self.job_id, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn size_is_inclusive() {
        let id = Uuid::new_v4();
        assert_eq!(batch(id, 0, 0).size(), 1);
        assert_eq!(batch(id, 2, 3).size(), 2);
    }

    #[test]
    fn key_ignores_payload() {
        let id = Uuid::new_v4();
        let a = batch(id, 0, 1);
        let mut b = batch(id, 0, 1);
        b.target_digest = "other".to_string();
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), batch(id, 2, 3).key());
        assert_ne!(a.key(), batch(Uuid::new_v4(), 0, 1).key());
    }

    #[test]
    fn candidates_follow_alphabet() {
        let b = batch(Uuid::new_v4(), 2, 3);
        assert_eq!(b.candidate_at(2), "BA");
        assert_eq!(b.candidate_at(3), "BB");
    }
}
