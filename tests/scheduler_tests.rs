use recovery_lite::scheduler::{Alphabet, BatchSizing, Job, JobState, PermutationSpace};
use uuid::Uuid;

fn job(alphabet: &str, length: usize, sizing: BatchSizing) -> Job {
    Job::create(
        Uuid::new_v4(),
        "digest",
        Alphabet::new(alphabet.chars()).unwrap(),
        length,
    )
    .unwrap()
    .with_sizing(sizing)
}

/// Drain every batch and check they tile `[0, total)` in order.
fn assert_tiles_space(job: &mut Job) -> usize {
    let total = job.total();
    let mut expected_start = 0;
    let mut count = 0;
    while let Some(batch) = job.next_batch() {
        assert_eq!(batch.start, expected_start, "batches must be contiguous");
        assert!(batch.end >= batch.start);
        assert!(batch.end < total);
        expected_start = batch.end + 1;
        count += 1;
    }
    assert_eq!(expected_start, total, "every index is covered");
    count
}

#[test]
fn test_batches_cover_space_for_any_worker_count() {
    let sizing = BatchSizing {
        target_batch_secs: 1,
        estimated_rate: 7,
    };
    for workers in [0, 1, 2, 3, 5, 16, 1000] {
        let mut job = job("abc", 4, sizing);
        job.set_batch_size(workers).unwrap();
        job.start();
        let count = assert_tiles_space(&mut job);
        assert!(count >= 1);
        assert!(!job.has_fresh_batches());
    }
}

#[test]
fn test_batch_size_bounds() {
    let sizing = BatchSizing {
        target_batch_secs: 2,
        estimated_rate: 10,
    };
    for workers in [1, 2, 4, 8, 64, 10_000] {
        let mut job = job("0123456789", 3, sizing);
        let size = job.set_batch_size(workers).unwrap();
        assert!(size >= 1);
        assert!(size <= sizing.cap());
        assert!(size <= 1000 / workers as u64 || size == 1);
    }
}

#[test]
fn test_batch_candidates_follow_space_order() {
    let mut job = job("AB", 2, BatchSizing::default());
    job.set_batch_size(2).unwrap();
    job.start();
    let first = job.next_batch().unwrap();
    let second = job.next_batch().unwrap();

    let mut candidates: Vec<String> = (first.start..=first.end)
        .map(|i| first.candidate_at(i))
        .collect();
    candidates.extend((second.start..=second.end).map(|i| second.candidate_at(i)));
    assert_eq!(candidates, vec!["AA", "AB", "BA", "BB"]);
}

#[test]
fn test_job_lifecycle() {
    let mut job = job("AB", 2, BatchSizing::default());
    assert_eq!(job.state(), JobState::Idle);
    job.set_batch_size(1).unwrap();
    assert!(job.next_batch().is_none(), "nothing is cut before start");
    job.start();
    assert_eq!(job.state(), JobState::Running);
    let batch = job.next_batch().unwrap();

    job.record_progress(batch.size());
    assert_eq!(job.completed(), 4);
    assert!(job.record_result("BA"));
    assert_eq!(job.state(), JobState::Complete);
    assert!(job.state().is_terminal());

    let snapshot = job.snapshot();
    assert_eq!(snapshot.result.as_deref(), Some("BA"));
    assert_eq!(snapshot.total, 4);
    assert_eq!(snapshot.batch_size, Some(4));
}

#[test]
fn test_exhausted_job_ends_not_found() {
    let mut job = job("AB", 2, BatchSizing::default());
    job.set_batch_size(1).unwrap();
    job.start();
    let batch = job.next_batch().unwrap();
    job.record_progress(batch.size());

    assert!(job.record_not_found());
    assert_eq!(job.state(), JobState::NotFound);
    assert_eq!(job.snapshot().result, None);
    assert!(job.next_batch().is_none());
}

#[test]
fn test_permutation_space_examples() {
    let space = PermutationSpace::new(Alphabet::new("01".chars()).unwrap(), 3).unwrap();
    assert_eq!(space.total(), 8);
    assert_eq!(space.candidate_at(0), "000");
    assert_eq!(space.candidate_at(5), "101");
    assert_eq!(space.candidate_at(7), "111");

    let space = PermutationSpace::new(Alphabet::new("AB".chars()).unwrap(), 2).unwrap();
    let all: Vec<String> = (0..space.total()).map(|i| space.candidate_at(i)).collect();
    assert_eq!(all, vec!["AA", "AB", "BA", "BB"]);
}

#[test]
fn test_permutation_space_rejects_overflow() {
    let alphabet = Alphabet::new("0123456789abcdefghijklmnopqrstuvwxyz".chars()).unwrap();
    assert!(PermutationSpace::new(alphabet, 40).is_err());
}
