mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use test_harness::*;
use vanity_lite::scheduler::{JobStatus, Scheduler};
use vanity_lite::search::PortableSearch;
use vanity_lite::store::{JobStore, MemoryStore};

#[tokio::test]
async fn test_fifo_admission_at_ceiling_one() {
    let mut svc = TestService::build(test_config(1));
    let ids = ["job-1", "job-2", "job-3"];
    for id in ids {
        svc.queue()
            .submit(submission(id, "a", 200_000), "t")
            .await
            .unwrap();
        // Distinct submission timestamps.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    svc.start_scheduler();

    let mut jobs = Vec::new();
    for id in ids {
        jobs.push(wait_terminal(svc.queue(), id, Duration::from_secs(60)).await);
    }

    for pair in jobs.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        let first_done = first.completed_at.unwrap();
        let second_start = second.started_at.unwrap();
        assert!(
            second_start >= first_done,
            "{} started at {} before {} completed at {}",
            second.id,
            second_start,
            first.id,
            first_done
        );
    }
    svc.shutdown().await;
}

#[tokio::test]
async fn test_ab_scenario_reaches_terminal_state() {
    let mut svc = TestService::build(test_config(2));
    svc.queue()
        .submit(submission("ab-job", "ab", 2_000_000), "t")
        .await
        .unwrap();
    svc.start_scheduler();

    let job = wait_terminal(svc.queue(), "ab-job", Duration::from_secs(120)).await;
    match job.status {
        JobStatus::Completed => {
            let result = job.result.unwrap();
            assert!(result.address.to_ascii_lowercase().ends_with("ab"));
            assert!(result.attempts <= 2_000_000);
        }
        JobStatus::Failed => assert!(job.error.is_some()),
        other => panic!("unexpected status {}", other),
    }

    // Terminal bookkeeping leaves nothing behind.
    assert!(!svc.store.is_in_progress("ab-job").await.unwrap());
    assert_eq!(svc.store.pending_count().await.unwrap(), 0);
    assert!(svc.store.active_ids().await.unwrap().is_empty());
    svc.shutdown().await;
}

#[tokio::test]
async fn test_infeasible_pattern_fails_after_budget() {
    let mut svc = TestService::build(test_config(1));
    svc.queue()
        .submit(submission("hopeless", "zzzzzzzz", 3_000), "t")
        .await
        .unwrap();
    svc.start_scheduler();

    let job = wait_terminal(svc.queue(), "hopeless", Duration::from_secs(30)).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_deref(),
        Some("no match within attempt budget (3000 attempts)")
    );
    svc.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_claims_admit_exactly_one() {
    let store = Arc::new(MemoryStore::new());
    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .mark_in_progress("contended", Duration::from_secs(60))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.active_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_schedulers_share_one_store() {
    let config = test_config(1);
    let svc = TestService::build(config.clone());
    let other = Scheduler::new(
        svc.store.clone(),
        Arc::new(PortableSearch::new(config.search.clone())),
        config.scheduler.clone(),
        config.search.program_id.clone(),
    );
    svc.queue()
        .submit(submission("shared", "a", 200_000), "t")
        .await
        .unwrap();

    let (a, b) = tokio::join!(svc.service.scheduler.tick(), other.tick());
    assert_eq!(a.unwrap() + b.unwrap(), 1);

    let job = wait_terminal(svc.queue(), "shared", Duration::from_secs(60)).await;
    assert!(job.status.is_terminal());
    svc.shutdown().await;
}

#[tokio::test]
async fn test_reconciler_recovers_stranded_job() {
    let mut svc = TestService::build(test_config(1));
    let queued = svc
        .queue()
        .submit(submission("stranded", "a", 200_000), "t")
        .await
        .unwrap();

    // A worker admitted the job and died without a trace beyond the record.
    let popped = svc.store.pop_oldest_pending().await.unwrap();
    assert_eq!(popped.as_deref(), Some("stranded"));
    let mut job = queued.clone();
    job.activate(Utc::now() - chrono::Duration::hours(1));
    svc.store
        .write_record(&job, Duration::from_secs(3600))
        .await
        .unwrap();
    svc.store.track_active("stranded").await.unwrap();

    svc.start_reconciler();
    svc.start_scheduler();

    let job = wait_terminal(svc.queue(), "stranded", Duration::from_secs(60)).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.request_id, queued.request_id);
    assert!(job.started_at.unwrap() > Utc::now() - chrono::Duration::minutes(5));
    svc.shutdown().await;
}
