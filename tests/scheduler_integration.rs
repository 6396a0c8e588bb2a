//! Scheduler integration tests
//!
//! Drives the scheduler and the dashboard together against the in-memory
//! GitHub mock, on paused tokio time so the one-minute window runs instantly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ghdash::dashboard::Dashboard;
use ghdash::github::{ApiError, MockGitHubApi, PullRequest, RepoRef};
use ghdash::scheduler::{Priority, RequestScheduler, Retryable, SchedulerConfig, SubmitError};
use tokio::time::Instant;

fn pull(number: u64) -> PullRequest {
    serde_json::from_value(serde_json::json!({
        "number": number,
        "title": "t",
        "state": "open",
        "html_url": "u",
        "user": {"login": "octocat"},
        "created_at": "2025-03-01T00:00:00Z",
        "updated_at": "2025-03-01T00:00:00Z"
    }))
    .unwrap()
}

/// Every window-long span of time holds at most `budget` starts.
fn assert_within_budget(starts: &[Instant], budget: usize, window: Duration) {
    for (i, first) in starts.iter().enumerate() {
        let in_window = starts[i..].iter().filter(|s| s.duration_since(*first) < window).count();
        assert!(in_window <= budget, "{} starts within one window, budget {}", in_window, budget);
    }
}

#[tokio::test(start_paused = true)]
async fn test_budget_holds_across_many_windows() {
    let scheduler = RequestScheduler::new(SchedulerConfig::with_budget(5));
    let starts = Arc::new(Mutex::new(Vec::new()));
    let begin = Instant::now();

    let operations = (0..12).map(|i| {
        let starts = Arc::clone(&starts);
        move || {
            starts.lock().unwrap().push(Instant::now());
            async move { Ok::<_, ApiError>(i) }
        }
    });
    let values = scheduler.submit_all(operations).await.unwrap();

    assert_eq!(values, (0..12).collect::<Vec<_>>());
    let mut starts = starts.lock().unwrap().clone();
    starts.sort();
    assert_eq!(starts.len(), 12);
    assert_within_budget(&starts, 5, Duration::from_secs(60));
    assert!(begin.elapsed() >= Duration::from_secs(120));
    assert!(begin.elapsed() < Duration::from_secs(180));
}

#[tokio::test(start_paused = true)]
async fn test_waiting_tasks_start_when_oldest_entry_decays() {
    let scheduler = RequestScheduler::new(SchedulerConfig::with_budget(2));
    let begin = Instant::now();

    let first = scheduler.submit(|| async { Ok::<_, ApiError>(Instant::now()) });
    let second = scheduler.submit(|| async { Ok::<_, ApiError>(Instant::now()) });
    let third = scheduler.submit(|| async { Ok::<_, ApiError>(Instant::now()) });

    let (a, b, c) = tokio::join!(first, second, third);
    assert_eq!(a.unwrap().duration_since(begin), Duration::ZERO);
    assert_eq!(b.unwrap().duration_since(begin), Duration::ZERO);
    let waited = c.unwrap().duration_since(begin);
    assert!(waited >= Duration::from_secs(60));
    assert!(waited < Duration::from_secs(61));
}

#[tokio::test(start_paused = true)]
async fn test_visible_work_jumps_background_backlog() {
    let repo = RepoRef::new("o", "r");
    let mut mock = MockGitHubApi::new();
    mock.pulls.insert(repo.clone(), vec![pull(1)]);
    let dashboard = Dashboard::new(Arc::new(mock), RequestScheduler::new(SchedulerConfig::with_budget(1)));
    let order = Arc::new(Mutex::new(Vec::new()));

    // Fill the budget so everything below has to queue.
    dashboard.scheduler().submit(|| async { Ok::<_, ApiError>(()) }).await.unwrap();

    let background: Vec<_> = (0..3)
        .map(|i| {
            let order = Arc::clone(&order);
            dashboard.scheduler().submit(move || {
                order.lock().unwrap().push(format!("background-{}", i));
                async { Ok::<_, ApiError>(()) }
            })
        })
        .collect();
    let visible = {
        let order = Arc::clone(&order);
        dashboard.scheduler().submit_with_priority(
            move || {
                order.lock().unwrap().push("visible".to_string());
                async { Ok::<_, ApiError>(()) }
            },
            Priority::High,
        )
    };

    visible.await.unwrap();
    futures::future::try_join_all(background).await.unwrap();

    let order = order.lock().unwrap().clone();
    assert_eq!(order, vec!["visible", "background-0", "background-1", "background-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_dashboard_survives_flaky_repo() {
    let repos = [RepoRef::new("o", "a"), RepoRef::new("o", "b")];
    let mut mock = MockGitHubApi::new();
    mock.pulls.insert(repos[0].clone(), vec![pull(1)]);
    mock.pulls.insert(repos[1].clone(), vec![pull(2), pull(3)]);
    mock.fail_next("pulls:o/b", 500);
    mock.fail_next("pulls:o/b", 503);
    let dashboard = Dashboard::new(Arc::new(mock), RequestScheduler::new(SchedulerConfig::default()));
    let begin = Instant::now();

    let result = dashboard.pull_requests(&repos).await.unwrap();

    assert_eq!(result[1].pulls.len(), 2);
    // 1s then 2s of backoff before the third attempt succeeds
    assert!(begin.elapsed() >= Duration::from_secs(3));
    let stats = dashboard.scheduler().stats();
    assert_eq!(stats.total_retries, 2);
    assert_eq!(stats.total_succeeded, 2);
}

#[tokio::test(start_paused = true)]
async fn test_dashboard_gives_up_after_max_attempts() {
    let repo = RepoRef::new("o", "down");
    let mut mock = MockGitHubApi::new();
    mock.pulls.insert(repo.clone(), Vec::new());
    for _ in 0..3 {
        mock.fail_next("pulls:o/down", 502);
    }
    let dashboard = Dashboard::new(Arc::new(mock), RequestScheduler::new(SchedulerConfig::default()));

    let err = dashboard.pull_requests(std::slice::from_ref(&repo)).await.unwrap_err();
    assert_eq!(err.task_error().and_then(|e| e.status()), Some(502));
    assert_eq!(dashboard.scheduler().stats().total_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_eyre_reports_are_classified_by_api_error() {
    let scheduler = RequestScheduler::new(SchedulerConfig::default());
    let calls = Arc::new(Mutex::new(0));

    let counter = Arc::clone(&calls);
    let err = scheduler
        .submit(move || {
            *counter.lock().unwrap() += 1;
            async {
                Err::<(), _>(eyre::Report::new(ApiError::Http {
                    status: 403,
                    message: "Resource not accessible".to_string(),
                }))
            }
        })
        .await
        .unwrap_err();
    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(err.task_error().and_then(|e| e.status()), Some(403));

    let counter = Arc::clone(&calls);
    let result = scheduler
        .submit(move || {
            let attempt = {
                let mut calls = counter.lock().unwrap();
                *calls += 1;
                *calls
            };
            async move {
                if attempt < 3 {
                    Err(eyre::eyre!("connection reset"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
    assert_eq!(result.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_settles_queued_dashboard_calls() {
    let repo = RepoRef::new("o", "r");
    let mut mock = MockGitHubApi::new();
    mock.pulls.insert(repo.clone(), vec![pull(1)]);
    let scheduler = RequestScheduler::new(SchedulerConfig::with_budget(1));
    let dashboard = Arc::new(Dashboard::new(Arc::new(mock), scheduler.clone()));

    // Spend the budget, then queue a dashboard call behind it.
    scheduler.submit(|| async { Ok::<_, ApiError>(()) }).await.unwrap();
    let queued = {
        let dashboard = Arc::clone(&dashboard);
        let repo = repo.clone();
        tokio::spawn(async move { dashboard.pull_requests(&[repo]).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.stats().pending, 1);

    scheduler.destroy();

    let err = queued.await.unwrap().unwrap_err();
    assert!(matches!(err, SubmitError::Shutdown));
    assert!(scheduler.is_closed());
}
