// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dd_core::FakeClock;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

type DispatchFuture = Pin<Box<dyn Future<Output = Result<Value, PipelineError>> + Send>>;

struct FnDispatcher(Box<dyn Fn(Job, CancellationToken) -> DispatchFuture + Send + Sync>);

impl FnDispatcher {
    fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Job, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, PipelineError>> + Send + 'static,
    {
        Self(Box::new(move |job, scope| Box::pin(f(job, scope))))
    }
}

#[async_trait]
impl JobDispatcher for FnDispatcher {
    async fn dispatch(&self, job: &Job, scope: CancellationToken) -> Result<Value, PipelineError> {
        (self.0)(job.clone(), scope).await
    }
}

fn config(pool: usize, queue: usize) -> PipelineConfig {
    PipelineConfig {
        worker_pool_size: pool,
        job_queue_size: queue,
        shutdown_timeout: Duration::from_secs(1),
        ..PipelineConfig::default()
    }
}

fn orchestrator<F, Fut>(
    config: PipelineConfig,
    clock: FakeClock,
    dispatch: F,
) -> Arc<JobOrchestrator<FakeClock>>
where
    F: Fn(Job, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, PipelineError>> + Send + 'static,
{
    Arc::new(JobOrchestrator::new(&config, Arc::new(FnDispatcher::new(dispatch)), clock))
}

async fn wait_for(what: &str, check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn params(index: i64) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("index".to_string(), json!(index));
    map
}

#[tokio::test]
async fn submit_validates_id() {
    let orch = orchestrator(config(1, 10), FakeClock::new(), |_, _| async { Ok(json!("ok")) });
    let err = orch.submit("", "build", HashMap::new()).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    orch.submit("j1", "build", HashMap::new()).unwrap();
    let err = orch.submit("j1", "build", HashMap::new()).unwrap_err();
    assert_eq!(err.code(), "ALREADY_EXISTS");
}

#[tokio::test(start_paused = true)]
async fn single_consumer_preserves_fifo_order() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let sink = order.clone();
    let orch = orchestrator(config(1, 10), FakeClock::new(), move |job, _| {
        let sink = sink.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            sink.lock().push(job.id.0.clone());
            Ok(json!({"index": job.parameters.get("index")}))
        }
    });
    orch.start();

    for i in 1..=3 {
        orch.submit(format!("j{}", i), "build", params(i)).unwrap();
    }

    let stats_of = orch.clone();
    wait_for("three completions", move || stats_of.stats().completed == 3).await;

    assert_eq!(order.lock().clone(), vec!["j1", "j2", "j3"]);
    let stats = orch.stats();
    assert_eq!(stats.total_submitted, 3);
    assert_eq!(stats.total_completed, 3);
    assert_eq!(stats.failed, 0);

    orch.shutdown().await.unwrap();
}

#[tokio::test]
async fn full_queue_rejects_without_state_mutation() {
    // not started: the backlog bound applies
    let orch = orchestrator(config(1, 2), FakeClock::new(), |_, _| async { Ok(json!("ok")) });
    orch.submit("j1", "build", HashMap::new()).unwrap();
    orch.submit("j2", "build", HashMap::new()).unwrap();
    let err = orch.submit("j3", "build", HashMap::new()).unwrap_err();
    assert_eq!(err.code(), "QUEUE_FULL");
    assert!(orch.get("j3").is_none());
    assert_eq!(orch.stats().total_submitted, 2);
}

#[tokio::test(start_paused = true)]
async fn full_channel_rejects_after_start() {
    let orch = orchestrator(config(1, 1), FakeClock::new(), |_, scope| async move {
        scope.cancelled().await;
        Err(PipelineError::Cancelled)
    });
    orch.start();

    orch.submit("j1", "build", HashMap::new()).unwrap();
    let running = orch.clone();
    wait_for("j1 running", move || {
        running.get("j1").map(|j| j.status) == Some(JobStatus::Running)
    })
    .await;

    orch.submit("j2", "build", HashMap::new()).unwrap();
    let err = orch.submit("j3", "build", HashMap::new()).unwrap_err();
    assert_eq!(err.code(), "QUEUE_FULL");
    assert!(orch.get("j3").is_none());

    orch.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_pending_never_runs() {
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = dispatched.clone();
    let orch = orchestrator(config(1, 10), FakeClock::new(), move |_, _| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("ok"))
        }
    });

    orch.submit("j1", "build", HashMap::new()).unwrap();
    orch.cancel("j1").unwrap();
    assert_eq!(orch.get("j1").map(|j| j.status), Some(JobStatus::Cancelled));

    // starting later must not resurrect it
    orch.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(orch.get("j1").map(|j| j.status), Some(JobStatus::Cancelled));
    assert_eq!(dispatched.load(Ordering::SeqCst), 0);
    assert_eq!(orch.stats().total_cancelled, 1);

    orch.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_running_signals_the_job_scope() {
    let orch = orchestrator(config(1, 10), FakeClock::new(), |_, scope| async move {
        scope.cancelled().await;
        Err(PipelineError::Cancelled)
    });
    orch.start();

    orch.submit("j1", "build", HashMap::new()).unwrap();
    let running = orch.clone();
    wait_for("j1 running", move || {
        running.get("j1").map(|j| j.status) == Some(JobStatus::Running)
    })
    .await;

    orch.cancel("j1").unwrap();
    let cancelled = orch.clone();
    wait_for("j1 cancelled", move || {
        cancelled.get("j1").map(|j| j.status) == Some(JobStatus::Cancelled)
    })
    .await;

    // terminal: a second cancel is an invalid state
    let err = orch.cancel("j1").unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");

    orch.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let orch = orchestrator(config(1, 10), FakeClock::new(), |_, _| async { Ok(json!("ok")) });
    assert_eq!(orch.cancel("ghost").unwrap_err().code(), "NOT_FOUND");
}

#[tokio::test(start_paused = true)]
async fn deadline_fails_the_job_and_cancels_its_scope() {
    let mut cfg = config(1, 10);
    cfg.job_timeout = Duration::from_millis(50);
    let orch = orchestrator(cfg, FakeClock::new(), |_, _| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!("late"))
    });
    orch.start();

    orch.submit("j1", "pull", params(0)).unwrap();
    let failed = orch.clone();
    wait_for("j1 failed", move || {
        failed.get("j1").map(|j| j.status) == Some(JobStatus::Failed)
    })
    .await;

    let job = orch.get("j1").unwrap();
    assert!(job.error.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(orch.stats().total_failed, 1);

    orch.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dispatcher_error_fails_the_job() {
    let orch = orchestrator(config(1, 10), FakeClock::new(), |job, _| async move {
        match job.kind.as_str() {
            "build" => Ok(json!("ok")),
            other => Err(PipelineError::Validation(format!("unknown job type: {}", other))),
        }
    });
    orch.start();

    orch.submit("good", "build", HashMap::new()).unwrap();
    orch.submit("bad", "mystery", HashMap::new()).unwrap();

    let done = orch.clone();
    wait_for("both terminal", move || {
        done.stats().completed == 1 && done.stats().failed == 1
    })
    .await;

    let job = orch.get("bad").unwrap();
    assert!(job.error.as_deref().unwrap_or_default().contains("unknown job type"));

    orch.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrency_stays_under_the_permit_bound() {
    let mut cfg = config(4, 20);
    cfg.max_concurrent_jobs = 2;
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (current_in, peak_in) = (current.clone(), peak.clone());
    let orch = orchestrator(cfg, FakeClock::new(), move |_, _| {
        let current = current_in.clone();
        let peak = peak_in.clone();
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!("ok"))
        }
    });
    orch.start();

    for i in 0..8 {
        orch.submit(format!("j{}", i), "build", params(i)).unwrap();
    }
    let done = orch.clone();
    wait_for("all completed", move || done.stats().total_completed == 8).await;

    assert!(peak.load(Ordering::SeqCst) <= 2, "peak = {}", peak.load(Ordering::SeqCst));

    orch.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn pending_jobs_survive_a_restart() {
    let orch = orchestrator(config(1, 10), FakeClock::new(), |_, _| async { Ok(json!("ok")) });

    orch.submit("j1", "build", HashMap::new()).unwrap();
    assert_eq!(orch.get("j1").map(|j| j.status), Some(JobStatus::Pending));

    orch.start();
    let done = orch.clone();
    wait_for("j1 completed", move || done.stats().total_completed == 1).await;

    orch.shutdown().await.unwrap();

    // a second start keeps working
    orch.submit("j2", "build", HashMap::new()).unwrap();
    orch.start();
    let done = orch.clone();
    wait_for("j2 completed", move || done.stats().total_completed == 2).await;
    orch.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reaper_drops_old_terminal_records() {
    let clock = FakeClock::new();
    let orch = orchestrator(config(1, 10), clock.clone(), |_, _| async { Ok(json!("ok")) });
    orch.start();

    orch.submit("j1", "build", HashMap::new()).unwrap();
    let done = orch.clone();
    wait_for("j1 completed", move || done.stats().total_completed == 1).await;

    // young terminal records stay
    assert_eq!(orch.reap(), 0);

    clock.advance(Duration::from_secs(3601));
    assert_eq!(orch.reap(), 1);
    assert!(orch.get("j1").is_none());
    // totals since start are untouched by pruning
    assert_eq!(orch.stats().total_completed, 1);

    orch.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn list_filters_by_status_in_submission_order() {
    let orch = orchestrator(config(1, 10), FakeClock::new(), |_, _| async { Ok(json!("ok")) });

    orch.submit("a", "build", HashMap::new()).unwrap();
    orch.submit("b", "build", HashMap::new()).unwrap();
    orch.cancel("b").unwrap();

    let all: Vec<String> = orch.list(None).into_iter().map(|j| j.id.0).collect();
    assert_eq!(all, vec!["a", "b"]);

    let pending: Vec<String> =
        orch.list(Some(JobStatus::Pending)).into_iter().map(|j| j.id.0).collect();
    assert_eq!(pending, vec!["a"]);

    let cancelled: Vec<String> =
        orch.list(Some(JobStatus::Cancelled)).into_iter().map(|j| j.id.0).collect();
    assert_eq!(cancelled, vec!["b"]);
}
