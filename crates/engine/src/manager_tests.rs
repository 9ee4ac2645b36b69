// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::interval::IntervalWorker;
use async_trait::async_trait;
use dd_core::FakeClock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

enum Behavior {
    UntilCancelled,
    FailOnStart(&'static str),
    FailFirstStart(&'static str, AtomicBool),
    Panic(&'static str),
    IgnoreCancel,
}

struct TestWorker {
    name: String,
    behavior: Behavior,
    stop_fails: bool,
    starts: AtomicU64,
}

impl TestWorker {
    fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            stop_fails: false,
            starts: AtomicU64::new(0),
        })
    }

    fn with_failing_stop(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::UntilCancelled,
            stop_fails: true,
            starts: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Worker for TestWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, scope: CancellationToken) -> Result<(), PipelineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::UntilCancelled => {
                scope.cancelled().await;
                Ok(())
            }
            Behavior::FailOnStart(message) => Err(PipelineError::Internal(message.to_string())),
            Behavior::FailFirstStart(message, failed) => {
                if !failed.swap(true, Ordering::SeqCst) {
                    return Err(PipelineError::Internal(message.to_string()));
                }
                scope.cancelled().await;
                Ok(())
            }
            Behavior::Panic(message) => panic!("{}", message),
            Behavior::IgnoreCancel => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        match self.stop_fails {
            true => Err(PipelineError::Internal("release failed".to_string())),
            false => Ok(()),
        }
    }

    fn sample_health(&self) -> WorkerHealth {
        let mut health = WorkerHealth::new(HealthState::Healthy);
        health.tasks_total = self.starts.load(Ordering::SeqCst);
        health
    }
}

fn manager() -> Arc<WorkerManager<FakeClock>> {
    let config = PipelineConfig {
        health_check_period: Duration::from_millis(100),
        shutdown_timeout: Duration::from_secs(1),
        ..PipelineConfig::default()
    };
    Arc::new(WorkerManager::new(&config, FakeClock::new()))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn duplicate_name_is_rejected() {
    let manager = manager();
    manager.register(TestWorker::new("w1", Behavior::UntilCancelled)).unwrap();
    let err = manager.register(TestWorker::new("w1", Behavior::UntilCancelled)).unwrap_err();
    assert_eq!(err.code(), "ALREADY_EXISTS");
}

#[tokio::test]
async fn register_unregister_round_trip() {
    let manager = manager();
    manager.register(TestWorker::new("w1", Behavior::UntilCancelled)).unwrap();
    manager.unregister("w1").await.unwrap();
    assert!(manager.names().is_empty());
    // the name is free again
    manager.register(TestWorker::new("w1", Behavior::UntilCancelled)).unwrap();
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_walk_the_state_machine() {
    let manager = manager();
    manager.register(TestWorker::new("w1", Behavior::UntilCancelled)).unwrap();
    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Stopped);

    manager.start_worker("w1").unwrap();
    settle().await;
    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Running);

    let err = manager.start_worker("w1").unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");

    manager.stop_worker("w1").await.unwrap();
    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Stopped);

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn start_error_fails_the_worker_without_retry() {
    let manager = manager();
    let worker = TestWorker::new("w1", Behavior::FailOnStart("no disk"));
    manager.register(worker.clone()).unwrap();

    manager.start_worker("w1").unwrap();
    settle().await;

    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Failed);
    let health = manager.health_of("w1").unwrap();
    assert_eq!(health.status, HealthState::Failed);
    assert!(health.error.as_deref().unwrap_or_default().contains("no disk"));
    assert_eq!(worker.starts.load(Ordering::SeqCst), 1);

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn panic_is_contained_and_recorded() {
    let manager = manager();
    manager.register(TestWorker::new("w1", Behavior::Panic("boom"))).unwrap();
    manager.register(TestWorker::new("w2", Behavior::UntilCancelled)).unwrap();

    manager.start_worker("w1").unwrap();
    manager.start_worker("w2").unwrap();
    settle().await;

    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Failed);
    let health = manager.health_of("w1").unwrap();
    assert_eq!(health.error.as_deref(), Some("worker panicked: boom"));
    // the manager and its other workers survive
    assert_eq!(manager.state_of("w2").unwrap(), WorkerState::Running);

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_failure_marks_worker_failed() {
    let manager = manager();
    manager.register(TestWorker::with_failing_stop("w1")).unwrap();
    manager.start_worker("w1").unwrap();
    settle().await;

    manager.stop_worker("w1").await.unwrap();
    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Failed);
    let health = manager.health_of("w1").unwrap();
    assert!(health.error.as_deref().unwrap_or_default().contains("release failed"));

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_timeout_is_reported_and_task_abandoned() {
    let manager = manager();
    manager.register(TestWorker::new("w1", Behavior::IgnoreCancel)).unwrap();
    manager.start_worker("w1").unwrap();
    settle().await;

    let err = manager.stop_worker("w1").await.unwrap_err();
    assert!(err.is_timeout());

    // lifecycle shutdown hits the same stuck task
    let err = manager.shutdown().await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn restart_recovers_a_failed_worker() {
    let manager = manager();
    let worker = TestWorker::new(
        "w1",
        Behavior::FailFirstStart("flaky init", AtomicBool::new(false)),
    );
    manager.register(worker.clone()).unwrap();

    manager.start_worker("w1").unwrap();
    settle().await;
    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Failed);

    manager.restart_worker("w1").await.unwrap();
    settle().await;
    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Running);
    assert_eq!(worker.starts.load(Ordering::SeqCst), 2);

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unregister_stops_a_running_worker() {
    let manager = manager();
    manager.register(TestWorker::new("w1", Behavior::UntilCancelled)).unwrap();
    manager.start_worker("w1").unwrap();
    settle().await;

    manager.unregister("w1").await.unwrap();
    assert!(manager.names().is_empty());
    assert!(manager.health_of("w1").is_err());

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn poll_health_stores_samples_and_fails_erroring_workers() {
    let manager = manager();
    manager.register(TestWorker::new("ok", Behavior::UntilCancelled)).unwrap();
    manager.start_worker("ok").unwrap();
    settle().await;

    manager.poll_health();
    let health = manager.health_of("ok").unwrap();
    assert_eq!(health.status, HealthState::Healthy);
    assert!(manager.is_healthy());

    // a worker whose sample carries an error while Running goes to Failed
    struct Erroring;
    #[async_trait]
    impl Worker for Erroring {
        fn name(&self) -> &str {
            "sick"
        }
        async fn start(&self, scope: CancellationToken) -> Result<(), PipelineError> {
            scope.cancelled().await;
            Ok(())
        }
        async fn stop(&self) -> Result<(), PipelineError> {
            Ok(())
        }
        fn sample_health(&self) -> WorkerHealth {
            WorkerHealth::failed("probe refused")
        }
    }
    manager.register(Arc::new(Erroring)).unwrap();
    manager.start_worker("sick").unwrap();
    settle().await;

    manager.poll_health();
    assert_eq!(manager.state_of("sick").unwrap(), WorkerState::Failed);
    assert!(!manager.is_healthy());
    // the failure sample is preserved by later polls
    manager.poll_health();
    let health = manager.health_of("sick").unwrap();
    assert_eq!(health.error.as_deref(), Some("probe refused"));

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn health_of_synthesizes_before_first_poll() {
    let manager = manager();
    let worker = TestWorker::new("w1", Behavior::UntilCancelled);
    manager.register(worker).unwrap();

    let health = manager.health_of("w1").unwrap();
    assert_eq!(health.status, HealthState::Healthy);
    assert_eq!(health.tasks_total, 0);
}

#[tokio::test(start_paused = true)]
async fn interval_worker_lifecycle_end_to_end() {
    let manager = manager();
    let ticks = Arc::new(AtomicU64::new(0));
    let counter = ticks.clone();
    let worker = Arc::new(IntervalWorker::new("w1", Duration::from_millis(100), move || {
        let counter = counter.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));
    manager.register(worker).unwrap();

    manager.start().unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    let health = manager.health_of("w1").unwrap();
    assert!(health.tasks_total >= 3, "tasks_total = {}", health.tasks_total);
    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Running);
    assert!(manager.is_healthy());

    manager.shutdown().await.unwrap();
    assert_eq!(manager.state_of("w1").unwrap(), WorkerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_all_joins_every_worker() {
    let manager = manager();
    for name in ["a", "b", "c"] {
        manager.register(TestWorker::new(name, Behavior::UntilCancelled)).unwrap();
    }
    manager.start_all().unwrap();
    settle().await;
    assert_eq!(manager.stats().running, 3);

    manager.stop_all().await.unwrap();
    let stats = manager.stats();
    assert_eq!(stats.stopped, 3);
    assert_eq!(stats.running, 0);

    manager.shutdown().await.unwrap();
}
