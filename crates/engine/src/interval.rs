// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trivial periodic worker: an interval and an async body.

use async_trait::async_trait;
use dd_core::{HealthState, PipelineError, Worker, WorkerHealth};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type TaskFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>> + Send + Sync>;

/// Runs its body on a fixed interval until the scope is cancelled.
///
/// The first run happens immediately on start. A body error does not stop
/// the loop, but it is reported through `sample_health` until the next
/// successful run; the health poller will fail the worker on seeing it.
pub struct IntervalWorker {
    name: String,
    interval: Duration,
    task: TaskFn,
    tasks_total: AtomicU64,
    tasks_failed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl IntervalWorker {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            task: Arc::new(move || Box::pin(task())),
            tasks_total: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    async fn run_once(&self) {
        self.tasks_total.fetch_add(1, Ordering::Relaxed);
        match (self.task)().await {
            Ok(()) => {
                *self.last_error.lock() = None;
            }
            Err(err) => {
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker = self.name.as_str(), error = %err, "periodic task failed");
                *self.last_error.lock() = Some(err.to_string());
            }
        }
    }
}

#[async_trait]
impl Worker for IntervalWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, scope: CancellationToken) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = scope.cancelled() => return Ok(()),
                _ = ticker.tick() => self.run_once().await,
            }
        }
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn sample_health(&self) -> WorkerHealth {
        let mut health = match self.last_error.lock().clone() {
            Some(message) => {
                let mut health = WorkerHealth::new(HealthState::Unhealthy);
                health.error = Some(message);
                health
            }
            None => WorkerHealth::new(HealthState::Healthy),
        };
        health.tasks_total = self.tasks_total.load(Ordering::Relaxed);
        health.tasks_failed = self.tasks_failed.load(Ordering::Relaxed);
        health.metrics.insert("interval_ms".to_string(), self.interval.as_millis() as f64);
        health
    }
}

#[cfg(test)]
#[path = "interval_tests.rs"]
mod tests;
