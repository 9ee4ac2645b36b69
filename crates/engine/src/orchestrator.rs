// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! FIFO job queue with a bounded consumer pool.
//!
//! Submissions land in the job table and a bounded channel; consumers pull
//! in arrival order, take a concurrency permit, and run the dispatcher under
//! a per-job cancellation scope with a kind-specific deadline. Terminal
//! records stay visible for the retention window, then the reaper drops
//! them.

use crate::lifecycle::Lifecycle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dd_core::{Clock, Job, JobId, JobStats, JobStatus, OperationKind, PipelineConfig, PipelineError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Kind-specific deadlines. Pull uses the configured `job_timeout`.
const PUSH_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const TAG_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Floor for the reaper period.
const MIN_REAP_PERIOD: Duration = Duration::from_secs(60);

fn deadline_for(kind: &str, job_timeout: Duration) -> Duration {
    match kind.parse::<OperationKind>() {
        Ok(OperationKind::Pull) => job_timeout,
        Ok(OperationKind::Push) => PUSH_TIMEOUT,
        Ok(OperationKind::Tag) => TAG_TIMEOUT,
        Ok(_) => FALLBACK_TIMEOUT,
        // unknown kinds fail in the dispatcher; give them the default bound
        Err(_) => job_timeout,
    }
}

/// Executes one job's operation. Implemented by the atomic-op wrapper; tests
/// substitute closures.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &Job, scope: CancellationToken) -> Result<Value, PipelineError>;
}

struct JobRecord {
    job: Job,
    seq: u64,
    scope: Option<CancellationToken>,
}

#[derive(Default)]
struct Counters {
    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, JobRecord>,
    next_seq: u64,
    counters: Counters,
}

struct Settings {
    worker_pool_size: usize,
    max_concurrent_jobs: usize,
    job_queue_size: usize,
    job_timeout: Duration,
    job_retention: Duration,
    shutdown_timeout: Duration,
}

impl Settings {
    fn from_config(config: &PipelineConfig) -> Self {
        Self {
            worker_pool_size: config.worker_pool_size,
            max_concurrent_jobs: config.max_concurrent_jobs,
            job_queue_size: config.job_queue_size,
            job_timeout: config.job_timeout,
            job_retention: config.job_retention,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

struct Shared<C: Clock> {
    table: Mutex<JobTable>,
    queue_tx: Mutex<Option<mpsc::Sender<JobId>>>,
    settings: Mutex<Settings>,
    dispatcher: Arc<dyn JobDispatcher>,
    clock: C,
}

pub struct JobOrchestrator<C: Clock> {
    shared: Arc<Shared<C>>,
    lifecycle: Lifecycle,
}

impl<C: Clock> JobOrchestrator<C> {
    pub fn new(config: &PipelineConfig, dispatcher: Arc<dyn JobDispatcher>, clock: C) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(JobTable::default()),
                queue_tx: Mutex::new(None),
                settings: Mutex::new(Settings::from_config(config)),
                dispatcher,
                clock,
            }),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn reconfigure(&self, config: &PipelineConfig) {
        *self.shared.settings.lock() = Settings::from_config(config);
    }

    /// Queue a job. Fails on duplicate id or a full queue, leaving no state
    /// behind in either case.
    pub fn submit(
        &self,
        id: impl Into<JobId>,
        kind: &str,
        parameters: HashMap<String, Value>,
    ) -> Result<Job, PipelineError> {
        let shared = &self.shared;
        let id = id.into();
        let job = Job::new(id.clone(), kind, parameters, shared.clock.now_utc());
        job.validate()?;

        let capacity = shared.settings.lock().job_queue_size;
        let tx = shared.queue_tx.lock().clone();
        let mut table = shared.table.lock();
        if table.jobs.contains_key(&id) {
            return Err(PipelineError::already_exists("job", id.as_str()));
        }

        match &tx {
            Some(tx) => {
                let seq = table.next_seq;
                table.next_seq += 1;
                table
                    .jobs
                    .insert(id.clone(), JobRecord { job: job.clone(), seq, scope: None });
                if let Err(err) = tx.try_send(id.clone()) {
                    table.jobs.remove(&id);
                    table.next_seq = seq;
                    return match err {
                        mpsc::error::TrySendError::Full(_) => {
                            Err(PipelineError::QueueFull { capacity })
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            Err(PipelineError::Internal("job queue closed".to_string()))
                        }
                    };
                }
            }
            None => {
                // not started: hold as Pending, re-enqueued on start
                let pending =
                    table.jobs.values().filter(|r| r.job.status == JobStatus::Pending).count();
                if pending >= capacity {
                    return Err(PipelineError::QueueFull { capacity });
                }
                let seq = table.next_seq;
                table.next_seq += 1;
                table
                    .jobs
                    .insert(id.clone(), JobRecord { job: job.clone(), seq, scope: None });
            }
        }

        table.counters.submitted += 1;
        table.counters.last_update = Some(shared.clock.now_utc());
        tracing::info!(job = %id, kind, "job submitted");
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.shared.table.lock().jobs.get(id).map(|r| r.job.clone())
    }

    /// Snapshot in submission order. `None` lists everything.
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let table = self.shared.table.lock();
        let mut records: Vec<(u64, Job)> = table
            .jobs
            .values()
            .filter(|r| status.is_none_or(|s| r.job.status == s))
            .map(|r| (r.seq, r.job.clone()))
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        records.into_iter().map(|(_, job)| job).collect()
    }

    /// Cancel a job. Pending jobs go terminal immediately; running jobs get
    /// their scope signalled and the consumer records the terminal status.
    pub fn cancel(&self, id: &str) -> Result<(), PipelineError> {
        let shared = &self.shared;
        let now = shared.clock.now_utc();
        let mut table = shared.table.lock();
        let record =
            table.jobs.get_mut(id).ok_or_else(|| PipelineError::not_found("job", id))?;
        match record.job.status {
            JobStatus::Pending => {
                record.job.status = JobStatus::Cancelled;
                record.job.completed_at = Some(now);
                table.counters.cancelled += 1;
                table.counters.last_update = Some(now);
                tracing::info!(job = id, "pending job cancelled");
                Ok(())
            }
            JobStatus::Running => {
                if let Some(scope) = &record.scope {
                    scope.cancel();
                }
                tracing::info!(job = id, "running job signalled to cancel");
                Ok(())
            }
            status => Err(PipelineError::InvalidState(format!(
                "job {} is already {}",
                id, status
            ))),
        }
    }

    pub fn stats(&self) -> JobStats {
        let table = self.shared.table.lock();
        let mut stats = JobStats {
            total_submitted: table.counters.submitted,
            total_completed: table.counters.completed,
            total_failed: table.counters.failed,
            total_cancelled: table.counters.cancelled,
            last_update: table.counters.last_update,
            ..JobStats::default()
        };
        for record in table.jobs.values() {
            match record.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Launch the consumer pool and the reaper. Jobs submitted while stopped
    /// are re-enqueued in submission order.
    pub fn start(&self) {
        self.lifecycle.reset();
        let shared = &self.shared;
        let (pool_size, max_concurrent, queue_size, retention) = {
            let settings = shared.settings.lock();
            (
                settings.worker_pool_size,
                settings.max_concurrent_jobs,
                settings.job_queue_size,
                settings.job_retention,
            )
        };

        let (tx, rx) = mpsc::channel::<JobId>(queue_size);
        let backlog: Vec<JobId> = {
            let table = shared.table.lock();
            let mut pending: Vec<(u64, JobId)> = table
                .jobs
                .iter()
                .filter(|(_, r)| r.job.status == JobStatus::Pending)
                .map(|(id, r)| (r.seq, id.clone()))
                .collect();
            pending.sort_by_key(|(seq, _)| *seq);
            pending.into_iter().map(|(_, id)| id).collect()
        };
        for id in backlog {
            if let Err(err) = tx.try_send(id.clone()) {
                tracing::warn!(job = %id, error = %err, "failed to re-enqueue pending job");
            }
        }
        *shared.queue_tx.lock() = Some(tx);

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let permits = Arc::new(Semaphore::new(max_concurrent));
        for _ in 0..pool_size {
            let shared = Arc::clone(&self.shared);
            let rx = rx.clone();
            let permits = permits.clone();
            self.lifecycle.spawn(move |scope| async move {
                shared.consume(scope, rx, permits).await;
            });
        }

        let shared = Arc::clone(&self.shared);
        self.lifecycle.spawn(move |scope| async move {
            let period = std::cmp::max(retention / 4, MIN_REAP_PERIOD);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = scope.cancelled() => return,
                    _ = ticker.tick() => {
                        shared.reap();
                    }
                }
            }
        });
    }

    /// Stop accepting queued work and join consumers and reaper.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let timeout = self.shared.settings.lock().shutdown_timeout;
        *self.shared.queue_tx.lock() = None;
        self.lifecycle.shutdown(timeout).await
    }

    /// Drop terminal records older than the retention window.
    pub fn reap(&self) -> usize {
        self.shared.reap()
    }

    pub fn len(&self) -> usize {
        self.shared.table.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.table.lock().jobs.is_empty()
    }
}

impl<C: Clock> Shared<C> {
    async fn consume(
        self: Arc<Self>,
        scope: CancellationToken,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<JobId>>>,
        permits: Arc<Semaphore>,
    ) {
        loop {
            let id = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = scope.cancelled() => return,
                    received = rx.recv() => match received {
                        Some(id) => id,
                        None => return,
                    },
                }
            };

            let permit = tokio::select! {
                _ = scope.cancelled() => return,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            self.process(&id, &scope).await;
            drop(permit);
        }
    }

    async fn process(&self, id: &JobId, consumer_scope: &CancellationToken) {
        let (job, job_scope, deadline) = {
            let job_timeout = self.settings.lock().job_timeout;
            let now = self.clock.now_utc();
            let mut table = self.table.lock();
            let Some(record) = table.jobs.get_mut(id) else {
                return;
            };
            // cancelled while queued, or a stale queue entry
            if record.job.status != JobStatus::Pending {
                return;
            }
            record.job.status = JobStatus::Running;
            record.job.started_at = Some(now);
            let scope = consumer_scope.child_token();
            record.scope = Some(scope.clone());
            let job = record.job.clone();
            let deadline = deadline_for(&job.kind, job_timeout);
            table.counters.last_update = Some(now);
            (job, scope, deadline)
        };
        tracing::info!(job = %id, kind = job.kind.as_str(), "job running");

        enum Outcome {
            Finished(Result<Value, PipelineError>),
            Cancelled,
            TimedOut,
        }

        let outcome = tokio::select! {
            result = self.dispatcher.dispatch(&job, job_scope.clone()) => Outcome::Finished(result),
            _ = job_scope.cancelled() => Outcome::Cancelled,
            _ = tokio::time::sleep(deadline) => {
                job_scope.cancel();
                Outcome::TimedOut
            }
        };

        let now = self.clock.now_utc();
        let mut table = self.table.lock();
        let Some(record) = table.jobs.get_mut(id) else {
            return;
        };
        record.scope = None;
        record.job.completed_at = Some(now);
        match outcome {
            Outcome::Finished(Ok(result)) => {
                record.job.status = JobStatus::Completed;
                record.job.result = Some(result);
                table.counters.completed += 1;
                tracing::info!(job = %id, "job completed");
            }
            Outcome::Finished(Err(PipelineError::Cancelled)) | Outcome::Cancelled => {
                record.job.status = JobStatus::Cancelled;
                record.job.error = Some(PipelineError::Cancelled.to_string());
                table.counters.cancelled += 1;
                tracing::info!(job = %id, "job cancelled");
            }
            Outcome::Finished(Err(err)) => {
                record.job.status = JobStatus::Failed;
                record.job.error = Some(err.to_string());
                table.counters.failed += 1;
                tracing::warn!(job = %id, error = %err, "job failed");
            }
            Outcome::TimedOut => {
                let err = PipelineError::timeout(format!("job {}", id), deadline);
                record.job.status = JobStatus::Failed;
                record.job.error = Some(err.to_string());
                table.counters.failed += 1;
                tracing::warn!(job = %id, "job deadline exceeded");
            }
        }
        table.counters.last_update = Some(now);
    }

    fn reap(&self) -> usize {
        let retention = self.settings.lock().job_retention;
        let cutoff = self.clock.now_utc()
            - chrono::TimeDelta::from_std(retention).unwrap_or(chrono::TimeDelta::zero());
        let mut table = self.table.lock();
        let before = table.jobs.len();
        table.jobs.retain(|_, r| {
            !(r.job.is_terminal() && r.job.completed_at.is_some_and(|t| t <= cutoff))
        });
        let reaped = before - table.jobs.len();
        if reaped > 0 {
            tracing::debug!(reaped, "terminal jobs reaped");
        }
        reaped
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
