// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker registry, lifecycle supervision, and periodic health sampling.
//!
//! One read-write lock guards the worker slots (worker handle, state,
//! health, scope, supervisor). Mutation sections never call into worker
//! code while holding it: health sampling and stop calls happen on cloned
//! handles outside the lock. Panics in a worker body are caught at the task
//! boundary and become a Failed state, never a manager crash.

use crate::lifecycle::Lifecycle;
use dd_core::{
    Clock, HealthState, PipelineConfig, PipelineError, Worker, WorkerHealth, WorkerId, WorkerState,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Idle delay between stop and start on restart, letting resources release.
const RESTART_DELAY: Duration = Duration::from_millis(100);

struct WorkerSlot {
    worker: Arc<dyn Worker>,
    state: WorkerState,
    health: Option<WorkerHealth>,
    scope: Option<CancellationToken>,
    supervisor: Option<JoinHandle<()>>,
}

/// Registry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub total: usize,
    pub stopped: usize,
    pub starting: usize,
    pub running: usize,
    pub stopping: usize,
    pub failed: usize,
}

struct Settings {
    health_check_period: Duration,
    shutdown_timeout: Duration,
}

struct Shared<C: Clock> {
    slots: RwLock<HashMap<WorkerId, WorkerSlot>>,
    settings: Mutex<Settings>,
    started_at: Mutex<Instant>,
    clock: C,
}

pub struct WorkerManager<C: Clock> {
    shared: Arc<Shared<C>>,
    lifecycle: Lifecycle,
}

impl<C: Clock> WorkerManager<C> {
    pub fn new(config: &PipelineConfig, clock: C) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: RwLock::new(HashMap::new()),
                settings: Mutex::new(Settings {
                    health_check_period: config.health_check_period,
                    shutdown_timeout: config.shutdown_timeout,
                }),
                started_at: Mutex::new(clock.now()),
                clock,
            }),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn reconfigure(&self, config: &PipelineConfig) {
        let mut settings = self.shared.settings.lock();
        settings.health_check_period = config.health_check_period;
        settings.shutdown_timeout = config.shutdown_timeout;
    }

    /// Add a worker to the registry in the Stopped state.
    pub fn register(&self, worker: Arc<dyn Worker>) -> Result<(), PipelineError> {
        let name = worker.name().to_string();
        if name.is_empty() {
            return Err(PipelineError::Validation("worker name must not be empty".to_string()));
        }
        let mut slots = self.shared.slots.write();
        if slots.contains_key(name.as_str()) {
            return Err(PipelineError::already_exists("worker", name));
        }
        tracing::info!(worker = name.as_str(), "worker registered");
        slots.insert(
            WorkerId::new(name),
            WorkerSlot {
                worker,
                state: WorkerState::Stopped,
                health: None,
                scope: None,
                supervisor: None,
            },
        );
        Ok(())
    }

    /// Remove a worker. A running worker is stopped first; its state and
    /// health leave the registry with it.
    pub async fn unregister(&self, name: &str) -> Result<(), PipelineError> {
        let active = {
            let slots = self.shared.slots.read();
            let slot =
                slots.get(name).ok_or_else(|| PipelineError::not_found("worker", name))?;
            slot.state.is_active()
        };
        if active {
            self.stop_worker(name).await?;
        }
        self.shared.slots.write().remove(name);
        tracing::info!(worker = name, "worker unregistered");
        Ok(())
    }

    /// Spawn the supervising task for one worker.
    pub fn start_worker(&self, name: &str) -> Result<(), PipelineError> {
        let (worker, scope) = {
            let mut slots = self.shared.slots.write();
            let slot =
                slots.get_mut(name).ok_or_else(|| PipelineError::not_found("worker", name))?;
            if !slot.state.can_start() {
                return Err(PipelineError::InvalidState(format!(
                    "worker {} is {}",
                    name, slot.state
                )));
            }
            slot.state = WorkerState::Starting;
            let scope = self.lifecycle.child_scope();
            slot.scope = Some(scope.clone());
            (slot.worker.clone(), scope)
        };

        let shared = Arc::clone(&self.shared);
        let id = WorkerId::new(name);
        let handle = self.lifecycle.spawn_task(async move {
            shared.supervise(id, worker, scope).await;
        });
        if let Some(slot) = self.shared.slots.write().get_mut(name) {
            slot.supervisor = Some(handle);
        }
        Ok(())
    }

    /// Cancel a worker's scope and wait for its supervisor to finish.
    pub async fn stop_worker(&self, name: &str) -> Result<(), PipelineError> {
        let timeout = self.shared.settings.lock().shutdown_timeout;
        let (scope, handle) = {
            let mut slots = self.shared.slots.write();
            let slot =
                slots.get_mut(name).ok_or_else(|| PipelineError::not_found("worker", name))?;
            if !slot.state.is_active() {
                return Ok(());
            }
            (slot.scope.clone(), slot.supervisor.take())
        };

        if let Some(scope) = scope {
            scope.cancel();
        }
        let Some(handle) = handle else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => Ok(()),
            Err(_) => {
                // the task stays tracked; lifecycle shutdown abandons it
                tracing::warn!(worker = name, "worker stop timed out");
                Err(PipelineError::timeout(format!("worker {} stop", name), timeout))
            }
        }
    }

    /// Stop, let resources release, start again.
    pub async fn restart_worker(&self, name: &str) -> Result<(), PipelineError> {
        self.stop_worker(name).await?;
        tokio::time::sleep(RESTART_DELAY).await;
        self.start_worker(name)
    }

    /// Start every worker currently in Stopped.
    pub fn start_all(&self) -> Result<(), PipelineError> {
        let names: Vec<WorkerId> = {
            let slots = self.shared.slots.read();
            slots
                .iter()
                .filter(|(_, s)| s.state == WorkerState::Stopped)
                .map(|(k, _)| k.clone())
                .collect()
        };
        for name in names {
            self.start_worker(name.as_str())?;
        }
        Ok(())
    }

    /// Fan out cancellation to all active workers, then join each within the
    /// shared shutdown window. Workers that miss it are reported and
    /// abandoned to the lifecycle shutdown.
    pub async fn stop_all(&self) -> Result<(), PipelineError> {
        let timeout = self.shared.settings.lock().shutdown_timeout;
        let targets: Vec<(WorkerId, Option<CancellationToken>, Option<JoinHandle<()>>)> = {
            let mut slots = self.shared.slots.write();
            slots
                .iter_mut()
                .filter(|(_, s)| s.state.is_active())
                .map(|(k, s)| (k.clone(), s.scope.clone(), s.supervisor.take()))
                .collect()
        };

        for (_, scope, _) in &targets {
            if let Some(scope) = scope {
                scope.cancel();
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut timed_out: Vec<String> = Vec::new();
        for (name, _, handle) in targets {
            let Some(handle) = handle else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                timed_out.push(name.to_string());
            }
        }

        if timed_out.is_empty() {
            Ok(())
        } else {
            tracing::warn!(workers = ?timed_out, "worker shutdown timed out");
            Err(PipelineError::timeout(
                format!("workers [{}] stop", timed_out.join(", ")),
                timeout,
            ))
        }
    }

    /// Reset the lifecycle, launch the health poller, and start all workers.
    pub fn start(&self) -> Result<(), PipelineError> {
        self.lifecycle.reset();
        *self.shared.started_at.lock() = self.shared.clock.now();
        self.spawn_health_poller();
        self.start_all()
    }

    /// Stop all workers and join every supervised task.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let timeout = self.shared.settings.lock().shutdown_timeout;
        let stopped = self.stop_all().await;
        let joined = self.lifecycle.shutdown(timeout).await;
        stopped.and(joined)
    }

    fn spawn_health_poller(&self) {
        let period = self.shared.settings.lock().health_check_period;
        let shared = Arc::clone(&self.shared);
        self.lifecycle.spawn(move |scope| async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = scope.cancelled() => return,
                    _ = ticker.tick() => shared.poll_health(),
                }
            }
        });
    }

    /// One health-poll pass, driven by the poller and callable directly in
    /// tests.
    pub fn poll_health(&self) {
        self.shared.poll_health();
    }

    /// Cached health if the poller has populated it, otherwise a fresh
    /// sample stamped with the current time and manager uptime.
    pub fn health_of(&self, name: &str) -> Result<WorkerHealth, PipelineError> {
        let (worker, cached) = {
            let slots = self.shared.slots.read();
            let slot =
                slots.get(name).ok_or_else(|| PipelineError::not_found("worker", name))?;
            (slot.worker.clone(), slot.health.clone())
        };
        if let Some(health) = cached {
            return Ok(health);
        }
        let mut health = worker.sample_health();
        health.last_check = self.shared.clock.now_utc();
        health.uptime = self.shared.uptime();
        Ok(health)
    }

    pub fn all_health(&self) -> HashMap<WorkerId, WorkerHealth> {
        let snapshot: Vec<(WorkerId, Arc<dyn Worker>, Option<WorkerHealth>)> = {
            let slots = self.shared.slots.read();
            slots
                .iter()
                .map(|(k, s)| (k.clone(), s.worker.clone(), s.health.clone()))
                .collect()
        };
        let last_check = self.shared.clock.now_utc();
        let uptime = self.shared.uptime();
        snapshot
            .into_iter()
            .map(|(name, worker, cached)| {
                let health = cached.unwrap_or_else(|| {
                    let mut health = worker.sample_health();
                    health.last_check = last_check;
                    health.uptime = uptime;
                    health
                });
                (name, health)
            })
            .collect()
    }

    /// True iff every stored health sample reports healthy.
    pub fn is_healthy(&self) -> bool {
        let slots = self.shared.slots.read();
        slots.values().filter_map(|s| s.health.as_ref()).all(WorkerHealth::is_healthy)
    }

    pub fn state_of(&self, name: &str) -> Result<WorkerState, PipelineError> {
        let slots = self.shared.slots.read();
        slots
            .get(name)
            .map(|s| s.state)
            .ok_or_else(|| PipelineError::not_found("worker", name))
    }

    pub fn stats(&self) -> WorkerStats {
        let slots = self.shared.slots.read();
        let mut stats = WorkerStats { total: slots.len(), ..WorkerStats::default() };
        for slot in slots.values() {
            match slot.state {
                WorkerState::Stopped => stats.stopped += 1,
                WorkerState::Starting => stats.starting += 1,
                WorkerState::Running => stats.running += 1,
                WorkerState::Stopping => stats.stopping += 1,
                WorkerState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn names(&self) -> Vec<WorkerId> {
        self.shared.slots.read().keys().cloned().collect()
    }
}

impl<C: Clock> Shared<C> {
    fn uptime(&self) -> Duration {
        self.clock.now().duration_since(*self.started_at.lock())
    }

    async fn supervise(
        self: Arc<Self>,
        name: WorkerId,
        worker: Arc<dyn Worker>,
        scope: CancellationToken,
    ) {
        self.set_state(name.as_str(), WorkerState::Running);
        tracing::info!(worker = %name, "worker running");

        let body = tokio::spawn({
            let worker = worker.clone();
            let scope = scope.clone();
            async move { worker.start(scope).await }
        });

        match body.await {
            Ok(Ok(())) => {
                self.set_state(name.as_str(), WorkerState::Stopping);
                match worker.stop().await {
                    Ok(()) => {
                        self.set_state(name.as_str(), WorkerState::Stopped);
                        tracing::info!(worker = %name, "worker stopped");
                    }
                    Err(err) => self.fail_worker(name.as_str(), format!("stop failed: {}", err)),
                }
            }
            Ok(Err(err)) => self.fail_worker(name.as_str(), err.to_string()),
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                self.fail_worker(name.as_str(), format!("worker panicked: {}", message));
            }
            Err(_) => self.fail_worker(name.as_str(), "worker task aborted".to_string()),
        }
    }

    /// Snapshot the registry, sample outside the lock, store the results.
    /// A Running worker reporting an error is failed and its scope
    /// cancelled. Failed workers keep their failure sample.
    fn poll_health(&self) {
        let snapshot: Vec<(WorkerId, Arc<dyn Worker>)> = {
            let slots = self.slots.read();
            slots
                .iter()
                .filter(|(_, s)| s.state != WorkerState::Failed)
                .map(|(k, s)| (k.clone(), s.worker.clone()))
                .collect()
        };

        let last_check = self.clock.now_utc();
        let uptime = self.uptime();
        let samples: Vec<(WorkerId, WorkerHealth)> = snapshot
            .into_iter()
            .map(|(name, worker)| {
                let mut health = worker.sample_health();
                health.last_check = last_check;
                health.uptime = uptime;
                (name, health)
            })
            .collect();

        let mut slots = self.slots.write();
        for (name, mut health) in samples {
            let Some(slot) = slots.get_mut(&name) else {
                continue;
            };
            if health.error.is_some() && slot.state == WorkerState::Running {
                slot.state = WorkerState::Failed;
                health.status = HealthState::Failed;
                if let Some(scope) = &slot.scope {
                    scope.cancel();
                }
                tracing::warn!(
                    worker = %name,
                    error = health.error.as_deref().unwrap_or_default(),
                    "worker failed health check"
                );
            }
            slot.health = Some(health);
        }
    }

    fn set_state(&self, name: &str, next: WorkerState) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(name) {
            if slot.state.can_transition_to(next) {
                slot.state = next;
            } else {
                tracing::debug!(worker = name, from = %slot.state, to = %next, "transition skipped");
            }
        }
    }

    fn fail_worker(&self, name: &str, message: String) {
        let uptime = self.uptime();
        let last_check = self.clock.now_utc();
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(name) {
            if slot.state.can_transition_to(WorkerState::Failed) {
                slot.state = WorkerState::Failed;
            }
            let mut health = WorkerHealth::failed(message.clone());
            if let Some(previous) = &slot.health {
                health.tasks_total = previous.tasks_total;
                health.tasks_failed = previous.tasks_failed;
            }
            health.last_check = last_check;
            health.uptime = uptime;
            slot.health = Some(health);
        }
        tracing::warn!(worker = name, error = message.as_str(), "worker failed");
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
