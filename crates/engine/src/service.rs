// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline service: the single start/stop front over the runtime.
//!
//! Start order is worker manager, then job orchestrator, then the auxiliary
//! sweeper and housekeeping tasks; stop reverses it and tolerates
//! shutdown-timeout from individual components so a stuck worker cannot
//! wedge the whole teardown.

use crate::cache::ResultCache;
use crate::gate::SecurityGate;
use crate::manager::{WorkerManager, WorkerStats};
use crate::ops::PipelineOps;
use crate::orchestrator::JobOrchestrator;
use dd_adapters::{DockerAdapter, KubeAdapter, SessionStore};
use dd_core::{
    Clock, Job, JobStats, JobStatus, OperationRequest, OperationResult, PipelineConfig,
    PipelineError, SystemClock, Worker, WorkerHealth, WorkerId,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// External collaborators the pipeline consumes.
pub struct PipelineDeps {
    pub docker: Arc<dyn DockerAdapter>,
    pub kube: Arc<dyn KubeAdapter>,
    pub sessions: Arc<dyn SessionStore>,
}

/// Point-in-time snapshot of the runtime.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub healthy: bool,
    pub workers: WorkerStats,
    pub jobs: JobStats,
}

pub struct PipelineService<C: Clock = SystemClock> {
    config: RwLock<PipelineConfig>,
    running: Mutex<bool>,
    manager: Arc<WorkerManager<C>>,
    orchestrator: Arc<JobOrchestrator<C>>,
    gate: Arc<SecurityGate<C>>,
    cache: Arc<ResultCache<C>>,
    ops: Arc<PipelineOps<C>>,
}

impl PipelineService<SystemClock> {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Result<Self, PipelineError> {
        Self::with_clock(config, deps, SystemClock)
    }
}

impl<C: Clock> PipelineService<C> {
    pub fn with_clock(
        config: PipelineConfig,
        deps: PipelineDeps,
        clock: C,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let cache = Arc::new(ResultCache::new(config.cache.clone(), clock.clone())?);
        let gate = Arc::new(SecurityGate::new(
            config.security.clone(),
            deps.sessions.clone(),
            clock.clone(),
        ));
        let ops = Arc::new(PipelineOps::new(
            deps.sessions,
            deps.docker,
            deps.kube,
            gate.clone(),
            cache.clone(),
            clock.clone(),
        ));
        let manager = Arc::new(WorkerManager::new(&config, clock.clone()));
        let orchestrator = Arc::new(JobOrchestrator::new(&config, ops.clone(), clock));

        Ok(Self {
            config: RwLock::new(config),
            running: Mutex::new(false),
            manager,
            orchestrator,
            gate,
            cache,
            ops,
        })
    }

    /// Bring the runtime up. Fails if already running.
    pub fn start(&self) -> Result<(), PipelineError> {
        {
            let mut running = self.running.lock();
            if *running {
                return Err(PipelineError::InvalidState(
                    "pipeline is already running".to_string(),
                ));
            }
            *running = true;
        }

        tracing::info!("pipeline starting");
        if let Err(err) = self.manager.start() {
            *self.running.lock() = false;
            return Err(err);
        }
        self.orchestrator.start();
        self.cache.start();
        self.gate.start();
        tracing::info!("pipeline started");
        Ok(())
    }

    /// Tear the runtime down in reverse start order. Idempotent; component
    /// shutdown timeouts are logged, not returned, so repeated stops stay
    /// safe.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        {
            let mut running = self.running.lock();
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        tracing::info!("pipeline stopping");
        let shutdown_timeout = self.config.read().shutdown_timeout;
        if let Err(err) = self.orchestrator.shutdown().await {
            tracing::warn!(error = %err, "orchestrator shutdown incomplete");
        }
        if let Err(err) = self.manager.shutdown().await {
            tracing::warn!(error = %err, "worker manager shutdown incomplete");
        }
        if let Err(err) = self.gate.shutdown(shutdown_timeout).await {
            tracing::warn!(error = %err, "gate housekeeping shutdown incomplete");
        }
        if let Err(err) = self.cache.shutdown(shutdown_timeout).await {
            tracing::warn!(error = %err, "cache sweeper shutdown incomplete");
        }
        tracing::info!("pipeline stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            running: self.is_running(),
            healthy: self.manager.is_healthy(),
            workers: self.manager.stats(),
            jobs: self.orchestrator.stats(),
        }
    }

    pub fn config(&self) -> PipelineConfig {
        self.config.read().clone()
    }

    /// Replace the configuration. Only permitted while stopped; applies to
    /// the next start.
    pub fn update_config(&self, config: PipelineConfig) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::InvalidState(
                "configuration can only change while stopped".to_string(),
            ));
        }
        config.validate()?;
        self.manager.reconfigure(&config);
        self.orchestrator.reconfigure(&config);
        self.gate.reconfigure(config.security.clone());
        self.cache.reconfigure(config.cache.clone())?;
        *self.config.write() = config;
        Ok(())
    }

    // Worker surface

    pub fn register_worker(&self, worker: Arc<dyn Worker>) -> Result<(), PipelineError> {
        self.manager.register(worker)
    }

    pub async fn unregister_worker(&self, name: &str) -> Result<(), PipelineError> {
        self.manager.unregister(name).await
    }

    pub async fn restart_worker(&self, name: &str) -> Result<(), PipelineError> {
        self.manager.restart_worker(name).await
    }

    pub fn worker_health(&self, name: &str) -> Result<WorkerHealth, PipelineError> {
        self.manager.health_of(name)
    }

    pub fn all_worker_health(&self) -> HashMap<WorkerId, WorkerHealth> {
        self.manager.all_health()
    }

    pub fn is_healthy(&self) -> bool {
        self.manager.is_healthy()
    }

    // Job surface

    pub fn submit_job(
        &self,
        id: &str,
        kind: &str,
        parameters: HashMap<String, Value>,
    ) -> Result<Job, PipelineError> {
        self.orchestrator.submit(id, kind, parameters)
    }

    pub fn get_job(&self, id: &str) -> Result<Job, PipelineError> {
        self.orchestrator.get(id).ok_or_else(|| PipelineError::not_found("job", id))
    }

    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        self.orchestrator.list(status)
    }

    pub fn cancel_job(&self, id: &str) -> Result<(), PipelineError> {
        self.orchestrator.cancel(id)
    }

    pub fn job_stats(&self) -> JobStats {
        self.orchestrator.stats()
    }

    // Atomic operations

    /// Run one operation immediately under the caller's scope, outside the
    /// job queue.
    pub async fn execute_operation(
        &self,
        request: &OperationRequest,
        scope: CancellationToken,
    ) -> Result<OperationResult, PipelineError> {
        self.ops.execute(request, scope).await
    }

    pub fn gate(&self) -> &Arc<SecurityGate<C>> {
        &self.gate
    }

    pub fn cache(&self) -> &Arc<ResultCache<C>> {
        &self.cache
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
