// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic operation wrapper.
//!
//! One entry point for every pipeline operation: look up the session, honor
//! dry-run, run the admission gate, call the adapter with the caller's
//! scope, and fold the outcome into a standardized result. Read-heavy
//! operations consult the result cache after admission. Also serves as the
//! orchestrator's dispatcher, so queued jobs take the exact same path.

use crate::cache::ResultCache;
use crate::gate::SecurityGate;
use crate::orchestrator::JobDispatcher;
use async_trait::async_trait;
use dd_adapters::{AdapterError, DockerAdapter, KubeAdapter, SessionStore};
use dd_core::{
    Clock, Job, OperationKind, OperationRequest, OperationResult, PipelineError,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct PipelineOps<C: Clock> {
    sessions: Arc<dyn SessionStore>,
    docker: Arc<dyn DockerAdapter>,
    kube: Arc<dyn KubeAdapter>,
    gate: Arc<SecurityGate<C>>,
    cache: Arc<ResultCache<C>>,
    clock: C,
}

impl<C: Clock> PipelineOps<C> {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        docker: Arc<dyn DockerAdapter>,
        kube: Arc<dyn KubeAdapter>,
        gate: Arc<SecurityGate<C>>,
        cache: Arc<ResultCache<C>>,
        clock: C,
    ) -> Self {
        Self { sessions, docker, kube, gate, cache, clock }
    }

    /// Run one operation under session lookup, dry-run, and admission.
    ///
    /// Admission rejections and cancellation surface as errors; an adapter
    /// failure is folded into a `success: false` result carrying the
    /// operation context.
    pub async fn execute(
        &self,
        request: &OperationRequest,
        scope: CancellationToken,
    ) -> Result<OperationResult, PipelineError> {
        self.sessions.get(&request.session_id).await?;

        tracing::info!(
            session = %request.session_id,
            operation = %request.kind,
            reference = request.reference.as_str(),
            dry_run = request.dry_run,
            "operation started"
        );

        if request.dry_run {
            let output = format!("dry-run: {} {}", request.kind, request.reference);
            return Ok(OperationResult::success(request, output, 0, self.clock.now_utc())
                .with_metadata("dry_run", "true"));
        }

        let started = self.clock.now();
        let outcome = self.gate.secure(request, || self.run_adapter(request, &scope)).await;
        let duration_ms = self.clock.now().duration_since(started).as_millis() as u64;
        let timestamp = self.clock.now_utc();

        let result = match outcome {
            Ok(output) => {
                self.record_session_activity(request).await;
                OperationResult::success(request, output, duration_ms, timestamp)
            }
            Err(err @ PipelineError::Adapter { .. }) => {
                OperationResult::failure(request, err.to_string(), duration_ms, timestamp)
            }
            Err(err) => return Err(err),
        };
        Ok(result)
    }

    async fn run_adapter(
        &self,
        request: &OperationRequest,
        scope: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let cache_key = format!("{}:{}", request.kind, request.reference);
        if request.kind.is_read_heavy() {
            if let Some(Value::String(cached)) = self.cache.get(&cache_key) {
                tracing::debug!(key = cache_key.as_str(), "operation served from cache");
                return Ok(cached);
            }
        }

        let reference = request.reference.as_str();
        let output = match request.kind {
            OperationKind::Analysis => self.docker.analyze(scope, reference).await,
            OperationKind::Build => {
                let context = request.context_dir.as_deref().unwrap_or(".");
                self.docker.build(scope, context, reference).await
            }
            OperationKind::Pull => self.docker.pull(scope, reference).await,
            OperationKind::Push => self.docker.push(scope, reference).await,
            OperationKind::Tag => {
                let target = request.target.as_deref().ok_or_else(|| {
                    PipelineError::Validation("tag requires a target reference".to_string())
                })?;
                self.docker.tag(scope, reference, target).await
            }
            OperationKind::Scan => self.docker.scan(scope, reference).await,
            OperationKind::ScanSecrets => self.docker.scan_secrets(scope, reference).await,
            OperationKind::Deploy => self.kube.deploy(scope, reference).await,
        }
        .map_err(|err| match err {
            AdapterError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Adapter {
                operation: request.kind.to_string(),
                message: other.to_string(),
            },
        })?;

        if request.kind.is_read_heavy() {
            if let Err(err) = self.cache.set(&cache_key, Value::String(output.clone()), None) {
                tracing::debug!(key = cache_key.as_str(), error = %err, "result not cached");
            }
        }
        Ok(output)
    }

    async fn record_session_activity(&self, request: &OperationRequest) {
        let operation = request.kind.as_str().to_string();
        let reference = request.reference.clone();
        let update = self
            .sessions
            .update(
                &request.session_id,
                Box::new(move |session| {
                    session.metadata.insert("last_operation".to_string(), operation);
                    session.metadata.insert("last_reference".to_string(), reference);
                }),
            )
            .await;
        if let Err(err) = update {
            tracing::warn!(session = %request.session_id, error = %err, "session update failed");
        }
    }
}

#[async_trait]
impl<C: Clock> JobDispatcher for PipelineOps<C> {
    async fn dispatch(&self, job: &Job, scope: CancellationToken) -> Result<Value, PipelineError> {
        let kind: OperationKind = job.kind.parse()?;
        let request = OperationRequest::from_parameters(kind, &job.parameters)?;
        let result = self.execute(&request, scope).await?;
        if !result.success {
            return Err(PipelineError::Adapter {
                operation: kind.to_string(),
                message: result.error.clone().unwrap_or_else(|| "operation failed".to_string()),
            });
        }
        serde_json::to_value(result).map_err(|err| PipelineError::Internal(err.to_string()))
    }
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
