// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-execution admission: rate limiting, session validity, reference
//! validation, registry and image policy, with an append-only audit trail.
//!
//! Admission failures short-circuit before any side effect: the wrapped
//! operation only runs once every check has passed.

pub mod audit;
pub mod ratelimit;
pub mod reference;

pub use audit::{AuditLog, GateMetrics, SecurityEvent, Severity, AUDIT_RETENTION};
pub use ratelimit::{RateLimiter, RATE_WINDOW};
pub use reference::{ImageRef, DEFAULT_REGISTRY, MAX_REFERENCE_LEN};

use crate::lifecycle::Lifecycle;
use dd_adapters::SessionStore;
use dd_core::{Clock, OperationKind, OperationRequest, PipelineError, SecurityConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Substrings that must not appear in a pushed reference.
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "key",
    "token",
    "credential",
    "api_key",
    "private",
    "confidential",
    "internal",
];

/// Operations running longer than this get a WARN event.
const LONG_RUNNING_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Audit prune + rate-limit prune cadence.
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(60 * 60);

pub struct SecurityGate<C: Clock> {
    config: RwLock<SecurityConfig>,
    sessions: Arc<dyn SessionStore>,
    limiter: Arc<RateLimiter<C>>,
    audit: Arc<AuditLog<C>>,
    lifecycle: Lifecycle,
    clock: C,
}

impl<C: Clock> SecurityGate<C> {
    pub fn new(config: SecurityConfig, sessions: Arc<dyn SessionStore>, clock: C) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute, clock.clone()));
        let audit = Arc::new(AuditLog::new(config.enable_audit, clock.clone()));
        Self {
            config: RwLock::new(config),
            sessions,
            limiter,
            audit,
            lifecycle: Lifecycle::new(),
            clock,
        }
    }

    /// Replace the admission policy. Applies from the next admission on.
    pub fn reconfigure(&self, config: SecurityConfig) {
        self.limiter.set_limit(config.rate_limit_per_minute);
        self.audit.set_enabled(config.enable_audit);
        *self.config.write() = config;
    }

    /// Run every admission check for the request, in order: rate limit,
    /// session validity, operation-specific validation. On success an
    /// `OPERATION_VALIDATED` event is recorded.
    pub async fn admit(&self, request: &OperationRequest) -> Result<(), PipelineError> {
        let session_id = request.session_id.as_str();
        let operation = request.kind.as_str();

        if let Err(err) = self.limiter.check(&request.session_id) {
            let limit = self.config.read().rate_limit_per_minute;
            self.audit.record(
                session_id,
                operation,
                "RATE_LIMIT_EXCEEDED",
                Severity::High,
                format!("session exceeded {} requests per minute", limit),
                HashMap::new(),
            );
            return Err(err);
        }

        self.check_session(request).await?;

        match request.kind {
            OperationKind::Pull => self.check_pull(request)?,
            OperationKind::Push => self.check_push(request)?,
            OperationKind::Tag => self.check_tag(request)?,
            _ => {
                self.audit.record(
                    session_id,
                    operation,
                    "UNVALIDATED_OPERATION",
                    Severity::Info,
                    "no operation-specific validation rules",
                    HashMap::new(),
                );
            }
        }

        self.audit.record(
            session_id,
            operation,
            "OPERATION_VALIDATED",
            Severity::Info,
            "admission checks passed",
            self.reference_context(request),
        );
        Ok(())
    }

    /// Run `op` under admission, measuring duration and recording the
    /// outcome. Rejections surface without invoking `op`.
    pub async fn secure<T, F, Fut>(
        &self,
        request: &OperationRequest,
        op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        self.admit(request).await?;

        let session_id = request.session_id.as_str();
        let operation = request.kind.as_str();
        let started = self.clock.now();
        let result = op().await;
        let elapsed = self.clock.now().duration_since(started);

        let mut context = self.reference_context(request);
        context.insert("duration_ms".to_string(), elapsed.as_millis().to_string());
        match &result {
            Ok(_) => self.audit.record(
                session_id,
                operation,
                "OPERATION_SUCCESS",
                Severity::Info,
                format!("{} completed", operation),
                context.clone(),
            ),
            Err(err) => self.audit.record(
                session_id,
                operation,
                "OPERATION_FAILED",
                Severity::Warn,
                format!("{} failed: {}", operation, err),
                context.clone(),
            ),
        }
        if elapsed > LONG_RUNNING_THRESHOLD {
            self.audit.record(
                session_id,
                operation,
                "LONG_RUNNING_OPERATION",
                Severity::Warn,
                format!("{} ran for {}s", operation, elapsed.as_secs()),
                context,
            );
        }
        result
    }

    async fn check_session(&self, request: &OperationRequest) -> Result<(), PipelineError> {
        let session = match self.sessions.get(&request.session_id).await {
            Ok(session) => session,
            Err(err) => {
                self.record_invalid_session(request, "session not found");
                return Err(err);
            }
        };

        let now = self.clock.now_utc();
        if session.is_expired(now) {
            self.record_invalid_session(request, "session expired");
            return Err(PipelineError::PermissionDenied(format!(
                "session {} expired",
                request.session_id
            )));
        }

        let max_duration = self.config.read().max_session_duration;
        let max_delta =
            chrono::TimeDelta::from_std(max_duration).unwrap_or(chrono::TimeDelta::MAX);
        if now - session.created_at > max_delta {
            self.record_invalid_session(request, "session exceeded maximum duration");
            return Err(PipelineError::PermissionDenied(format!(
                "session {} exceeded maximum duration",
                request.session_id
            )));
        }
        Ok(())
    }

    fn record_invalid_session(&self, request: &OperationRequest, why: &str) {
        self.audit.record(
            request.session_id.as_str(),
            request.kind.as_str(),
            "INVALID_SESSION",
            Severity::High,
            why,
            HashMap::new(),
        );
    }

    fn check_pull(&self, request: &OperationRequest) -> Result<(), PipelineError> {
        let image = self.validate_reference(request, &request.reference)?;
        self.check_registry_allowed(request, &image)?;
        self.check_blocked_images(request, &image)?;
        Ok(())
    }

    fn check_push(&self, request: &OperationRequest) -> Result<(), PipelineError> {
        let image = self.validate_reference(request, &request.reference)?;
        self.check_registry_allowed(request, &image)?;

        if image.registry.to_lowercase().contains("public") {
            self.audit.record(
                request.session_id.as_str(),
                request.kind.as_str(),
                "PUSH_DENIED",
                Severity::Warn,
                format!("push to public registry {} refused", image.registry),
                self.reference_context(request),
            );
            return Err(PipelineError::PermissionDenied(format!(
                "push to public registry {} refused",
                image.registry
            )));
        }

        let lowered = request.reference.to_lowercase();
        if let Some(pattern) = SENSITIVE_PATTERNS.iter().find(|p| lowered.contains(*p)) {
            self.audit.record(
                request.session_id.as_str(),
                request.kind.as_str(),
                "SENSITIVE_REFERENCE",
                Severity::High,
                format!("reference contains sensitive term {:?}", pattern),
                self.reference_context(request),
            );
            return Err(PipelineError::SecurityViolation(format!(
                "reference contains sensitive term {:?}",
                pattern
            )));
        }
        Ok(())
    }

    fn check_tag(&self, request: &OperationRequest) -> Result<(), PipelineError> {
        let source = self.validate_reference(request, &request.reference)?;
        let target_raw = request.target.as_deref().ok_or_else(|| {
            PipelineError::Validation("tag requires a target reference".to_string())
        })?;
        let target = self.validate_reference(request, target_raw)?;

        if self.tag_flood_suspected(&source, &target) {
            self.audit.record(
                request.session_id.as_str(),
                request.kind.as_str(),
                "TAG_FLOOD_SUSPECTED",
                Severity::High,
                format!("tagging {} as {} looks like tag flooding", source.raw, target.raw),
                self.reference_context(request),
            );
            return Err(PipelineError::SecurityViolation("tag flood suspected".to_string()));
        }
        Ok(())
    }

    /// Hook for a tag-flooding heuristic. None is defined; always false.
    pub fn tag_flood_suspected(&self, _source: &ImageRef, _target: &ImageRef) -> bool {
        false
    }

    fn validate_reference(
        &self,
        request: &OperationRequest,
        raw: &str,
    ) -> Result<ImageRef, PipelineError> {
        reference::parse(raw).map_err(|err| {
            let mut context = HashMap::new();
            context.insert("reference".to_string(), raw.to_string());
            self.audit.record(
                request.session_id.as_str(),
                request.kind.as_str(),
                "INVALID_IMAGE_FORMAT",
                Severity::Warn,
                err.to_string(),
                context,
            );
            err
        })
    }

    fn check_registry_allowed(
        &self,
        request: &OperationRequest,
        image: &ImageRef,
    ) -> Result<(), PipelineError> {
        let config = self.config.read();
        if config.allowed_registries.is_empty()
            || config.allowed_registries.iter().any(|r| r == &image.registry)
        {
            return Ok(());
        }
        drop(config);

        self.audit.record(
            request.session_id.as_str(),
            request.kind.as_str(),
            "BLOCKED_REGISTRY",
            Severity::High,
            format!("registry {} is not allow-listed", image.registry),
            self.reference_context(request),
        );
        Err(PipelineError::PermissionDenied(format!(
            "registry {} is not allow-listed",
            image.registry
        )))
    }

    fn check_blocked_images(
        &self,
        request: &OperationRequest,
        image: &ImageRef,
    ) -> Result<(), PipelineError> {
        let pattern = {
            let config = self.config.read();
            config.blocked_images.iter().find(|b| image.contains(b.as_str())).cloned()
        };
        let Some(pattern) = pattern else {
            return Ok(());
        };

        self.audit.record(
            request.session_id.as_str(),
            request.kind.as_str(),
            "BLOCKED_IMAGE",
            Severity::High,
            format!("image {} matches blocked pattern {:?}", image.raw, pattern),
            self.reference_context(request),
        );
        Err(PipelineError::SecurityViolation(format!(
            "image {} matches blocked pattern {:?}",
            image.raw, pattern
        )))
    }

    fn reference_context(&self, request: &OperationRequest) -> HashMap<String, String> {
        let mut context = HashMap::new();
        context.insert("reference".to_string(), request.reference.clone());
        if let Some(target) = &request.target {
            context.insert("target".to_string(), target.clone());
        }
        context
    }

    /// Launch hourly housekeeping: audit prune and rate-limit prune.
    pub fn start(&self) {
        self.lifecycle.reset();
        let audit = Arc::clone(&self.audit);
        let limiter = Arc::clone(&self.limiter);
        self.lifecycle.spawn(move |scope| async move {
            let mut ticker = tokio::time::interval(HOUSEKEEPING_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // skip the immediate first tick
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = scope.cancelled() => return,
                    _ = ticker.tick() => {
                        let pruned = audit.prune();
                        let dropped = limiter.prune();
                        tracing::debug!(pruned, dropped, "gate housekeeping");
                    }
                }
            }
        });
    }

    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.lifecycle.shutdown(timeout).await
    }

    pub fn audit(&self) -> &AuditLog<C> {
        self.audit.as_ref()
    }

    pub fn metrics(&self) -> GateMetrics {
        self.audit.metrics()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
