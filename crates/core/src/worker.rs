// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker capability trait, state machine, and health records.
//!
//! A worker is a registered recurring task owned by the worker manager after
//! registration. The capability set is deliberately small: start under a
//! cancellation scope, stop, and report a point-in-time health sample. Worker
//! variants are enumerated by name, not by a class hierarchy.

use crate::error::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a registered worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Create a new WorkerId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value of this WorkerId.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for WorkerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for WorkerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Borrow<str> for WorkerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a registered worker.
///
/// Transitions follow Stopped → Starting → Running → Stopping → Stopped,
/// with Failed reachable from any non-terminal state. Restarting a Failed
/// worker is caller-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl WorkerState {
    /// Whether a start may be issued from this state.
    pub fn can_start(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }

    /// Whether the worker currently has a live supervising task.
    pub fn is_active(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running | WorkerState::Stopping)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        match (self, next) {
            (WorkerState::Stopped, WorkerState::Starting) => true,
            (WorkerState::Failed, WorkerState::Starting) => true,
            (WorkerState::Starting, WorkerState::Running) => true,
            (WorkerState::Running, WorkerState::Stopping) => true,
            (WorkerState::Stopping, WorkerState::Stopped) => true,
            (from, WorkerState::Failed) => from.is_active(),
            _ => false,
        }
    }
}

crate::simple_display! {
    WorkerState {
        Stopped => "stopped",
        Starting => "starting",
        Running => "running",
        Stopping => "stopping",
        Failed => "failed",
    }
}

/// Health classification of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Failed,
}

crate::simple_display! {
    HealthState {
        Healthy => "healthy",
        Unhealthy => "unhealthy",
        Failed => "failed",
    }
}

/// A sampled health record for one worker.
///
/// Workers fill in status, error, counters, and metrics; the manager stamps
/// `last_check` and `uptime` when it stores or synthesizes a sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub status: HealthState,
    pub last_check: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub uptime: Duration,
    pub tasks_total: u64,
    pub tasks_failed: u64,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl WorkerHealth {
    pub fn new(status: HealthState) -> Self {
        Self {
            status,
            last_check: DateTime::UNIX_EPOCH,
            error: None,
            uptime: Duration::ZERO,
            tasks_total: 0,
            tasks_failed: 0,
            metrics: HashMap::new(),
        }
    }

    /// A failed sample carrying the failure message.
    pub fn failed(error: impl Into<String>) -> Self {
        let mut health = Self::new(HealthState::Failed);
        health.error = Some(error.into());
        health
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// The worker capability set.
///
/// `start` runs the worker body and returns when the scope is cancelled or
/// the body chooses to finish; errors transition the worker to Failed with no
/// retry. `sample_health` must be cheap and lock-free from the caller's
/// perspective: it is invoked by the health poller outside the manager lock.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, scope: CancellationToken) -> Result<(), PipelineError>;

    async fn stop(&self) -> Result<(), PipelineError>;

    fn sample_health(&self) -> WorkerHealth;
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
