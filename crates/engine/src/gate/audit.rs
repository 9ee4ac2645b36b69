// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit log with bounded retention.
//!
//! Events append under a dedicated lock in real-time order; metrics live
//! under their own lock so counters never contend with appends. HIGH
//! severity events are additionally surfaced through the structured logger.

use chrono::{DateTime, Utc};
use dd_core::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Events older than this are dropped by the pruner.
pub const AUDIT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    High,
}

dd_core::simple_display! {
    Severity {
        Info => "INFO",
        Warn => "WARN",
        High => "HIGH",
    }
}

/// One admission decision or operation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// 32 hex chars from 16 random bytes
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub operation: String,
    pub event_type: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Aggregate counters over everything ever recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateMetrics {
    pub total_events: u64,
    /// Events recorded at HIGH severity
    pub security_violations: u64,
    /// Events whose type names a block or rate-limit decision
    pub blocked_operations: u64,
    pub rate_limit_hits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_timestamp: Option<DateTime<Utc>>,
}

pub struct AuditLog<C: Clock> {
    enabled: AtomicBool,
    events: Mutex<Vec<SecurityEvent>>,
    metrics: Mutex<GateMetrics>,
    clock: C,
}

impl<C: Clock> AuditLog<C> {
    pub fn new(enabled: bool, clock: C) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            events: Mutex::new(Vec::new()),
            metrics: Mutex::new(GateMetrics::default()),
            clock,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Record one event. Metrics are counted even when storage is disabled.
    pub fn record(
        &self,
        session_id: &str,
        operation: &str,
        event_type: &str,
        severity: Severity,
        description: impl Into<String>,
        context: HashMap<String, String>,
    ) {
        let description = description.into();
        let timestamp = self.clock.now_utc();

        {
            let mut metrics = self.metrics.lock();
            metrics.total_events += 1;
            metrics.last_event_timestamp = Some(timestamp);
            if severity == Severity::High {
                metrics.security_violations += 1;
            }
            if event_type.contains("BLOCKED") || event_type.contains("RATE_LIMIT") {
                metrics.blocked_operations += 1;
            }
            if event_type == "RATE_LIMIT_EXCEEDED" {
                metrics.rate_limit_hits += 1;
            }
        }

        if severity == Severity::High {
            tracing::warn!(
                session = session_id,
                operation,
                event_type,
                description = description.as_str(),
                "security event"
            );
        }

        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }

        let event = SecurityEvent {
            id: Uuid::new_v4().simple().to_string(),
            timestamp,
            session_id: session_id.to_string(),
            operation: operation.to_string(),
            event_type: event_type.to_string(),
            severity,
            description,
            context,
        };
        self.events.lock().push(event);
    }

    /// Drop events older than the retention window. Returns how many were
    /// removed.
    pub fn prune(&self) -> usize {
        let cutoff = self.clock.now_utc()
            - chrono::TimeDelta::from_std(AUDIT_RETENTION).unwrap_or(chrono::TimeDelta::zero());
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.timestamp > cutoff);
        before - events.len()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }

    pub fn count_of_type(&self, event_type: &str) -> usize {
        self.events.lock().iter().filter(|e| e.event_type == event_type).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn metrics(&self) -> GateMetrics {
        self.metrics.lock().clone()
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
