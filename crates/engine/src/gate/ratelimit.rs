// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session rate limiting over a sliding one-minute window.

use dd_core::{Clock, PipelineError, SessionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Window width. The counter resets on the first request after the window
/// has elapsed.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
    blocked: bool,
}

pub struct RateLimiter<C: Clock> {
    limit: Mutex<u32>,
    entries: Mutex<HashMap<SessionId, RateLimitEntry>>,
    clock: C,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(limit: u32, clock: C) -> Self {
        Self { limit: Mutex::new(limit), entries: Mutex::new(HashMap::new()), clock }
    }

    pub fn set_limit(&self, limit: u32) {
        *self.limit.lock() = limit;
    }

    /// Count one request for the session. Exactly `limit` requests succeed
    /// per window; the next is rejected.
    pub fn check(&self, session_id: &SessionId) -> Result<(), PipelineError> {
        let limit = *self.limit.lock();
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(session_id.clone()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
            blocked: false,
        });

        if now.duration_since(entry.window_start) > RATE_WINDOW {
            entry.count = 0;
            entry.window_start = now;
            entry.blocked = false;
        }

        entry.count += 1;
        if entry.count > limit {
            entry.blocked = true;
            return Err(PipelineError::RateLimited { session_id: session_id.0.clone() });
        }
        Ok(())
    }

    /// Whether the session is currently marked blocked.
    pub fn is_blocked(&self, session_id: &SessionId) -> bool {
        self.entries.lock().get(session_id).is_some_and(|e| e.blocked)
    }

    /// Drop entries whose window has long expired. Returns how many were
    /// removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.window_start) <= RATE_WINDOW * 2);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
