// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TTL + LRU + byte-capacity result cache.
//!
//! Entries and the byte tally live under one mutex; metrics live under a
//! second so hot-path lookups never contend with metric readers. Neither
//! lock is held across external calls. Expired entries count as misses
//! immediately and are physically removed by the background sweeper.

use crate::lifecycle::Lifecycle;
use dd_core::{CacheConfig, Clock, PipelineError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Size charged for values that are not strings. A placeholder estimate;
/// the capacity invariant only requires a consistent sizer.
const NON_STRING_SIZE: u64 = 256;

/// Byte overhead charged per entry on top of the payload length.
const ENTRY_OVERHEAD: u64 = 64;

fn estimate_size(value: &Value) -> u64 {
    match value {
        Value::String(s) => s.len() as u64 + ENTRY_OVERHEAD,
        _ => NON_STRING_SIZE,
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    size: u64,
    created_at: Instant,
    last_access: Instant,
    access_count: u64,
    ttl: Duration,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) < self.ttl
    }
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, CacheEntry>,
    bytes: u64,
}

impl Store {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.bytes -= entry.size;
        Some(entry)
    }

    /// Remove the least-recently-accessed entry. Returns false when empty.
    fn evict_lru(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                self.remove(&key);
                true
            }
            None => false,
        }
    }
}

/// Cache counters, kept under their own lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Cumulative lookup latency, microseconds
    pub lookup_micros: u64,
}

struct Shared<C: Clock> {
    config: Mutex<CacheConfig>,
    store: Mutex<Store>,
    metrics: Mutex<CacheMetrics>,
    clock: C,
}

/// Shared in-memory cache for read-heavy operation results.
pub struct ResultCache<C: Clock> {
    shared: Arc<Shared<C>>,
    lifecycle: Lifecycle,
}

impl<C: Clock> std::fmt::Debug for ResultCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache").finish_non_exhaustive()
    }
}

impl<C: Clock> ResultCache<C> {
    /// Rejects unknown eviction policies up front.
    pub fn new(config: CacheConfig, clock: C) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config: Mutex::new(config),
                store: Mutex::new(Store::default()),
                metrics: Mutex::new(CacheMetrics::default()),
                clock,
            }),
            lifecycle: Lifecycle::new(),
        })
    }

    /// Replace the configuration. Tighter bounds apply on subsequent inserts.
    pub fn reconfigure(&self, config: CacheConfig) -> Result<(), PipelineError> {
        config.validate()?;
        *self.shared.config.lock() = config;
        Ok(())
    }

    /// Look up a key. A hit refreshes recency and bumps the access count.
    pub fn get(&self, key: &str) -> Option<Value> {
        let shared = &self.shared;
        let started = shared.clock.now();
        let hit = {
            let mut store = shared.store.lock();
            let now = shared.clock.now();
            match store.entries.get_mut(key) {
                Some(entry) if entry.is_valid(now) => {
                    entry.last_access = now;
                    entry.access_count += 1;
                    Some(entry.value.clone())
                }
                _ => None,
            }
        };

        let elapsed = shared.clock.now().duration_since(started);
        let mut metrics = shared.metrics.lock();
        metrics.lookup_micros += elapsed.as_micros() as u64;
        match hit.is_some() {
            true => metrics.hits += 1,
            false => metrics.misses += 1,
        }
        hit
    }

    /// Insert a value. `ttl: None` (or zero) uses the configured default.
    /// Values larger than the byte capacity are rejected outright.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), PipelineError> {
        let shared = &self.shared;
        let (max_bytes, max_entries, default_ttl) = {
            let config = shared.config.lock();
            (config.max_bytes, config.max_entries, config.default_ttl)
        };
        let ttl = match ttl {
            Some(d) if !d.is_zero() => d,
            _ => default_ttl,
        };
        let size = estimate_size(&value);
        if size > max_bytes {
            return Err(PipelineError::Validation(format!(
                "value of {} bytes exceeds cache capacity of {} bytes",
                size, max_bytes
            )));
        }

        let now = shared.clock.now();
        let mut evictions = 0u64;
        {
            let mut store = shared.store.lock();
            store.remove(key);
            while store.entries.len() >= max_entries && store.evict_lru() {
                evictions += 1;
            }
            while store.bytes + size > max_bytes && store.evict_lru() {
                evictions += 1;
            }
            store.bytes += size;
            store.entries.insert(
                key.to_string(),
                CacheEntry { value, size, created_at: now, last_access: now, access_count: 0, ttl },
            );
        }

        if evictions > 0 {
            shared.metrics.lock().evictions += evictions;
        }
        Ok(())
    }

    pub fn delete(&self, key: &str) -> bool {
        self.shared.store.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut store = self.shared.store.lock();
        store.entries.clear();
        store.bytes = 0;
    }

    /// Keys of entries that are still within their TTL.
    pub fn keys(&self) -> Vec<String> {
        let store = self.shared.store.lock();
        let now = self.shared.clock.now();
        store
            .entries
            .iter()
            .filter(|(_, e)| e.is_valid(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Count of entries that are still within their TTL.
    pub fn len(&self) -> usize {
        let store = self.shared.store.lock();
        let now = self.shared.clock.now();
        store.entries.values().filter(|e| e.is_valid(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.shared.store.lock().bytes
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.shared.metrics.lock().clone()
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    /// Launch the background expiry sweeper.
    pub fn start(&self) {
        self.lifecycle.reset();
        let interval = self.shared.config.lock().cleanup_interval;
        let shared = Arc::clone(&self.shared);
        self.lifecycle.spawn(move |scope| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = scope.cancelled() => return,
                    _ = ticker.tick() => {
                        shared.sweep();
                    }
                }
            }
        });
    }

    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.lifecycle.shutdown(timeout).await
    }
}

impl<C: Clock> Shared<C> {
    fn sweep(&self) -> usize {
        let expired: Vec<String> = {
            let store = self.store.lock();
            let now = self.clock.now();
            store
                .entries
                .iter()
                .filter(|(_, e)| !e.is_valid(now))
                .map(|(k, _)| k.clone())
                .collect()
        };
        if expired.is_empty() {
            return 0;
        }
        let mut store = self.store.lock();
        let now = self.clock.now();
        let mut dropped = 0;
        for key in expired {
            // revalidate: a concurrent set may have replaced the entry
            if store.entries.get(&key).is_some_and(|e| !e.is_valid(now)) {
                store.remove(&key);
                dropped += 1;
            }
        }
        drop(store);
        self.metrics.lock().expirations += dropped as u64;
        tracing::debug!(dropped, "cache sweep");
        dropped
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
