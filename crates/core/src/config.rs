// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline configuration.
//!
//! One flat configuration with nested cache and security tables. Every field
//! has a default, so partial TOML files parse. Durations are human strings
//! ("100ms", "30s", "10m", "1h") in serialized form.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parse a duration string like "250ms", "30s", "5m", "1h" into a Duration.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the numeric prefix
    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, ""));

    let num: u64 = num_str.parse().map_err(|_| format!("invalid number in duration: {}", s))?;

    let multiplier = match suffix.trim() {
        "ms" | "millis" | "millisecond" | "milliseconds" => {
            return Ok(Duration::from_millis(num));
        }
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(format!("unknown duration suffix: {}", other)),
    };

    Ok(Duration::from_secs(num * multiplier))
}

/// Format a duration back into the most compact suffix form.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    if ms % 1000 != 0 {
        return format!("{}ms", ms);
    }
    let secs = d.as_secs();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Serde adapter serializing `Duration` fields as duration strings.
mod duration_str {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of consumer tasks pulling from the job queue
    pub worker_pool_size: usize,
    /// Semaphore capacity bounding concurrent side-effectful operations
    pub max_concurrent_jobs: usize,
    /// Capacity of the bounded submit channel
    pub job_queue_size: usize,
    /// Per-job deadline for pull and other default-deadline kinds
    #[serde(with = "duration_str")]
    pub job_timeout: Duration,
    /// How long terminal job records stay visible to lookups
    #[serde(with = "duration_str")]
    pub job_retention: Duration,
    /// Health poll interval
    #[serde(with = "duration_str")]
    pub health_check_period: Duration,
    /// Graceful join bound for component shutdown
    #[serde(with = "duration_str")]
    pub shutdown_timeout: Duration,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 5,
            max_concurrent_jobs: 10,
            job_queue_size: 100,
            job_timeout: Duration::from_secs(10 * 60),
            job_retention: Duration::from_secs(60 * 60),
            health_check_period: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from TOML, applying defaults for absent fields.
    pub fn from_toml(s: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = toml::from_str(s)
            .map_err(|e| PipelineError::Validation(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.worker_pool_size == 0 {
            return Err(PipelineError::Validation("worker_pool_size must be > 0".to_string()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(PipelineError::Validation("max_concurrent_jobs must be > 0".to_string()));
        }
        if self.job_queue_size == 0 {
            return Err(PipelineError::Validation("job_queue_size must be > 0".to_string()));
        }
        self.cache.validate()?;
        Ok(())
    }
}

/// Result cache sizing and policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_bytes: u64,
    pub max_entries: usize,
    #[serde(with = "duration_str")]
    pub default_ttl: Duration,
    #[serde(with = "duration_str")]
    pub cleanup_interval: Duration,
    /// Only "lru" is defined; the key exists for forward compatibility.
    pub eviction_policy: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024 * 1024,
            max_entries: 10_000,
            default_ttl: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            eviction_policy: "lru".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_entries == 0 {
            return Err(PipelineError::Validation("cache.max_entries must be > 0".to_string()));
        }
        if self.eviction_policy != "lru" {
            return Err(PipelineError::Validation(format!(
                "unknown cache eviction policy: {}",
                self.eviction_policy
            )));
        }
        Ok(())
    }
}

/// Admission settings for the security gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub rate_limit_per_minute: u32,
    #[serde(with = "duration_str")]
    pub max_session_duration: Duration,
    /// When nonempty, pull/push references must resolve to one of these registries
    pub allowed_registries: Vec<String>,
    /// References containing any of these substrings are rejected
    pub blocked_images: Vec<String>,
    pub enable_audit: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            max_session_duration: Duration::from_secs(24 * 60 * 60),
            allowed_registries: Vec::new(),
            blocked_images: Vec::new(),
            enable_audit: true,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
