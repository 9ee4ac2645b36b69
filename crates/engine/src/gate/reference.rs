// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image reference validation and registry extraction.
//!
//! The name portion must start and end with an alphanumeric character and
//! may contain only `[A-Za-z0-9._/-]` in between; an optional `:tag` suffix
//! after the last path segment is validated separately. References carrying
//! known injection patterns are rejected regardless of shape.

use dd_core::PipelineError;

pub const MAX_REFERENCE_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// Substrings that mark a reference as hostile, matched case-insensitively.
const SUSPICIOUS_PATTERNS: &[&str] =
    &["../", "\\", "<script", "javascript:", "data:", "cmd.exe", "/bin/sh", "powershell"];

/// Registry assumed when the first path segment is not a hostname.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// A validated image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// The reference as submitted
    pub raw: String,
    /// Name portion without the tag
    pub name: String,
    pub tag: Option<String>,
    /// First path segment if it looks like a hostname, else `docker.io`
    pub registry: String,
}

impl ImageRef {
    /// Case-insensitive substring match against the raw reference.
    pub fn contains(&self, needle: &str) -> bool {
        self.raw.to_lowercase().contains(&needle.to_lowercase())
    }
}

fn invalid(reference: &str, why: &str) -> PipelineError {
    PipelineError::Validation(format!("invalid image reference {:?}: {}", reference, why))
}

/// Validate a reference and extract its registry.
pub fn parse(reference: &str) -> Result<ImageRef, PipelineError> {
    if reference.is_empty() {
        return Err(invalid(reference, "empty"));
    }
    if reference.len() > MAX_REFERENCE_LEN {
        return Err(invalid(reference, "longer than 255 characters"));
    }

    let lowered = reference.to_lowercase();
    for pattern in SUSPICIOUS_PATTERNS {
        if lowered.contains(pattern) {
            return Err(invalid(reference, "contains a suspicious pattern"));
        }
    }

    // Split an optional tag: a ':' after the last path separator.
    let (name, tag) = match reference.rfind(':') {
        Some(idx) if idx > reference.rfind('/').unwrap_or(0) => {
            (&reference[..idx], Some(&reference[idx + 1..]))
        }
        _ => (reference, None),
    };

    if let Some(tag) = tag {
        if tag.is_empty() || tag.len() > MAX_TAG_LEN {
            return Err(invalid(reference, "malformed tag"));
        }
        if !tag.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
            return Err(invalid(reference, "malformed tag"));
        }
    }

    if name.len() < 2 {
        return Err(invalid(reference, "name too short"));
    }
    let first = name.chars().next().unwrap_or('\0');
    let last = name.chars().next_back().unwrap_or('\0');
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(invalid(reference, "name must start and end with an alphanumeric"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')) {
        return Err(invalid(reference, "name contains a forbidden character"));
    }

    let first_segment = name.split('/').next().unwrap_or(name);
    let registry = if first_segment.contains('.') {
        first_segment.to_string()
    } else {
        DEFAULT_REGISTRY.to_string()
    };

    Ok(ImageRef {
        raw: reference.to_string(),
        name: name.to_string(),
        tag: tag.map(str::to_string),
        registry,
    })
}

#[cfg(test)]
#[path = "reference_tests.rs"]
mod tests;
