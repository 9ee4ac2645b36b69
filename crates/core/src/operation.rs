// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation kinds, requests, and standardized results.
//!
//! An operation is a domain call (pull/push/tag/build/scan/deploy) executed
//! under admission. Job submissions name operations by their string kind;
//! the dispatcher resolves them through [`OperationKind`].

use crate::error::PipelineError;
use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// The pipeline operations drydock orchestrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Analysis,
    Build,
    Push,
    Pull,
    Tag,
    Deploy,
    Scan,
    ScanSecrets,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Analysis => "analysis",
            OperationKind::Build => "build",
            OperationKind::Push => "push",
            OperationKind::Pull => "pull",
            OperationKind::Tag => "tag",
            OperationKind::Deploy => "deploy",
            OperationKind::Scan => "scan",
            OperationKind::ScanSecrets => "scan_secrets",
        }
    }

    /// Read-heavy operations consult the result cache before calling out.
    pub fn is_read_heavy(self) -> bool {
        matches!(self, OperationKind::Analysis | OperationKind::Scan | OperationKind::ScanSecrets)
    }
}

crate::simple_display! {
    OperationKind {
        Analysis => "analysis",
        Build => "build",
        Push => "push",
        Pull => "pull",
        Tag => "tag",
        Deploy => "deploy",
        Scan => "scan",
        ScanSecrets => "scan_secrets",
    }
}

impl FromStr for OperationKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(OperationKind::Analysis),
            "build" => Ok(OperationKind::Build),
            "push" => Ok(OperationKind::Push),
            "pull" => Ok(OperationKind::Pull),
            "tag" => Ok(OperationKind::Tag),
            "deploy" => Ok(OperationKind::Deploy),
            "scan" => Ok(OperationKind::Scan),
            "scan_secrets" => Ok(OperationKind::ScanSecrets),
            other => Err(PipelineError::Validation(format!("unknown job type: {}", other))),
        }
    }
}

/// A request to run one operation under admission.
///
/// `reference` is the primary image reference; `target` only applies to tag
/// operations and `context_dir` to builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub session_id: SessionId,
    pub kind: OperationKind,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationRequest {
    pub fn new(
        session_id: impl Into<SessionId>,
        kind: OperationKind,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            reference: reference.into(),
            target: None,
            context_dir: None,
            dry_run: false,
        }
    }

    crate::setters! {
        set { dry_run: bool }
        option { target: String, context_dir: String }
    }

    /// Build a request from a job's parameter map.
    ///
    /// Every job carries `session_id`. The reference key depends on the kind:
    /// tag reads `source`/`target`, build reads `tag` (+ optional `context`),
    /// everything else reads `image`.
    pub fn from_parameters(
        kind: OperationKind,
        parameters: &HashMap<String, Value>,
    ) -> Result<Self, PipelineError> {
        let session_id = require_str(parameters, "session_id")?;

        let mut request = match kind {
            OperationKind::Tag => {
                let source = require_str(parameters, "source")?;
                let target = require_str(parameters, "target")?;
                Self::new(session_id, kind, source).target(target)
            }
            OperationKind::Build => {
                let tag = require_str(parameters, "tag")?;
                let mut req = Self::new(session_id, kind, tag);
                if let Some(context) = optional_str(parameters, "context") {
                    req = req.context_dir(context);
                }
                req
            }
            _ => {
                let image = require_str(parameters, "image")?;
                Self::new(session_id, kind, image)
            }
        };

        request.dry_run =
            parameters.get("dry_run").and_then(Value::as_bool).unwrap_or(false);
        Ok(request)
    }
}

fn require_str(parameters: &HashMap<String, Value>, key: &str) -> Result<String, PipelineError> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Validation(format!("missing parameter: {}", key)))
}

fn optional_str(parameters: &HashMap<String, Value>, key: &str) -> Option<String> {
    parameters.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Standardized result of an operation run through the atomic-op wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub session_id: SessionId,
    pub operation: OperationKind,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn success(
        request: &OperationRequest,
        output: impl Into<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            success: true,
            session_id: request.session_id.clone(),
            operation: request.kind,
            duration_ms,
            output: Some(output.into()),
            error: None,
            metadata: HashMap::new(),
            timestamp,
        }
    }

    pub fn failure(
        request: &OperationRequest,
        error: impl Into<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            session_id: request.session_id.clone(),
            operation: request.kind,
            duration_ms,
            output: None,
            error: Some(error.into()),
            metadata: HashMap::new(),
            timestamp,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
