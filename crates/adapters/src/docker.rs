// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container runtime adapter traits.
//!
//! Every method takes the caller's cancellation scope and MUST observe it:
//! a long-running registry call that outlives its job would otherwise hold a
//! concurrency permit forever. Output is the collaborator's raw text; the
//! engine wraps it into standardized operation results.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from container adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{operation} failed: {message}")]
    CommandFailed { operation: String, message: String },
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn command(operation: impl Into<String>, message: impl Into<String>) -> Self {
        AdapterError::CommandFailed { operation: operation.into(), message: message.into() }
    }
}

/// Docker-side operations: image lifecycle and scanning.
#[async_trait]
pub trait DockerAdapter: Send + Sync {
    async fn analyze(
        &self,
        scope: &CancellationToken,
        image: &str,
    ) -> Result<String, AdapterError>;

    async fn build(
        &self,
        scope: &CancellationToken,
        context_dir: &str,
        tag: &str,
    ) -> Result<String, AdapterError>;

    async fn pull(&self, scope: &CancellationToken, image: &str) -> Result<String, AdapterError>;

    async fn push(&self, scope: &CancellationToken, image: &str) -> Result<String, AdapterError>;

    async fn tag(
        &self,
        scope: &CancellationToken,
        source: &str,
        target: &str,
    ) -> Result<String, AdapterError>;

    async fn scan(&self, scope: &CancellationToken, image: &str) -> Result<String, AdapterError>;

    async fn scan_secrets(
        &self,
        scope: &CancellationToken,
        image: &str,
    ) -> Result<String, AdapterError>;
}

/// Kubernetes-side operations.
#[async_trait]
pub trait KubeAdapter: Send + Sync {
    async fn deploy(&self, scope: &CancellationToken, image: &str)
        -> Result<String, AdapterError>;
}
