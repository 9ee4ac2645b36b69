// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recording fake adapters for tests.
//!
//! Fakes record every call, answer with a canned output line, and can be
//! scripted to fail, delay, or both. A delayed call observes the caller's
//! scope, so cancellation and timeout paths are exercisable.

use crate::docker::{AdapterError, DockerAdapter, KubeAdapter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One recorded adapter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterCall {
    pub operation: String,
    pub reference: String,
    pub target: Option<String>,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<AdapterCall>,
    fail_message: Option<String>,
    delay: Option<Duration>,
}

impl FakeState {
    async fn invoke(
        state: &Mutex<FakeState>,
        scope: &CancellationToken,
        operation: &str,
        reference: &str,
        target: Option<&str>,
    ) -> Result<String, AdapterError> {
        let (delay, failure) = {
            let mut guard = state.lock();
            guard.calls.push(AdapterCall {
                operation: operation.to_string(),
                reference: reference.to_string(),
                target: target.map(str::to_string),
            });
            (guard.delay, guard.fail_message.clone())
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = scope.cancelled() => return Err(AdapterError::Cancelled),
            }
        }
        if scope.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }

        match failure {
            Some(message) => Err(AdapterError::command(operation, message)),
            None => Ok(format!("{} ok: {}", operation, reference)),
        }
    }
}

/// Fake Docker collaborator.
#[derive(Default)]
pub struct FakeDockerAdapter {
    state: Mutex<FakeState>,
}

impl FakeDockerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with this message.
    pub fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().fail_message = Some(message.into());
    }

    /// Clear a scripted failure.
    pub fn succeed(&self) {
        self.state.lock().fail_message = None;
    }

    /// Delay every subsequent call, observing the caller's scope.
    pub fn delay_for(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }
}

#[async_trait]
impl DockerAdapter for FakeDockerAdapter {
    async fn analyze(
        &self,
        scope: &CancellationToken,
        image: &str,
    ) -> Result<String, AdapterError> {
        FakeState::invoke(&self.state, scope, "analyze", image, None).await
    }

    async fn build(
        &self,
        scope: &CancellationToken,
        context_dir: &str,
        tag: &str,
    ) -> Result<String, AdapterError> {
        FakeState::invoke(&self.state, scope, "build", tag, Some(context_dir)).await
    }

    async fn pull(&self, scope: &CancellationToken, image: &str) -> Result<String, AdapterError> {
        FakeState::invoke(&self.state, scope, "pull", image, None).await
    }

    async fn push(&self, scope: &CancellationToken, image: &str) -> Result<String, AdapterError> {
        FakeState::invoke(&self.state, scope, "push", image, None).await
    }

    async fn tag(
        &self,
        scope: &CancellationToken,
        source: &str,
        target: &str,
    ) -> Result<String, AdapterError> {
        FakeState::invoke(&self.state, scope, "tag", source, Some(target)).await
    }

    async fn scan(&self, scope: &CancellationToken, image: &str) -> Result<String, AdapterError> {
        FakeState::invoke(&self.state, scope, "scan", image, None).await
    }

    async fn scan_secrets(
        &self,
        scope: &CancellationToken,
        image: &str,
    ) -> Result<String, AdapterError> {
        FakeState::invoke(&self.state, scope, "scan_secrets", image, None).await
    }
}

/// Fake Kubernetes collaborator.
#[derive(Default)]
pub struct FakeKubeAdapter {
    state: Mutex<FakeState>,
}

impl FakeKubeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().fail_message = Some(message.into());
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl KubeAdapter for FakeKubeAdapter {
    async fn deploy(
        &self,
        scope: &CancellationToken,
        image: &str,
    ) -> Result<String, AdapterError> {
        FakeState::invoke(&self.state, scope, "deploy", image, None).await
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
