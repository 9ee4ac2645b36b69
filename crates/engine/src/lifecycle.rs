// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervised-task lifecycle primitive.
//!
//! Each runtime component owns one [`Lifecycle`]: tasks spawned through it
//! share a cancellation scope and are joined on shutdown with a bounded
//! wait. A component's shutdown therefore never reaches into another
//! component's tasks.

use dd_core::PipelineError;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct Shared {
    scope: CancellationToken,
    tracker: TaskTracker,
}

impl Shared {
    fn new() -> Self {
        Self { scope: CancellationToken::new(), tracker: TaskTracker::new() }
    }
}

pub struct Lifecycle {
    shared: Mutex<Shared>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { shared: Mutex::new(Shared::new()) }
    }

    /// A child of the shared scope. Cancelling the child does not affect
    /// siblings; shutdown cancels all children.
    pub fn child_scope(&self) -> CancellationToken {
        self.shared.lock().scope.child_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().scope.is_cancelled()
    }

    /// Spawn a tracked task. The closure receives its own child scope and
    /// returns when the scope is cancelled or it chooses to.
    pub fn spawn<F, Fut>(&self, f: F) -> JoinHandle<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = self.shared.lock();
        let scope = shared.scope.child_token();
        shared.tracker.spawn(f(scope))
    }

    /// Spawn a tracked task whose scope the caller manages.
    pub fn spawn_task<Fut>(&self, fut: Fut) -> JoinHandle<()>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shared.lock().tracker.spawn(fut)
    }

    /// Cancel the scope and wait for all tracked tasks up to `timeout`.
    ///
    /// Tasks that fail to join in time are left running detached; the error
    /// reports the bound that was exceeded.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        let (scope, tracker) = {
            let shared = self.shared.lock();
            (shared.scope.clone(), shared.tracker.clone())
        };
        scope.cancel();
        tracker.close();
        tokio::time::timeout(timeout, tracker.wait())
            .await
            .map_err(|_| PipelineError::timeout("task join", timeout))
    }

    /// Re-arm with a fresh scope and tracker so the owning component can be
    /// started again after a shutdown.
    pub fn reset(&self) {
        *self.shared.lock() = Shared::new();
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
