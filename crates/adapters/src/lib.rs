// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dd-adapters: External-collaborator interfaces for drydock
//!
//! The core consumes Docker, Kubernetes, and the session store through the
//! traits defined here. Real implementations live with the embedder; this
//! crate ships the in-memory session store and, behind the `test-support`
//! feature, recording fakes for the container adapters.

pub mod docker;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use docker::{AdapterError, DockerAdapter, KubeAdapter};
pub use session::{MemorySessionStore, SessionStore};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{AdapterCall, FakeDockerAdapter, FakeKubeAdapter};
