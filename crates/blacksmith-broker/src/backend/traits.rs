// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster backend trait definitions.
//!
//! Defines the abstract interface to the orchestration backend that turns
//! rendered resource specs into running infrastructure.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::resource::{ResourceKind, ResourceRef, ResourceSpec};

/// Errors from backend operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The object does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
    },

    /// The backend could not be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request (permission denied, invalid spec).
    #[error("Backend rejected request: {0}")]
    Rejected(String),

    /// The request did not complete in time.
    #[error("Backend request timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Whether the error means the object is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Trait for cluster orchestration backends.
///
/// Backends are PURE resource clients - they do NOT touch the instance
/// registry and never retry on their own. Ordering, compensation and
/// bookkeeping belong to the caller. Request timeouts are enforced by the
/// implementation and reported as [`BackendError::Timeout`].
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Backend type identifier (e.g., "kubernetes", "mock").
    fn backend_type(&self) -> &'static str;

    /// Create the resource described by `spec` in `namespace`.
    async fn create(&self, namespace: &str, spec: &ResourceSpec) -> Result<ResourceRef>;

    /// Delete a resource.
    ///
    /// Returns [`BackendError::NotFound`] when the object is already absent;
    /// callers that delete idempotently treat that as success.
    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<()>;
}
