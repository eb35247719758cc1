// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ordered resource creation and teardown with saga compensation.
//!
//! Creation runs credentials → workload → endpoint. When step *k* fails, every
//! resource from steps `1..k-1` is deleted again, last created first, before
//! the failure is returned. The failure always carries the error of step *k*;
//! compensation problems travel next to it as [`CompensationFailed`] entries.
//!
//! Teardown runs endpoint → workload → credentials and treats objects that
//! are already gone as deleted.

use std::cmp::Reverse;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, ClusterBackend};
use crate::error::BrokerError;
use crate::registry::InstanceKey;
use crate::resource::{RenderedResources, ResourceRef};

/// A compensating delete that did not go through.
#[derive(Debug, Error)]
#[error("Compensating delete of {resource} failed: {source}")]
pub struct CompensationFailed {
    /// The resource that is still present.
    pub resource: ResourceRef,
    /// Why the delete failed.
    pub source: BackendError,
}

/// Outcome of a failed or cancelled creation run.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SagaFailure {
    /// The error that stopped the run.
    pub error: BrokerError,
    /// Compensating deletes that failed.
    pub compensation_failures: Vec<CompensationFailed>,
    /// Resources still present after compensation, in creation order.
    pub residual: Vec<ResourceRef>,
}

impl SagaFailure {
    /// Whether compensation removed everything that was created.
    pub fn is_clean(&self) -> bool {
        self.residual.is_empty()
    }
}

/// Outcome of a teardown run stopped by a fatal delete error.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DeletionFailure {
    /// The delete error.
    pub error: BrokerError,
    /// Resources that may still exist, in creation order.
    pub remaining: Vec<ResourceRef>,
}

/// Drives ordered create/delete calls against a [`ClusterBackend`].
pub struct ResourceProvisioner {
    backend: Arc<dyn ClusterBackend>,
    namespace: String,
}

impl ResourceProvisioner {
    /// Create a provisioner that places resources in `namespace`.
    pub fn new(backend: Arc<dyn ClusterBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Namespace resources are created in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create all three resources in order.
    ///
    /// `cancel` is checked before every create and once more after the last
    /// one; a cancelled run compensates and fails with
    /// [`BrokerError::Cancelled`]. Calls already issued are never aborted.
    pub async fn create_ordered(
        &self,
        instance: &InstanceKey,
        resources: &RenderedResources,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceRef>, SagaFailure> {
        let mut created = Vec::with_capacity(3);

        for spec in resources.in_creation_order() {
            if cancel.is_cancelled() {
                info!(instance = %instance, created = created.len(), "Provisioning cancelled, compensating");
                return Err(self.compensate(instance, cancelled(instance), created).await);
            }

            match self.backend.create(&self.namespace, spec).await {
                Ok(resource) => {
                    debug!(instance = %instance, resource = %resource, "Created resource");
                    created.push(resource);
                }
                Err(e) => {
                    error!(
                        instance = %instance,
                        kind = %spec.kind(),
                        name = %spec.name(),
                        error = %e,
                        "Resource creation failed, compensating"
                    );
                    return Err(self.compensate(instance, e.into(), created).await);
                }
            }
        }

        if cancel.is_cancelled() {
            info!(instance = %instance, "Provisioning cancelled after creation, compensating");
            return Err(self.compensate(instance, cancelled(instance), created).await);
        }

        Ok(created)
    }

    /// Delete `created` in reverse order, collecting failures next to `error`.
    async fn compensate(
        &self,
        instance: &InstanceKey,
        error: BrokerError,
        created: Vec<ResourceRef>,
    ) -> SagaFailure {
        let mut compensation_failures = Vec::new();
        let mut residual = Vec::new();

        for resource in created.into_iter().rev() {
            match self
                .backend
                .delete(&resource.namespace, resource.kind, &resource.name)
                .await
            {
                Ok(()) => {
                    debug!(instance = %instance, resource = %resource, "Compensated resource");
                }
                Err(e) if e.is_not_found() => {
                    warn!(instance = %instance, resource = %resource, "Resource already absent during compensation");
                }
                Err(e) => {
                    let failure = CompensationFailed {
                        resource: resource.clone(),
                        source: e,
                    };
                    warn!(instance = %instance, error = %failure, "Compensation failed");
                    residual.push(resource);
                    compensation_failures.push(failure);
                }
            }
        }

        residual.reverse();
        SagaFailure {
            error,
            compensation_failures,
            residual,
        }
    }

    /// Delete `resources` endpoint first, credentials last, whatever order
    /// they are passed in.
    ///
    /// Absent objects count as deleted. The first other error stops the run;
    /// the failed resource and the ones not yet attempted are returned as
    /// `remaining`.
    pub async fn delete_ordered(
        &self,
        instance: &InstanceKey,
        resources: &[ResourceRef],
    ) -> Result<(), DeletionFailure> {
        let mut ordered: Vec<&ResourceRef> = resources.iter().collect();
        ordered.sort_by_key(|r| Reverse(r.kind.creation_rank()));

        for (i, resource) in ordered.iter().enumerate() {
            match self
                .backend
                .delete(&resource.namespace, resource.kind, &resource.name)
                .await
            {
                Ok(()) => {
                    debug!(instance = %instance, resource = %resource, "Deleted resource");
                }
                Err(e) if e.is_not_found() => {
                    warn!(instance = %instance, resource = %resource, "Resource already absent, treating as deleted");
                }
                Err(e) => {
                    error!(instance = %instance, resource = %resource, error = %e, "Resource deletion failed");
                    let mut remaining: Vec<ResourceRef> =
                        ordered[i..].iter().map(|r| (*r).clone()).collect();
                    remaining.sort_by_key(|r| r.kind.creation_rank());
                    return Err(DeletionFailure {
                        error: e.into(),
                        remaining,
                    });
                }
            }
        }

        Ok(())
    }
}

fn cancelled(instance: &InstanceKey) -> BrokerError {
    BrokerError::Cancelled {
        instance_id: instance.instance_id.clone(),
    }
}
