// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for blacksmith-broker.
//!
//! [`BrokerError`] is the single error type surfaced to the broker protocol
//! adapter. Component errors ([`BackendError`], [`TemplateError`],
//! [`CredentialError`]) convert into it so every failure maps to exactly one
//! error kind with a stable [`error_code`](BrokerError::error_code).
//!
//! Messages never contain credential values.

use thiserror::Error;

use crate::backend::BackendError;
use crate::credentials::CredentialError;
use crate::registry::InstanceStatus;
use crate::resource::ResourceKind;
use crate::template::TemplateError;

/// Broker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BrokerError {
    /// A service or instance identifier cannot be turned into a backend name.
    #[error("Invalid {field} '{value}': {reason}")]
    InvalidIdentifier {
        /// Which identifier was rejected (`service_id`, `instance_id`, `resource_name`).
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No template is registered for this service and resource kind.
    #[error("No {kind} template registered for service '{service_id}'")]
    TemplateNotFound {
        /// Service the template was looked up for.
        service_id: String,
        /// Resource kind the template was looked up for.
        kind: ResourceKind,
    },

    /// A template failed to render or rendered an incomplete resource.
    #[error("Invalid {kind} template for service '{service_id}': {reason}")]
    TemplateInvalid {
        /// Service the template belongs to.
        service_id: String,
        /// Resource kind the template renders.
        kind: ResourceKind,
        /// What was wrong with the rendered output.
        reason: String,
    },

    /// The entropy source could not produce credentials. Safe to retry.
    #[error("Credential generation failed: {0}")]
    Generation(String),

    /// A credential policy cannot be satisfied.
    #[error("Invalid credential policy for field '{field}': {reason}")]
    InvalidCredentialPolicy {
        /// Credential field the policy belongs to.
        field: String,
        /// Why the policy is unsatisfiable.
        reason: String,
    },

    /// The requested service is not in the catalog.
    #[error("Service '{0}' not found in catalog")]
    ServiceNotFound(String),

    /// The requested plan is not offered by the service.
    #[error("Plan '{plan_id}' not found for service '{service_id}'")]
    PlanNotFound {
        /// Service the plan was looked up in.
        service_id: String,
        /// The plan that was not found.
        plan_id: String,
    },

    /// A registry record or resource name is already taken.
    #[error("Resource name '{resource_name}' is already owned by instance '{owner}'")]
    AlreadyExists {
        /// The contested resource name.
        resource_name: String,
        /// Instance id of the current owner.
        owner: String,
    },

    /// The instance exists with a different plan or different parameters.
    #[error("Instance '{instance_id}' of service '{service_id}' already exists with different parameters")]
    ConflictingInstance {
        /// Service id.
        service_id: String,
        /// Instance id.
        instance_id: String,
    },

    /// The instance is not registered.
    #[error("Instance '{instance_id}' of service '{service_id}' not found")]
    InstanceNotFound {
        /// Service id.
        service_id: String,
        /// Instance id.
        instance_id: String,
    },

    /// The instance exists but its status does not allow the operation.
    #[error("Cannot {operation} instance '{instance_id}' while it is {status}")]
    InvalidInstanceState {
        /// Instance id.
        instance_id: String,
        /// Current status of the instance.
        status: InstanceStatus,
        /// The operation that was refused.
        operation: &'static str,
    },

    /// The cluster backend could not be reached or timed out. Safe to retry.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The cluster backend refused the request.
    #[error("Backend rejected request: {0}")]
    BackendRejected(String),

    /// The request was cancelled before the instance was committed.
    #[error("Operation on instance '{instance_id}' was cancelled")]
    Cancelled {
        /// Instance id.
        instance_id: String,
    },

    /// Registry persistence failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl BrokerError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            Self::TemplateNotFound { .. } => "TEMPLATE_NOT_FOUND",
            Self::TemplateInvalid { .. } => "TEMPLATE_INVALID",
            Self::Generation(_) => "GENERATION_ERROR",
            Self::InvalidCredentialPolicy { .. } => "INVALID_CREDENTIAL_POLICY",
            Self::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            Self::PlanNotFound { .. } => "PLAN_NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::ConflictingInstance { .. } => "CONFLICTING_INSTANCE",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::InvalidInstanceState { .. } => "INVALID_INSTANCE_STATE",
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::BackendRejected(_) => "BACKEND_REJECTED",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Generation(_)
                | Self::BackendUnavailable(_)
                | Self::BackendRejected(_)
                | Self::Cancelled { .. }
                | Self::Persistence(_)
        )
    }

    /// Whether the error was caused by the request rather than the broker.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. }
                | Self::ServiceNotFound(_)
                | Self::PlanNotFound { .. }
                | Self::AlreadyExists { .. }
                | Self::ConflictingInstance { .. }
                | Self::InstanceNotFound { .. }
                | Self::InvalidInstanceState { .. }
        )
    }
}

impl From<BackendError> for BrokerError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => Self::BackendUnavailable(msg),
            BackendError::Timeout(after) => {
                Self::BackendUnavailable(format!("request timed out after {:?}", after))
            }
            BackendError::NotFound { kind, name } => {
                Self::BackendRejected(format!("{} '{}' not found", kind, name))
            }
            BackendError::AlreadyExists { kind, name } => {
                Self::BackendRejected(format!("{} '{}' already exists", kind, name))
            }
            BackendError::Rejected(msg) => Self::BackendRejected(msg),
        }
    }
}

impl From<TemplateError> for BrokerError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound { service_id, kind } => {
                Self::TemplateNotFound { service_id, kind }
            }
            TemplateError::Invalid {
                service_id,
                kind,
                reason,
            } => Self::TemplateInvalid {
                service_id,
                kind,
                reason,
            },
        }
    }
}

impl From<CredentialError> for BrokerError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::EntropyUnavailable(msg) => Self::Generation(msg),
            CredentialError::InvalidPolicy { field, reason } => {
                Self::InvalidCredentialPolicy { field, reason }
            }
        }
    }
}

/// Result type using [`BrokerError`].
pub type Result<T> = std::result::Result<T, BrokerError>;
