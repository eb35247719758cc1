// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-service resource templates.
//!
//! A [`TemplateSource`] supplies one JSON manifest template per service and
//! [`ResourceKind`]; the [`TemplateRenderer`] fills in names, labels and
//! credential references and checks the result is a complete resource.
//!
//! Template variables:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `name` | Resource name shared by all three objects |
//! | `namespace` | Target namespace |
//! | `service_id` | Catalog service id |
//! | `plan_id` | Catalog plan id |
//! | `labels` | Owner labels (`created-by`, `service`) |
//! | `credentials.name` | Name of the credentials object |
//! | `credentials.keys` | Credential field names |
//!
//! Referencing any other variable is a render error.

mod renderer;
mod source;

pub use renderer::*;
pub use source::*;

use thiserror::Error;

use crate::resource::ResourceKind;

/// Errors from loading or rendering templates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// No template registered for the service and kind.
    #[error("No {kind} template registered for service '{service_id}'")]
    NotFound {
        /// Service id.
        service_id: String,
        /// Resource kind.
        kind: ResourceKind,
    },

    /// Template could not be loaded or rendered an incomplete resource.
    #[error("Invalid {kind} template for service '{service_id}': {reason}")]
    Invalid {
        /// Service id.
        service_id: String,
        /// Resource kind.
        kind: ResourceKind,
        /// What went wrong.
        reason: String,
    },
}

impl TemplateError {
    pub(crate) fn invalid(service_id: &str, kind: ResourceKind, reason: impl Into<String>) -> Self {
        Self::Invalid {
            service_id: service_id.to_string(),
            kind,
            reason: reason.into(),
        }
    }
}
