// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service catalog.
//!
//! The catalog lists the services the broker can provision, their plans, and
//! the credential fields each service needs. Only the public part
//! (`id`, `name`, `description`, `bindable`, `plans`) is serialized.

use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialPolicy, PasswordPolicy};
use crate::error::{BrokerError, Result};
use crate::naming::validate_service_id;

/// A plan offered by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    /// Plan id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

impl ServicePlan {
    /// Create a plan.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A provisionable service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    /// Service id, also the template directory name.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether instances can be bound.
    pub bindable: bool,
    /// Offered plans.
    pub plans: Vec<ServicePlan>,
    /// Credential fields minted for every instance.
    #[serde(skip)]
    pub credentials: CredentialPolicy,
}

impl ServiceOffering {
    /// Look up a plan by id.
    pub fn plan(&self, plan_id: &str) -> Option<&ServicePlan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }
}

/// The set of services the broker offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    services: Vec<ServiceOffering>,
}

impl Default for Catalog {
    /// The `redis` and `postgres` proof-of-concept offerings.
    fn default() -> Self {
        Self {
            services: vec![
                ServiceOffering {
                    id: "redis".to_string(),
                    name: "redis".to_string(),
                    description: "a proof of concept redis".to_string(),
                    bindable: true,
                    plans: vec![ServicePlan::new("redis-poc", "redis-poc", "poc")],
                    credentials: CredentialPolicy::new()
                        .generated("password", PasswordPolicy::default()),
                },
                ServiceOffering {
                    id: "postgres".to_string(),
                    name: "postgres".to_string(),
                    description: "a proof of concept postgresql instance".to_string(),
                    bindable: true,
                    plans: vec![ServicePlan::new("postgres-poc", "postgres-poc", "poc")],
                    credentials: CredentialPolicy::new()
                        .generated("username", PasswordPolicy::username(12))
                        .generated("password", PasswordPolicy::default()),
                },
            ],
        }
    }
}

impl Catalog {
    /// Create an empty catalog.
    pub fn empty() -> Self {
        Self {
            services: Vec::new(),
        }
    }

    /// Add or replace a service.
    ///
    /// The service id must be usable as the first half of a resource name.
    pub fn with_service(mut self, service: ServiceOffering) -> Result<Self> {
        validate_service_id(&service.id)?;
        self.services.retain(|s| s.id != service.id);
        self.services.push(service);
        Ok(self)
    }

    /// Set the length of every generated `password` field.
    pub fn with_password_length(mut self, length: usize) -> Self {
        for service in &mut self.services {
            service.credentials = std::mem::take(&mut service.credentials).with_password_length(length);
        }
        self
    }

    /// All offered services.
    pub fn services(&self) -> &[ServiceOffering] {
        &self.services
    }

    /// Look up a service.
    pub fn service(&self, service_id: &str) -> Result<&ServiceOffering> {
        self.services
            .iter()
            .find(|s| s.id == service_id)
            .ok_or_else(|| BrokerError::ServiceNotFound(service_id.to_string()))
    }

    /// Look up a service and one of its plans.
    pub fn plan(&self, service_id: &str, plan_id: &str) -> Result<(&ServiceOffering, &ServicePlan)> {
        let service = self.service(service_id)?;
        let plan = service
            .plan(plan_id)
            .ok_or_else(|| BrokerError::PlanNotFound {
                service_id: service_id.to_string(),
                plan_id: plan_id.to_string(),
            })?;
        Ok((service, plan))
    }
}
