// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle management.
//!
//! [`Broker`] implements the [`ServiceBroker`] operations the protocol
//! adapter calls. Provision and Deprovision run under the instance's
//! [`MutationGuard`](crate::registry::MutationGuard); every other operation
//! only reads the registry.
//!
//! ```text
//!              provision ok                 deprovision ok
//!   (none) ──► Provisioning ──► Active ──► Deprovisioning ──► (removed)
//!                   │                           │      ▲
//!                   │ compensation left         │ delete failed,
//!                   ▼ resources behind          └──────┘ retry resumes
//!                 Failed ──────── deprovision ─────►
//! ```
//!
//! A failed Provision never leaves an `Active` record. A failed Deprovision
//! always leaves the record registered with the resources that may still
//! exist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::ClusterBackend;
use crate::catalog::Catalog;
use crate::config::{Config, DEFAULT_NAMESPACE};
use crate::credentials::{CredentialBundle, CredentialGenerator};
use crate::error::{BrokerError, Result};
use crate::naming;
use crate::persistence::{Persistence, SqlitePersistence};
use crate::provisioner::ResourceProvisioner;
use crate::registry::{InstanceRecord, InstanceRegistry, InstanceStatus};
use crate::resource::ResourceRef;
use crate::template::{
    CredentialsRef, DirectoryTemplates, EmbeddedTemplates, RenderContext, TemplateRenderer,
    TemplateSource,
};

// ============================================================================
// Requests and responses
// ============================================================================

/// A request to create a service instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    /// Catalog service id.
    pub service_id: String,
    /// Platform-assigned instance id.
    pub instance_id: String,
    /// Catalog plan id.
    pub plan_id: String,
    /// Opaque parameters from the platform. Part of the idempotency check.
    pub parameters: serde_json::Value,
}

impl ProvisionRequest {
    /// Create a request with empty parameters.
    pub fn new(
        service_id: impl Into<String>,
        instance_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            instance_id: instance_id.into(),
            plan_id: plan_id.into(),
            parameters: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the provision parameters.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Result of a successful Provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedInstance {
    /// Catalog service id.
    pub service_id: String,
    /// Platform-assigned instance id.
    pub instance_id: String,
    /// Catalog plan id.
    pub plan_id: String,
    /// Name shared by the instance's resources.
    pub resource_name: String,
    /// Resources owned by the instance, in creation order.
    pub resources: Vec<ResourceRef>,
    /// True when the instance was already provisioned with the same request.
    pub already_existed: bool,
}

impl ProvisionedInstance {
    fn from_record(record: &InstanceRecord, already_existed: bool) -> Self {
        Self {
            service_id: record.service_id.clone(),
            instance_id: record.instance_id.clone(),
            plan_id: record.plan_id.clone(),
            resource_name: record.resource_name.clone(),
            resources: record.resources.clone(),
            already_existed,
        }
    }
}

/// A request for connection credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    /// Catalog service id.
    pub service_id: String,
    /// Instance to bind to.
    pub instance_id: String,
    /// Platform-assigned binding id.
    pub binding_id: String,
}

impl BindRequest {
    /// Create a bind request.
    pub fn new(
        service_id: impl Into<String>,
        instance_id: impl Into<String>,
        binding_id: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            instance_id: instance_id.into(),
            binding_id: binding_id.into(),
        }
    }
}

/// Connection details handed out on Bind.
///
/// `Debug` shows credential field names only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// The credentials minted at provision time.
    pub credentials: CredentialBundle,
    /// In-cluster host name of the endpoint.
    pub host: String,
}

/// State of the last asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// The operation is still running.
    InProgress,
    /// The operation finished successfully.
    Succeeded,
    /// The operation failed.
    Failed,
}

/// Answer to a last-operation poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastOperation {
    /// Operation state.
    pub state: OperationState,
    /// Human-readable description.
    pub description: String,
}

impl LastOperation {
    fn succeeded() -> Self {
        Self {
            state: OperationState::Succeeded,
            description: "operations complete synchronously".to_string(),
        }
    }
}

/// Read-only view of a registered instance, without credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSummary {
    /// Catalog service id.
    pub service_id: String,
    /// Platform-assigned instance id.
    pub instance_id: String,
    /// Catalog plan id.
    pub plan_id: String,
    /// Provision parameters.
    pub parameters: serde_json::Value,
    /// Name shared by the instance's resources.
    pub resource_name: String,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Resources still owned by the instance.
    pub resources: Vec<ResourceRef>,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl From<InstanceRecord> for InstanceSummary {
    fn from(record: InstanceRecord) -> Self {
        Self {
            service_id: record.service_id,
            instance_id: record.instance_id,
            plan_id: record.plan_id,
            parameters: record.parameters,
            resource_name: record.resource_name,
            status: record.status,
            resources: record.resources,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

// ============================================================================
// Broker operations
// ============================================================================

/// Operations a broker protocol adapter dispatches to.
///
/// Implementations must be safe to call concurrently from many tasks.
#[async_trait]
pub trait ServiceBroker: Send + Sync {
    /// The service catalog.
    fn services(&self) -> &Catalog;

    /// Create an instance, or return the existing one for an identical request.
    async fn provision(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedInstance>;

    /// Tear an instance down and unregister it.
    async fn deprovision(&self, service_id: &str, instance_id: &str) -> Result<()>;

    /// Return the instance's credentials. Never mutates anything.
    async fn bind(&self, request: &BindRequest) -> Result<Binding>;

    /// Release a binding. Bindings hold no state, so this always succeeds.
    async fn unbind(&self, service_id: &str, instance_id: &str, binding_id: &str) -> Result<()>;

    /// Update an instance. Plan changes are not supported; always succeeds.
    async fn update(&self, service_id: &str, instance_id: &str) -> Result<()>;

    /// Poll an instance operation. Operations are synchronous.
    async fn last_operation(&self, service_id: &str, instance_id: &str) -> Result<LastOperation>;

    /// Poll a binding operation. Operations are synchronous.
    async fn last_binding_operation(
        &self,
        service_id: &str,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<LastOperation>;

    /// Describe a registered instance.
    async fn get_instance(&self, service_id: &str, instance_id: &str) -> Result<InstanceSummary>;
}

/// The provisioning lifecycle manager.
pub struct Broker {
    catalog: Catalog,
    registry: InstanceRegistry,
    renderer: TemplateRenderer,
    generator: CredentialGenerator,
    provisioner: ResourceProvisioner,
}

impl Broker {
    /// Create a new builder.
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// The service catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The instance registry.
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Namespace resources are created in.
    pub fn namespace(&self) -> &str {
        self.provisioner.namespace()
    }

    /// Sorted instance ids registered for a service.
    pub async fn instances(&self, service_id: &str) -> Result<Vec<String>> {
        self.registry.instances(service_id).await
    }

    /// Every registered instance.
    pub async fn all_instances(&self) -> Result<Vec<InstanceSummary>> {
        Ok(self
            .registry
            .all_instances()
            .await?
            .into_iter()
            .map(InstanceSummary::from)
            .collect())
    }
}

#[async_trait]
impl ServiceBroker for Broker {
    fn services(&self) -> &Catalog {
        &self.catalog
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionedInstance> {
        let (service, _plan) = self.catalog.plan(&request.service_id, &request.plan_id)?;
        let resource_name = naming::resolve(&request.service_id, &request.instance_id)?;

        let guard = self
            .registry
            .begin_mutation(&request.service_id, &request.instance_id)
            .await;

        if let Some(existing) = self
            .registry
            .find(&request.service_id, &request.instance_id)
            .await?
        {
            return match existing.status {
                InstanceStatus::Active
                    if existing.plan_id == request.plan_id
                        && existing.parameters == request.parameters =>
                {
                    info!(
                        service_id = %request.service_id,
                        instance_id = %request.instance_id,
                        "Instance already provisioned"
                    );
                    Ok(ProvisionedInstance::from_record(&existing, true))
                }
                InstanceStatus::Active => Err(BrokerError::ConflictingInstance {
                    service_id: request.service_id.clone(),
                    instance_id: request.instance_id.clone(),
                }),
                status => Err(BrokerError::InvalidInstanceState {
                    instance_id: request.instance_id.clone(),
                    status,
                    operation: "provision",
                }),
            };
        }

        info!(
            service_id = %request.service_id,
            instance_id = %request.instance_id,
            plan_id = %request.plan_id,
            resource_name = %resource_name,
            "Provisioning instance"
        );

        let credentials = self.generator.generate(&service.credentials)?;
        let credentials_ref = CredentialsRef {
            name: resource_name.to_string(),
            keys: credentials.field_names().map(str::to_string).collect(),
        };
        let ctx = RenderContext {
            service_id: &request.service_id,
            plan_id: &request.plan_id,
            namespace: self.provisioner.namespace(),
            resource_name: &resource_name,
            credentials: &credentials_ref,
        };
        let rendered = self
            .renderer
            .render_all(&ctx, credentials.to_resource_payload())?;

        let now = Utc::now();
        let mut record = InstanceRecord {
            service_id: request.service_id.clone(),
            instance_id: request.instance_id.clone(),
            plan_id: request.plan_id.clone(),
            parameters: request.parameters.clone(),
            resource_name: resource_name.into_string(),
            status: InstanceStatus::Provisioning,
            credentials,
            resources: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        match self
            .provisioner
            .create_ordered(guard.key(), &rendered, cancel)
            .await
        {
            Ok(resources) => {
                record.status = InstanceStatus::Active;
                record.resources = resources;
                let provisioned = ProvisionedInstance::from_record(&record, false);

                if let Err(e) = self.registry.commit(&guard, record.clone()).await {
                    error!(
                        instance = %guard.key(),
                        error = %e,
                        "Failed to register provisioned instance, removing its resources"
                    );
                    if let Err(cleanup) = self
                        .provisioner
                        .delete_ordered(guard.key(), &provisioned.resources)
                        .await
                    {
                        record.status = InstanceStatus::Failed;
                        record.resources = cleanup.remaining;
                        record.updated_at = Utc::now();

                        error!(
                            instance = %guard.key(),
                            error = %cleanup.error,
                            residual = record.resources.len(),
                            "Cleanup left resources behind, instance marked failed"
                        );
                        if let Err(e) = self.registry.commit(&guard, record).await {
                            error!(instance = %guard.key(), error = %e, "Failed to record failed instance");
                        }
                    }
                    return Err(e);
                }

                info!(
                    instance = %guard.key(),
                    resource_name = %provisioned.resource_name,
                    "Instance provisioned"
                );
                Ok(provisioned)
            }
            Err(failure) => {
                if !failure.is_clean() {
                    record.status = InstanceStatus::Failed;
                    record.resources = failure.residual.clone();
                    record.updated_at = Utc::now();

                    error!(
                        instance = %guard.key(),
                        residual = record.resources.len(),
                        "Compensation left resources behind, instance marked failed"
                    );
                    if let Err(e) = self.registry.commit(&guard, record).await {
                        error!(instance = %guard.key(), error = %e, "Failed to record failed instance");
                    }
                }

                warn!(instance = %guard.key(), error = %failure.error, "Provisioning failed");
                Err(failure.error)
            }
        }
    }

    async fn deprovision(&self, service_id: &str, instance_id: &str) -> Result<()> {
        let guard = self.registry.begin_mutation(service_id, instance_id).await;
        let mut record = self.registry.lookup(service_id, instance_id).await?;

        info!(
            instance = %guard.key(),
            status = %record.status,
            resources = record.resources.len(),
            "Deprovisioning instance"
        );

        if record.status != InstanceStatus::Deprovisioning {
            record.status = InstanceStatus::Deprovisioning;
            record.updated_at = Utc::now();
            self.registry.commit(&guard, record.clone()).await?;
        }

        match self
            .provisioner
            .delete_ordered(guard.key(), &record.resources)
            .await
        {
            Ok(()) => {
                self.registry.remove(&guard, service_id, instance_id).await?;
                info!(instance = %guard.key(), "Instance deprovisioned");
                Ok(())
            }
            Err(failure) => {
                record.resources = failure.remaining;
                record.updated_at = Utc::now();
                if let Err(e) = self.registry.commit(&guard, record).await {
                    error!(instance = %guard.key(), error = %e, "Failed to record remaining resources");
                }
                warn!(instance = %guard.key(), error = %failure.error, "Deprovisioning stopped, retry to resume");
                Err(failure.error)
            }
        }
    }

    async fn bind(&self, request: &BindRequest) -> Result<Binding> {
        let record = self
            .registry
            .lookup(&request.service_id, &request.instance_id)
            .await?;

        if record.status != InstanceStatus::Active {
            return Err(BrokerError::InvalidInstanceState {
                instance_id: request.instance_id.clone(),
                status: record.status,
                operation: "bind",
            });
        }

        info!(
            service_id = %request.service_id,
            instance_id = %request.instance_id,
            binding_id = %request.binding_id,
            fields = ?record.credentials.field_names().collect::<Vec<_>>(),
            "Binding instance"
        );

        Ok(Binding {
            host: format!("{}.{}.svc", record.resource_name, self.namespace()),
            credentials: record.credentials.clone(),
        })
    }

    async fn unbind(&self, service_id: &str, instance_id: &str, binding_id: &str) -> Result<()> {
        info!(service_id = %service_id, instance_id = %instance_id, binding_id = %binding_id, "Unbinding instance");
        Ok(())
    }

    async fn update(&self, service_id: &str, instance_id: &str) -> Result<()> {
        info!(service_id = %service_id, instance_id = %instance_id, "Update requested, nothing to change");
        Ok(())
    }

    async fn last_operation(&self, _service_id: &str, _instance_id: &str) -> Result<LastOperation> {
        Ok(LastOperation::succeeded())
    }

    async fn last_binding_operation(
        &self,
        _service_id: &str,
        _instance_id: &str,
        _binding_id: &str,
    ) -> Result<LastOperation> {
        Ok(LastOperation::succeeded())
    }

    async fn get_instance(&self, service_id: &str, instance_id: &str) -> Result<InstanceSummary> {
        Ok(self.registry.lookup(service_id, instance_id).await?.into())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for creating a [`Broker`].
pub struct BrokerBuilder {
    backend: Option<Arc<dyn ClusterBackend>>,
    persistence: Option<Arc<dyn Persistence>>,
    templates: Option<Arc<dyn TemplateSource>>,
    generator: Option<CredentialGenerator>,
    catalog: Catalog,
    namespace: String,
    password_length: Option<usize>,
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            persistence: None,
            templates: None,
            generator: None,
            catalog: Catalog::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            password_length: None,
        }
    }
}

impl BrokerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a loaded [`Config`]: namespace, password length, template
    /// directory and SQLite registry.
    pub async fn from_config(mut self, config: &Config) -> anyhow::Result<Self> {
        self.namespace = config.namespace.clone();
        self.password_length = Some(config.password_length);

        if let Some(dir) = &config.template_dir {
            self.templates = Some(Arc::new(DirectoryTemplates::new(dir)));
        }
        if let Some(path) = &config.database_path {
            self.persistence = Some(Arc::new(SqlitePersistence::from_path(path).await?));
        }

        Ok(self)
    }

    /// Set the cluster backend (required).
    pub fn backend(mut self, backend: Arc<dyn ClusterBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the registry persistence.
    ///
    /// Default: in-memory
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the template source.
    ///
    /// Default: [`EmbeddedTemplates`]
    pub fn templates(mut self, templates: Arc<dyn TemplateSource>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Set the credential generator.
    ///
    /// Default: OS entropy
    pub fn credential_generator(mut self, generator: CredentialGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the service catalog.
    ///
    /// Default: [`Catalog::default`]
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set the namespace resources are created in.
    ///
    /// Default: `blacksmith`
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Override the length of generated passwords for every service.
    pub fn password_length(mut self, length: usize) -> Self {
        self.password_length = Some(length);
        self
    }

    /// Build the broker.
    pub fn build(self) -> anyhow::Result<Broker> {
        let backend = self
            .backend
            .ok_or_else(|| anyhow::anyhow!("backend is required"))?;

        let registry = match self.persistence {
            Some(persistence) => InstanceRegistry::new(persistence),
            None => InstanceRegistry::in_memory(),
        };
        let templates = self
            .templates
            .unwrap_or_else(|| Arc::new(EmbeddedTemplates));
        let catalog = match self.password_length {
            Some(length) => self.catalog.with_password_length(length),
            None => self.catalog,
        };

        info!(
            backend = backend.backend_type(),
            persistence = registry.persistence_type(),
            templates = templates.source_type(),
            namespace = %self.namespace,
            services = catalog.services().len(),
            "Broker initialized"
        );

        Ok(Broker {
            catalog,
            registry,
            renderer: TemplateRenderer::new(templates),
            generator: self.generator.unwrap_or_default(),
            provisioner: ResourceProvisioner::new(backend, self.namespace),
        })
    }
}
