// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blacksmith - service broker registry tool
//!
//! Loads the broker configuration, checks that every catalog service renders
//! a complete set of resource templates, and reports the instance registry:
//! - live instances per service
//! - `Failed` instances that need operator cleanup
//! - instances stuck in `Deprovisioning`

use std::sync::Arc;
use tracing::{error, info, warn};

use blacksmith_broker::catalog::Catalog;
use blacksmith_broker::config::Config;
use blacksmith_broker::naming;
use blacksmith_broker::persistence::{MemoryPersistence, Persistence, SqlitePersistence};
use blacksmith_broker::registry::{InstanceRegistry, InstanceStatus};
use blacksmith_broker::resource::SecretPayload;
use blacksmith_broker::template::{
    CredentialsRef, DirectoryTemplates, EmbeddedTemplates, RenderContext, TemplateRenderer,
    TemplateSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blacksmith_broker=info,blacksmith=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    let catalog = Catalog::default().with_password_length(config.password_length);

    info!(
        namespace = %config.namespace,
        template_dir = ?config.template_dir,
        database_path = ?config.database_path,
        "Starting blacksmith"
    );

    let templates: Arc<dyn TemplateSource> = match &config.template_dir {
        Some(dir) => Arc::new(DirectoryTemplates::new(dir)),
        None => Arc::new(EmbeddedTemplates),
    };
    let broken = check_templates(&TemplateRenderer::new(templates), &catalog, &config.namespace);

    let persistence: Arc<dyn Persistence> = match &config.database_path {
        Some(path) => Arc::new(SqlitePersistence::from_path(path).await?),
        None => Arc::new(MemoryPersistence::new()),
    };
    let registry = InstanceRegistry::new(persistence);
    info!(persistence = registry.persistence_type(), "Registry opened");

    let mut needs_attention = 0;
    for service in catalog.services() {
        let ids = registry.instances(&service.id).await?;
        info!(service_id = %service.id, count = ids.len(), instances = ?ids, "Registered instances");
    }

    for record in registry.all_instances().await? {
        match record.status {
            InstanceStatus::Failed => {
                needs_attention += 1;
                warn!(
                    service_id = %record.service_id,
                    instance_id = %record.instance_id,
                    resources = ?record.resources.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
                    "Instance failed, deprovision it to remove residual resources"
                );
            }
            InstanceStatus::Deprovisioning => {
                needs_attention += 1;
                warn!(
                    service_id = %record.service_id,
                    instance_id = %record.instance_id,
                    remaining = record.resources.len(),
                    "Instance teardown incomplete, retry deprovision"
                );
            }
            _ => {}
        }
    }

    info!(needs_attention, "Registry check complete");

    if broken > 0 {
        anyhow::bail!("{} service(s) have unusable templates", broken);
    }
    Ok(())
}

/// Render every catalog service with a placeholder instance and report failures.
fn check_templates(renderer: &TemplateRenderer, catalog: &Catalog, namespace: &str) -> usize {
    let mut broken = 0;

    for service in catalog.services() {
        let result = naming::resolve(&service.id, "template-check").and_then(|name| {
            let credentials = CredentialsRef {
                name: name.to_string(),
                keys: service.credentials.field_names().map(str::to_string).collect(),
            };
            let plan_id = service.plans.first().map(|p| p.id.as_str()).unwrap_or_default();
            let ctx = RenderContext {
                service_id: &service.id,
                plan_id,
                namespace,
                resource_name: &name,
                credentials: &credentials,
            };
            renderer
                .render_all(&ctx, SecretPayload::default())
                .map(|_| ())
                .map_err(Into::into)
        });

        match result {
            Ok(()) => info!(service_id = %service.id, source = renderer.source_type(), "Templates OK"),
            Err(e) => {
                broken += 1;
                error!(service_id = %service.id, error = %e, "Templates unusable");
            }
        }
    }

    broken
}
