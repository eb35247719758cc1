// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template rendering and validation.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{TemplateError, TemplateSource};
use crate::naming::ResourceName;
use crate::resource::{RenderedResources, ResourceKind, ResourceSpec, SecretPayload};

/// Value of the `created-by` owner label.
pub const CREATED_BY: &str = "blacksmith";

/// Owner label naming the component that created the resource.
pub const LABEL_CREATED_BY: &str = "created-by";

/// Owner label carrying the resource name; also used as the pod selector.
pub const LABEL_SERVICE: &str = "service";

/// Reference to the credentials object that other resources point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialsRef {
    /// Name of the credentials object.
    pub name: String,
    /// Keys stored in the credentials object.
    pub keys: Vec<String>,
}

/// Inputs for rendering one instance's resources.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Catalog service id.
    pub service_id: &'a str,
    /// Catalog plan id.
    pub plan_id: &'a str,
    /// Target namespace.
    pub namespace: &'a str,
    /// Resolved resource name.
    pub resource_name: &'a ResourceName,
    /// The credentials object the workload must reference.
    pub credentials: &'a CredentialsRef,
}

#[derive(Serialize)]
struct TemplateVars<'a> {
    name: &'a str,
    namespace: &'a str,
    service_id: &'a str,
    plan_id: &'a str,
    labels: BTreeMap<&'static str, &'a str>,
    credentials: &'a CredentialsRef,
}

/// Owner labels applied to every resource of an instance.
pub fn owner_labels(resource_name: &str) -> BTreeMap<&'static str, &str> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_CREATED_BY, CREATED_BY);
    labels.insert(LABEL_SERVICE, resource_name);
    labels
}

/// Renders per-service templates into validated [`ResourceSpec`]s.
pub struct TemplateRenderer {
    source: Arc<dyn TemplateSource>,
}

impl TemplateRenderer {
    /// Create a renderer over a template source.
    pub fn new(source: Arc<dyn TemplateSource>) -> Self {
        Self { source }
    }

    /// Type of the underlying template source.
    pub fn source_type(&self) -> &'static str {
        self.source.source_type()
    }

    /// Render the template for `kind`.
    pub fn render(
        &self,
        kind: ResourceKind,
        ctx: &RenderContext<'_>,
    ) -> Result<ResourceSpec, TemplateError> {
        let template = self.source.load(ctx.service_id, kind)?;

        let vars = TemplateVars {
            name: ctx.resource_name.as_str(),
            namespace: ctx.namespace,
            service_id: ctx.service_id,
            plan_id: ctx.plan_id,
            labels: owner_labels(ctx.resource_name.as_str()),
            credentials: ctx.credentials,
        };

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template("resource", &template).map_err(|e| {
            TemplateError::invalid(ctx.service_id, kind, format!("parse error: {}", e))
        })?;
        let rendered = env
            .get_template("resource")
            .and_then(|tmpl| tmpl.render(&vars))
            .map_err(|e| {
                TemplateError::invalid(ctx.service_id, kind, format!("render error: {}", e))
            })?;

        let mut manifest: Value = serde_json::from_str(&rendered).map_err(|e| {
            TemplateError::invalid(
                ctx.service_id,
                kind,
                format!("rendered output is not valid JSON: {}", e),
            )
        })?;

        validate_manifest(kind, ctx, &manifest)?;
        apply_metadata(kind, ctx, &mut manifest)?;

        Ok(ResourceSpec::new(
            kind,
            ctx.resource_name.as_str(),
            manifest,
        ))
    }

    /// Render all three resources and attach the secret payload to the
    /// credentials spec.
    pub fn render_all(
        &self,
        ctx: &RenderContext<'_>,
        payload: SecretPayload,
    ) -> Result<RenderedResources, TemplateError> {
        Ok(RenderedResources {
            credentials: self
                .render(ResourceKind::Credentials, ctx)?
                .with_payload(payload),
            workload: self.render(ResourceKind::Workload, ctx)?,
            endpoint: self.render(ResourceKind::Endpoint, ctx)?,
        })
    }
}

fn validate_manifest(
    kind: ResourceKind,
    ctx: &RenderContext<'_>,
    manifest: &Value,
) -> Result<(), TemplateError> {
    let invalid = |reason: String| TemplateError::invalid(ctx.service_id, kind, reason);

    let obj = manifest
        .as_object()
        .ok_or_else(|| invalid("rendered output must be a JSON object".to_string()))?;

    match obj.get("apiVersion").and_then(Value::as_str) {
        Some(v) if !v.is_empty() => {}
        _ => return Err(invalid("apiVersion is not set".to_string())),
    }

    match obj.get("kind").and_then(Value::as_str) {
        Some(k) if k == kind.manifest_kind() => {}
        Some(k) => {
            return Err(invalid(format!(
                "expected kind '{}', got '{}'",
                kind.manifest_kind(),
                k
            )));
        }
        None => return Err(invalid("kind is not set".to_string())),
    }

    let name = obj
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str);
    if name != Some(ctx.resource_name.as_str()) {
        return Err(invalid(format!(
            "metadata.name must be '{}'",
            ctx.resource_name
        )));
    }

    if kind == ResourceKind::Workload {
        let mut refs = Vec::new();
        collect_secret_refs(manifest, &mut refs);
        if refs.is_empty() {
            return Err(invalid(
                "workload does not reference the credentials object".to_string(),
            ));
        }
        for secret_ref in refs {
            let ref_name = secret_ref.get("name").and_then(Value::as_str);
            if ref_name != Some(ctx.credentials.name.as_str()) {
                return Err(invalid(format!(
                    "secretKeyRef must reference '{}', found {:?}",
                    ctx.credentials.name, ref_name
                )));
            }
            let key = secret_ref.get("key").and_then(Value::as_str);
            if !key.is_some_and(|k| ctx.credentials.keys.iter().any(|known| known == k)) {
                return Err(invalid(format!(
                    "secretKeyRef key {:?} is not one of {:?}",
                    key, ctx.credentials.keys
                )));
            }
        }
    }

    Ok(())
}

fn collect_secret_refs<'v>(value: &'v Value, out: &mut Vec<&'v Map<String, Value>>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "secretKeyRef"
                    && let Value::Object(secret_ref) = child
                {
                    out.push(secret_ref);
                }
                collect_secret_refs(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_secret_refs(item, out);
            }
        }
        _ => {}
    }
}

fn apply_metadata(
    kind: ResourceKind,
    ctx: &RenderContext<'_>,
    manifest: &mut Value,
) -> Result<(), TemplateError> {
    let metadata = manifest
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| TemplateError::invalid(ctx.service_id, kind, "metadata must be an object"))?;

    metadata.insert(
        "namespace".to_string(),
        Value::String(ctx.namespace.to_string()),
    );

    let labels = metadata
        .entry("labels")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| {
            TemplateError::invalid(ctx.service_id, kind, "metadata.labels must be an object")
        })?;

    for (key, value) in owner_labels(ctx.resource_name.as_str()) {
        labels.insert(key.to_string(), Value::String(value.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::resolve;
    use crate::template::{EmbeddedTemplates, InlineTemplates};

    fn postgres_credentials() -> CredentialsRef {
        CredentialsRef {
            name: "postgres-i1".to_string(),
            keys: vec!["password".to_string(), "username".to_string()],
        }
    }

    fn embedded() -> TemplateRenderer {
        TemplateRenderer::new(Arc::new(EmbeddedTemplates))
    }

    #[test]
    fn test_render_postgres_workload() {
        let name = resolve("postgres", "i1").unwrap();
        let credentials = postgres_credentials();
        let ctx = RenderContext {
            service_id: "postgres",
            plan_id: "postgres-poc",
            namespace: "blacksmith",
            resource_name: &name,
            credentials: &credentials,
        };

        let spec = embedded().render(ResourceKind::Workload, &ctx).unwrap();
        let manifest = spec.manifest();

        assert_eq!(spec.name(), "postgres-i1");
        assert_eq!(manifest["kind"], "Deployment");
        assert_eq!(manifest["metadata"]["namespace"], "blacksmith");
        assert_eq!(manifest["metadata"]["labels"]["created-by"], "blacksmith");
        assert_eq!(manifest["metadata"]["labels"]["service"], "postgres-i1");
        assert_eq!(
            manifest["spec"]["selector"]["matchLabels"]["service"],
            "postgres-i1"
        );

        let env = &manifest["spec"]["template"]["spec"]["containers"][0]["env"];
        assert_eq!(env[0]["valueFrom"]["secretKeyRef"]["name"], "postgres-i1");
        assert_eq!(env[0]["valueFrom"]["secretKeyRef"]["key"], "username");
        assert_eq!(env[1]["valueFrom"]["secretKeyRef"]["key"], "password");
    }

    #[test]
    fn test_render_all_attaches_payload_to_credentials_only() {
        let name = resolve("redis", "i1").unwrap();
        let credentials = CredentialsRef {
            name: name.to_string(),
            keys: vec!["password".to_string()],
        };
        let ctx = RenderContext {
            service_id: "redis",
            plan_id: "redis-poc",
            namespace: "ns",
            resource_name: &name,
            credentials: &credentials,
        };

        let mut data = BTreeMap::new();
        data.insert("password".to_string(), b"pw".to_vec());
        let rendered = embedded()
            .render_all(&ctx, SecretPayload::new(data))
            .unwrap();

        assert!(rendered.credentials.payload().is_some());
        assert!(rendered.workload.payload().is_none());
        assert!(rendered.endpoint.payload().is_none());
        assert_eq!(rendered.endpoint.manifest()["spec"]["selector"]["service"], "redis-i1");
    }

    #[test]
    fn test_missing_template() {
        let name = resolve("mysql", "i1").unwrap();
        let credentials = postgres_credentials();
        let ctx = RenderContext {
            service_id: "mysql",
            plan_id: "mysql-poc",
            namespace: "ns",
            resource_name: &name,
            credentials: &credentials,
        };
        let err = embedded().render(ResourceKind::Credentials, &ctx).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { .. }));
    }

    fn render_inline(kind: ResourceKind, template: &str) -> Result<ResourceSpec, TemplateError> {
        let renderer = TemplateRenderer::new(Arc::new(
            InlineTemplates::new().with_template("custom", kind, template),
        ));
        let name = resolve("custom", "i1").unwrap();
        let credentials = CredentialsRef {
            name: name.to_string(),
            keys: vec!["password".to_string()],
        };
        let ctx = RenderContext {
            service_id: "custom",
            plan_id: "p",
            namespace: "ns",
            resource_name: &name,
            credentials: &credentials,
        };
        renderer.render(kind, &ctx)
    }

    #[test]
    fn test_undefined_variable_is_invalid() {
        let err = render_inline(
            ResourceKind::Credentials,
            r#"{"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "{{ nmae }}"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::Invalid { .. }));
    }

    #[test]
    fn test_wrong_kind_is_invalid() {
        let err = render_inline(
            ResourceKind::Endpoint,
            r#"{"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "{{ name }}"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected kind 'Service'"));
    }

    #[test]
    fn test_missing_name_is_invalid() {
        let err = render_inline(
            ResourceKind::Credentials,
            r#"{"apiVersion": "v1", "kind": "Secret", "metadata": {}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_workload_must_reference_credentials() {
        let err = render_inline(
            ResourceKind::Workload,
            r#"{"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "{{ name }}"},
                "spec": {"env": [{"valueFrom": {"secretKeyRef": {"name": "other", "key": "password"}}}]}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("secretKeyRef must reference"));

        let err = render_inline(
            ResourceKind::Workload,
            r#"{"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "{{ name }}"},
                "spec": {"env": [{"valueFrom": {"secretKeyRef": {"name": "{{ credentials.name }}", "key": "token"}}}]}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn test_not_json_is_invalid() {
        let err = render_inline(ResourceKind::Credentials, "name: {{ name }}").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_existing_labels_are_kept() {
        let spec = render_inline(
            ResourceKind::Credentials,
            r#"{"apiVersion": "v1", "kind": "Secret",
                "metadata": {"name": "{{ name }}", "labels": {"tier": "data"}}}"#,
        )
        .unwrap();
        let labels = &spec.manifest()["metadata"]["labels"];
        assert_eq!(labels["tier"], "data");
        assert_eq!(labels["created-by"], "blacksmith");
        assert_eq!(labels["service"], "custom-i1");
    }
}
