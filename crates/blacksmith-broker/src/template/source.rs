// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template sources.

use std::collections::HashMap;
use std::path::PathBuf;

use super::TemplateError;
use crate::resource::ResourceKind;

/// Supplies raw template text keyed by service id and resource kind.
pub trait TemplateSource: Send + Sync {
    /// Source type identifier (e.g., "embedded", "directory").
    fn source_type(&self) -> &'static str;

    /// Load the template for `service_id` and `kind`.
    ///
    /// Returns [`TemplateError::NotFound`] when no template is registered.
    fn load(&self, service_id: &str, kind: ResourceKind) -> Result<String, TemplateError>;
}

/// Templates compiled into the binary for the default catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedTemplates;

impl EmbeddedTemplates {
    fn lookup(service_id: &str, kind: ResourceKind) -> Option<&'static str> {
        let source = match (service_id, kind) {
            ("postgres", ResourceKind::Credentials) => {
                include_str!("../../templates/postgres/credentials.json")
            }
            ("postgres", ResourceKind::Workload) => {
                include_str!("../../templates/postgres/workload.json")
            }
            ("postgres", ResourceKind::Endpoint) => {
                include_str!("../../templates/postgres/endpoint.json")
            }
            ("redis", ResourceKind::Credentials) => {
                include_str!("../../templates/redis/credentials.json")
            }
            ("redis", ResourceKind::Workload) => include_str!("../../templates/redis/workload.json"),
            ("redis", ResourceKind::Endpoint) => include_str!("../../templates/redis/endpoint.json"),
            _ => return None,
        };
        Some(source)
    }
}

impl TemplateSource for EmbeddedTemplates {
    fn source_type(&self) -> &'static str {
        "embedded"
    }

    fn load(&self, service_id: &str, kind: ResourceKind) -> Result<String, TemplateError> {
        Self::lookup(service_id, kind)
            .map(str::to_string)
            .ok_or_else(|| TemplateError::NotFound {
                service_id: service_id.to_string(),
                kind,
            })
    }
}

/// Templates read from `<root>/<service_id>/<kind>.json`.
///
/// Files are read on every load so operators can edit templates without a
/// restart.
#[derive(Debug, Clone)]
pub struct DirectoryTemplates {
    root: PathBuf,
}

impl DirectoryTemplates {
    /// Create a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path the template for `service_id` and `kind` is read from.
    pub fn template_path(&self, service_id: &str, kind: ResourceKind) -> PathBuf {
        self.root
            .join(service_id)
            .join(format!("{}.json", kind.as_str()))
    }
}

impl TemplateSource for DirectoryTemplates {
    fn source_type(&self) -> &'static str {
        "directory"
    }

    fn load(&self, service_id: &str, kind: ResourceKind) -> Result<String, TemplateError> {
        let path = self.template_path(service_id, kind);
        match std::fs::read_to_string(&path) {
            Ok(source) => Ok(source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TemplateError::NotFound {
                service_id: service_id.to_string(),
                kind,
            }),
            Err(e) => Err(TemplateError::invalid(
                service_id,
                kind,
                format!("failed to read {}: {}", path.display(), e),
            )),
        }
    }
}

/// In-memory templates, for services registered at runtime and tests.
#[derive(Debug, Clone, Default)]
pub struct InlineTemplates {
    templates: HashMap<(String, ResourceKind), String>,
}

impl InlineTemplates {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template.
    pub fn with_template(
        mut self,
        service_id: impl Into<String>,
        kind: ResourceKind,
        source: impl Into<String>,
    ) -> Self {
        self.templates
            .insert((service_id.into(), kind), source.into());
        self
    }
}

impl TemplateSource for InlineTemplates {
    fn source_type(&self) -> &'static str {
        "inline"
    }

    fn load(&self, service_id: &str, kind: ResourceKind) -> Result<String, TemplateError> {
        self.templates
            .get(&(service_id.to_string(), kind))
            .cloned()
            .ok_or_else(|| TemplateError::NotFound {
                service_id: service_id.to_string(),
                kind,
            })
    }
}
