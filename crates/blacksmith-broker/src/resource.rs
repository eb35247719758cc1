// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource kinds, rendered specs and backend handles.
//!
//! Every instance owns exactly one resource of each [`ResourceKind`]. Specs are
//! created in [`ResourceKind::CREATION_ORDER`] and deleted in the reverse order,
//! because the workload and the endpoint refer to the credentials object by name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

/// The three kinds of backend resource an instance owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Opaque credentials object (a Kubernetes `Secret`).
    Credentials,
    /// The workload running the service (a `Deployment`).
    Workload,
    /// Network-exposed endpoint in front of the workload (a `Service`).
    Endpoint,
}

impl ResourceKind {
    /// Order in which resources must be created.
    pub const CREATION_ORDER: [ResourceKind; 3] = [
        ResourceKind::Credentials,
        ResourceKind::Workload,
        ResourceKind::Endpoint,
    ];

    /// Order in which resources must be deleted.
    pub const DELETION_ORDER: [ResourceKind; 3] = [
        ResourceKind::Endpoint,
        ResourceKind::Workload,
        ResourceKind::Credentials,
    ];

    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::Workload => "workload",
            Self::Endpoint => "endpoint",
        }
    }

    /// The manifest `kind` a rendered template must declare.
    pub fn manifest_kind(&self) -> &'static str {
        match self {
            Self::Credentials => "Secret",
            Self::Workload => "Deployment",
            Self::Endpoint => "Service",
        }
    }

    /// Position of this kind in [`CREATION_ORDER`](Self::CREATION_ORDER).
    pub fn creation_rank(&self) -> usize {
        match self {
            Self::Credentials => 0,
            Self::Workload => 1,
            Self::Endpoint => 2,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret values packaged for storage in the credentials object.
///
/// Values are opaque bytes. `Debug` only prints the keys and the buffers are
/// wiped when the payload is dropped.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SecretPayload(BTreeMap<String, Vec<u8>>);

impl SecretPayload {
    /// Create a payload from a key/bytes map.
    pub fn new(data: BTreeMap<String, Vec<u8>>) -> Self {
        Self(data)
    }

    /// Get the raw bytes stored under `key`.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Iterate over the payload keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretPayload")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Drop for SecretPayload {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            value.zeroize();
        }
    }
}

/// A rendered, immutable resource specification.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    kind: ResourceKind,
    name: String,
    manifest: serde_json::Value,
    payload: Option<SecretPayload>,
}

impl ResourceSpec {
    /// Create a spec from a rendered manifest.
    pub fn new(kind: ResourceKind, name: impl Into<String>, manifest: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            manifest,
            payload: None,
        }
    }

    /// Attach the secret payload (credentials specs only).
    pub fn with_payload(mut self, payload: SecretPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Resource kind.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Backend object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rendered manifest without secret values.
    pub fn manifest(&self) -> &serde_json::Value {
        &self.manifest
    }

    /// Secret payload, if attached.
    pub fn payload(&self) -> Option<&SecretPayload> {
        self.payload.as_ref()
    }
}

/// Handle to a resource that exists in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Object name.
    pub name: String,
    /// Namespace the object lives in.
    pub namespace: String,
    /// Backend-assigned unique id, if the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// The three specs of one instance.
#[derive(Debug, Clone)]
pub struct RenderedResources {
    /// Credentials object spec (carries the secret payload).
    pub credentials: ResourceSpec,
    /// Workload spec.
    pub workload: ResourceSpec,
    /// Endpoint spec.
    pub endpoint: ResourceSpec,
}

impl RenderedResources {
    /// The specs in the order they must be created.
    pub fn in_creation_order(&self) -> [&ResourceSpec; 3] {
        [&self.credentials, &self.workload, &self.endpoint]
    }
}
