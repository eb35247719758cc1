// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backend for testing.
//!
//! Keeps created resources in memory, records every call in order and lets
//! tests inject failures per resource kind.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::traits::*;
use crate::resource::{ResourceKind, ResourceRef, ResourceSpec, SecretPayload};

/// A backend call as observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `create` was called.
    Create {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
    },
    /// `delete` was called.
    Delete {
        /// Resource kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
    },
}

impl BackendCall {
    /// Resource kind the call targeted.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Create { kind, .. } | Self::Delete { kind, .. } => *kind,
        }
    }

    /// Whether this is a create call.
    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. })
    }
}

/// A stored mock object.
#[derive(Debug, Clone)]
struct MockResource {
    uid: String,
    manifest: Value,
    payload: Option<SecretPayload>,
}

type ObjectKey = (String, ResourceKind, String);

#[derive(Default)]
struct MockState {
    objects: BTreeMap<ObjectKey, MockResource>,
    calls: Vec<BackendCall>,
    create_failures: HashMap<ResourceKind, BackendError>,
    delete_failures: HashMap<ResourceKind, BackendError>,
    cancel_after_create: HashMap<ResourceKind, CancellationToken>,
    next_uid: u64,
}

/// Mock backend for testing.
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    /// Delay applied to every call, to widen race windows in tests.
    pub call_delay: Duration,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a mock backend where every call succeeds immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            call_delay: Duration::ZERO,
        }
    }

    /// Create a mock backend that sleeps for `delay` inside every call.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            call_delay: delay,
            ..Self::new()
        }
    }

    /// Make every `create` of `kind` fail with `error` until cleared.
    pub async fn fail_create(&self, kind: ResourceKind, error: BackendError) {
        self.state.lock().await.create_failures.insert(kind, error);
    }

    /// Make every `delete` of `kind` fail with `error` until cleared.
    pub async fn fail_delete(&self, kind: ResourceKind, error: BackendError) {
        self.state.lock().await.delete_failures.insert(kind, error);
    }

    /// Cancel `token` right after a successful `create` of `kind`.
    pub async fn cancel_after_create(&self, kind: ResourceKind, token: CancellationToken) {
        self.state
            .lock()
            .await
            .cancel_after_create
            .insert(kind, token);
    }

    /// Remove all injected failures and cancellation hooks.
    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.create_failures.clear();
        state.delete_failures.clear();
        state.cancel_after_create.clear();
    }

    /// Remove an object behind the broker's back, as an operator would.
    /// Not recorded as a call.
    pub async fn remove_out_of_band(&self, namespace: &str, kind: ResourceKind, name: &str) -> bool {
        self.state
            .lock()
            .await
            .objects
            .remove(&(namespace.to_string(), kind, name.to_string()))
            .is_some()
    }

    /// All calls in the order they were made.
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of `create` calls, including failed ones.
    pub async fn create_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_create())
            .count()
    }

    /// Number of `delete` calls, including failed ones.
    pub async fn delete_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| !c.is_create())
            .count()
    }

    /// Objects that currently exist.
    pub async fn live_resources(&self) -> Vec<ResourceRef> {
        self.state
            .lock()
            .await
            .objects
            .iter()
            .map(|((namespace, kind, name), obj)| ResourceRef {
                kind: *kind,
                name: name.clone(),
                namespace: namespace.clone(),
                uid: Some(obj.uid.clone()),
            })
            .collect()
    }

    /// Manifest of a live object.
    pub async fn manifest_for(&self, namespace: &str, kind: ResourceKind, name: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .objects
            .get(&(namespace.to_string(), kind, name.to_string()))
            .map(|obj| obj.manifest.clone())
    }

    /// Secret payload stored with a live object.
    pub async fn payload_for(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Option<SecretPayload> {
        self.state
            .lock()
            .await
            .objects
            .get(&(namespace.to_string(), kind, name.to_string()))
            .and_then(|obj| obj.payload.clone())
    }

    async fn pause(&self) {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
    }
}

#[async_trait]
impl ClusterBackend for MockBackend {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn create(&self, namespace: &str, spec: &ResourceSpec) -> Result<ResourceRef> {
        self.pause().await;

        let mut state = self.state.lock().await;
        state.calls.push(BackendCall::Create {
            kind: spec.kind(),
            name: spec.name().to_string(),
        });

        if let Some(err) = state.create_failures.get(&spec.kind()) {
            return Err(err.clone());
        }

        let key = (namespace.to_string(), spec.kind(), spec.name().to_string());
        if state.objects.contains_key(&key) {
            return Err(BackendError::AlreadyExists {
                kind: spec.kind(),
                name: spec.name().to_string(),
            });
        }

        state.next_uid += 1;
        let uid = format!("mock-{}", state.next_uid);
        state.objects.insert(
            key,
            MockResource {
                uid: uid.clone(),
                manifest: spec.manifest().clone(),
                payload: spec.payload().cloned(),
            },
        );

        if let Some(token) = state.cancel_after_create.get(&spec.kind()) {
            token.cancel();
        }

        Ok(ResourceRef {
            kind: spec.kind(),
            name: spec.name().to_string(),
            namespace: namespace.to_string(),
            uid: Some(uid),
        })
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<()> {
        self.pause().await;

        let mut state = self.state.lock().await;
        state.calls.push(BackendCall::Delete {
            kind,
            name: name.to_string(),
        });

        if let Some(err) = state.delete_failures.get(&kind) {
            return Err(err.clone());
        }

        match state
            .objects
            .remove(&(namespace.to_string(), kind, name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }
}
