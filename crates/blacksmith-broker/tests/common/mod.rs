// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for blacksmith-broker integration tests.
//!
//! Provides TestContext wiring a Broker to a MockBackend and a seeded
//! credential generator.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use blacksmith_broker::backend::MockBackend;
use blacksmith_broker::credentials::CredentialGenerator;
use blacksmith_broker::persistence::Persistence;
use blacksmith_broker::{
    BindRequest, Binding, Broker, ProvisionRequest, ProvisionedInstance, Result, ServiceBroker,
};
use tokio_util::sync::CancellationToken;

/// Namespace used by every test broker.
pub const NAMESPACE: &str = "blacksmith-test";

/// Seed for the credential generator.
pub const SEED: u64 = 0x5eed;

/// Broker plus the mock backend it talks to.
pub struct TestContext {
    pub broker: Arc<Broker>,
    pub backend: Arc<MockBackend>,
}

impl TestContext {
    /// Broker with an in-memory registry and an always-succeeding backend.
    pub fn new() -> Self {
        Self::with_backend(MockBackend::new())
    }

    /// Broker whose backend sleeps inside every call.
    pub fn with_delay(delay: Duration) -> Self {
        Self::with_backend(MockBackend::with_delay(delay))
    }

    /// Broker over a given backend.
    pub fn with_backend(backend: MockBackend) -> Self {
        let backend = Arc::new(backend);
        let broker = Broker::builder()
            .backend(backend.clone())
            .namespace(NAMESPACE)
            .credential_generator(CredentialGenerator::seeded(SEED))
            .build()
            .expect("Failed to build broker");

        Self {
            broker: Arc::new(broker),
            backend,
        }
    }

    /// Broker over a given persistence backend.
    pub fn with_persistence(persistence: Arc<dyn Persistence>) -> Self {
        let backend = Arc::new(MockBackend::new());
        let broker = Broker::builder()
            .backend(backend.clone())
            .persistence(persistence)
            .namespace(NAMESPACE)
            .credential_generator(CredentialGenerator::seeded(SEED))
            .build()
            .expect("Failed to build broker");

        Self {
            broker: Arc::new(broker),
            backend,
        }
    }

    /// Provision with a fresh, never-cancelled token.
    pub async fn provision(
        &self,
        service_id: &str,
        instance_id: &str,
        plan_id: &str,
    ) -> Result<ProvisionedInstance> {
        self.broker
            .provision(
                &ProvisionRequest::new(service_id, instance_id, plan_id),
                &CancellationToken::new(),
            )
            .await
    }

    /// Bind with a fixed binding id.
    pub async fn bind(&self, service_id: &str, instance_id: &str) -> Result<Binding> {
        self.broker
            .bind(&BindRequest::new(service_id, instance_id, "binding-1"))
            .await
    }
}

/// A realistic platform-assigned instance id.
pub fn guid() -> String {
    uuid::Uuid::new_v4().to_string()
}
