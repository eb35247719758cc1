// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the broker over the SQLite registry.

mod common;

use std::sync::Arc;

use blacksmith_broker::backend::MockBackend;
use blacksmith_broker::persistence::SqlitePersistence;
use blacksmith_broker::{Broker, InstanceStatus, ServiceBroker};
use common::*;

#[tokio::test]
async fn test_lifecycle_over_sqlite() {
    let persistence = SqlitePersistence::in_memory()
        .await
        .expect("Failed to open SQLite registry");
    let ctx = TestContext::with_persistence(Arc::new(persistence));
    assert_eq!(ctx.broker.registry().persistence_type(), "sqlite");

    let provisioned = ctx.provision("postgres", "i1", "postgres-poc").await.unwrap();

    let record = ctx.broker.registry().lookup("postgres", "i1").await.unwrap();
    assert_eq!(record.status, InstanceStatus::Active);
    assert_eq!(record.resources, provisioned.resources);

    let binding = ctx.bind("postgres", "i1").await.unwrap();
    let stored = ctx
        .backend
        .payload_for(NAMESPACE, blacksmith_broker::ResourceKind::Credentials, "postgres-i1")
        .await
        .expect("credentials resource should carry a payload");
    for (field, value) in binding.credentials.iter() {
        assert_eq!(stored.get(field), Some(value.as_bytes()));
    }

    ctx.broker.deprovision("postgres", "i1").await.unwrap();
    assert!(ctx.broker.all_instances().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("registry").join("blacksmith.db");
    let id = guid();

    let credentials = {
        let persistence = SqlitePersistence::from_path(&db_path).await.unwrap();
        let ctx = TestContext::with_persistence(Arc::new(persistence));
        ctx.provision("redis", &id, "redis-poc").await.unwrap();
        ctx.bind("redis", &id).await.unwrap().credentials
    };

    // New process: same database, fresh backend connection.
    let backend = Arc::new(MockBackend::new());
    let broker = Broker::builder()
        .backend(backend.clone())
        .persistence(Arc::new(SqlitePersistence::from_path(&db_path).await.unwrap()))
        .namespace(NAMESPACE)
        .build()
        .unwrap();

    assert_eq!(broker.instances("redis").await.unwrap(), vec![id.clone()]);

    let binding = broker
        .bind(&blacksmith_broker::BindRequest::new("redis", &id, "binding-2"))
        .await
        .unwrap();
    assert_eq!(binding.credentials, credentials);

    // The fresh backend never saw the resources, so every delete is a
    // not-found and teardown still completes.
    broker.deprovision("redis", &id).await.unwrap();
    assert_eq!(backend.delete_count().await, 3);
    assert!(broker.instances("redis").await.unwrap().is_empty());
}
