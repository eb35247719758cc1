// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for the instance registry.
//!
//! Backends store [`InstanceRecord`]s only. Locking, ownership checks and
//! state transitions belong to [`InstanceRegistry`](crate::registry::InstanceRegistry).

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::InstanceRecord;

/// Storage for instance records.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Persistence type identifier (e.g., "memory", "sqlite").
    fn persistence_type(&self) -> &'static str;

    /// Load one record.
    async fn get_instance(&self, service_id: &str, instance_id: &str)
    -> Result<Option<InstanceRecord>>;

    /// Insert a record or replace the one with the same identity.
    async fn upsert_instance(&self, record: &InstanceRecord) -> Result<()>;

    /// Delete a record. Returns whether it existed.
    async fn delete_instance(&self, service_id: &str, instance_id: &str) -> Result<bool>;

    /// List records, optionally for one service, sorted by service id then
    /// instance id.
    async fn list_instances(&self, service_id: Option<&str>) -> Result<Vec<InstanceRecord>>;

    /// Find the record that owns a resource name.
    async fn find_by_resource_name(&self, resource_name: &str) -> Result<Option<InstanceRecord>>;
}
