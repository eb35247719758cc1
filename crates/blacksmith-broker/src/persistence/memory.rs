// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::Persistence;
use crate::error::Result;
use crate::registry::InstanceRecord;

/// Records kept in process memory, grouped by service id.
///
/// Contents are lost on restart.
#[derive(Default)]
pub struct MemoryPersistence {
    services: RwLock<BTreeMap<String, BTreeMap<String, InstanceRecord>>>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    fn persistence_type(&self) -> &'static str {
        "memory"
    }

    async fn get_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<Option<InstanceRecord>> {
        let services = self.services.read().await;
        Ok(services
            .get(service_id)
            .and_then(|instances| instances.get(instance_id))
            .cloned())
    }

    async fn upsert_instance(&self, record: &InstanceRecord) -> Result<()> {
        let mut services = self.services.write().await;
        services
            .entry(record.service_id.clone())
            .or_default()
            .insert(record.instance_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_instance(&self, service_id: &str, instance_id: &str) -> Result<bool> {
        let mut services = self.services.write().await;
        let Some(instances) = services.get_mut(service_id) else {
            return Ok(false);
        };

        let existed = instances.remove(instance_id).is_some();
        if instances.is_empty() {
            services.remove(service_id);
        }
        Ok(existed)
    }

    async fn list_instances(&self, service_id: Option<&str>) -> Result<Vec<InstanceRecord>> {
        let services = self.services.read().await;
        let records = match service_id {
            Some(service_id) => services
                .get(service_id)
                .map(|instances| instances.values().cloned().collect())
                .unwrap_or_default(),
            None => services
                .values()
                .flat_map(|instances| instances.values().cloned())
                .collect(),
        };
        Ok(records)
    }

    async fn find_by_resource_name(&self, resource_name: &str) -> Result<Option<InstanceRecord>> {
        let services = self.services.read().await;
        Ok(services
            .values()
            .flat_map(|instances| instances.values())
            .find(|r| r.resource_name == resource_name)
            .cloned())
    }
}
