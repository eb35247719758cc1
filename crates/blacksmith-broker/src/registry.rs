// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance registry.
//!
//! The registry is the authoritative record of which service instances exist
//! and which backend resources they own. Records live in a [`Persistence`]
//! backend; per-instance locks always live in process.
//!
//! Mutations go through a [`MutationGuard`]:
//!
//! ```text
//! begin_mutation(svc, id) ──► MutationGuard ──► lookup / commit / remove ──► drop
//!        │                                                                    │
//!        └── waits while another guard for (svc, id) is held      lock entry freed
//! ```
//!
//! Guards for different instances never block each other.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::credentials::CredentialBundle;
use crate::error::{BrokerError, Result};
use crate::persistence::{MemoryPersistence, Persistence};
use crate::resource::ResourceRef;

/// Identity of a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Catalog service id.
    pub service_id: String,
    /// Platform-assigned instance id.
    pub instance_id: String,
}

impl InstanceKey {
    /// Create a key.
    pub fn new(service_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_id, self.instance_id)
    }
}

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// A provisioning saga is running. Never persisted.
    Provisioning,
    /// All resources exist.
    Active,
    /// Teardown started and has not finished.
    Deprovisioning,
    /// Compensation or cleanup failed; the record lists the residual resources.
    Failed,
}

impl InstanceStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Deprovisioning => "deprovisioning",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "active" => Ok(Self::Active),
            "deprovisioning" => Ok(Self::Deprovisioning),
            "failed" => Ok(Self::Failed),
            other => Err(BrokerError::Other(format!(
                "unknown instance status '{}'",
                other
            ))),
        }
    }
}

/// A registered service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Catalog service id.
    pub service_id: String,
    /// Platform-assigned instance id.
    pub instance_id: String,
    /// Catalog plan id.
    pub plan_id: String,
    /// Provision parameters as supplied by the platform.
    pub parameters: serde_json::Value,
    /// Name shared by all backend resources of the instance.
    pub resource_name: String,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Credentials minted at provision time.
    pub credentials: CredentialBundle,
    /// Backend resources the instance still owns, in creation order.
    pub resources: Vec<ResourceRef>,
    /// When the instance was first committed.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// Identity of this record.
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.service_id, &self.instance_id)
    }
}

/// Exclusive right to mutate one instance.
///
/// Dropping the guard releases the instance and, when nobody else is waiting,
/// its lock entry. Entries left by waiters that gave up are pruned on the
/// next release of any guard.
pub struct MutationGuard {
    key: InstanceKey,
    locks: Arc<DashMap<InstanceKey, Arc<Mutex<()>>>>,
    _held: OwnedMutexGuard<()>,
}

impl MutationGuard {
    /// The instance this guard covers.
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    fn check(&self, service_id: &str, instance_id: &str) -> Result<()> {
        if self.key.service_id != service_id || self.key.instance_id != instance_id {
            return Err(BrokerError::Other(format!(
                "guard for {} used to mutate {}/{}",
                self.key, service_id, instance_id
            )));
        }
        Ok(())
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        // Our entry is referenced by the table and `_held`; anything more is a
        // waiter. Any other entry referenced only by the table was left by a
        // waiter that gave up, so it goes too.
        self.locks.retain(|key, lock| {
            let idle = if *key == self.key { 2 } else { 1 };
            Arc::strong_count(lock) > idle
        });
    }
}

impl fmt::Debug for MutationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationGuard")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Authoritative registry of service instances.
#[derive(Clone)]
pub struct InstanceRegistry {
    persistence: Arc<dyn Persistence>,
    locks: Arc<DashMap<InstanceKey, Arc<Mutex<()>>>>,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl InstanceRegistry {
    /// Create a registry over a persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Create an empty registry that lives only in process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPersistence::new()))
    }

    /// Persistence backend type.
    pub fn persistence_type(&self) -> &'static str {
        self.persistence.persistence_type()
    }

    /// Acquire the exclusive guard for an instance, waiting while another
    /// caller holds it.
    pub async fn begin_mutation(&self, service_id: &str, instance_id: &str) -> MutationGuard {
        let key = InstanceKey::new(service_id, instance_id);
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let held = lock.lock_owned().await;
        debug!(service_id = %service_id, instance_id = %instance_id, "Acquired instance guard");

        MutationGuard {
            key,
            locks: self.locks.clone(),
            _held: held,
        }
    }

    /// Number of instances with a held or awaited guard.
    pub fn active_locks(&self) -> usize {
        self.locks
            .iter()
            .filter(|entry| Arc::strong_count(entry.value()) > 1)
            .count()
    }

    /// Find an instance record.
    pub async fn lookup(&self, service_id: &str, instance_id: &str) -> Result<InstanceRecord> {
        self.persistence
            .get_instance(service_id, instance_id)
            .await?
            .ok_or_else(|| BrokerError::InstanceNotFound {
                service_id: service_id.to_string(),
                instance_id: instance_id.to_string(),
            })
    }

    /// Find an instance record, returning `None` when it is not registered.
    pub async fn find(&self, service_id: &str, instance_id: &str) -> Result<Option<InstanceRecord>> {
        self.persistence.get_instance(service_id, instance_id).await
    }

    /// Store a record. Requires the guard for the record's instance.
    ///
    /// Fails with [`BrokerError::AlreadyExists`] when a different instance
    /// already owns the record's resource name.
    pub async fn commit(&self, guard: &MutationGuard, record: InstanceRecord) -> Result<()> {
        guard.check(&record.service_id, &record.instance_id)?;

        if let Some(owner) = self
            .persistence
            .find_by_resource_name(&record.resource_name)
            .await?
            && owner.key() != record.key()
        {
            return Err(BrokerError::AlreadyExists {
                resource_name: record.resource_name,
                owner: owner.key().to_string(),
            });
        }

        debug!(
            service_id = %record.service_id,
            instance_id = %record.instance_id,
            status = %record.status,
            resources = record.resources.len(),
            "Committing instance record"
        );
        self.persistence.upsert_instance(&record).await
    }

    /// Remove a record. Requires the guard for the instance.
    ///
    /// Fails with [`BrokerError::InstanceNotFound`] when nothing is registered.
    pub async fn remove(
        &self,
        guard: &MutationGuard,
        service_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        guard.check(service_id, instance_id)?;

        if !self
            .persistence
            .delete_instance(service_id, instance_id)
            .await?
        {
            return Err(BrokerError::InstanceNotFound {
                service_id: service_id.to_string(),
                instance_id: instance_id.to_string(),
            });
        }

        debug!(service_id = %service_id, instance_id = %instance_id, "Removed instance record");
        Ok(())
    }

    /// Sorted instance ids registered for a service.
    pub async fn instances(&self, service_id: &str) -> Result<Vec<String>> {
        Ok(self
            .persistence
            .list_instances(Some(service_id))
            .await?
            .into_iter()
            .map(|r| r.instance_id)
            .collect())
    }

    /// Every registered record, sorted by service id then instance id.
    pub async fn all_instances(&self) -> Result<Vec<InstanceRecord>> {
        self.persistence.list_instances(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn record(service_id: &str, instance_id: &str) -> InstanceRecord {
        let now = Utc::now();
        let mut fields = BTreeMap::new();
        fields.insert("password".to_string(), "pw".to_string());
        InstanceRecord {
            service_id: service_id.to_string(),
            instance_id: instance_id.to_string(),
            plan_id: format!("{}-poc", service_id),
            parameters: serde_json::json!({}),
            resource_name: format!("{}-{}", service_id, instance_id),
            status: InstanceStatus::Active,
            credentials: CredentialBundle::from_fields(fields),
            resources: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_commit_lookup_remove() {
        let registry = InstanceRegistry::in_memory();

        let guard = registry.begin_mutation("redis", "i1").await;
        registry.commit(&guard, record("redis", "i1")).await.unwrap();
        drop(guard);

        let found = registry.lookup("redis", "i1").await.unwrap();
        assert_eq!(found.resource_name, "redis-i1");
        assert_eq!(registry.instances("redis").await.unwrap(), vec!["i1"]);

        let guard = registry.begin_mutation("redis", "i1").await;
        registry.remove(&guard, "redis", "i1").await.unwrap();

        let err = registry.lookup("redis", "i1").await.unwrap_err();
        assert!(matches!(err, BrokerError::InstanceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_missing_instance() {
        let registry = InstanceRegistry::in_memory();
        let guard = registry.begin_mutation("redis", "ghost").await;
        let err = registry.remove(&guard, "redis", "ghost").await.unwrap_err();
        assert_eq!(err.error_code(), "INSTANCE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_guard_for_other_instance_rejected() {
        let registry = InstanceRegistry::in_memory();
        let guard = registry.begin_mutation("redis", "i1").await;
        let err = registry.commit(&guard, record("redis", "i2")).await.unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert!(registry.find("redis", "i2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resource_name_owned_by_other_instance() {
        let registry = InstanceRegistry::in_memory();

        let guard = registry.begin_mutation("redis", "i1").await;
        registry.commit(&guard, record("redis", "i1")).await.unwrap();
        drop(guard);

        let mut clash = record("redis", "i2");
        clash.resource_name = "redis-i1".to_string();
        let guard = registry.begin_mutation("redis", "i2").await;
        let err = registry.commit(&guard, clash).await.unwrap_err();
        assert!(matches!(err, BrokerError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_recommit_same_instance_updates() {
        let registry = InstanceRegistry::in_memory();
        let guard = registry.begin_mutation("redis", "i1").await;
        registry.commit(&guard, record("redis", "i1")).await.unwrap();

        let mut updated = record("redis", "i1");
        updated.status = InstanceStatus::Deprovisioning;
        registry.commit(&guard, updated).await.unwrap();
        drop(guard);

        let found = registry.lookup("redis", "i1").await.unwrap();
        assert_eq!(found.status, InstanceStatus::Deprovisioning);
    }

    #[tokio::test]
    async fn test_same_instance_is_serialized() {
        let registry = InstanceRegistry::in_memory();
        let first = registry.begin_mutation("redis", "i1").await;

        let contender = registry.clone();
        let mut waiter =
            tokio::spawn(async move { contender.begin_mutation("redis", "i1").await });

        let blocked = tokio::time::timeout(Duration::from_millis(50), &mut waiter).await;
        assert!(blocked.is_err(), "second guard acquired while first was held");

        drop(first);
        let second = waiter.await.unwrap();
        assert_eq!(second.key(), &InstanceKey::new("redis", "i1"));
    }

    #[tokio::test]
    async fn test_different_instances_do_not_block() {
        let registry = InstanceRegistry::in_memory();
        let _first = registry.begin_mutation("redis", "i1").await;

        let other = tokio::time::timeout(
            Duration::from_millis(50),
            registry.begin_mutation("redis", "i2"),
        )
        .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let registry = InstanceRegistry::in_memory();
        {
            let _a = registry.begin_mutation("redis", "i1").await;
            let _b = registry.begin_mutation("postgres", "i1").await;
            assert_eq!(registry.active_locks(), 2);
        }
        assert_eq!(registry.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_entry_is_pruned() {
        let registry = InstanceRegistry::in_memory();
        let holder = registry.begin_mutation("redis", "i1").await;

        let mut waiter = Box::pin(registry.begin_mutation("redis", "i1"));
        assert!(futures::poll!(waiter.as_mut()).is_pending());

        // The holder leaves while the waiter still counts, then the waiter
        // gives up without ever being polled again.
        drop(holder);
        drop(waiter);
        assert_eq!(registry.locks.len(), 1);
        assert_eq!(registry.active_locks(), 0);

        drop(registry.begin_mutation("postgres", "i1").await);
        assert!(registry.locks.is_empty());

        // The instance is still lockable afterwards.
        let again = tokio::time::timeout(
            Duration::from_millis(50),
            registry.begin_mutation("redis", "i1"),
        )
        .await;
        assert!(again.is_ok());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            InstanceStatus::Provisioning,
            InstanceStatus::Active,
            InstanceStatus::Deprovisioning,
            InstanceStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert!("gone".parse::<InstanceStatus>().is_err());
    }
}
