// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::Persistence;
use crate::error::{BrokerError, Result};
use crate::registry::InstanceRecord;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const SELECT_INSTANCES: &str = r#"
    SELECT service_id, instance_id, plan_id, resource_name, status,
           parameters, credentials, resources, created_at, updated_at
    FROM service_instances
"#;

/// Row as stored; JSON columns are decoded into [`InstanceRecord`] fields.
#[derive(sqlx::FromRow)]
struct InstanceRow {
    service_id: String,
    instance_id: String,
    plan_id: String,
    resource_name: String,
    status: String,
    parameters: String,
    credentials: String,
    resources: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = BrokerError;

    fn try_from(row: InstanceRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse()?,
            parameters: serde_json::from_str(&row.parameters)?,
            credentials: serde_json::from_str(&row.credentials)?,
            resources: serde_json::from_str(&row.resources)?,
            service_id: row.service_id,
            instance_id: row.instance_id,
            plan_id: row.plan_id,
            resource_name: row.resource_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a SQLite registry database at `path`.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/blacksmith.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                BrokerError::Other(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Self::migrated(pool).await
    }

    /// Create a private in-memory database. Contents are lost when dropped.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self> {
        MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    fn persistence_type(&self) -> &'static str {
        "sqlite"
    }

    async fn get_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<Option<InstanceRecord>> {
        let sql = format!("{} WHERE service_id = ? AND instance_id = ?", SELECT_INSTANCES);
        let row = sqlx::query_as::<_, InstanceRow>(&sql)
            .bind(service_id)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(InstanceRecord::try_from).transpose()
    }

    async fn upsert_instance(&self, record: &InstanceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_instances
                (service_id, instance_id, plan_id, resource_name, status,
                 parameters, credentials, resources, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (service_id, instance_id) DO UPDATE SET
                plan_id = excluded.plan_id,
                resource_name = excluded.resource_name,
                status = excluded.status,
                parameters = excluded.parameters,
                credentials = excluded.credentials,
                resources = excluded.resources,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.service_id)
        .bind(&record.instance_id)
        .bind(&record.plan_id)
        .bind(&record.resource_name)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.parameters)?)
        .bind(serde_json::to_string(&record.credentials)?)
        .bind(serde_json::to_string(&record.resources)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_instance(&self, service_id: &str, instance_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM service_instances WHERE service_id = ? AND instance_id = ?")
                .bind(service_id)
                .bind(instance_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_instances(&self, service_id: Option<&str>) -> Result<Vec<InstanceRecord>> {
        let rows = match service_id {
            Some(service_id) => {
                let sql = format!(
                    "{} WHERE service_id = ? ORDER BY instance_id",
                    SELECT_INSTANCES
                );
                sqlx::query_as::<_, InstanceRow>(&sql)
                    .bind(service_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("{} ORDER BY service_id, instance_id", SELECT_INSTANCES);
                sqlx::query_as::<_, InstanceRow>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(InstanceRecord::try_from).collect()
    }

    async fn find_by_resource_name(&self, resource_name: &str) -> Result<Option<InstanceRecord>> {
        let sql = format!("{} WHERE resource_name = ?", SELECT_INSTANCES);
        let row = sqlx::query_as::<_, InstanceRow>(&sql)
            .bind(resource_name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(InstanceRecord::try_from).transpose()
    }
}
