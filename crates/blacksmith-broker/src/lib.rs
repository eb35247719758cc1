// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blacksmith Broker - Service Instance Provisioning
//!
//! This crate is the control path of a service broker. Given a request to
//! instantiate or remove a named service (`redis`, `postgres`) it creates,
//! tracks and tears down the three backing resources of the instance on a
//! cluster backend, and hands back connection credentials on demand.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Broker protocol adapter (external)                   │
//! │                 HTTP, auth, routing -> ServiceBroker trait              │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    blacksmith-broker (This Crate)                       │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │                Lifecycle Manager (lifecycle::Broker)              │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │        │              │                 │                   │           │
//! │        ▼              ▼                 ▼                   ▼           │
//! │  ┌───────────┐  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ Instance  │  │ Credential │  │   Naming &   │  │     Resource     │  │
//! │  │ Registry  │  │  Manager   │  │  Templates   │  │   Provisioner    │  │
//! │  └───────────┘  └────────────┘  └──────────────┘  └──────────────────┘  │
//! │        │                                                    │           │
//! └────────┼────────────────────────────────────────────────────┼───────────┘
//!          ▼                                                    ▼
//! ┌──────────────────┐                          ┌──────────────────────────┐
//! │ Memory / SQLite  │                          │ Cluster backend          │
//! │ (InstanceRecord) │                          │ Secret/Deployment/Service│
//! └──────────────────┘                          └──────────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Mutates | Description |
//! |-----------|---------|-------------|
//! | `provision` | yes | Create credentials → workload → endpoint, compensate on failure |
//! | `deprovision` | yes | Delete endpoint → workload → credentials, tolerate absent objects |
//! | `bind` | no | Return the credentials minted at provision time |
//! | `unbind` / `update` | no | Accepted without changes |
//! | `last_operation` / `last_binding_operation` | no | Always succeeded, operations are synchronous |
//! | `get_instance` | no | Instance summary without credentials |
//!
//! Provision and Deprovision of the same instance never run concurrently;
//! different instances never wait on each other.
//!
//! # Resources
//!
//! Every instance owns one resource of each kind, all named
//! `{service_id}-{instance_id}` and labelled `created-by: blacksmith`,
//! `service: <name>`:
//!
//! | Kind | Manifest | Notes |
//! |------|----------|-------|
//! | credentials | `Secret` | Holds the generated credential fields |
//! | workload | `Deployment` | Env vars reference the secret by name and key |
//! | endpoint | `Service` | Selects the workload pods by the `service` label |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `BLACKSMITH_NAMESPACE` | No | `blacksmith` | Namespace for instance resources |
//! | `BLACKSMITH_TEMPLATE_DIR` | No | embedded | Directory with `<service>/<kind>.json` templates |
//! | `BLACKSMITH_DATABASE_PATH` | No | in-memory | SQLite file for the registry |
//! | `BLACKSMITH_PASSWORD_LENGTH` | No | `16` | Generated password length |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use blacksmith_broker::{Broker, ProvisionRequest, ServiceBroker};
//! use tokio_util::sync::CancellationToken;
//!
//! let broker = Broker::builder()
//!     .backend(Arc::new(my_cluster_client))
//!     .build()?;
//!
//! let instance = broker
//!     .provision(&ProvisionRequest::new("postgres", "i1", "postgres-poc"), &CancellationToken::new())
//!     .await?;
//! assert_eq!(instance.resource_name, "postgres-i1");
//! ```

#![deny(missing_docs)]

/// Cluster backend trait and the in-memory mock backend.
pub mod backend;

/// Service catalog and per-service credential policies.
pub mod catalog;

/// Configuration loaded from environment variables.
pub mod config;

/// Credential generation and secret payload packaging.
pub mod credentials;

/// Error types for broker operations.
pub mod error;

/// Provision, Deprovision and Bind state machine.
pub mod lifecycle;

/// Deterministic resource naming.
pub mod naming;

/// Registry persistence backends (memory, SQLite).
pub mod persistence;

/// Ordered resource creation and teardown with compensation.
pub mod provisioner;

/// Instance registry with per-instance mutation guards.
pub mod registry;

/// Resource kinds, rendered specs and backend handles.
pub mod resource;

/// Per-service resource templates.
pub mod template;

pub use backend::{BackendError, ClusterBackend, MockBackend};
pub use catalog::{Catalog, ServiceOffering, ServicePlan};
pub use config::Config;
pub use credentials::{CredentialBundle, CredentialGenerator, CredentialPolicy, PasswordPolicy};
pub use error::{BrokerError, Result};
pub use lifecycle::{
    BindRequest, Binding, Broker, BrokerBuilder, InstanceSummary, LastOperation, OperationState,
    ProvisionRequest, ProvisionedInstance, ServiceBroker,
};
pub use registry::{InstanceRecord, InstanceRegistry, InstanceStatus};
pub use resource::{ResourceKind, ResourceRef};
