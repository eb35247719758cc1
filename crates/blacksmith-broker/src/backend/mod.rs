// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster backend module - where instance resources are materialized.

pub mod mock;
mod traits;

pub use mock::MockBackend;
pub use traits::*;
