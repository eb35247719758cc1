// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic resource naming.
//!
//! A resource name is `{service_id}-{instance_id}`. Service ids may not contain
//! the separator, so the first `-` of a name always splits it back into the
//! two ids and distinct inputs never produce the same name.
//!
//! Names must be valid DNS-1035 labels because the endpoint is a cluster
//! `Service`: lowercase alphanumerics and `-`, starting with a letter, ending
//! alphanumeric, at most [`MAX_NAME_LENGTH`] characters.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BrokerError, Result};

/// Maximum length of a backend object name.
pub const MAX_NAME_LENGTH: usize = 63;

/// Separator between service id and instance id.
pub const SEPARATOR: char = '-';

/// A validated backend object name shared by all resources of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the name and return the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the resource name for an instance.
///
/// Pure and deterministic. Fails with [`BrokerError::InvalidIdentifier`] when
/// either id breaks the naming rules or the composed name is too long.
pub fn resolve(service_id: &str, instance_id: &str) -> Result<ResourceName> {
    validate_service_id(service_id)?;
    validate_instance_id(instance_id)?;

    let name = format!("{}{}{}", service_id, SEPARATOR, instance_id);
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(
            "resource_name",
            &name,
            format!(
                "composed name is {} characters, limit is {}",
                name.len(),
                MAX_NAME_LENGTH
            ),
        ));
    }

    Ok(ResourceName(name))
}

/// Validate a service id: a lowercase letter followed by lowercase letters or digits.
pub fn validate_service_id(service_id: &str) -> Result<()> {
    let mut chars = service_id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        Some(_) => {
            return Err(invalid(
                "service_id",
                service_id,
                "must start with a lowercase letter",
            ));
        }
        None => return Err(invalid("service_id", service_id, "cannot be empty")),
    }

    if chars.any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit()) {
        return Err(invalid(
            "service_id",
            service_id,
            "may only contain lowercase letters and digits",
        ));
    }

    Ok(())
}

/// Validate an instance id: lowercase alphanumerics and hyphens, alphanumeric at both ends.
pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    if instance_id.is_empty() {
        return Err(invalid("instance_id", instance_id, "cannot be empty"));
    }

    if let Some(c) = instance_id
        .chars()
        .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != SEPARATOR)
    {
        return Err(invalid(
            "instance_id",
            instance_id,
            format!(
                "character {:?} not allowed, use lowercase letters, digits and hyphens",
                c
            ),
        ));
    }

    if instance_id.starts_with(SEPARATOR) || instance_id.ends_with(SEPARATOR) {
        return Err(invalid(
            "instance_id",
            instance_id,
            "cannot start or end with a hyphen",
        ));
    }

    Ok(())
}

fn invalid(field: &'static str, value: &str, reason: impl Into<String>) -> BrokerError {
    BrokerError::InvalidIdentifier {
        field,
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_resolve_concatenates_with_separator() {
        let name = resolve("postgres", "i1").unwrap();
        assert_eq!(name.as_str(), "postgres-i1");
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let id = "5f1c3a2e-8c9d-4b7a-a1f0-2d3e4c5b6a79";
        assert_eq!(resolve("redis", id).unwrap(), resolve("redis", id).unwrap());
    }

    #[test]
    fn test_resolve_is_injective() {
        let pairs = [
            ("redis", "a"),
            ("redis", "a-b"),
            ("redis", "ab"),
            ("redis", "b"),
            ("postgres", "a"),
            ("postgres", "a-b"),
            ("redis2", "a"),
            ("r", "edis-a"),
        ];

        let names: HashSet<String> = pairs
            .iter()
            .map(|(s, i)| resolve(s, i).unwrap().into_string())
            .collect();
        assert_eq!(names.len(), pairs.len());
    }

    #[test]
    fn test_service_id_with_separator_rejected() {
        let err = resolve("my-redis", "i1").unwrap_err();
        assert!(matches!(
            err,
            BrokerError::InvalidIdentifier {
                field: "service_id",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_instance_ids() {
        for id in ["", "I1", "i_1", "i.1", "-i1", "i1-", "i 1"] {
            let err = resolve("redis", id).unwrap_err();
            assert!(
                matches!(
                    err,
                    BrokerError::InvalidIdentifier {
                        field: "instance_id",
                        ..
                    }
                ),
                "instance id {:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_invalid_service_ids() {
        for id in ["", "1redis", "Redis", "re_dis"] {
            assert!(validate_service_id(id).is_err(), "{:?} should be rejected", id);
        }
    }

    #[test]
    fn test_name_length_limit() {
        let at_limit = "a".repeat(MAX_NAME_LENGTH - "redis-".len());
        assert_eq!(resolve("redis", &at_limit).unwrap().as_str().len(), MAX_NAME_LENGTH);

        let too_long = format!("{}a", at_limit);
        let err = resolve("redis", &too_long).unwrap_err();
        assert!(matches!(
            err,
            BrokerError::InvalidIdentifier {
                field: "resource_name",
                ..
            }
        ));
    }

    #[test]
    fn test_guid_instance_ids_fit() {
        let name = resolve("postgres", "5f1c3a2e-8c9d-4b7a-a1f0-2d3e4c5b6a79").unwrap();
        assert!(name.as_str().len() <= MAX_NAME_LENGTH);
    }
}
