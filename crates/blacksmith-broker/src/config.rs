// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for blacksmith.

use std::path::PathBuf;

use crate::credentials::DEFAULT_PASSWORD_LENGTH;
use crate::naming::MAX_NAME_LENGTH;

/// Default namespace resources are created in.
pub const DEFAULT_NAMESPACE: &str = "blacksmith";

/// Broker configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace all instance resources are created in
    pub namespace: String,
    /// Directory with `<service>/<kind>.json` templates; embedded templates when unset
    pub template_dir: Option<PathBuf>,
    /// SQLite registry database; in-memory registry when unset
    pub database_path: Option<PathBuf>,
    /// Length of generated passwords
    pub password_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            template_dir: None,
            database_path: None,
            password_length: DEFAULT_PASSWORD_LENGTH,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let namespace = var("BLACKSMITH_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if !is_dns_label(&namespace) {
            return Err(ConfigError::InvalidValue {
                var: "BLACKSMITH_NAMESPACE",
                reason: "must be a lowercase DNS label of at most 63 characters",
            });
        }

        let template_dir = var("BLACKSMITH_TEMPLATE_DIR").map(PathBuf::from);
        let database_path = var("BLACKSMITH_DATABASE_PATH").map(PathBuf::from);

        let password_length = match var("BLACKSMITH_PASSWORD_LENGTH") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|len| (8..=128).contains(len))
                .ok_or(ConfigError::InvalidValue {
                    var: "BLACKSMITH_PASSWORD_LENGTH",
                    reason: "must be a number between 8 and 128",
                })?,
            None => DEFAULT_PASSWORD_LENGTH,
        };

        Ok(Self {
            namespace,
            template_dir,
            database_path,
            password_length,
        })
    }
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_NAME_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// An environment variable has an unusable value.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.namespace, "blacksmith");
        assert_eq!(config.password_length, 16);
    }

    #[test]
    fn test_all_variables() {
        let config = load(&[
            ("BLACKSMITH_NAMESPACE", "brokers"),
            ("BLACKSMITH_TEMPLATE_DIR", "/etc/blacksmith/templates"),
            ("BLACKSMITH_DATABASE_PATH", ".data/blacksmith.db"),
            ("BLACKSMITH_PASSWORD_LENGTH", "24"),
        ])
        .unwrap();

        assert_eq!(config.namespace, "brokers");
        assert_eq!(
            config.template_dir,
            Some(PathBuf::from("/etc/blacksmith/templates"))
        );
        assert_eq!(config.database_path, Some(PathBuf::from(".data/blacksmith.db")));
        assert_eq!(config.password_length, 24);
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let config = load(&[("BLACKSMITH_NAMESPACE", ""), ("BLACKSMITH_DATABASE_PATH", " ")]).unwrap();
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_invalid_values() {
        for (var, value) in [
            ("BLACKSMITH_NAMESPACE", "Brokers"),
            ("BLACKSMITH_NAMESPACE", "-brokers"),
            ("BLACKSMITH_PASSWORD_LENGTH", "four"),
            ("BLACKSMITH_PASSWORD_LENGTH", "4"),
        ] {
            let err = load(&[(var, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { var: v, .. } if v == var),
                "{}={} should be rejected",
                var,
                value
            );
        }
    }
}
