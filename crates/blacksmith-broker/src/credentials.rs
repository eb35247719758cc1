// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential generation.
//!
//! Credentials are minted once per instance during provisioning, stored in the
//! credentials object and the registry, and read back verbatim on bind. The
//! generator never retries on its own: an unavailable entropy source surfaces
//! as [`CredentialError::EntropyUnavailable`] and the caller decides.
//!
//! Secret values never leave this module through `Debug` or `Display`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;
use zeroize::Zeroize;

use crate::resource::SecretPayload;

/// Default length of generated passwords.
pub const DEFAULT_PASSWORD_LENGTH: usize = 16;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!#%()*+,-.:=?@[]^_{}~";

/// Errors from credential generation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// The entropy source could not be initialized.
    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    /// The policy cannot be satisfied.
    #[error("Invalid policy for field '{field}': {reason}")]
    InvalidPolicy {
        /// Field the policy belongs to.
        field: String,
        /// Why it cannot be satisfied.
        reason: String,
    },
}

/// Character-class requirements for a generated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    /// Total length.
    pub length: usize,
    /// Minimum number of digits.
    pub min_digits: usize,
    /// Minimum number of symbols.
    pub min_symbols: usize,
    /// Whether uppercase letters are used. When set, at least one is included.
    pub allow_uppercase: bool,
}

impl PasswordPolicy {
    /// Mixed-case password with at least two digits and no symbols.
    pub fn password(length: usize) -> Self {
        Self {
            length,
            min_digits: 2,
            min_symbols: 0,
            allow_uppercase: true,
        }
    }

    /// Lowercase letters only, safe to use as a database role name.
    pub fn username(length: usize) -> Self {
        Self {
            length,
            min_digits: 0,
            min_symbols: 0,
            allow_uppercase: false,
        }
    }

    fn validate(&self, field: &str) -> Result<(), CredentialError> {
        let required = self.min_digits + self.min_symbols + 1 + usize::from(self.allow_uppercase);
        if self.length < required {
            return Err(CredentialError::InvalidPolicy {
                field: field.to_string(),
                reason: format!(
                    "length {} is shorter than the {} characters the minimums require",
                    self.length, required
                ),
            });
        }
        Ok(())
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::password(DEFAULT_PASSWORD_LENGTH)
    }
}

/// How the value of one credential field is produced.
///
/// `Debug` never shows a `Fixed` value.
#[derive(Clone, PartialEq, Eq)]
pub enum FieldPolicy {
    /// A pre-supplied value, stored as is.
    Fixed(String),
    /// A random value meeting the policy.
    Generated(PasswordPolicy),
}

impl fmt::Debug for FieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(_) => f.write_str("Fixed(<redacted>)"),
            Self::Generated(policy) => f.debug_tuple("Generated").field(policy).finish(),
        }
    }
}

/// The set of credential fields a service needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CredentialPolicy {
    fields: BTreeMap<String, FieldPolicy>,
}

impl CredentialPolicy {
    /// Create an empty policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field with a pre-supplied value.
    pub fn fixed(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .insert(name.into(), FieldPolicy::Fixed(value.into()));
        self
    }

    /// Add a generated field.
    pub fn generated(mut self, name: impl Into<String>, policy: PasswordPolicy) -> Self {
        self.fields
            .insert(name.into(), FieldPolicy::Generated(policy));
        self
    }

    /// Override the length of the generated `password` field, if any.
    pub fn with_password_length(mut self, length: usize) -> Self {
        if let Some(FieldPolicy::Generated(policy)) = self.fields.get_mut("password") {
            policy.length = length;
        }
        self
    }

    /// Names of all fields, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Whether the policy defines `name`.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

/// Generated or supplied credential values for one instance.
///
/// `Debug` prints field names only and values are wiped on drop.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialBundle(BTreeMap<String, String>);

impl CredentialBundle {
    /// Create a bundle from field values.
    pub fn from_fields(fields: BTreeMap<String, String>) -> Self {
        Self(fields)
    }

    /// Value of a field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Field names, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterate over `(field, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bundle has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Package the values for storage in the credentials object.
    pub fn to_resource_payload(&self) -> SecretPayload {
        to_resource_payload(self)
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("fields", &self.0.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Drop for CredentialBundle {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            value.zeroize();
        }
    }
}

/// Package bundle values verbatim as an opaque byte map.
pub fn to_resource_payload(bundle: &CredentialBundle) -> SecretPayload {
    SecretPayload::new(
        bundle
            .0
            .iter()
            .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
            .collect(),
    )
}

enum EntropySource {
    Os,
    Seeded(Mutex<StdRng>),
}

/// Produces [`CredentialBundle`]s from a [`CredentialPolicy`].
pub struct CredentialGenerator {
    source: EntropySource,
}

impl Default for CredentialGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialGenerator {
    /// Generator backed by the operating system's entropy source.
    pub fn new() -> Self {
        Self {
            source: EntropySource::Os,
        }
    }

    /// Deterministic generator for tests. Two generators with the same seed
    /// produce the same sequence of bundles.
    pub fn seeded(seed: u64) -> Self {
        Self {
            source: EntropySource::Seeded(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Generate a bundle satisfying `policy`.
    pub fn generate(&self, policy: &CredentialPolicy) -> Result<CredentialBundle, CredentialError> {
        for (name, field) in &policy.fields {
            if let FieldPolicy::Generated(p) = field {
                p.validate(name)?;
            }
        }

        match &self.source {
            EntropySource::Os => {
                let mut rng = StdRng::try_from_os_rng()
                    .map_err(|e| CredentialError::EntropyUnavailable(e.to_string()))?;
                Ok(fill_bundle(&mut rng, policy))
            }
            EntropySource::Seeded(rng) => {
                let mut rng = rng.lock().map_err(|_| {
                    CredentialError::EntropyUnavailable("seeded generator poisoned".to_string())
                })?;
                Ok(fill_bundle(&mut *rng, policy))
            }
        }
    }
}

fn fill_bundle<R: Rng + ?Sized>(rng: &mut R, policy: &CredentialPolicy) -> CredentialBundle {
    let fields = policy
        .fields
        .iter()
        .map(|(name, field)| {
            let value = match field {
                FieldPolicy::Fixed(value) => value.clone(),
                FieldPolicy::Generated(p) => generate_value(rng, p),
            };
            (name.clone(), value)
        })
        .collect();
    CredentialBundle(fields)
}

fn generate_value<R: Rng + ?Sized>(rng: &mut R, policy: &PasswordPolicy) -> String {
    let mut chars: Vec<u8> = Vec::with_capacity(policy.length);

    for _ in 0..policy.min_digits {
        chars.push(pick(rng, DIGITS));
    }
    for _ in 0..policy.min_symbols {
        chars.push(pick(rng, SYMBOLS));
    }
    chars.push(pick(rng, LOWERCASE));
    if policy.allow_uppercase {
        chars.push(pick(rng, UPPERCASE));
    }

    let letters: Vec<u8> = if policy.allow_uppercase {
        [LOWERCASE, UPPERCASE].concat()
    } else {
        LOWERCASE.to_vec()
    };
    while chars.len() < policy.length {
        chars.push(pick(rng, &letters));
    }

    chars.shuffle(rng);

    let value = chars.iter().map(|b| char::from(*b)).collect();
    chars.zeroize();
    value
}

fn pick<R: Rng + ?Sized>(rng: &mut R, alphabet: &[u8]) -> u8 {
    alphabet[rng.random_range(0..alphabet.len())]
}
