use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A guardian's credential binding to one third-party platform for one family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub id: Uuid,
    pub family_id: Uuid,
    pub platform_id: String,
    pub credentials: Credentials,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

/// Only `Verified` accounts are ever enforced against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Verified,
    Unverified,
    Revoked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Unverified => "unverified",
            Self::Revoked => "revoked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "verified" => Some(Self::Verified),
            "unverified" => Some(Self::Unverified),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Input for linking a platform account to a family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkAccountInput {
    pub family_id: Uuid,
    pub platform_id: String,
    pub credentials: Credentials,
    pub status: AccountStatus,
}

/// Opaque per-platform key/value credential bag.
///
/// The core passes it through to the adapter untouched. Its `Debug` output
/// shows key names and a short value prefix only, so it is safe to log.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

const VISIBLE_PREFIX: usize = 4;

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Diagnostic form: `{api_key=abcd…, profile=ab12…}`.
    pub fn redacted(&self) -> String {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", k, redact(v)))
            .collect();
        format!("{{{}}}", parts.join(", "))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Truncate a secret to a short prefix for logs.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(VISIBLE_PREFIX).collect();
    if secret.chars().count() > VISIBLE_PREFIX {
        format!("{}…", prefix)
    } else {
        "…".to_string()
    }
}
