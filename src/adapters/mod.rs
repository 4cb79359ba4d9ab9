//! Platform adapters.
//!
//! An adapter translates canonical [`Rule`]s into one vendor's API calls.
//! Every adapter implements [`Adapter`]; concrete vendors live in their own
//! modules and are registered into an [`AdapterRegistry`] at startup.
//!
//! # Translation
//!
//! Each vendor owns a private, static mapping from rule category to vendor
//! *primitives* (one filter toggle, one denylist entry, one schedule). The
//! shared [`drive`] loop walks the rule set in order and
//!
//! - skips disabled rules and categories the vendor has no mapping for,
//! - writes each primitive at most once per invocation, even when several
//!   categories map onto it, using the value from the last rule that sets it,
//! - counts a rule as failed when any primitive it maps onto fails, including
//!   one shared with another rule, without stopping the remaining writes.
//!
//! Only auth-kind errors abort an invocation, since every later call would
//! be rejected the same way.

mod error;
pub mod bark;
pub mod http;
pub mod nextdns;
pub mod qustodio;
mod registry;

pub use error::AdapterError;
pub use registry::{AdapterRegistry, RegistryError};

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Capability, ChildMeta, Credentials, Rule};

/// Identity and metadata of a platform integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub id: String,
    pub name: String,
    pub kind: PlatformKind,
    pub auth: AuthKind,
    pub website: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    DnsFilter,
    Monitoring,
    DeviceAgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    ApiKey,
    BearerToken,
    #[serde(rename = "oauth2")]
    OAuth2,
}

/// Counts and per-category detail from one `enforce_policy` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub rules_applied: u32,
    pub rules_skipped: u32,
    pub rules_failed: u32,
    pub details: BTreeMap<String, String>,
}

/// A webhook subscription created on the vendor side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub platform_id: String,
    pub webhook_id: String,
    pub callback_url: String,
}

/// Construction-time settings shared by the HTTP adapters.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub base_url: String,
    pub timeout: Duration,
    /// Replaces the adapter's default capability table when set.
    pub capabilities: Option<Vec<Capability>>,
}

impl AdapterSettings {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            capabilities: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}

/// The contract every platform integration satisfies.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn info(&self) -> &PlatformInfo;

    /// Declared support per category. Pure; no I/O.
    fn capabilities(&self) -> &[Capability];

    /// One read-only vendor call. Distinguishes a bad credential
    /// ([`AdapterError::is_auth`]) from the vendor being unreachable.
    async fn validate_auth(&self, credentials: &Credentials) -> Result<(), AdapterError>;

    /// Apply every enabled rule this adapter understands. Safe to repeat.
    async fn enforce_policy(
        &self,
        rules: &[Rule],
        credentials: &Credentials,
        child: &ChildMeta,
    ) -> Result<EnforcementResult, AdapterError>;

    /// Read-only snapshot of vendor state.
    async fn get_current_config(&self, credentials: &Credentials) -> Result<Value, AdapterError>;

    /// Best-effort disable of everything this adapter can turn on.
    ///
    /// Individual failures are logged and swallowed; only a credential that
    /// cannot be used at all is reported.
    async fn revoke_policy(&self, credentials: &Credentials) -> Result<(), AdapterError>;

    fn supports_webhooks(&self) -> bool {
        false
    }

    async fn register_webhook(
        &self,
        _credentials: &Credentials,
        _callback_url: &str,
        _secret: &str,
    ) -> Result<WebhookRegistration, AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "{} does not deliver webhooks",
            self.info().id
        )))
    }
}

/// Vendor-specific half of the translation loop.
#[async_trait]
pub(crate) trait VendorPlan: Send + Sync {
    /// Authenticated context for one invocation (token, resolved profile).
    type Session: Send + Sync;
    type Primitive: Send + Sync;

    async fn open_session(
        &self,
        credentials: &Credentials,
        child: &ChildMeta,
    ) -> Result<Self::Session, AdapterError>;

    /// Primitives a rule maps to, or `None` if the category is unmapped.
    /// Malformed config falls back to the category's default inside here.
    fn plan(&self, rule: &Rule, child: &ChildMeta) -> Option<Vec<Self::Primitive>>;

    /// Identity of the underlying vendor primitive, independent of the value
    /// being written to it.
    fn primitive_key(&self, primitive: &Self::Primitive) -> String;

    async fn apply(
        &self,
        session: &Self::Session,
        primitive: &Self::Primitive,
    ) -> Result<(), AdapterError>;
}

/// Per-invocation write plan: one slot per vendor primitive, in the order
/// primitives were first requested. A later rule overwrites the value.
struct WritePlan<T> {
    slots: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> WritePlan<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn put(&mut self, key: String, primitive: T) {
        match self.index.get(&key) {
            Some(&slot) => self.slots[slot].1 = primitive,
            None => {
                self.index.insert(key.clone(), self.slots.len());
                self.slots.push((key, primitive));
            }
        }
    }
}

#[derive(Debug, Default)]
struct Tally(EnforcementResult);

impl Tally {
    fn record(&mut self, rule: &Rule, outcome: String) {
        let entry = self.0.details.entry(rule.category.to_string()).or_default();
        // A later success never hides an earlier failure of the same category.
        if !entry.starts_with("failed") {
            *entry = outcome;
        }
    }

    fn skipped(&mut self, rule: &Rule, reason: &str) {
        self.0.rules_skipped += 1;
        self.record(rule, format!("skipped: {}", reason));
    }

    fn applied(&mut self, rule: &Rule) {
        self.0.rules_applied += 1;
        self.record(rule, "applied".to_string());
    }

    fn failed(&mut self, rule: &Rule, error: &str) {
        self.0.rules_failed += 1;
        self.record(rule, format!("failed: {}", error));
    }
}

/// Run the translation loop for one adapter invocation.
pub(crate) async fn drive<P: VendorPlan>(
    vendor: &P,
    platform_id: &str,
    rules: &[Rule],
    credentials: &Credentials,
    child: &ChildMeta,
) -> Result<EnforcementResult, AdapterError> {
    let session = vendor.open_session(credentials, child).await?;
    let mut tally = Tally::default();
    let mut writes = WritePlan::new();
    let mut mapped = Vec::new();

    for rule in rules {
        if !rule.enabled {
            tally.skipped(rule, "disabled");
            continue;
        }
        let Some(primitives) = vendor.plan(rule, child) else {
            tally.skipped(rule, "unsupported");
            continue;
        };
        let mut keys = Vec::with_capacity(primitives.len());
        for primitive in primitives {
            let key = vendor.primitive_key(&primitive);
            keys.push(key.clone());
            writes.put(key, primitive);
        }
        mapped.push((rule, keys));
    }

    let mut failures: HashMap<String, String> = HashMap::new();
    for (key, primitive) in &writes.slots {
        if let Err(e) = vendor.apply(&session, primitive).await {
            if e.is_auth() {
                return Err(e);
            }
            tracing::warn!(platform = platform_id, key = %key, "Vendor call failed: {}", e);
            failures.insert(key.clone(), e.to_string());
        }
    }

    // A rule fails with the first failed primitive it maps onto, shared or not.
    for (rule, keys) in mapped {
        match keys.iter().find_map(|key| failures.get(key)) {
            None => tally.applied(rule),
            Some(error) => tally.failed(rule, error),
        }
    }

    tracing::debug!(
        platform = platform_id,
        applied = tally.0.rules_applied,
        skipped = tally.0.rules_skipped,
        failed = tally.0.rules_failed,
        "Enforcement pass finished"
    );
    Ok(tally.0)
}

/// Apply a list of "off" primitives, logging and swallowing failures.
pub(crate) async fn revoke_all<P: VendorPlan>(
    vendor: &P,
    platform_id: &str,
    session: &P::Session,
    primitives: &[P::Primitive],
) {
    let mut failures = 0usize;
    for primitive in primitives {
        if let Err(e) = vendor.apply(session, primitive).await {
            failures += 1;
            tracing::warn!(
                platform = platform_id,
                key = %vendor.primitive_key(primitive),
                "Revocation step failed: {}",
                e
            );
        }
    }
    tracing::info!(
        platform = platform_id,
        attempted = primitives.len(),
        failures,
        "Revocation finished"
    );
}
