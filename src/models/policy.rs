use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule::{Rule, RuleCategory, RuleConfig};

/// A child's safety policy: an ordered rule set plus a version.
///
/// `version` starts at 1 and increases every time the rule set changes or
/// the policy is activated. On-device agents compare it against their cached
/// bundle to decide whether to re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub child_id: Uuid,
    pub name: String,
    pub status: PolicyStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A policy together with its rules, in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyWithRules {
    pub policy: Policy,
    pub rules: Vec<Rule>,
}

/// - `Draft`: Being edited, never enforced
/// - `Active`: The one policy enforced for the child
/// - `Paused`: Previously active, kept for reference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Draft,
    Active,
    Paused,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Input for creating a policy. New policies start as drafts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePolicyInput {
    pub child_id: Uuid,
    pub name: String,
}

/// Input for appending a rule to a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRuleInput {
    pub category: RuleCategory,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: RuleConfig,
}

fn default_true() -> bool {
    true
}
