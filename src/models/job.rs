use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One invocation of the enforcement fan-out for one child.
///
/// A job is created `Running` and moves exactly once to a terminal state.
/// Retrying creates a new job; jobs are never resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementJob {
    pub id: Uuid,
    pub child_id: Uuid,
    pub policy_id: Uuid,
    /// Policy version the job was started against.
    pub policy_version: i64,
    pub trigger: TriggerType,
    pub status: EnforcementStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The outcome of enforcing a rule set on one linked account.
///
/// Platform results are independent of each other; one account failing says
/// nothing about any other account in the same job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub linked_account_id: Uuid,
    pub platform_id: String,
    pub status: EnforcementStatus,
    pub rules_applied: u32,
    pub rules_skipped: u32,
    pub rules_failed: u32,
    /// Outcome per rule category, e.g. `"applied"`, `"skipped: disabled"`.
    pub details: BTreeMap<String, String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A job together with its per-platform results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job: EnforcementJob,
    pub results: Vec<PlatformResult>,
}

/// Status shared by jobs and platform results.
///
/// - `Running`: Work is in flight
/// - `Completed`: Everything targeted took effect
/// - `Partial`: Some, but not all, took effect
/// - `Failed`: Nothing took effect
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl EnforcementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Status of a single account from the adapter's rule counts.
    pub fn from_counts(applied: u32, failed: u32) -> Self {
        match (applied, failed) {
            (_, 0) => Self::Completed,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }

    /// Roll platform statuses up into a job status.
    ///
    /// `Completed` iff every platform completed, `Failed` iff none made any
    /// progress, `Partial` otherwise. A job with no platforms has nothing left
    /// undone and is `Completed`.
    pub fn rollup(statuses: &[EnforcementStatus]) -> Self {
        if statuses.iter().all(|s| *s == Self::Completed) {
            Self::Completed
        } else if statuses.iter().all(|s| *s == Self::Failed) {
            Self::Failed
        } else {
            Self::Partial
        }
    }
}

/// Why a job was started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    PolicyChange,
    AccountLinked,
    Scheduled,
    Retry,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::PolicyChange => "policy_change",
            Self::AccountLinked => "account_linked",
            Self::Scheduled => "scheduled",
            Self::Retry => "retry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "policy_change" => Some(Self::PolicyChange),
            "account_linked" => Some(Self::AccountLinked),
            "scheduled" => Some(Self::Scheduled),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }
}

/// Terminal update for a platform result.
#[derive(Debug, Clone, Default)]
pub struct PlatformOutcome {
    pub rules_applied: u32,
    pub rules_skipped: u32,
    pub rules_failed: u32,
    pub details: BTreeMap<String, String>,
    pub error_message: Option<String>,
}

impl PlatformOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn status(&self) -> EnforcementStatus {
        if self.error_message.is_some() {
            EnforcementStatus::Failed
        } else {
            EnforcementStatus::from_counts(self.rules_applied, self.rules_failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EnforcementStatus::*;
    use super::*;

    #[test]
    fn rollup_all_success_is_completed() {
        assert_eq!(EnforcementStatus::rollup(&[Completed, Completed]), Completed);
    }

    #[test]
    fn rollup_all_failure_is_failed() {
        assert_eq!(EnforcementStatus::rollup(&[Failed, Failed, Failed]), Failed);
    }

    #[test]
    fn rollup_mixed_is_partial() {
        assert_eq!(EnforcementStatus::rollup(&[Completed, Failed]), Partial);
        assert_eq!(EnforcementStatus::rollup(&[Completed, Partial]), Partial);
        assert_eq!(EnforcementStatus::rollup(&[Partial, Failed]), Partial);
        assert_eq!(EnforcementStatus::rollup(&[Partial]), Partial);
    }

    #[test]
    fn rollup_of_nothing_is_completed() {
        assert_eq!(EnforcementStatus::rollup(&[]), Completed);
    }

    #[test]
    fn counts_map_to_platform_status() {
        assert_eq!(EnforcementStatus::from_counts(3, 0), Completed);
        assert_eq!(EnforcementStatus::from_counts(0, 0), Completed);
        assert_eq!(EnforcementStatus::from_counts(2, 1), Partial);
        assert_eq!(EnforcementStatus::from_counts(0, 2), Failed);
    }

    #[test]
    fn outcome_with_error_is_failed_regardless_of_counts() {
        let mut outcome = PlatformOutcome::failed("vendor unavailable");
        outcome.rules_applied = 4;
        assert_eq!(outcome.status(), Failed);
    }
}
