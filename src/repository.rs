//! Storage interfaces consumed by the enforcement engine.
//!
//! Families, children, policies and linked accounts are managed elsewhere;
//! the engine only reads them and appends job records. [`crate::db::Database`]
//! implements every trait here, and tests substitute their own.

use anyhow::Result;
use uuid::Uuid;

use crate::models::*;

pub trait ChildRepository: Send + Sync {
    fn get_child(&self, id: Uuid) -> Result<Option<Child>>;
}

pub trait PolicyRepository: Send + Sync {
    fn get_policy(&self, id: Uuid) -> Result<Option<PolicyWithRules>>;

    /// Every policy of the child currently marked active, rules in order.
    fn active_policies(&self, child_id: Uuid) -> Result<Vec<PolicyWithRules>>;
}

pub trait LinkedAccountRepository: Send + Sync {
    fn get_account(&self, id: Uuid) -> Result<Option<LinkedAccount>>;

    /// Accounts of the family whose status is `verified`.
    fn verified_accounts(&self, family_id: Uuid) -> Result<Vec<LinkedAccount>>;

    fn set_account_status(&self, id: Uuid, status: AccountStatus) -> Result<bool>;
}

/// Append/update store for jobs and platform results.
///
/// Implementations must accept concurrent calls from many fan-out tasks.
pub trait EnforcementStore: Send + Sync {
    /// Create a job in `running` state.
    fn create_job(
        &self,
        child_id: Uuid,
        policy: &Policy,
        trigger: TriggerType,
    ) -> Result<EnforcementJob>;

    /// Move a running job to `status`. Returns `false` if the job was not
    /// running (already terminal or unknown).
    fn finish_job(&self, job_id: Uuid, status: EnforcementStatus) -> Result<bool>;

    fn get_job(&self, id: Uuid) -> Result<Option<EnforcementJob>>;

    /// Jobs for a child, newest first.
    fn jobs_for_child(&self, child_id: Uuid) -> Result<Vec<EnforcementJob>>;

    /// Create a `running` platform result for one account of a job.
    fn create_platform_result(
        &self,
        job_id: Uuid,
        account: &LinkedAccount,
    ) -> Result<PlatformResult>;

    /// Record the terminal outcome of a running platform result and return
    /// the status it was given.
    fn finish_platform_result(
        &self,
        id: Uuid,
        outcome: &PlatformOutcome,
    ) -> Result<EnforcementStatus>;

    fn results_for_job(&self, job_id: Uuid) -> Result<Vec<PlatformResult>>;

    fn job_report(&self, job_id: Uuid) -> Result<Option<JobReport>> {
        let Some(job) = self.get_job(job_id)? else {
            return Ok(None);
        };
        let results = self.results_for_job(job_id)?;
        Ok(Some(JobReport { job, results }))
    }
}

/// Everything the enforcement engine needs from storage.
pub trait EnforcementBackend:
    ChildRepository + PolicyRepository + LinkedAccountRepository + EnforcementStore
{
}

impl<T> EnforcementBackend for T where
    T: ChildRepository + PolicyRepository + LinkedAccountRepository + EnforcementStore
{
}
