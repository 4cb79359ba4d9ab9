//! Enforcement orchestrator.
//!
//! [`EnforcementEngine::start`] resolves a child's sole active policy,
//! records a `running` job and returns immediately. The fan-out runs on a
//! spawned task: one child task per verified linked account, joined before
//! the job is given its terminal status. Accounts never wait on each other
//! beyond the per-job concurrency cap, and one account failing never fails
//! another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;
use uuid::Uuid;

use crate::adapters::{Adapter, AdapterRegistry, EnforcementResult};
use crate::compiler;
use crate::config::Config;
use crate::models::*;
use crate::repository::EnforcementBackend;

const DEFAULT_MAX_CONCURRENCY: usize = 8;
const DEFAULT_ACCOUNT_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("Child not found: {0}")]
    ChildNotFound(Uuid),

    #[error("Child {child_id} has {found} active policies; exactly one is required")]
    NoActivePolicy { child_id: Uuid, found: usize },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Linked account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("No adapter registered for platform {0}")]
    UnknownPlatform(String),

    #[error("Enforcement task interrupted: {0}")]
    Interrupted(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Result of checking a linked account's credentials against its vendor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum AccountCheck {
    Valid,
    /// The vendor rejected the credential; the guardian must relink.
    InvalidCredentials(String),
    /// The vendor could not be reached. Says nothing about the credential.
    Unavailable(String),
}

/// A started job and the task running its fan-out.
///
/// Dropping the handle detaches the task; the job still runs to completion.
pub struct EnforcementHandle {
    job: EnforcementJob,
    task: JoinHandle<Result<EnforcementJob, EnforcementError>>,
}

impl EnforcementHandle {
    /// The job as created, in `running` state.
    pub fn job(&self) -> &EnforcementJob {
        &self.job
    }

    /// Wait for the fan-out to finish and return the terminal job.
    pub async fn wait(self) -> Result<EnforcementJob, EnforcementError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(EnforcementError::Interrupted(e.to_string())),
        }
    }

    /// Abort the fan-out. In-flight vendor calls are dropped and whatever was
    /// already persisted is left as is.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn detach(self) -> EnforcementJob {
        self.job
    }
}

pub struct EnforcementEngine {
    registry: Arc<AdapterRegistry>,
    backend: Arc<dyn EnforcementBackend>,
    max_concurrency: usize,
    account_deadline: Duration,
}

impl EnforcementEngine {
    pub fn new(registry: Arc<AdapterRegistry>, backend: Arc<dyn EnforcementBackend>) -> Self {
        Self {
            registry,
            backend,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            account_deadline: DEFAULT_ACCOUNT_DEADLINE,
        }
    }

    pub fn from_config(
        registry: Arc<AdapterRegistry>,
        backend: Arc<dyn EnforcementBackend>,
        config: &Config,
    ) -> Self {
        Self::new(registry, backend)
            .with_max_concurrency(config.max_concurrency)
            .with_account_deadline(config.account_deadline)
    }

    /// Accounts enforced at once within one job. `0` removes the cap.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_account_deadline(mut self, deadline: Duration) -> Self {
        self.account_deadline = deadline;
        self
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Resolve the child and its single active policy.
    fn resolve(&self, child_id: Uuid) -> Result<(Child, PolicyWithRules), EnforcementError> {
        let child = self
            .backend
            .get_child(child_id)?
            .ok_or(EnforcementError::ChildNotFound(child_id))?;

        let mut active = self.backend.active_policies(child_id)?;
        if active.len() != 1 {
            return Err(EnforcementError::NoActivePolicy {
                child_id,
                found: active.len(),
            });
        }
        let policy = active.remove(0);

        Ok((child, policy))
    }

    /// Create a job for the child's active policy and start its fan-out.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        child_id: Uuid,
        trigger: TriggerType,
    ) -> Result<EnforcementHandle, EnforcementError> {
        let (child, policy) = self.resolve(child_id)?;
        let accounts = self.backend.verified_accounts(child.family_id)?;
        let job = self.backend.create_job(child_id, &policy.policy, trigger)?;

        tracing::info!(
            job = %job.id,
            child = %child_id,
            policy = %policy.policy.id,
            version = policy.policy.version,
            trigger = trigger.as_str(),
            accounts = accounts.len(),
            "Enforcement job started"
        );

        let fan_out = FanOut {
            registry: self.registry.clone(),
            backend: self.backend.clone(),
            max_concurrency: self.max_concurrency,
            account_deadline: self.account_deadline,
        };
        let span = tracing::info_span!("enforcement_job", job = %job.id);
        let task = tokio::spawn(
            fan_out
                .run(
                    job.clone(),
                    Arc::new(policy.rules),
                    child.meta(Utc::now().date_naive()),
                    accounts,
                )
                .instrument(span),
        );

        Ok(EnforcementHandle { job, task })
    }

    /// Start a new job for the same child as `job_id`. Jobs are never resumed.
    pub fn retry(&self, job_id: Uuid) -> Result<EnforcementHandle, EnforcementError> {
        let job = self
            .backend
            .get_job(job_id)?
            .ok_or(EnforcementError::JobNotFound(job_id))?;
        self.start(job.child_id, TriggerType::Retry)
    }

    /// Compile the child's active policy for an on-device agent.
    pub fn compiled_policy(
        &self,
        child_id: Uuid,
        generated_at: DateTime<Utc>,
    ) -> Result<CompiledPolicy, EnforcementError> {
        let (child, policy) = self.resolve(child_id)?;
        Ok(compiler::compile_policy(&policy, &child, generated_at))
    }

    /// Check an account's credentials and record the outcome.
    ///
    /// A valid credential marks the account verified and a rejected one
    /// unverified. An unreachable vendor leaves the status untouched.
    pub async fn verify_account(&self, account_id: Uuid) -> Result<AccountCheck, EnforcementError> {
        let account = self
            .backend
            .get_account(account_id)?
            .ok_or(EnforcementError::AccountNotFound(account_id))?;
        let adapter = self.adapter_for(&account)?;

        let check = match adapter.validate_auth(&account.credentials).await {
            Ok(()) => AccountCheck::Valid,
            Err(e) if e.is_auth() => AccountCheck::InvalidCredentials(e.to_string()),
            Err(e) => AccountCheck::Unavailable(e.to_string()),
        };

        let status = match check {
            AccountCheck::Valid => Some(AccountStatus::Verified),
            AccountCheck::InvalidCredentials(_) => Some(AccountStatus::Unverified),
            AccountCheck::Unavailable(_) => None,
        };
        if let Some(status) = status {
            self.backend.set_account_status(account_id, status)?;
        }

        tracing::info!(
            account = %account_id,
            platform = %account.platform_id,
            check = ?check,
            "Account credentials checked"
        );
        Ok(check)
    }

    /// Unlink an account: best-effort revocation on the vendor, then mark it
    /// revoked. Vendor failures are logged and never block the unlink.
    pub async fn unlink_account(&self, account_id: Uuid) -> Result<(), EnforcementError> {
        let account = self
            .backend
            .get_account(account_id)?
            .ok_or(EnforcementError::AccountNotFound(account_id))?;

        match self.registry.get(&account.platform_id) {
            Some(adapter) => {
                let revoke = adapter.revoke_policy(&account.credentials);
                match tokio::time::timeout(self.account_deadline, revoke).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        account = %account_id,
                        platform = %account.platform_id,
                        "Revocation failed: {}",
                        e
                    ),
                    Err(_) => tracing::warn!(
                        account = %account_id,
                        platform = %account.platform_id,
                        "Revocation timed out"
                    ),
                }
            }
            None => tracing::debug!(
                account = %account_id,
                platform = %account.platform_id,
                "No adapter registered; skipping revocation"
            ),
        }

        self.backend
            .set_account_status(account_id, AccountStatus::Revoked)?;
        Ok(())
    }

    fn adapter_for(&self, account: &LinkedAccount) -> Result<Arc<dyn Adapter>, EnforcementError> {
        self.registry
            .get(&account.platform_id)
            .ok_or_else(|| EnforcementError::UnknownPlatform(account.platform_id.clone()))
    }
}

/// State moved into the spawned fan-out task.
struct FanOut {
    registry: Arc<AdapterRegistry>,
    backend: Arc<dyn EnforcementBackend>,
    max_concurrency: usize,
    account_deadline: Duration,
}

impl FanOut {
    async fn run(
        self,
        job: EnforcementJob,
        rules: Arc<Vec<Rule>>,
        child: ChildMeta,
        accounts: Vec<LinkedAccount>,
    ) -> Result<EnforcementJob, EnforcementError> {
        let limiter =
            (self.max_concurrency > 0).then(|| Arc::new(Semaphore::new(self.max_concurrency)));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, (Uuid, String)> = HashMap::new();
        let mut statuses = Vec::new();

        for account in accounts {
            let Some(adapter) = self.registry.get(&account.platform_id) else {
                tracing::debug!(
                    account = %account.id,
                    platform = %account.platform_id,
                    "No adapter registered; account skipped"
                );
                continue;
            };

            let result = match self.backend.create_platform_result(job.id, &account) {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(
                        account = %account.id,
                        "Failed to record platform result: {}",
                        e
                    );
                    statuses.push(EnforcementStatus::Failed);
                    continue;
                }
            };

            let platform_id = account.platform_id.clone();
            let task = enforce_account(
                adapter,
                rules.clone(),
                account,
                child.clone(),
                limiter.clone(),
                self.account_deadline,
            );
            let handle = tasks.spawn(task.in_current_span());
            pending.insert(handle.id(), (result.id, platform_id));
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => {
                    let reason = if e.is_panic() {
                        "enforcement task panicked"
                    } else {
                        "enforcement task cancelled"
                    };
                    (e.id(), PlatformOutcome::failed(reason))
                }
            };
            let Some((result_id, platform_id)) = pending.remove(&id) else {
                continue;
            };

            let status = match self.backend.finish_platform_result(result_id, &outcome) {
                Ok(status) => status,
                Err(e) => {
                    tracing::error!(result = %result_id, "Failed to record outcome: {}", e);
                    outcome.status()
                }
            };
            tracing::info!(
                platform = %platform_id,
                status = status.as_str(),
                applied = outcome.rules_applied,
                skipped = outcome.rules_skipped,
                failed = outcome.rules_failed,
                "Platform finished"
            );
            statuses.push(status);
        }

        let status = EnforcementStatus::rollup(&statuses);
        self.backend.finish_job(job.id, status)?;
        tracing::info!(
            status = status.as_str(),
            platforms = statuses.len(),
            "Enforcement job finished"
        );

        let finished = self.backend.get_job(job.id)?.unwrap_or(EnforcementJob {
            status,
            completed_at: Some(Utc::now()),
            ..job
        });
        Ok(finished)
    }
}

async fn enforce_account(
    adapter: Arc<dyn Adapter>,
    rules: Arc<Vec<Rule>>,
    account: LinkedAccount,
    child: ChildMeta,
    limiter: Option<Arc<Semaphore>>,
    deadline: Duration,
) -> PlatformOutcome {
    let _permit = match limiter {
        Some(limiter) => match limiter.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => return PlatformOutcome::failed("concurrency limiter closed"),
        },
        None => None,
    };

    let call = adapter.enforce_policy(&rules, &account.credentials, &child);
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(result)) => outcome_from(result),
        Ok(Err(e)) => {
            if e.is_auth() {
                tracing::warn!(
                    account = %account.id,
                    platform = %account.platform_id,
                    credentials = ?account.credentials,
                    "Vendor rejected credentials: {}",
                    e
                );
            } else {
                tracing::warn!(
                    account = %account.id,
                    platform = %account.platform_id,
                    "Enforcement failed: {}",
                    e
                );
            }
            PlatformOutcome::failed(e.to_string())
        }
        Err(_) => PlatformOutcome::failed(format!(
            "timed out after {}s",
            deadline.as_secs()
        )),
    }
}

fn outcome_from(result: EnforcementResult) -> PlatformOutcome {
    PlatformOutcome {
        rules_applied: result.rules_applied,
        rules_skipped: result.rules_skipped,
        rules_failed: result.rules_failed,
        details: result.details,
        error_message: None,
    }
}
