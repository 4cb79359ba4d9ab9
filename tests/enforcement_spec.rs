use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use guardline::adapters::*;
use guardline::db::Database;
use guardline::enforcement::{AccountCheck, EnforcementEngine, EnforcementError};
use guardline::models::*;
use guardline::repository::*;
use serde_json::{json, Value};
use uuid::Uuid;

/// What a fake adapter does when asked to enforce.
#[derive(Clone)]
enum Behavior {
    Succeed { applied: u32, skipped: u32, failed: u32 },
    Fail(fn() -> AdapterError),
    Hang,
    Panic,
}

struct FakeAdapter {
    info: PlatformInfo,
    behavior: Behavior,
    auth: fn() -> Result<(), AdapterError>,
    calls: AtomicUsize,
    revoked: AtomicUsize,
    seen_rules: Mutex<Vec<usize>>,
}

impl FakeAdapter {
    fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Self::build(id, behavior, || Ok(()))
    }

    fn with_auth(id: &str, auth: fn() -> Result<(), AdapterError>) -> Arc<Self> {
        Self::build(id, Behavior::Succeed { applied: 0, skipped: 0, failed: 0 }, auth)
    }

    fn build(id: &str, behavior: Behavior, auth: fn() -> Result<(), AdapterError>) -> Arc<Self> {
        Arc::new(Self {
            info: PlatformInfo {
                id: id.to_string(),
                name: id.to_string(),
                kind: PlatformKind::Monitoring,
                auth: AuthKind::ApiKey,
                website: String::new(),
            },
            behavior,
            auth,
            calls: AtomicUsize::new(0),
            revoked: AtomicUsize::new(0),
            seen_rules: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn info(&self) -> &PlatformInfo {
        &self.info
    }

    fn capabilities(&self) -> &[Capability] {
        &[]
    }

    async fn validate_auth(&self, _: &Credentials) -> Result<(), AdapterError> {
        (self.auth)()
    }

    async fn enforce_policy(
        &self,
        rules: &[Rule],
        _: &Credentials,
        _: &ChildMeta,
    ) -> Result<EnforcementResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_rules.lock().unwrap().push(rules.len());
        match &self.behavior {
            Behavior::Succeed { applied, skipped, failed } => {
                let mut details = BTreeMap::new();
                details.insert("web_filter_level".to_string(), "applied".to_string());
                Ok(EnforcementResult {
                    rules_applied: *applied,
                    rules_skipped: *skipped,
                    rules_failed: *failed,
                    details,
                })
            }
            Behavior::Fail(error) => Err(error()),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(EnforcementResult::default())
            }
            Behavior::Panic => panic!("adapter blew up"),
        }
    }

    async fn get_current_config(&self, _: &Credentials) -> Result<Value, AdapterError> {
        Ok(Value::Null)
    }

    async fn revoke_policy(&self, _: &Credentials) -> Result<(), AdapterError> {
        self.revoked.fetch_add(1, Ordering::SeqCst);
        Err(AdapterError::Unavailable("vendor down".into()))
    }
}

struct Fixture {
    db: Database,
    registry: Arc<AdapterRegistry>,
    family_id: Uuid,
    child: Child,
    policy: Policy,
}

impl Fixture {
    fn new() -> Self {
        let db = Database::open_memory().expect("Failed to create database");
        db.migrate().expect("Failed to migrate");
        let family_id = Uuid::new_v4();

        let child = db
            .create_child(CreateChildInput {
                family_id,
                name: "Ada".to_string(),
                birth_date: NaiveDate::from_ymd_opt(2018, 5, 1).unwrap(),
            })
            .unwrap();
        let policy = db
            .create_policy(CreatePolicyInput {
                child_id: child.id,
                name: "Default".to_string(),
            })
            .unwrap();
        for (category, config) in [
            (RuleCategory::WebFilterLevel, json!({ "level": "strict" })),
            (RuleCategory::TimeDailyLimit, json!({ "daily_minutes": 90 })),
            (RuleCategory::MonitoringAlerts, json!({})),
        ] {
            db.add_rule(
                policy.id,
                AddRuleInput {
                    category,
                    enabled: true,
                    config: RuleConfig(config),
                },
            )
            .unwrap();
        }
        let policy = db.activate_policy(policy.id).unwrap().unwrap();

        Self {
            db,
            registry: Arc::new(AdapterRegistry::new()),
            family_id,
            child,
            policy,
        }
    }

    fn register(&self, adapter: Arc<FakeAdapter>) -> Arc<FakeAdapter> {
        self.registry.register(adapter.clone()).unwrap();
        adapter
    }

    fn link(&self, platform: &str, status: AccountStatus) -> LinkedAccount {
        self.db
            .link_account(LinkAccountInput {
                family_id: self.family_id,
                platform_id: platform.to_string(),
                credentials: Credentials::new().with("api_key", "secret-key-value"),
                status,
            })
            .unwrap()
    }

    fn engine(&self) -> EnforcementEngine {
        EnforcementEngine::new(self.registry.clone(), Arc::new(self.db.clone()))
            .with_account_deadline(Duration::from_secs(5))
    }

    fn result_for(&self, job_id: Uuid, platform: &str) -> PlatformResult {
        self.db
            .results_for_job(job_id)
            .unwrap()
            .into_iter()
            .find(|r| r.platform_id == platform)
            .expect("missing platform result")
    }
}

fn full_success() -> Behavior {
    Behavior::Succeed { applied: 3, skipped: 0, failed: 0 }
}

mod job_status {
    use super::*;

    #[tokio::test]
    async fn all_platforms_succeeding_completes_the_job() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new("alpha", full_success()));
        fx.register(FakeAdapter::new("beta", full_success()));
        fx.link("alpha", AccountStatus::Verified);
        fx.link("beta", AccountStatus::Verified);

        let handle = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap();
        assert_eq!(handle.job().status, EnforcementStatus::Running);
        assert_eq!(handle.job().policy_version, fx.policy.version);

        let job = handle.wait().await.unwrap();
        assert_eq!(job.status, EnforcementStatus::Completed);
        assert!(job.completed_at.is_some());

        let results = fx.db.results_for_job(job.id).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == EnforcementStatus::Completed));
    }

    #[tokio::test]
    async fn one_partial_platform_makes_the_job_partial() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new("alpha", full_success()));
        fx.register(FakeAdapter::new(
            "beta",
            Behavior::Succeed { applied: 2, skipped: 0, failed: 1 },
        ));
        fx.link("alpha", AccountStatus::Verified);
        fx.link("beta", AccountStatus::Verified);

        let job = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();
        assert_eq!(job.status, EnforcementStatus::Partial);

        let alpha = fx.result_for(job.id, "alpha");
        assert_eq!(alpha.status, EnforcementStatus::Completed);
        assert_eq!(alpha.rules_applied, 3);

        let beta = fx.result_for(job.id, "beta");
        assert_eq!(beta.status, EnforcementStatus::Partial);
        assert_eq!(beta.rules_applied, 2);
        assert_eq!(beta.rules_failed, 1);
        assert_eq!(beta.details["web_filter_level"], "applied");
    }

    #[tokio::test]
    async fn every_platform_failing_fails_the_job() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new(
            "alpha",
            Behavior::Fail(|| AdapterError::InvalidCredentials("bad key".into())),
        ));
        fx.register(FakeAdapter::new(
            "beta",
            Behavior::Fail(|| AdapterError::Unavailable("503".into())),
        ));
        fx.link("alpha", AccountStatus::Verified);
        fx.link("beta", AccountStatus::Verified);

        let job = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();
        assert_eq!(job.status, EnforcementStatus::Failed);

        let alpha = fx.result_for(job.id, "alpha");
        assert_eq!(alpha.status, EnforcementStatus::Failed);
        assert!(alpha.error_message.unwrap().contains("bad key"));
    }

    #[tokio::test]
    async fn a_failure_next_to_a_success_is_partial() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new("alpha", full_success()));
        fx.register(FakeAdapter::new(
            "beta",
            Behavior::Fail(|| AdapterError::Unavailable("timeout".into())),
        ));
        fx.link("alpha", AccountStatus::Verified);
        fx.link("beta", AccountStatus::Verified);

        let job = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();
        assert_eq!(job.status, EnforcementStatus::Partial);
        assert_eq!(fx.result_for(job.id, "alpha").status, EnforcementStatus::Completed);
        assert_eq!(fx.result_for(job.id, "beta").status, EnforcementStatus::Failed);
    }

    #[tokio::test]
    async fn no_accounts_completes_immediately() {
        let fx = Fixture::new();

        let job = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();
        assert_eq!(job.status, EnforcementStatus::Completed);
        assert!(fx.db.results_for_job(job.id).unwrap().is_empty());
    }
}

mod account_selection {
    use super::*;

    #[tokio::test]
    async fn unverified_and_revoked_accounts_are_ignored() {
        let fx = Fixture::new();
        let alpha = fx.register(FakeAdapter::new("alpha", full_success()));
        fx.link("alpha", AccountStatus::Unverified);
        fx.link("alpha", AccountStatus::Revoked);

        let job = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();
        assert_eq!(job.status, EnforcementStatus::Completed);
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn accounts_on_unregistered_platforms_are_skipped_silently() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new("alpha", full_success()));
        fx.link("alpha", AccountStatus::Verified);
        fx.link("retired-vendor", AccountStatus::Verified);

        let job = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();
        assert_eq!(job.status, EnforcementStatus::Completed);

        let results = fx.db.results_for_job(job.id).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].platform_id, "alpha");
    }

    #[tokio::test]
    async fn every_account_receives_the_full_rule_set() {
        let fx = Fixture::new();
        let alpha = fx.register(FakeAdapter::new("alpha", full_success()));
        fx.link("alpha", AccountStatus::Verified);
        fx.link("alpha", AccountStatus::Verified);

        fx.engine().start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();
        assert_eq!(*alpha.seen_rules.lock().unwrap(), vec![3, 3]);
    }
}

mod preconditions {
    use super::*;

    #[tokio::test]
    async fn unknown_child_is_rejected() {
        let fx = Fixture::new();
        let err = fx.engine().start(Uuid::new_v4(), TriggerType::Manual).err().unwrap();
        assert!(matches!(err, EnforcementError::ChildNotFound(_)));
    }

    #[tokio::test]
    async fn child_without_active_policy_creates_no_job() {
        let fx = Fixture::new();
        fx.db.set_policy_status(fx.policy.id, PolicyStatus::Paused).unwrap();

        let err = fx.engine().start(fx.child.id, TriggerType::Manual).err().unwrap();
        assert!(matches!(err, EnforcementError::NoActivePolicy { found: 0, .. }));
        assert!(fx.db.jobs_for_child(fx.child.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn two_active_policies_are_rejected() {
        let fx = Fixture::new();
        let other = fx
            .db
            .create_policy(CreatePolicyInput {
                child_id: fx.child.id,
                name: "Second".to_string(),
            })
            .unwrap();
        fx.db.set_policy_status(other.id, PolicyStatus::Active).unwrap();

        let err = fx.engine().start(fx.child.id, TriggerType::Manual).err().unwrap();
        assert!(matches!(err, EnforcementError::NoActivePolicy { found: 2, .. }));
    }
}

mod isolation {
    use super::*;

    #[tokio::test]
    async fn a_hanging_vendor_times_out_without_blocking_others() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new("alpha", full_success()));
        fx.register(FakeAdapter::new("slow", Behavior::Hang));
        fx.link("alpha", AccountStatus::Verified);
        fx.link("slow", AccountStatus::Verified);

        let engine = fx.engine().with_account_deadline(Duration::from_millis(100));
        let job = engine.start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();

        assert_eq!(job.status, EnforcementStatus::Partial);
        let slow = fx.result_for(job.id, "slow");
        assert_eq!(slow.status, EnforcementStatus::Failed);
        assert!(slow.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn a_panicking_adapter_fails_only_its_platform() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new("alpha", full_success()));
        fx.register(FakeAdapter::new("broken", Behavior::Panic));
        fx.link("alpha", AccountStatus::Verified);
        fx.link("broken", AccountStatus::Verified);

        let job = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();

        assert_eq!(job.status, EnforcementStatus::Partial);
        let broken = fx.result_for(job.id, "broken");
        assert_eq!(broken.status, EnforcementStatus::Failed);
        assert!(broken.error_message.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn a_concurrency_cap_of_one_still_finishes_every_account() {
        let fx = Fixture::new();
        let alpha = fx.register(FakeAdapter::new("alpha", full_success()));
        for _ in 0..4 {
            fx.link("alpha", AccountStatus::Verified);
        }

        let engine = fx.engine().with_max_concurrency(1);
        let job = engine.start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();

        assert_eq!(job.status, EnforcementStatus::Completed);
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancelling_leaves_the_job_running() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new("slow", Behavior::Hang));
        fx.link("slow", AccountStatus::Verified);

        let handle = fx.engine().start(fx.child.id, TriggerType::Manual).unwrap();
        let job_id = handle.job().id;
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, EnforcementError::Interrupted(_)));
        let stored = fx.db.get_job(job_id).unwrap().unwrap();
        assert_eq!(stored.status, EnforcementStatus::Running);
    }
}

mod retry {
    use super::*;

    #[tokio::test]
    async fn retry_creates_a_new_job_for_the_same_child() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::new(
            "alpha",
            Behavior::Fail(|| AdapterError::Unavailable("503".into())),
        ));
        fx.link("alpha", AccountStatus::Verified);
        let engine = fx.engine();

        let first = engine.start(fx.child.id, TriggerType::Manual).unwrap().wait().await.unwrap();
        assert_eq!(first.status, EnforcementStatus::Failed);

        let second = engine.retry(first.id).unwrap().wait().await.unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(second.child_id, fx.child.id);
        assert_eq!(second.trigger, TriggerType::Retry);

        let original = fx.db.get_job(first.id).unwrap().unwrap();
        assert_eq!(original.status, EnforcementStatus::Failed);
        assert_eq!(fx.db.jobs_for_child(fx.child.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retrying_an_unknown_job_fails() {
        let fx = Fixture::new();
        let err = fx.engine().retry(Uuid::new_v4()).err().unwrap();
        assert!(matches!(err, EnforcementError::JobNotFound(_)));
    }
}

mod accounts {
    use super::*;

    #[tokio::test]
    async fn rejected_credentials_mark_the_account_unverified() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::with_auth("alpha", || {
            Err(AdapterError::InvalidCredentials("401".into()))
        }));
        let account = fx.link("alpha", AccountStatus::Verified);

        let check = fx.engine().verify_account(account.id).await.unwrap();
        assert!(matches!(check, AccountCheck::InvalidCredentials(_)));
        let stored = fx.db.get_account(account.id).unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Unverified);
    }

    #[tokio::test]
    async fn an_unreachable_vendor_leaves_the_account_alone() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::with_auth("alpha", || {
            Err(AdapterError::Unavailable("connect timeout".into()))
        }));
        let account = fx.link("alpha", AccountStatus::Verified);

        let check = fx.engine().verify_account(account.id).await.unwrap();
        assert!(matches!(check, AccountCheck::Unavailable(_)));
        let stored = fx.db.get_account(account.id).unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Verified);
    }

    #[tokio::test]
    async fn valid_credentials_verify_the_account() {
        let fx = Fixture::new();
        fx.register(FakeAdapter::with_auth("alpha", || Ok(())));
        let account = fx.link("alpha", AccountStatus::Unverified);

        let check = fx.engine().verify_account(account.id).await.unwrap();
        assert_eq!(check, AccountCheck::Valid);
        let stored = fx.db.get_account(account.id).unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Verified);
    }

    #[tokio::test]
    async fn unlinking_revokes_even_when_the_vendor_fails() {
        let fx = Fixture::new();
        let alpha = fx.register(FakeAdapter::new("alpha", full_success()));
        let account = fx.link("alpha", AccountStatus::Verified);

        fx.engine().unlink_account(account.id).await.unwrap();

        assert_eq!(alpha.revoked.load(Ordering::SeqCst), 1);
        let stored = fx.db.get_account(account.id).unwrap().unwrap();
        assert_eq!(stored.status, AccountStatus::Revoked);
    }
}

mod compiled {
    use super::*;

    #[tokio::test]
    async fn compiles_the_active_policy() {
        let fx = Fixture::new();
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        let compiled = fx.engine().compiled_policy(fx.child.id, at).unwrap();
        assert_eq!(compiled.version, fx.policy.version);
        assert_eq!(compiled.child_age, 8);
        assert_eq!(compiled.screen_time.daily_limit_minutes, Some(90));
        assert_eq!(compiled.web_filter.level, "strict");
    }
}
