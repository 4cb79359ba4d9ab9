mod schema;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::models::*;
use crate::repository::{
    ChildRepository, EnforcementStore, LinkedAccountRepository, PolicyRepository,
};

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Child operations
    // ============================================================

    pub fn create_child(&self, input: CreateChildInput) -> Result<Child> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO children (id, family_id, name, birth_date, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                id.to_string(),
                input.family_id.to_string(),
                &input.name,
                input.birth_date.to_string(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(Child {
            id,
            family_id: input.family_id,
            name: input.name,
            birth_date: input.birth_date,
            created_at: now,
        })
    }

    pub fn children_for_family(&self, family_id: Uuid) -> Result<Vec<Child>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, family_id, name, birth_date, created_at
             FROM children WHERE family_id = ? ORDER BY name",
        )?;

        let children = stmt
            .query_map([family_id.to_string()], child_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(children)
    }

    // ============================================================
    // Policy operations
    // ============================================================

    pub fn create_policy(&self, input: CreatePolicyInput) -> Result<Policy> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO policies (id, child_id, name, status, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, ?, ?)",
            (
                id.to_string(),
                input.child_id.to_string(),
                &input.name,
                PolicyStatus::Draft.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(Policy {
            id,
            child_id: input.child_id,
            name: input.name,
            status: PolicyStatus::Draft,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn policies_for_child(&self, child_id: Uuid) -> Result<Vec<Policy>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, child_id, name, status, version, created_at, updated_at
             FROM policies WHERE child_id = ? ORDER BY created_at",
        )?;

        let policies = stmt
            .query_map([child_id.to_string()], policy_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(policies)
    }

    /// Append a rule to the end of a policy and bump its version.
    /// Returns `None` if the policy doesn't exist.
    pub fn add_rule(&self, policy_id: Uuid, input: AddRuleInput) -> Result<Option<Rule>> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now();

        let bumped = tx.execute(
            "UPDATE policies SET version = version + 1, updated_at = ? WHERE id = ?",
            (now.to_rfc3339(), policy_id.to_string()),
        )?;
        if bumped == 0 {
            return Ok(None);
        }

        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM policy_rules WHERE policy_id = ?",
            [policy_id.to_string()],
            |row| row.get(0),
        )?;

        let rule = Rule {
            id: Uuid::new_v4(),
            category: input.category,
            enabled: input.enabled,
            config: input.config,
        };

        tx.execute(
            "INSERT INTO policy_rules (id, policy_id, position, category, enabled, config, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                rule.id.to_string(),
                policy_id.to_string(),
                position,
                rule.category.as_str(),
                rule.enabled as i32,
                serde_json::to_string(&rule.config)?,
                now.to_rfc3339(),
            ),
        )?;

        tx.commit()?;
        Ok(Some(rule))
    }

    /// Remove a rule and bump the owning policy's version.
    pub fn remove_rule(&self, rule_id: Uuid) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        let policy_id: Option<String> = tx
            .query_row(
                "SELECT policy_id FROM policy_rules WHERE id = ?",
                [rule_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(policy_id) = policy_id else {
            return Ok(false);
        };

        tx.execute("DELETE FROM policy_rules WHERE id = ?", [rule_id.to_string()])?;
        tx.execute(
            "UPDATE policies SET version = version + 1, updated_at = ? WHERE id = ?",
            (Utc::now().to_rfc3339(), &policy_id),
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Make a policy the child's sole active policy.
    ///
    /// Any other active policy of the same child is paused. The activated
    /// policy's version is bumped.
    pub fn activate_policy(&self, policy_id: Uuid) -> Result<Option<Policy>> {
        {
            let mut conn = self.conn.lock().expect("database lock poisoned");
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            let child_id: Option<String> = tx
                .query_row(
                    "SELECT child_id FROM policies WHERE id = ?",
                    [policy_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(child_id) = child_id else {
                return Ok(None);
            };

            tx.execute(
                "UPDATE policies SET status = ?, updated_at = ?
                 WHERE child_id = ? AND status = ? AND id != ?",
                (
                    PolicyStatus::Paused.as_str(),
                    &now,
                    &child_id,
                    PolicyStatus::Active.as_str(),
                    policy_id.to_string(),
                ),
            )?;
            tx.execute(
                "UPDATE policies SET status = ?, version = version + 1, updated_at = ? WHERE id = ?",
                (PolicyStatus::Active.as_str(), &now, policy_id.to_string()),
            )?;

            tx.commit()?;
        }

        Ok(self.get_policy(policy_id)?.map(|p| p.policy))
    }

    /// Set a policy's status without touching its siblings. Used to pause a
    /// policy, or by callers that manage activation themselves.
    pub fn set_policy_status(&self, policy_id: Uuid, status: PolicyStatus) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE policies SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), Utc::now().to_rfc3339(), policy_id.to_string()),
        )?;
        Ok(rows > 0)
    }

    fn rules_for_policy(conn: &Connection, policy_id: &str) -> Result<Vec<Rule>> {
        let mut stmt = conn.prepare(
            "SELECT id, category, enabled, config
             FROM policy_rules WHERE policy_id = ? ORDER BY position",
        )?;

        let rules = stmt
            .query_map([policy_id], |row| {
                let config: String = row.get(3)?;
                Ok(Rule {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    category: RuleCategory::parse(&row.get::<_, String>(1)?),
                    enabled: row.get::<_, i32>(2)? != 0,
                    config: RuleConfig(serde_json::from_str(&config).unwrap_or(Value::Null)),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rules)
    }

    // ============================================================
    // Linked account operations
    // ============================================================

    pub fn link_account(&self, input: LinkAccountInput) -> Result<LinkedAccount> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO linked_accounts (id, family_id, platform_id, credentials, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                input.family_id.to_string(),
                &input.platform_id,
                serde_json::to_string(&input.credentials)?,
                input.status.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        tracing::debug!(
            account = %id,
            platform = %input.platform_id,
            credentials = ?input.credentials,
            "Linked account"
        );

        Ok(LinkedAccount {
            id,
            family_id: input.family_id,
            platform_id: input.platform_id,
            credentials: input.credentials,
            status: input.status,
            created_at: now,
        })
    }

    pub fn accounts_for_family(&self, family_id: Uuid) -> Result<Vec<LinkedAccount>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, family_id, platform_id, credentials, status, created_at
             FROM linked_accounts WHERE family_id = ? ORDER BY created_at",
        )?;

        let accounts = stmt
            .query_map([family_id.to_string()], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(accounts)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl ChildRepository for Database {
    fn get_child(&self, id: Uuid) -> Result<Option<Child>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, family_id, name, birth_date, created_at FROM children WHERE id = ?",
        )?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(child_from_row(row)?))
        } else {
            Ok(None)
        }
    }
}

impl PolicyRepository for Database {
    fn get_policy(&self, id: Uuid) -> Result<Option<PolicyWithRules>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let policy = {
            let mut stmt = conn.prepare(
                "SELECT id, child_id, name, status, version, created_at, updated_at
                 FROM policies WHERE id = ?",
            )?;
            let mut rows = stmt.query([id.to_string()])?;
            match rows.next()? {
                Some(row) => policy_from_row(row)?,
                None => return Ok(None),
            }
        };

        let rules = Self::rules_for_policy(&conn, &id.to_string())?;
        Ok(Some(PolicyWithRules { policy, rules }))
    }

    fn active_policies(&self, child_id: Uuid) -> Result<Vec<PolicyWithRules>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let policies = {
            let mut stmt = conn.prepare(
                "SELECT id, child_id, name, status, version, created_at, updated_at
                 FROM policies WHERE child_id = ? AND status = ? ORDER BY created_at",
            )?;
            let policies = stmt
                .query_map(
                    (child_id.to_string(), PolicyStatus::Active.as_str()),
                    policy_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            policies
        };

        policies
            .into_iter()
            .map(|policy| {
                let rules = Self::rules_for_policy(&conn, &policy.id.to_string())?;
                Ok(PolicyWithRules { policy, rules })
            })
            .collect()
    }
}

impl LinkedAccountRepository for Database {
    fn get_account(&self, id: Uuid) -> Result<Option<LinkedAccount>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, family_id, platform_id, credentials, status, created_at
             FROM linked_accounts WHERE id = ?",
        )?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(account_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    fn verified_accounts(&self, family_id: Uuid) -> Result<Vec<LinkedAccount>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, family_id, platform_id, credentials, status, created_at
             FROM linked_accounts WHERE family_id = ? AND status = ? ORDER BY created_at",
        )?;

        let accounts = stmt
            .query_map(
                (family_id.to_string(), AccountStatus::Verified.as_str()),
                account_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    fn set_account_status(&self, id: Uuid, status: AccountStatus) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE linked_accounts SET status = ? WHERE id = ?",
            (status.as_str(), id.to_string()),
        )?;
        Ok(rows > 0)
    }
}

impl EnforcementStore for Database {
    fn create_job(
        &self,
        child_id: Uuid,
        policy: &Policy,
        trigger: TriggerType,
    ) -> Result<EnforcementJob> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO enforcement_jobs
                (id, child_id, policy_id, policy_version, trigger_type, status, started_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                child_id.to_string(),
                policy.id.to_string(),
                policy.version,
                trigger.as_str(),
                EnforcementStatus::Running.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(EnforcementJob {
            id,
            child_id,
            policy_id: policy.id,
            policy_version: policy.version,
            trigger,
            status: EnforcementStatus::Running,
            started_at: now,
            completed_at: None,
        })
    }

    fn finish_job(&self, job_id: Uuid, status: EnforcementStatus) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE enforcement_jobs SET status = ?, completed_at = ?
             WHERE id = ? AND status = ?",
            (
                status.as_str(),
                Utc::now().to_rfc3339(),
                job_id.to_string(),
                EnforcementStatus::Running.as_str(),
            ),
        )?;
        Ok(rows > 0)
    }

    fn get_job(&self, id: Uuid) -> Result<Option<EnforcementJob>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, child_id, policy_id, policy_version, trigger_type, status, started_at, completed_at
             FROM enforcement_jobs WHERE id = ?",
        )?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(job_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    fn jobs_for_child(&self, child_id: Uuid) -> Result<Vec<EnforcementJob>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, child_id, policy_id, policy_version, trigger_type, status, started_at, completed_at
             FROM enforcement_jobs WHERE child_id = ? ORDER BY started_at DESC",
        )?;

        let jobs = stmt
            .query_map([child_id.to_string()], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    fn create_platform_result(
        &self,
        job_id: Uuid,
        account: &LinkedAccount,
    ) -> Result<PlatformResult> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO platform_results
                (id, job_id, linked_account_id, platform_id, status, started_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                job_id.to_string(),
                account.id.to_string(),
                &account.platform_id,
                EnforcementStatus::Running.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(PlatformResult {
            id,
            job_id,
            linked_account_id: account.id,
            platform_id: account.platform_id.clone(),
            status: EnforcementStatus::Running,
            rules_applied: 0,
            rules_skipped: 0,
            rules_failed: 0,
            details: BTreeMap::new(),
            error_message: None,
            started_at: now,
            completed_at: None,
        })
    }

    fn finish_platform_result(
        &self,
        id: Uuid,
        outcome: &PlatformOutcome,
    ) -> Result<EnforcementStatus> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let status = outcome.status();

        let rows = conn.execute(
            "UPDATE platform_results
             SET status = ?, rules_applied = ?, rules_skipped = ?, rules_failed = ?,
                 details = ?, error_message = ?, completed_at = ?
             WHERE id = ? AND status = ?",
            (
                status.as_str(),
                outcome.rules_applied,
                outcome.rules_skipped,
                outcome.rules_failed,
                serde_json::to_string(&outcome.details)?,
                &outcome.error_message,
                Utc::now().to_rfc3339(),
                id.to_string(),
                EnforcementStatus::Running.as_str(),
            ),
        )?;
        if rows == 0 {
            tracing::warn!(result = %id, "Platform result was not running; outcome dropped");
        }

        Ok(status)
    }

    fn results_for_job(&self, job_id: Uuid) -> Result<Vec<PlatformResult>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, job_id, linked_account_id, platform_id, status,
                    rules_applied, rules_skipped, rules_failed, details, error_message,
                    started_at, completed_at
             FROM platform_results WHERE job_id = ? ORDER BY platform_id, started_at",
        )?;

        let results = stmt
            .query_map([job_id.to_string()], |row| {
                let details: String = row.get(8)?;
                Ok(PlatformResult {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    job_id: parse_uuid(row.get::<_, String>(1)?),
                    linked_account_id: parse_uuid(row.get::<_, String>(2)?),
                    platform_id: row.get(3)?,
                    status: EnforcementStatus::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or(EnforcementStatus::Failed),
                    rules_applied: row.get(5)?,
                    rules_skipped: row.get(6)?,
                    rules_failed: row.get(7)?,
                    details: serde_json::from_str(&details).unwrap_or_default(),
                    error_message: row.get(9)?,
                    started_at: parse_datetime(row.get::<_, String>(10)?),
                    completed_at: row.get::<_, Option<String>>(11)?.map(parse_datetime),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(results)
    }
}

/// `guardline.db` under the platform data directory.
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "guardline")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("guardline.db"))
}

fn child_from_row(row: &Row<'_>) -> rusqlite::Result<Child> {
    Ok(Child {
        id: parse_uuid(row.get::<_, String>(0)?),
        family_id: parse_uuid(row.get::<_, String>(1)?),
        name: row.get(2)?,
        birth_date: parse_date(row.get::<_, String>(3)?),
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn policy_from_row(row: &Row<'_>) -> rusqlite::Result<Policy> {
    Ok(Policy {
        id: parse_uuid(row.get::<_, String>(0)?),
        child_id: parse_uuid(row.get::<_, String>(1)?),
        name: row.get(2)?,
        status: PolicyStatus::from_str(&row.get::<_, String>(3)?).unwrap_or(PolicyStatus::Draft),
        version: row.get(4)?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
        updated_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<LinkedAccount> {
    let credentials: String = row.get(3)?;
    Ok(LinkedAccount {
        id: parse_uuid(row.get::<_, String>(0)?),
        family_id: parse_uuid(row.get::<_, String>(1)?),
        platform_id: row.get(2)?,
        credentials: serde_json::from_str(&credentials).unwrap_or_default(),
        status: AccountStatus::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(AccountStatus::Unverified),
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<EnforcementJob> {
    Ok(EnforcementJob {
        id: parse_uuid(row.get::<_, String>(0)?),
        child_id: parse_uuid(row.get::<_, String>(1)?),
        policy_id: parse_uuid(row.get::<_, String>(2)?),
        policy_version: row.get(3)?,
        trigger: TriggerType::from_str(&row.get::<_, String>(4)?).unwrap_or(TriggerType::Manual),
        status: EnforcementStatus::from_str(&row.get::<_, String>(5)?)
            .unwrap_or(EnforcementStatus::Failed),
        started_at: parse_datetime(row.get::<_, String>(6)?),
        completed_at: row.get::<_, Option<String>>(7)?.map(parse_datetime),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_date(s: String) -> NaiveDate {
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").unwrap_or_default()
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
