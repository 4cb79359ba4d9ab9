use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule::TimeWindow;

/// Self-contained declarative bundle for an on-device agent.
///
/// The document is a pure function of the policy version, the rule set, the
/// child and the `generated_at` stamp it is compiled with. Agents compare
/// `version` (never the timestamp) to decide whether a cached bundle is stale.
///
/// Every map is a `BTreeMap` and every list keeps rule order, so two
/// compilations of the same inputs serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPolicy {
    pub version: i64,
    pub policy_id: Uuid,
    pub child_id: Uuid,
    pub child_age: u32,
    pub age_group: String,
    pub generated_at: DateTime<Utc>,
    pub content_filter: ContentFilterSection,
    pub screen_time: ScreenTimeSection,
    pub purchases: PurchasesSection,
    pub privacy: PrivacySection,
    pub social: SocialSection,
    pub notifications: NotificationsSection,
    pub web_filter: WebFilterSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentFilterSection {
    /// Age band the default ratings were derived from.
    pub age_rating: String,
    /// Maximum allowed rating per rating system (`mpaa`, `tv`, `esrb`, ...).
    pub max_ratings: BTreeMap<String, String>,
    pub blocked_titles: Vec<String>,
    pub allowed_titles: Vec<String>,
    pub allowlist_mode: bool,
    pub blocked_descriptors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenTimeSection {
    /// `None` when no daily limit rule is active.
    pub daily_limit_minutes: Option<u32>,
    pub schedules: Vec<TimeWindow>,
    pub downtime: Vec<TimeWindow>,
    pub app_limits: Vec<AppLimit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLimit {
    pub app: String,
    pub daily_minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchasesSection {
    pub require_approval: bool,
    pub approval_threshold_usd: f64,
    pub monthly_spending_cap_usd: Option<f64>,
    pub block_in_app_purchases: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivacySection {
    pub location_sharing: bool,
    pub profile_visibility: String,
    pub third_party_data_sharing: bool,
    pub account_creation_requires_approval: bool,
    pub block_targeted_ads: bool,
    pub data_deletion_requested: bool,
    pub commercial_data_ban: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialSection {
    pub contacts_mode: String,
    pub allowed_contacts: Vec<String>,
    pub chat_mode: String,
    pub multiplayer_mode: String,
    pub dm_mode: String,
    pub min_platform_age: u32,
    pub chronological_feed: bool,
    pub addictive_design_limits: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationsSection {
    pub curfew: Option<TimeWindow>,
    pub usage_timer_minutes: u32,
    pub parental_events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebFilterSection {
    pub level: String,
    pub safe_search: bool,
    pub blocked_categories: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
}
