//! Device policy compiler.
//!
//! Turns a policy's rule set into one [`CompiledPolicy`] for on-device agents
//! that cannot be reached by push. Compilation is a pure function: no I/O, no
//! clock reads (the `generated_at` stamp is an input), and every collection in
//! the output is ordered, so equal inputs give byte-identical documents.
//!
//! Each enabled rule is merged exactly once, in rule order. List fields
//! accumulate across rules of the same category; scalar fields take the last
//! value. A missing or mistyped config key yields that field's zero value.
//! Categories without a mapping here are ignored.

mod ratings;

pub use ratings::{band_for, AgeBand, AGE_BANDS};

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    age_on, AppLimit, Child, CompiledPolicy, ContentFilterSection, PolicyWithRules, Rule,
    RuleCategory, RuleConfig,
};

/// Everything a compilation depends on.
#[derive(Debug, Clone)]
pub struct CompileInput<'a> {
    pub version: i64,
    pub policy_id: Uuid,
    pub child_id: Uuid,
    pub birth_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub rules: &'a [Rule],
}

/// Compile a stored policy for a child. The child's age is taken on the
/// date of `generated_at`.
pub fn compile_policy(
    policy: &PolicyWithRules,
    child: &Child,
    generated_at: DateTime<Utc>,
) -> CompiledPolicy {
    compile(CompileInput {
        version: policy.policy.version,
        policy_id: policy.policy.id,
        child_id: child.id,
        birth_date: child.birth_date,
        generated_at,
        rules: &policy.rules,
    })
}

pub fn compile(input: CompileInput<'_>) -> CompiledPolicy {
    let age = age_on(input.birth_date, input.generated_at.date_naive());
    let band = band_for(age);

    let mut compiled = CompiledPolicy {
        version: input.version,
        policy_id: input.policy_id,
        child_id: input.child_id,
        child_age: age,
        age_group: band.label.to_string(),
        generated_at: input.generated_at,
        content_filter: ContentFilterSection {
            age_rating: band.label.to_string(),
            max_ratings: band.ratings(),
            ..Default::default()
        },
        screen_time: Default::default(),
        purchases: Default::default(),
        privacy: Default::default(),
        social: Default::default(),
        notifications: Default::default(),
        web_filter: Default::default(),
    };

    for rule in input.rules.iter().filter(|r| r.enabled) {
        if !merge(&mut compiled, rule) {
            tracing::debug!(category = %rule.category, "No compiled mapping; rule ignored");
        }
    }

    compiled
}

/// Apply one rule. Returns `false` if the category has no mapping.
fn merge(out: &mut CompiledPolicy, rule: &Rule) -> bool {
    use RuleCategory::*;

    let config = &rule.config;
    match &rule.category {
        ContentRating => {
            if let Some(overrides) = config.string_map("max_ratings") {
                out.content_filter.max_ratings.extend(overrides);
            }
        }
        ContentBlockTitle => out.content_filter.blocked_titles.extend(list(config, "titles")),
        ContentAllowTitle => out.content_filter.allowed_titles.extend(list(config, "titles")),
        ContentAllowlistMode => out.content_filter.allowlist_mode = flag(config, "enabled"),
        ContentDescriptorBlock => out
            .content_filter
            .blocked_descriptors
            .extend(list(config, "descriptors")),

        TimeDailyLimit => {
            out.screen_time.daily_limit_minutes = Some(whole(config, "daily_minutes"))
        }
        TimeScheduledHours => out.screen_time.schedules.push(config.window()),
        TimeDowntime => out.screen_time.downtime.push(config.window()),
        TimePerAppLimit => out.screen_time.app_limits.push(AppLimit {
            app: text(config, "app"),
            daily_minutes: whole(config, "minutes"),
        }),

        PurchaseApproval => {
            out.purchases.require_approval = true;
            out.purchases.approval_threshold_usd = amount(config, "threshold_usd");
        }
        PurchaseSpendingCap => {
            out.purchases.monthly_spending_cap_usd = Some(amount(config, "monthly_usd"))
        }
        PurchaseBlockIap => out.purchases.block_in_app_purchases = true,

        SocialContacts => {
            out.social.contacts_mode = text(config, "mode");
            out.social.allowed_contacts.extend(list(config, "allowed"));
        }
        SocialChatControl => out.social.chat_mode = text(config, "mode"),
        SocialMultiplayer => out.social.multiplayer_mode = text(config, "mode"),
        DmRestriction => out.social.dm_mode = text(config, "mode"),
        SocialMediaMinAge => out.social.min_platform_age = whole(config, "min_age"),
        AlgoFeedControl => out.social.chronological_feed = true,
        AddictiveDesignControl => out.social.addictive_design_limits = true,

        WebSafeSearch => out.web_filter.safe_search = true,
        WebCategoryBlock => out
            .web_filter
            .blocked_categories
            .extend(list(config, "categories")),
        WebCustomAllowlist => out.web_filter.allowed_domains.extend(list(config, "domains")),
        WebCustomBlocklist => out.web_filter.blocked_domains.extend(list(config, "domains")),
        WebFilterLevel => out.web_filter.level = text(config, "level"),

        PrivacyLocation => out.privacy.location_sharing = flag(config, "sharing"),
        GeolocationOptIn => out.privacy.location_sharing = flag(config, "opted_in"),
        PrivacyProfileVisibility => out.privacy.profile_visibility = text(config, "visibility"),
        PrivacyDataSharing => out.privacy.third_party_data_sharing = flag(config, "allowed"),
        PrivacyAccountCreation => out.privacy.account_creation_requires_approval = true,
        TargetedAdBlock => out.privacy.block_targeted_ads = true,
        DataDeletionRequest => out.privacy.data_deletion_requested = true,
        CommercialDataBan => out.privacy.commercial_data_ban = true,

        NotificationCurfew => out.notifications.curfew = Some(config.window()),
        UsageTimerNotification => {
            out.notifications.usage_timer_minutes = whole(config, "interval_minutes")
        }
        ParentalEventNotification => out
            .notifications
            .parental_events
            .extend(list(config, "events")),

        _ => return false,
    }
    true
}

fn list(config: &RuleConfig, key: &str) -> Vec<String> {
    config.strings(key).unwrap_or_default()
}

fn text(config: &RuleConfig, key: &str) -> String {
    config.str(key).unwrap_or_default().to_string()
}

fn flag(config: &RuleConfig, key: &str) -> bool {
    config.bool(key).unwrap_or_default()
}

/// A whole-number field. Values that don't fit a `u32` count as malformed.
fn whole(config: &RuleConfig, key: &str) -> u32 {
    config
        .u64(key)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or_default()
}

fn amount(config: &RuleConfig, key: &str) -> f64 {
    config.f64(key).unwrap_or_default()
}
