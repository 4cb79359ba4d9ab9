use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// A single policy directive: what kind of restriction, whether it is on,
/// and a category-specific payload.
///
/// The payload is deliberately schema-less. Every consumer reads only the
/// keys it understands through [`RuleConfig`] and ignores the rest, so new
/// keys (and new categories) can be introduced without touching every
/// adapter at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub category: RuleCategory,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: RuleConfig,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(category: RuleCategory, config: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            enabled: true,
            config: RuleConfig(config),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// The enforcement domain a category belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleDomain {
    Content,
    Time,
    Purchase,
    Social,
    Web,
    Privacy,
    Monitoring,
    Notification,
    Compliance,
    AgeVerification,
    Unknown,
}

macro_rules! rule_categories {
    ($($variant:ident => $name:literal, $domain:ident;)+) => {
        /// Canonical rule category tag.
        ///
        /// Unrecognized tags survive deserialization as [`RuleCategory::Other`]
        /// so that rule sets written by a newer model still load; every
        /// consumer treats them as unsupported.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum RuleCategory {
            $($variant,)+
            Other(String),
        }

        impl RuleCategory {
            /// Every known category, in declaration order.
            pub const KNOWN: &'static [RuleCategory] = &[$(RuleCategory::$variant,)+];

            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $name,)+
                    Self::Other(name) => name.as_str(),
                }
            }

            pub fn parse(s: &str) -> Self {
                match s {
                    $($name => Self::$variant,)+
                    other => Self::Other(other.to_string()),
                }
            }

            pub fn domain(&self) -> RuleDomain {
                match self {
                    $(Self::$variant => RuleDomain::$domain,)+
                    Self::Other(_) => RuleDomain::Unknown,
                }
            }
        }
    };
}

rule_categories! {
    ContentRating => "content_rating", Content;
    ContentBlockTitle => "content_block_title", Content;
    ContentAllowTitle => "content_allow_title", Content;
    ContentAllowlistMode => "content_allowlist_mode", Content;
    ContentDescriptorBlock => "content_descriptor_block", Content;

    TimeDailyLimit => "time_daily_limit", Time;
    TimeScheduledHours => "time_scheduled_hours", Time;
    TimePerAppLimit => "time_per_app_limit", Time;
    TimeDowntime => "time_downtime", Time;

    PurchaseApproval => "purchase_approval", Purchase;
    PurchaseSpendingCap => "purchase_spending_cap", Purchase;
    PurchaseBlockIap => "purchase_block_iap", Purchase;

    SocialContacts => "social_contacts", Social;
    SocialChatControl => "social_chat_control", Social;
    SocialMultiplayer => "social_multiplayer", Social;
    DmRestriction => "dm_restriction", Social;
    SocialMediaMinAge => "social_media_min_age", Social;
    AlgoFeedControl => "algo_feed_control", Social;
    AddictiveDesignControl => "addictive_design_control", Social;

    WebSafeSearch => "web_safesearch", Web;
    WebCategoryBlock => "web_category_block", Web;
    WebCustomAllowlist => "web_custom_allowlist", Web;
    WebCustomBlocklist => "web_custom_blocklist", Web;
    WebFilterLevel => "web_filter_level", Web;

    PrivacyLocation => "privacy_location", Privacy;
    PrivacyProfileVisibility => "privacy_profile_visibility", Privacy;
    PrivacyDataSharing => "privacy_data_sharing", Privacy;
    PrivacyAccountCreation => "privacy_account_creation", Privacy;
    TargetedAdBlock => "targeted_ad_block", Privacy;
    DataDeletionRequest => "data_deletion_request", Privacy;
    GeolocationOptIn => "geolocation_opt_in", Privacy;
    CommercialDataBan => "commercial_data_ban", Privacy;

    MonitoringActivity => "monitoring_activity", Monitoring;
    MonitoringAlerts => "monitoring_alerts", Monitoring;

    NotificationCurfew => "notification_curfew", Notification;
    UsageTimerNotification => "usage_timer_notification", Notification;
    ParentalEventNotification => "parental_event_notification", Notification;

    CsamReporting => "csam_reporting", Compliance;
    LibraryFilterCompliance => "library_filter_compliance", Compliance;
    AiMinorInteraction => "ai_minor_interaction", Compliance;
    ImageRightsMinor => "image_rights_minor", Compliance;
    ParentalConsentGate => "parental_consent_gate", Compliance;
    ScreenTimeReport => "screen_time_report", Compliance;
    AlgorithmicAudit => "algorithmic_audit", Compliance;

    AgeGate => "age_gate", AgeVerification;
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RuleCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RuleCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// A time window such as `{"days": ["sat"], "start": "07:00", "end": "20:00"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub days: Vec<String>,
    pub start: String,
    pub end: String,
}

/// Opaque rule payload with tolerant, per-key accessors.
///
/// A missing key and a key of the wrong JSON type look the same to callers:
/// `None`. Whoever reads the value picks the fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleConfig(pub Value);

impl RuleConfig {
    pub fn raw(&self) -> &Value {
        &self.0
    }

    fn field(&self, key: &str) -> Option<&Value> {
        self.0.as_object()?.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.field(key)?.as_str()
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.field(key)?.as_u64()
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.field(key)?.as_f64()
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.field(key)?.as_bool()
    }

    /// A list of strings. Non-string elements are dropped.
    pub fn strings(&self, key: &str) -> Option<Vec<String>> {
        let items = self.field(key)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )
    }

    /// An object of string values. Non-string values are dropped.
    pub fn string_map(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let object = self.field(key)?.as_object()?;
        Some(
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
        )
    }

    /// Reads the top-level `days`/`start`/`end` keys as one window.
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            days: self.strings("days").unwrap_or_default(),
            start: self.str("start").unwrap_or_default().to_string(),
            end: self.str("end").unwrap_or_default().to_string(),
        }
    }

    /// Like [`window`](Self::window), substituting `start`/`end` when either
    /// bound is missing. Days are kept as given.
    pub fn window_or(&self, start: &str, end: &str) -> TimeWindow {
        let window = self.window();
        if window.start.is_empty() || window.end.is_empty() {
            TimeWindow {
                days: window.days,
                start: start.to_string(),
                end: end.to_string(),
            }
        } else {
            window
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn category_round_trips_through_wire_name() {
        for category in RuleCategory::KNOWN {
            assert_eq!(&RuleCategory::parse(category.as_str()), category);
        }
    }

    #[test]
    fn unknown_category_is_preserved() {
        let rule: Rule = serde_json::from_value(json!({
            "category": "hologram_curfew",
            "enabled": true,
            "config": {}
        }))
        .unwrap();

        assert_eq!(rule.category, RuleCategory::Other("hologram_curfew".into()));
        assert_eq!(rule.category.domain(), RuleDomain::Unknown);
        assert_eq!(serde_json::to_value(&rule.category).unwrap(), json!("hologram_curfew"));
    }

    #[test]
    fn config_accessors_tolerate_wrong_shapes() {
        let config = RuleConfig(json!({
            "daily_minutes": "ninety",
            "domains": ["a.com", 4, "b.com"],
            "level": "strict"
        }));

        assert_eq!(config.u64("daily_minutes"), None);
        assert_eq!(config.strings("domains").unwrap(), vec!["a.com", "b.com"]);
        assert_eq!(config.str("level"), Some("strict"));
        assert_eq!(config.bool("missing"), None);

        let not_an_object = RuleConfig(json!([1, 2, 3]));
        assert_eq!(not_an_object.str("level"), None);
        assert_eq!(not_an_object.window(), TimeWindow::default());
    }

    #[test]
    fn rule_defaults_to_enabled_with_empty_config() {
        let rule: Rule = serde_json::from_value(json!({ "category": "web_safesearch" })).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.config.raw(), &Value::Null);
    }
}
