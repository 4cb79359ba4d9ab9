//! Qustodio adapter: screen-time limits, web rules and location.
//!
//! Credentials: `access_token` (OAuth2 bearer) and optionally `profile_id`.
//! Without `profile_id` the child is matched by name against the account's
//! profiles.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use super::http::{list_profiles, resolve_profile, VendorAuth, VendorClient};
use super::{
    drive, revoke_all, Adapter, AdapterError, AdapterSettings, AuthKind, EnforcementResult,
    PlatformInfo, PlatformKind, VendorPlan,
};
use crate::models::{
    Capability, ChildMeta, Credentials, Direction, Rule, RuleCategory, SupportLevel, TimeWindow,
};

pub const DEFAULT_BASE_URL: &str = "https://api.qustodio.com";

const PROFILES_PATH: &str = "/v1/profiles";

const DEFAULT_DAILY_MINUTES: u32 = 120;
const DEFAULT_APP_MINUTES: u32 = 60;

const WEB_CATEGORIES: &[&str] = &[
    "pornography",
    "gambling",
    "weapons",
    "drugs",
    "social_networks",
    "games",
    "dating",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QustodioPrimitive {
    DailyLimit(Option<u32>),
    AppLimit { app: String, minutes: u32 },
    RestrictedTimes(Option<TimeWindow>),
    WebCategory { category: String, blocked: bool },
    UnknownSites(bool),
    SafeSearch(bool),
    Website { domain: String, action: &'static str },
    Location(bool),
    Reports(bool),
    Activity(bool),
}

pub(crate) struct QustodioSession {
    token: String,
    profile_id: String,
}

impl QustodioSession {
    fn auth(&self) -> VendorAuth<'_> {
        VendorAuth::Bearer(&self.token)
    }
}

pub struct QustodioAdapter {
    info: PlatformInfo,
    capabilities: Vec<Capability>,
    client: VendorClient,
}

impl QustodioAdapter {
    pub const PLATFORM_ID: &'static str = "qustodio";

    pub fn new(settings: AdapterSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            info: PlatformInfo {
                id: Self::PLATFORM_ID.to_string(),
                name: "Qustodio".to_string(),
                kind: PlatformKind::Monitoring,
                auth: AuthKind::OAuth2,
                website: "https://www.qustodio.com".to_string(),
            },
            capabilities: settings.capabilities.unwrap_or_else(default_capabilities),
            client: VendorClient::new(settings.base_url, settings.timeout)?,
        })
    }

    fn token(credentials: &Credentials) -> Result<&str, AdapterError> {
        credentials
            .get("access_token")
            .ok_or(AdapterError::MissingCredential("access_token"))
    }

    fn revocation_plan() -> Vec<QustodioPrimitive> {
        let mut plan = vec![
            QustodioPrimitive::DailyLimit(None),
            QustodioPrimitive::RestrictedTimes(None),
            QustodioPrimitive::UnknownSites(false),
            QustodioPrimitive::SafeSearch(false),
            QustodioPrimitive::Location(false),
            QustodioPrimitive::Reports(false),
            QustodioPrimitive::Activity(false),
        ];
        plan.extend(WEB_CATEGORIES.iter().map(|c| QustodioPrimitive::WebCategory {
            category: c.to_string(),
            blocked: false,
        }));
        plan
    }
}

/// Default capability table.
pub fn default_capabilities() -> Vec<Capability> {
    use RuleCategory::*;
    vec![
        Capability::full(TimeDailyLimit),
        Capability::full(TimePerAppLimit),
        Capability::full(TimeScheduledHours),
        Capability::full(TimeDowntime),
        Capability::full(WebFilterLevel),
        Capability::full(WebCategoryBlock),
        Capability::full(WebSafeSearch),
        Capability::full(WebCustomBlocklist),
        Capability::full(WebCustomAllowlist),
        Capability::partial(ContentAllowlistMode, "Blocks uncategorized sites, not apps"),
        Capability::new(
            PrivacyLocation,
            SupportLevel::Partial,
            Direction::PullOnly,
            "Location is reported to guardians; sharing with others is not controlled",
        ),
        Capability::new(ScreenTimeReport, SupportLevel::Full, Direction::PullOnly, ""),
        Capability::new(MonitoringActivity, SupportLevel::Full, Direction::Bidirectional, ""),
    ]
}

fn web_category(name: &str) -> Option<&'static str> {
    match name.trim().to_ascii_lowercase().as_str() {
        "porn" | "adult" | "pornography" => Some("pornography"),
        "gambling" => Some("gambling"),
        "weapons" | "violence" => Some("weapons"),
        "drugs" => Some("drugs"),
        "social" | "social_media" | "social-networks" => Some("social_networks"),
        "gaming" | "games" => Some("games"),
        "dating" => Some("dating"),
        _ => None,
    }
}

fn level_categories(level: &str) -> &'static [&'static str] {
    match level {
        "off" => &[],
        "light" => &["pornography"],
        "strict" => &["pornography", "gambling", "weapons", "drugs", "dating", "social_networks"],
        _ => &["pornography", "gambling", "drugs"],
    }
}

fn block(category: &str) -> QustodioPrimitive {
    QustodioPrimitive::WebCategory {
        category: category.to_string(),
        blocked: true,
    }
}

fn block_action(blocked: bool) -> &'static str {
    if blocked {
        "block"
    } else {
        "allow"
    }
}

/// Missing, mistyped or out-of-range values take `default`; zero is kept.
fn minutes(value: Option<u64>, default: u32) -> u32 {
    value
        .and_then(|m| u32::try_from(m).ok())
        .unwrap_or(default)
}

#[async_trait]
impl VendorPlan for QustodioAdapter {
    type Session = QustodioSession;
    type Primitive = QustodioPrimitive;

    async fn open_session(
        &self,
        credentials: &Credentials,
        child: &ChildMeta,
    ) -> Result<QustodioSession, AdapterError> {
        let token = Self::token(credentials)?;
        let profile_id = resolve_profile(
            &self.client,
            VendorAuth::Bearer(token),
            PROFILES_PATH,
            credentials.get("profile_id"),
            &child.name,
        )
        .await?;
        Ok(QustodioSession {
            token: token.to_string(),
            profile_id,
        })
    }

    fn plan(&self, rule: &Rule, _child: &ChildMeta) -> Option<Vec<QustodioPrimitive>> {
        let config = &rule.config;
        let primitives = match &rule.category {
            RuleCategory::TimeDailyLimit => vec![QustodioPrimitive::DailyLimit(Some(minutes(
                config.u64("daily_minutes"),
                DEFAULT_DAILY_MINUTES,
            )))],
            RuleCategory::TimePerAppLimit => match config.str("app") {
                Some(app) if !app.trim().is_empty() => vec![QustodioPrimitive::AppLimit {
                    app: app.trim().to_string(),
                    minutes: minutes(config.u64("minutes"), DEFAULT_APP_MINUTES),
                }],
                _ => Vec::new(),
            },
            RuleCategory::TimeScheduledHours => vec![QustodioPrimitive::RestrictedTimes(Some(
                config.window_or("08:00", "20:00"),
            ))],
            RuleCategory::TimeDowntime => vec![QustodioPrimitive::RestrictedTimes(Some(
                config.window_or("21:00", "07:00"),
            ))],
            RuleCategory::WebFilterLevel => {
                let level = config.str("level").unwrap_or("moderate");
                let mut p: Vec<_> = level_categories(level).iter().map(|c| block(c)).collect();
                if level == "strict" {
                    p.push(QustodioPrimitive::UnknownSites(true));
                }
                p
            }
            RuleCategory::WebCategoryBlock => config
                .strings("categories")
                .unwrap_or_else(|| vec!["pornography".to_string()])
                .iter()
                .filter_map(|c| web_category(c))
                .map(block)
                .collect(),
            RuleCategory::ContentAllowlistMode => {
                vec![QustodioPrimitive::UnknownSites(config.bool("enabled").unwrap_or(true))]
            }
            RuleCategory::WebSafeSearch => vec![QustodioPrimitive::SafeSearch(true)],
            RuleCategory::WebCustomBlocklist => config
                .strings("domains")
                .unwrap_or_default()
                .into_iter()
                .map(|domain| QustodioPrimitive::Website {
                    domain,
                    action: "block",
                })
                .collect(),
            RuleCategory::WebCustomAllowlist => config
                .strings("domains")
                .unwrap_or_default()
                .into_iter()
                .map(|domain| QustodioPrimitive::Website {
                    domain,
                    action: "allow",
                })
                .collect(),
            RuleCategory::PrivacyLocation => vec![QustodioPrimitive::Location(true)],
            RuleCategory::ScreenTimeReport => vec![QustodioPrimitive::Reports(true)],
            RuleCategory::MonitoringActivity => vec![QustodioPrimitive::Activity(true)],
            _ => return None,
        };
        Some(primitives)
    }

    fn primitive_key(&self, primitive: &QustodioPrimitive) -> String {
        match primitive {
            QustodioPrimitive::DailyLimit(_) => "time:daily".to_string(),
            QustodioPrimitive::AppLimit { app, .. } => format!("app:{}", app),
            QustodioPrimitive::RestrictedTimes(Some(w)) => {
                format!("restricted:{}:{}-{}", w.days.join(","), w.start, w.end)
            }
            QustodioPrimitive::RestrictedTimes(None) => "restricted:*".to_string(),
            QustodioPrimitive::WebCategory { category, .. } => format!("web:{}", category),
            QustodioPrimitive::UnknownSites(_) => "web:unknown_sites".to_string(),
            QustodioPrimitive::SafeSearch(_) => "web:safe_search".to_string(),
            QustodioPrimitive::Website { domain, .. } => format!("site:{}", domain),
            QustodioPrimitive::Location(_) => "location".to_string(),
            QustodioPrimitive::Reports(_) => "reports".to_string(),
            QustodioPrimitive::Activity(_) => "activity".to_string(),
        }
    }

    async fn apply(
        &self,
        session: &QustodioSession,
        primitive: &QustodioPrimitive,
    ) -> Result<(), AdapterError> {
        let rules = format!("{}/{}/rules", PROFILES_PATH, session.profile_id);
        let c = &self.client;
        let (method, path, body) = match primitive {
            QustodioPrimitive::DailyLimit(limit) => (
                Method::PUT,
                format!("{}/time-limits", rules),
                json!({ "enabled": limit.is_some(), "daily_minutes": limit.unwrap_or(0) }),
            ),
            QustodioPrimitive::AppLimit { app, minutes } => (
                Method::PUT,
                format!("{}/apps/{}", rules, app),
                json!({ "daily_minutes": minutes }),
            ),
            QustodioPrimitive::RestrictedTimes(Some(window)) => (
                Method::POST,
                format!("{}/restricted-times", rules),
                json!({ "days": window.days, "start": window.start, "end": window.end }),
            ),
            QustodioPrimitive::RestrictedTimes(None) => {
                let path = format!("{}/restricted-times", rules);
                return c
                    .send_empty_allowing(
                        c.request(Method::DELETE, &path, session.auth()),
                        &[StatusCode::NOT_FOUND],
                    )
                    .await;
            }
            QustodioPrimitive::WebCategory { category, blocked } => (
                Method::PUT,
                format!("{}/web/categories/{}", rules, category),
                json!({ "action": block_action(*blocked) }),
            ),
            QustodioPrimitive::UnknownSites(blocked) => (
                Method::PUT,
                format!("{}/web/unknown-sites", rules),
                json!({ "action": block_action(*blocked) }),
            ),
            QustodioPrimitive::SafeSearch(enabled) => (
                Method::PUT,
                format!("{}/web/safe-search", rules),
                json!({ "enabled": enabled }),
            ),
            QustodioPrimitive::Website { domain, action } => (
                Method::PUT,
                format!("{}/web/sites/{}", rules, domain),
                json!({ "action": action }),
            ),
            QustodioPrimitive::Location(enabled) => (
                Method::PUT,
                format!("{}/location", rules),
                json!({ "enabled": enabled }),
            ),
            QustodioPrimitive::Reports(enabled) => (
                Method::PUT,
                format!("{}/reports", rules),
                json!({ "weekly_email": enabled }),
            ),
            QustodioPrimitive::Activity(enabled) => (
                Method::PUT,
                format!("{}/activity", rules),
                json!({ "enabled": enabled }),
            ),
        };
        c.send_empty(c.request(method, &path, session.auth()).json(&body))
            .await
    }
}

#[async_trait]
impl Adapter for QustodioAdapter {
    fn info(&self) -> &PlatformInfo {
        &self.info
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn validate_auth(&self, credentials: &Credentials) -> Result<(), AdapterError> {
        let token = Self::token(credentials)?;
        let _: Value = self
            .client
            .send_json(self.client.request(Method::GET, "/v1/account", VendorAuth::Bearer(token)))
            .await?;
        Ok(())
    }

    async fn enforce_policy(
        &self,
        rules: &[Rule],
        credentials: &Credentials,
        child: &ChildMeta,
    ) -> Result<EnforcementResult, AdapterError> {
        drive(self, Self::PLATFORM_ID, rules, credentials, child).await
    }

    async fn get_current_config(&self, credentials: &Credentials) -> Result<Value, AdapterError> {
        let token = Self::token(credentials)?;
        self.client
            .send_json(self.client.request(Method::GET, PROFILES_PATH, VendorAuth::Bearer(token)))
            .await
    }

    async fn revoke_policy(&self, credentials: &Credentials) -> Result<(), AdapterError> {
        let token = Self::token(credentials)?;
        let profiles = match credentials.get("profile_id") {
            Some(id) => vec![id.to_string()],
            None => match list_profiles(&self.client, VendorAuth::Bearer(token), PROFILES_PATH)
                .await
            {
                Ok(profiles) => profiles.into_iter().map(|p| p.id).collect(),
                Err(e) => {
                    tracing::warn!(
                        platform = Self::PLATFORM_ID,
                        "Could not list profiles for revocation: {}",
                        e
                    );
                    return Ok(());
                }
            },
        };

        let plan = Self::revocation_plan();
        for profile_id in profiles {
            let session = QustodioSession {
                token: token.to_string(),
                profile_id,
            };
            revoke_all(self, Self::PLATFORM_ID, &session, &plan).await;
        }
        Ok(())
    }
}
