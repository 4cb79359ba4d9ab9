//! Bark adapter: content monitoring, alerting and light web filtering.
//!
//! Credentials: `access_token` (bearer) and optionally `child_ref`, the
//! Bark-side child id. Without `child_ref` the child is matched by name.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{list_profiles, resolve_profile, VendorAuth, VendorClient};
use super::{
    drive, revoke_all, Adapter, AdapterError, AdapterSettings, AuthKind, EnforcementResult,
    PlatformInfo, PlatformKind, VendorPlan, WebhookRegistration,
};
use crate::models::{
    Capability, ChildMeta, Credentials, Direction, Rule, RuleCategory, SupportLevel, TimeWindow,
};

pub const DEFAULT_BASE_URL: &str = "https://api.bark.us";

const CHILDREN_PATH: &str = "/v1/children";

const ALERT_CATEGORIES: &[&str] = &[
    "bullying",
    "self_harm",
    "predators",
    "violence",
    "sexual_content",
    "drugs",
];

const DEFAULT_ALERTS: &[&str] = &[
    "bullying",
    "self_harm",
    "predators",
    "violence",
    "sexual_content",
];

const WEB_CATEGORIES: &[&str] = &["adult", "gambling", "violence", "drugs", "social_media"];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BarkPrimitive {
    Monitoring(bool),
    Alert { category: String, enabled: bool },
    WebBlock { category: String, blocked: bool },
    ScreenTime { slot: &'static str, window: Option<TimeWindow> },
    ContactApproval(bool),
}

pub(crate) struct BarkSession {
    token: String,
    child_ref: String,
}

impl BarkSession {
    fn auth(&self) -> VendorAuth<'_> {
        VendorAuth::Bearer(&self.token)
    }
}

#[derive(Debug, Deserialize)]
struct WebhookCreated {
    id: String,
}

pub struct BarkAdapter {
    info: PlatformInfo,
    capabilities: Vec<Capability>,
    client: VendorClient,
}

impl BarkAdapter {
    pub const PLATFORM_ID: &'static str = "bark";

    pub fn new(settings: AdapterSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            info: PlatformInfo {
                id: Self::PLATFORM_ID.to_string(),
                name: "Bark".to_string(),
                kind: PlatformKind::Monitoring,
                auth: AuthKind::BearerToken,
                website: "https://www.bark.us".to_string(),
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

    fn revocation_plan() -> Vec<BarkPrimitive> {
        let mut plan = vec![BarkPrimitive::Monitoring(false)];
        plan.extend(ALERT_CATEGORIES.iter().map(|c| BarkPrimitive::Alert {
            category: c.to_string(),
            enabled: false,
        }));
        plan.extend(WEB_CATEGORIES.iter().map(|c| BarkPrimitive::WebBlock {
            category: c.to_string(),
            blocked: false,
        }));
        plan.push(BarkPrimitive::ScreenTime {
            slot: "schedule",
            window: None,
        });
        plan.push(BarkPrimitive::ScreenTime {
            slot: "bedtime",
            window: None,
        });
        plan.push(BarkPrimitive::ContactApproval(false));
        plan
    }
}

/// Default capability table.
pub fn default_capabilities() -> Vec<Capability> {
    use RuleCategory::*;
    vec![
        Capability::new(MonitoringActivity, SupportLevel::Full, Direction::Bidirectional, ""),
        Capability::new(
            MonitoringAlerts,
            SupportLevel::Full,
            Direction::Bidirectional,
            "Alerts are delivered back through webhooks",
        ),
        Capability::partial(CsamReporting, "Escalates sexual-content and predator alerts"),
        Capability::full(WebFilterLevel),
        Capability::full(WebCategoryBlock),
        Capability::partial(TimeScheduledHours, "One daytime schedule per child"),
        Capability::partial(TimeDowntime, "One bedtime window per child"),
        Capability::partial(SocialContacts, "New contacts require approval; no allowlist"),
    ]
}

fn web_category(name: &str) -> Option<&'static str> {
    match name.trim().to_ascii_lowercase().as_str() {
        "adult" | "porn" | "pornography" => Some("adult"),
        "gambling" => Some("gambling"),
        "violence" => Some("violence"),
        "drugs" => Some("drugs"),
        "social" | "social_media" | "social-networks" => Some("social_media"),
        _ => None,
    }
}

fn level_categories(level: &str) -> &'static [&'static str] {
    match level {
        "off" => &[],
        "light" => &["adult"],
        "strict" => &["adult", "gambling", "violence", "drugs", "social_media"],
        _ => &["adult", "gambling", "drugs"],
    }
}

fn alert(category: &str) -> BarkPrimitive {
    BarkPrimitive::Alert {
        category: category.to_string(),
        enabled: true,
    }
}

fn web_block(category: &str) -> BarkPrimitive {
    BarkPrimitive::WebBlock {
        category: category.to_string(),
        blocked: true,
    }
}

#[async_trait]
impl VendorPlan for BarkAdapter {
    type Session = BarkSession;
    type Primitive = BarkPrimitive;

    async fn open_session(
        &self,
        credentials: &Credentials,
        child: &ChildMeta,
    ) -> Result<BarkSession, AdapterError> {
        let token = Self::token(credentials)?;
        let child_ref = resolve_profile(
            &self.client,
            VendorAuth::Bearer(token),
            CHILDREN_PATH,
            credentials.get("child_ref"),
            &child.name,
        )
        .await?;
        Ok(BarkSession {
            token: token.to_string(),
            child_ref,
        })
    }

    fn plan(&self, rule: &Rule, _child: &ChildMeta) -> Option<Vec<BarkPrimitive>> {
        let config = &rule.config;
        let primitives = match &rule.category {
            RuleCategory::MonitoringActivity => vec![BarkPrimitive::Monitoring(true)],
            RuleCategory::MonitoringAlerts => {
                let wanted = config
                    .strings("categories")
                    .unwrap_or_else(|| DEFAULT_ALERTS.iter().map(|s| s.to_string()).collect());
                wanted
                    .iter()
                    .filter(|c| ALERT_CATEGORIES.contains(&c.as_str()))
                    .map(|c| alert(c))
                    .collect()
            }
            RuleCategory::CsamReporting => vec![alert("sexual_content"), alert("predators")],
            RuleCategory::WebFilterLevel => {
                let level = config.str("level").unwrap_or("moderate");
                level_categories(level).iter().map(|c| web_block(c)).collect()
            }
            RuleCategory::WebCategoryBlock => config
                .strings("categories")
                .unwrap_or_else(|| vec!["adult".to_string()])
                .iter()
                .filter_map(|c| web_category(c))
                .map(web_block)
                .collect(),
            RuleCategory::TimeScheduledHours => vec![BarkPrimitive::ScreenTime {
                slot: "schedule",
                window: Some(config.window_or("08:00", "20:00")),
            }],
            RuleCategory::TimeDowntime => vec![BarkPrimitive::ScreenTime {
                slot: "bedtime",
                window: Some(config.window_or("21:00", "07:00")),
            }],
            RuleCategory::SocialContacts => vec![BarkPrimitive::ContactApproval(true)],
            _ => return None,
        };
        Some(primitives)
    }

    fn primitive_key(&self, primitive: &BarkPrimitive) -> String {
        match primitive {
            BarkPrimitive::Monitoring(_) => "monitoring".to_string(),
            BarkPrimitive::Alert { category, .. } => format!("alert:{}", category),
            BarkPrimitive::WebBlock { category, .. } => format!("web:{}", category),
            BarkPrimitive::ScreenTime { slot, .. } => format!("screen_time:{}", slot),
            BarkPrimitive::ContactApproval(_) => "contacts:approval".to_string(),
        }
    }

    async fn apply(
        &self,
        session: &BarkSession,
        primitive: &BarkPrimitive,
    ) -> Result<(), AdapterError> {
        let child = &session.child_ref;
        let c = &self.client;
        let (method, path, body) = match primitive {
            BarkPrimitive::Monitoring(enabled) => (
                Method::PUT,
                format!("{}/{}/monitoring", CHILDREN_PATH, child),
                json!({ "enabled": enabled }),
            ),
            BarkPrimitive::Alert { category, enabled } => (
                Method::PUT,
                format!("{}/{}/alerts/{}", CHILDREN_PATH, child, category),
                json!({ "enabled": enabled }),
            ),
            BarkPrimitive::WebBlock { category, blocked } => (
                Method::PUT,
                format!("{}/{}/web-filter/categories/{}", CHILDREN_PATH, child, category),
                json!({ "blocked": blocked }),
            ),
            BarkPrimitive::ScreenTime {
                slot,
                window: Some(window),
            } => (
                Method::PUT,
                format!("{}/{}/screen-time/{}", CHILDREN_PATH, child, slot),
                json!({ "days": window.days, "start": window.start, "end": window.end, "enabled": true }),
            ),
            BarkPrimitive::ScreenTime { slot, window: None } => (
                Method::PUT,
                format!("{}/{}/screen-time/{}", CHILDREN_PATH, child, slot),
                json!({ "enabled": false }),
            ),
            BarkPrimitive::ContactApproval(required) => (
                Method::PUT,
                format!("{}/{}/contacts/approval", CHILDREN_PATH, child),
                json!({ "required": required }),
            ),
        };
        c.send_empty(c.request(method, &path, session.auth()).json(&body))
            .await
    }
}

#[async_trait]
impl Adapter for BarkAdapter {
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
            .send_json(self.client.request(Method::GET, CHILDREN_PATH, VendorAuth::Bearer(token)))
            .await
    }

    /// Unlinking removes the whole family, so every child on the account is
    /// reset.
    async fn revoke_policy(&self, credentials: &Credentials) -> Result<(), AdapterError> {
        let token = Self::token(credentials)?;
        let children = match credentials.get("child_ref") {
            Some(id) => vec![id.to_string()],
            None => match list_profiles(&self.client, VendorAuth::Bearer(token), CHILDREN_PATH)
                .await
            {
                Ok(profiles) => profiles.into_iter().map(|p| p.id).collect(),
                Err(e) => {
                    tracing::warn!(
                        platform = Self::PLATFORM_ID,
                        "Could not list children for revocation: {}",
                        e
                    );
                    return Ok(());
                }
            },
        };

        let plan = Self::revocation_plan();
        for child_ref in children {
            let session = BarkSession {
                token: token.to_string(),
                child_ref,
            };
            revoke_all(self, Self::PLATFORM_ID, &session, &plan).await;
        }
        Ok(())
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    async fn register_webhook(
        &self,
        credentials: &Credentials,
        callback_url: &str,
        secret: &str,
    ) -> Result<WebhookRegistration, AdapterError> {
        let token = Self::token(credentials)?;
        let created: WebhookCreated = self
            .client
            .send_json(
                self.client
                    .request(Method::POST, "/v1/webhooks", VendorAuth::Bearer(token))
                    .json(&json!({
                        "url": callback_url,
                        "secret": secret,
                        "events": ["alert.created", "child.updated"],
                    })),
            )
            .await?;
        Ok(WebhookRegistration {
            platform_id: Self::PLATFORM_ID.to_string(),
            webhook_id: created.id,
            callback_url: callback_url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn adapter() -> BarkAdapter {
        BarkAdapter::new(AdapterSettings::new(
            "http://localhost:9",
            Duration::from_secs(1),
        ))
        .unwrap()
    }

    fn child() -> ChildMeta {
        ChildMeta {
            child_id: Uuid::new_v4(),
            name: "Noor".into(),
            age: 11,
        }
    }

    #[test]
    fn csam_reporting_overlaps_alert_primitives() {
        let a = adapter();
        let csam = a
            .plan(&Rule::new(RuleCategory::CsamReporting, json!({})), &child())
            .unwrap();
        let alerts = a
            .plan(&Rule::new(RuleCategory::MonitoringAlerts, json!({})), &child())
            .unwrap();

        let alert_keys: Vec<_> = alerts.iter().map(|p| a.primitive_key(p)).collect();
        for p in &csam {
            assert!(alert_keys.contains(&a.primitive_key(p)));
        }
    }

    #[test]
    fn unknown_alert_categories_are_ignored() {
        let rule = Rule::new(
            RuleCategory::MonitoringAlerts,
            json!({ "categories": ["bullying", "astrology"] }),
        );
        assert_eq!(adapter().plan(&rule, &child()).unwrap(), vec![alert("bullying")]);
    }

    #[test]
    fn downtime_without_times_uses_bedtime_default() {
        let rule = Rule::new(RuleCategory::TimeDowntime, json!({ "days": ["mon"] }));
        let plan = adapter().plan(&rule, &child()).unwrap();
        assert_eq!(
            plan,
            vec![BarkPrimitive::ScreenTime {
                slot: "bedtime",
                window: Some(TimeWindow {
                    days: vec!["mon".into()],
                    start: "21:00".into(),
                    end: "07:00".into(),
                }),
            }]
        );
    }

    #[test]
    fn daily_limit_is_not_mapped() {
        let rule = Rule::new(RuleCategory::TimeDailyLimit, json!({ "daily_minutes": 90 }));
        assert!(adapter().plan(&rule, &child()).is_none());
    }
}
