//! NextDNS adapter: DNS-level web filtering.
//!
//! Credentials: `api_key` (sent as `X-Api-Key`) and `profile_id`. NextDNS
//! filters per profile, not per child, so the child metadata is only used to
//! decide age-dependent rules such as minimum social-media age.
//!
//! Primitives are parental-control categories and services, the
//! safe-search/restricted-mode toggles, deny/allow list entries, privacy
//! blocklists and the recreation-time schedule.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};

use super::http::{VendorAuth, VendorClient};
use super::{
    drive, revoke_all, Adapter, AdapterError, AdapterSettings, AuthKind, EnforcementResult,
    PlatformInfo, PlatformKind, VendorPlan,
};
use crate::models::{
    Capability, ChildMeta, Credentials, Direction, Rule, RuleCategory, SupportLevel, TimeWindow,
};

pub const DEFAULT_BASE_URL: &str = "https://api.nextdns.io";

const CATEGORIES: &[&str] = &[
    "porn",
    "gambling",
    "dating",
    "piracy",
    "social-networks",
    "gaming",
    "video-streaming",
];

const SOCIAL_SERVICES: &[&str] = &[
    "tiktok",
    "instagram",
    "snapchat",
    "facebook",
    "twitter",
    "reddit",
];

const MULTIPLAYER_SERVICES: &[&str] = &["fortnite", "roblox", "minecraft", "league-of-legends"];

const SETTINGS: &[&str] = &["safeSearch", "youtubeRestrictedMode", "blockBypass"];

const AD_BLOCKLIST: &str = "nextdns-recommended";

const DEFAULT_FILTER_LEVEL: &str = "moderate";
const DEFAULT_MIN_SOCIAL_AGE: u64 = 13;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DnsPrimitive {
    Category { id: String, active: bool },
    Service { id: String, active: bool },
    Setting { field: &'static str, value: bool },
    Denylist(String),
    Allowlist(String),
    PrivacyBlocklist(&'static str),
    Recreation(TimeWindow),
}

pub(crate) struct DnsSession {
    api_key: String,
    profile_id: String,
}

impl DnsSession {
    fn auth(&self) -> VendorAuth<'_> {
        VendorAuth::Header("X-Api-Key", &self.api_key)
    }
}

pub struct NextDnsAdapter {
    info: PlatformInfo,
    capabilities: Vec<Capability>,
    client: VendorClient,
}

impl NextDnsAdapter {
    pub const PLATFORM_ID: &'static str = "nextdns";

    pub fn new(settings: AdapterSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            info: PlatformInfo {
                id: Self::PLATFORM_ID.to_string(),
                name: "NextDNS".to_string(),
                kind: PlatformKind::DnsFilter,
                auth: AuthKind::ApiKey,
                website: "https://nextdns.io".to_string(),
            },
            capabilities: settings.capabilities.unwrap_or_else(default_capabilities),
            client: VendorClient::new(settings.base_url, settings.timeout)?,
        })
    }

    fn session(credentials: &Credentials) -> Result<DnsSession, AdapterError> {
        Ok(DnsSession {
            api_key: credentials
                .get("api_key")
                .ok_or(AdapterError::MissingCredential("api_key"))?
                .to_string(),
            profile_id: credentials
                .get("profile_id")
                .ok_or(AdapterError::MissingCredential("profile_id"))?
                .to_string(),
        })
    }

    fn revocation_plan() -> Vec<DnsPrimitive> {
        let categories = CATEGORIES.iter().map(|id| DnsPrimitive::Category {
            id: id.to_string(),
            active: false,
        });
        let services = SOCIAL_SERVICES
            .iter()
            .chain(MULTIPLAYER_SERVICES)
            .map(|id| DnsPrimitive::Service {
                id: id.to_string(),
                active: false,
            });
        let settings = SETTINGS.iter().map(|&field| DnsPrimitive::Setting {
            field,
            value: false,
        });
        categories.chain(services).chain(settings).collect()
    }
}

/// Default capability table.
pub fn default_capabilities() -> Vec<Capability> {
    use RuleCategory::*;
    vec![
        Capability::full(WebFilterLevel),
        Capability::full(WebCategoryBlock),
        Capability::full(WebSafeSearch),
        Capability::full(WebCustomBlocklist),
        Capability::full(WebCustomAllowlist),
        Capability::partial(ContentRating, "Enforced as YouTube restricted mode only"),
        Capability::partial(SocialMediaMinAge, "Blocks major social apps at the DNS level"),
        Capability::partial(SocialMultiplayer, "Blocks popular multiplayer game services"),
        Capability::partial(TargetedAdBlock, "Ad and tracker blocklist on the profile"),
        Capability::new(
            TimeDowntime,
            SupportLevel::Partial,
            Direction::PushOnly,
            "Recreation time window; one schedule per profile",
        ),
    ]
}

/// Map a canonical web category name onto a NextDNS category id.
fn category_id(name: &str) -> Option<&'static str> {
    match name.trim().to_ascii_lowercase().as_str() {
        "porn" | "adult" | "pornography" => Some("porn"),
        "gambling" => Some("gambling"),
        "dating" => Some("dating"),
        "piracy" => Some("piracy"),
        "social" | "social_media" | "social-networks" => Some("social-networks"),
        "gaming" | "games" => Some("gaming"),
        "streaming" | "video" | "video-streaming" => Some("video-streaming"),
        _ => None,
    }
}

fn level_categories(level: &str) -> &'static [&'static str] {
    match level {
        "off" => &[],
        "light" => &["porn"],
        "strict" => &["porn", "gambling", "piracy", "dating", "social-networks"],
        // "moderate" and anything unrecognised
        _ => &["porn", "gambling", "piracy"],
    }
}

fn activate(id: &str) -> DnsPrimitive {
    DnsPrimitive::Category {
        id: id.to_string(),
        active: true,
    }
}

fn block_service(id: &str) -> DnsPrimitive {
    DnsPrimitive::Service {
        id: id.to_string(),
        active: true,
    }
}

#[async_trait]
impl VendorPlan for NextDnsAdapter {
    type Session = DnsSession;
    type Primitive = DnsPrimitive;

    async fn open_session(
        &self,
        credentials: &Credentials,
        _child: &ChildMeta,
    ) -> Result<DnsSession, AdapterError> {
        Self::session(credentials)
    }

    fn plan(&self, rule: &Rule, child: &ChildMeta) -> Option<Vec<DnsPrimitive>> {
        let config = &rule.config;
        let primitives = match &rule.category {
            RuleCategory::WebFilterLevel => {
                let level = config.str("level").unwrap_or(DEFAULT_FILTER_LEVEL);
                let mut p: Vec<_> = level_categories(level).iter().map(|c| activate(c)).collect();
                if level == "strict" {
                    p.push(DnsPrimitive::Setting {
                        field: "blockBypass",
                        value: true,
                    });
                }
                p
            }
            RuleCategory::WebCategoryBlock => config
                .strings("categories")
                .unwrap_or_else(|| vec!["porn".to_string()])
                .iter()
                .filter_map(|name| category_id(name))
                .map(activate)
                .collect(),
            RuleCategory::WebSafeSearch => vec![DnsPrimitive::Setting {
                field: "safeSearch",
                value: true,
            }],
            RuleCategory::ContentRating => vec![DnsPrimitive::Setting {
                field: "youtubeRestrictedMode",
                value: true,
            }],
            RuleCategory::WebCustomBlocklist => config
                .strings("domains")
                .unwrap_or_default()
                .into_iter()
                .map(DnsPrimitive::Denylist)
                .collect(),
            RuleCategory::WebCustomAllowlist => config
                .strings("domains")
                .unwrap_or_default()
                .into_iter()
                .map(DnsPrimitive::Allowlist)
                .collect(),
            RuleCategory::SocialMediaMinAge => {
                let min_age = config.u64("min_age").unwrap_or(DEFAULT_MIN_SOCIAL_AGE);
                if u64::from(child.age) < min_age {
                    SOCIAL_SERVICES.iter().map(|s| block_service(s)).collect()
                } else {
                    Vec::new()
                }
            }
            RuleCategory::SocialMultiplayer => match config.str("mode").unwrap_or("off") {
                "off" => MULTIPLAYER_SERVICES.iter().map(|s| block_service(s)).collect(),
                _ => Vec::new(),
            },
            RuleCategory::TargetedAdBlock => vec![DnsPrimitive::PrivacyBlocklist(AD_BLOCKLIST)],
            RuleCategory::TimeDowntime => {
                vec![DnsPrimitive::Recreation(config.window_or("21:00", "07:00"))]
            }
            _ => return None,
        };
        Some(primitives)
    }

    fn primitive_key(&self, primitive: &DnsPrimitive) -> String {
        match primitive {
            DnsPrimitive::Category { id, .. } => format!("category:{}", id),
            DnsPrimitive::Service { id, .. } => format!("service:{}", id),
            DnsPrimitive::Setting { field, .. } => format!("setting:{}", field),
            DnsPrimitive::Denylist(domain) => format!("denylist:{}", domain),
            DnsPrimitive::Allowlist(domain) => format!("allowlist:{}", domain),
            DnsPrimitive::PrivacyBlocklist(id) => format!("blocklist:{}", id),
            DnsPrimitive::Recreation(_) => "recreation".to_string(),
        }
    }

    async fn apply(
        &self,
        session: &DnsSession,
        primitive: &DnsPrimitive,
    ) -> Result<(), AdapterError> {
        let profile = &session.profile_id;
        let c = &self.client;
        match primitive {
            DnsPrimitive::Category { id, active: true } => {
                let path = format!("/profiles/{}/parentalControl/categories", profile);
                c.send_empty(
                    c.request(Method::POST, &path, session.auth())
                        .json(&json!({ "id": id, "active": true })),
                )
                .await
            }
            DnsPrimitive::Category { id, active: false } => {
                let path = format!("/profiles/{}/parentalControl/categories/{}", profile, id);
                c.send_empty_allowing(
                    c.request(Method::PATCH, &path, session.auth())
                        .json(&json!({ "active": false })),
                    &[StatusCode::NOT_FOUND],
                )
                .await
            }
            DnsPrimitive::Service { id, active: true } => {
                let path = format!("/profiles/{}/parentalControl/services", profile);
                c.send_empty(
                    c.request(Method::POST, &path, session.auth())
                        .json(&json!({ "id": id, "active": true })),
                )
                .await
            }
            DnsPrimitive::Service { id, active: false } => {
                let path = format!("/profiles/{}/parentalControl/services/{}", profile, id);
                c.send_empty_allowing(
                    c.request(Method::PATCH, &path, session.auth())
                        .json(&json!({ "active": false })),
                    &[StatusCode::NOT_FOUND],
                )
                .await
            }
            DnsPrimitive::Setting { field, value } => {
                let path = format!("/profiles/{}/parentalControl", profile);
                let mut body = Map::new();
                body.insert(field.to_string(), Value::Bool(*value));
                c.send_empty(c.request(Method::PATCH, &path, session.auth()).json(&body))
                    .await
            }
            DnsPrimitive::Denylist(domain) => {
                let path = format!("/profiles/{}/denylist", profile);
                c.send_empty(
                    c.request(Method::POST, &path, session.auth())
                        .json(&json!({ "id": domain, "active": true })),
                )
                .await
            }
            DnsPrimitive::Allowlist(domain) => {
                let path = format!("/profiles/{}/allowlist", profile);
                c.send_empty(
                    c.request(Method::POST, &path, session.auth())
                        .json(&json!({ "id": domain, "active": true })),
                )
                .await
            }
            DnsPrimitive::PrivacyBlocklist(id) => {
                let path = format!("/profiles/{}/privacy/blocklists", profile);
                c.send_empty(
                    c.request(Method::POST, &path, session.auth())
                        .json(&json!({ "id": id })),
                )
                .await
            }
            DnsPrimitive::Recreation(window) => {
                let path = format!("/profiles/{}/parentalControl", profile);
                c.send_empty(
                    c.request(Method::PATCH, &path, session.auth())
                        .json(&json!({ "recreation": recreation_body(window) })),
                )
                .await
            }
        }
    }
}

const WEEKDAYS: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// NextDNS wants one entry per weekday; an empty day list means every day.
fn recreation_body(window: &TimeWindow) -> Value {
    let days: Vec<&str> = if window.days.is_empty() {
        WEEKDAYS.to_vec()
    } else {
        WEEKDAYS
            .iter()
            .copied()
            .filter(|d| window.days.iter().any(|w| d.starts_with(&w.to_ascii_lowercase()[..])))
            .collect()
    };
    let mut times = Map::new();
    for day in days {
        times.insert(
            day.to_string(),
            json!({ "start": window.start, "end": window.end }),
        );
    }
    json!({ "times": times })
}

#[async_trait]
impl Adapter for NextDnsAdapter {
    fn info(&self) -> &PlatformInfo {
        &self.info
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn validate_auth(&self, credentials: &Credentials) -> Result<(), AdapterError> {
        let session = Self::session(credentials)?;
        let path = format!("/profiles/{}", session.profile_id);
        let _: Value = self
            .client
            .send_json(self.client.request(Method::GET, &path, session.auth()))
            .await
            .map_err(|e| match e {
                AdapterError::NotFound(_) => {
                    AdapterError::InvalidCredentials("profile does not exist".to_string())
                }
                other => other,
            })?;
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
        let session = Self::session(credentials)?;
        let path = format!("/profiles/{}", session.profile_id);
        let body: Value = self
            .client
            .send_json(self.client.request(Method::GET, &path, session.auth()))
            .await?;
        // The API wraps payloads in `data`.
        Ok(body.get("data").cloned().unwrap_or(body))
    }

    async fn revoke_policy(&self, credentials: &Credentials) -> Result<(), AdapterError> {
        let session = Self::session(credentials)?;
        revoke_all(self, Self::PLATFORM_ID, &session, &Self::revocation_plan()).await;
        Ok(())
    }
}
