use std::time::Duration;

use guardline::adapters::bark::BarkAdapter;
use guardline::adapters::nextdns::NextDnsAdapter;
use guardline::adapters::qustodio::QustodioAdapter;
use guardline::adapters::{Adapter, AdapterError, AdapterSettings};
use guardline::models::*;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{bearer_token, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> AdapterSettings {
    AdapterSettings::new(server.uri(), Duration::from_secs(5))
}

fn child(name: &str, age: u32) -> ChildMeta {
    ChildMeta {
        child_id: Uuid::new_v4(),
        name: name.to_string(),
        age,
    }
}

async fn requests_to(server: &MockServer, target: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == target)
        .count()
}

mod nextdns {
    use super::*;

    const CATEGORIES: &str = "/profiles/p1/parentalControl/categories";

    fn credentials() -> Credentials {
        Credentials::new()
            .with("api_key", "nd_key_0001")
            .with("profile_id", "p1")
    }

    async fn accept_everything(server: &MockServer) {
        Mock::given(header("X-Api-Key", "nd_key_0001"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn overlapping_rules_activate_a_category_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CATEGORIES))
            .and(body_json(json!({ "id": "porn", "active": true })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        accept_everything(&server).await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let rules = vec![
            Rule::new(RuleCategory::WebFilterLevel, json!({ "level": "strict" })),
            Rule::new(RuleCategory::WebCategoryBlock, json!({ "categories": ["porn"] })),
        ];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Sam", 9))
            .await
            .unwrap();

        assert_eq!(result.rules_applied, 2);
        assert_eq!(result.rules_failed, 0);
        assert_eq!(requests_to(&server, CATEGORIES).await, 5);
    }

    #[tokio::test]
    async fn repeating_enforcement_makes_the_same_calls() {
        let server = MockServer::start().await;
        accept_everything(&server).await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let rules = vec![
            Rule::new(RuleCategory::WebFilterLevel, json!({ "level": "moderate" })),
            Rule::new(RuleCategory::WebSafeSearch, json!({})),
        ];

        let first = adapter
            .enforce_policy(&rules, &credentials(), &child("Sam", 9))
            .await
            .unwrap();
        let after_first = server.received_requests().await.unwrap().len();
        let second = adapter
            .enforce_policy(&rules, &credentials(), &child("Sam", 9))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(after_first, 4);
        assert_eq!(server.received_requests().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn treats_conflict_as_already_applied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CATEGORIES))
            .respond_with(ResponseTemplate::new(409).set_body_string("already active"))
            .mount(&server)
            .await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let rules = vec![Rule::new(
            RuleCategory::WebCategoryBlock,
            json!({ "categories": ["porn", "gambling"] }),
        )];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Sam", 9))
            .await
            .unwrap();

        assert_eq!(result.rules_applied, 1);
        assert_eq!(result.details["web_category_block"], "applied");
    }

    #[tokio::test]
    async fn skips_disabled_and_unmapped_rules_without_calls() {
        let server = MockServer::start().await;
        accept_everything(&server).await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let rules = vec![
            Rule::new(RuleCategory::WebFilterLevel, json!({ "level": "strict" })).disabled(),
            Rule::new(RuleCategory::TimeDailyLimit, json!({ "daily_minutes": 60 })),
        ];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Sam", 9))
            .await
            .unwrap();

        assert_eq!(result.rules_skipped, 2);
        assert_eq!(result.details["web_filter_level"], "skipped: disabled");
        assert_eq!(result.details["time_daily_limit"], "skipped: unsupported");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_vendor_failure_fails_only_its_rule() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CATEGORIES))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        accept_everything(&server).await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let rules = vec![
            Rule::new(RuleCategory::WebCategoryBlock, json!({ "categories": ["porn"] })),
            Rule::new(RuleCategory::WebSafeSearch, json!({})),
        ];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Sam", 9))
            .await
            .unwrap();

        assert_eq!(result.rules_failed, 1);
        assert_eq!(result.rules_applied, 1);
        assert!(result.details["web_category_block"].starts_with("failed"));
        assert_eq!(result.details["web_safesearch"], "applied");
    }

    #[tokio::test]
    async fn a_failed_shared_category_fails_every_rule_that_needs_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CATEGORIES))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let rules = vec![
            Rule::new(RuleCategory::WebCategoryBlock, json!({ "categories": ["porn"] })),
            Rule::new(RuleCategory::WebFilterLevel, json!({ "level": "light" })),
        ];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Sam", 9))
            .await
            .unwrap();

        assert_eq!(result.rules_failed, 2);
        assert_eq!(result.rules_applied, 0);
        assert!(result.details["web_category_block"].starts_with("failed"));
        assert!(result.details["web_filter_level"].starts_with("failed"));
    }

    #[tokio::test]
    async fn an_auth_failure_aborts_the_invocation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let rules = vec![
            Rule::new(RuleCategory::WebCategoryBlock, json!({ "categories": ["porn"] })),
            Rule::new(RuleCategory::WebCustomBlocklist, json!({ "domains": ["bad.example"] })),
        ];

        let err = adapter
            .enforce_policy(&rules, &credentials(), &child("Sam", 9))
            .await
            .unwrap_err();

        assert!(err.is_auth());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reports_a_missing_credential_before_calling_out() {
        let server = MockServer::start().await;
        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let credentials = Credentials::new().with("api_key", "nd_key_0001");

        let err = adapter
            .enforce_policy(&[], &credentials, &child("Sam", 9))
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::MissingCredential("profile_id")));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validate_auth_tells_bad_credentials_from_outages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profiles/p1"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/profiles/p1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();

        let rejected = adapter.validate_auth(&credentials()).await.unwrap_err();
        assert!(rejected.is_auth());

        let outage = adapter.validate_auth(&credentials()).await.unwrap_err();
        assert!(outage.is_transient());
        assert!(!outage.is_auth());
    }

    #[tokio::test]
    async fn validate_auth_treats_an_unknown_profile_as_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profiles/p1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let err = adapter.validate_auth(&credentials()).await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidCredentials(_)));
    }

    #[tokio::test]
    async fn unwraps_the_current_config_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profiles/p1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "name": "Kids", "parentalControl": {} } })),
            )
            .mount(&server)
            .await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        let config = adapter.get_current_config(&credentials()).await.unwrap();
        assert_eq!(config["name"], "Kids");
    }

    #[tokio::test]
    async fn revocation_swallows_individual_failures() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = NextDnsAdapter::new(settings(&server)).unwrap();
        adapter.revoke_policy(&credentials()).await.unwrap();
        assert!(!server.received_requests().await.unwrap().is_empty());
    }
}

mod bark {
    use super::*;

    async fn list_children(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/children"))
            .and(bearer_token("bark_tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "c-1", "name": "Ada" },
                { "id": "c-9", "name": " noor " },
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn resolves_the_child_by_name() {
        let server = MockServer::start().await;
        list_children(&server).await;
        Mock::given(method("PUT"))
            .and(path("/v1/children/c-9/monitoring"))
            .and(body_json(json!({ "enabled": true })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = BarkAdapter::new(settings(&server)).unwrap();
        let credentials = Credentials::new().with("access_token", "bark_tok");
        let rules = vec![Rule::new(RuleCategory::MonitoringActivity, json!({}))];

        let result = adapter
            .enforce_policy(&rules, &credentials, &child("Noor", 11))
            .await
            .unwrap();

        assert_eq!(result.rules_applied, 1);
    }

    #[tokio::test]
    async fn an_explicit_child_ref_skips_the_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = BarkAdapter::new(settings(&server)).unwrap();
        let credentials = Credentials::new()
            .with("access_token", "bark_tok")
            .with("child_ref", "c-42");
        let rules = vec![Rule::new(
            RuleCategory::MonitoringAlerts,
            json!({ "categories": ["bullying", "self_harm", "not_a_bark_alert"] }),
        )];

        adapter
            .enforce_policy(&rules, &credentials, &child("Noor", 11))
            .await
            .unwrap();

        assert_eq!(requests_to(&server, "/v1/children/c-42/alerts/bullying").await, 1);
        assert_eq!(requests_to(&server, "/v1/children/c-42/alerts/self_harm").await, 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fails_when_no_child_matches() {
        let server = MockServer::start().await;
        list_children(&server).await;

        let adapter = BarkAdapter::new(settings(&server)).unwrap();
        let credentials = Credentials::new().with("access_token", "bark_tok");

        let err = adapter
            .enforce_policy(&[], &credentials, &child("Zed", 7))
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::NotFound(_)));
    }

    #[tokio::test]
    async fn registers_a_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/webhooks"))
            .and(bearer_token("bark_tok"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "wh_1" })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = BarkAdapter::new(settings(&server)).unwrap();
        assert!(adapter.supports_webhooks());

        let registration = adapter
            .register_webhook(
                &Credentials::new().with("access_token", "bark_tok"),
                "https://guardline.example/hooks/bark",
                "shh",
            )
            .await
            .unwrap();

        assert_eq!(registration.platform_id, "bark");
        assert_eq!(registration.webhook_id, "wh_1");
        assert_eq!(registration.callback_url, "https://guardline.example/hooks/bark");
    }

    #[tokio::test]
    async fn revokes_every_child_on_the_account() {
        let server = MockServer::start().await;
        list_children(&server).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = BarkAdapter::new(settings(&server)).unwrap();
        adapter
            .revoke_policy(&Credentials::new().with("access_token", "bark_tok"))
            .await
            .unwrap();

        assert_eq!(requests_to(&server, "/v1/children/c-1/monitoring").await, 1);
        assert_eq!(requests_to(&server, "/v1/children/c-9/monitoring").await, 1);
    }
}

mod qustodio {
    use super::*;

    const TIME_LIMITS: &str = "/v1/profiles/q-7/rules/time-limits";

    fn credentials() -> Credentials {
        Credentials::new()
            .with("access_token", "q_tok")
            .with("profile_id", "q-7")
    }

    #[tokio::test]
    async fn sets_the_daily_limit() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TIME_LIMITS))
            .and(bearer_token("q_tok"))
            .and(body_json(json!({ "enabled": true, "daily_minutes": 90 })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = QustodioAdapter::new(settings(&server)).unwrap();
        let rules = vec![Rule::new(RuleCategory::TimeDailyLimit, json!({ "daily_minutes": 90 }))];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Ada", 8))
            .await
            .unwrap();

        assert_eq!(result.rules_applied, 1);
        assert_eq!(result.details["time_daily_limit"], "applied");
    }

    #[tokio::test]
    async fn falls_back_to_the_default_limit_for_a_malformed_value() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TIME_LIMITS))
            .and(body_json(json!({ "enabled": true, "daily_minutes": 120 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = QustodioAdapter::new(settings(&server)).unwrap();
        let rules = vec![Rule::new(
            RuleCategory::TimeDailyLimit,
            json!({ "daily_minutes": "ninety" }),
        )];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Ada", 8))
            .await
            .unwrap();

        assert_eq!(result.rules_applied, 1);
    }

    #[tokio::test]
    async fn the_last_daily_limit_wins() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TIME_LIMITS))
            .and(body_json(json!({ "enabled": true, "daily_minutes": 30 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = QustodioAdapter::new(settings(&server)).unwrap();
        let rules = vec![
            Rule::new(RuleCategory::TimeDailyLimit, json!({ "daily_minutes": 60 })),
            Rule::new(RuleCategory::TimeDailyLimit, json!({ "daily_minutes": 30 })),
        ];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Ada", 8))
            .await
            .unwrap();

        assert_eq!(result.rules_applied, 2);
        assert_eq!(requests_to(&server, TIME_LIMITS).await, 1);
    }

    #[tokio::test]
    async fn a_zero_daily_limit_is_sent_as_zero() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TIME_LIMITS))
            .and(body_json(json!({ "enabled": true, "daily_minutes": 0 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = QustodioAdapter::new(settings(&server)).unwrap();
        let rules = vec![Rule::new(RuleCategory::TimeDailyLimit, json!({ "daily_minutes": 0 }))];

        let result = adapter
            .enforce_policy(&rules, &credentials(), &child("Ada", 8))
            .await
            .unwrap();

        assert_eq!(result.rules_applied, 1);
    }

    #[tokio::test]
    async fn revocation_tolerates_missing_restricted_times() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/profiles/q-7/rules/restricted-times"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = QustodioAdapter::new(settings(&server)).unwrap();
        adapter.revoke_policy(&credentials()).await.unwrap();

        assert_eq!(
            requests_to(&server, "/v1/profiles/q-7/rules/web/categories/gambling").await,
            1
        );
    }
}

mod every_adapter {
    use super::*;
    use std::sync::Arc;

    /// Credentials that name the vendor profile up front, so no lookup call
    /// is needed before the rules are walked.
    fn adapters(server: &MockServer) -> Vec<(Arc<dyn Adapter>, Credentials)> {
        vec![
            (
                Arc::new(NextDnsAdapter::new(settings(server)).unwrap()),
                Credentials::new().with("api_key", "k").with("profile_id", "p1"),
            ),
            (
                Arc::new(BarkAdapter::new(settings(server)).unwrap()),
                Credentials::new().with("access_token", "t").with("child_ref", "c-1"),
            ),
            (
                Arc::new(QustodioAdapter::new(settings(server)).unwrap()),
                Credentials::new().with("access_token", "t").with("profile_id", "q-1"),
            ),
        ]
    }

    #[tokio::test]
    async fn disabled_and_unknown_rules_never_reach_the_vendor() {
        let server = MockServer::start().await;
        let rules = vec![
            Rule::new(RuleCategory::WebFilterLevel, json!({ "level": "strict" })).disabled(),
            Rule::new(RuleCategory::TimeDailyLimit, json!({ "daily_minutes": 30 })).disabled(),
            Rule::new(RuleCategory::Other("hologram_curfew".into()), json!({ "level": 3 })),
        ];

        for (adapter, credentials) in adapters(&server) {
            let result = adapter
                .enforce_policy(&rules, &credentials, &child("Ada", 8))
                .await
                .unwrap();

            assert_eq!(result.rules_skipped, 3, "{}", adapter.info().id);
            assert_eq!(result.rules_applied, 0);
            assert_eq!(result.details["hologram_curfew"], "skipped: unsupported");
        }

        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
