//! End-to-end tests against a real server on an ephemeral port.
//!
//! Each fixture gets its own in-memory key store and rate limiter, so tests
//! can run in parallel without sharing counters.
//!
//! Run with: `cargo test --test integration_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use keygate::config::{LogFormat, RateLimitSettings};
use keygate::store::MemoryApiKeyStore;
use keygate::{AppState, Config, SystemClock, build_router};

const ADMIN_SECRET: &str = "integration-admin-secret";

/// Test fixture that runs the app server in the background.
struct TestFixture {
    base_url: String,
    client: Client,
    state: AppState,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_config(Self::config()).await
    }

    /// Relaxed limits except where a test needs to hit them quickly.
    fn config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            rate_limit_contact: RateLimitSettings::new(2, 60_000),
            auth_failure: RateLimitSettings::new(3, 60_000),
            admin_api_key: Some(ADMIN_SECRET.to_string()),
            log_level: "warn".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 0,
            ..Config::default()
        }
    }

    async fn with_config(config: Config) -> Self {
        let state = AppState::new(
            config,
            Arc::new(MemoryApiKeyStore::new()),
            Arc::new(SystemClock),
        );
        let app = build_router(state.clone()).expect("Failed to build router");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("Server failed");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            state,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issue a key through the admin API and return `(id, secret)`.
    async fn issue_key(&self, owner_id: &str, permissions: &[&str]) -> (String, String) {
        let response = self
            .client
            .post(self.url(&format!("/admin/owners/{owner_id}/keys")))
            .header("x-admin-key", ADMIN_SECRET)
            .json(&json!({ "name": "integration", "permissions": permissions }))
            .send()
            .await
            .expect("Issue request failed");
        assert_eq!(response.status(), StatusCode::CREATED);

        let body: Value = response.json().await.expect("Failed to parse response");
        (
            body["id"].as_str().expect("id missing").to_string(),
            body["key"].as_str().expect("key missing").to_string(),
        )
    }

    async fn get_me(&self, secret: &str) -> reqwest::Response {
        self.client
            .get(self.url("/api/me"))
            .bearer_auth(secret)
            .send()
            .await
            .expect("Request failed")
    }
}

// ============================================================================
// Health & Status Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .expect("Health request failed");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["key_store_available"], true);
    assert_eq!(body["key_store"], "memory");
    assert!(body.get("version").is_some());
    assert!(body.get("timestamp").is_some());
}

#[tokio::test]
async fn test_readiness_endpoint() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .get(fixture.url("/ready"))
        .send()
        .await
        .expect("Readiness request failed");

    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_stats_requires_key() {
    let fixture = TestFixture::new().await;
    let (_, secret) = fixture.issue_key("user_1", &["read"]).await;

    let response = fixture
        .client
        .get(fixture.url("/api/stats"))
        .send()
        .await
        .expect("Stats request failed");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fixture
        .client
        .get(fixture.url("/api/stats"))
        .header("x-api-key", &secret)
        .send()
        .await
        .expect("Stats request failed");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body.get("uptime_seconds").is_some());
    assert!(body["rate_limit_tracked_clients"].as_u64().unwrap() >= 1);
}

// ============================================================================
// Admin Tests
// ============================================================================

#[tokio::test]
async fn test_admin_requires_secret() {
    let fixture = TestFixture::new().await;

    for header in [None, Some("wrong-secret-value-here")] {
        let mut request = fixture
            .client
            .post(fixture.url("/admin/owners/user_1/keys"))
            .json(&json!({ "name": "ci" }));
        if let Some(value) = header {
            request = request.header("x-admin-key", value);
        }
        let response = request.send().await.expect("Request failed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_admin_issues_prefixed_key() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/admin/owners/user_1/keys"))
        .header("x-admin-key", ADMIN_SECRET)
        .json(&json!({ "name": "ci", "expires_in_days": 30 }))
        .send()
        .await
        .expect("Issue request failed");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await.expect("Failed to parse response");
    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with("kg_"));
    assert!(key.starts_with(body["key_start"].as_str().unwrap()));
    assert_eq!(body["owner_id"], "user_1");
    assert_eq!(body["permissions"], json!(["read"]));
    assert!(body["expires_at"].is_string());
    assert!(body.get("hashed_secret").is_none());

    let response = fixture
        .client
        .get(fixture.url("/admin/owners/user_1/keys"))
        .header("x-admin-key", ADMIN_SECRET)
        .send()
        .await
        .expect("List request failed");
    let keys: Vec<Value> = response.json().await.expect("Failed to parse response");
    assert_eq!(keys.len(), 1);
    assert!(keys[0].get("key").is_none());
}

#[tokio::test]
async fn test_admin_rejects_unknown_fields() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/admin/owners/user_1/keys"))
        .header("x-admin-key", ADMIN_SECRET)
        .json(&json!({ "name": "ci", "owner_id": "someone_else" }))
        .send()
        .await
        .expect("Request failed");
    assert!(response.status().is_client_error());
}

// ============================================================================
// Authentication Tests
// ============================================================================

#[tokio::test]
async fn test_bearer_and_header_credentials() {
    let fixture = TestFixture::new().await;
    let (id, secret) = fixture.issue_key("user_1", &["read", "keys:manage"]).await;

    let response = fixture.get_me(&secret).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["owner_id"], "user_1");
    assert_eq!(body["key_id"], id.as_str());
    assert_eq!(body["permissions"], json!(["keys:manage", "read"]));

    let response = fixture
        .client
        .get(fixture.url("/api/me"))
        .header("x-api-key", &secret)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_last_used_is_recorded() {
    let fixture = TestFixture::new().await;
    let (_, secret) = fixture.issue_key("user_1", &["read"]).await;

    assert_eq!(fixture.get_me(&secret).await.status(), StatusCode::OK);

    let keys = fixture
        .state
        .api_keys
        .list_for_owner("user_1")
        .await
        .unwrap();
    assert!(keys[0].last_used_at.is_some());
}

#[tokio::test]
async fn test_auth_failures_are_indistinguishable() {
    let fixture = TestFixture::new().await;

    let missing = fixture
        .client
        .get(fixture.url("/api/me"))
        .header("x-forwarded-for", "203.0.113.1")
        .send()
        .await
        .expect("Request failed");
    let invalid = fixture
        .client
        .get(fixture.url("/api/me"))
        .header("x-forwarded-for", "203.0.113.2")
        .bearer_auth("kg_not-a-real-key")
        .send()
        .await
        .expect("Request failed");

    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(missing.headers()["www-authenticate"], "Bearer");
    assert_eq!(
        missing.text().await.unwrap(),
        invalid.text().await.unwrap()
    );
}

#[tokio::test]
async fn test_auth_lockout_after_repeated_failures() {
    let fixture = TestFixture::new().await;
    let (_, secret) = fixture.issue_key("user_1", &["read"]).await;

    for _ in 0..3 {
        let response = fixture.get_me("kg_wrong").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Locked out even with a valid key
    let response = fixture.get_me(&secret).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    // Other clients are unaffected
    let response = fixture
        .client
        .get(fixture.url("/api/me"))
        .header("x-forwarded-for", "198.51.100.7")
        .bearer_auth(&secret)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Key Management Tests
// ============================================================================

#[tokio::test]
async fn test_create_key_requires_manage_permission() {
    let fixture = TestFixture::new().await;
    let (_, secret) = fixture.issue_key("user_1", &["read"]).await;

    let response = fixture
        .client
        .post(fixture.url("/api/keys"))
        .bearer_auth(&secret)
        .json(&json!({ "name": "child" }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_key_cannot_escalate() {
    let fixture = TestFixture::new().await;
    let (_, secret) = fixture.issue_key("user_1", &["read", "keys:manage"]).await;

    let response = fixture
        .client
        .post(fixture.url("/api/keys"))
        .bearer_auth(&secret)
        .json(&json!({ "name": "child", "permissions": ["billing:write"] }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_key_lifecycle() {
    let fixture = TestFixture::new().await;
    let (_, manager) = fixture.issue_key("user_1", &["read", "keys:manage"]).await;

    // Create a child key
    let response = fixture
        .client
        .post(fixture.url("/api/keys"))
        .bearer_auth(&manager)
        .json(&json!({ "name": "child" }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    let child_id = body["id"].as_str().unwrap().to_string();
    let child = body["key"].as_str().unwrap().to_string();
    assert_eq!(fixture.get_me(&child).await.status(), StatusCode::OK);

    // Both keys are listed
    let response = fixture
        .client
        .get(fixture.url("/api/keys"))
        .bearer_auth(&manager)
        .send()
        .await
        .expect("Request failed");
    let keys: Vec<Value> = response.json().await.unwrap();
    assert_eq!(keys.len(), 2);

    // Deactivate stops it authenticating but keeps the record
    let response = fixture
        .client
        .post(fixture.url(&format!("/api/keys/{child_id}/deactivate")))
        .bearer_auth(&manager)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        fixture.get_me(&child).await.status(),
        StatusCode::UNAUTHORIZED
    );

    // Revoke removes it
    let response = fixture
        .client
        .delete(fixture.url(&format!("/api/keys/{child_id}")))
        .bearer_auth(&manager)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = fixture
        .client
        .get(fixture.url("/api/keys"))
        .bearer_auth(&manager)
        .send()
        .await
        .expect("Request failed");
    let keys: Vec<Value> = response.json().await.unwrap();
    assert_eq!(keys.len(), 1);
}

#[tokio::test]
async fn test_cannot_touch_other_owners_keys() {
    let fixture = TestFixture::new().await;
    let (_, manager) = fixture.issue_key("user_1", &["read", "keys:manage"]).await;
    let (other_id, other) = fixture.issue_key("user_2", &["read"]).await;

    let response = fixture
        .client
        .delete(fixture.url(&format!("/api/keys/{other_id}")))
        .bearer_auth(&manager)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(fixture.get_me(&other).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_revoke_any_key() {
    let fixture = TestFixture::new().await;
    let (id, secret) = fixture.issue_key("user_1", &["read"]).await;

    let response = fixture
        .client
        .delete(fixture.url(&format!("/admin/keys/{id}")))
        .header("x-admin-key", ADMIN_SECRET)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        fixture.get_me(&secret).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

// ============================================================================
// Public Endpoint & Rate Limiting Tests
// ============================================================================

async fn post_contact(fixture: &TestFixture, client_ip: &str) -> reqwest::Response {
    fixture
        .client
        .post(fixture.url("/contact"))
        .header("x-forwarded-for", client_ip)
        .json(&json!({
            "name": "Ada",
            "email": "ada@example.com",
            "message": "Interested in the enterprise plan"
        }))
        .send()
        .await
        .expect("Request failed")
}

#[tokio::test]
async fn test_contact_rate_limit_returns_429() {
    let fixture = TestFixture::new().await;

    for remaining in ["1", "0"] {
        let response = post_contact(&fixture, "203.0.113.10").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    let response = post_contact(&fixture, "203.0.113.10").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(
        response.headers().contains_key("retry-after"),
        "Rate limited response should include Retry-After header"
    );
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    // A different client has its own budget
    let response = post_contact(&fixture, "203.0.113.11").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_rate_limit_disabled() {
    let fixture = TestFixture::with_config(Config {
        rate_limit_enabled: false,
        ..TestFixture::config()
    })
    .await;

    for _ in 0..5 {
        let response = post_contact(&fixture, "203.0.113.10").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}

#[tokio::test]
async fn test_contact_validation() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/contact"))
        .json(&json!({ "name": "Ada", "email": "not-an-email", "message": "hi there" }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analytics_event() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/analytics/events"))
        .json(&json!({ "name": "page_view", "path": "/pricing", "properties": { "ref": "ad" } }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], true);

    let response = fixture
        .client
        .post(fixture.url("/analytics/events"))
        .json(&json!({ "name": "page_view", "properties": [1, 2, 3] }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
