//! Unit tests for domain models.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use uuid::Uuid;

// Note: These tests can be run with: cargo test --test model_tests

fn record() -> keygate::models::ApiKeyRecord {
    keygate::models::ApiKeyRecord {
        id: Uuid::new_v4(),
        name: "CI".to_string(),
        hashed_secret: "ab".repeat(32),
        key_start: "kg_AbCd".to_string(),
        owner_id: "user_1".to_string(),
        is_active: true,
        expires_at: None,
        permissions: BTreeSet::from(["read".to_string(), "keys:manage".to_string()]),
        last_used_at: None,
        created_at: Utc::now(),
    }
}

/// API key model tests
mod api_key_tests {
    use super::*;
    use keygate::models::{
        ApiKeySummary, CreateApiKeyRequest, CreateApiKeyResponse, IssuedApiKey, Principal,
    };

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let mut key = record();
        assert!(!key.is_expired_at(now));

        key.expires_at = Some(now);
        assert!(!key.is_expired_at(now));
        assert!(key.is_expired_at(now + TimeDelta::milliseconds(1)));
    }

    #[test]
    fn test_principal_from_record() {
        let key = record();
        let principal = Principal::from(&key);

        assert_eq!(principal.owner_id, "user_1");
        assert_eq!(principal.key_id, key.id);
        assert!(principal.has_permission("keys:manage"));
        assert!(!principal.has_permission("billing:write"));
    }

    #[test]
    fn test_summary_omits_digest() {
        let value = serde_json::to_value(ApiKeySummary::from(&record())).unwrap();

        assert!(value.get("hashed_secret").is_none());
        assert_eq!(value["key_start"], "kg_AbCd");
        assert_eq!(value["permissions"], json!(["keys:manage", "read"]));
        assert!(value["expires_at"].is_null());
    }

    #[test]
    fn test_create_response_flattens_summary() {
        let issued = IssuedApiKey {
            record: record(),
            secret: "kg_AbCdEfGh".to_string(),
        };
        let value = serde_json::to_value(CreateApiKeyResponse::from(issued)).unwrap();

        assert_eq!(value["key"], "kg_AbCdEfGh");
        assert_eq!(value["owner_id"], "user_1");
        assert!(value.get("api_key").is_none());
    }

    #[test]
    fn test_create_request_defaults() {
        let request: CreateApiKeyRequest = serde_json::from_value(json!({ "name": "CI" })).unwrap();

        assert_eq!(request.name, "CI");
        assert!(request.permissions.is_none());
        assert!(request.expires_at.is_none());
        assert!(request.expires_in_days.is_none());
    }

    #[test]
    fn test_create_request_rejects_unknown_fields() {
        let result: Result<CreateApiKeyRequest, _> =
            serde_json::from_value(json!({ "name": "CI", "owner_id": "someone_else" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_create_request_parses_rfc3339_expiry() {
        let request: CreateApiKeyRequest = serde_json::from_value(json!({
            "name": "CI",
            "expires_at": "2030-01-01T00:00:00Z",
            "permissions": ["read"]
        }))
        .unwrap();

        assert_eq!(
            request.expires_at.unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
        assert_eq!(request.permissions, Some(vec!["read".to_string()]));
    }
}

/// Public endpoint DTO tests
mod api_tests {
    use super::*;
    use keygate::models::{AcceptedResponse, AnalyticsEventRequest, ContactRequest};

    #[test]
    fn test_contact_company_optional() {
        let request: ContactRequest = serde_json::from_value(json!({
            "name": "Ada",
            "email": "ada@example.com",
            "message": "Hello"
        }))
        .unwrap();

        assert!(request.company.is_none());
    }

    #[test]
    fn test_event_defaults() {
        let request: AnalyticsEventRequest =
            serde_json::from_value(json!({ "name": "page_view" })).unwrap();

        assert!(request.path.is_none());
        assert!(request.properties.is_null());
    }

    #[test]
    fn test_accepted_response() {
        let value = serde_json::to_value(AcceptedResponse::now()).unwrap();
        assert_eq!(value["accepted"], true);
        assert!(value["received_at"].is_string());
    }
}

/// Validation tests exercised through the public API
mod validation_tests {
    use super::*;
    use keygate::validation::{resolve_expiry, validate_owner_id, validate_permission};

    #[test]
    fn test_permission_format() {
        assert!(validate_permission("read").is_ok());
        assert!(validate_permission("keys:manage").is_ok());
        assert!(validate_permission("Keys Manage").is_err());
        assert!(validate_permission("").is_err());
    }

    #[test]
    fn test_owner_id() {
        assert!(validate_owner_id("user_2abc").is_ok());
        assert!(validate_owner_id("").is_err());
    }

    #[test]
    fn test_expiry_must_be_future() {
        let now = Utc::now();
        assert!(resolve_expiry(Some(now - TimeDelta::seconds(1)), None, now).is_err());
        assert_eq!(
            resolve_expiry(None, Some(1), now).unwrap(),
            Some(now + TimeDelta::days(1))
        );
        assert_eq!(resolve_expiry(None, None, now).unwrap(), None);
    }
}
