use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contact form submission from the marketing site.
#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
    /// Optional company name
    #[serde(default)]
    pub company: Option<String>,
}

/// Client-side analytics event.
#[derive(Debug, Deserialize)]
pub struct AnalyticsEventRequest {
    /// Event name, e.g. `page_view` or `cta.click`
    pub name: String,
    /// Page path the event was recorded on
    #[serde(default)]
    pub path: Option<String>,
    /// Free-form event properties
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// Acknowledgement for fire-and-forget submissions.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub received_at: DateTime<Utc>,
}

impl AcceptedResponse {
    pub fn now() -> Self {
        Self {
            accepted: true,
            received_at: Utc::now(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Whether the API key store answered a ping
    pub key_store_available: bool,
    /// Key store backend name
    pub key_store: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Statistics response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Client identities currently held in the rate-limit table
    pub rate_limit_tracked_clients: usize,
    /// Key store backend name
    pub key_store: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_request_optional_company() {
        let json = r#"{"name": "Ada", "email": "ada@example.com", "message": "Hello"}"#;
        let request: ContactRequest =
            serde_json::from_str(json).expect("Deserialization should succeed");

        assert_eq!(request.name, "Ada");
        assert!(request.company.is_none());
    }

    #[test]
    fn test_analytics_event_defaults() {
        let json = r#"{"name": "page_view"}"#;
        let request: AnalyticsEventRequest =
            serde_json::from_str(json).expect("Deserialization should succeed");

        assert_eq!(request.name, "page_view");
        assert!(request.path.is_none());
        assert!(request.properties.is_null());
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            key_store_available: true,
            key_store: "memory".to_string(),
            version: "0.1.0".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"key_store\":\"memory\""));
    }
}
