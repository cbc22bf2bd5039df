mod api;
mod api_key;

pub use api::{
    AcceptedResponse, AnalyticsEventRequest, ContactRequest, HealthResponse, StatsResponse,
};
pub use api_key::{
    ApiKeyRecord, ApiKeySummary, CreateApiKeyRequest, CreateApiKeyResponse, IssuedApiKey,
    NewApiKey, PERMISSION_KEYS_MANAGE, PERMISSION_READ, Principal,
};
