pub mod api_keys;
pub mod rate_limiter;

pub use api_keys::ApiKeyService;
pub use rate_limiter::{
    MemoryRateLimitStore, RateLimitDecision, RateLimitEntry, RateLimitError, RateLimitPolicy,
    RateLimitStore, RateLimitSweeper, RateLimiter, retry_after_secs,
};
