mod admin;
mod health;
mod keys;
mod public;

pub use admin::{issue_owner_key, list_owner_keys, revoke_any_key};
pub use health::{health_check, readiness_check, stats};
pub use keys::{create_key, deactivate_key, list_keys, me, revoke_key};
pub use public::{MAX_EVENT_PROPERTIES_BYTES, record_event, submit_contact};
