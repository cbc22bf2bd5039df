use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for API key labels.
pub const MAX_KEY_NAME_LENGTH: usize = 100;

/// Maximum length for a single permission scope.
pub const MAX_PERMISSION_LENGTH: usize = 64;

/// Maximum number of permissions on one key.
pub const MAX_PERMISSIONS: usize = 32;

/// Maximum length for owner ids issued by the identity provider.
pub const MAX_OWNER_ID_LENGTH: usize = 255;

/// Longest key lifetime accepted via `expires_in_days` (ten years).
pub const MAX_EXPIRES_IN_DAYS: u32 = 3650;

/// RFC 5321 path limit.
pub const MAX_EMAIL_LENGTH: usize = 254;

pub const MAX_CONTACT_NAME_LENGTH: usize = 200;
pub const MAX_CONTACT_MESSAGE_LENGTH: usize = 5000;

/// Maximum length for analytics event names.
///
/// Format recommendation: `area.action` (e.g., `pricing.viewed`)
pub const MAX_EVENT_NAME_LENGTH: usize = 128;

pub const MAX_EVENT_PATH_LENGTH: usize = 2048;

/// Reject empty, over-long, or control-character-bearing free text.
fn validate_text(value: &str, field: &str, max: usize) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{field} cannot be empty")));
    }

    let len = value.chars().count();
    if len > max {
        return Err(AppError::BadRequest(format!(
            "{field} cannot exceed {max} characters (got {len})"
        )));
    }

    if let Some(pos) = value
        .chars()
        .position(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t')
    {
        return Err(AppError::BadRequest(format!(
            "{field} contains invalid control character at position {pos}"
        )));
    }

    Ok(())
}

/// Validate an API key label.
pub fn validate_key_name(name: &str) -> AppResult<()> {
    validate_text(name, "Key name", MAX_KEY_NAME_LENGTH)?;
    if name.contains(['\n', '\r', '\t']) {
        return Err(AppError::BadRequest(
            "Key name must be a single line".to_string(),
        ));
    }
    Ok(())
}

/// Validate a permission scope such as `read` or `keys:manage`.
///
/// Rules:
/// - Between 1 and 64 characters
/// - Lowercase alphanumerics separated by `:`, `.`, `_` or `-`
/// - Starts and ends with an alphanumeric
/// - No consecutive separators
pub fn validate_permission(scope: &str) -> AppResult<()> {
    if scope.is_empty() {
        return Err(AppError::BadRequest(
            "Permission cannot be empty".to_string(),
        ));
    }

    if scope.len() > MAX_PERMISSION_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Permission cannot exceed {MAX_PERMISSION_LENGTH} characters"
        )));
    }

    let is_word = |c: &char| c.is_ascii_lowercase() || c.is_ascii_digit();

    if !scope.chars().next().is_some_and(|c| is_word(&c))
        || !scope.chars().last().is_some_and(|c| is_word(&c))
    {
        return Err(AppError::BadRequest(format!(
            "Permission '{scope}' must start and end with a lowercase letter or digit"
        )));
    }

    let mut prev_separator = false;
    for (i, c) in scope.chars().enumerate() {
        let is_separator = matches!(c, ':' | '.' | '_' | '-');

        if !is_word(&c) && !is_separator {
            return Err(AppError::BadRequest(format!(
                "Permission '{scope}' contains invalid character '{c}' at position {i}"
            )));
        }

        if is_separator && prev_separator {
            return Err(AppError::BadRequest(format!(
                "Permission '{scope}' cannot contain consecutive separators at position {i}"
            )));
        }

        prev_separator = is_separator;
    }

    Ok(())
}

/// Validate a permission list.
pub fn validate_permissions<'a>(scopes: impl IntoIterator<Item = &'a str>) -> AppResult<()> {
    let mut count = 0;
    for scope in scopes {
        validate_permission(scope)?;
        count += 1;
    }

    if count > MAX_PERMISSIONS {
        return Err(AppError::BadRequest(format!(
            "A key cannot carry more than {MAX_PERMISSIONS} permissions"
        )));
    }

    Ok(())
}

/// Validate an owner id taken from a path parameter.
///
/// Owner ids are opaque, but must be printable and free of whitespace.
pub fn validate_owner_id(owner_id: &str) -> AppResult<()> {
    if owner_id.is_empty() {
        return Err(AppError::BadRequest("Owner id cannot be empty".to_string()));
    }

    if owner_id.len() > MAX_OWNER_ID_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Owner id cannot exceed {MAX_OWNER_ID_LENGTH} characters"
        )));
    }

    if owner_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AppError::BadRequest(
            "Owner id cannot contain whitespace or control characters".to_string(),
        ));
    }

    Ok(())
}

/// Resolve the requested expiry to an absolute instant.
///
/// `expires_at` wins over `expires_in_days`. Neither means no expiry.
pub fn resolve_expiry(
    expires_at: Option<DateTime<Utc>>,
    expires_in_days: Option<u32>,
    now: DateTime<Utc>,
) -> AppResult<Option<DateTime<Utc>>> {
    if let Some(at) = expires_at {
        if at <= now {
            return Err(AppError::BadRequest(
                "expires_at must be in the future".to_string(),
            ));
        }
        return Ok(Some(at));
    }

    match expires_in_days {
        None => Ok(None),
        Some(days) if (1..=MAX_EXPIRES_IN_DAYS).contains(&days) => {
            Ok(Some(now + chrono::TimeDelta::days(i64::from(days))))
        }
        Some(_) => Err(AppError::BadRequest(format!(
            "expires_in_days must be between 1 and {MAX_EXPIRES_IN_DAYS}"
        ))),
    }
}

/// Shallow email syntax check: one `@`, a non-empty local part and a dotted domain.
pub fn validate_email(email: &str) -> AppResult<()> {
    let invalid = || AppError::BadRequest("Email address is invalid".to_string());

    if email.len() > MAX_EMAIL_LENGTH || email.chars().any(|c| c.is_whitespace()) {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }

    Ok(())
}

/// Validate a contact form submission.
pub fn validate_contact(
    name: &str,
    email: &str,
    message: &str,
    company: Option<&str>,
) -> AppResult<()> {
    validate_text(name, "Name", MAX_CONTACT_NAME_LENGTH)?;
    validate_email(email)?;
    validate_text(message, "Message", MAX_CONTACT_MESSAGE_LENGTH)?;
    if let Some(company) = company {
        validate_text(company, "Company", MAX_CONTACT_NAME_LENGTH)?;
    }
    Ok(())
}

/// Validate an analytics event name.
///
/// Rules:
/// - Between 1 and 128 characters
/// - Printable characters only
pub fn validate_event_name(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "Event name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_EVENT_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Event name cannot exceed {} characters (got {})",
            MAX_EVENT_NAME_LENGTH,
            name.len()
        )));
    }

    if let Some(pos) = name.chars().position(|c| c.is_control()) {
        return Err(AppError::BadRequest(format!(
            "Event name contains invalid control character at position {pos}"
        )));
    }

    Ok(())
}

/// Validate the page path attached to an analytics event.
pub fn validate_event_path(path: &str) -> AppResult<()> {
    if !path.starts_with('/') {
        return Err(AppError::BadRequest(
            "Event path must start with '/'".to_string(),
        ));
    }

    if path.len() > MAX_EVENT_PATH_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Event path cannot exceed {MAX_EVENT_PATH_LENGTH} characters"
        )));
    }

    if path.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(AppError::BadRequest(
            "Event path cannot contain whitespace or control characters".to_string(),
        ));
    }

    Ok(())
}
