//! Unauthenticated marketing-site endpoints.
//!
//! Both are rate limited per client IP and only validate, log, and
//! acknowledge the submission.

use axum::Json;
use axum::http::StatusCode;
use tracing::{info, instrument};

use crate::error::{AppError, AppResult};
use crate::models::{AcceptedResponse, AnalyticsEventRequest, ContactRequest};
use crate::validation::{validate_contact, validate_event_name, validate_event_path};

/// Largest accepted serialized `properties` object on an analytics event.
pub const MAX_EVENT_PROPERTIES_BYTES: usize = 8 * 1024;

/// Contact form submission.
#[instrument(skip(request))]
pub async fn submit_contact(
    Json(request): Json<ContactRequest>,
) -> AppResult<(StatusCode, Json<AcceptedResponse>)> {
    validate_contact(
        &request.name,
        &request.email,
        &request.message,
        request.company.as_deref(),
    )?;

    let domain = request.email.rsplit('@').next().unwrap_or_default();
    info!(
        email_domain = %domain,
        message_len = request.message.len(),
        has_company = request.company.is_some(),
        "Contact form submitted"
    );

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::now())))
}

/// Client-side analytics event.
#[instrument(skip(request))]
pub async fn record_event(
    Json(request): Json<AnalyticsEventRequest>,
) -> AppResult<(StatusCode, Json<AcceptedResponse>)> {
    validate_event_name(&request.name)?;
    if let Some(path) = &request.path {
        validate_event_path(path)?;
    }

    if !(request.properties.is_null() || request.properties.is_object()) {
        return Err(AppError::BadRequest(
            "Event properties must be a JSON object".to_string(),
        ));
    }
    let properties_size = serde_json::to_vec(&request.properties)?.len();
    if properties_size > MAX_EVENT_PROPERTIES_BYTES {
        return Err(AppError::BadRequest(format!(
            "Event properties cannot exceed {MAX_EVENT_PROPERTIES_BYTES} bytes"
        )));
    }

    info!(
        event = %request.name,
        path = request.path.as_deref().unwrap_or("-"),
        properties_size,
        "Analytics event recorded"
    );

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::now())))
}
