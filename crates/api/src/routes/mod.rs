//! HTTP route handlers.

pub mod bookings;
pub mod events;
pub mod health;
pub mod metrics;
pub mod payments;
pub mod webhooks;

use std::str::FromStr;

use axum::http::HeaderMap;
use common::UserId;

use crate::error::ApiError;

/// Header carrying the authenticated user id, set by the auth layer in front of us.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Parses a UUID path segment into a typed id.
pub(crate) fn parse_id<T: FromStr>(entity: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {entity} id: {raw}")))
}

/// Reads the caller's user id from the request headers.
pub(crate) fn user_id(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
    parse_id("user", raw.trim())
}
