//! Cookie building utilities for session management

use axum::http::HeaderValue;
use tracing::error;

use super::error::ApiError;
use crate::config::CookieSettings;
use crate::constants::{ACCESS_TOKEN_EXPIRY_MINUTES, REFRESH_TOKEN_EXPIRY_DAYS};

pub const ACCESS_TOKEN_NAME: &str = "access_token";
pub const REFRESH_TOKEN_NAME: &str = "refresh_token";

const ACCESS_TOKEN_MAX_AGE_SECS: i64 = ACCESS_TOKEN_EXPIRY_MINUTES * 60;
const REFRESH_TOKEN_MAX_AGE_SECS: i64 = REFRESH_TOKEN_EXPIRY_DAYS * 24 * 60 * 60;

/// Refresh cookie is scoped to the auth routes, the only place it is read
const ACCESS_COOKIE_PATH: &str = "/";
const REFRESH_COOKIE_PATH: &str = "/api/auth";

fn build(name: &str, value: &str, path: &str, max_age: i64, settings: &CookieSettings) -> Result<HeaderValue, ApiError> {
    let secure = if settings.secure { " Secure;" } else { "" };
    let cookie = format!(
        "{}={}; HttpOnly;{} SameSite={}; Path={}; Max-Age={}",
        name, value, secure, settings.same_site, path, max_age
    );
    cookie.parse().map_err(|_| {
        error!("Failed to parse {} cookie header", name);
        ApiError::Internal("internal error")
    })
}

/// Build an access token Set-Cookie header value
pub fn build_access_cookie(token: &str, settings: &CookieSettings) -> Result<HeaderValue, ApiError> {
    build(ACCESS_TOKEN_NAME, token, ACCESS_COOKIE_PATH, ACCESS_TOKEN_MAX_AGE_SECS, settings)
}

/// Build a refresh token Set-Cookie header value
pub fn build_refresh_cookie(token: &str, settings: &CookieSettings) -> Result<HeaderValue, ApiError> {
    build(REFRESH_TOKEN_NAME, token, REFRESH_COOKIE_PATH, REFRESH_TOKEN_MAX_AGE_SECS, settings)
}

pub fn build_clear_access_cookie(settings: &CookieSettings) -> Result<HeaderValue, ApiError> {
    build(ACCESS_TOKEN_NAME, "", ACCESS_COOKIE_PATH, 0, settings)
}

pub fn build_clear_refresh_cookie(settings: &CookieSettings) -> Result<HeaderValue, ApiError> {
    build(REFRESH_TOKEN_NAME, "", REFRESH_COOKIE_PATH, 0, settings)
}
