//! Authentication and session management endpoints

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, header::SET_COOKIE, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor};
use tracing::{info, warn};

use crate::AppState;
use crate::domain::{LedgerError, catalog, identity};
use crate::models::{Principal, PrincipalKind};
use crate::services::credentials::CredentialVerifier;
use crate::services::error::{ApiError, LogErr};
use crate::services::extract::ApiJson;
use crate::services::{cookies, session};

pub fn routes() -> Router<Arc<AppState>> {
    // Burst of 10 per client address, then one more every 6 seconds
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(6)
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config.into(),
    };

    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh_session))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(get_me))
        .route("/api/auth/account", delete(close_account))
        .layer(rate_limit_layer)
}

// ============================================================================
// Extractors
// ============================================================================

/// Any signed-in account. Reads a Bearer header first, then the cookie.
pub struct AuthPrincipal(pub Principal);

/// A signed-in teacher; students get 403
pub struct AuthTeacher(pub i64);

/// A signed-in student; teachers get 403
pub struct AuthStudent(pub i64);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

impl FromRequestParts<Arc<AppState>> for AuthPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = bearer_token(&parts.headers)
            .or_else(|| jar.get(cookies::ACCESS_TOKEN_NAME).map(|c| c.value()))
            .ok_or(ApiError::Unauthorized("authentication required"))?;

        let principal = session::validate_access_token(token, &state.config.jwt_secret)
            .map_err(|_| ApiError::Unauthorized("invalid or expired session"))?;

        Ok(AuthPrincipal(principal))
    }
}

impl FromRequestParts<Arc<AppState>> for AuthTeacher {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match AuthPrincipal::from_request_parts(parts, state).await?.0 {
            Principal::Teacher(id) => Ok(AuthTeacher(id)),
            Principal::Student(_) => Err(ApiError::Forbidden("teacher access required".to_string())),
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AuthStudent {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match AuthPrincipal::from_request_parts(parts, state).await?.0 {
            Principal::Student(id) => Ok(AuthStudent(id)),
            Principal::Teacher(_) => Err(ApiError::Forbidden("student access required".to_string())),
        }
    }
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    name: String,
    user_type: String,
}

#[derive(Serialize)]
struct AccountResponse {
    user_type: PrincipalKind,
    #[serde(flatten)]
    account: identity::Account,
}

/// POST /api/auth/register
async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let kind: PrincipalKind = req
        .user_type
        .parse()
        .map_err(|_| ApiError::BadRequest("user_type must be teacher or student".to_string()))?;

    if req.password.is_empty() {
        return Err(ApiError::BadRequest("password is required".to_string()));
    }

    let password_hash = state.credentials.hash(&req.password).log_500("Password hash error")?;
    let account = identity::create_account(
        &state.db,
        kind,
        &identity::NewAccount {
            username: req.username,
            email: req.email,
            password_hash,
            display_name: req.name,
        },
    )
    .await?;

    info!(kind = %kind, id = account.id, "Account registered");
    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            user_type: kind,
            account,
        }),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    user_type: PrincipalKind,
    user_id: i64,
    access_token: String,
}

/// Find the account a username/password pair belongs to. Teachers are
/// checked first; a failed teacher password still falls through to students.
async fn authenticate(state: &AppState, username: &str, password: &str) -> Result<Option<Principal>, ApiError> {
    for kind in [PrincipalKind::Teacher, PrincipalKind::Student] {
        let creds = identity::find_credentials(&state.db, kind, username).await?;
        if let Some(creds) = creds {
            if state.credentials.verify(password, &creds.password_hash) {
                return Ok(Some(Principal::new(kind, creds.id)));
            }
        }
    }
    Ok(None)
}

/// POST /api/auth/login - issue access and refresh tokens as cookies
async fn login(State(state): State<Arc<AppState>>, ApiJson(req): ApiJson<LoginRequest>) -> Result<Response, ApiError> {
    let principal = authenticate(&state, &req.username, &req.password)
        .await?
        .ok_or(ApiError::Unauthorized("invalid credentials"))?;

    let access_token =
        session::create_access_token(principal, &state.config.jwt_secret).log_500("Failed to create access token")?;
    let refresh_token = session::create_refresh_token(principal, &state.db)
        .await
        .log_500("Failed to create refresh token")?;

    let mut response = Json(LoginResponse {
        user_type: principal.kind(),
        user_id: principal.id(),
        access_token: access_token.clone(),
    })
    .into_response();
    let settings = &state.config.cookies;
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::build_access_cookie(&access_token, settings)?);
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::build_refresh_cookie(&refresh_token, settings)?);

    Ok(response)
}

/// POST /api/auth/refresh - rotate the refresh token, mint a new access token
async fn refresh_session(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Response, ApiError> {
    let old_refresh_token = jar
        .get(cookies::REFRESH_TOKEN_NAME)
        .map(|c| c.value().to_string())
        .ok_or(ApiError::Unauthorized("no refresh token"))?;

    // Expired or replayed tokens are routine, not worth logging
    let (principal, new_refresh_token) = session::rotate_refresh_token(&old_refresh_token, &state.db)
        .await
        .map_err(|_| ApiError::Unauthorized("invalid refresh token"))?;

    let access_token =
        session::create_access_token(principal, &state.config.jwt_secret).log_500("Failed to create access token")?;

    let settings = &state.config.cookies;
    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::build_access_cookie(&access_token, settings)?);
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::build_refresh_cookie(&new_refresh_token, settings)?);

    Ok(response)
}

fn cleared_session(settings: &crate::config::CookieSettings) -> Result<Response, ApiError> {
    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::build_clear_access_cookie(settings)?);
    response
        .headers_mut()
        .append(SET_COOKIE, cookies::build_clear_refresh_cookie(settings)?);
    Ok(response)
}

/// POST /api/auth/logout - revoke the refresh token and clear cookies
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Response, ApiError> {
    if let Some(refresh_token) = jar.get(cookies::REFRESH_TOKEN_NAME) {
        if let Err(e) = session::revoke_refresh_token(refresh_token.value(), &state.db).await {
            // Client side is logged out regardless
            warn!("Failed to revoke refresh token during logout: {}", e);
        }
    }
    cleared_session(&state.config.cookies)
}

/// GET /api/auth/me
async fn get_me(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<AccountResponse>, ApiError> {
    // A valid token for a closed account is still unauthorized
    let account = match identity::get_account(&state.db, principal).await {
        Ok(account) => account,
        Err(LedgerError::NotFound(_)) => return Err(ApiError::Unauthorized("account no longer exists")),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(AccountResponse {
        user_type: principal.kind(),
        account,
    }))
}

/// DELETE /api/auth/account - close the account and everything it owns
async fn close_account(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Response, ApiError> {
    let closed = identity::close_account(&state.db, principal).await?;
    info!(kind = %principal.kind(), id = principal.id(), "Account closed");

    catalog::reclaim_blobs(&state.storage, closed.storage_refs).await;
    cleared_session(&state.config.cookies)
}
