//! Session management: JWT access tokens and refresh tokens

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;

use crate::constants::{ACCESS_TOKEN_EXPIRY_MINUTES, REFRESH_TOKEN_EXPIRY_DAYS};
use crate::models::{Principal, PrincipalKind};

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // account id as string
    pub kind: PrincipalKind,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    Expired,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Create a JWT access token for `principal`
pub fn create_access_token(principal: Principal, secret: &[u8]) -> Result<String, SessionError> {
    let now = Utc::now();
    let exp = now + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES);

    let claims = Claims {
        sub: principal.id().to_string(),
        kind: principal.kind(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(|_| SessionError::InvalidToken)
}

/// Validate a JWT access token and return the principal it names
pub fn validate_access_token(token: &str, secret: &[u8]) -> Result<Principal, SessionError> {
    // HS256 only, no algorithm negotiation
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub", "iat"]);

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation).map_err(|e| {
        debug!("JWT decode error: {:?}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::InvalidToken,
        }
    })?;

    let id = token_data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| SessionError::InvalidToken)?;
    Ok(Principal::new(token_data.claims.kind, id))
}

fn random_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

async fn insert_refresh_token<'e, E>(executor: E, principal: Principal) -> Result<String, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let token = random_token();
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, principal_kind, principal_id, expires_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&token)
    .bind(principal.kind().as_str())
    .bind(principal.id())
    .bind(expires_at)
    .execute(executor)
    .await?;

    Ok(token)
}

/// Create a random refresh token and store it in the database
pub async fn create_refresh_token(principal: Principal, db: &SqlitePool) -> Result<String, SessionError> {
    Ok(insert_refresh_token(db, principal).await?)
}

/// Rotate a refresh token: consume the old one and issue a replacement.
///
/// Each refresh token works once. Delete and insert share a transaction so a
/// failed insert leaves the old token valid.
pub async fn rotate_refresh_token(old_token: &str, db: &SqlitePool) -> Result<(Principal, String), SessionError> {
    let mut tx = db.begin().await?;

    // Concurrent rotations of one token: only one DELETE returns the row
    let row: Option<(String, i64)> = sqlx::query_as(
        r#"
        DELETE FROM refresh_tokens
        WHERE id = ? AND expires_at > ?
        RETURNING principal_kind, principal_id
        "#,
    )
    .bind(old_token)
    .bind(Utc::now())
    .fetch_optional(&mut *tx)
    .await?;

    let (kind, id) = row.ok_or(SessionError::InvalidToken)?;
    let kind: PrincipalKind = kind.parse().map_err(|_| SessionError::InvalidToken)?;
    let principal = Principal::new(kind, id);

    let new_token = insert_refresh_token(&mut *tx, principal).await?;
    tx.commit().await?;

    Ok((principal, new_token))
}

/// Delete a specific refresh token (logout from one device)
pub async fn revoke_refresh_token(token: &str, db: &SqlitePool) -> Result<(), SessionError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE id = ?")
        .bind(token)
        .execute(db)
        .await?;
    Ok(())
}

/// Drop expired refresh tokens; run at startup
pub async fn cleanup_expired_tokens(db: &SqlitePool) -> Result<u64, SessionError> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
        .bind(Utc::now())
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::db::connect_in_memory;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn test_access_token_carries_principal() {
        for principal in [Principal::Teacher(7), Principal::Student(7)] {
            let token = create_access_token(principal, SECRET).unwrap();
            assert_eq!(validate_access_token(&token, SECRET).unwrap(), principal);
        }
    }

    #[test]
    fn test_access_token_rejects_wrong_secret() {
        let token = create_access_token(Principal::Student(1), SECRET).unwrap();
        assert!(matches!(
            validate_access_token(&token, b"other-secret"),
            Err(SessionError::InvalidToken)
        ));
        assert!(matches!(validate_access_token("garbage", SECRET), Err(SessionError::InvalidToken)));
    }

    #[test]
    fn test_expired_access_token() {
        let past = Utc::now() - Duration::hours(2);
        let claims = Claims {
            sub: "1".to_string(),
            kind: PrincipalKind::Teacher,
            exp: past.timestamp(),
            iat: (past - Duration::minutes(10)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap();
        assert!(matches!(validate_access_token(&token, SECRET), Err(SessionError::Expired)));
    }

    #[tokio::test]
    async fn test_refresh_token_rotates_once() {
        let db = connect_in_memory().await;
        let principal = Principal::Teacher(3);

        let first = create_refresh_token(principal, &db).await.unwrap();
        let (rotated_for, second) = rotate_refresh_token(&first, &db).await.unwrap();
        assert_eq!(rotated_for, principal);
        assert_ne!(first, second);

        // Replaying the consumed token fails, the new one still works
        assert!(matches!(rotate_refresh_token(&first, &db).await, Err(SessionError::InvalidToken)));
        assert!(rotate_refresh_token(&second, &db).await.is_ok());
    }

    #[tokio::test]
    async fn test_revocation() {
        let db = connect_in_memory().await;
        let student = Principal::Student(1);
        let teacher = Principal::Teacher(1);

        let a = create_refresh_token(student, &db).await.unwrap();
        let t = create_refresh_token(teacher, &db).await.unwrap();

        revoke_refresh_token(&a, &db).await.unwrap();
        assert!(rotate_refresh_token(&a, &db).await.is_err());

        // Same id, other kind: untouched
        assert!(rotate_refresh_token(&t, &db).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_expired_tokens() {
        let db = connect_in_memory().await;
        sqlx::query("INSERT INTO refresh_tokens (id, principal_kind, principal_id, expires_at) VALUES (?, 'student', 1, ?)")
            .bind("stale")
            .bind(Utc::now() - Duration::days(1))
            .execute(&db)
            .await
            .unwrap();
        create_refresh_token(Principal::Student(1), &db).await.unwrap();

        assert_eq!(cleanup_expired_tokens(&db).await.unwrap(), 1);
        assert!(rotate_refresh_token("stale", &db).await.is_err());
    }
}
