//! Identity store - teacher and student accounts
//!
//! Both kinds share one row shape and live in separate tables, so every query
//! here is parameterised by `PrincipalKind` and picks its table from it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};

use super::error::{Entity, LedgerError, is_unique_violation};
use crate::models::{Principal, PrincipalKind};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
}

/// Minimal credential row used by login
#[derive(Debug, sqlx::FromRow)]
pub struct Credentials {
    pub id: i64,
    pub password_hash: String,
}

/// Public teacher directory entry
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeacherSummary {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Blob references orphaned by closing an account
#[derive(Debug, Default)]
pub struct ClosedAccount {
    pub storage_refs: Vec<String>,
}

impl NewAccount {
    fn validate(&self) -> Result<(), LedgerError> {
        if self.username.trim().is_empty() {
            return Err(LedgerError::validation("username is required"));
        }
        if self.display_name.trim().is_empty() {
            return Err(LedgerError::validation("name is required"));
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(LedgerError::validation("a valid email is required"));
        }
        Ok(())
    }
}

/// Register a new account of the given kind
pub async fn create_account<'e, E>(
    executor: E,
    kind: PrincipalKind,
    new: &NewAccount,
) -> Result<Account, LedgerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    new.validate()?;

    let query = format!(
        r#"
        INSERT INTO {} (username, email, password_hash, display_name, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, username, email, password_hash, display_name, created_at
        "#,
        kind.table()
    );

    sqlx::query_as::<_, Account>(&query)
        .bind(new.username.trim())
        .bind(new.email.trim())
        .bind(&new.password_hash)
        .bind(new.display_name.trim())
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::Conflict("username or email already registered")
            } else {
                LedgerError::Storage(e)
            }
        })
}

pub async fn find_credentials<'e, E>(
    executor: E,
    kind: PrincipalKind,
    username: &str,
) -> Result<Option<Credentials>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT id, password_hash FROM {} WHERE username = ?",
        kind.table()
    );
    sqlx::query_as(&query)
        .bind(username.trim())
        .fetch_optional(executor)
        .await
}

pub async fn get_account<'e, E>(executor: E, principal: Principal) -> Result<Account, LedgerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let kind = principal.kind();
    let query = format!(
        r#"
        SELECT id, username, email, password_hash, display_name, created_at
        FROM {}
        WHERE id = ?
        "#,
        kind.table()
    );

    sqlx::query_as::<_, Account>(&query)
        .bind(principal.id())
        .fetch_optional(executor)
        .await?
        .ok_or(LedgerError::NotFound(match kind {
            PrincipalKind::Teacher => Entity::Teacher,
            PrincipalKind::Student => Entity::Student,
        }))
}

pub async fn teacher_exists<'e, E>(executor: E, teacher_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (exists,): (i64,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM teachers WHERE id = ?)")
        .bind(teacher_id)
        .fetch_one(executor)
        .await?;
    Ok(exists != 0)
}

/// All teachers, alphabetical by display name
pub async fn list_teachers<'e, E>(executor: E) -> Result<Vec<TeacherSummary>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT id, username, display_name, created_at
        FROM teachers
        ORDER BY display_name COLLATE NOCASE, id
        "#,
    )
    .fetch_all(executor)
    .await
}

/// Delete an account and everything that cascades from it.
///
/// Returns the blob references of a teacher's videos so the caller can
/// reclaim them once the rows are gone. Refresh tokens have no foreign key
/// (they point at either table) and are removed explicitly.
pub async fn close_account(db: &SqlitePool, principal: Principal) -> Result<ClosedAccount, LedgerError> {
    let mut tx = db.begin().await?;

    let storage_refs = match principal {
        Principal::Teacher(id) => {
            let rows: Vec<(String, Option<String>)> =
                sqlx::query_as("SELECT storage_ref, thumbnail_ref FROM videos WHERE teacher_id = ?")
                    .bind(id)
                    .fetch_all(&mut *tx)
                    .await?;
            rows.into_iter()
                .flat_map(|(video, thumb)| std::iter::once(video).chain(thumb))
                .collect()
        }
        Principal::Student(_) => Vec::new(),
    };

    let query = format!("DELETE FROM {} WHERE id = ?", principal.kind().table());
    let result = sqlx::query(&query)
        .bind(principal.id())
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound(match principal {
            Principal::Teacher(_) => Entity::Teacher,
            Principal::Student(_) => Entity::Student,
        }));
    }

    sqlx::query("DELETE FROM refresh_tokens WHERE principal_kind = ? AND principal_id = ?")
        .bind(principal.kind().as_str())
        .bind(principal.id())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(ClosedAccount { storage_refs })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub async fn teacher(db: &SqlitePool, username: &str) -> i64 {
        account(db, PrincipalKind::Teacher, username).await
    }

    pub async fn student(db: &SqlitePool, username: &str) -> i64 {
        account(db, PrincipalKind::Student, username).await
    }

    async fn account(db: &SqlitePool, kind: PrincipalKind, username: &str) -> i64 {
        let new = NewAccount {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: "unused".to_string(),
            display_name: format!("{} name", username),
        };
        create_account(db, kind, &new).await.expect("create account").id
    }
}
