//! Subscription ledger - the only gate on content visibility
//!
//! A (student, teacher) pair is a set member: the UNIQUE constraint decides
//! duplicates, so concurrent subscribes for the same pair leave one row no
//! matter how they interleave.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};

use super::error::{Entity, LedgerError, is_foreign_key_violation};
use super::identity;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub student_id: i64,
    pub teacher_id: i64,
    pub subscribed_at: DateTime<Utc>,
}

/// A student's view of one of their subscriptions
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscribedTeacher {
    pub teacher_id: i64,
    pub teacher_name: String,
    pub subscribed_at: DateTime<Utc>,
}

/// A teacher's view of one subscriber
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscriber {
    pub student_id: i64,
    pub student_name: String,
    pub subscribed_at: DateTime<Utc>,
}

/// Subscriber with profile fields, for the dashboard
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RecentStudent {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub subscribed_at: DateTime<Utc>,
}

pub async fn subscribe(db: &SqlitePool, student_id: i64, teacher_id: i64) -> Result<Subscription, LedgerError> {
    let inserted = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (student_id, teacher_id, subscribed_at)
        VALUES (?, ?, ?)
        ON CONFLICT (student_id, teacher_id) DO NOTHING
        RETURNING id, student_id, teacher_id, subscribed_at
        "#,
    )
    .bind(student_id)
    .bind(teacher_id)
    .bind(Utc::now())
    .fetch_optional(db)
    .await;

    match inserted {
        Ok(Some(subscription)) => Ok(subscription),
        Ok(None) => Err(LedgerError::Conflict("already subscribed to this teacher")),
        Err(e) if is_foreign_key_violation(&e) => {
            if identity::teacher_exists(db, teacher_id).await? {
                Err(LedgerError::NotFound(Entity::Student))
            } else {
                Err(LedgerError::NotFound(Entity::Teacher))
            }
        }
        Err(e) => Err(LedgerError::Storage(e)),
    }
}

pub async fn unsubscribe<'e, E>(executor: E, student_id: i64, teacher_id: i64) -> Result<(), LedgerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM subscriptions WHERE student_id = ? AND teacher_id = ?")
        .bind(student_id)
        .bind(teacher_id)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound(Entity::Subscription));
    }
    Ok(())
}

pub async fn is_subscribed<'e, E>(executor: E, student_id: i64, teacher_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (exists,): (i64,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE student_id = ? AND teacher_id = ?)",
    )
    .bind(student_id)
    .bind(teacher_id)
    .fetch_one(executor)
    .await?;
    Ok(exists != 0)
}

pub async fn list_subscriptions_for_student<'e, E>(
    executor: E,
    student_id: i64,
) -> Result<Vec<SubscribedTeacher>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT s.teacher_id, t.display_name AS teacher_name, s.subscribed_at
        FROM subscriptions s
        JOIN teachers t ON t.id = s.teacher_id
        WHERE s.student_id = ?
        ORDER BY s.subscribed_at DESC, s.id DESC
        "#,
    )
    .bind(student_id)
    .fetch_all(executor)
    .await
}

pub async fn list_subscribers_for_teacher<'e, E>(
    executor: E,
    teacher_id: i64,
) -> Result<Vec<Subscriber>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT s.student_id, st.display_name AS student_name, s.subscribed_at
        FROM subscriptions s
        JOIN students st ON st.id = s.student_id
        WHERE s.teacher_id = ?
        ORDER BY s.subscribed_at DESC, s.id DESC
        "#,
    )
    .bind(teacher_id)
    .fetch_all(executor)
    .await
}

pub async fn count_subscribers<'e, E>(executor: E, teacher_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(DISTINCT student_id) FROM subscriptions WHERE teacher_id = ?")
            .bind(teacher_id)
            .fetch_one(executor)
            .await?;
    Ok(count)
}

/// Most recently subscribed students. One row per student since the pair is unique.
pub async fn recent_subscribers<'e, E>(
    executor: E,
    teacher_id: i64,
    limit: i64,
) -> Result<Vec<RecentStudent>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT st.id, st.username, st.display_name, s.subscribed_at
        FROM subscriptions s
        JOIN students st ON st.id = s.student_id
        WHERE s.teacher_id = ?
        ORDER BY s.subscribed_at DESC, s.id DESC
        LIMIT ?
        "#,
    )
    .bind(teacher_id)
    .bind(limit)
    .fetch_all(executor)
    .await
}
