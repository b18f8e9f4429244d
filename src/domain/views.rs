//! View ledger - one row per (student, video), first view wins

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};

use super::error::{Entity, LedgerError};

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ViewRecord {
    pub id: i64,
    pub student_id: i64,
    pub video_id: i64,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewOutcome {
    pub record: ViewRecord,
    /// False when the student had already watched this video
    pub first_view: bool,
}

/// Analytics row for a teacher's catalog
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeacherViewEntry {
    pub student_id: i64,
    pub student_name: String,
    pub video_id: i64,
    pub video_title: String,
    pub watched_at: DateTime<Utc>,
}

/// Record that `student_id` watched `video_id`.
///
/// The subscription check and the insert are one statement: the row is only
/// produced while a subscription to the video's owner exists, and a repeat
/// insert is dropped by the (student_id, video_id) constraint without
/// touching `watched_at`. When nothing was inserted, follow-up reads decide
/// between NotFound, Forbidden, and an already-recorded view.
pub async fn record_view(db: &SqlitePool, student_id: i64, video_id: i64) -> Result<ViewOutcome, LedgerError> {
    let inserted: Option<ViewRecord> = sqlx::query_as(
        r#"
        INSERT INTO video_views (student_id, video_id, watched_at)
        SELECT s.student_id, v.id, ?
        FROM videos v
        JOIN subscriptions s ON s.teacher_id = v.teacher_id
        WHERE v.id = ? AND s.student_id = ?
        ON CONFLICT (student_id, video_id) DO NOTHING
        RETURNING id, student_id, video_id, watched_at
        "#,
    )
    .bind(Utc::now())
    .bind(video_id)
    .bind(student_id)
    .fetch_optional(db)
    .await?;

    if let Some(record) = inserted {
        return Ok(ViewOutcome {
            record,
            first_view: true,
        });
    }

    let owner: Option<(i64,)> = sqlx::query_as("SELECT teacher_id FROM videos WHERE id = ?")
        .bind(video_id)
        .fetch_optional(db)
        .await?;
    let (owner_id,) = owner.ok_or(LedgerError::NotFound(Entity::Video))?;

    let subscribed = super::subscriptions::is_subscribed(db, student_id, owner_id).await?;
    let existing = get_view(db, student_id, video_id).await?;
    already_recorded(subscribed, existing)
}

/// Outcome of a gated insert that produced no row for an existing video.
///
/// A subscription committed after the insert ran can leave `subscribed`
/// true with no view row; the gate was closed when it mattered, so that is
/// still Forbidden.
fn already_recorded(subscribed: bool, existing: Option<ViewRecord>) -> Result<ViewOutcome, LedgerError> {
    match existing {
        Some(record) if subscribed => Ok(ViewOutcome {
            record,
            first_view: false,
        }),
        _ => Err(LedgerError::Forbidden(
            "you must subscribe to this teacher to watch their videos",
        )),
    }
}

pub async fn get_view<'e, E>(executor: E, student_id: i64, video_id: i64) -> Result<Option<ViewRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT id, student_id, video_id, watched_at
        FROM video_views
        WHERE student_id = ? AND video_id = ?
        "#,
    )
    .bind(student_id)
    .bind(video_id)
    .fetch_optional(executor)
    .await
}

/// Number of distinct students who watched the video
pub async fn count_views<'e, E>(executor: E, video_id: i64) -> Result<i64, LedgerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (exists, count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT EXISTS(SELECT 1 FROM videos WHERE id = ?1),
               (SELECT COUNT(*) FROM video_views WHERE video_id = ?1)
        "#,
    )
    .bind(video_id)
    .fetch_one(executor)
    .await?;

    if exists == 0 {
        return Err(LedgerError::NotFound(Entity::Video));
    }
    Ok(count)
}

pub async fn count_views_for_teacher<'e, E>(executor: E, teacher_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM video_views vv
        JOIN videos v ON v.id = vv.video_id
        WHERE v.teacher_id = ?
        "#,
    )
    .bind(teacher_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

pub async fn list_views_for_teacher<'e, E>(
    executor: E,
    teacher_id: i64,
) -> Result<Vec<TeacherViewEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT vv.student_id, st.display_name AS student_name,
               vv.video_id, v.title AS video_title, vv.watched_at
        FROM video_views vv
        JOIN videos v ON v.id = vv.video_id
        JOIN students st ON st.id = vv.student_id
        WHERE v.teacher_id = ?
        ORDER BY vv.watched_at DESC, vv.id DESC
        "#,
    )
    .bind(teacher_id)
    .fetch_all(executor)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{self, fixtures::video};
    use crate::domain::identity::fixtures::{student, teacher};
    use crate::domain::subscriptions;
    use crate::services::db::connect_in_memory;

    #[tokio::test]
    async fn test_repeat_view_keeps_first_record() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;
        let s = student(&db, "s1").await;
        let v = video(&db, t, "v1").await;
        subscriptions::subscribe(&db, s, t).await.unwrap();

        let first = record_view(&db, s, v).await.unwrap();
        assert!(first.first_view);

        let second = record_view(&db, s, v).await.unwrap();
        assert!(!second.first_view);
        assert_eq!(second.record, first.record);
        assert_eq!(count_views(&db, v).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_view_without_subscription_is_forbidden() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;
        let other = teacher(&db, "t2").await;
        let s = student(&db, "s1").await;
        let v = video(&db, t, "v1").await;
        subscriptions::subscribe(&db, s, other).await.unwrap();

        let result = record_view(&db, s, v).await;
        assert!(matches!(result, Err(LedgerError::Forbidden(_))));
        assert_eq!(count_views(&db, v).await.unwrap(), 0);
    }

    #[test]
    fn test_subscription_after_closed_gate_is_forbidden() {
        // Subscribed by the time of the follow-up reads, but no row was written
        assert!(matches!(already_recorded(true, None), Err(LedgerError::Forbidden(_))));

        let record = ViewRecord {
            id: 1,
            student_id: 2,
            video_id: 3,
            watched_at: Utc::now(),
        };
        assert!(matches!(already_recorded(false, Some(record.clone())), Err(LedgerError::Forbidden(_))));
        let outcome = already_recorded(true, Some(record.clone())).unwrap();
        assert!(!outcome.first_view);
        assert_eq!(outcome.record, record);
    }

    #[tokio::test]
    async fn test_view_of_missing_video_is_not_found() {
        let db = connect_in_memory().await;
        let s = student(&db, "s1").await;

        let result = record_view(&db, s, 31337).await;
        assert!(matches!(result, Err(LedgerError::NotFound(Entity::Video))));
        assert!(matches!(count_views(&db, 31337).await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_views_collapse() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;
        let s = student(&db, "s1").await;
        let v = video(&db, t, "v1").await;
        subscriptions::subscribe(&db, s, t).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let db = db.clone();
            tasks.spawn(async move { record_view(&db, s, v).await });
        }

        let mut firsts = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap().unwrap().first_view {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 1);
        assert_eq!(count_views(&db, v).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_watch_scenario_history_survives_unsubscribe() {
        let db = connect_in_memory().await;
        let t1 = teacher(&db, "t1").await;
        let s1 = student(&db, "s1").await;
        let v1 = video(&db, t1, "v1").await;

        assert!(matches!(record_view(&db, s1, v1).await, Err(LedgerError::Forbidden(_))));
        assert_eq!(count_views(&db, v1).await.unwrap(), 0);

        subscriptions::subscribe(&db, s1, t1).await.unwrap();
        record_view(&db, s1, v1).await.unwrap();
        assert_eq!(count_views(&db, v1).await.unwrap(), 1);

        record_view(&db, s1, v1).await.unwrap();
        assert_eq!(count_views(&db, v1).await.unwrap(), 1);

        subscriptions::unsubscribe(&db, s1, t1).await.unwrap();
        let feed = catalog::list_videos_visible_to_student(&db, s1).await.unwrap();
        assert!(feed.iter().all(|v| v.id != v1));
        assert_eq!(count_views(&db, v1).await.unwrap(), 1);

        // History stays, but new views are blocked again
        assert!(matches!(record_view(&db, s1, v1).await, Err(LedgerError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_teacher_analytics() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;
        let other = teacher(&db, "t2").await;
        let s1 = student(&db, "s1").await;
        let s2 = student(&db, "s2").await;
        let v1 = video(&db, t, "v1").await;
        let v2 = video(&db, t, "v2").await;
        let elsewhere = video(&db, other, "x").await;

        for s in [s1, s2] {
            subscriptions::subscribe(&db, s, t).await.unwrap();
            subscriptions::subscribe(&db, s, other).await.unwrap();
        }
        record_view(&db, s1, v1).await.unwrap();
        record_view(&db, s2, v2).await.unwrap();
        record_view(&db, s1, elsewhere).await.unwrap();

        assert_eq!(count_views_for_teacher(&db, t).await.unwrap(), 2);

        let entries = list_views_for_teacher(&db, t).await.unwrap();
        let pairs: Vec<(i64, i64)> = entries.iter().map(|e| (e.student_id, e.video_id)).collect();
        assert_eq!(pairs, vec![(s2, v2), (s1, v1)]);
        assert_eq!(entries[0].video_title, "v2");
        assert_eq!(entries[0].student_name, "s2 name");
    }
}
