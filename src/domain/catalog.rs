//! Content catalog - videos and their ownership
//!
//! Ownership (`teacher_id`) is written once at publish time and never updated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::warn;

use super::error::{Entity, LedgerError, is_foreign_key_violation};
use crate::constants::ALLOWED_VIDEO_EXTENSIONS;
use crate::storage::BinaryStorage;

/// Columns selected for every `Video` query, joined with the owner's name
const VIDEO_SELECT: &str = r#"
    SELECT v.id, v.teacher_id, t.display_name AS teacher_name, v.title, v.description,
           v.original_filename, v.storage_ref, v.thumbnail_ref,
           v.duration_seconds, v.size_bytes, v.created_at
    FROM videos v
    JOIN teachers t ON t.id = v.teacher_id
"#;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Video {
    pub id: i64,
    pub teacher_id: i64,
    pub teacher_name: String,
    pub title: String,
    pub description: String,
    pub original_filename: String,
    #[serde(skip_serializing)]
    pub storage_ref: String,
    #[serde(skip_serializing)]
    pub thumbnail_ref: Option<String>,
    pub duration_seconds: i64,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Metadata for a video whose bytes are already in storage
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub title: String,
    pub description: String,
    pub original_filename: String,
    pub storage_ref: String,
    pub thumbnail_ref: Option<String>,
    pub duration_seconds: i64,
    pub size_bytes: i64,
}

pub fn validate_title(title: &str) -> Result<(), LedgerError> {
    if title.trim().is_empty() {
        return Err(LedgerError::validation("title is required"));
    }
    Ok(())
}

/// Returns the lowercase extension (with dot) if it is an accepted container.
pub fn validate_video_filename(filename: &str) -> Result<String, LedgerError> {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();

    if ALLOWED_VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(LedgerError::validation("invalid video file type"))
    }
}

pub async fn publish_video(
    db: &SqlitePool,
    teacher_id: i64,
    new: &NewVideo,
) -> Result<Video, LedgerError> {
    validate_title(&new.title)?;
    if new.duration_seconds < 0 || new.size_bytes < 0 {
        return Err(LedgerError::validation("duration and size must be non-negative"));
    }

    let inserted: Result<(i64,), sqlx::Error> = sqlx::query_as(
        r#"
        INSERT INTO videos (teacher_id, title, description, original_filename, storage_ref,
                            thumbnail_ref, duration_seconds, size_bytes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(teacher_id)
    .bind(new.title.trim())
    .bind(&new.description)
    .bind(&new.original_filename)
    .bind(&new.storage_ref)
    .bind(&new.thumbnail_ref)
    .bind(new.duration_seconds)
    .bind(new.size_bytes)
    .bind(Utc::now())
    .fetch_one(db)
    .await;

    let (video_id,) = inserted.map_err(|e| {
        if is_foreign_key_violation(&e) {
            LedgerError::NotFound(Entity::Teacher)
        } else {
            LedgerError::Storage(e)
        }
    })?;

    get_video(db, video_id).await
}

pub async fn get_video<'e, E>(executor: E, video_id: i64) -> Result<Video, LedgerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("{} WHERE v.id = ?", VIDEO_SELECT);
    sqlx::query_as::<_, Video>(&query)
        .bind(video_id)
        .fetch_optional(executor)
        .await?
        .ok_or(LedgerError::NotFound(Entity::Video))
}

pub async fn list_videos_by_teacher<'e, E>(executor: E, teacher_id: i64) -> Result<Vec<Video>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "{} WHERE v.teacher_id = ? ORDER BY v.created_at DESC, v.id DESC",
        VIDEO_SELECT
    );
    sqlx::query_as(&query).bind(teacher_id).fetch_all(executor).await
}

pub async fn recent_videos_by_teacher<'e, E>(
    executor: E,
    teacher_id: i64,
    limit: i64,
) -> Result<Vec<Video>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "{} WHERE v.teacher_id = ? ORDER BY v.created_at DESC, v.id DESC LIMIT ?",
        VIDEO_SELECT
    );
    sqlx::query_as(&query)
        .bind(teacher_id)
        .bind(limit)
        .fetch_all(executor)
        .await
}

pub async fn count_videos_by_teacher<'e, E>(executor: E, teacher_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM videos WHERE teacher_id = ?")
        .bind(teacher_id)
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// Single feed of every video from every teacher the student follows
pub async fn list_videos_visible_to_student<'e, E>(
    executor: E,
    student_id: i64,
) -> Result<Vec<Video>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        r#"{}
        JOIN subscriptions s ON s.teacher_id = v.teacher_id
        WHERE s.student_id = ?
        ORDER BY v.created_at DESC, v.id DESC
        "#,
        VIDEO_SELECT
    );
    sqlx::query_as(&query).bind(student_id).fetch_all(executor).await
}

/// Delete a video owned by `requesting_teacher_id`.
///
/// The row delete cascades to its view records and is the authoritative
/// outcome; reclaiming the blobs afterwards is best-effort and only logged.
pub async fn delete_video<S: BinaryStorage>(
    db: &SqlitePool,
    storage: &S,
    video_id: i64,
    requesting_teacher_id: i64,
) -> Result<(), LedgerError> {
    let mut tx = db.begin().await?;

    let row: Option<(i64, String, Option<String>)> =
        sqlx::query_as("SELECT teacher_id, storage_ref, thumbnail_ref FROM videos WHERE id = ?")
            .bind(video_id)
            .fetch_optional(&mut *tx)
            .await?;

    let (owner_id, storage_ref, thumbnail_ref) = row.ok_or(LedgerError::NotFound(Entity::Video))?;
    if owner_id != requesting_teacher_id {
        return Err(LedgerError::Forbidden("not authorized to delete this video"));
    }

    sqlx::query("DELETE FROM videos WHERE id = ? AND teacher_id = ?")
        .bind(video_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let refs = std::iter::once(storage_ref).chain(thumbnail_ref);
    reclaim_blobs(storage, refs).await;
    Ok(())
}

/// Best-effort blob removal; failures are logged and never returned.
pub async fn reclaim_blobs<S, I>(storage: &S, refs: I)
where
    S: BinaryStorage,
    I: IntoIterator<Item = String>,
{
    for storage_ref in refs {
        if let Err(e) = storage.delete(&storage_ref).await {
            warn!(storage_ref = %storage_ref, error = %e, "Failed to reclaim blob");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{new_video, video};
    use super::*;
    use crate::domain::identity::fixtures::{student, teacher};
    use crate::domain::{subscriptions, views};
    use crate::services::db::connect_in_memory;
    use crate::storage::LocalDiskStorage;

    #[tokio::test]
    async fn test_publish_requires_title() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;

        let result = publish_video(&db, t, &new_video("   ")).await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(count_videos_by_teacher(&db, t).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_for_unknown_teacher_is_not_found() {
        let db = connect_in_memory().await;
        let result = publish_video(&db, 999, &new_video("lost")).await;
        assert!(matches!(result, Err(LedgerError::NotFound(Entity::Teacher))));
    }

    #[tokio::test]
    async fn test_publish_and_get() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;

        let mut new = new_video("Intro");
        new.thumbnail_ref = Some("thumbnails/intro.jpg".to_string());
        let published = publish_video(&db, t, &new).await.unwrap();

        let fetched = get_video(&db, published.id).await.unwrap();
        assert_eq!(fetched.teacher_id, t);
        assert_eq!(fetched.teacher_name, "t1 name");
        assert_eq!(fetched.title, "Intro");
        assert!(fetched.thumbnail_ref.is_some());

        assert!(matches!(get_video(&db, 12345).await, Err(LedgerError::NotFound(Entity::Video))));
    }

    #[tokio::test]
    async fn test_list_by_teacher_newest_first() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;
        let other = teacher(&db, "t2").await;

        let first = video(&db, t, "first").await;
        let second = video(&db, t, "second").await;
        video(&db, other, "elsewhere").await;

        let ids: Vec<i64> = list_videos_by_teacher(&db, t)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec![second, first]);

        let recent = recent_videos_by_teacher(&db, t, 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second);
    }

    #[tokio::test]
    async fn test_visible_feed_merges_subscribed_teachers() {
        let db = connect_in_memory().await;
        let t1 = teacher(&db, "t1").await;
        let t2 = teacher(&db, "t2").await;
        let t3 = teacher(&db, "t3").await;
        let s = student(&db, "s1").await;

        let a = video(&db, t1, "a").await;
        let b = video(&db, t2, "b").await;
        video(&db, t3, "hidden").await;
        let c = video(&db, t1, "c").await;

        subscriptions::subscribe(&db, s, t1).await.unwrap();
        subscriptions::subscribe(&db, s, t2).await.unwrap();

        let ids: Vec<i64> = list_videos_visible_to_student(&db, s)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec![c, b, a]);
    }

    #[tokio::test]
    async fn test_delete_video_cascades_views_and_reclaims_files() {
        let db = connect_in_memory().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());

        let t = teacher(&db, "t1").await;
        let s = student(&db, "s1").await;

        let video_ref = storage.store(b"bytes".to_vec().into(), "videos/a.mp4").await.unwrap();
        let thumb_ref = storage.store(b"jpg".to_vec().into(), "thumbnails/a.jpg").await.unwrap();
        let mut new = new_video("a");
        new.storage_ref = video_ref.clone();
        new.thumbnail_ref = Some(thumb_ref.clone());
        let v = publish_video(&db, t, &new).await.unwrap().id;

        subscriptions::subscribe(&db, s, t).await.unwrap();
        views::record_view(&db, s, v).await.unwrap();

        delete_video(&db, &storage, v, t).await.unwrap();

        assert!(list_videos_by_teacher(&db, t).await.unwrap().is_empty());
        assert!(matches!(views::count_views(&db, v).await, Err(LedgerError::NotFound(Entity::Video))));
        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM video_views WHERE video_id = ?")
            .bind(v)
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(!dir.path().join(&video_ref).exists());
        assert!(!dir.path().join(&thumb_ref).exists());
    }

    #[tokio::test]
    async fn test_delete_video_by_non_owner_is_forbidden() {
        let db = connect_in_memory().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());

        let owner = teacher(&db, "owner").await;
        let intruder = teacher(&db, "intruder").await;
        let s = student(&db, "s1").await;
        let v = video(&db, owner, "mine").await;
        subscriptions::subscribe(&db, s, owner).await.unwrap();
        views::record_view(&db, s, v).await.unwrap();

        let result = delete_video(&db, &storage, v, intruder).await;
        assert!(matches!(result, Err(LedgerError::Forbidden(_))));

        assert!(get_video(&db, v).await.is_ok());
        assert_eq!(views::count_views(&db, v).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_video_succeeds_when_blobs_already_gone() {
        let db = connect_in_memory().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());

        let t = teacher(&db, "t1").await;
        // fixture refs point at files that were never written
        let v = video(&db, t, "ghost").await;

        delete_video(&db, &storage, v, t).await.unwrap();
        assert!(matches!(get_video(&db, v).await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_video_is_not_found() {
        let db = connect_in_memory().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path());
        let t = teacher(&db, "t1").await;

        let result = delete_video(&db, &storage, 77, t).await;
        assert!(matches!(result, Err(LedgerError::NotFound(Entity::Video))));
    }

    #[test]
    fn test_validate_video_filename() {
        assert_eq!(validate_video_filename("lesson.MP4").unwrap(), ".mp4");
        assert_eq!(validate_video_filename("a.b.webm").unwrap(), ".webm");
        assert!(validate_video_filename("notes.pdf").is_err());
        assert!(validate_video_filename("noext").is_err());
    }
}
