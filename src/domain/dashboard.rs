//! Dashboard rollups - read-only composition over the catalog and both ledgers

use serde::Serialize;
use sqlx::SqlitePool;

use super::catalog::{self, Video};
use super::error::{Entity, LedgerError};
use super::subscriptions::{self, RecentStudent, SubscribedTeacher};
use super::{identity, views};
use crate::constants::DASHBOARD_RECENT_LIMIT;

#[derive(Debug, Serialize)]
pub struct TeacherStats {
    pub total_videos: i64,
    pub total_distinct_students: i64,
    pub total_views: i64,
    pub recent_videos: Vec<Video>,
    pub recent_students: Vec<RecentStudent>,
}

#[derive(Debug, Serialize)]
pub struct StudentDashboard {
    pub subscriptions: Vec<SubscribedTeacher>,
    pub videos: Vec<Video>,
}

pub async fn get_teacher_stats(db: &SqlitePool, teacher_id: i64) -> Result<TeacherStats, LedgerError> {
    // One read transaction so the counts and lists describe the same snapshot
    let mut tx = db.begin().await?;

    if !identity::teacher_exists(&mut *tx, teacher_id).await? {
        return Err(LedgerError::NotFound(Entity::Teacher));
    }

    let total_videos = catalog::count_videos_by_teacher(&mut *tx, teacher_id).await?;
    let total_distinct_students = subscriptions::count_subscribers(&mut *tx, teacher_id).await?;
    let total_views = views::count_views_for_teacher(&mut *tx, teacher_id).await?;
    let recent_videos =
        catalog::recent_videos_by_teacher(&mut *tx, teacher_id, DASHBOARD_RECENT_LIMIT).await?;
    let recent_students =
        subscriptions::recent_subscribers(&mut *tx, teacher_id, DASHBOARD_RECENT_LIMIT).await?;

    tx.commit().await?;

    Ok(TeacherStats {
        total_videos,
        total_distinct_students,
        total_views,
        recent_videos,
        recent_students,
    })
}

pub async fn get_student_dashboard(db: &SqlitePool, student_id: i64) -> Result<StudentDashboard, LedgerError> {
    let subscriptions = subscriptions::list_subscriptions_for_student(db, student_id).await?;
    let videos = catalog::list_videos_visible_to_student(db, student_id).await?;
    Ok(StudentDashboard { subscriptions, videos })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::fixtures::video;
    use crate::domain::identity::fixtures::{student, teacher};
    use crate::services::db::connect_in_memory;

    #[tokio::test]
    async fn test_teacher_stats_rollup() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;
        let other = teacher(&db, "t2").await;

        let mut videos = Vec::new();
        for i in 0..7 {
            videos.push(video(&db, t, &format!("v{}", i)).await);
        }
        video(&db, other, "not mine").await;

        let mut students = Vec::new();
        for i in 0..6 {
            let s = student(&db, &format!("s{}", i)).await;
            subscriptions::subscribe(&db, s, t).await.unwrap();
            students.push(s);
        }
        let outsider = student(&db, "outsider").await;
        subscriptions::subscribe(&db, outsider, other).await.unwrap();

        views::record_view(&db, students[0], videos[0]).await.unwrap();
        views::record_view(&db, students[0], videos[1]).await.unwrap();
        views::record_view(&db, students[1], videos[0]).await.unwrap();
        views::record_view(&db, students[1], videos[0]).await.unwrap();

        let stats = get_teacher_stats(&db, t).await.unwrap();
        assert_eq!(stats.total_videos, 7);
        assert_eq!(stats.total_distinct_students, 6);
        assert_eq!(stats.total_views, 3);

        let recent_video_ids: Vec<i64> = stats.recent_videos.iter().map(|v| v.id).collect();
        let expected: Vec<i64> = videos.iter().rev().take(5).copied().collect();
        assert_eq!(recent_video_ids, expected);

        let recent_student_ids: Vec<i64> = stats.recent_students.iter().map(|s| s.id).collect();
        let expected: Vec<i64> = students.iter().rev().take(5).copied().collect();
        assert_eq!(recent_student_ids, expected);
    }

    #[tokio::test]
    async fn test_stats_for_empty_and_missing_teacher() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;

        let stats = get_teacher_stats(&db, t).await.unwrap();
        assert_eq!(stats.total_videos, 0);
        assert!(stats.recent_videos.is_empty());
        assert!(stats.recent_students.is_empty());

        assert!(matches!(
            get_teacher_stats(&db, t + 100).await,
            Err(LedgerError::NotFound(Entity::Teacher))
        ));
    }

    #[tokio::test]
    async fn test_student_dashboard() {
        let db = connect_in_memory().await;
        let t = teacher(&db, "t1").await;
        let s = student(&db, "s1").await;
        let v = video(&db, t, "v1").await;

        let empty = get_student_dashboard(&db, s).await.unwrap();
        assert!(empty.subscriptions.is_empty());
        assert!(empty.videos.is_empty());

        subscriptions::subscribe(&db, s, t).await.unwrap();
        let dash = get_student_dashboard(&db, s).await.unwrap();
        assert_eq!(dash.subscriptions.len(), 1);
        assert_eq!(dash.videos[0].id, v);
    }
}
