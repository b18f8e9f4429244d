//! Teacher-only endpoints: catalog management and analytics

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::auth::AuthTeacher;
use crate::AppState;
use crate::constants::VIDEO_PREFIX;
use crate::domain::catalog::{self, NewVideo, Video};
use crate::domain::dashboard::{self, TeacherStats};
use crate::domain::subscriptions::{self, Subscriber};
use crate::domain::views::{self, TeacherViewEntry};
use crate::models::Principal;
use crate::services::error::{ApiError, LogErr};
use crate::services::extract::ApiPath;
use crate::storage::BinaryStorage;
use crate::thumbnails::{self, ThumbnailGenerator};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/teacher/dashboard", get(get_dashboard))
        .route("/api/teacher/upload", post(upload_video))
        .route("/api/teacher/videos", get(list_videos))
        .route("/api/teacher/videos/{id}", delete(delete_video))
        .route("/api/teacher/videos/{id}/views", get(get_video_views))
        .route("/api/teacher/students", get(list_students))
        .route("/api/teacher/analytics", get(get_analytics))
}

async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    AuthTeacher(teacher_id): AuthTeacher,
) -> Result<Json<TeacherStats>, ApiError> {
    Ok(Json(dashboard::get_teacher_stats(&state.db, teacher_id).await?))
}

/// Upload form contents
#[derive(Default)]
struct UploadForm {
    title: String,
    description: String,
    file: Option<(String, Bytes)>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let bad_form = |_| ApiError::BadRequest("failed to parse form".to_string());
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("title") => form.title = field.text().await.map_err(bad_form)?,
            Some("description") => form.description = field.text().await.map_err(bad_form)?,
            Some("video") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(bad_form)?;
                form.file = Some((filename, data));
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Storage name for a new upload:
/// `videos/teacher_{id}/{millis}_{random}{ext}`
fn video_storage_name(teacher_id: i64, ext: &str) -> String {
    let suffix: u32 = rand::random();
    format!(
        "{}/teacher_{}/{}_{:08x}{}",
        VIDEO_PREFIX,
        teacher_id,
        Utc::now().timestamp_millis(),
        suffix,
        ext
    )
}

/// POST /api/teacher/upload - multipart `video`, `title`, `description`
async fn upload_video(
    State(state): State<Arc<AppState>>,
    AuthTeacher(teacher_id): AuthTeacher,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Video>), ApiError> {
    if !state.upload_limiter.check(Principal::Teacher(teacher_id)) {
        return Err(ApiError::TooManyRequests);
    }

    let form = read_upload_form(multipart).await?;
    let (filename, data) = form
        .file
        .ok_or_else(|| ApiError::BadRequest("no video file provided".to_string()))?;

    // Reject before anything touches storage
    catalog::validate_title(&form.title)?;
    let ext = catalog::validate_video_filename(&filename)?;

    let storage_ref = state
        .storage
        .store(data.clone(), &video_storage_name(teacher_id, &ext))
        .await
        .log_500("Failed to store video file")?;

    let thumbnail_ref = state.thumbnails.generate(&storage_ref, &data).await;
    let duration_seconds = thumbnails::probe_duration(&data).await.unwrap_or(0);

    let new = NewVideo {
        title: form.title,
        description: form.description,
        original_filename: filename,
        storage_ref: storage_ref.clone(),
        thumbnail_ref: thumbnail_ref.clone(),
        duration_seconds,
        size_bytes: data.len() as i64,
    };

    match catalog::publish_video(&state.db, teacher_id, &new).await {
        Ok(video) => {
            info!(teacher_id, video_id = video.id, size = video.size_bytes, "Video published");
            Ok((StatusCode::CREATED, Json(video)))
        }
        Err(e) => {
            let orphans = std::iter::once(storage_ref).chain(thumbnail_ref);
            catalog::reclaim_blobs(&state.storage, orphans).await;
            Err(e.into())
        }
    }
}

async fn list_videos(
    State(state): State<Arc<AppState>>,
    AuthTeacher(teacher_id): AuthTeacher,
) -> Result<Json<Vec<Video>>, ApiError> {
    Ok(Json(catalog::list_videos_by_teacher(&state.db, teacher_id).await?))
}

async fn delete_video(
    State(state): State<Arc<AppState>>,
    AuthTeacher(teacher_id): AuthTeacher,
    ApiPath(video_id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    catalog::delete_video(&state.db, &state.storage, video_id, teacher_id).await?;
    info!(teacher_id, video_id, "Video deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct VideoViewsResponse {
    video_id: i64,
    views: i64,
}

/// GET /api/teacher/videos/{id}/views - distinct viewers of one owned video
async fn get_video_views(
    State(state): State<Arc<AppState>>,
    AuthTeacher(teacher_id): AuthTeacher,
    ApiPath(video_id): ApiPath<i64>,
) -> Result<Json<VideoViewsResponse>, ApiError> {
    let video = catalog::get_video(&state.db, video_id).await?;
    if video.teacher_id != teacher_id {
        return Err(ApiError::Forbidden("not authorized to view analytics for this video".to_string()));
    }

    let views = views::count_views(&state.db, video_id).await?;
    Ok(Json(VideoViewsResponse { video_id, views }))
}

async fn list_students(
    State(state): State<Arc<AppState>>,
    AuthTeacher(teacher_id): AuthTeacher,
) -> Result<Json<Vec<Subscriber>>, ApiError> {
    Ok(Json(subscriptions::list_subscribers_for_teacher(&state.db, teacher_id).await?))
}

async fn get_analytics(
    State(state): State<Arc<AppState>>,
    AuthTeacher(teacher_id): AuthTeacher,
) -> Result<Json<Vec<TeacherViewEntry>>, ApiError> {
    Ok(Json(views::list_views_for_teacher(&state.db, teacher_id).await?))
}
