//! Student-only endpoints: subscriptions, the feed, and watching

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tracing::debug;

use super::auth::AuthStudent;
use crate::AppState;
use crate::domain::catalog::{self, Video};
use crate::domain::dashboard::{self, StudentDashboard};
use crate::domain::subscriptions::{self, SubscribedTeacher, Subscription};
use crate::domain::views::{self, ViewOutcome};
use crate::services::error::ApiError;
use crate::services::extract::ApiPath;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/student/dashboard", get(get_dashboard))
        .route("/api/student/videos", get(list_videos))
        .route("/api/student/watch/{id}", post(watch_video))
        .route("/api/student/subscriptions", get(list_subscriptions))
        .route("/api/student/subscribe/{teacher_id}", post(subscribe))
        .route("/api/student/unsubscribe/{teacher_id}", delete(unsubscribe))
}

async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    AuthStudent(student_id): AuthStudent,
) -> Result<Json<StudentDashboard>, ApiError> {
    Ok(Json(dashboard::get_student_dashboard(&state.db, student_id).await?))
}

/// GET /api/student/videos - every video from a subscribed teacher, newest first
async fn list_videos(
    State(state): State<Arc<AppState>>,
    AuthStudent(student_id): AuthStudent,
) -> Result<Json<Vec<Video>>, ApiError> {
    Ok(Json(catalog::list_videos_visible_to_student(&state.db, student_id).await?))
}

/// POST /api/student/watch/{id} - record a view; repeats return the first one
async fn watch_video(
    State(state): State<Arc<AppState>>,
    AuthStudent(student_id): AuthStudent,
    ApiPath(video_id): ApiPath<i64>,
) -> Result<Json<ViewOutcome>, ApiError> {
    let outcome = views::record_view(&state.db, student_id, video_id).await?;
    debug!(student_id, video_id, first_view = outcome.first_view, "View recorded");
    Ok(Json(outcome))
}

async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    AuthStudent(student_id): AuthStudent,
) -> Result<Json<Vec<SubscribedTeacher>>, ApiError> {
    Ok(Json(subscriptions::list_subscriptions_for_student(&state.db, student_id).await?))
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    AuthStudent(student_id): AuthStudent,
    ApiPath(teacher_id): ApiPath<i64>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let subscription = subscriptions::subscribe(&state.db, student_id, teacher_id).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    AuthStudent(student_id): AuthStudent,
    ApiPath(teacher_id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    subscriptions::unsubscribe(&state.db, student_id, teacher_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
