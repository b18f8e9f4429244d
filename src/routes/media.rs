//! Public directory and gated media serving

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

use super::auth::AuthPrincipal;
use crate::AppState;
use crate::domain::catalog::{self, Video};
use crate::domain::identity::{self, TeacherSummary};
use crate::domain::subscriptions;
use crate::models::Principal;
use crate::services::error::ApiError;
use crate::services::extract::ApiPath;
use crate::storage::{BinaryStorage, content_type_for};

pub fn routes() -> Router<Arc<AppState>> {
    let media = Router::new()
        .route("/api/video/{id}", get(serve_video))
        .route("/api/video/{id}/thumbnail", get(serve_thumbnail))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("private, max-age=3600"),
        ));

    Router::new()
        .route("/api/teachers", get(list_teachers))
        .merge(media)
}

/// GET /api/teachers - directory students browse before subscribing
async fn list_teachers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TeacherSummary>>, ApiError> {
    Ok(Json(identity::list_teachers(&state.db).await?))
}

/// Media is readable by the owning teacher and by the owner's subscribers.
async fn authorize_media(state: &AppState, principal: Principal, video: &Video) -> Result<(), ApiError> {
    let allowed = match principal {
        Principal::Teacher(id) => id == video.teacher_id,
        Principal::Student(id) => subscriptions::is_subscribed(&state.db, id, video.teacher_id).await?,
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::Forbidden("subscribe to this teacher to access their videos".to_string()))
    }
}

async fn serve_blob(state: &AppState, storage_ref: &str) -> Result<Response, ApiError> {
    let data = state.storage.retrieve(storage_ref).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(storage_ref))], data).into_response())
}

async fn serve_video(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiPath(video_id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let video = catalog::get_video(&state.db, video_id).await?;
    authorize_media(&state, principal, &video).await?;
    serve_blob(&state, &video.storage_ref).await
}

async fn serve_thumbnail(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(principal): AuthPrincipal,
    ApiPath(video_id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let video = catalog::get_video(&state.db, video_id).await?;
    authorize_media(&state, principal, &video).await?;

    let thumbnail_ref = video
        .thumbnail_ref
        .as_deref()
        .ok_or_else(|| ApiError::NotFound("thumbnail not found".to_string()))?;
    serve_blob(&state, thumbnail_ref).await
}
