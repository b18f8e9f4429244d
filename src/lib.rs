//! Subscription-gated video lessons: teachers publish, subscribed students
//! watch, and every first view lands in a ledger the dashboards read from.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use sqlx::SqlitePool;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod constants;
pub mod domain;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;
pub mod thumbnails;

use config::Config;
use services::credentials::HmacCredentials;
use services::rate_limit::{self, PrincipalRateLimiter};
use services::{db, session};
use storage::{GcsStorage, LocalDiskStorage, MediaStore};
use thumbnails::FfmpegThumbnailer;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub storage: MediaStore,
    pub thumbnails: FfmpegThumbnailer,
    pub credentials: HmacCredentials,
    pub upload_limiter: PrincipalRateLimiter,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let db = db::connect(&config.database_url, config.database_max_connections).await?;

        let storage = match (&config.local_storage_path, &config.gcs_bucket) {
            (Some(path), _) => {
                info!("Local storage: {}", path.display());
                MediaStore::Local(LocalDiskStorage::new(path))
            }
            (None, Some(bucket)) => {
                info!("GCS bucket: {}", bucket);
                MediaStore::Gcs(GcsStorage::connect(bucket.clone()).await?)
            }
            (None, None) => {
                warn!("No storage backend configured, using ./uploads");
                MediaStore::Local(LocalDiskStorage::new("./uploads"))
            }
        };

        Ok(Self {
            thumbnails: FfmpegThumbnailer::new(storage.clone(), config.ffmpeg_threads),
            credentials: HmacCredentials::new(config.credential_pepper.clone()),
            upload_limiter: rate_limit::upload_limiter(),
            storage,
            db,
            config,
        })
    }
}

pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .merge(routes::build_routes())
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(cors)
        .with_state(state)
}

/// Hourly sweep of expired refresh tokens and idle rate-limit buckets
async fn run_maintenance(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    loop {
        interval.tick().await;
        match session::cleanup_expired_tokens(&state.db).await {
            Ok(0) => {}
            Ok(n) => info!("Removed {} expired refresh tokens", n),
            Err(e) => warn!("Refresh token cleanup failed: {}", e),
        }
        state.upload_limiter.cleanup(MAINTENANCE_INTERVAL);
    }
}

pub async fn start_server() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading configuration...");
    let config = Config::load();

    info!("Initializing state...");
    let state = Arc::new(AppState::new(config).await?);

    tokio::spawn(run_maintenance(state.clone()));

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;

    let app = build_app(state);
    info!("Server running on {address}");

    // Connect info feeds the per-address limiter on the auth routes
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
