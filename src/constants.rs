//! Application constants

/// Maximum request body for uploads when `MAX_UPLOAD_BYTES` is unset (500 MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Number of rows in the dashboard's recent videos / recent students lists
pub const DASHBOARD_RECENT_LIMIT: i64 = 5;

/// Video container extensions accepted on upload (lowercase, with dot)
pub const ALLOWED_VIDEO_EXTENSIONS: [&str; 5] = [".mp4", ".avi", ".mov", ".mkv", ".webm"];

/// Storage prefix for uploaded video files
pub const VIDEO_PREFIX: &str = "videos";

/// Storage prefix for generated thumbnails
pub const THUMBNAIL_PREFIX: &str = "thumbnails";

/// Access token lifetime in minutes
pub const ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 10;

/// Refresh token lifetime in days
pub const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 30;
