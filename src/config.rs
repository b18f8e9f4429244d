//! Environment-driven configuration

use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use tracing::{info, warn};

use crate::constants::DEFAULT_MAX_UPLOAD_BYTES;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: Vec<u8>,
    pub credential_pepper: Vec<u8>,
    /// Local blob directory. `None` means blobs live in `gcs_bucket`.
    pub local_storage_path: Option<PathBuf>,
    pub gcs_bucket: Option<String>,
    pub max_upload_bytes: usize,
    pub ffmpeg_threads: usize,
    pub cookies: CookieSettings,
}

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub same_site: &'static str,
}

impl Config {
    pub fn load() -> Self {
        let gcs_bucket = var("GCS_BUCKET_NAME").ok();
        let local_storage_path = match (var("LOCAL_STORAGE_PATH").ok(), &gcs_bucket) {
            (Some(path), _) => Some(PathBuf::from(path)),
            (None, Some(_)) => None,
            (None, None) => {
                info!("Neither LOCAL_STORAGE_PATH nor GCS_BUCKET_NAME set, using ./uploads");
                Some(PathBuf::from("./uploads"))
            }
        };

        Self {
            port: try_load("PORT", "3000"),
            database_url: try_load("DATABASE_URL", "sqlite://lectern.db"),
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5"),
            jwt_secret: load_secret("JWT_SECRET"),
            credential_pepper: load_secret("CREDENTIAL_PEPPER"),
            local_storage_path,
            gcs_bucket,
            max_upload_bytes: try_load("MAX_UPLOAD_BYTES", &DEFAULT_MAX_UPLOAD_BYTES.to_string()),
            ffmpeg_threads: try_load::<usize>("FFMPEG_THREADS", "1").max(1),
            cookies: CookieSettings {
                secure: env::var("ENV").as_deref() == Ok("prod"),
                same_site: cookie_same_site(),
            },
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

/// Secrets fall back to a random per-process value so development works
/// without setup. Tokens and password hashes do not survive a restart then.
fn load_secret(key: &str) -> Vec<u8> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value.into_bytes(),
        _ => {
            warn!("{key} not set, generating an ephemeral secret");
            let bytes: [u8; 32] = rand::rng().random();
            URL_SAFE_NO_PAD.encode(bytes).into_bytes()
        }
    }
}

fn cookie_same_site() -> &'static str {
    match env::var("COOKIE_SAMESITE")
        .unwrap_or_else(|_| "Lax".to_string())
        .to_lowercase()
        .as_str()
    {
        "none" => "None",
        "strict" => "Strict",
        _ => "Lax",
    }
}
