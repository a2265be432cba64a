//! Service configuration, read from the environment (and `.env` when present).
//!
//! Every setting has a default so a local instance starts with zero setup.

use std::{
    fmt::Display,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
};

use rand::Rng;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    /// Env: `JITTER_ADDR`
    pub addr: SocketAddr,
    /// Env: `DATABASE_URL`
    pub database_url: String,
    /// Env: `JITTER_MEDIA_DIR`
    pub media_dir: PathBuf,
    /// Env: `JITTER_MAX_UPLOAD_BYTES`
    pub max_upload_bytes: usize,
    /// HMAC secret shared with the identity provider.
    /// Env: `JITTER_TOKEN_SECRET`
    pub token_secret: String,
    /// Env: `JITTER_TOKEN_TTL_SECS`
    pub token_ttl_secs: i64,
    /// Env: `JITTER_CORS_ORIGIN`
    pub cors_origin: String,
    /// Mounts `POST /users/token`. Never enable outside local development.
    /// Env: `JITTER_DEV_TOKENS`
    pub dev_tokens: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 8080).into(),
            database_url: "sqlite://jitter.db?mode=rwc".to_owned(),
            media_dir: PathBuf::from("./media"),
            max_upload_bytes: 10 * 1024 * 1024,
            token_secret: String::new(),
            token_ttl_secs: 86400,
            cors_origin: "http://localhost:3000".to_owned(),
            dev_tokens: false,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let defaults = Config::default();

        let token_secret = match var("JITTER_TOKEN_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("JITTER_TOKEN_SECRET not set, tokens will not survive a restart");
                random_secret()
            }
        };

        Self {
            addr: try_load("JITTER_ADDR", defaults.addr),
            database_url: var("DATABASE_URL").unwrap_or(defaults.database_url),
            media_dir: var("JITTER_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_dir),
            max_upload_bytes: try_load("JITTER_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            token_secret,
            token_ttl_secs: try_load("JITTER_TOKEN_TTL_SECS", defaults.token_ttl_secs),
            cors_origin: var("JITTER_CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            dev_tokens: try_load("JITTER_DEV_TOKENS", defaults.dev_tokens),
        }
    }
}

/// Loads `path`, or the nearest `.env` when `None`, into the process
/// environment. Must run before anything reads the environment directly,
/// such as the log filter.
pub fn load_env(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => dotenv::from_path(path).ok().map(|()| path.to_path_buf()),
        None => dotenv::dotenv().ok(),
    }
}

fn var(key: &str) -> Option<String> {
    dotenv::var(key).ok()
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };

    raw.parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
