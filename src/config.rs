use std::{path::PathBuf, time::Duration};

use url::Url;

use crate::error::ApiError;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
const DEFAULT_PUBLIC_DIR: &str = "public";
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 60;

/// Process-wide settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Created at startup, reserved for on-disk caching. Nothing writes here yet.
    pub downloads_dir: PathBuf,
    pub public_dir: PathBuf,
    pub yt_dlp_bin: String,
    pub yt_dlp_timeout: Duration,
    /// Normalized origins. Empty means any origin is accepted.
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };

        let bind_addr = resolve_bind_addr(read("APP_ADDR"), read("PORT"))?;

        let yt_dlp_timeout = match read("YT_DLP_TIMEOUT_SECONDS") {
            Some(value) => match value.parse::<u64>() {
                Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
                _ => {
                    return Err(ApiError::internal(format!(
                        "YT_DLP_TIMEOUT_SECONDS must be a positive integer, got {value:?}"
                    )));
                }
            },
            None => Duration::from_secs(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
        };

        let allowed_origins = read("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(|origin| {
                        normalize_origin(origin).ok_or_else(|| {
                            ApiError::internal(format!(
                                "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            downloads_dir: PathBuf::from(
                read("DOWNLOADS_DIR").unwrap_or_else(|| DEFAULT_DOWNLOADS_DIR.to_string()),
            ),
            public_dir: PathBuf::from(
                read("PUBLIC_DIR").unwrap_or_else(|| DEFAULT_PUBLIC_DIR.to_string()),
            ),
            yt_dlp_bin: read("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string()),
            yt_dlp_timeout,
            allowed_origins,
        })
    }
}

fn resolve_bind_addr(app_addr: Option<String>, port: Option<String>) -> Result<String, ApiError> {
    if let Some(configured) = app_addr {
        return Ok(configured);
    }

    match port {
        Some(value) => value
            .parse::<u16>()
            .map(|port| format!("0.0.0.0:{port}"))
            .map_err(|_| ApiError::internal(format!("PORT is not a valid port: {value:?}"))),
        None => Ok(format!("127.0.0.1:{DEFAULT_PORT}")),
    }
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
