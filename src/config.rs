use std::{path::PathBuf, time::Duration};

use tracing::warn;

use crate::{
    allowlist::DEFAULT_ALLOWED_DOMAINS,
    rate_limit::{DEFAULT_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_WINDOW_SECONDS},
};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 60;
pub const MAX_DOWNLOAD_BYTES: u64 = 250 * 1024 * 1024;
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub allowed_domains: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub cookies_file: Option<PathBuf>,
    pub yt_dlp_bin: String,
    pub yt_dlp_timeout: Duration,
    pub pot_provider_url: Option<String>,
    pub prefer_direct: bool,
    pub max_concurrent_downloads: usize,
    pub max_download_bytes: u64,
    pub trust_proxy_headers: bool,
    pub transfer_dir: PathBuf,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let bind_addr = env
            .string("APP_ADDR")
            .or_else(|| env.parsed::<u16>("PORT").map(|port| format!("0.0.0.0:{port}")))
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let allowed_domains = env
            .list("ALLOWED_VIDEO_DOMAINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_DOMAINS.map(ToString::to_string).to_vec());

        let cookies_file = match env.string("YT_DLP_COOKIES_FILE") {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.is_file() {
                    warn!(
                        "YT_DLP_COOKIES_FILE points to {path:?}, which is not a file. \
                         Running unauthenticated."
                    );
                    None
                } else {
                    Some(path)
                }
            }
            None => Some(PathBuf::from(DEFAULT_COOKIES_FILE)).filter(|path| path.is_file()),
        };

        Self {
            bind_addr,
            allowed_domains,
            rate_limit_requests: env
                .parsed::<u32>("RATE_LIMIT_REQUESTS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS),
            rate_limit_window_seconds: env
                .parsed::<u64>("RATE_LIMIT_WINDOW_SECONDS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
            cookies_file,
            yt_dlp_bin: env
                .string("YT_DLP_BIN")
                .unwrap_or_else(|| "yt-dlp".to_string()),
            yt_dlp_timeout: Duration::from_secs(
                env.parsed::<u64>("YT_DLP_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            ),
            pot_provider_url: env.string("YT_DLP_POT_PROVIDER_URL"),
            prefer_direct: env.bool("PREFER_DIRECT_URL").unwrap_or(true),
            max_concurrent_downloads: env
                .parsed::<usize>("MAX_CONCURRENT_DOWNLOADS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS),
            max_download_bytes: MAX_DOWNLOAD_BYTES,
            trust_proxy_headers: env.bool("TRUST_PROXY_HEADERS").unwrap_or(false),
            transfer_dir: env
                .string("TRANSFER_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("svd_downloads")),
            cors_origins: env.list("CORS_ALLOWED_ORIGINS").unwrap_or_default(),
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|value| non_empty(&value).map(ToString::to_string))
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        let value = self.string(name)?;
        match value.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Ignoring invalid value {value:?} for {name}, using default.");
                None
            }
        }
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let value = self.string(name)?;
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                warn!("Ignoring invalid boolean {value:?} for {name}, using default.");
                None
            }
        }
    }

    fn list(&self, name: &str) -> Option<Vec<String>> {
        let items = self
            .string(name)?
            .split(',')
            .filter_map(non_empty)
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if items.is_empty() { None } else { Some(items) }
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
