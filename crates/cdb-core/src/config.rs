use std::{env, fs, net::SocketAddr, path::Path, time::Duration};

use crate::{errors::Error, normalizer::DEFAULT_SHORTENER_DOMAINS, Result};

/// Typed configuration, loaded from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_safe_limit: usize,
    pub webhook_url: Option<String>,
    pub listen_addr: SocketAddr,

    // Content API
    pub x_bearer_token: String,
    pub x_api_base_url: String,
    pub page_size: u32,
    pub http_timeout: Duration,
    pub shortener_domains: Vec<String>,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub quota_cooldown: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_of = |key: &str| get(key).and_then(non_empty);
        let u64_of = |key: &str| str_of(key).and_then(|s| s.trim().parse::<u64>().ok());

        // Required
        let telegram_bot_token = str_of("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let x_bearer_token = str_of("X_BEARER_TOKEN")
            .or_else(|| str_of("BEARER_TOKEN"))
            .ok_or_else(|| {
                Error::Config("X_BEARER_TOKEN environment variable is required".to_string())
            })?;

        // Content API
        let x_api_base_url = str_of("X_API_BASE_URL")
            .unwrap_or_else(|| "https://api.twitter.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let page_size = u64_of("X_PAGE_SIZE").unwrap_or(100).clamp(10, 100) as u32;
        let http_timeout = Duration::from_millis(u64_of("HTTP_TIMEOUT_MS").unwrap_or(15_000));
        let shortener_domains = parse_csv_lower(str_of("SHORTENER_DOMAINS")).unwrap_or_else(|| {
            DEFAULT_SHORTENER_DOMAINS
                .iter()
                .map(|s| s.to_string())
                .collect()
        });

        // Rate limiting (defaults sized for the recent-search app quota)
        let rate_limit_enabled = str_of("RATE_LIMIT_ENABLED").map(parse_bool).unwrap_or(true);
        let rate_limit_requests = u64_of("RATE_LIMIT_REQUESTS").unwrap_or(180).max(1) as u32;
        let rate_limit_window = Duration::from_secs(u64_of("RATE_LIMIT_WINDOW").unwrap_or(900));
        let quota_cooldown = Duration::from_millis(u64_of("QUOTA_COOLDOWN_MS").unwrap_or(60_000));

        // Telegram
        let telegram_safe_limit = u64_of("TELEGRAM_SAFE_LIMIT")
            .map(|v| v as usize)
            .unwrap_or(4000);
        let webhook_url = str_of("WEBHOOK_URL");
        let port = u64_of("PORT").unwrap_or(4040);
        let port = u16::try_from(port)
            .map_err(|_| Error::Config(format!("PORT out of range: {port}")))?;
        let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

        Ok(Self {
            telegram_bot_token,
            telegram_safe_limit,
            webhook_url,
            listen_addr,
            x_bearer_token,
            x_api_base_url,
            page_size,
            http_timeout,
            shortener_domains,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
            quota_cooldown,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(s: String) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv_lower(v: Option<String>) -> Option<Vec<String>> {
    let out = v?
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
