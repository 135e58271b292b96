// src/config.rs
use crate::error::{AppError, AppResult};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

pub const DEFAULT_FINNHUB_BASE_URL: &str = "https://finnhub.io/api/v1";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_NEWS_CRON: &str = "0 0 12 * * *";
/// One year.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Scylla,
    Memory,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub store: StoreKind,
    pub scylla_node: String,
    pub jwt_secret: String,
    pub session_ttl_hours: i64,
    pub finnhub_api_key: Option<String>,
    pub finnhub_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub smtp: Option<SmtpConfig>,
    pub news_cron: String,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> AppResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match get("STORE").as_deref() {
            None | Some("scylla") => StoreKind::Scylla,
            Some("memory") => StoreKind::Memory,
            Some(other) => {
                return Err(AppError::Config(format!("unknown STORE '{}'", other)));
            }
        };

        let jwt_secret =
            get("JWT_SECRET").ok_or_else(|| AppError::Config("JWT_SECRET is not set".into()))?;

        let smtp = match (
            get("SMTP_HOST"),
            get("SMTP_USERNAME"),
            get("SMTP_PASSWORD"),
        ) {
            (Some(host), Some(username), Some(password)) => {
                let from = get("MAIL_FROM").unwrap_or_else(|| username.clone());
                Some(SmtpConfig {
                    host,
                    username,
                    password,
                    from,
                })
            }
            _ => None,
        };

        let session_ttl_hours: i64 =
            parse_or(get("SESSION_TTL_HOURS"), "SESSION_TTL_HOURS", "168")?;
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&session_ttl_hours) {
            return Err(AppError::Config(format!(
                "SESSION_TTL_HOURS must be between 1 and {}, got {}",
                MAX_SESSION_TTL_HOURS, session_ttl_hours
            )));
        }

        Ok(Config {
            bind_addr: parse_or(get("BIND_ADDR"), "BIND_ADDR", "127.0.0.1:3030")?,
            store,
            scylla_node: get("SCYLLA_NODE").unwrap_or_else(|| "127.0.0.1:9042".to_string()),
            jwt_secret,
            session_ttl_hours,
            finnhub_api_key: get("FINNHUB_API_KEY"),
            finnhub_base_url: get("FINNHUB_BASE_URL")
                .unwrap_or_else(|| DEFAULT_FINNHUB_BASE_URL.to_string()),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            smtp,
            news_cron: get("NEWS_CRON").unwrap_or_else(|| DEFAULT_NEWS_CRON.to_string()),
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: &str) -> AppResult<T> {
    let raw = value.unwrap_or_else(|| default.to_string());
    raw.parse::<T>()
        .map_err(|_| AppError::Config(format!("invalid {} '{}'", key, raw)))
}
