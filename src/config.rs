use crate::handlers::store::{DEFAULT_MAX_AGE_DAYS, SECONDS_PER_DAY};
use crate::middleware::guard::DEFAULT_LOGIN_PATH;
use anyhow::{bail, Context};
use std::env;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub session_secret: String,
    pub bind_addr: String,
    pub login_path: String,
    pub token_max_age_days: i64,
    pub token_secret: Option<String>,
    pub secure_cookies: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup("API_BASE_URL").context("API_BASE_URL must be set")?;
        let session_secret = lookup("SESSION_SECRET").context("SESSION_SECRET must be set")?;
        if session_secret.len() < 64 {
            bail!("SESSION_SECRET must be at least 64 bytes");
        }

        let token_max_age_days = match lookup("TOKEN_MAX_AGE_DAYS") {
            Some(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("TOKEN_MAX_AGE_DAYS is not a number: {raw}"))?,
            None => DEFAULT_MAX_AGE_DAYS,
        };
        if token_max_age_days <= 0 || token_max_age_days.checked_mul(SECONDS_PER_DAY).is_none() {
            bail!("TOKEN_MAX_AGE_DAYS must be a positive number of days, got {token_max_age_days}");
        }
        let secure_cookies = match lookup("SECURE_COOKIES") {
            Some(raw) => raw
                .parse::<bool>()
                .with_context(|| format!("SECURE_COOKIES is not true/false: {raw}"))?,
            None => true,
        };

        Ok(AppConfig {
            api_base_url,
            session_secret,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            login_path: lookup("LOGIN_PATH").unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
            token_max_age_days,
            token_secret: lookup("TOKEN_SECRET").filter(|s| !s.is_empty()),
            secure_cookies,
        })
    }
}
