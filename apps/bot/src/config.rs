use std::env::var;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context as _, Result};
use stock::DEFAULT_BASE_API;

#[derive(Clone, Debug)]
pub struct Config {
    pub discord_token: String,
    pub version: String,
    pub database_path: String,
    pub market_data_base_url: String,
    pub refresh_hour_utc: u32,
    pub alert_interval: Duration,
    pub refresh_delay: Duration,
    pub render_concurrency: usize,
    pub http_timeout: Duration,
    pub render_timeout: Duration,
    pub debug: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let refresh_hour_utc: u32 = parse_or("REFRESH_HOUR_UTC", 23)?;
        if refresh_hour_utc > 23 {
            anyhow::bail!("REFRESH_HOUR_UTC must be 0-23, got {refresh_hour_utc}");
        }

        let alert_interval_secs: u64 = parse_or("ALERT_INTERVAL_SECS", 5)?;
        if alert_interval_secs == 0 {
            anyhow::bail!("ALERT_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN not set")?,
            version: var("APP_VERSION").unwrap_or_else(|_| "Unknown".to_string()),
            database_path: var("DATABASE_PATH").unwrap_or_else(|_| "stockbot.db".to_string()),
            market_data_base_url: var("MARKET_DATA_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_API.to_string()),
            refresh_hour_utc,
            alert_interval: Duration::from_secs(alert_interval_secs),
            refresh_delay: Duration::from_millis(parse_or("REFRESH_DELAY_MS", 500)?),
            render_concurrency: parse_or("RENDER_CONCURRENCY", stock::render::RENDER_CONCURRENCY)?,
            http_timeout: Duration::from_secs(parse_or("HTTP_TIMEOUT_SECS", 10)?),
            render_timeout: Duration::from_secs(parse_or("RENDER_TIMEOUT_SECS", 30)?),
            debug: parse_or("DEBUG", false)?,
        })
    }

    /// Six-field cron expression for the daily refresh, evaluated in UTC.
    pub fn refresh_cron(&self) -> String {
        format!("0 0 {} * * *", self.refresh_hour_utc)
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(default),
    }
}
