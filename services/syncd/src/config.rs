use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,

    /// Daily unit budget enforced by the video provider.
    pub quota_limit: i64,
    /// Head-room kept out of reach of reservations.
    pub quota_buffer: i64,
    /// Timezone whose calendar day the quota counter follows.
    pub quota_tz: chrono_tz::Tz,

    /// Age after which a pending/ready job is errored out by the reaper.
    pub stale_after_secs: i64,
    /// Age after which terminal jobs are garbage-collected.
    pub terminal_ttl_secs: i64,
    /// Cadence of the scheduled cleanup task.
    pub cleanup_every: Duration,

    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub yt_client_id: Option<String>,
    pub yt_client_secret: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = get("DATABASE_URL")?;
        let bind_addr =
            std::env::var("SYNCD_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let quota_limit = get_int("SYNCD_QUOTA_LIMIT", 10_000)?;
        let quota_buffer = get_int("SYNCD_QUOTA_BUFFER", 500)?;
        let tz_name = std::env::var("SYNCD_QUOTA_TZ")
            .unwrap_or_else(|_| "America/New_York".to_string());
        let quota_tz: chrono_tz::Tz = tz_name
            .parse()
            .map_err(|_| anyhow::anyhow!("SYNCD_QUOTA_TZ is not a known timezone: {tz_name}"))?;

        let stale_after_secs = get_int("SYNCD_STALE_AFTER_SECS", 3_600)?;
        let terminal_ttl_secs = get_int("SYNCD_TERMINAL_TTL_SECS", 300)?;
        let cleanup_every = Duration::from_secs(get_int("SYNCD_CLEANUP_EVERY_SECS", 900)? as u64);

        // Tiny sanity checks (fail fast, fail loud)
        if quota_limit <= 0 {
            bail!("SYNCD_QUOTA_LIMIT must be positive");
        }
        if quota_buffer < 0 || quota_buffer >= quota_limit {
            bail!("SYNCD_QUOTA_BUFFER must be in [0, SYNCD_QUOTA_LIMIT)");
        }
        if stale_after_secs <= 0 || terminal_ttl_secs <= 0 {
            bail!("stale/terminal thresholds must be positive");
        }

        Ok(Self {
            database_url,
            bind_addr,
            quota_limit,
            quota_buffer,
            quota_tz,
            stale_after_secs,
            terminal_ttl_secs,
            cleanup_every,
            spotify_client_id: std::env::var("SPOTIFY_CLIENT_ID").ok(),
            spotify_client_secret: std::env::var("SPOTIFY_CLIENT_SECRET").ok(),
            yt_client_id: std::env::var("YT_CLIENT_ID").ok(),
            yt_client_secret: std::env::var("YT_CLIENT_SECRET").ok(),
        })
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn get_int(key: &str, default: i64) -> Result<i64> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<i64>()
            .with_context(|| format!("{key} must be an integer, got: {v}")),
        Err(_) => Ok(default),
    }
}
