use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Process configuration loaded from the environment. Mirrors the teacher's
/// `Config::from_env` shape: required `DATABASE_URL`, everything else
/// defaulted.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Tick-idle sleep when no job ran this tick (spec §4.2 step 6).
    pub poll_interval: Duration,
    /// Max random users sampled per admission attempt (spec §4.2, default 4).
    pub max_users: i64,
    /// Max intentions accumulated per user per admission attempt (spec §4.2, default 1).
    pub max_intentions: i64,
    /// Exit once claimed-job count and the admit step both go dry.
    pub finish: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            poll_interval: Duration::from_secs(
                env::var("WORKER_POLL_INTERVAL_SECS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .context("WORKER_POLL_INTERVAL_SECS must be a valid number")?,
            ),
            max_users: env::var("WORKER_MAX_USERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_MAX_USERS must be a valid number")?,
            max_intentions: env::var("WORKER_MAX_INTENTIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("WORKER_MAX_INTENTIONS must be a valid number")?,
            finish: env::var("WORKER_FINISH")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}
