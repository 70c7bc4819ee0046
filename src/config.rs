//! Startup configuration, read once from the environment (§6
//! "Configuration"), the way the Zobbo reference backend reads `PORT`
//! and `ZOBBO_HMAC_KEY`: `std::env::var(..).ok()` with a hardcoded
//! fallback, no config-file parser.

use std::time::Duration;

/// Preset stake ladder; a build-time constant per §6, with an env
/// override so tests can shrink it.
pub const DEFAULT_STAKE_LADDER: [u64; 6] = [1, 5, 10, 20, 50, 100];

/// Preset tables per stake level (§3 "Table": "the preset pool size is
/// fixed (two tables per stake level)").
pub const TABLES_PER_STAKE: usize = 2;

pub struct Config {
    pub bind_addr: String,
    pub database_uri: String,
    pub token_secret: Vec<u8>,
    pub allowed_origins: Vec<String>,
    pub ping_interval: Duration,
    pub cleanup_interval: Duration,
    pub matchmaker_interval: Duration,
    pub stake_ladder: Vec<u64>,
}

impl Config {
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let database_uri = std::env::var("DATABASE_URI").unwrap_or_else(|_| "memory://reem-table-server".to_string());
        let token_secret = std::env::var("TOKEN_SECRET")
            .ok()
            .map(|s| s.into_bytes())
            .unwrap_or_else(|| {
                tracing::warn!("TOKEN_SECRET not set, generating an ephemeral key for this process only");
                let mut key = [0u8; 32];
                getrandom::getrandom(&mut key).expect("getrandom failed");
                key.to_vec()
            });
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .unwrap_or_default();
        let ping_interval = env_secs("PING_INTERVAL_SECS", 30);
        let cleanup_interval = env_secs("CLEANUP_INTERVAL_SECS", 60);
        let matchmaker_interval = env_secs("MATCHMAKER_INTERVAL_SECS", 10);
        let stake_ladder = std::env::var("STAKE_LADDER")
            .ok()
            .map(|s| s.split(',').filter_map(|v| v.trim().parse().ok()).collect())
            .filter(|v: &Vec<u64>| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_STAKE_LADDER.to_vec());

        Self {
            bind_addr,
            database_uri,
            token_secret,
            allowed_origins,
            ping_interval,
            cleanup_interval,
            matchmaker_interval,
            stake_ladder,
        }
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default);
    Duration::from_secs(secs)
}
