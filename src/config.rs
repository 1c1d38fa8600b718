//! Runtime configuration, loaded from the environment with sensible defaults —
//! same shape as the rate-limit config this crate's predecessor used
//! (env var lookup + parse + fallback per field).

use std::env;

/// Environment variables:
/// - `BIND_ADDR` — TCP listen address (default: `0.0.0.0:7878`)
/// - `IDLE_TIMEOUT_SECS` — seconds of inactivity before a session is swept;
///   `0` disables the sweeper (default: 300)
/// - `MAX_MESSAGE_LEN` — max characters in a posted message (default: 10_000)
/// - `REQUIRE_PRIVATE_ROOM_PASSWORD` — reject private rooms created without
///   a password when `true` (default: false, i.e. allowed with an empty hash)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub idle_timeout_secs: u64,
    pub max_message_len: usize,
    pub require_private_room_password: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7878".to_string(),
            idle_timeout_secs: 300,
            max_message_len: 10_000,
            require_private_room_password: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("BIND_ADDR") {
            config.bind_addr = val;
        }
        if let Ok(val) = env::var("IDLE_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.idle_timeout_secs = n;
        }
        if let Ok(val) = env::var("MAX_MESSAGE_LEN")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_message_len = n;
        }
        if let Ok(val) = env::var("REQUIRE_PRIVATE_ROOM_PASSWORD") {
            config.require_private_room_password = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Sweeper cadence per spec §4.5: `min(60s, timeout/4)`. A zero timeout
    /// disables the sweeper entirely (the Dispatcher checks this directly).
    pub fn sweep_interval(&self) -> std::time::Duration {
        let by_timeout = self.idle_timeout_secs / 4;
        std::time::Duration::from_secs(by_timeout.clamp(1, 60))
    }
}
