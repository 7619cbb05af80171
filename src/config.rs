//! Runtime configuration, read from the environment once at startup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen port.
    pub port: u16,
    /// How long an invitee has to respond before the invite expires.
    pub invite_window: Duration,
    /// Fixed duel duration from accept to expiry.
    pub duel_duration: Duration,
    /// Registry record expiry; refreshed on every message from a handle.
    pub connection_ttl: Duration,
    /// How long terminal invite/session records linger before the sweep
    /// removes them. Late events against a tombstone are absorbed as
    /// no-ops instead of reporting NotFound.
    pub tombstone_ttl: Duration,
    /// Cadence of the maintenance sweep (stale connections, tombstones).
    pub sweep_interval: Duration,
    /// Whether losing a participant's last connection aborts their
    /// active session.
    pub abort_on_disconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8200,
            invite_window: Duration::from_secs(60),
            duel_duration: Duration::from_secs(600),
            connection_ttl: Duration::from_secs(300),
            tombstone_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            abort_on_disconnect: false,
        }
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            port: std::env::var("DUEL_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            invite_window: env_secs("INVITE_WINDOW_SECS", 60),
            duel_duration: env_secs("DUEL_DURATION_SECS", 600),
            connection_ttl: env_secs("CONNECTION_TTL_SECS", 300),
            tombstone_ttl: env_secs("TOMBSTONE_TTL_SECS", 60),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS", 10),
            abort_on_disconnect: std::env::var("ABORT_ON_DISCONNECT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.abort_on_disconnect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.invite_window, Duration::from_secs(60));
        assert_eq!(cfg.duel_duration, Duration::from_secs(600));
        assert!(!cfg.abort_on_disconnect);
    }
}
