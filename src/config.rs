//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;

use chrono::Duration;

use crate::api::middleware::SecurityConfig;

/// Access tokens live for 15 minutes unless configured otherwise.
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;

/// Refresh tokens live for 7 days unless configured otherwise.
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Upper bound for either lifetime: ten years.
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Lifetimes of the two session token kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// From TASKFOREST_ACCESS_TTL_SECS
    pub access_ttl_secs: u64,
    /// From TASKFOREST_REFRESH_TTL_SECS
    pub refresh_ttl_secs: u64,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            access_ttl_secs: ttl_or_default(
                "TASKFOREST_ACCESS_TTL_SECS",
                env_u64("TASKFOREST_ACCESS_TTL_SECS"),
                DEFAULT_ACCESS_TTL_SECS,
            ),
            refresh_ttl_secs: ttl_or_default(
                "TASKFOREST_REFRESH_TTL_SECS",
                env_u64("TASKFOREST_REFRESH_TTL_SECS"),
                DEFAULT_REFRESH_TTL_SECS,
            ),
        }
    }

    /// Access token lifetime. Out-of-range values fall back to the default.
    pub fn access_ttl(&self) -> Duration {
        ttl_duration(self.access_ttl_secs, DEFAULT_ACCESS_TTL_SECS)
    }

    /// Refresh token lifetime. Out-of-range values fall back to the default.
    pub fn refresh_ttl(&self) -> Duration {
        ttl_duration(self.refresh_ttl_secs, DEFAULT_REFRESH_TTL_SECS)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
        }
    }
}

/// Everything the server needs besides the database handle.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// From TASKFOREST_DB_PATH. `None` means the platform data directory.
    pub db_path: Option<PathBuf>,
    pub sessions: SessionConfig,
    pub security: SecurityConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var_os("TASKFOREST_DB_PATH").map(PathBuf::from),
            sessions: SessionConfig::from_env(),
            security: SecurityConfig::from_env(),
        }
    }
}

/// Defaults with CORS and rate limiting turned off, for local use and tests.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            sessions: SessionConfig::default(),
            security: SecurityConfig::disabled(),
        }
    }
}

pub(crate) fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn checked_ttl(secs: u64) -> Option<Duration> {
    if secs > MAX_TTL_SECS {
        return None;
    }
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

fn ttl_duration(secs: u64, default: u64) -> Duration {
    checked_ttl(secs).unwrap_or_else(|| {
        tracing::warn!(secs, default, "Token lifetime out of range, using default");
        Duration::seconds(default as i64)
    })
}

/// A configured lifetime must be positive and at most [`MAX_TTL_SECS`].
fn ttl_or_default(key: &str, configured: Option<u64>, default: u64) -> u64 {
    match configured {
        None => default,
        Some(secs) if secs > 0 && checked_ttl(secs).is_some() => secs,
        Some(secs) => {
            tracing::warn!(key, secs, default, "Ignoring invalid token lifetime");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_standard_lifetimes() {
        let config = AppConfig::default();
        assert_eq!(config.sessions.access_ttl_secs, 900);
        assert_eq!(config.sessions.refresh_ttl_secs, 604_800);
        assert!(config.db_path.is_none());
        assert!(config.security.rate_limiter.is_none());
    }

    #[test]
    fn configured_lifetimes_outside_range_fall_back() {
        let key = "TASKFOREST_ACCESS_TTL_SECS";
        assert_eq!(ttl_or_default(key, None, 900), 900);
        assert_eq!(ttl_or_default(key, Some(60), 900), 60);
        assert_eq!(ttl_or_default(key, Some(MAX_TTL_SECS), 900), MAX_TTL_SECS);
        assert_eq!(ttl_or_default(key, Some(0), 900), 900);
        assert_eq!(ttl_or_default(key, Some(MAX_TTL_SECS + 1), 900), 900);
        assert_eq!(ttl_or_default(key, Some(10_000_000_000_000_000), 900), 900);
        assert_eq!(ttl_or_default(key, Some(u64::MAX), 900), 900);
    }

    #[test]
    fn oversized_lifetimes_never_go_negative() {
        let config = SessionConfig {
            access_ttl_secs: u64::MAX,
            refresh_ttl_secs: 10_000_000_000_000_000,
        };
        assert_eq!(config.access_ttl(), Duration::seconds(900));
        assert_eq!(config.refresh_ttl(), Duration::seconds(604_800));

        let config = SessionConfig {
            access_ttl_secs: 30,
            refresh_ttl_secs: 0,
        };
        assert_eq!(config.access_ttl(), Duration::seconds(30));
        assert_eq!(config.refresh_ttl(), Duration::zero());
    }
}
