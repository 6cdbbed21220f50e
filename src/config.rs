use serde::{Deserialize, Serialize};

/// Runtime tunables for the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Grace period after which an unreleased lease is presumed lost to a
    /// process crash and reclaimed by recovery or the supervisory sweep.
    pub crash_recovery_threshold_secs: u64,
    /// Daily spend ceiling applied to projects without an explicit budget.
    pub default_daily_limit_usd: f64,
    /// Fraction of the limit at which budget checks report a warning.
    pub default_alert_threshold: f64,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            crash_recovery_threshold_secs: 300,
            default_daily_limit_usd: 25.0,
            default_alert_threshold: 0.8,
        }
    }
}

impl WardenConfig {
    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            crash_recovery_threshold_secs: env_parse(
                "WARDEN_RECOVERY_THRESHOLD_SECS",
                defaults.crash_recovery_threshold_secs,
            ),
            default_daily_limit_usd: env_parse(
                "WARDEN_DAILY_LIMIT_USD",
                defaults.default_daily_limit_usd,
            ),
            default_alert_threshold: env_parse(
                "WARDEN_ALERT_THRESHOLD",
                defaults.default_alert_threshold,
            ),
        }
    }

    pub fn crash_recovery_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.crash_recovery_threshold_secs as i64)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
