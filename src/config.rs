use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use std::fmt;

use crate::analytics::settings::AnalyticsSettings;
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_DRAIN_SECS, DEFAULT_LEASE_SECS, DEFAULT_RETENTION_DAYS,
    DEFAULT_SAMPLING_RATE,
};
use crate::workers::view_aggregation::AggregationConfig;

#[derive(Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub sled_path: String,
    pub jwt_secret: String,
    pub jwt_expires_in_hours: u64,
    pub admin_jwt_secret: String,
    pub cors_origin: String,
    /// Site pages served (and counted) by the static fallback.
    pub static_dir: String,
    pub worker: WorkerConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub is_leader: bool,
    pub aggregation_cron: String,
    pub retention_cron: String,
}

/// Queue draining knobs plus defaults for a store with no saved settings.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub batch_size: usize,
    pub lease_secs: u64,
    pub drain_secs: u64,
    pub default_sampling_rate: u32,
    pub default_retention_days: u32,
}

impl AnalyticsConfig {
    pub fn default_settings(&self) -> AnalyticsSettings {
        AnalyticsSettings::with_defaults(self.default_sampling_rate, self.default_retention_days)
    }

    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            batch_size: self.batch_size.max(1),
            lease: chrono::Duration::seconds(self.lease_secs.max(1) as i64),
            drain_budget: std::time::Duration::from_secs(self.drain_secs),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            lease_secs: DEFAULT_LEASE_SECS,
            drain_secs: DEFAULT_DRAIN_SECS,
            default_sampling_rate: DEFAULT_SAMPLING_RATE,
            default_retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("enable_file_logs", &self.enable_file_logs)
            .field("log_dir", &self.log_dir)
            .field("sled_path", &self.sled_path)
            .field("jwt_secret", &"***REDACTED***")
            .field("jwt_expires_in_hours", &self.jwt_expires_in_hours)
            .field("admin_jwt_secret", &"***REDACTED***")
            .field("cors_origin", &self.cors_origin)
            .field("static_dir", &self.static_dir)
            .field("worker", &self.worker)
            .field("analytics", &self.analytics)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env_or_parse("HOST", IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            port: env_or_parse("PORT", 3000_u16),
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            sled_path: env_or("SLED_PATH", "./data/analytics.sled"),
            jwt_secret: env_or(
                "JWT_SECRET",
                "change_me_to_random_64_chars_change_me_to_random_64_chars",
            ),
            jwt_expires_in_hours: env_or_parse("JWT_EXPIRES_IN_HOURS", 24_u64),
            admin_jwt_secret: env_or(
                "ADMIN_JWT_SECRET",
                "change_me_to_another_random_64_chars_change_me_to_another",
            ),
            cors_origin: env_or("CORS_ORIGIN", "http://localhost:5173"),
            static_dir: env_or("STATIC_DIR", "static"),
            worker: WorkerConfig {
                is_leader: env_or_bool("WORKER_LEADER", true),
                aggregation_cron: env_or("AGGREGATION_CRON", "0 * * * * *"),
                retention_cron: env_or("RETENTION_CRON", "0 15 * * * *"),
            },
            analytics: AnalyticsConfig {
                batch_size: env_or_parse("ANALYTICS_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                lease_secs: env_or_parse("ANALYTICS_LEASE_SECS", DEFAULT_LEASE_SECS),
                drain_secs: env_or_parse("ANALYTICS_DRAIN_SECS", DEFAULT_DRAIN_SECS),
                default_sampling_rate: env_or_parse(
                    "ANALYTICS_SAMPLING_RATE",
                    DEFAULT_SAMPLING_RATE,
                ),
                default_retention_days: env_or_parse(
                    "ANALYTICS_RETENTION_DAYS",
                    DEFAULT_RETENTION_DAYS,
                ),
            },
        }
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use super::*;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn managed_keys() -> &'static [&'static str] {
        &[
            "HOST",
            "PORT",
            "RUST_LOG",
            "WORKER_LEADER",
            "ANALYTICS_BATCH_SIZE",
            "ANALYTICS_SAMPLING_RATE",
            "ANALYTICS_LEASE_SECS",
        ]
    }

    fn clear_keys(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    fn loads_defaults_when_missing() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.worker.is_leader);
        assert_eq!(cfg.analytics.batch_size, 100);
        assert_eq!(cfg.analytics.default_sampling_rate, 3);
        assert_eq!(cfg.analytics.default_retention_days, 365);
    }

    #[test]
    fn parses_numeric_values() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("PORT", "4000");
        env::set_var("ANALYTICS_BATCH_SIZE", "250");
        env::set_var("ANALYTICS_SAMPLING_RATE", " 10 ");

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.analytics.batch_size, 250);
        assert_eq!(cfg.analytics.default_settings().sampling_rate, 10);
    }

    #[test]
    fn invalid_values_fall_back() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("PORT", "bad");
        env::set_var("ANALYTICS_LEASE_SECS", "-5");
        env::set_var("WORKER_LEADER", "maybe");

        let cfg = Config::from_env();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.analytics.lease_secs, 60);
        assert!(cfg.worker.is_leader);
    }

    #[test]
    fn debug_redacts_secrets() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        let cfg = Config::from_env();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains(&cfg.jwt_secret));
        assert!(rendered.contains("***REDACTED***"));
    }

    #[test]
    fn aggregation_config_is_clamped() {
        let analytics = AnalyticsConfig {
            batch_size: 0,
            lease_secs: 0,
            ..AnalyticsConfig::default()
        };
        let agg = analytics.aggregation();
        assert_eq!(agg.batch_size, 1);
        assert_eq!(agg.lease, chrono::Duration::seconds(1));
    }
}
