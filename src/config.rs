use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineOptions, HoldPolicy};
use crate::limits::MAX_HOLD_WINDOW_MS;
use crate::model::MINUTE_MS;

/// Process configuration, read once from `STAYKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub metrics_port: Option<u16>,
    pub engine: EngineOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7400,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(5),
            metrics_port: None,
            engine: EngineOptions::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values keep their
    /// default, with a warning for the unparsable ones.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let parsed = |key: &str| -> Option<String> { lookup(key).filter(|v| !v.trim().is_empty()) };

        let hold_minutes = |key: &str, default: i64| -> i64 {
            let max = MAX_HOLD_WINDOW_MS / MINUTE_MS;
            match parse::<i64>(key, parsed(key)) {
                Some(m) if (1..=max).contains(&m) => m * MINUTE_MS,
                Some(m) => {
                    tracing::warn!("{key}={m} is outside 1..={max} minutes, using default");
                    default
                }
                None => default,
            }
        };
        let default_policy = defaults.engine.hold_policy;

        Self {
            bind: parsed("STAYKEEP_BIND").unwrap_or(defaults.bind),
            port: parse::<u16>("STAYKEEP_PORT", parsed("STAYKEEP_PORT")).unwrap_or(defaults.port),
            data_dir: parsed("STAYKEEP_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            max_connections: parse::<usize>("STAYKEEP_MAX_CONNECTIONS", parsed("STAYKEEP_MAX_CONNECTIONS"))
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parse::<u64>("STAYKEEP_COMPACT_THRESHOLD", parsed("STAYKEEP_COMPACT_THRESHOLD"))
                .unwrap_or(defaults.compact_threshold),
            sweep_interval: parse::<u64>("STAYKEEP_SWEEP_INTERVAL_SECS", parsed("STAYKEEP_SWEEP_INTERVAL_SECS"))
                .filter(|s| *s > 0)
                .map_or(defaults.sweep_interval, Duration::from_secs),
            metrics_port: parse::<u16>("STAYKEEP_METRICS_PORT", parsed("STAYKEEP_METRICS_PORT")),
            engine: EngineOptions {
                max_cas_attempts: parse::<u32>("STAYKEEP_MAX_CAS_ATTEMPTS", parsed("STAYKEEP_MAX_CAS_ATTEMPTS"))
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.engine.max_cas_attempts),
                hold_policy: HoldPolicy {
                    online_intent: hold_minutes("STAYKEEP_ONLINE_HOLD_MINUTES", default_policy.online_intent),
                    pay_at_hotel: hold_minutes("STAYKEEP_PAY_AT_HOTEL_HOLD_MINUTES", default_policy.pay_at_hotel),
                },
            },
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {key}={value:?}");
            None
        }
    }
}
