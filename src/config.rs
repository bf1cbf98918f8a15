use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::orchestrator::RetryPolicy;

/// Server settings, read once at startup from `TOURLEDGER_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub catalog: Option<PathBuf>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub store_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            catalog: None,
            max_connections: 256,
            compact_threshold: 1000,
            store_timeout: Duration::from_millis(2000),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: lookup("TOURLEDGER_BIND").unwrap_or(d.bind),
            port: parse_var(&lookup, "TOURLEDGER_PORT").unwrap_or(d.port),
            data_dir: lookup("TOURLEDGER_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            catalog: lookup("TOURLEDGER_CATALOG").map(PathBuf::from),
            max_connections: parse_var(&lookup, "TOURLEDGER_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(d.max_connections),
            compact_threshold: parse_var(&lookup, "TOURLEDGER_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            store_timeout: millis(parse_var(&lookup, "TOURLEDGER_STORE_TIMEOUT_MS")).unwrap_or(d.store_timeout),
            max_attempts: parse_var(&lookup, "TOURLEDGER_MAX_ATTEMPTS")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(d.max_attempts),
            retry_backoff: millis(parse_var(&lookup, "TOURLEDGER_RETRY_BACKOFF_MS")).unwrap_or(d.retry_backoff),
            metrics_port: parse_var(&lookup, "TOURLEDGER_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.store_timeout,
            max_attempts: self.max_attempts,
            backoff: self.retry_backoff,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn millis(ms: Option<u64>) -> Option<Duration> {
    ms.map(Duration::from_millis)
}
