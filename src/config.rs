use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration, shared by the collector and the read-API binaries.
///
/// Values are layered the same way across both binaries: built-in defaults from
/// `config/default.toml`, then an optional override file, then bare environment
/// variables. Fields are kept flat (rather than nested under sub-tables) because
/// the environment source binds env var names directly against top-level keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Collector listen address, e.g. ":8443"
    #[serde(default = "default_collector_addr")]
    pub collector_addr: String,

    /// Read-API listen address, e.g. ":8080"
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// Bearer token required on ingest requests; empty disables auth
    #[serde(default)]
    pub ingest_token: String,

    #[serde(default = "default_true")]
    pub tls_auto_self_signed: bool,

    #[serde(default)]
    pub tls_cert_file: Option<PathBuf>,

    #[serde(default)]
    pub tls_key_file: Option<PathBuf>,

    /// Maximum decompressed ingest body size, bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_dsn")]
    pub clickhouse_dsn: String,

    #[serde(default = "default_db")]
    pub clickhouse_db: String,

    /// Outbound store request timeout, seconds
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,

    /// How long a trace may sit idle before it is eligible for flush
    #[serde(default = "default_trace_window")]
    pub trace_window: String,

    /// Flush tick interval
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,

    #[serde(default = "default_log_filter")]
    pub rust_log: String,

    #[serde(default)]
    pub trace_lite_log_json: bool,
}

impl Config {
    /// Load configuration from the built-in defaults, an optional file, then environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn trace_window_duration(&self) -> std::time::Duration {
        parse_go_duration(&self.trace_window).unwrap_or(std::time::Duration::from_secs(120))
    }

    pub fn flush_interval_duration(&self) -> std::time::Duration {
        parse_go_duration(&self.flush_interval).unwrap_or(std::time::Duration::from_secs(10))
    }
}

/// Parses a small subset of Go-style durations ("10s", "2m", "1h30m") sufficient
/// for the values this system accepts from configuration.
fn parse_go_duration(input: &str) -> Option<std::time::Duration> {
    let mut total = std::time::Duration::ZERO;
    let mut digits = String::new();
    let mut saw_unit = false;
    for ch in input.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else {
            if digits.is_empty() {
                return None;
            }
            let value: u64 = digits.parse().ok()?;
            digits.clear();
            let unit = match ch {
                's' => std::time::Duration::from_secs(value),
                'm' => std::time::Duration::from_secs(value * 60),
                'h' => std::time::Duration::from_secs(value * 3600),
                _ => return None,
            };
            total += unit;
            saw_unit = true;
        }
    }
    if !digits.is_empty() || !saw_unit {
        return None;
    }
    Some(total)
}

fn default_collector_addr() -> String {
    ":8443".to_string()
}

fn default_api_addr() -> String {
    ":8080".to_string()
}

fn default_dsn() -> String {
    "http://localhost:8123".to_string()
}

fn default_db() -> String {
    "trace_lite".to_string()
}

fn default_store_timeout_secs() -> u64 {
    20
}

fn default_trace_window() -> String {
    "2m".to_string()
}

fn default_flush_interval() -> String {
    "10s".to_string()
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_log_filter() -> String {
    "trace_lite=info,tower_http=info".to_string()
}

fn default_true() -> bool {
    true
}


#[cfg(test)]
impl Config {
    fn load_defaults_for_test() -> Self {
        Config {
            collector_addr: default_collector_addr(),
            api_addr: default_api_addr(),
            ingest_token: String::new(),
            tls_auto_self_signed: true,
            tls_cert_file: None,
            tls_key_file: None,
            max_body_bytes: default_max_body_bytes(),
            clickhouse_dsn: default_dsn(),
            clickhouse_db: default_db(),
            store_timeout_secs: default_store_timeout_secs(),
            trace_window: default_trace_window(),
            flush_interval: default_flush_interval(),
            rust_log: default_log_filter(),
            trace_lite_log_json: false,
        }
    }
}
