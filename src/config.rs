//! Configuration module for PowerWatch.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Values are read once at startup and never re-read while a scan is running.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "powerwatch.db")
    pub db_path: String,
    /// Upper bound for a single probe (default: 5s)
    pub probe_timeout: Duration,
    /// Time between the starts of two scan cycles (default: 60s)
    pub scan_interval: Duration,
    /// Fraction of unreachable checkpoints that declares an outage (default: 0.5)
    pub outage_threshold: f64,
    /// Maximum number of probes in flight during one scan (default: 32)
    pub max_concurrency: usize,
    /// Days of check history to keep (default: 30)
    pub retention_days: i64,
    /// Time between two retention sweeps (default: 1 day)
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "powerwatch.db".to_string(),
            probe_timeout: Duration::from_secs(5),
            scan_interval: Duration::from_secs(60),
            outage_threshold: 0.5,
            max_concurrency: 32,
            retention_days: 30,
            sweep_interval: Duration::from_secs(86400),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `POWERWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `POWERWATCH_DB_PATH`: Database file path (default: "powerwatch.db")
    /// - `POWERWATCH_PROBE_TIMEOUT_SECS`: Probe timeout in seconds (default: 5)
    /// - `POWERWATCH_SCAN_INTERVAL_SECS`: Scan interval in seconds (default: 60)
    /// - `POWERWATCH_OUTAGE_THRESHOLD`: Offline fraction in (0, 1] (default: 0.5)
    /// - `POWERWATCH_MAX_CONCURRENCY`: Probes in flight per scan (default: 32)
    /// - `POWERWATCH_RETENTION_DAYS`: Check history retention (default: 30)
    /// - `POWERWATCH_SWEEP_INTERVAL_SECS`: Retention sweep interval (default: 86400)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Invalid values are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "POWERWATCH_HTTP_PORT", |p: &u16| *p > 0) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("POWERWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = parse_var(&lookup, "POWERWATCH_PROBE_TIMEOUT_SECS", |s: &f64| *s > 0.0) {
            cfg.probe_timeout = Duration::from_secs_f64(secs);
        }

        if let Some(secs) = parse_var(&lookup, "POWERWATCH_SCAN_INTERVAL_SECS", |s: &f64| *s > 0.0) {
            cfg.scan_interval = Duration::from_secs_f64(secs);
        }

        if let Some(threshold) = parse_var(&lookup, "POWERWATCH_OUTAGE_THRESHOLD", |t: &f64| {
            *t > 0.0 && *t <= 1.0
        }) {
            cfg.outage_threshold = threshold;
        }

        if let Some(n) = parse_var(&lookup, "POWERWATCH_MAX_CONCURRENCY", |n: &usize| *n > 0) {
            cfg.max_concurrency = n;
        }

        if let Some(days) = parse_var(&lookup, "POWERWATCH_RETENTION_DAYS", |d: &i64| *d > 0) {
            cfg.retention_days = days;
        }

        if let Some(secs) = parse_var(&lookup, "POWERWATCH_SWEEP_INTERVAL_SECS", |s: &u64| *s > 0) {
            cfg.sweep_interval = Duration::from_secs(secs);
        }

        cfg
    }
}

fn parse_var<F, T, V>(lookup: &F, key: &str, valid: V) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    V: Fn(&T) -> bool,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => Some(value),
        _ => {
            tracing::warn!("Ignoring invalid value {:?} for {}, using default", raw, key);
            None
        }
    }
}
