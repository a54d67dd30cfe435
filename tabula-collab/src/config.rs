//! Server configuration.
//!
//! Defaults suit local development; deployments override through the
//! environment: `TABULA_BIND`, `TABULA_DATA_DIR`, `TABULA_FLUSH_INTERVAL_MS`.
//! An unset data dir means snapshots stay in memory. Unparseable values fall
//! back to the default with a warning rather than refusing to start.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::DEFAULT_FLUSH_INTERVAL;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Snapshot store directory (None = in-memory only)
    pub data_dir: Option<PathBuf>,
    /// Persistence sweep interval
    pub flush_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5858".to_string(),
            data_dir: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = env::var("TABULA_BIND").unwrap_or(defaults.bind_addr);
        let data_dir = env::var_os("TABULA_DATA_DIR").map(PathBuf::from);

        let flush_interval = match env::var("TABULA_FLUSH_INTERVAL_MS") {
            Ok(raw) => parse_interval_ms(&raw).unwrap_or_else(|| {
                log::warn!(
                    "Ignoring unparseable TABULA_FLUSH_INTERVAL_MS={raw:?}; using {}ms",
                    defaults.flush_interval.as_millis()
                );
                defaults.flush_interval
            }),
            Err(_) => defaults.flush_interval,
        };

        Self {
            bind_addr,
            data_dir,
            flush_interval,
        }
    }
}

/// Parse a millisecond interval; zero is as unusable as garbage.
fn parse_interval_ms(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => None,
    }
}
