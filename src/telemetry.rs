// 13.0 telemetry.rs: tracing subscriber setup. the library only emits events;
// binaries call LoggingConfig::init once at startup.

use serde::{Deserialize, Serialize};
use std::error::Error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `markets_core=debug`. `RUST_LOG` wins when set.
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }

    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Installs the global subscriber. Fails if one is already set.
    pub fn init(&self) -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
        let filter = self.filter();
        if self.is_json() {
            fmt().json().with_env_filter(filter).try_init()
        } else {
            fmt().with_env_filter(filter).try_init()
        }
    }
}
