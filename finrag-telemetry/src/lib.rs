//! # finrag-telemetry
//!
//! Process-wide logging for finrag binaries.
//!
//! Filtering follows `RUST_LOG` (default `info`). Output is either
//! human-readable or one JSON object per line.
//!
//! ```rust,ignore
//! finrag_telemetry::init_telemetry("finrag");
//! tracing::info!(document.id = "lease", chunk_count = 3, "ingested document");
//! ```

use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: OnceLock<()> = OnceLock::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected 'pretty' or 'json')")),
        }
    }
}

/// Initialize human-readable logging.
pub fn init_telemetry(service_name: &str) {
    init_with_format(service_name, LogFormat::Pretty);
}

/// Initialize logging in the given format.
///
/// Only the first call in a process installs a subscriber; later calls,
/// and calls made after another subscriber was installed elsewhere, do nothing.
pub fn init_with_format(service_name: &str, format: LogFormat) {
    let mut installed = false;
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        installed = match format {
            LogFormat::Pretty => {
                registry.with(fmt::layer().with_target(false).with_writer(std::io::stderr)).try_init()
            }
            LogFormat::Json => registry
                .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
                .try_init(),
        }
        .is_ok();
    });
    if installed {
        tracing::debug!(service = service_name, ?format, "telemetry initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn init_is_idempotent() {
        init_with_format("test", LogFormat::Json);
        init_telemetry("test");
        tracing::info!(attempt = 1, "still logging");
    }
}
