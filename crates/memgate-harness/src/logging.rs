//! Subscriber setup for the `memgate` binary.

use tracing_subscriber::{EnvFilter, fmt};

/// Output format for log lines on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Parse a format name loosely; anything unrecognized is compact.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Install a global subscriber. `RUST_LOG` overrides the default filter.
/// Calling twice is harmless; the first subscriber stays.
pub fn init_logging(format: LogFormat, verbose: bool) {
    let default = if verbose { "memgate=debug" } else { "memgate=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
