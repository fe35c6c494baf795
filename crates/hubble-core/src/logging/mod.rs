//! Logging setup
//!
//! Console output goes through `tracing-subscriber`'s fmt layer. Optionally
//! each node also appends one JSON object per event to
//! `<dir>/<date>_<node>.jsonl`, which is easy to merge across nodes:
//!
//! ```bash
//! # every failed submission, all nodes, in time order
//! cat logs/*.jsonl | jq -s 'sort_by(.ts) | .[] | select(.level == "error")'
//! ```

use std::path::PathBuf;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub mod entry;
pub mod layer;

pub use entry::LogEntry;
pub use layer::JsonlLayer;

const DEFAULT_FILTER: &str = "info";

/// Where and how to log
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// `RUST_LOG`-style directives; `RUST_LOG` wins when set
    pub filter: Option<String>,
    /// Directory for JSONL files; none disables them
    pub jsonl_dir: Option<PathBuf>,
    /// Node name used in JSONL file names and entries
    pub node: String,
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already set or the JSONL file cannot be
/// opened.
pub fn init_logging(options: &LogOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(options.filter.as_deref().unwrap_or(DEFAULT_FILTER))
    })?;

    let jsonl = match &options.jsonl_dir {
        Some(dir) => Some(JsonlLayer::new(dir, &options.node)?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(jsonl)
        .try_init()?;
    Ok(())
}
