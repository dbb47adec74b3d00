//! Tracing subscriber setup. `RUST_LOG` wins over the verbosity flag when set.

use anyhow::Context as _;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

/// Default filter for a `-v` count.
pub fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. Logs go to stderr, or are appended to `log_file` (without ANSI
/// colours, at debug level unless overridden).
pub fn init(verbosity: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = match log_file {
        Some(_) => default_level(verbosity.max(2)),
        None => default_level(verbosity),
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("build log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;
        }
        None => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;
        }
    }

    Ok(())
}
