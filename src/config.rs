//! Optional config file loading. Search order: ./mangacrawl.toml, then
//! $XDG_CONFIG_HOME/mangacrawl/config.toml (or ~/.config/mangacrawl/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const LOCAL_CONFIG_NAME: &str = "mangacrawl.toml";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Base output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]). Length should be retry_count - 1.
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Chapter workers (default 3).
    pub chapter_workers: Option<usize>,
    /// Page workers (default 5).
    pub page_workers: Option<usize>,
    /// Parsed documents kept in memory (default 32).
    pub fetch_cache_size: Option<usize>,
}

/// Search order: (1) ./mangacrawl.toml, (2) $XDG_CONFIG_HOME/mangacrawl/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join(LOCAL_CONFIG_NAME)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("mangacrawl").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return load_config_from(path).map(Some);
        }
    }
    Ok(None)
}

pub fn load_config_from(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}
