//! Config file discovery, table merging, and environment variable overlay.

use std::env;
use std::path::{Path, PathBuf};

use crate::{ConfigError, RecallConfig};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/recallgraph/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("recallgraph/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("recallgraph.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key, every
/// other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a typed config, filling unset fields with defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<RecallConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
}

/// Apply `RECALLGRAPH_*` environment overrides from the process environment.
pub fn apply_env_overrides(config: &mut RecallConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides using an arbitrary variable lookup.
pub fn apply_overrides_from<F>(config: &mut RecallConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(rate) = lookup("RECALLGRAPH_SAMPLE_RATE").and_then(|v| v.parse().ok()) {
        config.engine.sample_rate = rate;
        sources.env_overrides.push("RECALLGRAPH_SAMPLE_RATE".to_string());
    }
    if let Some(size) = lookup("RECALLGRAPH_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
        config.engine.buffer_size = size;
        sources.env_overrides.push("RECALLGRAPH_BUFFER_SIZE".to_string());
    }
    if let Some(ms) = lookup("RECALLGRAPH_RENDER_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.engine.render_timeout_ms = ms;
        sources
            .env_overrides
            .push("RECALLGRAPH_RENDER_TIMEOUT_MS".to_string());
    }
    if let Some(level) = lookup("RECALLGRAPH_LOG_LEVEL") {
        config.telemetry.log_level = level;
        sources.env_overrides.push("RECALLGRAPH_LOG_LEVEL".to_string());
    }
    if let Some(channels) = lookup("RECALLGRAPH_DEVICE_CHANNELS").and_then(|v| v.parse().ok()) {
        config.device.channels = channels;
        sources
            .env_overrides
            .push("RECALLGRAPH_DEVICE_CHANNELS".to_string());
    }
}
