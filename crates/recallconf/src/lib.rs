//! Configuration loading for recallgraph.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, tables merge key by key):
//! 1. `/etc/recallgraph/config.toml` (system)
//! 2. `~/.config/recallgraph/config.toml` (user)
//! 3. `./recallgraph.toml` or the path given on the command line
//! 4. Environment variables (`RECALLGRAPH_*`)
//!
//! # Example Config
//!
//! ```toml
//! [engine]
//! sample_rate = 48000
//! buffer_size = 256
//! sample_format = "f32"
//! render_timeout_ms = 5
//!
//! [telemetry]
//! log_level = "info"
//!
//! [device]
//! channels = 2
//! scopes = ["playback", "sequencer"]
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use settings::{DeviceConfig, EngineConfig, SampleFormat, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete recallgraph configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecallConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub device: DeviceConfig,
}

impl RecallConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an optional explicit file, then apply env overrides.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.sample_rate == 0 {
            return Err(ConfigError::Invalid("engine.sample_rate must be > 0".into()));
        }
        if self.engine.buffer_size == 0 {
            return Err(ConfigError::Invalid("engine.buffer_size must be > 0".into()));
        }
        if self.device.channels == 0 {
            return Err(ConfigError::Invalid("device.channels must be > 0".into()));
        }
        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# recallgraph configuration\n\n");

        output.push_str("[engine]\n");
        output.push_str(&format!("sample_rate = {}\n", self.engine.sample_rate));
        output.push_str(&format!("buffer_size = {}\n", self.engine.buffer_size));
        output.push_str(&format!(
            "sample_format = \"{}\"\n",
            self.engine.sample_format
        ));
        output.push_str(&format!(
            "render_timeout_ms = {}\n",
            self.engine.render_timeout_ms
        ));
        output.push_str(&format!("max_channels = {}\n", self.engine.max_channels));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.telemetry.log_level
        ));

        output.push_str("\n[device]\n");
        output.push_str(&format!("channels = {}\n", self.device.channels));
        output.push_str(&format!("ring_frames = {}\n", self.device.ring_frames));
        let scopes: Vec<String> = self
            .device
            .scopes
            .iter()
            .map(|s| format!("\"{}\"", s))
            .collect();
        output.push_str(&format!("scopes = [{}]\n", scopes.join(", ")));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RecallConfig::default();
        assert_eq!(config.engine.sample_rate, 48000);
        assert_eq!(config.engine.buffer_size, 256);
        assert_eq!(config.device.channels, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_roundtrips() {
        let config = RecallConfig::default();
        let text = config.to_toml();
        assert!(text.contains("[engine]"));
        assert!(text.contains("[device]"));

        let parsed: RecallConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nbuffer_size = 64\n\n[device]\nchannels = 4").unwrap();

        let (config, sources) = RecallConfig::load_with_sources_from(Some(file.path())).unwrap();
        assert_eq!(config.engine.buffer_size, 64);
        assert_eq!(config.device.channels, 4);
        assert!(sources.files.iter().any(|p| p == file.path()));
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nbuffer_size = 0").unwrap();

        let result = RecallConfig::load_from(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
