//! Configuration sections: engine, telemetry, device.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Storage format recorded on audio signals.
///
/// Samples are always processed as `f32`; the format is carried as metadata
/// for persistence and export collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    F32,
    F64,
    S16,
    S24,
    S32,
}

impl SampleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::F32 => "f32",
            SampleFormat::F64 => "f64",
            SampleFormat::S16 => "s16",
            SampleFormat::S24 => "s24",
            SampleFormat::S32 => "s32",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" => Ok(SampleFormat::F32),
            "f64" => Ok(SampleFormat::F64),
            "s16" => Ok(SampleFormat::S16),
            "s24" => Ok(SampleFormat::S24),
            "s32" => Ok(SampleFormat::S32),
            other => Err(format!("unknown sample format: {}", other)),
        }
    }
}

/// Render engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Frames per second.
    /// Default: 48000
    #[serde(default = "EngineConfig::default_sample_rate")]
    pub sample_rate: u32,

    /// Frames per buffer window. Every audio signal is allocated at this size.
    /// Default: 256
    #[serde(default = "EngineConfig::default_buffer_size")]
    pub buffer_size: usize,

    /// Format tag stored on audio signals.
    /// Default: f32
    #[serde(default)]
    pub sample_format: SampleFormat,

    /// How long a render window may wait at the barrier while structural
    /// tasks are applied before the window is dropped as an underrun.
    /// Default: 5
    #[serde(default = "EngineConfig::default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Upper bound on channels per direction of a single audio.
    /// Default: 1024
    #[serde(default = "EngineConfig::default_max_channels")]
    pub max_channels: usize,
}

impl EngineConfig {
    fn default_sample_rate() -> u32 {
        48000
    }

    fn default_buffer_size() -> usize {
        256
    }

    fn default_render_timeout_ms() -> u64 {
        5
    }

    fn default_max_channels() -> usize {
        1024
    }

    /// Duration of one buffer window in milliseconds.
    pub fn period_ms(&self) -> f64 {
        self.buffer_size as f64 / self.sample_rate as f64 * 1000.0
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            buffer_size: Self::default_buffer_size(),
            sample_format: SampleFormat::default(),
            render_timeout_ms: Self::default_render_timeout_ms(),
            max_channels: Self::default_max_channels(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Settings for the built-in null device driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Interleaved channels in the device buffer.
    /// Default: 2
    #[serde(default = "DeviceConfig::default_channels")]
    pub channels: u8,

    /// Capacity of the output ring in frames.
    /// Default: 4096
    #[serde(default = "DeviceConfig::default_ring_frames")]
    pub ring_frames: usize,

    /// Sound scopes the device pulls windows for.
    /// Default: ["playback"]
    #[serde(default = "DeviceConfig::default_scopes")]
    pub scopes: Vec<String>,
}

impl DeviceConfig {
    fn default_channels() -> u8 {
        2
    }

    fn default_ring_frames() -> usize {
        4096
    }

    fn default_scopes() -> Vec<String> {
        vec!["playback".to_string()]
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            channels: Self::default_channels(),
            ring_frames: Self::default_ring_frames(),
            scopes: Self::default_scopes(),
        }
    }
}
