//! Core primitives for recallgraph
//!
//! Sample positions, buffer windows, identifiers, and the interleaved device
//! buffer exchanged with I/O collaborators.

use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use recallconf::SampleFormat;

// =============================================================================
// TIME TYPES
// =============================================================================

/// Audio sample position
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Sample(pub u64);

impl Sample {
    pub fn zero() -> Self {
        Self(0)
    }
}

impl Add for Sample {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Sample(self.0 + rhs.0)
    }
}

impl Sub for Sample {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Sample(self.0.saturating_sub(rhs.0))
    }
}

/// One fixed-size slice of samples processed per render invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferWindow {
    pub offset: Sample,
    pub frames: usize,
    pub sample_rate: u32,
}

impl BufferWindow {
    pub fn new(offset: Sample, frames: usize, sample_rate: u32) -> Self {
        Self {
            offset,
            frames,
            sample_rate,
        }
    }

    /// First window of a session
    pub fn first(frames: usize, sample_rate: u32) -> Self {
        Self::new(Sample::zero(), frames, sample_rate)
    }

    /// Position one past the last frame of this window
    pub fn end(&self) -> Sample {
        Sample(self.offset.0 + self.frames as u64)
    }

    /// The window that immediately follows this one
    pub fn next(&self) -> Self {
        Self::new(self.end(), self.frames, self.sample_rate)
    }

    /// Wall-clock length of the window
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Global identity of an audio (instrument or track)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AudioId(pub Uuid);

impl AudioId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AudioId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AudioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

counter_id!(
    /// Stable key of a channel in the graph arena
    ChannelId,
    "ch"
);
counter_id!(
    /// Stable key of a recycling (one per channel)
    RecyclingId,
    "rc"
);
counter_id!(
    /// Identity of any recall instance, base or duplicate
    RecallId,
    "rl"
);

/// Monotonic id source shared by one graph
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn channel(&self) -> ChannelId {
        ChannelId(self.bump())
    }

    pub fn recycling(&self) -> RecyclingId {
        RecyclingId(self.bump())
    }

    pub fn recall(&self) -> RecallId {
        RecallId(self.bump())
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TREE SHAPE
// =============================================================================

/// Channel direction within an audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// How an audio connects to the device I/O collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// Internal node, not fed by or feeding the device
    #[default]
    None,
    /// Input channels receive device input samples
    Capture,
    /// Output channels are mixed into the device output buffer
    Playback,
}

// =============================================================================
// DEVICE BUFFER
// =============================================================================

/// Audio buffer with interleaved samples
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: u8,
}

impl AudioBuffer {
    pub fn new(frames: usize, channels: u8) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize],
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn mix(&mut self, other: &AudioBuffer, gain: f32) {
        if self.samples.len() == other.samples.len() {
            for (s, o) in self.samples.iter_mut().zip(other.samples.iter()) {
                *s += o * gain;
            }
        }
    }

    /// Add mono `source` into interleaved channel `channel`
    pub fn mix_channel(&mut self, channel: usize, source: &[f32]) {
        let stride = self.channels as usize;
        if stride == 0 || channel >= stride {
            return;
        }
        for (frame, value) in source.iter().take(self.frames()).enumerate() {
            self.samples[frame * stride + channel] += value;
        }
    }

    /// Copy interleaved channel `channel` into mono `dest`
    pub fn read_channel(&self, channel: usize, dest: &mut [f32]) {
        let stride = self.channels as usize;
        if stride == 0 || channel >= stride {
            return;
        }
        for (frame, value) in dest.iter_mut().take(self.frames()).enumerate() {
            *value = self.samples[frame * stride + channel];
        }
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }
}
