//! Device I/O boundary
//!
//! The engine never talks to hardware. A device driver calls
//! [`Engine::render`] once per period for each scope it serves and hands the
//! finished window to its backend. Completed windows travel over a lock-free
//! SPSC ring so the backend side never takes a lock.
//!
//! ```text
//! NullDevice thread                       Backend
//!       │                                    │
//!       ▼                                    │
//! Engine::render(scope, window) ×N           │
//!       │                                    │
//!       ▼                                    ▼
//! AudioRingProducer ─────── rtrb ─────▶ AudioRingConsumer
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use recallconf::DeviceConfig;

use crate::error::RenderError;
use crate::primitives::{AudioBuffer, BufferWindow, Sample};
use crate::render::{RenderIo, RenderStatus};
use crate::scheduler::Engine;
use crate::scope::SoundScope;

/// Told by the scheduler when rendering should start or stop
pub trait DeviceSession: Send + Sync {
    /// First scope became active
    fn start_pulling(&self);

    /// No scope remains active
    fn stop_pulling(&self);
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unknown sound scope in device config: {0}")]
    UnknownScope(String),

    #[error("device needs at least one channel")]
    NoChannels,

    #[error("failed to spawn device thread: {0}")]
    ThreadSpawn(String),
}

// =============================================================================
// RING
// =============================================================================

/// Create a ring holding `frames` interleaved frames of `channels` samples
pub fn audio_ring(frames: usize, channels: u8) -> (AudioRingProducer, AudioRingConsumer) {
    let (producer, consumer) = RingBuffer::new(frames * channels as usize);
    (
        AudioRingProducer {
            inner: producer,
            channels,
        },
        AudioRingConsumer {
            inner: consumer,
            channels,
        },
    )
}

/// Render side of the ring
pub struct AudioRingProducer {
    inner: Producer<f32>,
    channels: u8,
}

impl AudioRingProducer {
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Free space in frames
    pub fn free_frames(&self) -> usize {
        match self.channels {
            0 => 0,
            c => self.inner.slots() / c as usize,
        }
    }

    /// Push a whole window, or nothing if it does not fit
    pub fn push_window(&mut self, buffer: &AudioBuffer) -> bool {
        if self.inner.slots() < buffer.samples.len() {
            return false;
        }
        for sample in &buffer.samples {
            if self.inner.push(*sample).is_err() {
                return false;
            }
        }
        true
    }
}

/// Backend side of the ring
pub struct AudioRingConsumer {
    inner: Consumer<f32>,
    channels: u8,
}

impl AudioRingConsumer {
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Buffered frames ready to read
    pub fn available_frames(&self) -> usize {
        match self.channels {
            0 => 0,
            c => self.inner.slots() / c as usize,
        }
    }

    /// Fill `dest` with interleaved samples; returns samples written
    pub fn pop_into(&mut self, dest: &mut [f32]) -> usize {
        let mut written = 0;
        for slot in dest.iter_mut() {
            match self.inner.pop() {
                Ok(sample) => {
                    *slot = sample;
                    written += 1;
                }
                Err(_) => break,
            }
        }
        written
    }

    /// Discard everything buffered, returning its absolute peak
    pub fn drain_peak(&mut self) -> f32 {
        let mut peak = 0.0f32;
        while let Ok(sample) = self.inner.pop() {
            peak = peak.max(sample.abs());
        }
        peak
    }
}

// =============================================================================
// NULL DEVICE
// =============================================================================

#[derive(Debug, Default)]
struct PullState {
    pulling: AtomicBool,
    running: AtomicBool,
    periods: AtomicU64,
    dropped: AtomicU64,
}

impl DeviceSession for PullState {
    fn start_pulling(&self) {
        self.pulling.store(true, Ordering::Release);
        debug!("Null device pulling");
    }

    fn stop_pulling(&self) {
        self.pulling.store(false, Ordering::Release);
        debug!("Null device idle");
    }
}

/// Headless driver that renders at buffer-period cadence with no hardware
pub struct NullDevice {
    state: Arc<PullState>,
    scopes: Vec<SoundScope>,
    thread_handle: Option<JoinHandle<()>>,
}

impl NullDevice {
    /// Start the driver thread and register it as `engine`'s device session.
    ///
    /// Returns the device handle and the consumer end of its output ring.
    pub fn spawn(engine: Engine, config: &DeviceConfig) -> Result<(Self, AudioRingConsumer), DeviceError> {
        if config.channels == 0 {
            return Err(DeviceError::NoChannels);
        }
        let scopes = config
            .scopes
            .iter()
            .map(|name| {
                name.parse::<SoundScope>()
                    .map_err(|_| DeviceError::UnknownScope(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let state = Arc::new(PullState {
            running: AtomicBool::new(true),
            ..PullState::default()
        });
        engine.set_device(Arc::clone(&state) as Arc<dyn DeviceSession>);

        let (producer, consumer) = audio_ring(config.ring_frames, config.channels);
        let state_for_thread = Arc::clone(&state);
        let scopes_for_thread = scopes.clone();

        let thread_handle = thread::Builder::new()
            .name("recallgraph-null-device".into())
            .spawn(move || drive(engine, state_for_thread, scopes_for_thread, producer))
            .map_err(|e| DeviceError::ThreadSpawn(e.to_string()))?;

        info!(
            scopes = ?scopes,
            channels = config.channels,
            ring_frames = config.ring_frames,
            "Null device started"
        );

        Ok((
            Self {
                state,
                scopes,
                thread_handle: Some(thread_handle),
            },
            consumer,
        ))
    }

    pub fn scopes(&self) -> &[SoundScope] {
        &self.scopes
    }

    pub fn is_pulling(&self) -> bool {
        self.state.pulling.load(Ordering::Acquire)
    }

    /// Periods rendered while pulling
    pub fn periods(&self) -> u64 {
        self.state.periods.load(Ordering::Relaxed)
    }

    /// Windows dropped because the ring was full
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.state.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for null device thread to stop...");
            if handle.join().is_err() {
                error!("Null device thread panicked");
            }
            info!(periods = self.periods(), dropped = self.dropped(), "Null device stopped");
        }
    }
}

impl Drop for NullDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drive(engine: Engine, state: Arc<PullState>, scopes: Vec<SoundScope>, mut ring: AudioRingProducer) {
    let config = engine.config().clone();
    let frames = config.buffer_size;
    let period = Duration::from_secs_f64(config.period_ms() / 1000.0);
    let mut offsets: Vec<Sample> = vec![Sample::zero(); scopes.len()];
    let mut buffer = AudioBuffer::new(frames, ring.channels());
    let mut deadline = Instant::now();

    while state.running.load(Ordering::Acquire) && !engine.is_shutdown() {
        deadline += period;

        if state.pulling.load(Ordering::Acquire) {
            buffer.clear();
            for (scope, offset) in scopes.iter().zip(offsets.iter_mut()) {
                let window = BufferWindow::new(*offset, frames, config.sample_rate);
                let report = engine.render(*scope, window, &mut RenderIo::output(&mut buffer));
                *offset = match report.status {
                    RenderStatus::Rejected(RenderError::StaleWindow { expected, .. }) => Sample(expected),
                    _ => window.end(),
                };
            }
            state.periods.fetch_add(1, Ordering::Relaxed);

            if !ring.push_window(&buffer) {
                state.dropped.fetch_add(1, Ordering::Relaxed);
                engine.stats().record_underrun();
                warn!(free_frames = ring.free_frames(), "Output ring full, window dropped");
            }
        }

        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            deadline = now;
        }
    }
}
