//! Recycling: the live signal buffers of one channel
//!
//! A recycling carries one [`AudioSignal`] per active scope, so two scopes
//! rendering at once never write the same buffer. Signals are added and
//! removed only by structural mutation; render only reads and writes the
//! samples of signals that already exist.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::primitives::{BufferWindow, ChannelId, RecyclingId, Sample, SampleFormat};
use crate::scope::SoundScope;

/// One scope's sample buffer for a channel
#[derive(Debug, Clone)]
pub struct AudioSignal {
    pub scope: SoundScope,
    pub samples: Vec<f32>,
    pub format: SampleFormat,
    /// Offset of the window currently held
    pub timestamp: Sample,
    pub frames_written: usize,
}

impl AudioSignal {
    pub fn new(scope: SoundScope, frames: usize, format: SampleFormat) -> Self {
        Self {
            scope,
            samples: vec![0.0; frames],
            format,
            timestamp: Sample::zero(),
            frames_written: 0,
        }
    }

    /// Allocated length in frames
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Zero the buffer and stamp it with `window`. Never reallocates.
    pub fn begin(&mut self, window: &BufferWindow) {
        let frames = window.frames.min(self.samples.len());
        self.samples[..frames].fill(0.0);
        self.timestamp = window.offset;
        self.frames_written = frames;
    }

    /// Samples of the current window
    pub fn data(&self) -> &[f32] {
        &self.samples[..self.frames_written]
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.samples[..self.frames_written]
    }

    /// Add `source` into the current window
    pub fn mix_from(&mut self, source: &[f32]) {
        for (dst, src) in self.data_mut().iter_mut().zip(source) {
            *dst += src;
        }
    }

    pub fn peak(&self) -> f32 {
        self.data().iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// Buffer container owned by exactly one channel
#[derive(Debug)]
pub struct Recycling {
    pub id: RecyclingId,
    pub channel: ChannelId,
    signals: Vec<(SoundScope, Mutex<AudioSignal>)>,
}

impl Recycling {
    pub fn new(id: RecyclingId, channel: ChannelId) -> Self {
        Self {
            id,
            channel,
            signals: Vec::new(),
        }
    }

    /// Allocate the signal for `scope`. Returns false if it already exists.
    pub fn add_signal(&mut self, scope: SoundScope, frames: usize, format: SampleFormat) -> bool {
        if self.position(scope).is_some() {
            return false;
        }
        self.signals
            .push((scope, Mutex::new(AudioSignal::new(scope, frames, format))));
        true
    }

    /// Release the signal for `scope`. Returns false if there was none.
    pub fn remove_signal(&mut self, scope: SoundScope) -> bool {
        match self.position(scope) {
            Some(index) => {
                self.signals.remove(index);
                true
            }
            None => false,
        }
    }

    /// Lock the signal for `scope`
    pub fn signal(&self, scope: SoundScope) -> Option<MutexGuard<'_, AudioSignal>> {
        self.signals
            .iter()
            .find(|(s, _)| *s == scope)
            .map(|(_, signal)| signal.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn has_signal(&self, scope: SoundScope) -> bool {
        self.position(scope).is_some()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    fn position(&self, scope: SoundScope) -> Option<usize> {
        self.signals.iter().position(|(s, _)| *s == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recycling() -> Recycling {
        Recycling::new(RecyclingId(2), ChannelId(1))
    }

    #[test]
    fn test_add_signal_is_idempotent() {
        let mut rc = recycling();
        assert!(rc.add_signal(SoundScope::Playback, 64, SampleFormat::F32));
        assert!(!rc.add_signal(SoundScope::Playback, 64, SampleFormat::F32));
        assert!(rc.add_signal(SoundScope::Wave, 64, SampleFormat::F32));
        assert_eq!(rc.signal_count(), 2);
        assert!(rc.signal(SoundScope::Wave).is_some());
        assert!(rc.signal(SoundScope::Sequencer).is_none());
    }

    #[test]
    fn test_remove_signal() {
        let mut rc = recycling();
        rc.add_signal(SoundScope::Midi, 16, SampleFormat::F32);
        assert!(rc.remove_signal(SoundScope::Midi));
        assert!(!rc.remove_signal(SoundScope::Midi));
        assert!(rc.signal(SoundScope::Midi).is_none());
        assert_eq!(rc.signal_count(), 0);
    }

    #[test]
    fn test_scopes_do_not_share_buffers() {
        let mut rc = recycling();
        rc.add_signal(SoundScope::Playback, 8, SampleFormat::F32);
        rc.add_signal(SoundScope::Sequencer, 8, SampleFormat::F32);

        let window = BufferWindow::first(8, 48000);
        {
            let mut sig = rc.signal(SoundScope::Playback).unwrap();
            sig.begin(&window);
            sig.data_mut().fill(0.5);
        }
        let mut other = rc.signal(SoundScope::Sequencer).unwrap();
        other.begin(&window);
        assert_eq!(other.peak(), 0.0);
    }

    #[test]
    fn test_begin_clamps_to_capacity() {
        let mut sig = AudioSignal::new(SoundScope::Playback, 4, SampleFormat::F32);
        sig.samples.fill(1.0);
        sig.begin(&BufferWindow::new(Sample(128), 16, 48000));
        assert_eq!(sig.frames_written, 4);
        assert_eq!(sig.timestamp, Sample(128));
        assert_eq!(sig.peak(), 0.0);
    }

    #[test]
    fn test_mix_from() {
        let mut sig = AudioSignal::new(SoundScope::Playback, 4, SampleFormat::F32);
        sig.begin(&BufferWindow::first(4, 48000));
        sig.mix_from(&[0.25, 0.25, 0.25, 0.25]);
        sig.mix_from(&[0.25, 0.0, 0.0, 0.0]);
        assert_eq!(sig.data(), &[0.5, 0.25, 0.25, 0.25]);
    }
}
