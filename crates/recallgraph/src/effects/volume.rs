//! Gain stage with equal-sum stereo pan
//!
//! `volume` and `muted` live on each channel; `pan` is shared by the whole
//! audio and splits lines 0 and 1 left/right.

use crate::port::{PortDefinition, PortValue};
use crate::recall::{BoxedProcessor, EffectDefinition, ProcessError, Processor, RecallLevel, RunContext, RunStage};
use crate::recycling::AudioSignal;

pub const TYPE_ID: &str = "volume";

pub fn definition() -> EffectDefinition {
    EffectDefinition::new(TYPE_ID, "Volume")
        .with_port(PortDefinition::new("volume", RecallLevel::Channel, PortValue::Float(1.0)).with_range(0.0, 2.0))
        .with_port(PortDefinition::new("muted", RecallLevel::Channel, PortValue::Boolean(false)))
        .with_port(PortDefinition::new("pan", RecallLevel::Audio, PortValue::Float(0.0)).with_range(-1.0, 1.0))
        .with_channel_run(|| Box::new(Volume) as BoxedProcessor)
}

struct Volume;

/// Gain applied to `line` for a pan position in [-1, 1]
fn pan_gain(pan: f32, line: usize) -> f32 {
    match line {
        0 => (1.0 - pan).min(1.0),
        1 => (1.0 + pan).min(1.0),
        _ => 1.0,
    }
}

impl Processor for Volume {
    fn run(&mut self, stage: RunStage, ctx: &RunContext<'_>, signal: &mut AudioSignal) -> Result<(), ProcessError> {
        if stage != RunStage::Inter {
            return Ok(());
        }

        let muted = ctx
            .channel_ports
            .get("muted")
            .and_then(|p| p.as_bool())
            .unwrap_or(false);
        let gain = if muted {
            0.0
        } else {
            ctx.param("volume", 1.0) * pan_gain(ctx.param("pan", 0.0), ctx.line)
        };

        if gain != 1.0 {
            for sample in signal.data_mut() {
                *sample *= gain;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::testing::{signal, window, Levels};

    #[test]
    fn test_volume_scales_inter_only() {
        let effect = definition();
        let levels = Levels::of(&effect);
        levels.channel.get("volume").unwrap().store(PortValue::Float(0.5));

        let w = window(0, 32);
        let mut sig = signal(&w, 0.8);
        let mut volume = Volume;

        volume.run(RunStage::Pre, &levels.ctx(RunStage::Pre, w, 0), &mut sig).unwrap();
        assert_eq!(sig.peak(), 0.8);
        volume.run(RunStage::Inter, &levels.ctx(RunStage::Inter, w, 0), &mut sig).unwrap();
        assert!((sig.peak() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_pan_splits_lines() {
        let effect = definition();
        let levels = Levels::of(&effect);
        levels.audio.get("pan").unwrap().store(PortValue::Float(-0.5));
        let w = window(0, 8);

        let mut left = signal(&w, 1.0);
        let mut right = signal(&w, 1.0);
        Volume.run(RunStage::Inter, &levels.ctx(RunStage::Inter, w, 0), &mut left).unwrap();
        Volume.run(RunStage::Inter, &levels.ctx(RunStage::Inter, w, 1), &mut right).unwrap();

        assert_eq!(left.peak(), 1.0);
        assert!((right.peak() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mute_silences() {
        let effect = definition();
        let levels = Levels::of(&effect);
        levels.channel.get("muted").unwrap().store(PortValue::Boolean(true));
        let w = window(0, 8);
        let mut sig = signal(&w, 1.0);
        Volume.run(RunStage::Inter, &levels.ctx(RunStage::Inter, w, 0), &mut sig).unwrap();
        assert_eq!(sig.peak(), 0.0);
    }
}
