//! Sine generator
//!
//! Adds a sine into the channel's window during `Pre`, so later stages see
//! it together with anything mixed in from a link. Phase is run state and
//! restarts after a window gap.

use std::f64::consts::TAU;

use crate::port::{PortDefinition, PortValue};
use crate::recall::{BoxedProcessor, EffectDefinition, ProcessError, Processor, RecallLevel, RunContext, RunStage};
use crate::recycling::AudioSignal;

pub const TYPE_ID: &str = "oscillator";

pub fn definition() -> EffectDefinition {
    EffectDefinition::new(TYPE_ID, "Oscillator")
        .with_port(
            PortDefinition::new("frequency", RecallLevel::Channel, PortValue::Float(440.0)).with_range(0.0, 20000.0),
        )
        .with_port(PortDefinition::new("amplitude", RecallLevel::Channel, PortValue::Float(0.5)).with_range(0.0, 1.0))
        .with_channel_run(|| Box::<Oscillator>::default() as BoxedProcessor)
}

#[derive(Debug, Default)]
struct Oscillator {
    /// Cycles, in [0, 1)
    phase: f64,
}

impl Processor for Oscillator {
    fn run(&mut self, stage: RunStage, ctx: &RunContext<'_>, signal: &mut AudioSignal) -> Result<(), ProcessError> {
        if stage != RunStage::Pre {
            return Ok(());
        }
        if ctx.window.sample_rate == 0 {
            return Err(ProcessError::Skipped {
                reason: "zero sample rate",
            });
        }

        let amplitude = ctx.param("amplitude", 0.5);
        let step = ctx.param("frequency", 440.0) as f64 / ctx.window.sample_rate as f64;

        for sample in signal.data_mut() {
            *sample += amplitude * (self.phase * TAU).sin() as f32;
            self.phase = (self.phase + step).fract();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}
