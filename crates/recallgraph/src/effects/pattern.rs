//! Step gate
//!
//! Multiplies the window by a per-step gate taken from the audio's `steps`
//! buffer port. The step index is derived from the absolute sample offset,
//! so every scope stays in time with its own timeline without run state.
//! The current step is published on the run's `position` output port.

use crate::port::{PortDefinition, PortValue};
use crate::recall::{BoxedProcessor, EffectDefinition, ProcessError, Processor, RecallLevel, RunContext, RunStage};
use crate::recycling::AudioSignal;

pub const TYPE_ID: &str = "pattern";

pub fn definition() -> EffectDefinition {
    EffectDefinition::new(TYPE_ID, "Pattern")
        .with_port(PortDefinition::new(
            "steps",
            RecallLevel::Audio,
            PortValue::Buffer(vec![1.0; 16]),
        ))
        .with_port(
            PortDefinition::new("step_frames", RecallLevel::Audio, PortValue::Integer(12000))
                .with_range(1.0, i32::MAX as f64),
        )
        .with_port(PortDefinition::new("position", RecallLevel::ChannelRun, PortValue::Integer(0)).output())
        .with_channel_run(|| Box::new(Pattern) as BoxedProcessor)
}

struct Pattern;

impl Processor for Pattern {
    fn run(&mut self, stage: RunStage, ctx: &RunContext<'_>, signal: &mut AudioSignal) -> Result<(), ProcessError> {
        if stage != RunStage::Inter {
            return Ok(());
        }

        let step_frames = ctx
            .audio_ports
            .get("step_frames")
            .and_then(|p| p.as_i64())
            .filter(|n| *n > 0)
            .unwrap_or(12000) as u64;
        let steps = ctx.audio_ports.get("steps").ok_or(ProcessError::Skipped {
            reason: "no steps port",
        })?;

        let start = ctx.window.offset.0;
        let last = steps.read(|value| {
            let PortValue::Buffer(gates) = value else {
                return None;
            };
            if gates.is_empty() {
                return None;
            }
            let mut step = 0;
            for (i, sample) in signal.data_mut().iter_mut().enumerate() {
                step = ((start + i as u64) / step_frames) as usize % gates.len();
                *sample *= gates[step];
            }
            Some(step)
        });

        let step = last.ok_or(ProcessError::Skipped {
            reason: "empty pattern",
        })?;
        if let Some(position) = ctx.run_ports.get("position") {
            position.store(PortValue::Integer(step as i64));
        }
        Ok(())
    }
}
