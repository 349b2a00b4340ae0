//! Peak meter
//!
//! Runs at recycling level after every other stage has touched the window,
//! and publishes the window's absolute peak on the run's `peak` output port.

use crate::port::{PortDefinition, PortValue};
use crate::recall::{BoxedProcessor, EffectDefinition, ProcessError, Processor, RecallLevel, RunContext, RunStage};
use crate::recycling::AudioSignal;

pub const TYPE_ID: &str = "peak";

pub fn definition() -> EffectDefinition {
    EffectDefinition::new(TYPE_ID, "Peak Meter")
        .with_port(PortDefinition::new("peak", RecallLevel::ChannelRun, PortValue::Float(0.0)).output())
        .with_recycling(|| Box::new(PeakMeter) as BoxedProcessor)
}

struct PeakMeter;

impl Processor for PeakMeter {
    fn run(&mut self, stage: RunStage, ctx: &RunContext<'_>, signal: &mut AudioSignal) -> Result<(), ProcessError> {
        if stage != RunStage::Post {
            return Ok(());
        }
        let port = ctx.run_ports.get("peak").ok_or(ProcessError::Skipped {
            reason: "no peak port",
        })?;
        port.store(PortValue::Float(signal.peak()));
        Ok(())
    }
}
