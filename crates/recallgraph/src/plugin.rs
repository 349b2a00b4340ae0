//! Plugin bridge adapter
//!
//! Wraps a foreign plugin instance as a channel-run processor. Numeric ports
//! are flattened into the plugin's parameter array in definition order, and
//! the channel's window is handed over in place as a mono buffer.

use std::sync::Arc;

use crate::port::{PortDefinition, PortKind};
use crate::recall::{BoxedProcessor, EffectDefinition, ProcessError, Processor, RunContext, RunStage};
use crate::recycling::AudioSignal;

/// A foreign plugin as seen through its native layout
pub trait PluginInstance: Send {
    /// Length of the parameter array `process` expects
    fn parameter_count(&self) -> usize;

    /// Process `buffer` in place
    fn process(&mut self, params: &[f32], buffer: &mut [f32]) -> Result<(), String>;

    /// Drop internal state (delay lines, envelopes)
    fn reset(&mut self) {}
}

/// Processor that drives a [`PluginInstance`] during `Inter`
pub struct PluginProcessor {
    instance: Box<dyn PluginInstance>,
    names: Arc<[String]>,
    params: Vec<f32>,
}

impl PluginProcessor {
    pub fn new(instance: Box<dyn PluginInstance>, names: Arc<[String]>) -> Self {
        let params = vec![0.0; instance.parameter_count()];
        Self {
            instance,
            names,
            params,
        }
    }

    /// Current parameter layout, as last translated
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    fn translate(&mut self, ctx: &RunContext<'_>) {
        for (slot, name) in self.params.iter_mut().zip(self.names.iter()) {
            *slot = ctx.param(name, *slot);
        }
    }
}

impl Processor for PluginProcessor {
    fn run(&mut self, stage: RunStage, ctx: &RunContext<'_>, signal: &mut AudioSignal) -> Result<(), ProcessError> {
        if stage != RunStage::Inter {
            return Ok(());
        }
        self.translate(ctx);
        self.instance
            .process(&self.params, signal.data_mut())
            .map_err(|reason| ProcessError::Failed { reason })
    }

    fn reset(&mut self) {
        self.instance.reset();
    }
}

/// Effect definition whose channel runs are backed by plugin instances
pub fn plugin_effect<F>(type_id: impl Into<String>, ports: Vec<PortDefinition>, factory: F) -> EffectDefinition
where
    F: Fn() -> Box<dyn PluginInstance> + Send + Sync + 'static,
{
    let type_id = type_id.into();
    let names: Arc<[String]> = ports
        .iter()
        .filter(|p| p.kind() != PortKind::Buffer && !p.is_output)
        .map(|p| p.name.clone())
        .collect();

    let mut effect = EffectDefinition::new(type_id.clone(), type_id);
    for port in ports {
        effect = effect.with_port(port);
    }
    effect.with_channel_run(move || Box::new(PluginProcessor::new(factory(), Arc::clone(&names))) as BoxedProcessor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::testing::{signal, window, Levels};
    use crate::port::PortValue;
    use crate::recall::RecallLevel;

    /// Gain then offset, like a two-knob plugin
    struct Affine;

    impl PluginInstance for Affine {
        fn parameter_count(&self) -> usize {
            2
        }

        fn process(&mut self, params: &[f32], buffer: &mut [f32]) -> Result<(), String> {
            for sample in buffer {
                *sample = *sample * params[0] + params[1];
            }
            Ok(())
        }
    }

    struct Crashing;

    impl PluginInstance for Crashing {
        fn parameter_count(&self) -> usize {
            0
        }

        fn process(&mut self, _params: &[f32], _buffer: &mut [f32]) -> Result<(), String> {
            Err("segfault in dsp".into())
        }
    }

    fn affine() -> EffectDefinition {
        plugin_effect(
            "affine",
            vec![
                PortDefinition::new("gain", RecallLevel::Channel, PortValue::Float(2.0)),
                PortDefinition::new("offset", RecallLevel::ChannelRun, PortValue::Float(0.1)),
                PortDefinition::new("meter", RecallLevel::ChannelRun, PortValue::Float(0.0)).output(),
            ],
            || Box::new(Affine),
        )
    }

    #[test]
    fn test_ports_translated_in_definition_order() {
        let effect = affine();
        let levels = Levels::of(&effect);
        let mut processor = (effect.channel_run.as_ref().unwrap())();

        let w = window(0, 4);
        let mut sig = signal(&w, 0.5);
        processor
            .run(RunStage::Inter, &levels.ctx(RunStage::Inter, w, 0), &mut sig)
            .unwrap();
        assert!(sig.data().iter().all(|s| (*s - 1.1).abs() < 1e-6));
    }

    #[test]
    fn test_only_inter_stage_processes() {
        let effect = affine();
        let levels = Levels::of(&effect);
        let mut processor = PluginProcessor::new(Box::new(Affine), Arc::from(vec!["gain".to_string()]));
        let w = window(0, 4);
        let mut sig = signal(&w, 0.5);
        processor
            .run(RunStage::Pre, &levels.ctx(RunStage::Pre, w, 0), &mut sig)
            .unwrap();
        assert_eq!(sig.peak(), 0.5);
        assert_eq!(processor.params(), &[0.0, 0.0]);
    }

    #[test]
    fn test_plugin_error_is_failure() {
        let effect = plugin_effect("crash", vec![], || Box::new(Crashing));
        let levels = Levels::of(&effect);
        let mut processor = (effect.channel_run.as_ref().unwrap())();
        let w = window(0, 4);
        let mut sig = signal(&w, 0.5);
        let result = processor.run(RunStage::Inter, &levels.ctx(RunStage::Inter, w, 0), &mut sig);
        assert!(matches!(result, Err(ProcessError::Failed { reason }) if reason == "segfault in dsp"));
    }
}
