//! Effect definitions and the processing interface behind a recall's run stage

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::port::{PortDefinition, PortSet};
use crate::primitives::{BufferWindow, ChannelId};
use crate::recycling::AudioSignal;
use crate::scope::SoundScope;

/// Stage within one buffer window. Every window runs all three in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Pre,
    Inter,
    Post,
}

impl RunStage {
    pub const ALL: [RunStage; 3] = [RunStage::Pre, RunStage::Inter, RunStage::Post];
}

/// Everything a processor sees for one channel in one stage
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub window: BufferWindow,
    pub scope: SoundScope,
    pub stage: RunStage,
    pub channel: ChannelId,
    /// Line index of the channel within its pad
    pub line: usize,
    pub audio_ports: &'a PortSet,
    pub channel_ports: &'a PortSet,
    pub run_ports: &'a PortSet,
}

impl RunContext<'_> {
    /// Look up a numeric port, innermost level first
    pub fn param(&self, name: &str, fallback: f32) -> f32 {
        self.run_ports
            .get(name)
            .or_else(|| self.channel_ports.get(name))
            .or_else(|| self.audio_ports.get(name))
            .and_then(|p| p.as_f32())
            .unwrap_or(fallback)
    }
}

/// Error during processing
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("skipped: {reason}")]
    Skipped { reason: &'static str },

    #[error("failed: {reason}")]
    Failed { reason: String },
}

/// Processing function backing a channel-run or recycling recall
pub trait Processor: Send {
    fn run(
        &mut self,
        stage: RunStage,
        ctx: &RunContext<'_>,
        signal: &mut AudioSignal,
    ) -> Result<(), ProcessError>;

    /// Drop run state after a discontinuity in the window sequence
    fn reset(&mut self) {}
}

pub type BoxedProcessor = Box<dyn Processor>;

pub type ProcessorFactory = Arc<dyn Fn() -> BoxedProcessor + Send + Sync>;

/// A logical effect: port definitions plus processing factories per level
#[derive(Clone)]
pub struct EffectDefinition {
    pub type_id: String,
    pub name: String,
    pub ports: Vec<Arc<PortDefinition>>,
    pub channel_run: Option<ProcessorFactory>,
    pub recycling: Option<ProcessorFactory>,
}

impl EffectDefinition {
    pub fn new(type_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            name: name.into(),
            ports: Vec::new(),
            channel_run: None,
            recycling: None,
        }
    }

    pub fn with_port(mut self, port: PortDefinition) -> Self {
        self.ports.push(Arc::new(port));
        self
    }

    pub fn with_channel_run<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> BoxedProcessor + Send + Sync + 'static,
    {
        self.channel_run = Some(Arc::new(factory));
        self
    }

    pub fn with_recycling<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> BoxedProcessor + Send + Sync + 'static,
    {
        self.recycling = Some(Arc::new(factory));
        self
    }
}

impl fmt::Debug for EffectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDefinition")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .field("ports", &self.ports.len())
            .field("channel_run", &self.channel_run.is_some())
            .field("recycling", &self.recycling.is_some())
            .finish()
    }
}

/// Known effects keyed by type id
#[derive(Debug, Default, Clone)]
pub struct EffectRegistry {
    effects: HashMap<String, Arc<EffectDefinition>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an effect, replacing any previous definition with the same id
    pub fn register(&mut self, effect: EffectDefinition) -> Arc<EffectDefinition> {
        let effect = Arc::new(effect);
        self.effects
            .insert(effect.type_id.clone(), Arc::clone(&effect));
        effect
    }

    pub fn get(&self, type_id: &str) -> Option<Arc<EffectDefinition>> {
        self.effects.get(type_id).cloned()
    }

    pub fn type_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.effects.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortValue;
    use crate::recall::RecallLevel;

    struct Silence;

    impl Processor for Silence {
        fn run(
            &mut self,
            _stage: RunStage,
            _ctx: &RunContext<'_>,
            signal: &mut AudioSignal,
        ) -> Result<(), ProcessError> {
            signal.data_mut().fill(0.0);
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = EffectRegistry::new();
        registry.register(
            EffectDefinition::new("silence", "Silence")
                .with_port(PortDefinition::new(
                    "enabled",
                    RecallLevel::Channel,
                    PortValue::Boolean(true),
                ))
                .with_channel_run(|| Box::new(Silence)),
        );

        let effect = registry.get("silence").unwrap();
        assert_eq!(effect.ports.len(), 1);
        assert!(effect.channel_run.is_some());
        assert!(effect.recycling.is_none());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.type_ids(), vec!["silence"]);
    }

    #[test]
    fn test_context_param_prefers_inner_level() {
        let defs = vec![
            Arc::new(PortDefinition::new("gain", RecallLevel::Audio, PortValue::Float(0.1))),
            Arc::new(PortDefinition::new("gain", RecallLevel::ChannelRun, PortValue::Float(0.7))),
        ];
        let audio = PortSet::instantiate(&defs, RecallLevel::Audio);
        let channel = PortSet::new();
        let run = PortSet::instantiate(&defs, RecallLevel::ChannelRun);

        let ctx = RunContext {
            window: BufferWindow::first(16, 48000),
            scope: SoundScope::Playback,
            stage: RunStage::Inter,
            channel: ChannelId(1),
            line: 0,
            audio_ports: &audio,
            channel_ports: &channel,
            run_ports: &run,
        };
        assert_eq!(ctx.param("gain", 0.0), 0.7);
        assert_eq!(ctx.param("missing", 0.3), 0.3);
    }
}
