//! The recall family
//!
//! One logical effect is attached at the audio level and fans out down the
//! tree: a [`RecallAudio`] owns one [`RecallChannel`] per channel of its target
//! direction, and each recall channel is duplicated into a [`RecallChannelRun`]
//! (and a [`RecallRecycling`] when the effect processes buffers) for every
//! active scope. Run-level duplicates always carry fresh ports seeded from the
//! effect's port definitions, so no two scopes share run state.

pub mod effect;
pub mod order;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use effect::{
    BoxedProcessor, EffectDefinition, EffectRegistry, ProcessError, Processor, ProcessorFactory,
    RunContext, RunStage,
};
pub use order::DependencyOrder;

use crate::port::PortSet;
use crate::primitives::{Direction, IdAllocator, RecallId, RecyclingId};
use crate::recycling::AudioSignal;
use crate::scope::SoundScope;

/// Tree level a recall is attached at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallLevel {
    Audio,
    Channel,
    ChannelRun,
    Recycling,
}

/// What a recall at a given level can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub has_ports: bool,
    pub runs_per_buffer: bool,
    pub duplicable: bool,
}

impl RecallLevel {
    pub fn capabilities(self) -> Capabilities {
        match self {
            RecallLevel::Audio | RecallLevel::Channel => Capabilities {
                has_ports: true,
                runs_per_buffer: false,
                duplicable: true,
            },
            RecallLevel::ChannelRun => Capabilities {
                has_ports: true,
                runs_per_buffer: true,
                duplicable: false,
            },
            RecallLevel::Recycling => Capabilities {
                has_ports: false,
                runs_per_buffer: true,
                duplicable: false,
            },
        }
    }
}

/// Per-recall behaviour flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Behaviour {
    /// Traversed but not executed
    pub bypass: bool,
    /// Signal is premultiplied by the channel gain upstream
    pub premultiplied: bool,
}

/// Common surface of every recall level
pub trait Recall {
    fn id(&self) -> RecallId;

    fn level(&self) -> RecallLevel;

    fn capabilities(&self) -> Capabilities {
        self.level().capabilities()
    }

    fn effect(&self) -> &Arc<EffectDefinition>;

    /// Scope of a run-level duplicate; `None` for structural recalls
    fn scope(&self) -> Option<SoundScope> {
        None
    }

    fn ports(&self) -> &PortSet;

    fn is_enabled(&self) -> bool {
        true
    }

    fn behaviour(&self) -> Behaviour;

    /// Recall this one was duplicated from
    fn parent(&self) -> Option<RecallId> {
        None
    }
}

// =============================================================================
// AUDIO LEVEL
// =============================================================================

/// An effect attached to an audio, applied to channels of one direction
#[derive(Debug)]
pub struct RecallAudio {
    pub id: RecallId,
    pub effect: Arc<EffectDefinition>,
    pub target: Direction,
    pub ports: PortSet,
    pub enabled: bool,
    pub behaviour: Behaviour,
}

impl RecallAudio {
    pub fn new(id: RecallId, effect: Arc<EffectDefinition>, target: Direction) -> Self {
        let ports = PortSet::instantiate(&effect.ports, RecallLevel::Audio);
        Self {
            id,
            effect,
            target,
            ports,
            enabled: true,
            behaviour: Behaviour::default(),
        }
    }

    /// Structural duplicate for one channel
    pub fn duplicate(&self, ids: &IdAllocator) -> RecallChannel {
        RecallChannel {
            id: ids.recall(),
            parent: self.id,
            effect: Arc::clone(&self.effect),
            ports: PortSet::instantiate(&self.effect.ports, RecallLevel::Channel),
            enabled: self.enabled,
            behaviour: self.behaviour,
        }
    }
}

impl Recall for RecallAudio {
    fn id(&self) -> RecallId {
        self.id
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::Audio
    }

    fn effect(&self) -> &Arc<EffectDefinition> {
        &self.effect
    }

    fn ports(&self) -> &PortSet {
        &self.ports
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn behaviour(&self) -> Behaviour {
        self.behaviour
    }
}

// =============================================================================
// CHANNEL LEVEL
// =============================================================================

/// A recall audio's per-channel instance
#[derive(Debug)]
pub struct RecallChannel {
    pub id: RecallId,
    /// The recall audio this was duplicated from
    pub parent: RecallId,
    pub effect: Arc<EffectDefinition>,
    pub ports: PortSet,
    pub enabled: bool,
    pub behaviour: Behaviour,
}

impl RecallChannel {
    /// Run-level duplicates for `scope`: always a channel run, plus a
    /// recycling run when the effect processes buffers at that level
    pub fn duplicate(
        &self,
        ids: &IdAllocator,
        scope: SoundScope,
        recycling: RecyclingId,
    ) -> (RecallChannelRun, Option<RecallRecycling>) {
        let run = RecallChannelRun {
            id: ids.recall(),
            parent: self.id,
            base: self.parent,
            effect: Arc::clone(&self.effect),
            scope,
            ports: PortSet::instantiate(&self.effect.ports, RecallLevel::ChannelRun),
            behaviour: self.behaviour,
            slot: ProcessorSlot::new(self.effect.channel_run.as_ref().map(|f| f())),
        };

        let recycling = self.effect.recycling.as_ref().map(|factory| RecallRecycling {
            id: ids.recall(),
            parent: self.id,
            base: self.parent,
            effect: Arc::clone(&self.effect),
            scope,
            recycling,
            ports: PortSet::new(),
            behaviour: self.behaviour,
            slot: ProcessorSlot::new(Some(factory())),
        });

        (run, recycling)
    }
}

impl Recall for RecallChannel {
    fn id(&self) -> RecallId {
        self.id
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::Channel
    }

    fn effect(&self) -> &Arc<EffectDefinition> {
        &self.effect
    }

    fn ports(&self) -> &PortSet {
        &self.ports
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn behaviour(&self) -> Behaviour {
        self.behaviour
    }

    fn parent(&self) -> Option<RecallId> {
        Some(self.parent)
    }
}

// =============================================================================
// RUN LEVEL
// =============================================================================

/// A processor plus its failure latch
pub struct ProcessorSlot {
    processor: Option<BoxedProcessor>,
    failed: bool,
}

impl ProcessorSlot {
    pub fn new(processor: Option<BoxedProcessor>) -> Self {
        Self {
            processor,
            failed: false,
        }
    }

    pub fn has_processor(&self) -> bool {
        self.processor.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn reset(&mut self) {
        if let Some(processor) = self.processor.as_mut() {
            processor.reset();
        }
    }

    /// Run one stage. A failed processor is logged once and skipped from then on.
    pub fn run(
        &mut self,
        recall: RecallId,
        effect: &str,
        ctx: &RunContext<'_>,
        signal: &mut AudioSignal,
    ) -> bool {
        if self.failed {
            return false;
        }
        let Some(processor) = self.processor.as_mut() else {
            return false;
        };

        match processor.run(ctx.stage, ctx, signal) {
            Ok(()) => true,
            Err(ProcessError::Skipped { reason }) => {
                tracing::trace!(recall.id = %recall, effect, reason, "Processor skipped");
                false
            }
            Err(ProcessError::Failed { reason }) => {
                tracing::error!(
                    recall.id = %recall,
                    effect,
                    scope = %ctx.scope,
                    offset = ctx.window.offset.0,
                    error = %reason,
                    "Processor failed, skipping it from now on"
                );
                self.failed = true;
                false
            }
        }
    }
}

impl fmt::Debug for ProcessorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorSlot")
            .field("processor", &self.processor.is_some())
            .field("failed", &self.failed)
            .finish()
    }
}

/// Per-scope run context of a recall channel
#[derive(Debug)]
pub struct RecallChannelRun {
    pub id: RecallId,
    /// The recall channel this was duplicated from
    pub parent: RecallId,
    /// The recall audio at the root of this fan-out
    pub base: RecallId,
    pub effect: Arc<EffectDefinition>,
    pub scope: SoundScope,
    pub ports: PortSet,
    pub behaviour: Behaviour,
    pub slot: ProcessorSlot,
}

impl Recall for RecallChannelRun {
    fn id(&self) -> RecallId {
        self.id
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::ChannelRun
    }

    fn effect(&self) -> &Arc<EffectDefinition> {
        &self.effect
    }

    fn scope(&self) -> Option<SoundScope> {
        Some(self.scope)
    }

    fn ports(&self) -> &PortSet {
        &self.ports
    }

    fn behaviour(&self) -> Behaviour {
        self.behaviour
    }

    fn parent(&self) -> Option<RecallId> {
        Some(self.parent)
    }
}

/// Per-scope buffer processor bound to one recycling
#[derive(Debug)]
pub struct RecallRecycling {
    pub id: RecallId,
    pub parent: RecallId,
    pub base: RecallId,
    pub effect: Arc<EffectDefinition>,
    pub scope: SoundScope,
    pub recycling: RecyclingId,
    ports: PortSet,
    pub behaviour: Behaviour,
    pub slot: ProcessorSlot,
}

impl Recall for RecallRecycling {
    fn id(&self) -> RecallId {
        self.id
    }

    fn level(&self) -> RecallLevel {
        RecallLevel::Recycling
    }

    fn effect(&self) -> &Arc<EffectDefinition> {
        &self.effect
    }

    fn scope(&self) -> Option<SoundScope> {
        Some(self.scope)
    }

    fn ports(&self) -> &PortSet {
        &self.ports
    }

    fn behaviour(&self) -> Behaviour {
        self.behaviour
    }

    fn parent(&self) -> Option<RecallId> {
        Some(self.parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortDefinition, PortValue};
    use crate::primitives::{BufferWindow, ChannelId, SampleFormat};

    struct Failing;

    impl Processor for Failing {
        fn run(
            &mut self,
            _stage: RunStage,
            _ctx: &RunContext<'_>,
            _signal: &mut AudioSignal,
        ) -> Result<(), ProcessError> {
            Err(ProcessError::Failed {
                reason: "boom".into(),
            })
        }
    }

    fn effect() -> Arc<EffectDefinition> {
        Arc::new(
            EffectDefinition::new("test", "Test")
                .with_port(PortDefinition::new("mix", RecallLevel::Audio, PortValue::Float(1.0)))
                .with_port(PortDefinition::new("gain", RecallLevel::Channel, PortValue::Float(1.0)))
                .with_port(PortDefinition::new("phase", RecallLevel::ChannelRun, PortValue::Double(0.0)))
                .with_channel_run(|| Box::new(Failing))
                .with_recycling(|| Box::new(Failing)),
        )
    }

    #[test]
    fn test_level_capabilities() {
        assert!(RecallLevel::Audio.capabilities().duplicable);
        assert!(!RecallLevel::Audio.capabilities().runs_per_buffer);
        assert!(RecallLevel::ChannelRun.capabilities().runs_per_buffer);
        assert!(RecallLevel::ChannelRun.capabilities().has_ports);
        assert!(!RecallLevel::Recycling.capabilities().has_ports);
    }

    #[test]
    fn test_fan_out_carries_level_ports() {
        let ids = IdAllocator::new();
        let audio = RecallAudio::new(ids.recall(), effect(), Direction::Output);
        assert!(audio.ports.get("mix").is_some());
        assert!(audio.ports.get("gain").is_none());

        let channel = audio.duplicate(&ids);
        assert_eq!(channel.parent(), Some(audio.id));
        assert!(channel.ports.get("gain").is_some());

        let (run, recycling) = channel.duplicate(&ids, SoundScope::Wave, RecyclingId(99));
        assert_eq!(run.base, audio.id);
        assert_eq!(run.scope(), Some(SoundScope::Wave));
        assert!(run.ports.get("phase").is_some());
        let recycling = recycling.unwrap();
        assert_eq!(recycling.recycling, RecyclingId(99));
        assert!(recycling.ports().is_empty());
    }

    #[test]
    fn test_failed_processor_latches() {
        let ids = IdAllocator::new();
        let audio = RecallAudio::new(ids.recall(), effect(), Direction::Output);
        let (mut run, _) = audio
            .duplicate(&ids)
            .duplicate(&ids, SoundScope::Playback, RecyclingId(1));

        let empty = PortSet::new();
        let ctx = RunContext {
            window: BufferWindow::first(8, 48000),
            scope: SoundScope::Playback,
            stage: RunStage::Inter,
            channel: ChannelId(1),
            line: 0,
            audio_ports: &empty,
            channel_ports: &empty,
            run_ports: &empty,
        };
        let mut signal = AudioSignal::new(SoundScope::Playback, 8, SampleFormat::F32);

        assert!(!run.slot.run(run.id, "test", &ctx, &mut signal));
        assert!(run.slot.is_failed());
        assert!(!run.slot.run(run.id, "test", &ctx, &mut signal));
    }
}
