//! Recallgraph: per-scope recall processing graph
//!
//! A multi-track sequencer core. Audios own channels, channels own a
//! recycling of per-scope signal buffers, and effects are attached as
//! recalls that fan out down the tree:
//!
//! - **RecallAudio**: the effect as attached to an audio, holding audio-level ports
//! - **RecallChannel**: one per channel, holding channel-level ports
//! - **RecallChannelRun**: one per channel per active scope, holding run ports and state
//! - **RecallRecycling**: one per recycling per active scope, processing buffers
//!
//! Two timelines share the tree. Control callers enqueue [`task::Task`]s that
//! the [`Scheduler`] applies at a generation barrier, and call
//! [`Engine::apply`] on ports. Render workers call [`Engine::render`] once per
//! buffer window per sound scope.

pub mod audio;
pub mod barrier;
pub mod channel;
pub mod device;
pub mod effects;
pub mod error;
pub mod graph;
pub mod plugin;
pub mod port;
pub mod primitives;
pub mod recall;
pub mod recycling;
pub mod render;
pub mod scheduler;
pub mod scope;
pub mod task;

pub use audio::{Audio, AudioSpec};
pub use barrier::{GenerationBarrier, MutationGuard, WindowGuard};
pub use channel::{Channel, ChannelRunSet};
pub use device::{audio_ring, AudioRingConsumer, AudioRingProducer, DeviceError, DeviceSession, NullDevice};
pub use error::{PortError, RenderError, StructuralError, TaskError};
pub use graph::{
    AudioSnapshot, ChannelSnapshot, GraphEvent, GraphLimits, GraphSnapshot, PortPath, PortSnapshot,
    RecallGraph, RecallSnapshot, RunSnapshot,
};
pub use plugin::{plugin_effect, PluginInstance, PluginProcessor};
pub use port::{Applied, Port, PortDefinition, PortKind, PortRange, PortSet, PortValue};
pub use primitives::*;
pub use recall::{
    Behaviour, BoxedProcessor, Capabilities, DependencyOrder, EffectDefinition, EffectRegistry,
    ProcessError, Processor, ProcessorFactory, Recall, RecallAudio, RecallChannel, RecallChannelRun,
    RecallLevel, RecallRecycling, RunContext, RunStage,
};
pub use recycling::{AudioSignal, Recycling};
pub use render::{RenderIo, RenderReport, RenderStats, RenderStatsSnapshot, RenderStatus, ScopeCursor};
pub use scheduler::{ChangeListener, DrainReport, Engine, Scheduler};
pub use scope::{RunSet, ScheduledChannel, ScopeDispatcher, ScopeMap, ScopeSet, SoundScope};
pub use task::{ScopeTarget, Task, TaskHandle, TaskKind, TaskOutcome, TaskResult, TaskState, TaskTarget};
