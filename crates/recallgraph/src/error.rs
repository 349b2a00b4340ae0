//! Error taxonomy
//!
//! Control-timeline failures are returned synchronously to the caller.
//! Render-timeline failures never cross into the control timeline; they are
//! logged and counted in [`crate::render::RenderStats`].

use thiserror::Error;

use crate::port::PortKind;
use crate::primitives::{AudioId, ChannelId, Direction, RecallId};
use crate::scope::SoundScope;

/// A structural mutation could not be applied. The graph is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("audio not found: {0}")]
    AudioNotFound(AudioId),

    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("recall not found: {0}")]
    RecallNotFound(RecallId),

    #[error("unknown effect type: {0}")]
    UnknownEffect(String),

    #[error("linking {channel} to {target} would create a routing cycle")]
    CyclicLink {
        channel: ChannelId,
        target: ChannelId,
    },

    #[error("invalid resize of {what} on {audio}: expected current {expected}, got {actual}")]
    StaleResize {
        audio: AudioId,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid resize of {what} on {audio}: {requested} exceeds limit {limit}")]
    ResizeLimit {
        audio: AudioId,
        what: &'static str,
        requested: usize,
        limit: usize,
    },

    #[error("{direction} pads x lines of {audio} do not match its channel array ({expected} != {actual})")]
    ShapeMismatch {
        audio: AudioId,
        direction: Direction,
        expected: usize,
        actual: usize,
    },

    #[error("recall {recall} dependency on {depends_on} would create an execution cycle")]
    DependencyCycle {
        recall: RecallId,
        depends_on: RecallId,
    },

    #[error("scope {scope} is active on {audio}; stop it before removal")]
    ScopeActive { audio: AudioId, scope: SoundScope },
}

/// A port value could not be applied. The port is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("port {port} expects {expected:?}, got {got:?}")]
    TypeMismatch {
        port: String,
        expected: PortKind,
        got: PortKind,
    },

    #[error("port not found: {0}")]
    NotFound(String),
}

/// Render-timeline conditions. Logged and counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("scope {scope} missed its deadline at sample {offset}")]
    DeadlineMiss { scope: SoundScope, offset: u64 },

    #[error("scope {scope} received stale window at {offset}, expected >= {expected}")]
    StaleWindow {
        scope: SoundScope,
        offset: u64,
        expected: u64,
    },

    #[error("scope {scope} already has a window in flight")]
    Overlap { scope: SoundScope },

    #[error("window of {frames} frames exceeds signal capacity {capacity}")]
    WindowTooLarge { frames: usize, capacity: usize },

    #[error("engine is shutting down")]
    Shutdown,
}

/// Failure reported to the caller that enqueued a task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("scheduler is gone; task was never applied")]
    SchedulerGone,
}
