//! Queued structural mutations
//!
//! A task is built by a control-side caller, sent over the task channel, and
//! applied exactly once by the scheduler at a generation barrier. The caller
//! keeps a [`TaskHandle`] to collect the outcome.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::audio::AudioSpec;
use crate::error::TaskError;
use crate::graph::{GraphSnapshot, PortPath};
use crate::port::{Port, PortValue};
use crate::primitives::{AudioId, ChannelId, Direction, RecallId};
use crate::scope::SoundScope;

/// Node a scope transition applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTarget {
    Audio(AudioId),
    Channel(ChannelId),
}

/// Mutation requested by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    AddAudio {
        spec: AudioSpec,
    },
    RemoveAudio {
        audio: AudioId,
    },
    Start {
        target: ScopeTarget,
        scope: SoundScope,
    },
    Stop {
        target: ScopeTarget,
        scope: SoundScope,
    },
    ResizeAudioChannels {
        audio: AudioId,
        new_count: usize,
        old_count: usize,
    },
    ResizePads {
        audio: AudioId,
        direction: Direction,
        new_pads: usize,
        old_pads: usize,
    },
    ResetLink {
        channel: ChannelId,
        target: Option<ChannelId>,
    },
    AttachRecall {
        audio: AudioId,
        effect: String,
        target: Direction,
        #[serde(default)]
        depends_on: Vec<RecallId>,
    },
    RemoveRecall {
        audio: AudioId,
        recall: RecallId,
    },
    AddDependency {
        audio: AudioId,
        recall: RecallId,
        depends_on: RecallId,
    },
    SetRecallEnabled {
        audio: AudioId,
        recall: RecallId,
        enabled: bool,
    },
    ApplyParameter {
        path: PortPath,
        value: PortValue,
    },
    /// Read-only: resolve a port at a barrier
    LookupPort {
        path: PortPath,
    },
    /// Read-only: capture the whole tree at a barrier
    Snapshot,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::AddAudio { .. } => "add_audio",
            TaskKind::RemoveAudio { .. } => "remove_audio",
            TaskKind::Start { .. } => "start",
            TaskKind::Stop { .. } => "stop",
            TaskKind::ResizeAudioChannels { .. } => "resize_audio_channels",
            TaskKind::ResizePads { .. } => "resize_pads",
            TaskKind::ResetLink { .. } => "reset_link",
            TaskKind::AttachRecall { .. } => "attach_recall",
            TaskKind::RemoveRecall { .. } => "remove_recall",
            TaskKind::AddDependency { .. } => "add_dependency",
            TaskKind::SetRecallEnabled { .. } => "set_recall_enabled",
            TaskKind::ApplyParameter { .. } => "apply_parameter",
            TaskKind::LookupPort { .. } => "lookup_port",
            TaskKind::Snapshot => "snapshot",
        }
    }

    /// Entity the task mutates, for ordering and logging
    pub fn target(&self) -> TaskTarget {
        match self {
            TaskKind::AddAudio { .. } | TaskKind::Snapshot => TaskTarget::Graph,
            TaskKind::RemoveAudio { audio }
            | TaskKind::ResizeAudioChannels { audio, .. }
            | TaskKind::ResizePads { audio, .. }
            | TaskKind::AttachRecall { audio, .. }
            | TaskKind::RemoveRecall { audio, .. }
            | TaskKind::AddDependency { audio, .. }
            | TaskKind::SetRecallEnabled { audio, .. } => TaskTarget::Audio(*audio),
            TaskKind::Start { target, .. } | TaskKind::Stop { target, .. } => match target {
                ScopeTarget::Audio(audio) => TaskTarget::Audio(*audio),
                ScopeTarget::Channel(channel) => TaskTarget::Channel(*channel),
            },
            TaskKind::ResetLink { channel, .. } => TaskTarget::Channel(*channel),
            TaskKind::ApplyParameter { path, .. } | TaskKind::LookupPort { path } => match path {
                PortPath::Audio { audio, .. } => TaskTarget::Audio(*audio),
                PortPath::Channel { channel, .. } | PortPath::Run { channel, .. } => {
                    TaskTarget::Channel(*channel)
                }
            },
        }
    }

    /// Read-only tasks still run at the barrier but never change the tree
    pub fn is_read_only(&self) -> bool {
        matches!(self, TaskKind::LookupPort { .. } | TaskKind::Snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTarget {
    Graph,
    Audio(AudioId),
    Channel(ChannelId),
}

impl fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskTarget::Graph => f.write_str("graph"),
            TaskTarget::Audio(id) => write!(f, "audio:{}", id),
            TaskTarget::Channel(id) => write!(f, "channel:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::Applying => "applying",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a task produced
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Applied,
    AudioAdded(AudioId),
    RecallAttached(RecallId),
    /// Run-level recalls covering the scope after a start
    Runs(usize),
    Clamped { requested: f64, stored: f64 },
    Port(Arc<Port>),
    Snapshot(Box<GraphSnapshot>),
}

impl TaskOutcome {
    pub fn audio(&self) -> Option<AudioId> {
        match self {
            TaskOutcome::AudioAdded(id) => Some(*id),
            _ => None,
        }
    }

    pub fn recall(&self) -> Option<RecallId> {
        match self {
            TaskOutcome::RecallAttached(id) => Some(*id),
            _ => None,
        }
    }

    pub fn port(self) -> Option<Arc<Port>> {
        match self {
            TaskOutcome::Port(port) => Some(port),
            _ => None,
        }
    }

    pub fn snapshot(self) -> Option<GraphSnapshot> {
        match self {
            TaskOutcome::Snapshot(snapshot) => Some(*snapshot),
            _ => None,
        }
    }
}

pub type TaskResult = Result<TaskOutcome, TaskError>;

/// A queued mutation
#[derive(Debug)]
pub struct Task {
    pub seq: u64,
    pub target: TaskTarget,
    pub kind: TaskKind,
    pub enqueued_at: DateTime<Utc>,
    pub(crate) reply: Option<oneshot::Sender<TaskResult>>,
}

impl Task {
    pub fn new(seq: u64, kind: TaskKind) -> (Self, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        let task = Self {
            seq,
            target: kind.target(),
            kind,
            enqueued_at: Utc::now(),
            reply: Some(tx),
        };
        (task, TaskHandle { seq, rx })
    }

    /// Deliver the outcome to the enqueuing caller, if it is still listening
    pub(crate) fn complete(&mut self, result: TaskResult) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

/// Caller's end of a queued task
#[derive(Debug)]
pub struct TaskHandle {
    seq: u64,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Block until the task is applied. Must not be called from async context.
    pub fn wait(self) -> TaskResult {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(TaskError::SchedulerGone))
    }

    pub async fn outcome(self) -> TaskResult {
        self.rx.await.unwrap_or(Err(TaskError::SchedulerGone))
    }

    /// Outcome if the task has already been applied
    pub fn try_outcome(&mut self) -> Option<TaskResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TaskError::SchedulerGone)),
        }
    }
}
