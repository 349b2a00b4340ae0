//! Engine handle and task scheduler
//!
//! [`Engine`] is the cloneable handle shared by control callers and render
//! workers. Control callers only enqueue tasks or apply port values; render
//! workers only call [`Engine::render`]. The [`Scheduler`] owns the receiving
//! end of the task channel and applies queued tasks at a generation barrier.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use recallconf::EngineConfig;

use crate::audio::AudioSpec;
use crate::barrier::GenerationBarrier;
use crate::device::DeviceSession;
use crate::error::{PortError, StructuralError};
use crate::graph::{GraphEvent, GraphLimits, PortPath, RecallGraph};
use crate::port::{Applied, Port, PortValue};
use crate::primitives::{AudioId, ChannelId, Direction, RecallId};
use crate::recall::{EffectDefinition, EffectRegistry};
use crate::render::{RenderStats, ScopeCursor};
use crate::scope::{ScopeMap, SoundScope};
use crate::task::{ScopeTarget, Task, TaskHandle, TaskKind, TaskOutcome, TaskResult, TaskState};

/// Receives change notifications after each task reaches `done`
pub trait ChangeListener: Send + Sync {
    fn on_event(&self, event: &GraphEvent);
}

enum Envelope {
    Task(Task),
    Shutdown,
}

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) tree: RwLock<RecallGraph>,
    pub(crate) barrier: GenerationBarrier,
    pub(crate) cursors: ScopeMap<Mutex<ScopeCursor>>,
    pub(crate) stats: RenderStats,
    pub(crate) shutdown: AtomicBool,
    registry: RwLock<EffectRegistry>,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    device: RwLock<Option<Arc<dyn DeviceSession>>>,
    pulling: AtomicBool,
    next_seq: AtomicU64,
}

impl Shared {
    pub(crate) fn read_tree(&self) -> RwLockReadGuard<'_, RecallGraph> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, RecallGraph> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable control and render handle
#[derive(Clone)]
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Engine {
    /// Create an engine and the scheduler that will apply its tasks
    pub fn new(config: EngineConfig, registry: EffectRegistry) -> (Engine, Scheduler) {
        let limits = GraphLimits::from(&config);
        let shared = Arc::new(Shared {
            config,
            tree: RwLock::new(RecallGraph::new(limits)),
            barrier: GenerationBarrier::new(),
            cursors: ScopeMap::default(),
            stats: RenderStats::default(),
            shutdown: AtomicBool::new(false),
            registry: RwLock::new(registry),
            listeners: RwLock::new(Vec::new()),
            device: RwLock::new(None),
            pulling: AtomicBool::new(false),
            next_seq: AtomicU64::new(1),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        let engine = Engine {
            shared: Arc::clone(&shared),
            tx,
        };
        let scheduler = Scheduler {
            shared,
            rx,
            pending: VecDeque::new(),
            stopping: false,
        };
        (engine, scheduler)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> &RenderStats {
        &self.shared.stats
    }

    /// Current barrier generation
    pub fn generation(&self) -> u64 {
        self.shared.barrier.generation()
    }

    pub fn register_effect(&self, effect: EffectDefinition) {
        let type_id = effect.type_id.clone();
        self.shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(effect);
        debug!(effect = %type_id, "Effect registered");
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Install the device session told when rendering should start and stop
    pub fn set_device(&self, device: Arc<dyn DeviceSession>) {
        *self
            .shared
            .device
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(device);
    }

    /// Read the tree directly. Not ordered with queued tasks; use
    /// [`Engine::snapshot`] for a barrier-consistent view.
    pub fn inspect<R>(&self, f: impl FnOnce(&RecallGraph) -> R) -> R {
        f(&self.shared.read_tree())
    }

    /// Ask the scheduler thread to stop and reject further renders
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Envelope::Shutdown);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Control surface
    // -------------------------------------------------------------------------

    /// Queue a task for the scheduler
    pub fn submit(&self, kind: TaskKind) -> TaskHandle {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let (task, handle) = Task::new(seq, kind);

        debug!(
            task.seq = seq,
            task.kind = task.kind.name(),
            task.target = %task.target,
            task.state = %TaskState::Queued,
            "Task queued"
        );

        if let Err(mpsc::error::SendError(envelope)) = self.tx.send(Envelope::Task(task)) {
            if let Envelope::Task(mut task) = envelope {
                warn!(task.seq = seq, "Scheduler gone, task dropped");
                task.complete(Err(crate::error::TaskError::SchedulerGone));
            }
        }
        handle
    }

    pub fn add_audio(&self, spec: AudioSpec) -> TaskHandle {
        self.submit(TaskKind::AddAudio { spec })
    }

    pub fn remove_audio(&self, audio: AudioId) -> TaskHandle {
        self.submit(TaskKind::RemoveAudio { audio })
    }

    pub fn start(&self, target: ScopeTarget, scope: SoundScope) -> TaskHandle {
        self.submit(TaskKind::Start { target, scope })
    }

    pub fn stop(&self, target: ScopeTarget, scope: SoundScope) -> TaskHandle {
        self.submit(TaskKind::Stop { target, scope })
    }

    pub fn resize_audio_channels(&self, audio: AudioId, new_count: usize, old_count: usize) -> TaskHandle {
        self.submit(TaskKind::ResizeAudioChannels {
            audio,
            new_count,
            old_count,
        })
    }

    pub fn resize_pads(
        &self,
        audio: AudioId,
        direction: Direction,
        new_pads: usize,
        old_pads: usize,
    ) -> TaskHandle {
        self.submit(TaskKind::ResizePads {
            audio,
            direction,
            new_pads,
            old_pads,
        })
    }

    pub fn reset_link(&self, channel: ChannelId, target: Option<ChannelId>) -> TaskHandle {
        self.submit(TaskKind::ResetLink { channel, target })
    }

    pub fn attach_recall(
        &self,
        audio: AudioId,
        effect: impl Into<String>,
        target: Direction,
        depends_on: Vec<RecallId>,
    ) -> TaskHandle {
        self.submit(TaskKind::AttachRecall {
            audio,
            effect: effect.into(),
            target,
            depends_on,
        })
    }

    pub fn remove_recall(&self, audio: AudioId, recall: RecallId) -> TaskHandle {
        self.submit(TaskKind::RemoveRecall { audio, recall })
    }

    pub fn add_dependency(&self, audio: AudioId, recall: RecallId, depends_on: RecallId) -> TaskHandle {
        self.submit(TaskKind::AddDependency {
            audio,
            recall,
            depends_on,
        })
    }

    pub fn set_recall_enabled(&self, audio: AudioId, recall: RecallId, enabled: bool) -> TaskHandle {
        self.submit(TaskKind::SetRecallEnabled {
            audio,
            recall,
            enabled,
        })
    }

    pub fn apply_parameter(&self, path: PortPath, value: PortValue) -> TaskHandle {
        self.submit(TaskKind::ApplyParameter { path, value })
    }

    pub fn lookup_port(&self, path: PortPath) -> TaskHandle {
        self.submit(TaskKind::LookupPort { path })
    }

    pub fn snapshot(&self) -> TaskHandle {
        self.submit(TaskKind::Snapshot)
    }

    /// Apply a value to a port the caller already holds. Contends only with
    /// the port's own lock, never with the tree.
    pub fn apply(&self, port: &Port, value: PortValue) -> Result<Applied, PortError> {
        let applied = port.apply(value)?;
        if let Applied::Clamped { requested, stored } = applied {
            debug!(port = port.name(), requested, stored, "Port value clamped");
        }
        Ok(applied)
    }
}

/// Result of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
    /// Barrier generation the pass ran under; unchanged if nothing was queued
    pub generation: u64,
}

/// Owns the task receiver and applies tasks at the barrier
pub struct Scheduler {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    pending: VecDeque<Task>,
    /// A shutdown envelope was received; tasks queued before it still apply
    stopping: bool,
}

impl Scheduler {
    /// Apply every queued task in FIFO order under one barrier pass
    pub fn drain(&mut self) -> DrainReport {
        while !self.stopping {
            match self.rx.try_recv() {
                Ok(Envelope::Task(task)) => self.pending.push_back(task),
                Ok(Envelope::Shutdown) => self.stopping = true,
                Err(_) => break,
            }
        }
        self.apply_pending()
    }

    /// True once a shutdown request has been received
    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    fn apply_pending(&mut self) -> DrainReport {
        if self.pending.is_empty() {
            return DrainReport {
                generation: self.shared.barrier.generation(),
                ..DrainReport::default()
            };
        }

        let mut finished: Vec<(Task, TaskResult, Vec<GraphEvent>)> = Vec::with_capacity(self.pending.len());
        let active_after;
        let generation;
        {
            let guard = self.shared.barrier.begin_mutation();
            generation = guard.generation();
            let mut tree = self.shared.write_tree();
            let registry = self
                .shared
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner);

            while let Some(task) = self.pending.pop_front() {
                debug!(
                    task.seq = task.seq,
                    task.kind = task.kind.name(),
                    task.target = %task.target,
                    task.state = %TaskState::Applying,
                    generation,
                    "Task applying"
                );
                let result = apply_task(&mut tree, &registry, &task.kind);
                let events = tree.take_events();
                finished.push((task, result, events));
            }
            active_after = tree.active_scopes();
        }

        self.update_device(!active_after.is_empty());

        let mut report = DrainReport {
            generation,
            ..DrainReport::default()
        };

        let listeners = self
            .shared
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (mut task, result, events) in finished {
            let waited_ms = (Utc::now() - task.enqueued_at).num_milliseconds();
            match &result {
                Ok(_) => {
                    report.applied += 1;
                    info!(
                        task.seq = task.seq,
                        task.kind = task.kind.name(),
                        task.target = %task.target,
                        task.state = %TaskState::Done,
                        task.waited_ms = waited_ms,
                        "Task done"
                    );
                    for event in &events {
                        for listener in &listeners {
                            listener.on_event(event);
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        task.seq = task.seq,
                        task.kind = task.kind.name(),
                        task.target = %task.target,
                        task.state = %TaskState::Failed,
                        task.error = %e,
                        "Task failed"
                    );
                }
            }
            task.complete(result);
        }
        report
    }

    fn update_device(&self, any_active: bool) {
        let was = self.shared.pulling.swap(any_active, Ordering::SeqCst);
        if was == any_active {
            return;
        }
        let device = self
            .shared
            .device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(device) = device {
            if any_active {
                info!("First scope active, device start pulling");
                device.start_pulling();
            } else {
                info!("No scope active, device stop pulling");
                device.stop_pulling();
            }
        }
    }

    /// Block on the task channel and drain until shutdown
    pub fn run(mut self) {
        info!("Scheduler running");
        while !self.stopping {
            match self.rx.blocking_recv() {
                Some(Envelope::Task(task)) => {
                    self.pending.push_back(task);
                    let report = self.drain();
                    debug!(
                        applied = report.applied,
                        failed = report.failed,
                        generation = report.generation,
                        "Drain pass complete"
                    );
                }
                Some(Envelope::Shutdown) | None => self.stopping = true,
            }
        }

        // Anything still queued is rejected rather than silently lost
        self.rx.close();
        while let Ok(envelope) = self.rx.try_recv() {
            if let Envelope::Task(mut task) = envelope {
                task.complete(Err(crate::error::TaskError::SchedulerGone));
            }
        }
        self.update_device(false);
        info!("Scheduler stopped");
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("recallgraph-scheduler".into())
            .spawn(move || self.run())
    }
}

fn apply_task(tree: &mut RecallGraph, registry: &EffectRegistry, kind: &TaskKind) -> TaskResult {
    let outcome = match kind {
        TaskKind::AddAudio { spec } => TaskOutcome::AudioAdded(tree.add_audio(spec)?),
        TaskKind::RemoveAudio { audio } => {
            tree.remove_audio(*audio)?;
            TaskOutcome::Applied
        }
        TaskKind::Start { target, scope } => {
            let runs = match target {
                ScopeTarget::Audio(audio) => tree.start_audio(*audio, *scope)?,
                ScopeTarget::Channel(channel) => tree.start_channel(*channel, *scope)?,
            };
            TaskOutcome::Runs(runs)
        }
        TaskKind::Stop { target, scope } => {
            match target {
                ScopeTarget::Audio(audio) => tree.stop_audio(*audio, *scope)?,
                ScopeTarget::Channel(channel) => tree.stop_channel(*channel, *scope)?,
            };
            TaskOutcome::Applied
        }
        TaskKind::ResizeAudioChannels {
            audio,
            new_count,
            old_count,
        } => {
            tree.resize_audio_channels(*audio, *new_count, *old_count)?;
            TaskOutcome::Applied
        }
        TaskKind::ResizePads {
            audio,
            direction,
            new_pads,
            old_pads,
        } => {
            tree.resize_pads(*audio, *direction, *new_pads, *old_pads)?;
            TaskOutcome::Applied
        }
        TaskKind::ResetLink { channel, target } => {
            tree.reset_link(*channel, *target)?;
            TaskOutcome::Applied
        }
        TaskKind::AttachRecall {
            audio,
            effect,
            target,
            depends_on,
        } => {
            let definition = registry
                .get(effect)
                .ok_or_else(|| StructuralError::UnknownEffect(effect.clone()))?;
            TaskOutcome::RecallAttached(tree.attach_recall(*audio, definition, *target, depends_on)?)
        }
        TaskKind::RemoveRecall { audio, recall } => {
            tree.remove_recall(*audio, *recall)?;
            TaskOutcome::Applied
        }
        TaskKind::AddDependency {
            audio,
            recall,
            depends_on,
        } => {
            tree.add_dependency(*audio, *recall, *depends_on)?;
            TaskOutcome::Applied
        }
        TaskKind::SetRecallEnabled {
            audio,
            recall,
            enabled,
        } => {
            tree.set_recall_enabled(*audio, *recall, *enabled)?;
            TaskOutcome::Applied
        }
        TaskKind::ApplyParameter { path, value } => {
            let port = tree.port(path)?;
            match port.apply(value.clone())? {
                Applied::Stored => TaskOutcome::Applied,
                Applied::Clamped { requested, stored } => TaskOutcome::Clamped { requested, stored },
            }
        }
        TaskKind::LookupPort { path } => TaskOutcome::Port(tree.port(path)?),
        TaskKind::Snapshot => TaskOutcome::Snapshot(Box::new(tree.snapshot())),
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::port::PortDefinition;
    use crate::recall::RecallLevel;

    fn registry() -> EffectRegistry {
        let mut registry = EffectRegistry::new();
        registry.register(EffectDefinition::new("gain", "Gain").with_port(
            PortDefinition::new("volume", RecallLevel::Channel, PortValue::Float(1.0)).with_range(0.0, 2.0),
        ));
        registry
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<GraphEvent>>);

    impl ChangeListener for Recorder {
        fn on_event(&self, event: &GraphEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_tasks_apply_in_fifo_order() {
        let (engine, mut scheduler) = Engine::new(EngineConfig::default(), registry());

        let add = engine.add_audio(AudioSpec::new("a").with_channels(2));
        scheduler.drain();
        let audio = add.wait().unwrap().audio().unwrap();

        let grow = engine.resize_audio_channels(audio, 4, 2);
        let shrink = engine.resize_audio_channels(audio, 3, 4);
        let stale = engine.resize_audio_channels(audio, 1, 2);
        let report = scheduler.drain();

        assert_eq!(report.applied, 2);
        assert_eq!(report.failed, 1);
        assert!(grow.wait().is_ok());
        assert!(shrink.wait().is_ok());
        assert!(matches!(
            stale.wait(),
            Err(TaskError::Structural(StructuralError::StaleResize { .. }))
        ));
        assert_eq!(engine.inspect(|g| g.audio(audio).unwrap().outputs.len()), 3);
    }

    #[test]
    fn test_unknown_effect_fails_task() {
        let (engine, mut scheduler) = Engine::new(EngineConfig::default(), registry());
        let add = engine.add_audio(AudioSpec::new("a"));
        scheduler.drain();
        let audio = add.wait().unwrap().audio().unwrap();

        let attach = engine.attach_recall(audio, "reverb", Direction::Output, vec![]);
        scheduler.drain();
        assert_eq!(
            attach.wait().unwrap_err(),
            TaskError::Structural(StructuralError::UnknownEffect("reverb".into()))
        );
    }

    #[test]
    fn test_listeners_see_events_after_done() {
        let (engine, mut scheduler) = Engine::new(EngineConfig::default(), registry());
        let recorder = Arc::new(Recorder::default());
        engine.add_listener(recorder.clone());

        let add = engine.add_audio(AudioSpec::new("a").with_channels(1));
        scheduler.drain();
        let audio = add.wait().unwrap().audio().unwrap();
        engine.resize_audio_channels(audio, 2, 1);
        scheduler.drain();

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events[0], GraphEvent::AudioAdded { audio });
        assert_eq!(
            events[1],
            GraphEvent::ChannelCountChanged {
                audio,
                old: 1,
                new: 2
            }
        );
    }

    #[test]
    fn test_apply_parameter_clamps() {
        let (engine, mut scheduler) = Engine::new(EngineConfig::default(), registry());
        let add = engine.add_audio(AudioSpec::new("a").with_channels(1));
        scheduler.drain();
        let audio = add.wait().unwrap().audio().unwrap();
        let attach = engine.attach_recall(audio, "gain", Direction::Output, vec![]);
        scheduler.drain();
        let recall = attach.wait().unwrap().recall().unwrap();
        let channel = engine.inspect(|g| g.audio(audio).unwrap().outputs[0]);

        let path = PortPath::Channel {
            channel,
            recall,
            port: "volume".into(),
        };
        let clamp = engine.apply_parameter(path.clone(), PortValue::Float(9.0));
        let wrong = engine.apply_parameter(path.clone(), PortValue::Integer(1));
        let lookup = engine.lookup_port(path);
        scheduler.drain();

        assert!(matches!(clamp.wait(), Ok(TaskOutcome::Clamped { stored, .. }) if stored == 2.0));
        assert!(matches!(
            wrong.wait(),
            Err(TaskError::Port(PortError::TypeMismatch { .. }))
        ));
        let port = lookup.wait().unwrap().port().unwrap();
        assert_eq!(port.as_f32(), Some(2.0));

        assert_eq!(engine.apply(&port, PortValue::Float(0.5)), Ok(Applied::Stored));
        assert_eq!(port.as_f32(), Some(0.5));
    }

    #[test]
    fn test_dropped_scheduler_rejects_tasks() {
        let (engine, scheduler) = Engine::new(EngineConfig::default(), registry());
        drop(scheduler);
        let handle = engine.snapshot();
        assert!(matches!(handle.wait(), Err(TaskError::SchedulerGone)));
    }

    #[test]
    fn test_empty_drain_keeps_generation() {
        let (engine, mut scheduler) = Engine::new(EngineConfig::default(), registry());
        let before = engine.generation();
        assert_eq!(scheduler.drain().generation, before);

        engine.snapshot();
        assert_eq!(scheduler.drain().generation, before + 1);
    }

    #[test]
    fn test_shutdown_behind_queued_task_stops_run() {
        let (engine, scheduler) = Engine::new(EngineConfig::default(), registry());
        let before = engine.snapshot();
        engine.shutdown();
        let after = engine.snapshot();

        let handle = scheduler.spawn().unwrap();
        handle.join().unwrap();

        assert!(before.wait().unwrap().snapshot().is_some());
        assert!(matches!(after.wait(), Err(TaskError::SchedulerGone)));
    }

    #[test]
    fn test_drain_stops_at_shutdown() {
        let (engine, mut scheduler) = Engine::new(EngineConfig::default(), registry());
        let first = engine.snapshot();
        engine.shutdown();
        let _late = engine.snapshot();

        let report = scheduler.drain();
        assert_eq!(report.applied, 1);
        assert!(scheduler.is_stopping());
        assert!(first.wait().is_ok());
    }
}
