//! Per-scope render traversal
//!
//! One call renders one buffer window for one scope. The walk is depth-first
//! over audios in render order, then channels (inputs before outputs). Each
//! channel is finished, all three stages, before the walk moves on, so a
//! channel reading a link sees the upstream channel's completed window.
//!
//! Render never blocks on control work for longer than the configured
//! timeout, never allocates signal buffers, and never returns an error across
//! the render/control boundary: problems become a [`RenderStatus`] plus a log
//! line and a counter in [`RenderStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::TryLockError;
use std::time::{Duration, Instant};

use portable_atomic::AtomicF32;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::channel::ChannelRunSet;
use crate::error::RenderError;
use crate::graph::RecallGraph;
use crate::port::PortSet;
use crate::primitives::{AudioBuffer, BufferWindow, DeviceRole, Direction, Sample};
use crate::recall::{RunContext, RunStage};
use crate::scheduler::Engine;
use crate::scope::{ScheduledChannel, ScopeDispatcher, SoundScope};

static EMPTY_PORTS: PortSet = PortSet::new();

/// Position of one scope's render timeline
#[derive(Debug, Default)]
pub struct ScopeCursor {
    next: Option<Sample>,
    windows: u64,
}

impl ScopeCursor {
    /// Offset the next window is expected to start at
    pub fn next(&self) -> Option<Sample> {
        self.next
    }

    pub fn windows(&self) -> u64 {
        self.windows
    }

    fn advance(&mut self, window: &BufferWindow) {
        self.next = Some(window.end());
        self.windows += 1;
    }
}

/// Device buffers for one window
#[derive(Debug, Default)]
pub struct RenderIo<'a> {
    /// Interleaved samples written into capture-role input channels
    pub input: Option<&'a AudioBuffer>,
    /// Playback-role output channels are added into this buffer
    pub output: Option<&'a mut AudioBuffer>,
}

impl<'a> RenderIo<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn output(output: &'a mut AudioBuffer) -> Self {
        Self {
            input: None,
            output: Some(output),
        }
    }

    pub fn duplex(input: &'a AudioBuffer, output: &'a mut AudioBuffer) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderStatus {
    Rendered,
    /// The barrier stayed closed past the timeout; output left untouched
    Underrun,
    Rejected(RenderError),
}

#[derive(Debug, Clone)]
pub struct RenderReport {
    pub scope: SoundScope,
    pub window: BufferWindow,
    pub status: RenderStatus,
    /// Channels visited
    pub channels: usize,
    /// Run recalls executed across all stages
    pub runs: usize,
    pub elapsed: Duration,
    pub deadline_missed: bool,
    /// Barrier generation the window rendered under
    pub generation: u64,
}

impl RenderReport {
    fn new(scope: SoundScope, window: BufferWindow, status: RenderStatus) -> Self {
        Self {
            scope,
            window,
            status,
            channels: 0,
            runs: 0,
            elapsed: Duration::ZERO,
            deadline_missed: false,
            generation: 0,
        }
    }

    pub fn is_rendered(&self) -> bool {
        self.status == RenderStatus::Rendered
    }
}

/// Render counters shared by every scope
#[derive(Debug, Default)]
pub struct RenderStats {
    windows: AtomicU64,
    underruns: AtomicU64,
    deadline_misses: AtomicU64,
    rejected: AtomicU64,
    /// Last window's wall time over its duration
    load: AtomicF32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RenderStatsSnapshot {
    pub windows: u64,
    pub underruns: u64,
    pub deadline_misses: u64,
    pub rejected: u64,
    pub load: f32,
}

impl RenderStats {
    pub fn windows(&self) -> u64 {
        self.windows.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn deadline_misses(&self) -> u64 {
        self.deadline_misses.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn load(&self) -> f32 {
        self.load.load(Ordering::Relaxed)
    }

    /// Count an underrun reported by the device side
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            windows: self.windows(),
            underruns: self.underruns(),
            deadline_misses: self.deadline_misses(),
            rejected: self.rejected(),
            load: self.load(),
        }
    }
}

#[derive(Debug, Default)]
struct WalkTotals {
    channels: usize,
    runs: usize,
}

impl Engine {
    /// Render one buffer window for `scope`.
    ///
    /// Windows for a scope must arrive in increasing offset order; a window
    /// starting before the previous one ended is rejected. A window starting
    /// after a gap resets processor run state before rendering.
    pub fn render(&self, scope: SoundScope, window: BufferWindow, io: &mut RenderIo<'_>) -> RenderReport {
        let shared = &self.shared;

        if shared.shutdown.load(Ordering::SeqCst) {
            return self.reject(scope, window, RenderError::Shutdown);
        }

        let mut cursor = match shared.cursors.get(scope).try_lock() {
            Ok(cursor) => cursor,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return self.reject(scope, window, RenderError::Overlap { scope });
            }
        };

        let mut discontinuity = false;
        if let Some(expected) = cursor.next {
            if window.offset < expected {
                return self.reject(
                    scope,
                    window,
                    RenderError::StaleWindow {
                        scope,
                        offset: window.offset.0,
                        expected: expected.0,
                    },
                );
            }
            discontinuity = window.offset > expected;
        }

        let capacity = shared.config.buffer_size;
        if window.frames > capacity {
            return self.reject(
                scope,
                window,
                RenderError::WindowTooLarge {
                    frames: window.frames,
                    capacity,
                },
            );
        }

        let started = Instant::now();
        let timeout = Duration::from_millis(shared.config.render_timeout_ms);
        let Some(guard) = shared.barrier.enter_window(timeout) else {
            shared.stats.underruns.fetch_add(1, Ordering::Relaxed);
            warn!(
                %scope,
                offset = window.offset.0,
                timeout_ms = shared.config.render_timeout_ms,
                "Barrier held past timeout, window dropped"
            );
            cursor.advance(&window);
            return RenderReport::new(scope, window, RenderStatus::Underrun);
        };

        if discontinuity {
            debug!(%scope, offset = window.offset.0, "Window gap, resetting run state");
        }

        let totals = {
            let tree = shared.read_tree();
            let totals = walk(&tree, scope, &window, io.input, discontinuity);
            if let Some(output) = io.output.as_deref_mut() {
                deliver(&tree, scope, output);
            }
            totals
        };
        let generation = guard.generation();
        drop(guard);

        let elapsed = started.elapsed();
        let period = window.duration();
        let deadline_missed = elapsed > period;
        if deadline_missed {
            shared.stats.deadline_misses.fetch_add(1, Ordering::Relaxed);
            warn!(
                error = %RenderError::DeadlineMiss { scope, offset: window.offset.0 },
                elapsed_us = elapsed.as_micros() as u64,
                period_us = period.as_micros() as u64,
                "Render deadline missed"
            );
        }
        if !period.is_zero() {
            shared
                .stats
                .load
                .store(elapsed.as_secs_f32() / period.as_secs_f32(), Ordering::Relaxed);
        }
        shared.stats.windows.fetch_add(1, Ordering::Relaxed);
        cursor.advance(&window);

        trace!(
            %scope,
            offset = window.offset.0,
            channels = totals.channels,
            runs = totals.runs,
            generation,
            "Window rendered"
        );

        RenderReport {
            scope,
            window,
            status: RenderStatus::Rendered,
            channels: totals.channels,
            runs: totals.runs,
            elapsed,
            deadline_missed,
            generation,
        }
    }

    /// Expected offset of the next window for `scope`, if any has rendered
    pub fn next_offset(&self, scope: SoundScope) -> Option<Sample> {
        self.shared
            .cursors
            .get(scope)
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .next()
    }

    fn reject(&self, scope: SoundScope, window: BufferWindow, error: RenderError) -> RenderReport {
        self.shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(%scope, offset = window.offset.0, %error, "Window rejected");
        RenderReport::new(scope, window, RenderStatus::Rejected(error))
    }
}

fn walk(
    tree: &RecallGraph,
    scope: SoundScope,
    window: &BufferWindow,
    input: Option<&AudioBuffer>,
    discontinuity: bool,
) -> WalkTotals {
    let mut totals = WalkTotals::default();

    for ScheduledChannel { audio, channel, index } in ScopeDispatcher::channels(tree, scope) {
        let Some(mut signal) = channel.recycling.signal(scope) else {
            continue;
        };
        signal.begin(window);
        totals.channels += 1;

        if channel.direction == Direction::Input && audio.role == DeviceRole::Capture {
            if let Some(input) = input.filter(|b| b.channels > 0) {
                input.read_channel(index % input.channels as usize, signal.data_mut());
            }
        }

        // A source later in the walk still holds its previous window,
        // so feedback links read one window late.
        if let Some(source) = channel
            .link
            .filter(|id| *id != channel.id)
            .and_then(|id| tree.channel(id))
        {
            if let Some(upstream) = source.recycling.signal(scope) {
                signal.mix_from(upstream.data());
            }
        }

        let mut runs = channel.runs(scope);
        if discontinuity {
            runs.reset();
        }
        let ChannelRunSet {
            channel_runs,
            recycling_runs,
        } = &mut *runs;

        for stage in RunStage::ALL {
            for run in channel_runs.iter_mut() {
                if run.behaviour.bypass {
                    continue;
                }
                let ctx = RunContext {
                    window: *window,
                    scope,
                    stage,
                    channel: channel.id,
                    line: channel.line,
                    audio_ports: audio.recall(run.base).map_or(&EMPTY_PORTS, |r| &r.ports),
                    channel_ports: channel.recall(run.base).map_or(&EMPTY_PORTS, |r| &r.ports),
                    run_ports: &run.ports,
                };
                if run.slot.run(run.id, &run.effect.type_id, &ctx, &mut signal) {
                    totals.runs += 1;
                }
            }

            for run in recycling_runs.iter_mut() {
                if run.behaviour.bypass {
                    continue;
                }
                let ctx = RunContext {
                    window: *window,
                    scope,
                    stage,
                    channel: channel.id,
                    line: channel.line,
                    audio_ports: audio.recall(run.base).map_or(&EMPTY_PORTS, |r| &r.ports),
                    channel_ports: channel.recall(run.base).map_or(&EMPTY_PORTS, |r| &r.ports),
                    run_ports: channel_runs
                        .iter()
                        .find(|r| r.base == run.base)
                        .map_or(&EMPTY_PORTS, |r| &r.ports),
                };
                if run.slot.run(run.id, &run.effect.type_id, &ctx, &mut signal) {
                    totals.runs += 1;
                }
            }
        }
    }

    totals
}

/// Add every playback-role output channel into the device buffer
fn deliver(tree: &RecallGraph, scope: SoundScope, output: &mut AudioBuffer) {
    if output.channels == 0 {
        return;
    }
    let stride = output.channels as usize;
    for &audio_id in tree.render_order() {
        let Some(audio) = tree.audio(audio_id) else {
            continue;
        };
        if audio.role != DeviceRole::Playback {
            continue;
        }
        for (index, &channel_id) in audio.outputs.iter().enumerate() {
            let Some(signal) = tree
                .channel(channel_id)
                .and_then(|ch| ch.recycling.signal(scope))
            else {
                continue;
            };
            output.mix_channel(index % stride, signal.data());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    use recallconf::EngineConfig;

    use super::*;
    use crate::audio::AudioSpec;
    use crate::port::{PortDefinition, PortValue};
    use crate::primitives::AudioId;
    use crate::recall::{
        BoxedProcessor, EffectDefinition, EffectRegistry, ProcessError, Processor, RecallLevel,
    };
    use crate::recycling::AudioSignal;
    use crate::scheduler::Scheduler;
    use crate::task::ScopeTarget;

    struct Fill;

    impl Processor for Fill {
        fn run(&mut self, stage: RunStage, ctx: &RunContext<'_>, signal: &mut AudioSignal) -> Result<(), ProcessError> {
            if stage == RunStage::Inter {
                let level = ctx.param("level", 0.0);
                signal.data_mut().fill(level);
            }
            Ok(())
        }
    }

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<(RunStage, &'static str)>>>,
    }

    impl Processor for Tag {
        fn run(&mut self, stage: RunStage, _ctx: &RunContext<'_>, _signal: &mut AudioSignal) -> Result<(), ProcessError> {
            self.log.lock().unwrap().push((stage, self.name));
            Ok(())
        }
    }

    struct Broken {
        calls: Arc<AtomicUsize>,
    }

    impl Processor for Broken {
        fn run(&mut self, _stage: RunStage, _ctx: &RunContext<'_>, _signal: &mut AudioSignal) -> Result<(), ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProcessError::Failed {
                reason: "plugin crashed".into(),
            })
        }
    }

    struct Resettable {
        resets: Arc<AtomicUsize>,
    }

    impl Processor for Resettable {
        fn run(&mut self, _stage: RunStage, _ctx: &RunContext<'_>, _signal: &mut AudioSignal) -> Result<(), ProcessError> {
            Ok(())
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fill_effect() -> EffectDefinition {
        EffectDefinition::new("fill", "Fill")
            .with_port(PortDefinition::new("level", RecallLevel::Channel, PortValue::Float(0.25)))
            .with_channel_run(|| Box::new(Fill) as BoxedProcessor)
    }

    fn engine_with(effects: Vec<EffectDefinition>) -> (Engine, Scheduler) {
        let mut registry = EffectRegistry::new();
        for effect in effects {
            registry.register(effect);
        }
        let config = EngineConfig {
            buffer_size: 64,
            ..EngineConfig::default()
        };
        Engine::new(config, registry)
    }

    fn add_audio(engine: &Engine, scheduler: &mut Scheduler, spec: AudioSpec) -> AudioId {
        let handle = engine.add_audio(spec);
        scheduler.drain();
        handle.wait().unwrap().audio().unwrap()
    }

    fn window(offset: u64) -> BufferWindow {
        BufferWindow::new(Sample(offset), 64, 48000)
    }

    #[test]
    fn test_playback_output_delivered() {
        let (engine, mut scheduler) = engine_with(vec![fill_effect()]);
        let spec = AudioSpec::new("synth")
            .with_role(DeviceRole::Playback)
            .with_channels(2);
        let audio = add_audio(&engine, &mut scheduler, spec);
        engine.attach_recall(audio, "fill", Direction::Output, vec![]);
        engine.start(ScopeTarget::Audio(audio), SoundScope::Playback);
        scheduler.drain();

        let mut out = AudioBuffer::new(64, 2);
        let report = engine.render(SoundScope::Playback, window(0), &mut RenderIo::output(&mut out));

        assert!(report.is_rendered());
        assert_eq!(report.channels, 4);
        assert!(out.samples.iter().all(|s| (*s - 0.25).abs() < 1e-6));
        assert_eq!(engine.stats().windows(), 1);
    }

    #[test]
    fn test_inactive_scope_renders_nothing() {
        let (engine, mut scheduler) = engine_with(vec![fill_effect()]);
        let audio = add_audio(
            &engine,
            &mut scheduler,
            AudioSpec::new("synth").with_role(DeviceRole::Playback),
        );
        engine.attach_recall(audio, "fill", Direction::Output, vec![]);
        engine.start(ScopeTarget::Audio(audio), SoundScope::Playback);
        scheduler.drain();

        let mut out = AudioBuffer::new(64, 2);
        let report = engine.render(SoundScope::Wave, window(0), &mut RenderIo::output(&mut out));
        assert_eq!(report.channels, 0);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn test_stages_follow_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tag = |name: &'static str| {
            let log = Arc::clone(&log);
            EffectDefinition::new(name, name).with_channel_run(move || {
                Box::new(Tag {
                    name,
                    log: Arc::clone(&log),
                }) as BoxedProcessor
            })
        };
        let (engine, mut scheduler) = engine_with(vec![tag("a"), tag("b")]);
        let audio = add_audio(&engine, &mut scheduler, AudioSpec::new("x").with_channels(1));

        let b = engine.attach_recall(audio, "b", Direction::Output, vec![]);
        let a = engine.attach_recall(audio, "a", Direction::Output, vec![]);
        scheduler.drain();
        let b = b.wait().unwrap().recall().unwrap();
        let a = a.wait().unwrap().recall().unwrap();
        engine.add_dependency(audio, b, a);
        engine.start(ScopeTarget::Audio(audio), SoundScope::Sequencer);
        scheduler.drain();

        engine.render(SoundScope::Sequencer, window(0), &mut RenderIo::none());

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                (RunStage::Pre, "a"),
                (RunStage::Pre, "b"),
                (RunStage::Inter, "a"),
                (RunStage::Inter, "b"),
                (RunStage::Post, "a"),
                (RunStage::Post, "b"),
            ]
        );
    }

    #[test]
    fn test_link_reads_upstream_window() {
        let (engine, mut scheduler) = engine_with(vec![fill_effect()]);
        let source = add_audio(&engine, &mut scheduler, AudioSpec::new("source").with_channels(1));
        let sink = add_audio(
            &engine,
            &mut scheduler,
            AudioSpec::new("sink")
                .with_role(DeviceRole::Playback)
                .with_channels(1),
        );
        engine.attach_recall(source, "fill", Direction::Output, vec![]);
        let (from, to) = engine.inspect(|g| (g.audio(source).unwrap().outputs[0], g.audio(sink).unwrap().outputs[0]));
        engine.reset_link(to, Some(from));
        engine.start(ScopeTarget::Audio(source), SoundScope::Playback);
        engine.start(ScopeTarget::Audio(sink), SoundScope::Playback);
        scheduler.drain();

        assert_eq!(engine.inspect(|g| g.render_order().to_vec()), vec![source, sink]);

        let mut out = AudioBuffer::new(64, 1);
        engine.render(SoundScope::Playback, window(0), &mut RenderIo::output(&mut out));
        assert!(out.samples.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_feedback_link_reads_previous_window() {
        let (engine, mut scheduler) = engine_with(vec![fill_effect()]);
        let audio = add_audio(&engine, &mut scheduler, AudioSpec::new("loop").with_channels(1));
        engine.attach_recall(audio, "fill", Direction::Output, vec![]);
        let (input, output) = engine.inspect(|g| {
            let a = g.audio(audio).unwrap();
            (a.inputs[0], a.outputs[0])
        });
        // the input renders before the output it reads
        engine.reset_link(input, Some(output));
        engine.start(ScopeTarget::Audio(audio), SoundScope::Sequencer);
        scheduler.drain();

        let input_peak = |engine: &Engine| {
            engine.inspect(|g| {
                g.channel(input)
                    .unwrap()
                    .recycling
                    .signal(SoundScope::Sequencer)
                    .unwrap()
                    .peak()
            })
        };

        engine.render(SoundScope::Sequencer, window(0), &mut RenderIo::none());
        assert_eq!(input_peak(&engine), 0.0);

        engine.render(SoundScope::Sequencer, window(64), &mut RenderIo::none());
        assert!((input_peak(&engine) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_capture_input_written() {
        let (engine, mut scheduler) = engine_with(vec![]);
        let audio = add_audio(
            &engine,
            &mut scheduler,
            AudioSpec::new("mic")
                .with_role(DeviceRole::Capture)
                .with_channels(2),
        );
        engine.start(ScopeTarget::Audio(audio), SoundScope::Wave);
        scheduler.drain();

        let mut input = AudioBuffer::new(64, 2);
        for frame in 0..64 {
            input.samples[frame * 2] = 0.1;
            input.samples[frame * 2 + 1] = 0.2;
        }
        let mut out = AudioBuffer::new(64, 2);
        engine.render(SoundScope::Wave, window(0), &mut RenderIo::duplex(&input, &mut out));

        let peaks = engine.inspect(|g| {
            g.audio(audio)
                .unwrap()
                .inputs
                .iter()
                .map(|id| g.channel(*id).unwrap().recycling.signal(SoundScope::Wave).unwrap().peak())
                .collect::<Vec<_>>()
        });
        assert_eq!(peaks, vec![0.1, 0.2]);
        // capture audios are not delivered to the device
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn test_stale_and_oversized_windows_rejected() {
        let (engine, _scheduler) = engine_with(vec![]);

        let first = engine.render(SoundScope::Playback, window(64), &mut RenderIo::none());
        assert!(first.is_rendered());
        assert_eq!(engine.next_offset(SoundScope::Playback), Some(Sample(128)));

        let stale = engine.render(SoundScope::Playback, window(64), &mut RenderIo::none());
        assert_eq!(
            stale.status,
            RenderStatus::Rejected(RenderError::StaleWindow {
                scope: SoundScope::Playback,
                offset: 64,
                expected: 128,
            })
        );

        let big = BufferWindow::new(Sample(128), 65, 48000);
        let report = engine.render(SoundScope::Playback, big, &mut RenderIo::none());
        assert!(matches!(
            report.status,
            RenderStatus::Rejected(RenderError::WindowTooLarge { frames: 65, capacity: 64 })
        ));
        assert_eq!(engine.stats().rejected(), 2);

        // other scopes keep their own timeline
        assert!(engine.render(SoundScope::Midi, window(0), &mut RenderIo::none()).is_rendered());
    }

    #[test]
    fn test_barrier_timeout_is_underrun() {
        let (engine, _scheduler) = engine_with(vec![]);
        let _mutation = engine.shared.barrier.begin_mutation();

        let mut out = AudioBuffer::new(64, 2);
        out.samples.fill(0.5);
        let report = engine.render(SoundScope::Playback, window(0), &mut RenderIo::output(&mut out));

        assert_eq!(report.status, RenderStatus::Underrun);
        assert_eq!(engine.stats().underruns(), 1);
        assert_eq!(engine.next_offset(SoundScope::Playback), Some(Sample(64)));
        assert!(out.samples.iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_failed_processor_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let effect = {
            let calls = Arc::clone(&calls);
            EffectDefinition::new("broken", "Broken").with_channel_run(move || {
                Box::new(Broken {
                    calls: Arc::clone(&calls),
                }) as BoxedProcessor
            })
        };
        let (engine, mut scheduler) = engine_with(vec![effect, fill_effect()]);
        let audio = add_audio(
            &engine,
            &mut scheduler,
            AudioSpec::new("x")
                .with_role(DeviceRole::Playback)
                .with_channels(1),
        );
        engine.attach_recall(audio, "broken", Direction::Output, vec![]);
        engine.attach_recall(audio, "fill", Direction::Output, vec![]);
        engine.start(ScopeTarget::Audio(audio), SoundScope::Playback);
        scheduler.drain();

        let mut out = AudioBuffer::new(64, 1);
        for n in 0..3 {
            out.clear();
            let report = engine.render(SoundScope::Playback, window(n * 64), &mut RenderIo::output(&mut out));
            assert!(report.is_rendered());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // the healthy recall keeps producing
        assert!((out.peak() - 0.25).abs() < 1e-6);

        let snapshot = engine.snapshot();
        scheduler.drain();
        let snapshot = snapshot.wait().unwrap().snapshot().unwrap();
        let output = snapshot
            .audio(audio)
            .unwrap()
            .channels
            .iter()
            .find(|c| c.direction == Direction::Output)
            .unwrap();
        assert_eq!(output.runs.iter().filter(|r| r.failed).count(), 1);
    }

    #[test]
    fn test_gap_resets_run_state() {
        let resets = Arc::new(AtomicUsize::new(0));
        let effect = {
            let resets = Arc::clone(&resets);
            EffectDefinition::new("stateful", "Stateful").with_channel_run(move || {
                Box::new(Resettable {
                    resets: Arc::clone(&resets),
                }) as BoxedProcessor
            })
        };
        let (engine, mut scheduler) = engine_with(vec![effect]);
        let audio = add_audio(&engine, &mut scheduler, AudioSpec::new("x").with_channels(1));
        engine.attach_recall(audio, "stateful", Direction::Output, vec![]);
        engine.start(ScopeTarget::Audio(audio), SoundScope::Notation);
        scheduler.drain();

        engine.render(SoundScope::Notation, window(0), &mut RenderIo::none());
        engine.render(SoundScope::Notation, window(64), &mut RenderIo::none());
        assert_eq!(resets.load(Ordering::SeqCst), 0);

        engine.render(SoundScope::Notation, window(1024), &mut RenderIo::none());
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_render_after_shutdown_rejected() {
        let (engine, _scheduler) = engine_with(vec![]);
        engine.shutdown();
        let report = engine.render(SoundScope::Playback, window(0), &mut RenderIo::none());
        assert_eq!(report.status, RenderStatus::Rejected(RenderError::Shutdown));
    }
}
