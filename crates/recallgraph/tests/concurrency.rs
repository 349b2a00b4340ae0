//! Render and control timelines running at the same time

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use recallconf::{DeviceConfig, EngineConfig};
use recallgraph::effects;
use recallgraph::{
    AudioBuffer, AudioSpec, BufferWindow, DeviceRole, Direction, EffectRegistry, Engine, NullDevice, RenderIo,
    RenderStatus, Sample, ScopeTarget, SoundScope,
};

fn engine() -> (Engine, recallgraph::Scheduler) {
    let mut registry = EffectRegistry::new();
    effects::register_builtin(&mut registry);
    let config = EngineConfig {
        buffer_size: 128,
        render_timeout_ms: 50,
        ..EngineConfig::default()
    };
    Engine::new(config, registry)
}

#[test]
fn test_resize_while_rendering() {
    let (engine, scheduler) = engine();
    let scheduler_thread = scheduler.spawn().unwrap();

    let spec = AudioSpec::new("synth").with_role(DeviceRole::Playback).with_channels(2);
    let audio = engine.add_audio(spec).wait().unwrap().audio().unwrap();
    engine
        .attach_recall(audio, "oscillator", Direction::Output, vec![])
        .wait()
        .unwrap();
    engine.start(ScopeTarget::Audio(audio), SoundScope::Playback).wait().unwrap();
    engine.start(ScopeTarget::Audio(audio), SoundScope::Sequencer).wait().unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let renderers: Vec<_> = [SoundScope::Playback, SoundScope::Sequencer]
        .into_iter()
        .map(|scope| {
            let engine = engine.clone();
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let mut out = AudioBuffer::new(128, 2);
                let mut window = BufferWindow::new(Sample(0), 128, 48000);
                let mut rendered = 0u64;
                while running.load(Ordering::SeqCst) {
                    out.clear();
                    let report = engine.render(scope, window, &mut RenderIo::output(&mut out));
                    match report.status {
                        RenderStatus::Rendered => rendered += 1,
                        RenderStatus::Underrun => {}
                        RenderStatus::Rejected(e) => panic!("window rejected: {}", e),
                    }
                    window = window.next();
                }
                rendered
            })
        })
        .collect();

    let mut current = 2;
    for next in [6, 1, 8, 3, 0, 4, 2] {
        engine.resize_audio_channels(audio, next, current).wait().unwrap();
        current = next;
        thread::sleep(Duration::from_millis(2));
    }

    running.store(false, Ordering::SeqCst);
    for renderer in renderers {
        assert!(renderer.join().unwrap() > 0);
    }

    engine.inspect(|g| {
        let audio = g.audio(audio).unwrap();
        assert_eq!(audio.outputs.len(), 2);
        assert_eq!(g.run_count(audio.id, SoundScope::Playback), 2);
        assert_eq!(g.run_count(audio.id, SoundScope::Sequencer), 2);
    });

    engine.shutdown();
    scheduler_thread.join().unwrap();
}

#[test]
fn test_null_device_follows_active_scopes() {
    let (engine, scheduler) = engine();
    let scheduler_thread = scheduler.spawn().unwrap();
    let (mut device, mut ring) = NullDevice::spawn(engine.clone(), &DeviceConfig::default()).unwrap();
    assert!(!device.is_pulling());

    let spec = AudioSpec::new("tone").with_role(DeviceRole::Playback).with_channels(2);
    let audio = engine.add_audio(spec).wait().unwrap().audio().unwrap();
    engine
        .attach_recall(audio, "oscillator", Direction::Output, vec![])
        .wait()
        .unwrap();
    engine.start(ScopeTarget::Audio(audio), SoundScope::Playback).wait().unwrap();
    assert!(device.is_pulling());

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut peak = 0.0f32;
    while peak == 0.0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
        peak = ring.drain_peak();
    }
    assert!(peak > 0.0);
    assert!(device.periods() > 0);

    engine.stop(ScopeTarget::Audio(audio), SoundScope::Playback).wait().unwrap();
    assert!(!device.is_pulling());

    device.stop();
    engine.shutdown();
    scheduler_thread.join().unwrap();
}
