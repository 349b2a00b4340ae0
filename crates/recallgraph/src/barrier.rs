//! Generation barrier between render windows and structural mutation
//!
//! Render workers enter the barrier at the start of every buffer window and
//! leave it when the window completes. The scheduler bumps the generation,
//! stops new windows from entering, waits for in-flight windows to drain, and
//! only then mutates the tree. Render waits at most its configured timeout;
//! after that it gives up on the window rather than block on control work.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BarrierState {
    generation: u64,
    in_flight: usize,
    mutating: bool,
}

#[derive(Debug, Default)]
pub struct GenerationBarrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl GenerationBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Register a render window. Returns `None` if a mutation held the
    /// barrier for longer than `timeout`.
    pub fn enter_window(&self, timeout: Duration) -> Option<WindowGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        while state.mutating {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }

        state.in_flight += 1;
        Some(WindowGuard {
            barrier: self,
            generation: state.generation,
        })
    }

    /// Bump the generation and wait until no window is in flight.
    /// New windows stay out until the returned guard is dropped.
    pub fn begin_mutation(&self) -> MutationGuard<'_> {
        let mut state = self.lock();
        while state.mutating {
            state = self.wait(state);
        }

        state.mutating = true;
        state.generation += 1;
        let generation = state.generation;

        while state.in_flight > 0 {
            state = self.wait(state);
        }

        MutationGuard {
            barrier: self,
            generation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, BarrierState>) -> MutexGuard<'a, BarrierState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-flight render window
#[derive(Debug)]
pub struct WindowGuard<'a> {
    barrier: &'a GenerationBarrier,
    generation: u64,
}

impl WindowGuard<'_> {
    /// Generation observed when the window entered
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for WindowGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.barrier.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.barrier.cond.notify_all();
        }
    }
}

/// Exclusive structural access; windows resume when dropped
#[derive(Debug)]
pub struct MutationGuard<'a> {
    barrier: &'a GenerationBarrier,
    generation: u64,
}

impl MutationGuard<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.barrier.lock();
        state.mutating = false;
        self.barrier.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_windows_see_generation() {
        let barrier = GenerationBarrier::new();
        let w = barrier.enter_window(Duration::from_millis(1)).unwrap();
        assert_eq!(w.generation(), 0);
        assert_eq!(barrier.in_flight(), 1);
        drop(w);

        let m = barrier.begin_mutation();
        assert_eq!(m.generation(), 1);
        drop(m);

        let w = barrier.enter_window(Duration::from_millis(1)).unwrap();
        assert_eq!(w.generation(), 1);
    }

    #[test]
    fn test_window_times_out_during_mutation() {
        let barrier = GenerationBarrier::new();
        let _m = barrier.begin_mutation();
        assert!(barrier.enter_window(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_mutation_waits_for_in_flight_window() {
        let barrier = Arc::new(GenerationBarrier::new());
        let window_done = Arc::new(AtomicBool::new(false));

        let w = barrier.enter_window(Duration::from_millis(1)).unwrap();

        let handle = {
            let barrier = Arc::clone(&barrier);
            let window_done = Arc::clone(&window_done);
            thread::spawn(move || {
                let _m = barrier.begin_mutation();
                window_done.load(Ordering::SeqCst)
            })
        };

        thread::sleep(Duration::from_millis(20));
        window_done.store(true, Ordering::SeqCst);
        drop(w);

        assert!(handle.join().unwrap());
        assert_eq!(barrier.generation(), 1);
    }
}
