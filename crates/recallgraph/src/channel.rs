//! Channel: one line of one pad of an audio
//!
//! A channel owns its recycling, the per-channel instances of every recall
//! attached to its audio, and one run set per scope. Its link is a non-owning
//! reference to the upstream channel it reads from.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::primitives::{AudioId, ChannelId, Direction, IdAllocator, RecallId, SampleFormat};
use crate::recall::{RecallChannel, RecallChannelRun, RecallRecycling};
use crate::recycling::Recycling;
use crate::scope::{ScopeMap, ScopeSet, SoundScope};

/// Run-level recalls of one channel for one scope, in execution order
#[derive(Debug, Default)]
pub struct ChannelRunSet {
    pub channel_runs: Vec<RecallChannelRun>,
    pub recycling_runs: Vec<RecallRecycling>,
}

impl ChannelRunSet {
    pub fn len(&self) -> usize {
        self.channel_runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel_runs.is_empty()
    }

    pub fn clear(&mut self) {
        self.channel_runs.clear();
        self.recycling_runs.clear();
    }

    /// Reset the run state of every processor
    pub fn reset(&mut self) {
        for run in &mut self.channel_runs {
            run.slot.reset();
        }
        for run in &mut self.recycling_runs {
            run.slot.reset();
        }
    }

    /// Channel run duplicated from the recall audio `base`
    pub fn channel_run(&self, base: RecallId) -> Option<&RecallChannelRun> {
        self.channel_runs.iter().find(|r| r.base == base)
    }

    fn contains(&self, parent: RecallId) -> bool {
        self.channel_runs.iter().any(|r| r.parent == parent)
    }

    fn retain_base(&mut self, keep: impl Fn(RecallId) -> bool) {
        self.channel_runs.retain(|r| keep(r.base));
        self.recycling_runs.retain(|r| keep(r.base));
    }

    fn sort(&mut self, order: &[RecallId]) {
        let rank = |base: RecallId| order.iter().position(|id| *id == base).unwrap_or(usize::MAX);
        self.channel_runs.sort_by_key(|r| rank(r.base));
        self.recycling_runs.sort_by_key(|r| rank(r.base));
    }
}

#[derive(Debug)]
pub struct Channel {
    pub id: ChannelId,
    pub audio: AudioId,
    pub direction: Direction,
    pub pad: usize,
    pub line: usize,
    pub recycling: Recycling,
    /// Upstream channel whose signal is mixed into this one
    pub link: Option<ChannelId>,
    pub recalls: Vec<RecallChannel>,
    runs: ScopeMap<Mutex<ChannelRunSet>>,
    pub active: ScopeSet,
}

impl Channel {
    pub fn new(
        ids: &IdAllocator,
        audio: AudioId,
        direction: Direction,
        pad: usize,
        line: usize,
    ) -> Self {
        let id = ids.channel();
        Self {
            id,
            audio,
            direction,
            pad,
            line,
            recycling: Recycling::new(ids.recycling(), id),
            link: None,
            recalls: Vec::new(),
            runs: ScopeMap::default(),
            active: ScopeSet::empty(),
        }
    }

    /// Lock the run set for `scope`
    pub fn runs(&self, scope: SoundScope) -> MutexGuard<'_, ChannelRunSet> {
        self.runs
            .get(scope)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Structural access to the run set, no locking needed
    pub fn runs_mut(&mut self, scope: SoundScope) -> &mut ChannelRunSet {
        self.runs
            .get_mut(scope)
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_count(&self, scope: SoundScope) -> usize {
        self.runs(scope).len()
    }

    pub fn recall(&self, parent: RecallId) -> Option<&RecallChannel> {
        self.recalls.iter().find(|r| r.parent == parent)
    }

    pub fn add_recall(&mut self, recall: RecallChannel) {
        if self.recall(recall.parent).is_none() {
            self.recalls.push(recall);
        }
    }

    /// Drop the channel instance of recall audio `base` and all its duplicates
    pub fn remove_recall(&mut self, base: RecallId) -> bool {
        let before = self.recalls.len();
        self.recalls.retain(|r| r.parent != base);
        for scope in SoundScope::ALL {
            self.runs_mut(scope).retain_base(|b| b != base);
        }
        self.recalls.len() != before
    }

    /// Set the enabled flag of recall audio `base` on this channel
    pub fn set_recall_enabled(&mut self, base: RecallId, enabled: bool) {
        for recall in self.recalls.iter_mut().filter(|r| r.parent == base) {
            recall.enabled = enabled;
        }
        if !enabled {
            for scope in SoundScope::ALL {
                self.runs_mut(scope).retain_base(|b| b != base);
            }
        }
    }

    /// Ensure run duplicates exist for every enabled recall in `scope`.
    ///
    /// Idempotent: recalls already duplicated for `scope` are left alone, so
    /// their run state survives. Returns the number of runs created.
    pub fn duplicate(
        &mut self,
        ids: &IdAllocator,
        scope: SoundScope,
        order: &[RecallId],
        frames: usize,
        format: SampleFormat,
    ) -> usize {
        self.recycling.add_signal(scope, frames, format);
        self.active.insert(scope);

        let recycling = self.recycling.id;
        let pending: Vec<(RecallChannelRun, Option<RecallRecycling>)> = {
            let runs = self
                .runs
                .get_mut(scope)
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner);
            self.recalls
                .iter()
                .filter(|r| r.enabled && !runs.contains(r.id))
                .map(|r| r.duplicate(ids, scope, recycling))
                .collect()
        };

        let created = pending.len();
        let runs = self.runs_mut(scope);
        for (run, recycling_run) in pending {
            runs.channel_runs.push(run);
            runs.recycling_runs.extend(recycling_run);
        }
        runs.sort(order);
        created
    }

    /// Tear down every duplicate for `scope` and release its signal
    pub fn stop(&mut self, scope: SoundScope) -> usize {
        let runs = self.runs_mut(scope);
        let removed = runs.len();
        runs.clear();
        self.recycling.remove_signal(scope);
        self.active.remove(scope);
        removed
    }

    /// Re-sort every scope's runs after a dependency change
    pub fn reorder(&mut self, order: &[RecallId]) {
        for scope in SoundScope::ALL {
            self.runs_mut(scope).sort(order);
        }
    }
}
