//! Sound scopes and the scope dispatcher
//!
//! Each scope is an independent playback mode with its own run-context
//! duplicates. Scope is always passed explicitly into render and duplication;
//! there is no ambient "current scope".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::Audio;
use crate::channel::Channel;
use crate::graph::RecallGraph;
use crate::primitives::{AudioId, ChannelId, Direction};

/// Independent playback mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundScope {
    Playback,
    Sequencer,
    Notation,
    Wave,
    Midi,
}

impl SoundScope {
    pub const COUNT: usize = 5;

    pub const ALL: [SoundScope; Self::COUNT] = [
        SoundScope::Playback,
        SoundScope::Sequencer,
        SoundScope::Notation,
        SoundScope::Wave,
        SoundScope::Midi,
    ];

    pub fn index(self) -> usize {
        match self {
            SoundScope::Playback => 0,
            SoundScope::Sequencer => 1,
            SoundScope::Notation => 2,
            SoundScope::Wave => 3,
            SoundScope::Midi => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SoundScope::Playback => "playback",
            SoundScope::Sequencer => "sequencer",
            SoundScope::Notation => "notation",
            SoundScope::Wave => "wave",
            SoundScope::Midi => "midi",
        }
    }
}

impl fmt::Display for SoundScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoundScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "playback" => Ok(SoundScope::Playback),
            "sequencer" | "pattern" => Ok(SoundScope::Sequencer),
            "notation" => Ok(SoundScope::Notation),
            "wave" => Ok(SoundScope::Wave),
            "midi" => Ok(SoundScope::Midi),
            other => Err(format!("unknown sound scope: {}", other)),
        }
    }
}

/// Set of scopes, one bit per scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ScopeSet(u8);

impl ScopeSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, scope: SoundScope) -> bool {
        self.0 & (1 << scope.index()) != 0
    }

    /// Returns true if the scope was newly inserted
    pub fn insert(&mut self, scope: SoundScope) -> bool {
        let had = self.contains(scope);
        self.0 |= 1 << scope.index();
        !had
    }

    /// Returns true if the scope was present
    pub fn remove(&mut self, scope: SoundScope) -> bool {
        let had = self.contains(scope);
        self.0 &= !(1 << scope.index());
        had
    }

    pub fn union(self, other: ScopeSet) -> ScopeSet {
        ScopeSet(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = SoundScope> {
        SoundScope::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl FromIterator<SoundScope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = SoundScope>>(iter: I) -> Self {
        let mut set = ScopeSet::empty();
        for scope in iter {
            set.insert(scope);
        }
        set
    }
}

/// Fixed array keyed by scope
#[derive(Debug, Clone, Default)]
pub struct ScopeMap<T> {
    slots: [T; SoundScope::COUNT],
}

impl<T> ScopeMap<T> {
    pub fn from_fn(mut f: impl FnMut(SoundScope) -> T) -> Self {
        Self {
            slots: SoundScope::ALL.map(&mut f),
        }
    }

    pub fn get(&self, scope: SoundScope) -> &T {
        &self.slots[scope.index()]
    }

    pub fn get_mut(&mut self, scope: SoundScope) -> &mut T {
        &mut self.slots[scope.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SoundScope, &T)> {
        SoundScope::ALL.into_iter().zip(self.slots.iter())
    }
}

/// Channels one scope must traverse, grouped per audio in render order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSet {
    pub scope: Option<SoundScope>,
    pub audios: Vec<AudioRuns>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioRuns {
    pub audio: AudioId,
    pub channels: Vec<ChannelRuns>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRuns {
    pub channel: ChannelId,
    pub direction: Direction,
    pub channel_runs: usize,
    pub recycling_runs: usize,
}

impl RunSet {
    /// Total channel-run recalls across every audio
    pub fn channel_runs(&self) -> usize {
        self.audios
            .iter()
            .flat_map(|a| a.channels.iter())
            .map(|c| c.channel_runs)
            .sum()
    }

    pub fn recycling_runs(&self) -> usize {
        self.audios
            .iter()
            .flat_map(|a| a.channels.iter())
            .map(|c| c.recycling_runs)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.audios.is_empty()
    }
}

/// A channel a scope traverses, with its position in its direction's array
#[derive(Clone, Copy)]
pub struct ScheduledChannel<'g> {
    pub audio: &'g Audio,
    pub channel: &'g Channel,
    pub index: usize,
}

/// Maps a scope to the channels it must traverse
pub struct ScopeDispatcher;

impl ScopeDispatcher {
    /// Active channels for `scope`: audios in render order, inputs before outputs
    pub fn channels<'g>(
        graph: &'g RecallGraph,
        scope: SoundScope,
    ) -> impl Iterator<Item = ScheduledChannel<'g>> + 'g {
        graph
            .render_order()
            .iter()
            .filter_map(move |id| graph.audio(*id))
            .flat_map(move |audio| {
                [Direction::Input, Direction::Output]
                    .into_iter()
                    .flat_map(move |direction| {
                        audio
                            .channels(direction)
                            .iter()
                            .enumerate()
                            .filter_map(move |(index, id)| {
                                graph
                                    .channel(*id)
                                    .filter(|ch| ch.active.contains(scope))
                                    .map(|channel| ScheduledChannel {
                                        audio,
                                        channel,
                                        index,
                                    })
                            })
                    })
            })
    }

    pub fn run_set(graph: &RecallGraph, scope: SoundScope) -> RunSet {
        let mut audios: Vec<AudioRuns> = Vec::new();

        for scheduled in Self::channels(graph, scope) {
            let runs = scheduled.channel.runs(scope);
            let entry = ChannelRuns {
                channel: scheduled.channel.id,
                direction: scheduled.channel.direction,
                channel_runs: runs.channel_runs.len(),
                recycling_runs: runs.recycling_runs.len(),
            };
            match audios.last_mut() {
                Some(last) if last.audio == scheduled.audio.id => last.channels.push(entry),
                _ => audios.push(AudioRuns {
                    audio: scheduled.audio.id,
                    channels: vec![entry],
                }),
            }
        }

        RunSet {
            scope: Some(scope),
            audios,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_roundtrip_str() {
        for scope in SoundScope::ALL {
            assert_eq!(scope.as_str().parse::<SoundScope>(), Ok(scope));
        }
        assert_eq!("pattern".parse::<SoundScope>(), Ok(SoundScope::Sequencer));
        assert!("radio".parse::<SoundScope>().is_err());
    }

    #[test]
    fn test_scope_set() {
        let mut set = ScopeSet::empty();
        assert!(set.insert(SoundScope::Wave));
        assert!(!set.insert(SoundScope::Wave));
        assert!(set.insert(SoundScope::Playback));
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![SoundScope::Playback, SoundScope::Wave]
        );
        assert!(set.remove(SoundScope::Wave));
        assert!(!set.remove(SoundScope::Wave));
        assert!(!set.is_empty());
    }

    #[test]
    fn test_scope_map_keyed_by_scope() {
        let mut map: ScopeMap<u32> = ScopeMap::default();
        *map.get_mut(SoundScope::Midi) += 3;
        assert_eq!(*map.get(SoundScope::Midi), 3);
        assert_eq!(*map.get(SoundScope::Playback), 0);

        let named = ScopeMap::from_fn(|s| s.as_str().len());
        assert_eq!(*named.get(SoundScope::Notation), 8);
    }

    #[test]
    fn test_run_set_tracks_start_resize_stop() {
        use std::sync::Arc;

        use crate::audio::AudioSpec;
        use crate::graph::GraphLimits;
        use crate::port::{PortDefinition, PortValue};
        use crate::recall::{EffectDefinition, RecallLevel};

        let mut graph = RecallGraph::new(GraphLimits::default());
        let audio = graph
            .add_audio(&AudioSpec::new("synth").with_pads(1, 1).with_channels(2))
            .unwrap();
        let effect = Arc::new(EffectDefinition::new("gain", "Gain").with_port(PortDefinition::new(
            "phase",
            RecallLevel::ChannelRun,
            PortValue::Double(0.0),
        )));
        graph.attach_recall(audio, effect, Direction::Output, &[]).unwrap();
        assert!(ScopeDispatcher::run_set(&graph, SoundScope::Playback).is_empty());

        graph.start_audio(audio, SoundScope::Playback).unwrap();
        let set = ScopeDispatcher::run_set(&graph, SoundScope::Playback);
        assert_eq!(set.audios.len(), 1);
        assert_eq!(set.channel_runs(), graph.run_count(audio, SoundScope::Playback));
        assert_eq!(set.channel_runs(), 2);
        assert!(ScopeDispatcher::run_set(&graph, SoundScope::Wave).is_empty());

        graph.resize_audio_channels(audio, 3, 2).unwrap();
        let set = ScopeDispatcher::run_set(&graph, SoundScope::Playback);
        assert_eq!(set.channel_runs(), graph.run_count(audio, SoundScope::Playback));
        assert_eq!(set.channel_runs(), 3);
        let outputs: Vec<ChannelId> = set.audios[0]
            .channels
            .iter()
            .filter(|c| c.direction == Direction::Output)
            .map(|c| c.channel)
            .collect();
        assert_eq!(outputs, graph.audio(audio).unwrap().outputs);

        // inputs are listed before outputs
        let directions: Vec<Direction> = ScopeDispatcher::channels(&graph, SoundScope::Playback)
            .map(|s| s.channel.direction)
            .collect();
        assert!(directions.windows(2).all(|w| !(w[0] == Direction::Output && w[1] == Direction::Input)));

        graph.stop_audio(audio, SoundScope::Playback).unwrap();
        assert!(ScopeDispatcher::run_set(&graph, SoundScope::Playback).is_empty());
        assert_eq!(graph.run_count(audio, SoundScope::Playback), 0);
    }
}
