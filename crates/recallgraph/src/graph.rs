//! The audio/channel tree
//!
//! Channels live in a petgraph `StableGraph` arena addressed by [`ChannelId`],
//! so indices stay valid across resizes. Link edges run from the upstream
//! channel to the channel that reads it; each channel has at most one.
//!
//! Every mutation validates before it touches anything, so a failed call
//! leaves the tree exactly as it was.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction as EdgeDirection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::{Audio, AudioSpec};
use crate::channel::Channel;
use crate::error::{PortError, StructuralError, TaskError};
use crate::port::{Port, PortSet, PortValue};
use crate::primitives::{
    AudioId, ChannelId, DeviceRole, Direction, IdAllocator, RecallId, SampleFormat,
};
use crate::recall::{EffectDefinition, RecallAudio};
use crate::scope::{ScopeSet, SoundScope};

/// Routing edge weight
#[derive(Debug, Clone, Copy, Default)]
pub struct Link;

/// Buffer shape and size limits shared by every channel
#[derive(Debug, Clone, Copy)]
pub struct GraphLimits {
    pub frames: usize,
    pub format: SampleFormat,
    /// Per direction, pads x lines
    pub max_channels: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            frames: 256,
            format: SampleFormat::F32,
            max_channels: 1024,
        }
    }
}

impl From<&recallconf::EngineConfig> for GraphLimits {
    fn from(config: &recallconf::EngineConfig) -> Self {
        Self {
            frames: config.buffer_size,
            format: config.sample_format,
            max_channels: config.max_channels,
        }
    }
}

/// Change notification delivered to listeners once a task is done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEvent {
    AudioAdded {
        audio: AudioId,
    },
    AudioRemoved {
        audio: AudioId,
    },
    ChannelCountChanged {
        audio: AudioId,
        old: usize,
        new: usize,
    },
    PadCountChanged {
        audio: AudioId,
        direction: Direction,
        old: usize,
        new: usize,
    },
    LinkChanged {
        channel: ChannelId,
        old: Option<ChannelId>,
        new: Option<ChannelId>,
    },
    ScopeStarted {
        audio: AudioId,
        channel: Option<ChannelId>,
        scope: SoundScope,
    },
    ScopeStopped {
        audio: AudioId,
        channel: Option<ChannelId>,
        scope: SoundScope,
    },
    RecallAttached {
        audio: AudioId,
        recall: RecallId,
    },
    RecallRemoved {
        audio: AudioId,
        recall: RecallId,
    },
}

/// Address of a live port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum PortPath {
    /// Port of a recall audio
    Audio {
        audio: AudioId,
        recall: RecallId,
        port: String,
    },
    /// Port of the channel instance of recall audio `recall`
    Channel {
        channel: ChannelId,
        recall: RecallId,
        port: String,
    },
    /// Port of the `scope` run duplicate of recall audio `recall`
    Run {
        channel: ChannelId,
        scope: SoundScope,
        recall: RecallId,
        port: String,
    },
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub name: String,
    pub value: PortValue,
    pub is_output: bool,
}

impl PortSnapshot {
    fn collect(ports: &PortSet) -> Vec<PortSnapshot> {
        ports
            .iter()
            .map(|p| PortSnapshot {
                name: p.name().to_string(),
                value: p.get(),
                is_output: p.is_output(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallSnapshot {
    pub id: RecallId,
    pub effect: String,
    pub target: Direction,
    pub enabled: bool,
    pub depends_on: Vec<RecallId>,
    pub ports: Vec<PortSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: RecallId,
    pub base: RecallId,
    pub scope: SoundScope,
    pub failed: bool,
    pub ports: Vec<PortSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub id: ChannelId,
    pub direction: Direction,
    pub pad: usize,
    pub line: usize,
    pub link: Option<ChannelId>,
    pub scopes: Vec<SoundScope>,
    pub signals: usize,
    pub runs: Vec<RunSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSnapshot {
    pub id: AudioId,
    pub name: String,
    pub role: DeviceRole,
    pub input_pads: usize,
    pub input_lines: usize,
    pub output_pads: usize,
    pub output_lines: usize,
    pub generation: u64,
    pub scopes: Vec<SoundScope>,
    pub recalls: Vec<RecallSnapshot>,
    pub channels: Vec<ChannelSnapshot>,
}

/// Serializable view of the whole tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub audios: Vec<AudioSnapshot>,
}

impl GraphSnapshot {
    pub fn audio(&self, id: AudioId) -> Option<&AudioSnapshot> {
        self.audios.iter().find(|a| a.id == id)
    }
}

// =============================================================================
// GRAPH
// =============================================================================

pub struct RecallGraph {
    ids: IdAllocator,
    limits: GraphLimits,
    audios: HashMap<AudioId, Audio>,
    created: Vec<AudioId>,
    channels: StableGraph<Channel, Link>,
    index_map: HashMap<ChannelId, NodeIndex>,
    render_order: Vec<AudioId>,
    events: Vec<GraphEvent>,
}

impl RecallGraph {
    pub fn new(limits: GraphLimits) -> Self {
        Self {
            ids: IdAllocator::new(),
            limits,
            audios: HashMap::new(),
            created: Vec::new(),
            channels: StableGraph::new(),
            index_map: HashMap::new(),
            render_order: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn limits(&self) -> GraphLimits {
        self.limits
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    pub fn audio(&self, id: AudioId) -> Option<&Audio> {
        self.audios.get(&id)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        let index = self.index_map.get(&id)?;
        self.channels.node_weight(*index)
    }

    fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        let index = self.index_map.get(&id)?;
        self.channels.node_weight_mut(*index)
    }

    /// Audios in creation order
    pub fn audio_ids(&self) -> &[AudioId] {
        &self.created
    }

    /// Audios ordered so that link sources render before their readers
    pub fn render_order(&self) -> &[AudioId] {
        &self.render_order
    }

    pub fn audio_count(&self) -> usize {
        self.audios.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.node_count()
    }

    pub fn link(&self, channel: ChannelId) -> Option<ChannelId> {
        self.channel(channel).and_then(|c| c.link)
    }

    /// Union of every scope active anywhere in the tree
    pub fn active_scopes(&self) -> ScopeSet {
        let audios = self.audios.values().map(|a| a.active);
        let channels = self.channels.node_weights().map(|c| c.active);
        audios.chain(channels).fold(ScopeSet::empty(), ScopeSet::union)
    }

    /// Run-level recalls for `scope` across all channels of `audio`
    pub fn run_count(&self, audio: AudioId, scope: SoundScope) -> usize {
        self.audio(audio)
            .map(|a| {
                a.channel_ids()
                    .filter_map(|id| self.channel(id))
                    .map(|c| c.run_count(scope))
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Pending change notifications, oldest first
    pub fn take_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    fn require_audio(&self, id: AudioId) -> Result<&Audio, StructuralError> {
        self.audios.get(&id).ok_or(StructuralError::AudioNotFound(id))
    }

    fn require_channel(&self, id: ChannelId) -> Result<&Channel, StructuralError> {
        self.channel(id).ok_or(StructuralError::ChannelNotFound(id))
    }

    fn check_size(
        &self,
        audio: AudioId,
        what: &'static str,
        pads: usize,
        lines: usize,
    ) -> Result<(), StructuralError> {
        let requested = pads.saturating_mul(lines);
        if requested > self.limits.max_channels {
            return Err(StructuralError::ResizeLimit {
                audio,
                what,
                requested,
                limit: self.limits.max_channels,
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Audios
    // -------------------------------------------------------------------------

    pub fn add_audio(&mut self, spec: &AudioSpec) -> Result<AudioId, StructuralError> {
        let id = AudioId::new();
        self.check_size(id, "input pads", spec.input_pads, spec.audio_channels)?;
        self.check_size(id, "output pads", spec.output_pads, spec.audio_channels)?;

        let mut audio = Audio::new(id, spec);
        for direction in [Direction::Input, Direction::Output] {
            let mut ids = Vec::with_capacity(audio.pads(direction) * audio.lines(direction));
            for pad in 0..audio.pads(direction) {
                for line in 0..audio.lines(direction) {
                    let channel = build_channel(&self.ids, &self.limits, &audio, direction, pad, line);
                    ids.push(self.insert_channel(channel));
                }
            }
            *audio.channels_mut(direction) = ids;
        }

        debug!(audio.id = %id, name = %audio.name, channels = audio.inputs.len() + audio.outputs.len(), "Audio added");
        self.audios.insert(id, audio);
        self.created.push(id);
        self.events.push(GraphEvent::AudioAdded { audio: id });
        self.refresh_render_order();
        Ok(id)
    }

    /// Remove an audio and everything it owns. Rejected while any scope is active on it.
    pub fn remove_audio(&mut self, id: AudioId) -> Result<(), StructuralError> {
        let audio = self.require_audio(id)?;
        if let Some(scope) = audio.active.iter().next() {
            return Err(StructuralError::ScopeActive { audio: id, scope });
        }
        for channel in audio.channel_ids().filter_map(|c| self.channel(c)) {
            if let Some(scope) = channel.active.iter().next() {
                return Err(StructuralError::ScopeActive { audio: id, scope });
            }
        }

        let channels: Vec<ChannelId> = audio.channel_ids().collect();
        for channel in channels {
            self.release_channel(channel);
        }
        self.audios.remove(&id);
        self.created.retain(|a| *a != id);
        self.events.push(GraphEvent::AudioRemoved { audio: id });
        self.refresh_render_order();
        debug!(audio.id = %id, "Audio removed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Resize
    // -------------------------------------------------------------------------

    /// Change the lines per pad of both directions from `old_count` to `new_count`
    pub fn resize_audio_channels(
        &mut self,
        id: AudioId,
        new_count: usize,
        old_count: usize,
    ) -> Result<(), StructuralError> {
        let audio = self.require_audio(id)?;
        for direction in [Direction::Input, Direction::Output] {
            let actual = audio.lines(direction);
            if actual != old_count {
                return Err(StructuralError::StaleResize {
                    audio: id,
                    what: "audio channels",
                    expected: old_count,
                    actual,
                });
            }
        }
        self.check_size(id, "audio channels", audio.input_pads, new_count)?;
        self.check_size(id, "audio channels", audio.output_pads, new_count)?;

        if new_count == old_count {
            return audio.validate_shape();
        }

        for direction in [Direction::Input, Direction::Output] {
            let pads = self.require_audio(id)?.pads(direction);
            self.reshape(id, direction, pads, old_count, pads, new_count)?;
        }

        let audio = self.audio_mut(id)?;
        audio.input_lines = new_count;
        audio.output_lines = new_count;
        audio.touch();
        audio.validate_shape()?;

        self.events.push(GraphEvent::ChannelCountChanged {
            audio: id,
            old: old_count,
            new: new_count,
        });
        self.refresh_render_order();
        debug!(audio.id = %id, old = old_count, new = new_count, "Audio channels resized");
        Ok(())
    }

    /// Change the pad count of one direction from `old_pads` to `new_pads`
    pub fn resize_pads(
        &mut self,
        id: AudioId,
        direction: Direction,
        new_pads: usize,
        old_pads: usize,
    ) -> Result<(), StructuralError> {
        let audio = self.require_audio(id)?;
        let actual = audio.pads(direction);
        if actual != old_pads {
            return Err(StructuralError::StaleResize {
                audio: id,
                what: "pads",
                expected: old_pads,
                actual,
            });
        }
        let lines = audio.lines(direction);
        self.check_size(id, "pads", new_pads, lines)?;

        if new_pads == old_pads {
            return audio.validate_shape();
        }

        self.reshape(id, direction, old_pads, lines, new_pads, lines)?;

        let audio = self.audio_mut(id)?;
        match direction {
            Direction::Input => audio.input_pads = new_pads,
            Direction::Output => audio.output_pads = new_pads,
        }
        audio.touch();
        audio.validate_shape()?;

        self.events.push(GraphEvent::PadCountChanged {
            audio: id,
            direction,
            old: old_pads,
            new: new_pads,
        });
        self.refresh_render_order();
        debug!(audio.id = %id, %direction, old = old_pads, new = new_pads, "Pads resized");
        Ok(())
    }

    /// Rebuild one direction's channel array for a new pads x lines shape.
    /// Surviving channels keep their identity and run state.
    fn reshape(
        &mut self,
        id: AudioId,
        direction: Direction,
        old_pads: usize,
        old_lines: usize,
        new_pads: usize,
        new_lines: usize,
    ) -> Result<(), StructuralError> {
        let old_ids = self.require_audio(id)?.channels(direction).to_vec();
        let mut next = Vec::with_capacity(new_pads * new_lines);
        let mut removed = Vec::new();

        for pad in 0..old_pads.max(new_pads) {
            for line in 0..old_lines.max(new_lines) {
                let existing = (pad < old_pads && line < old_lines)
                    .then(|| old_ids.get(pad * old_lines + line).copied())
                    .flatten();
                let keep = pad < new_pads && line < new_lines;

                match (existing, keep) {
                    (Some(channel), true) => next.push(channel),
                    (Some(channel), false) => removed.push(channel),
                    (None, true) => {
                        let audio = self
                            .audios
                            .get(&id)
                            .ok_or(StructuralError::AudioNotFound(id))?;
                        let channel =
                            build_channel(&self.ids, &self.limits, audio, direction, pad, line);
                        next.push(self.insert_channel(channel));
                    }
                    (None, false) => {}
                }
            }
        }

        for channel in removed {
            self.release_channel(channel);
        }
        *self.audio_mut(id)?.channels_mut(direction) = next;
        Ok(())
    }

    fn audio_mut(&mut self, id: AudioId) -> Result<&mut Audio, StructuralError> {
        self.audios
            .get_mut(&id)
            .ok_or(StructuralError::AudioNotFound(id))
    }

    fn insert_channel(&mut self, channel: Channel) -> ChannelId {
        let id = channel.id;
        let index = self.channels.add_node(channel);
        self.index_map.insert(id, index);
        id
    }

    /// Tear down runs, then signals, then clear readers' links, then drop the node
    fn release_channel(&mut self, id: ChannelId) {
        let Some(index) = self.index_map.get(&id).copied() else {
            return;
        };

        if let Some(channel) = self.channels.node_weight_mut(index) {
            for scope in SoundScope::ALL {
                channel.stop(scope);
            }
        }

        let readers: Vec<NodeIndex> = self
            .channels
            .edges_directed(index, EdgeDirection::Outgoing)
            .map(|e| e.target())
            .collect();
        for reader in readers {
            if let Some(channel) = self.channels.node_weight_mut(reader) {
                channel.link = None;
                self.events.push(GraphEvent::LinkChanged {
                    channel: channel.id,
                    old: Some(id),
                    new: None,
                });
            }
        }

        self.channels.remove_node(index);
        self.index_map.remove(&id);
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    /// Point `channel` at `target`, or clear its link with `None`.
    ///
    /// Rejected when `channel` is reachable from `target` by following links.
    /// The walk is bounded by the channel count; hitting the bound without
    /// reaching `channel` counts as acyclic.
    pub fn reset_link(
        &mut self,
        channel: ChannelId,
        target: Option<ChannelId>,
    ) -> Result<(), StructuralError> {
        let old = self.require_channel(channel)?.link;

        if let Some(target) = target {
            self.require_channel(target)?;
            let mut cursor = Some(target);
            for _ in 0..=self.channel_count() {
                match cursor {
                    Some(c) if c == channel => {
                        return Err(StructuralError::CyclicLink { channel, target });
                    }
                    Some(c) => cursor = self.link(c),
                    None => break,
                }
            }
        }

        if old == target {
            return Ok(());
        }

        let index = self.index_map[&channel];
        if let Some(old) = old.and_then(|o| self.index_map.get(&o).copied()) {
            if let Some(edge) = self.channels.find_edge(old, index) {
                self.channels.remove_edge(edge);
            }
        }
        if let Some(target) = target {
            let source = self.index_map[&target];
            self.channels.add_edge(source, index, Link);
        }
        if let Some(ch) = self.channel_mut(channel) {
            ch.link = target;
        }

        self.events.push(GraphEvent::LinkChanged {
            channel,
            old,
            new: target,
        });
        self.refresh_render_order();
        debug!(channel.id = %channel, ?old, new = ?target, "Link reset");
        Ok(())
    }

    fn refresh_render_order(&mut self) {
        let mut deps: DiGraphMap<AudioId, ()> = DiGraphMap::new();
        for id in &self.created {
            deps.add_node(*id);
        }
        for edge in self.channels.edge_indices() {
            let Some((source, reader)) = self.channels.edge_endpoints(edge) else {
                continue;
            };
            let (Some(source), Some(reader)) = (
                self.channels.node_weight(source),
                self.channels.node_weight(reader),
            ) else {
                continue;
            };
            if source.audio != reader.audio {
                deps.add_edge(source.audio, reader.audio, ());
            }
        }

        self.render_order = match toposort(&deps, None) {
            Ok(order) => order,
            Err(cycle) => {
                warn!(
                    audio.id = %cycle.node_id(),
                    "Audio routing loops; rendering in creation order"
                );
                self.created.clone()
            }
        };
    }

    // -------------------------------------------------------------------------
    // Recalls
    // -------------------------------------------------------------------------

    /// Attach `effect` to `audio`, applied to every channel of `target`.
    /// The new recall runs after everything in `depends_on`.
    pub fn attach_recall(
        &mut self,
        audio_id: AudioId,
        effect: Arc<EffectDefinition>,
        target: Direction,
        depends_on: &[RecallId],
    ) -> Result<RecallId, StructuralError> {
        let audio = self.require_audio(audio_id)?;
        for dep in depends_on {
            if !audio.order.contains(*dep) {
                return Err(StructuralError::RecallNotFound(*dep));
            }
        }

        let recall = RecallAudio::new(self.ids.recall(), effect, target);
        let recall_id = recall.id;

        let audio = self.audio_mut(audio_id)?;
        audio.order.attach(recall_id);
        for dep in depends_on {
            audio.order.add_dependency(recall_id, *dep)?;
        }
        audio.recalls.push(recall);
        audio.touch();

        let audio = self.require_audio(audio_id)?;
        let order = audio.order.order();
        let channels: Vec<ChannelId> = audio.channels(target).to_vec();
        let Some(recall) = audio.recall(recall_id) else {
            return Err(StructuralError::RecallNotFound(recall_id));
        };
        let duplicates: Vec<_> = channels.iter().map(|_| recall.duplicate(&self.ids)).collect();

        let limits = self.limits;
        for (channel_id, dup) in channels.into_iter().zip(duplicates) {
            let index = self.index_map[&channel_id];
            let ids = &self.ids;
            if let Some(channel) = self.channels.node_weight_mut(index) {
                channel.add_recall(dup);
                for scope in channel.active.iter() {
                    channel.duplicate(ids, scope, &order, limits.frames, limits.format);
                }
            }
        }

        self.events.push(GraphEvent::RecallAttached {
            audio: audio_id,
            recall: recall_id,
        });
        debug!(audio.id = %audio_id, recall.id = %recall_id, %target, "Recall attached");
        Ok(recall_id)
    }

    /// Detach a recall audio together with every channel instance and duplicate
    pub fn remove_recall(&mut self, audio_id: AudioId, recall: RecallId) -> Result<(), StructuralError> {
        let audio = self.require_audio(audio_id)?;
        if audio.recall(recall).is_none() {
            return Err(StructuralError::RecallNotFound(recall));
        }
        let channels: Vec<ChannelId> = audio.channel_ids().collect();

        for channel in channels {
            if let Some(ch) = self.channel_mut(channel) {
                ch.remove_recall(recall);
            }
        }

        let audio = self.audio_mut(audio_id)?;
        audio.recalls.retain(|r| r.id != recall);
        audio.order.detach(recall);
        audio.touch();

        self.events.push(GraphEvent::RecallRemoved {
            audio: audio_id,
            recall,
        });
        debug!(audio.id = %audio_id, recall.id = %recall, "Recall removed");
        Ok(())
    }

    /// Declare that `recall` runs after `depends_on`
    pub fn add_dependency(
        &mut self,
        audio_id: AudioId,
        recall: RecallId,
        depends_on: RecallId,
    ) -> Result<(), StructuralError> {
        let audio = self.audio_mut(audio_id)?;
        audio.order.add_dependency(recall, depends_on)?;
        audio.touch();
        let order = audio.order.order();
        let channels: Vec<ChannelId> = audio.channel_ids().collect();

        for channel in channels {
            if let Some(ch) = self.channel_mut(channel) {
                ch.reorder(&order);
            }
        }
        Ok(())
    }

    /// Current execution order of the recalls attached to `audio`
    pub fn recall_order(&self, audio: AudioId) -> Result<Vec<RecallId>, StructuralError> {
        Ok(self.require_audio(audio)?.order.order())
    }

    /// Enable or disable a recall. Disabling drops its run duplicates;
    /// enabling duplicates it again for every active scope.
    pub fn set_recall_enabled(
        &mut self,
        audio_id: AudioId,
        recall: RecallId,
        enabled: bool,
    ) -> Result<(), StructuralError> {
        let audio = self.audio_mut(audio_id)?;
        let Some(base) = audio.recall_mut(recall) else {
            return Err(StructuralError::RecallNotFound(recall));
        };
        base.enabled = enabled;
        audio.touch();
        let order = audio.order.order();
        let channels: Vec<ChannelId> = audio.channel_ids().collect();

        let limits = self.limits;
        for channel in channels {
            let Some(index) = self.index_map.get(&channel).copied() else {
                continue;
            };
            let ids = &self.ids;
            if let Some(ch) = self.channels.node_weight_mut(index) {
                ch.set_recall_enabled(recall, enabled);
                if enabled {
                    for scope in ch.active.iter() {
                        ch.duplicate(ids, scope, &order, limits.frames, limits.format);
                    }
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Scopes
    // -------------------------------------------------------------------------

    /// Produce, or return existing, run duplicates for every channel of
    /// `audio` in `scope`. Returns the number of channel runs covering it.
    pub fn duplicate_audio(&mut self, audio_id: AudioId, scope: SoundScope) -> Result<usize, StructuralError> {
        let channels: Vec<ChannelId> = self.require_audio(audio_id)?.channel_ids().collect();
        let mut total = 0;
        for channel in channels {
            total += self.duplicate_channel(channel, scope)?;
        }
        Ok(total)
    }

    /// Produce, or return existing, run duplicates for one channel
    pub fn duplicate_channel(&mut self, channel: ChannelId, scope: SoundScope) -> Result<usize, StructuralError> {
        let audio_id = self.require_channel(channel)?.audio;
        let order = self.require_audio(audio_id)?.order.order();
        let limits = self.limits;
        let index = self.index_map[&channel];
        let ids = &self.ids;
        let Some(ch) = self.channels.node_weight_mut(index) else {
            return Err(StructuralError::ChannelNotFound(channel));
        };
        let created = ch.duplicate(ids, scope, &order, limits.frames, limits.format);
        if created > 0 {
            debug!(channel.id = %channel, %scope, created, "Channel duplicated");
        }
        Ok(ch.run_count(scope))
    }

    /// Activate `scope` on every channel of `audio`, now and after resizes
    pub fn start_audio(&mut self, audio_id: AudioId, scope: SoundScope) -> Result<usize, StructuralError> {
        let audio = self.audio_mut(audio_id)?;
        let newly = audio.active.insert(scope);
        audio.touch();
        let runs = self.duplicate_audio(audio_id, scope)?;
        if newly {
            self.events.push(GraphEvent::ScopeStarted {
                audio: audio_id,
                channel: None,
                scope,
            });
        }
        Ok(runs)
    }

    /// Deactivate `scope` on `audio`, dropping every duplicate and signal for it
    pub fn stop_audio(&mut self, audio_id: AudioId, scope: SoundScope) -> Result<usize, StructuralError> {
        let audio = self.audio_mut(audio_id)?;
        let was = audio.active.remove(scope);
        audio.touch();
        let channels: Vec<ChannelId> = audio.channel_ids().collect();

        let mut removed = 0;
        let mut any_channel = false;
        for channel in channels {
            if let Some(ch) = self.channel_mut(channel) {
                any_channel |= ch.active.contains(scope);
                removed += ch.stop(scope);
            }
        }
        if was || any_channel {
            self.events.push(GraphEvent::ScopeStopped {
                audio: audio_id,
                channel: None,
                scope,
            });
        }
        Ok(removed)
    }

    /// Activate `scope` on a single channel
    pub fn start_channel(&mut self, channel: ChannelId, scope: SoundScope) -> Result<usize, StructuralError> {
        let ch = self.require_channel(channel)?;
        let audio = ch.audio;
        let newly = !ch.active.contains(scope);
        let runs = self.duplicate_channel(channel, scope)?;
        if newly {
            self.events.push(GraphEvent::ScopeStarted {
                audio,
                channel: Some(channel),
                scope,
            });
        }
        Ok(runs)
    }

    pub fn stop_channel(&mut self, channel: ChannelId, scope: SoundScope) -> Result<usize, StructuralError> {
        let ch = self
            .channel_mut(channel)
            .ok_or(StructuralError::ChannelNotFound(channel))?;
        let was = ch.active.contains(scope);
        let audio = ch.audio;
        let removed = ch.stop(scope);
        if was {
            self.events.push(GraphEvent::ScopeStopped {
                audio,
                channel: Some(channel),
                scope,
            });
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Ports and snapshots
    // -------------------------------------------------------------------------

    /// Resolve a live port
    pub fn port(&self, path: &PortPath) -> Result<Arc<Port>, TaskError> {
        let (ports_port, name): (Option<Arc<Port>>, &str) = match path {
            PortPath::Audio { audio, recall, port } => {
                let recall = self
                    .require_audio(*audio)?
                    .recall(*recall)
                    .ok_or(StructuralError::RecallNotFound(*recall))?;
                (recall.ports.get(port).cloned(), port.as_str())
            }
            PortPath::Channel {
                channel,
                recall,
                port,
            } => {
                let recall = self
                    .require_channel(*channel)?
                    .recall(*recall)
                    .ok_or(StructuralError::RecallNotFound(*recall))?;
                (recall.ports.get(port).cloned(), port.as_str())
            }
            PortPath::Run {
                channel,
                scope,
                recall,
                port,
            } => {
                let ch = self.require_channel(*channel)?;
                let runs = ch.runs(*scope);
                let run = runs
                    .channel_run(*recall)
                    .ok_or(StructuralError::RecallNotFound(*recall))?;
                (run.ports.get(port).cloned(), port.as_str())
            }
        };
        ports_port.ok_or_else(|| PortError::NotFound(name.to_string()).into())
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let audios = self
            .created
            .iter()
            .filter_map(|id| self.audios.get(id))
            .map(|audio| self.snapshot_audio(audio))
            .collect();
        GraphSnapshot { audios }
    }

    fn snapshot_audio(&self, audio: &Audio) -> AudioSnapshot {
        let recalls = audio
            .recalls
            .iter()
            .map(|r| RecallSnapshot {
                id: r.id,
                effect: r.effect.type_id.clone(),
                target: r.target,
                enabled: r.enabled,
                depends_on: audio.order.dependencies(r.id),
                ports: PortSnapshot::collect(&r.ports),
            })
            .collect();

        let channels = audio
            .channel_ids()
            .filter_map(|id| self.channel(id))
            .map(|ch| {
                let runs = ch
                    .active
                    .iter()
                    .flat_map(|scope| {
                        ch.runs(scope)
                            .channel_runs
                            .iter()
                            .map(|run| RunSnapshot {
                                id: run.id,
                                base: run.base,
                                scope,
                                failed: run.slot.is_failed(),
                                ports: PortSnapshot::collect(&run.ports),
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect();
                ChannelSnapshot {
                    id: ch.id,
                    direction: ch.direction,
                    pad: ch.pad,
                    line: ch.line,
                    link: ch.link,
                    scopes: ch.active.iter().collect(),
                    signals: ch.recycling.signal_count(),
                    runs,
                }
            })
            .collect();

        AudioSnapshot {
            id: audio.id,
            name: audio.name.clone(),
            role: audio.role,
            input_pads: audio.input_pads,
            input_lines: audio.input_lines,
            output_pads: audio.output_pads,
            output_lines: audio.output_lines,
            generation: audio.generation,
            scopes: audio.active.iter().collect(),
            recalls,
            channels,
        }
    }
}

impl Default for RecallGraph {
    fn default() -> Self {
        Self::new(GraphLimits::default())
    }
}

/// New channel carrying the audio's recalls for its direction, duplicated
/// for every scope active on the audio
fn build_channel(
    ids: &IdAllocator,
    limits: &GraphLimits,
    audio: &Audio,
    direction: Direction,
    pad: usize,
    line: usize,
) -> Channel {
    let mut channel = Channel::new(ids, audio.id, direction, pad, line);
    for recall in audio.recalls_for(direction) {
        channel.add_recall(recall.duplicate(ids));
    }
    let order = audio.order.order();
    for scope in audio.active.iter() {
        channel.duplicate(ids, scope, &order, limits.frames, limits.format);
    }
    channel
}
