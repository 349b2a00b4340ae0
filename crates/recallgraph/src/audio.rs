//! Audio: an instrument or track owning input and output channel arrays

use serde::{Deserialize, Serialize};

use crate::error::StructuralError;
use crate::primitives::{AudioId, ChannelId, DeviceRole, Direction, RecallId};
use crate::recall::{DependencyOrder, RecallAudio};
use crate::scope::ScopeSet;

/// Parameters for creating an audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub name: String,
    #[serde(default)]
    pub role: DeviceRole,
    #[serde(default = "AudioSpec::default_pads")]
    pub input_pads: usize,
    #[serde(default = "AudioSpec::default_pads")]
    pub output_pads: usize,
    /// Lines per pad, shared by both directions
    #[serde(default = "AudioSpec::default_channels")]
    pub audio_channels: usize,
}

impl AudioSpec {
    fn default_pads() -> usize {
        1
    }

    fn default_channels() -> usize {
        2
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: DeviceRole::None,
            input_pads: Self::default_pads(),
            output_pads: Self::default_pads(),
            audio_channels: Self::default_channels(),
        }
    }

    pub fn with_role(mut self, role: DeviceRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_pads(mut self, input_pads: usize, output_pads: usize) -> Self {
        self.input_pads = input_pads;
        self.output_pads = output_pads;
        self
    }

    pub fn with_channels(mut self, audio_channels: usize) -> Self {
        self.audio_channels = audio_channels;
        self
    }
}

#[derive(Debug)]
pub struct Audio {
    pub id: AudioId,
    pub name: String,
    pub role: DeviceRole,
    pub input_pads: usize,
    pub input_lines: usize,
    pub output_pads: usize,
    pub output_lines: usize,
    /// Input channels, index `pad * input_lines + line`
    pub inputs: Vec<ChannelId>,
    /// Output channels, index `pad * output_lines + line`
    pub outputs: Vec<ChannelId>,
    pub recalls: Vec<RecallAudio>,
    pub order: DependencyOrder,
    /// Scopes started at audio level; new channels join these on resize
    pub active: ScopeSet,
    /// Bumped on every structural change to this audio
    pub generation: u64,
}

impl Audio {
    pub fn new(id: AudioId, spec: &AudioSpec) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            role: spec.role,
            input_pads: spec.input_pads,
            input_lines: spec.audio_channels,
            output_pads: spec.output_pads,
            output_lines: spec.audio_channels,
            inputs: Vec::new(),
            outputs: Vec::new(),
            recalls: Vec::new(),
            order: DependencyOrder::new(),
            active: ScopeSet::empty(),
            generation: 0,
        }
    }

    pub fn pads(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.input_pads,
            Direction::Output => self.output_pads,
        }
    }

    pub fn lines(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.input_lines,
            Direction::Output => self.output_lines,
        }
    }

    pub fn channels(&self, direction: Direction) -> &[ChannelId] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    pub fn channels_mut(&mut self, direction: Direction) -> &mut Vec<ChannelId> {
        match direction {
            Direction::Input => &mut self.inputs,
            Direction::Output => &mut self.outputs,
        }
    }

    /// Every channel, inputs first
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }

    pub fn channel_at(&self, direction: Direction, pad: usize, line: usize) -> Option<ChannelId> {
        let lines = self.lines(direction);
        if line >= lines {
            return None;
        }
        self.channels(direction).get(pad * lines + line).copied()
    }

    pub fn recall(&self, id: RecallId) -> Option<&RecallAudio> {
        self.recalls.iter().find(|r| r.id == id)
    }

    pub fn recall_mut(&mut self, id: RecallId) -> Option<&mut RecallAudio> {
        self.recalls.iter_mut().find(|r| r.id == id)
    }

    /// Recalls targeting `direction`, in attachment order
    pub fn recalls_for(&self, direction: Direction) -> impl Iterator<Item = &RecallAudio> {
        self.recalls.iter().filter(move |r| r.target == direction)
    }

    /// pads x lines must equal the channel array length in both directions
    pub fn validate_shape(&self) -> Result<(), StructuralError> {
        for direction in [Direction::Input, Direction::Output] {
            let expected = self.pads(direction) * self.lines(direction);
            let actual = self.channels(direction).len();
            if expected != actual {
                return Err(StructuralError::ShapeMismatch {
                    audio: self.id,
                    direction,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: AudioSpec = serde_json::from_str(r#"{"name": "drums"}"#).unwrap();
        assert_eq!(spec.input_pads, 1);
        assert_eq!(spec.output_pads, 1);
        assert_eq!(spec.audio_channels, 2);
        assert_eq!(spec.role, DeviceRole::None);
    }

    #[test]
    fn test_validate_shape() {
        let mut audio = Audio::new(AudioId::new(), &AudioSpec::new("synth").with_pads(0, 2));
        assert!(audio.validate_shape().is_err());

        audio.outputs = (1..=4).map(ChannelId).collect();
        assert!(audio.validate_shape().is_ok());

        audio.output_lines = 3;
        assert!(matches!(
            audio.validate_shape(),
            Err(StructuralError::ShapeMismatch { expected: 6, actual: 4, .. })
        ));
    }

    #[test]
    fn test_channel_at() {
        let mut audio = Audio::new(AudioId::new(), &AudioSpec::new("synth").with_pads(0, 2));
        audio.outputs = (1..=4).map(ChannelId).collect();
        assert_eq!(audio.channel_at(Direction::Output, 1, 0), Some(ChannelId(3)));
        assert_eq!(audio.channel_at(Direction::Output, 0, 2), None);
        assert_eq!(audio.channel_at(Direction::Input, 0, 0), None);
    }
}
