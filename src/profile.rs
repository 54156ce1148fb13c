//! Static descriptions of what a device puts on the wire: how many channels,
//! how wide each sample is, in which order, and how raw counts turn into
//! physical units.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// What a channel measures. Only decides whether the scale factor applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// EMG/EEG electrodes, scaled to millivolts
    Bioelectric,
    /// Auxiliary analog inputs and IMU channels, scaled by their own factor
    Auxiliary,
    /// Quaternions, buffer fill, ramp, load cell... passed through raw
    Control,
}

/// One channel of a profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSpec {
    /// Decides whether `scale` applies
    pub kind: ChannelKind,
    /// Multiplier from raw counts to physical units
    pub scale: f64,
}

impl ChannelSpec {
    /// Convert a signed raw count for this channel. Control channels are
    /// never scaled, whatever their declared factor.
    pub fn apply(&self, count: i32) -> f64 {
        match self.kind {
            ChannelKind::Control => count as f64,
            ChannelKind::Bioelectric | ChannelKind::Auxiliary => count as f64 * self.scale,
        }
    }
}

/// How samples are laid out inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleOrder {
    /// One frame after another; each frame holds every channel once
    #[default]
    TimeMajor,
    /// Every sample of channel 0, then every sample of channel 1, ...
    ChannelMajor,
}

/// Byte order of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Most significant byte first
    #[default]
    Big,
    /// Least significant byte first
    Little,
}

/// A named run of consecutive channels inside a profile, e.g. "EMG" or
/// "Quaternions".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    /// Group name, e.g. "EMG"
    pub name: String,
    /// What the group's channels measure
    pub kind: ChannelKind,
    /// Channel indices within the profile
    pub channels: Range<usize>,
}

/// Everything needed to decode one device's bytes. Immutable once a session
/// starts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    /// Display name, also used as the channel group name on composite links
    pub name: String,
    /// 2 or 3
    pub bytes_per_sample: usize,
    /// Per-channel rate
    pub sample_rate_hz: u32,
    /// Samples of each channel carried by one frame of the link
    pub samples_per_frame: usize,
    /// Words of `bytes_per_sample` bytes that make up one sample, lowest
    /// word first. 1 except for the 32-bit accessory channels.
    pub words_per_sample: usize,
    /// Every channel in wire order
    pub channels: Vec<ChannelSpec>,
    /// Named runs of `channels`
    pub groups: Vec<GroupSpec>,
    /// Byte offset of this device inside a composite frame
    pub offset: usize,
    /// Time-major or channel-major
    pub order: SampleOrder,
    /// Byte order of every word
    pub byte_order: ByteOrder,
}

impl DeviceProfile {
    /// Start describing a device.
    pub fn builder(
        name: impl Into<String>,
        bytes_per_sample: usize,
        sample_rate_hz: u32,
    ) -> DeviceProfileBuilder {
        DeviceProfileBuilder::new(name.into(), bytes_per_sample, sample_rate_hz)
    }

    /// Number of channels in one frame.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Bytes of one sample of one channel.
    pub fn sample_bytes(&self) -> usize {
        self.bytes_per_sample * self.words_per_sample
    }

    /// Bytes this device occupies in one frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels.len() * self.sample_bytes() * self.samples_per_frame
    }

    /// Bytes of a standalone block of `frames` frames.
    pub fn block_size(&self, frames: usize) -> usize {
        self.frame_bytes() * frames
    }

    /// Samples of each channel decoded from a block of `frames` frames.
    pub fn samples_per_block(&self, frames: usize) -> usize {
        self.samples_per_frame * frames
    }

    /// Fails with [`Error::UnsupportedSampleWidth`] for widths other than
    /// 2 and 3 bytes.
    pub fn validate(&self) -> Result<()> {
        match self.bytes_per_sample {
            2 | 3 => {}
            other => return Err(Error::UnsupportedSampleWidth(other)),
        }
        if self.words_per_sample == 0 || self.sample_bytes() > 4 {
            return Err(Error::invalid(format!(
                "{}: {} words of {} bytes do not make a sample",
                self.name, self.words_per_sample, self.bytes_per_sample
            )));
        }
        Ok(())
    }

    /// The same profile placed at `offset` inside a composite frame.
    pub fn at_offset(self, offset: usize) -> Self {
        Self { offset, ..self }
    }
}

/// Builds a [`DeviceProfile`] group by group.
#[derive(Debug, Clone)]
pub struct DeviceProfileBuilder {
    profile: DeviceProfile,
}

impl DeviceProfileBuilder {
    fn new(name: String, bytes_per_sample: usize, sample_rate_hz: u32) -> Self {
        Self {
            profile: DeviceProfile {
                name,
                bytes_per_sample,
                sample_rate_hz,
                samples_per_frame: 1,
                words_per_sample: 1,
                channels: Vec::new(),
                groups: Vec::new(),
                offset: 0,
                order: SampleOrder::default(),
                byte_order: ByteOrder::default(),
            },
        }
    }

    /// Append `count` channels of the same kind and scale as a named group.
    /// Empty groups are dropped.
    pub fn group(mut self, name: &str, kind: ChannelKind, count: usize, scale: f64) -> Self {
        if count == 0 {
            return self;
        }
        let start = self.profile.channels.len();
        self.profile
            .channels
            .extend(std::iter::repeat(ChannelSpec { kind, scale }).take(count));
        self.profile.groups.push(GroupSpec {
            name: name.to_owned(),
            kind,
            channels: start..start + count,
        });
        self
    }

    /// Time-major or channel-major layout.
    pub fn order(mut self, order: SampleOrder) -> Self {
        self.profile.order = order;
        self
    }

    /// Byte order of every word.
    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.profile.byte_order = byte_order;
        self
    }

    /// Set how many samples of each channel one frame carries.
    pub fn samples_per_frame(mut self, samples_per_frame: usize) -> Self {
        self.profile.samples_per_frame = samples_per_frame;
        self
    }

    /// Join `words` consecutive words into each sample.
    pub fn words_per_sample(mut self, words: usize) -> Self {
        self.profile.words_per_sample = words;
        self
    }

    /// Validate and finish the profile.
    pub fn build(self) -> Result<DeviceProfile> {
        self.profile.validate()?;
        if self.profile.samples_per_frame == 0 {
            return Err(Error::invalid(format!(
                "{}: samples_per_frame must be at least 1",
                self.profile.name
            )));
        }
        Ok(self.profile)
    }
}
