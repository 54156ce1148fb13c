//! Everything a session needs to know about one acquisition: what to send
//! before and after streaming, and how to carve up what comes back.

use crate::decoder::{decode_block, SampleMatrix};
use crate::demux::{ChannelGroup, CompositeLayout};
use crate::error::Result;
use crate::family::default_frames_per_block;
use crate::frame::ConfigFrame;
use crate::profile::DeviceProfile;

/// How the bytes of one frame of the link are arranged.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameLayout {
    /// One device on the connection
    Single(DeviceProfile),
    /// Several sub-devices and a trailer sharing the connection
    Composite(CompositeLayout),
}

impl FrameLayout {
    /// Every segment of a frame in wire order.
    pub fn segments(&self) -> Vec<&DeviceProfile> {
        match self {
            FrameLayout::Single(profile) => vec![profile],
            FrameLayout::Composite(layout) => layout.segments().collect(),
        }
    }

    /// Bytes of one frame of the link.
    pub fn frame_bytes(&self) -> usize {
        match self {
            FrameLayout::Single(profile) => profile.frame_bytes(),
            FrameLayout::Composite(layout) => layout.frame_bytes(),
        }
    }

    /// Decode a block of `frames` frames. A single device comes back split
    /// into its channel groups, a composite link as one group per segment.
    pub fn decode(&self, raw: &[u8], frames: usize) -> Result<Vec<ChannelGroup>> {
        match self {
            FrameLayout::Single(profile) => {
                let rows = decode_block(raw, profile, frames)?.into_rows();
                Ok(profile
                    .groups
                    .iter()
                    .map(|group| ChannelGroup {
                        name: group.name.clone(),
                        sample_rate_hz: profile.sample_rate_hz,
                        samples: SampleMatrix::new(rows[group.channels.clone()].to_vec()),
                    })
                    .collect())
            }
            FrameLayout::Composite(layout) => layout.demultiplex(raw, frames),
        }
    }

    /// Raw bytes for `counts`, one `[channel][time]` matrix per segment.
    pub fn encode(&self, counts: &[Vec<Vec<i32>>], frames: usize) -> Result<Vec<u8>> {
        match self {
            FrameLayout::Single(profile) => {
                let layout = CompositeLayout::new(vec![profile.clone()], vec![])?;
                layout.multiplex(counts, frames)
            }
            FrameLayout::Composite(layout) => layout.multiplex(counts, frames),
        }
    }
}

/// Shape of one decoded group, known before any data arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLayout {
    /// Group name
    pub name: String,
    /// Channels in the group
    pub channels: usize,
    /// Per-channel rate
    pub sample_rate_hz: u32,
}

/// The frames and layout of one acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPlan {
    /// Sent in order once the link is up
    pub start: Vec<ConfigFrame>,
    /// Sent before the link is closed
    pub stop: ConfigFrame,
    /// How frames are split into segments
    pub layout: FrameLayout,
    /// Frames per second on the link
    pub frame_rate_hz: u32,
    /// Frames decoded together
    pub frames_per_block: usize,
}

impl AcquisitionPlan {
    /// A plan reading about a sixteenth of a second per block.
    pub fn new(
        start: Vec<ConfigFrame>,
        stop: ConfigFrame,
        layout: FrameLayout,
        frame_rate_hz: u32,
    ) -> Self {
        Self {
            start,
            stop,
            layout,
            frame_rate_hz,
            frames_per_block: default_frames_per_block(frame_rate_hz),
        }
    }

    /// Override the block length. Never less than one frame.
    pub fn with_frames_per_block(mut self, frames: usize) -> Self {
        self.frames_per_block = frames.max(1);
        self
    }

    /// Bytes the transport has to collect before a block can be decoded.
    pub fn block_size(&self) -> usize {
        self.layout.frame_bytes() * self.frames_per_block
    }

    /// The groups [`Self::decode`] produces, in the same order.
    pub fn group_specs(&self) -> Vec<GroupLayout> {
        match &self.layout {
            FrameLayout::Single(profile) => profile
                .groups
                .iter()
                .map(|group| GroupLayout {
                    name: group.name.clone(),
                    channels: group.channels.len(),
                    sample_rate_hz: profile.sample_rate_hz,
                })
                .collect(),
            FrameLayout::Composite(layout) => layout
                .segments()
                .map(|profile| GroupLayout {
                    name: profile.name.clone(),
                    channels: profile.channel_count(),
                    sample_rate_hz: profile.sample_rate_hz,
                })
                .collect(),
        }
    }

    /// Decode one block of [`Self::block_size`] bytes.
    pub fn decode(&self, raw: &[u8]) -> Result<Vec<ChannelGroup>> {
        self.layout.decode(raw, self.frames_per_block)
    }
}
