//! Command encoders and channel tables for each supported device family.
//!
//! Every family is a plain configuration record plus a few `BitField`
//! tables. Turning a record into bytes, checking field domains and deriving
//! the stop frame all go through the shared [`bitfield`](crate::bitfield) and
//! [`frame`](crate::frame) code; nothing here builds a command by hand.

pub mod novecento;
pub mod probe;
pub mod quattrocento;
pub mod sessantaquattro;
pub mod syncstation;

pub use novecento::{NovecentoConfig, NovecentoInput};
pub use probe::{ProbeConfig, ProbeKind};
pub use quattrocento::{QuattrocentoConfig, QuattrocentoInput};
pub use sessantaquattro::SessantaquattroConfig;
pub use syncstation::{SlotConfig, SyncStationConfig};

use crate::bitfield::{pack, word_to_bytes, BitField};
use crate::error::Result;
use crate::profile::{ChannelKind, DeviceProfileBuilder};

/// 24-bit EEG counts are passed through as they arrive.
pub(crate) const EEG_SCALE: f64 = 1.0;

/// Channels every probe appends after its electrodes.
pub(crate) const PROBE_TAIL_CHANNELS: usize = 6;

/// Pack `values` with `layout` and serialize the word into `width` bytes.
pub(crate) fn encode_word(layout: &[BitField], values: &[u32], width: usize) -> Result<Vec<u8>> {
    Ok(word_to_bytes(pack(layout, values)?, width))
}

/// EMG electrodes followed by the quaternion, buffer and ramp channels that
/// every wireless probe streams.
pub(crate) fn probe_groups(
    builder: DeviceProfileBuilder,
    channels: usize,
    scale: f64,
) -> DeviceProfileBuilder {
    let electrodes = channels.saturating_sub(PROBE_TAIL_CHANNELS);
    let tail = channels - electrodes;
    builder
        .group("EMG", ChannelKind::Bioelectric, electrodes, scale)
        .group("Quaternions", ChannelKind::Control, tail.min(4), 1.0)
        .group("Buffer", ChannelKind::Control, tail.saturating_sub(4).min(1), 1.0)
        .group("Ramp", ChannelKind::Control, tail.saturating_sub(5), 1.0)
}

/// Roughly 16 blocks per second, never less than one frame.
pub(crate) fn default_frames_per_block(frame_rate_hz: u32) -> usize {
    (frame_rate_hz as usize / 16).max(1)
}
