//! SyncStation: a hub that multiplexes up to 16 wireless probes over one
//! connection and appends six channels of its own to every frame.

use super::{encode_word, probe_groups, ProbeConfig};
use crate::bitfield::BitField;
use crate::demux::CompositeLayout;
use crate::error::{Error, Result};
use crate::frame::ConfigFrame;
use crate::plan::{AcquisitionPlan, FrameLayout};
use crate::profile::{ChannelKind, DeviceProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The leading control byte.
pub const CONTROL: &[BitField] = &[
    BitField::new("GO", 0, 1),
    BitField::new("device count", 1, 5).with_max(SLOTS as u32),
];

/// One byte per enabled slot.
pub const SLOT: &[BitField] = &[
    BitField::new("enable", 0, 1),
    BitField::new("mode", 1, 2),
    BitField::new("EMG", 3, 1),
    BitField::new("slot", 4, 4),
];

/// Slots on the hub.
pub const SLOTS: usize = 16;

/// Frame rate of the hub, whatever the probes are doing.
pub const FRAME_RATE_HZ: u32 = 2000;

const EMG_SCALE: f64 = 0.000286;

/// Channels streamed by the probe model that fits in each slot: four Muovi,
/// two Muovi+/Sessantaquattro, eight Due+ and two Quattro+.
const SLOT_CHANNELS: [usize; SLOTS] = [38, 38, 38, 38, 70, 70, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8];

fn slot_name(slot: usize) -> &'static str {
    match slot {
        0..=3 => "Muovi",
        4 | 5 => "Muovi+",
        6..=13 => "Due+",
        _ => "Quattro+",
    }
}

/// A probe plugged into the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Zero based slot, 0 to 15
    pub slot: u8,
    /// Acquisition mode, 0 to 3
    #[serde(default)]
    pub mode: u8,
    /// EMG (16 bit) rather than EEG (24 bit)
    #[serde(default = "default_emg")]
    pub emg: bool,
    /// Channels this probe actually streams, when known to differ from the
    /// slot's usual model. Zero keeps the probe in the command but out of
    /// the frame layout.
    #[serde(default)]
    pub channels: Option<usize>,
}

fn default_emg() -> bool {
    true
}

impl SlotConfig {
    /// EMG probe in `slot`, mode 0.
    pub fn new(slot: u8) -> Self {
        Self {
            slot,
            mode: 0,
            emg: true,
            channels: None,
        }
    }

    fn profile(&self) -> Result<DeviceProfile> {
        let slot = self.slot as usize;
        let (width, _) = ProbeConfig::resolution(self.emg);
        let channels = self.channels.unwrap_or(SLOT_CHANNELS[slot]);
        let name = format!("{} {}", slot_name(slot), slot + 1);
        probe_groups(
            DeviceProfile::builder(name, width, FRAME_RATE_HZ),
            channels,
            ProbeConfig::electrode_scale(self.emg, EMG_SCALE),
        )
        .build()
    }
}

/// The probes to start, in any order; frames always follow slot order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStationConfig {
    /// Probes to start
    pub slots: Vec<SlotConfig>,
}

impl SyncStationConfig {
    /// Where the hub listens by default.
    pub const DEFAULT_ADDRESS: &'static str = "192.168.76.1:54320";

    fn sorted_slots(&self) -> Result<Vec<SlotConfig>> {
        if self.slots.is_empty() {
            return Err(Error::invalid("no SyncStation slot is enabled"));
        }
        let mut seen = BTreeSet::new();
        for slot in &self.slots {
            if slot.slot as usize >= SLOTS {
                return Err(Error::invalid(format!(
                    "slot = {} is outside 0..{}",
                    slot.slot, SLOTS
                )));
            }
            if !seen.insert(slot.slot) {
                return Err(Error::invalid(format!("slot {} is listed twice", slot.slot)));
            }
        }
        let mut slots = self.slots.clone();
        slots.sort_by_key(|s| s.slot);
        Ok(slots)
    }

    /// `[n << 1 | GO][one byte per slot][crc]`
    pub fn start_frame(&self) -> Result<ConfigFrame> {
        let slots = self.sorted_slots()?;
        let mut body = encode_word(CONTROL, &[1, slots.len() as u32], 1)?;
        for slot in &slots {
            let values = [1, slot.mode as u32, slot.emg as u32, slot.slot as u32];
            body.extend(encode_word(SLOT, &values, 1)?);
        }
        Ok(ConfigFrame::sealed(body))
    }

    /// Clearing the control byte also zeroes the device count, so the slot
    /// bytes go too: the stop frame is always `[0, crc(0)]`.
    pub fn stop_frame(start: &ConfigFrame) -> ConfigFrame {
        start.with_cleared(0, 0xFF).truncated(1)
    }

    /// The six channels the hub appends to every frame.
    pub fn trailer() -> Result<DeviceProfile> {
        DeviceProfile::builder("SyncStation", 2, FRAME_RATE_HZ)
            .group("AUX", ChannelKind::Control, 3, 1.0)
            .group("Load cell", ChannelKind::Control, 1, 1.0)
            .group("Buffer", ChannelKind::Control, 1, 1.0)
            .group("Ramp", ChannelKind::Control, 1, 1.0)
            .build()
    }

    /// Slot profiles in wire order, then the hub's own channels.
    pub fn layout(&self) -> Result<CompositeLayout> {
        let devices = self
            .sorted_slots()?
            .iter()
            .map(SlotConfig::profile)
            .collect::<Result<Vec<_>>>()?;
        CompositeLayout::new(devices, vec![Self::trailer()?])
    }

    /// Start and stop frames and the composite layout of every slot.
    pub fn plan(&self) -> Result<AcquisitionPlan> {
        let start = self.start_frame()?;
        let stop = Self::stop_frame(&start);
        Ok(AcquisitionPlan::new(
            vec![start],
            stop,
            FrameLayout::Composite(self.layout()?),
            FRAME_RATE_HZ,
        ))
    }
}
