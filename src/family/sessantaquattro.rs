//! Sessantaquattro+: a 64 channel amplifier that dials in to the host and
//! takes a bare two byte command word.

use super::encode_word;
use crate::bitfield::BitField;
use crate::error::Result;
use crate::frame::ConfigFrame;
use crate::plan::{AcquisitionPlan, FrameLayout};
use crate::profile::{ChannelKind, DeviceProfile};
use serde::{Deserialize, Serialize};

/// The 16 bit command word, sent big-endian.
pub const COMMAND: &[BitField] = &[
    BitField::new("GO", 0, 1),
    BitField::new("REC", 1, 1),
    BitField::new("TRIG", 2, 2),
    BitField::new("EXTEN", 4, 2),
    BitField::new("HPF", 6, 1),
    BitField::new("HRES", 7, 1),
    BitField::new("MODE", 8, 3),
    BitField::new("NCH", 11, 2),
    BitField::new("FSAMP", 13, 2),
];

/// Mode that turns the inputs into accelerometer channels.
const ACCELEROMETER_MODE: u8 = 3;

/// Mode that pairs electrodes into bipolar derivations.
const BIPOLAR_MODE: u8 = 1;

const EMG_SCALE: f64 = 0.000286;
const AUX_SCALE: f64 = 0.00014648;

/// Acquisition settings, named after the fields of the command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessantaquattroConfig {
    /// Sampling frequency code, 0 to 3
    pub fsamp: u8,
    /// Channel count code, 0 to 3
    pub nch: u8,
    /// Working mode, 0 to 7
    pub mode: u8,
    /// 24 bit samples instead of 16 bit
    pub hres: bool,
    /// High-pass filter
    pub hpf: bool,
    /// Extension factor code, 0 to 3
    pub exten: u8,
    /// Trigger source code, 0 to 3
    pub trig: u8,
    /// Record to the device's own memory card as well
    pub rec: bool,
}

impl Default for SessantaquattroConfig {
    fn default() -> Self {
        Self {
            fsamp: 2,
            nch: 3,
            mode: 0,
            hres: false,
            hpf: false,
            exten: 0,
            trig: 0,
            rec: false,
        }
    }
}

impl SessantaquattroConfig {
    /// Where the host listens by default.
    pub const DEFAULT_ADDRESS: &'static str = "0.0.0.0:45454";

    /// Channels streamed for the configured NCH and MODE, including the
    /// two AUX inputs and the control channels.
    pub fn channel_count(&self) -> usize {
        let bipolar = self.mode == BIPOLAR_MODE;
        match (self.nch, bipolar) {
            (0, true) => 12,
            (0, false) => 16,
            (1, true) => 16,
            (1, false) => 24,
            (2, true) => 24,
            (2, false) => 40,
            (_, true) => 40,
            (_, false) => 72,
        }
    }

    /// Per-channel sampling frequency for the configured FSAMP and MODE.
    pub fn sample_rate_hz(&self) -> u32 {
        let table = if self.mode == ACCELEROMETER_MODE {
            [2000, 4000, 8000, 16000]
        } else {
            [500, 1000, 2000, 4000]
        };
        table[(self.fsamp as usize).min(3)]
    }

    fn word(&self, go: bool) -> Result<Vec<u8>> {
        let values = [
            go as u32,
            self.rec as u32,
            self.trig as u32,
            self.exten as u32,
            self.hpf as u32,
            self.hres as u32,
            self.mode as u32,
            self.nch as u32,
            self.fsamp as u32,
        ];
        encode_word(COMMAND, &values, 2)
    }

    /// The command word with GO set.
    pub fn start_frame(&self) -> Result<ConfigFrame> {
        Ok(ConfigFrame::bare(self.word(true)?))
    }

    /// `start` with GO cleared. GO lives in the low byte, which comes last.
    pub fn stop_frame(start: &ConfigFrame) -> ConfigFrame {
        start.with_cleared(1, 0x01)
    }

    /// The channel table for `nch`.
    pub fn profile(&self) -> Result<DeviceProfile> {
        let width = if self.hres { 3 } else { 2 };
        let channels = self.channel_count();
        DeviceProfile::builder("Sessantaquattro+", width, self.sample_rate_hz())
            .group("EMG", ChannelKind::Bioelectric, channels - 8, EMG_SCALE)
            .group("AUX", ChannelKind::Auxiliary, 2, AUX_SCALE)
            .group("Quaternions", ChannelKind::Control, 4, 1.0)
            .group("Buffer", ChannelKind::Control, 1, 1.0)
            .group("Ramp", ChannelKind::Control, 1, 1.0)
            .build()
    }

    /// Start and stop words and the channel table.
    pub fn plan(&self) -> Result<AcquisitionPlan> {
        let start = self.start_frame()?;
        let stop = Self::stop_frame(&start);
        Ok(AcquisitionPlan::new(
            vec![start],
            stop,
            FrameLayout::Single(self.profile()?),
            self.sample_rate_hz(),
        ))
    }
}
