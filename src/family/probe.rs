//! Standalone wireless probes: Muovi, Muovi+, Quattro+ and Due+.
//!
//! These dial in to a host listener and are driven by a single command byte
//! with no checksum.

use super::{encode_word, probe_groups, EEG_SCALE, PROBE_TAIL_CHANNELS};
use crate::bitfield::BitField;
use crate::error::Result;
use crate::frame::ConfigFrame;
use crate::plan::{AcquisitionPlan, FrameLayout};
use crate::profile::DeviceProfile;
use serde::{Deserialize, Serialize};

/// The probe command byte.
pub const COMMAND: &[BitField] = &[
    BitField::new("enable", 0, 1),
    BitField::new("mode", 1, 2),
    BitField::new("emg", 3, 1),
];

/// The probe models that share this protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProbeKind {
    /// 32 electrodes
    #[default]
    Muovi,
    /// 64 electrodes
    MuoviPlus,
    /// 4 bipolar channels
    QuattroPlus,
    /// 2 bipolar channels
    DuePlus,
}

impl ProbeKind {
    /// Model name, used as the group name.
    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::Muovi => "Muovi",
            ProbeKind::MuoviPlus => "Muovi+",
            ProbeKind::QuattroPlus => "Quattro+",
            ProbeKind::DuePlus => "Due+",
        }
    }

    /// Electrode channels, without the trailing control channels.
    pub fn electrodes(self) -> usize {
        match self {
            ProbeKind::Muovi => 32,
            ProbeKind::MuoviPlus => 64,
            ProbeKind::QuattroPlus => 4,
            ProbeKind::DuePlus => 2,
        }
    }

    /// Everything the probe streams per sample.
    pub fn channel_count(self) -> usize {
        self.electrodes() + PROBE_TAIL_CHANNELS
    }

    /// Electrode counts to millivolts.
    pub fn scale(self) -> f64 {
        match self {
            ProbeKind::Muovi | ProbeKind::MuoviPlus => 0.000286,
            ProbeKind::QuattroPlus | ProbeKind::DuePlus => 0.000249,
        }
    }

    /// Where the host listens by default.
    pub fn default_address(self) -> &'static str {
        "0.0.0.0:54321"
    }
}

/// Settings for a standalone probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Which probe model
    pub kind: ProbeKind,
    /// Acquisition mode, 0 to 3
    pub mode: u8,
    /// EMG (16 bit, 2 kHz) rather than EEG (24 bit, 500 Hz)
    pub emg: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            kind: ProbeKind::default(),
            mode: 0,
            emg: true,
        }
    }
}

impl ProbeConfig {
    /// The enabled command frame.
    pub fn start_frame(&self) -> Result<ConfigFrame> {
        let values = [1, self.mode as u32, self.emg as u32];
        Ok(ConfigFrame::bare(encode_word(COMMAND, &values, 1)?))
    }

    /// `start` with the enable bit cleared.
    pub fn stop_frame(start: &ConfigFrame) -> ConfigFrame {
        start.with_cleared(0, 0x01)
    }

    /// Bytes per sample and per-channel rate implied by the EMG flag.
    pub fn resolution(emg: bool) -> (usize, u32) {
        if emg {
            (2, 2000)
        } else {
            (3, 500)
        }
    }

    /// Electrode scale for the EMG flag. EEG counts are left unscaled.
    pub fn electrode_scale(emg: bool, emg_scale: f64) -> f64 {
        if emg {
            emg_scale
        } else {
            EEG_SCALE
        }
    }

    /// The channel table of this probe.
    pub fn profile(&self) -> Result<DeviceProfile> {
        let (width, rate) = Self::resolution(self.emg);
        let builder = DeviceProfile::builder(self.kind.name(), width, rate);
        let scale = Self::electrode_scale(self.emg, self.kind.scale());
        probe_groups(builder, self.kind.channel_count(), scale).build()
    }

    /// Start and stop frames and the channel table.
    pub fn plan(&self) -> Result<AcquisitionPlan> {
        let start = self.start_frame()?;
        let stop = Self::stop_frame(&start);
        let profile = self.profile()?;
        let rate = profile.sample_rate_hz;
        Ok(AcquisitionPlan::new(
            vec![start],
            stop,
            FrameLayout::Single(profile),
            rate,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::{has_overlap, unpack};
    use crate::error::Error;

    #[test]
    fn layout_is_disjoint() {
        assert!(!has_overlap(COMMAND));
    }

    #[test]
    fn due_plus_command() {
        let config = ProbeConfig {
            kind: ProbeKind::DuePlus,
            mode: 0,
            emg: true,
        };
        let start = config.start_frame().unwrap();
        assert_eq!(start.as_bytes(), &[0b0000_1001]);
        assert_eq!(ProbeConfig::stop_frame(&start).as_bytes(), &[0b0000_1000]);
        assert_eq!(unpack(COMMAND, 0b0000_1001), vec![1, 0, 1]);
    }

    #[test]
    fn quattro_plus_profile() {
        let config = ProbeConfig {
            kind: ProbeKind::QuattroPlus,
            ..Default::default()
        };
        let plan = config.plan().unwrap();
        assert_eq!(plan.block_size(), 10 * 2 * 125);
        let names: Vec<_> = plan.group_specs().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["EMG", "Quaternions", "Buffer", "Ramp"]);
    }

    #[test]
    fn eeg_mode_is_24_bit() {
        let config = ProbeConfig {
            kind: ProbeKind::Muovi,
            mode: 1,
            emg: false,
        };
        let profile = config.profile().unwrap();
        assert_eq!(profile.bytes_per_sample, 3);
        assert_eq!(profile.sample_rate_hz, 500);
        assert_eq!(profile.channel_count(), 38);
        assert_eq!(config.start_frame().unwrap().as_bytes(), &[0b0000_0011]);
    }

    #[test]
    fn eeg_counts_are_not_scaled() {
        let plan = ProbeConfig {
            kind: ProbeKind::DuePlus,
            mode: 0,
            emg: false,
        }
        .plan()
        .unwrap()
        .with_frames_per_block(1);
        let mut raw = vec![0u8; plan.block_size()];
        // 1000 and -1000 as 24-bit big-endian counts.
        raw[..6].copy_from_slice(&[0x00, 0x03, 0xE8, 0xFF, 0xFC, 0x18]);
        let groups = plan.decode(&raw).unwrap();
        assert_eq!(groups[0].samples.rows(), &[vec![1000.0], vec![-1000.0]]);
    }

    #[test]
    fn mode_out_of_range() {
        let config = ProbeConfig {
            mode: 4,
            ..Default::default()
        };
        assert!(matches!(
            config.plan(),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(config.start_frame().is_err());
    }
}
