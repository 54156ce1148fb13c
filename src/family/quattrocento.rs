//! Quattrocento: a 400 channel bench amplifier. The host dials in and sends
//! a 40 byte configuration; samples come back as little-endian 16 bit words.

use super::encode_word;
use crate::bitfield::BitField;
use crate::error::{Error, Result};
use crate::frame::ConfigFrame;
use crate::plan::{AcquisitionPlan, FrameLayout};
use crate::profile::{ByteOrder, ChannelKind, DeviceProfile};
use serde::{Deserialize, Serialize};

/// Byte 0. Bit 7 is always set.
pub const CONTROL: &[BitField] = &[
    BitField::new("ACQ_ON", 0, 1),
    BitField::new("NCH", 1, 2),
    BitField::new("FSAMP", 3, 2),
    BitField::new("TRIG", 5, 1),
    BitField::new("DECIM", 6, 1),
];

/// Byte 1.
pub const ANALOG_OUT: &[BitField] = &[
    BitField::new("source", 0, 4),
    BitField::new("gain", 4, 2),
];

/// Second byte of each input.
pub const SENSOR: &[BitField] = &[
    BitField::new("adapter", 0, 3),
    BitField::new("sensor", 3, 5),
];

/// Third byte of each input.
pub const FILTERS: &[BitField] = &[
    BitField::new("mode", 0, 2),
    BitField::new("LPF", 2, 2),
    BitField::new("HPF", 4, 2),
    BitField::new("side", 6, 2),
];

/// Eight single inputs and four multiple inputs.
pub const INPUTS: usize = 12;

/// Length of every command frame, checksum included.
pub const FRAME_LEN: usize = 40;

const HEADER: u8 = 0x80;
const TRIGGER: u8 = 0x20;
const SAMPLE_RATES: [u32; 4] = [512, 2048, 5120, 10240];
const CHANNELS: [usize; 4] = [120, 216, 312, 408];
const AUX_CHANNELS: usize = 16;
const ACCESSORY_CHANNELS: usize = 8;

/// Counts to millivolts on the EMG inputs.
pub const EMG_SCALE: f64 = 5.0 / 65536.0 / 150.0 * 1000.0;

/// Counts to volts on the AUX inputs.
pub const AUX_SCALE: f64 = 5.0 / 65536.0 / 0.5;

/// Settings of one input connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuattrocentoInput {
    /// Muscle code, 0 to 127
    pub muscle: u8,
    /// Sensor code, 0 to 31
    pub sensor: u8,
    /// Adapter code, 0 to 7
    pub adapter: u8,
    /// Side code, 0 to 3
    pub side: u8,
    /// High-pass filter code, 0 to 3
    pub hpf: u8,
    /// Low-pass filter code, 0 to 3
    pub lpf: u8,
    /// Monopolar, differential or bipolar
    pub mode: u8,
}

impl Default for QuattrocentoInput {
    fn default() -> Self {
        Self {
            muscle: 0,
            sensor: 0,
            adapter: 0,
            side: 0,
            hpf: 1,
            lpf: 1,
            mode: 0,
        }
    }
}

impl QuattrocentoInput {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![self.muscle];
        bytes.extend(encode_word(
            SENSOR,
            &[self.adapter as u32, self.sensor as u32],
            1,
        )?);
        bytes.extend(encode_word(
            FILTERS,
            &[
                self.mode as u32,
                self.lpf as u32,
                self.hpf as u32,
                self.side as u32,
            ],
            1,
        )?);
        Ok(bytes)
    }
}

/// Everything in a Quattrocento configuration frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuattrocentoConfig {
    /// Decimate from the internal 10240 Hz instead of sampling directly
    pub decim: bool,
    /// Sampling frequency code, 0 to 3
    pub fsamp: u8,
    /// Channel count code, 0 to 3
    pub nch: u8,
    /// Which input drives the analog output
    pub an_out_source: u8,
    /// Analog output gain code, 0 to 3
    pub an_out_gain: u8,
    /// Channel routed to the analog output
    pub an_out_channel: u8,
    /// IN1 to IN8 then MULTIPLE IN1 to IN4; missing entries use defaults
    pub inputs: Vec<QuattrocentoInput>,
}

impl Default for QuattrocentoConfig {
    fn default() -> Self {
        Self {
            decim: true,
            fsamp: 3,
            nch: 3,
            an_out_source: 9,
            an_out_gain: 0,
            an_out_channel: 0,
            inputs: vec![QuattrocentoInput::default(); INPUTS],
        }
    }
}

impl QuattrocentoConfig {
    /// Where the amplifier listens by default.
    pub const DEFAULT_ADDRESS: &'static str = "169.254.1.10:23456";

    /// Per-channel rate selected by `fsamp`.
    pub fn sample_rate_hz(&self) -> u32 {
        SAMPLE_RATES[(self.fsamp as usize).min(3)]
    }

    /// Channels streamed for `nch`, including AUX and accessory channels.
    pub fn channel_count(&self) -> usize {
        CHANNELS[(self.nch as usize).min(3)]
    }

    /// The 40 byte configuration with acquisition on.
    pub fn start_frame(&self) -> Result<ConfigFrame> {
        if self.inputs.len() > INPUTS {
            return Err(Error::invalid(format!(
                "{} inputs configured, the amplifier has {}",
                self.inputs.len(),
                INPUTS
            )));
        }
        let control = [
            1,
            self.nch as u32,
            self.fsamp as u32,
            0,
            self.decim as u32,
        ];
        let mut body = encode_word(CONTROL, &control, 1)?;
        body[0] |= HEADER;
        body.extend(encode_word(
            ANALOG_OUT,
            &[self.an_out_source as u32, self.an_out_gain as u32],
            1,
        )?);
        body.push(self.an_out_channel);

        let default = QuattrocentoInput::default();
        for i in 0..INPUTS {
            body.extend(self.inputs.get(i).unwrap_or(&default).encode()?);
        }
        Ok(ConfigFrame::sealed(body))
    }

    /// `start` with the trigger forced high. Sent after the start frame.
    pub fn trigger_frame(start: &ConfigFrame) -> ConfigFrame {
        start.with_set(0, TRIGGER)
    }

    /// Everything but the fixed header bit cleared from byte 0.
    pub fn stop_frame(start: &ConfigFrame) -> ConfigFrame {
        start.with_cleared(0, !HEADER)
    }

    /// EMG inputs, then AUX, then the accessory channels (ramp, buffer...).
    pub fn profile(&self) -> Result<DeviceProfile> {
        let emg = self.channel_count() - AUX_CHANNELS - ACCESSORY_CHANNELS;
        DeviceProfile::builder("Quattrocento", 2, self.sample_rate_hz())
            .group("EMG", ChannelKind::Bioelectric, emg, EMG_SCALE)
            .group("AUX", ChannelKind::Auxiliary, AUX_CHANNELS, AUX_SCALE)
            .group("Accessory", ChannelKind::Control, ACCESSORY_CHANNELS, 1.0)
            .byte_order(ByteOrder::Little)
            .build()
    }

    /// Start and trigger frames, stop frame and channel table.
    pub fn plan(&self) -> Result<AcquisitionPlan> {
        let start = self.start_frame()?;
        let trigger = Self::trigger_frame(&start);
        let stop = Self::stop_frame(&start);
        Ok(AcquisitionPlan::new(
            vec![start, trigger],
            stop,
            FrameLayout::Single(self.profile()?),
            self.sample_rate_hz(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::has_overlap;
    use crate::checksum::checksum;

    #[test]
    fn layouts_are_disjoint() {
        for layout in [CONTROL, ANALOG_OUT, SENSOR, FILTERS] {
            assert!(!has_overlap(layout));
        }
    }

    #[test]
    fn default_frame() {
        let start = QuattrocentoConfig::default().start_frame().unwrap();
        assert_eq!(start.len(), FRAME_LEN);
        assert_eq!(start.as_bytes()[0], 0b1000_0000 + 64 + 24 + 6 + 1);
        assert_eq!(start.as_bytes()[1], 9);
        for input in 0..INPUTS {
            assert_eq!(&start.as_bytes()[3 + 3 * input..6 + 3 * input], &[0, 0, 0b0001_0100]);
        }
        assert_eq!(start.as_bytes()[39], checksum(&start.as_bytes()[..39]));
    }

    #[test]
    fn trigger_and_stop() {
        let start = QuattrocentoConfig::default().start_frame().unwrap();
        let trigger = QuattrocentoConfig::trigger_frame(&start);
        assert_eq!(trigger.as_bytes()[0], start.as_bytes()[0] | 0x20);
        assert!(trigger.is_consistent());

        let stop = QuattrocentoConfig::stop_frame(&start);
        assert_eq!(stop.as_bytes()[0], 0x80);
        assert_eq!(stop.body()[1..], start.body()[1..]);
        assert!(stop.is_consistent());
    }

    #[test]
    fn input_fields() {
        let mut config = QuattrocentoConfig::default();
        config.inputs[2] = QuattrocentoInput {
            muscle: 7,
            sensor: 3,
            adapter: 2,
            side: 1,
            hpf: 2,
            lpf: 3,
            mode: 1,
        };
        let start = config.start_frame().unwrap();
        assert_eq!(
            &start.as_bytes()[9..12],
            &[7, 3 << 3 | 2, 1 << 6 | 2 << 4 | 3 << 2 | 1]
        );
    }

    #[test]
    fn plan_sizes() {
        let plan = QuattrocentoConfig::default().plan().unwrap();
        assert_eq!(plan.start.len(), 2);
        assert_eq!(plan.block_size(), 408 * 2 * 640);
        let config = QuattrocentoConfig {
            fsamp: 1,
            nch: 0,
            ..Default::default()
        };
        let plan = config.plan().unwrap();
        assert_eq!(plan.block_size(), 120 * 2 * 128);
        let sizes: Vec<_> = plan.group_specs().iter().map(|g| g.channels).collect();
        assert_eq!(sizes, vec![96, 16, 8]);
    }

    #[test]
    fn out_of_domain() {
        let mut config = QuattrocentoConfig {
            nch: 4,
            ..Default::default()
        };
        assert!(matches!(
            config.start_frame(),
            Err(Error::InvalidConfiguration(_))
        ));
        config.nch = 3;
        config.inputs[0].sensor = 32;
        assert!(config.plan().is_err());
        config.inputs[0].sensor = 0;
        config.inputs.push(QuattrocentoInput::default());
        assert!(config.plan().is_err());
    }
}
