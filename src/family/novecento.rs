//! Novecento: ten probe inputs, each with its own rate, behind one
//! connection. Which probe sits on which input is only known after the
//! probe settings handshake, so the frame layout is built from its answer.

use super::{encode_word, probe_groups};
use crate::bitfield::BitField;
use crate::demux::CompositeLayout;
use crate::error::{Error, Result};
use crate::frame::ConfigFrame;
use crate::handshake::{ProbeSettings, INPUTS};
use crate::plan::{AcquisitionPlan, FrameLayout};
use crate::profile::{ByteOrder, ChannelKind, DeviceProfile, DeviceProfileBuilder};
use serde::{Deserialize, Serialize};

/// Byte 0. Bit 7 is always set.
pub const CONTROL: &[BitField] = &[
    BitField::new("IN9", 0, 1),
    BitField::new("IN10", 1, 1),
    BitField::new("AUX FSAMP", 4, 2),
];

/// Byte 1: one enable bit per input, IN1 in bit 0.
pub const ENABLE: &[BitField] = &[
    BitField::new("IN1", 0, 1),
    BitField::new("IN2", 1, 1),
    BitField::new("IN3", 2, 1),
    BitField::new("IN4", 3, 1),
    BitField::new("IN5", 4, 1),
    BitField::new("IN6", 5, 1),
    BitField::new("IN7", 6, 1),
    BitField::new("IN8", 7, 1),
];

/// Byte 2.
pub const ANALOG_OUT: &[BitField] = &[
    BitField::new("source", 0, 4),
    BitField::new("gain", 4, 2),
];

/// Bytes 4 to 13, one per input.
pub const INPUT: &[BitField] = &[
    BitField::new("FSAMP", 0, 2),
    BitField::new("HRES", 2, 1),
    BitField::new("HPF", 3, 1),
    BitField::new("gain", 4, 2),
    BitField::new("mode", 6, 2),
];

/// Length of the command frame, checksum included.
pub const FRAME_LEN: usize = 15;

/// Every frame of the stream covers this much time.
pub const FRAME_RATE_HZ: u32 = 500;

const HEADER: u8 = 0x80;
const SAMPLE_RATES: [u32; 4] = [500, 2000, 4000, 8000];
const AUX_CHANNELS: usize = 16;
/// 32-bit channels, each sent as two 16-bit words.
const ACCESSORY_CHANNELS: usize = 4;
const ACCESSORY_RATE_HZ: u32 = 8000;

const EMG_SCALE: f64 = 0.0002861;
const AUX_SCALE: f64 = 5.0 / 65536.0 / 0.5;

/// Settings of one probe input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NovecentoInput {
    /// Whether the input streams
    pub active: bool,
    /// Working mode, 0 to 3
    pub mode: u8,
    /// Gain code, 0 to 3
    pub gain: u8,
    /// High-pass filter
    pub hpf: bool,
    /// 32 bit samples
    pub hres: bool,
    /// Sampling frequency code, 0 to 3
    pub fsamp: u8,
}

impl Default for NovecentoInput {
    fn default() -> Self {
        Self {
            active: false,
            mode: 0,
            gain: 0,
            hpf: true,
            hres: false,
            fsamp: 1,
        }
    }
}

impl NovecentoInput {
    /// Per-channel rate of this input.
    pub fn sample_rate_hz(&self) -> u32 {
        SAMPLE_RATES[(self.fsamp as usize).min(3)]
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let values = [
            self.fsamp as u32,
            self.hres as u32,
            self.hpf as u32,
            self.gain as u32,
            self.mode as u32,
        ];
        encode_word(INPUT, &values, 1)
    }

    fn profile(&self, name: String, channels: usize) -> Result<DeviceProfile> {
        if self.hres {
            // High resolution inputs stream 32 bit words.
            return Err(Error::UnsupportedSampleWidth(4));
        }
        let rate = self.sample_rate_hz();
        let builder = DeviceProfile::builder(name, 2, rate)
            .byte_order(ByteOrder::Little)
            .samples_per_frame((rate / FRAME_RATE_HZ) as usize);
        probe_groups(builder, channels, EMG_SCALE).build()
    }
}

/// Everything in a Novecento command frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NovecentoConfig {
    /// Sampling frequency code of the AUX channels, 0 to 3
    pub aux_fsamp: u8,
    /// Which input drives the analog output
    pub an_out_source: u8,
    /// Analog output gain code, 0 to 3
    pub an_out_gain: u8,
    /// Channel routed to the analog output
    pub an_out_channel: u8,
    /// IN1 to IN10; missing entries are inactive
    pub inputs: Vec<NovecentoInput>,
}

impl Default for NovecentoConfig {
    fn default() -> Self {
        let mut inputs = vec![NovecentoInput::default(); INPUTS];
        inputs[0].active = true;
        Self {
            aux_fsamp: 0,
            an_out_source: 2,
            an_out_gain: 2,
            an_out_channel: 1,
            inputs,
        }
    }
}

impl NovecentoConfig {
    /// Where the device listens by default.
    pub const DEFAULT_ADDRESS: &'static str = "169.254.1.10:23456";

    fn input(&self, i: usize) -> NovecentoInput {
        self.inputs.get(i).copied().unwrap_or_default()
    }

    /// The 15 byte command frame.
    pub fn start_frame(&self) -> Result<ConfigFrame> {
        if self.inputs.len() > INPUTS {
            return Err(Error::invalid(format!(
                "{} inputs configured, the device has {}",
                self.inputs.len(),
                INPUTS
            )));
        }
        let active = |i: usize| self.input(i).active as u32;

        let mut body = encode_word(
            CONTROL,
            &[active(8), active(9), self.aux_fsamp as u32],
            1,
        )?;
        body[0] |= HEADER;
        let enabled: Vec<u32> = (0..8).map(active).collect();
        body.extend(encode_word(ENABLE, &enabled, 1)?);
        body.extend(encode_word(
            ANALOG_OUT,
            &[self.an_out_source as u32, self.an_out_gain as u32],
            1,
        )?);
        body.push(self.an_out_channel);
        for i in 0..INPUTS {
            body.extend(self.input(i).encode()?);
        }
        Ok(ConfigFrame::sealed(body))
    }

    /// `start` with byte 0 cleared entirely.
    pub fn stop_frame(start: &ConfigFrame) -> ConfigFrame {
        start.with_cleared(0, 0xFF)
    }

    /// The AUX inputs and the accessory port, appended to every frame.
    pub fn trailer(&self) -> Result<Vec<DeviceProfile>> {
        let aux_rate = SAMPLE_RATES[(self.aux_fsamp as usize).min(3)];
        let segment = |name: &str, rate: u32| -> DeviceProfileBuilder {
            DeviceProfile::builder(name, 2, rate)
                .byte_order(ByteOrder::Little)
                .samples_per_frame((rate / FRAME_RATE_HZ) as usize)
        };
        Ok(vec![
            segment("AUX", aux_rate)
                .group("AUX", ChannelKind::Auxiliary, AUX_CHANNELS, AUX_SCALE)
                .build()?,
            segment("Accessory", ACCESSORY_RATE_HZ)
                .words_per_sample(2)
                .group("Accessory", ChannelKind::Control, ACCESSORY_CHANNELS, 1.0)
                .build()?,
        ])
    }

    /// Active inputs in order, sized by the probes the device reported.
    /// Inputs without a probe stay in the list with no channels and are
    /// dropped by the layout.
    pub fn layout(&self, probes: &ProbeSettings) -> Result<CompositeLayout> {
        let devices = (0..INPUTS)
            .filter(|&i| self.input(i).active)
            .map(|i| {
                self.input(i)
                    .profile(format!("IN {}", i + 1), probes.channels(i))
            })
            .collect::<Result<Vec<_>>>()?;
        CompositeLayout::new(devices, self.trailer()?)
    }

    /// Start and stop frames and a layout sized by the reported probes.
    pub fn plan(&self, probes: &ProbeSettings) -> Result<AcquisitionPlan> {
        let start = self.start_frame()?;
        let stop = Self::stop_frame(&start);
        Ok(AcquisitionPlan::new(
            vec![start],
            stop,
            FrameLayout::Composite(self.layout(probes)?),
            FRAME_RATE_HZ,
        ))
    }
}
