//! Turns raw sample bytes into scaled physical values, and back.
//!
//! Samples are two's-complement integers of 2 or 3 bytes. Rust has no 24-bit
//! integer, so the sign is recovered by hand: a magnitude at or above half the
//! representable range is negative, and the full range is subtracted.

use crate::component::Component;
use crate::demux::ChannelGroup;
use crate::error::{Error, Result};
use crate::plan::{AcquisitionPlan, FrameLayout};
use crate::profile::{ByteOrder, DeviceProfile, SampleOrder};
use log::info;
use std::fmt;

/// A `[channel][time]` matrix of decoded values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleMatrix {
    rows: Vec<Vec<f64>>,
}

impl SampleMatrix {
    /// Wrap rows that all have the same length.
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        debug_assert!(rows.windows(2).all(|w| w[0].len() == w[1].len()));
        Self { rows }
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.rows.len()
    }

    /// Samples in each channel.
    pub fn samples_per_channel(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// The samples of one channel, oldest first.
    pub fn row(&self, channel: usize) -> Option<&[f64]> {
        self.rows.get(channel).map(Vec::as_slice)
    }

    /// Every channel, oldest sample first.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Take the rows out of the matrix.
    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.rows
    }

    /// The values of every channel at one instant.
    pub fn column(&self, sample: usize) -> Option<Vec<f64>> {
        self.rows.iter().map(|row| row.get(sample).copied()).collect()
    }
}

/// Half of the representable range for a sample `bytes` bytes wide.
fn half_range(bytes: usize) -> i64 {
    1i64 << (8 * bytes - 1)
}

/// Two's complement over the low `bytes` bytes of `raw`.
fn sign_extend(raw: u32, bytes: usize) -> i32 {
    let raw = raw as i64;
    let value = if raw >= half_range(bytes) {
        raw - 2 * half_range(bytes)
    } else {
        raw
    };
    value as i32
}

/// Reinterpret an unsigned magnitude of `width` bytes as two's complement.
pub fn to_signed(raw: u32, width: usize) -> Result<i32> {
    match width {
        2 | 3 => Ok(sign_extend(raw, width)),
        other => Err(Error::UnsupportedSampleWidth(other)),
    }
}

/// Combine the bytes of one word into an unsigned magnitude.
fn read_magnitude(bytes: &[u8], byte_order: ByteOrder) -> u32 {
    let fold = |acc: u32, &b: &u8| (acc << 8) | b as u32;
    match byte_order {
        ByteOrder::Big => bytes.iter().fold(0, fold),
        ByteOrder::Little => bytes.iter().rev().fold(0, fold),
    }
}

/// Join the words of one sample, lowest word first.
fn read_sample(bytes: &[u8], width: usize, byte_order: ByteOrder) -> u32 {
    bytes
        .chunks(width)
        .enumerate()
        .fold(0, |acc, (k, word)| {
            acc | read_magnitude(word, byte_order) << (8 * width * k)
        })
}

/// The inverse of [`read_sample`] followed by [`sign_extend`]. `out` holds
/// every word of the sample.
fn write_count(count: i32, width: usize, byte_order: ByteOrder, out: &mut [u8]) -> Result<()> {
    let bytes = out.len();
    let half = half_range(bytes);
    let count = count as i64;
    if count < -half || count >= half {
        return Err(Error::invalid(format!(
            "count {count} does not fit in {bytes} bytes"
        )));
    }
    let magnitude = count.rem_euclid(2 * half) as u64;
    for (k, word) in out.chunks_mut(width).enumerate() {
        let part = (magnitude >> (8 * width * k)) as u32;
        let be = part.to_be_bytes();
        let be = &be[4 - width..];
        match byte_order {
            ByteOrder::Big => word.copy_from_slice(be),
            ByteOrder::Little => word
                .iter_mut()
                .zip(be.iter().rev())
                .for_each(|(o, b)| *o = *b),
        }
    }
    Ok(())
}

/// Position of one sample of one channel of a profile inside a block.
///
/// `frame_bytes` is the size of a whole frame of the link (all segments),
/// `frames` the number of frames in the block.
fn sample_position(
    profile: &DeviceProfile,
    frame_bytes: usize,
    frames: usize,
    channel: usize,
    sample: usize,
) -> usize {
    let width = profile.sample_bytes();
    let channels = profile.channel_count();
    match profile.order {
        SampleOrder::TimeMajor => {
            let frame = sample / profile.samples_per_frame;
            let sub = sample % profile.samples_per_frame;
            frame * frame_bytes + profile.offset + (sub * channels + channel) * width
        }
        SampleOrder::ChannelMajor => {
            let per_channel = profile.samples_per_block(frames);
            profile.offset * frames + (channel * per_channel + sample) * width
        }
    }
}

/// Decode the part of `raw` that belongs to `profile`. The caller has
/// already checked `raw.len() == frame_bytes * frames`.
pub(crate) fn decode_segment(
    raw: &[u8],
    profile: &DeviceProfile,
    frame_bytes: usize,
    frames: usize,
) -> Result<SampleMatrix> {
    profile.validate()?;
    let width = profile.bytes_per_sample;
    let bytes = profile.sample_bytes();
    let samples = profile.samples_per_block(frames);

    let rows = profile
        .channels
        .iter()
        .enumerate()
        .map(|(channel, spec)| {
            (0..samples)
                .map(|sample| {
                    let pos = sample_position(profile, frame_bytes, frames, channel, sample);
                    let magnitude = read_sample(&raw[pos..pos + bytes], width, profile.byte_order);
                    spec.apply(sign_extend(magnitude, bytes))
                })
                .collect::<Vec<f64>>()
        })
        .collect();

    Ok(SampleMatrix::new(rows))
}

/// Encode raw counts for `profile` into its part of `out`.
pub(crate) fn encode_segment(
    counts: &[Vec<i32>],
    profile: &DeviceProfile,
    frame_bytes: usize,
    frames: usize,
    out: &mut [u8],
) -> Result<()> {
    profile.validate()?;
    let width = profile.bytes_per_sample;
    let bytes = profile.sample_bytes();
    let samples = profile.samples_per_block(frames);
    if counts.len() != profile.channel_count() || counts.iter().any(|c| c.len() != samples) {
        return Err(Error::invalid(format!(
            "{}: expected {} channels of {} samples",
            profile.name,
            profile.channel_count(),
            samples
        )));
    }

    for (channel, row) in counts.iter().enumerate() {
        for (sample, &count) in row.iter().enumerate() {
            let pos = sample_position(profile, frame_bytes, frames, channel, sample);
            write_count(count, width, profile.byte_order, &mut out[pos..pos + bytes])?;
        }
    }
    Ok(())
}

/// Decode a standalone block of `frames` frames.
///
/// The block must be exactly `profile.block_size(frames)` bytes; otherwise
/// nothing is decoded and [`Error::FrameSizeMismatch`] is returned.
pub fn decode_block(raw: &[u8], profile: &DeviceProfile, frames: usize) -> Result<SampleMatrix> {
    profile.validate()?;
    let expected = profile.block_size(frames);
    if raw.len() != expected {
        return Err(Error::FrameSizeMismatch {
            expected,
            actual: raw.len(),
        });
    }
    let standalone = DeviceProfile {
        offset: 0,
        ..profile.clone()
    };
    decode_segment(raw, &standalone, profile.frame_bytes(), frames)
}

/// Decode a standalone block, inferring the number of frames from its
/// length. The length must be a non-zero multiple of the frame size.
pub fn decode(raw: &[u8], profile: &DeviceProfile) -> Result<SampleMatrix> {
    profile.validate()?;
    let frame_bytes = profile.frame_bytes();
    if frame_bytes == 0 || raw.is_empty() || raw.len() % frame_bytes != 0 {
        return Err(Error::FrameSizeMismatch {
            expected: frame_bytes * (raw.len() / frame_bytes.max(1)).max(1),
            actual: raw.len(),
        });
    }
    decode_block(raw, profile, raw.len() / frame_bytes)
}

/// Encode `counts` (`[channel][time]`) as a standalone block.
pub fn encode(counts: &[Vec<i32>], profile: &DeviceProfile) -> Result<Vec<u8>> {
    profile.validate()?;
    let samples = counts.first().map_or(0, Vec::len);
    if samples % profile.samples_per_frame != 0 {
        return Err(Error::invalid(format!(
            "{} samples do not fill whole frames of {}",
            samples, profile.samples_per_frame
        )));
    }
    let frames = samples / profile.samples_per_frame;
    let standalone = DeviceProfile {
        offset: 0,
        ..profile.clone()
    };
    let mut out = vec![0u8; profile.block_size(frames)];
    encode_segment(counts, &standalone, profile.frame_bytes(), frames, &mut out)?;
    Ok(out)
}

/// Decodes raw blocks of one plan on its own pipeline thread.
pub struct BlockDecoder {
    layout: FrameLayout,
    frames: usize,
    decoded: usize,
    failed: usize,
}

impl BlockDecoder {
    /// A decoder for the blocks of `plan`.
    pub fn new(plan: &AcquisitionPlan) -> Self {
        Self {
            layout: plan.layout.clone(),
            frames: plan.frames_per_block,
            decoded: 0,
            failed: 0,
        }
    }
}

impl fmt::Display for BlockDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockDecoder")
    }
}

impl Component for BlockDecoder {
    type InData = Vec<u8>;
    type OutData = Result<Vec<ChannelGroup>>;

    fn convert(&mut self, input: Vec<u8>) -> Self::OutData {
        let groups = self.layout.decode(&input, self.frames);
        if groups.is_ok() {
            self.decoded += 1;
        } else {
            self.failed += 1;
        }
        groups
    }

    fn finalize(&mut self) -> Result<()> {
        info!("{} : {} blocks decoded, {} failed.", self, self.decoded, self.failed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::run_component;
    use crate::family::{ProbeConfig, ProbeKind};
    use crate::profile::ChannelKind;
    use std::sync::mpsc::channel;

    fn due_plus_like() -> DeviceProfile {
        DeviceProfile::builder("test", 2, 2000)
            .group("EMG", ChannelKind::Bioelectric, 8, 0.000249)
            .build()
            .unwrap()
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{a} != {e}");
        }
    }

    #[test]
    fn sixteen_bit_sign_correction() {
        assert_eq!(to_signed(0, 2).unwrap(), 0);
        assert_eq!(to_signed(32767, 2).unwrap(), 32767);
        assert_eq!(to_signed(32768, 2).unwrap(), -32768);
        assert_eq!(to_signed(65535, 2).unwrap(), -1);
    }

    #[test]
    fn twenty_four_bit_sign_correction() {
        assert_eq!(to_signed(8388607, 3).unwrap(), 8388607);
        assert_eq!(to_signed(8388608, 3).unwrap(), -8388608);
        assert_eq!(to_signed(16777215, 3).unwrap(), -1);
        assert_eq!(to_signed(0x00_10_00, 3).unwrap(), 4096);
    }

    #[test]
    fn other_widths_are_rejected() {
        assert!(matches!(
            to_signed(0, 4),
            Err(Error::UnsupportedSampleWidth(4))
        ));
        assert!(matches!(
            to_signed(0, 1),
            Err(Error::UnsupportedSampleWidth(1))
        ));
    }

    #[test]
    fn end_to_end_eight_channels() {
        let values: [i16; 8] = [100, -50, 32767, -32768, 0, 1, -1, 20000];
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        assert_eq!(raw.len(), 16);

        let decoded = decode(&raw, &due_plus_like()).unwrap();
        assert_eq!(decoded.channel_count(), 8);
        assert_eq!(decoded.samples_per_channel(), 1);

        let column = decoded.column(0).unwrap();
        assert_close(
            &column,
            &[
                0.0249, -0.01245, 8.158983, -8.159232, 0.0, 0.000249, -0.000249, 4.98,
            ],
        );
    }

    #[test]
    fn three_byte_samples() {
        let profile = DeviceProfile::builder("24 bit", 3, 2000)
            .group("EMG", ChannelKind::Bioelectric, 2, 1.0)
            .build()
            .unwrap();
        let raw = [0xFF, 0xFF, 0xFE, 0x00, 0x01, 0x00];
        let decoded = decode(&raw, &profile).unwrap();
        assert_eq!(decoded.rows(), &[vec![-2.0], vec![256.0]]);
    }

    #[test]
    fn little_endian_samples() {
        let profile = DeviceProfile::builder("le", 2, 512)
            .group("EMG", ChannelKind::Bioelectric, 1, 1.0)
            .byte_order(ByteOrder::Little)
            .build()
            .unwrap();
        let raw = [0xFE, 0xFF, 0x00, 0x01];
        let decoded = decode(&raw, &profile).unwrap();
        assert_eq!(decoded.rows(), &[vec![-2.0, 256.0]]);
    }

    #[test]
    fn time_major_and_channel_major() {
        let time_major = DeviceProfile::builder("tm", 2, 100)
            .group("EMG", ChannelKind::Control, 2, 1.0)
            .build()
            .unwrap();
        let channel_major = DeviceProfile {
            order: SampleOrder::ChannelMajor,
            ..time_major.clone()
        };
        // Counts 1..=6 on the wire in order.
        let raw: Vec<u8> = (1i16..=6).flat_map(|v| v.to_be_bytes()).collect();

        let tm = decode(&raw, &time_major).unwrap();
        assert_eq!(tm.rows(), &[vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]]);

        let cm = decode(&raw, &channel_major).unwrap();
        assert_eq!(cm.rows(), &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn sub_samples_within_a_frame() {
        let profile = DeviceProfile::builder("fast", 2, 2000)
            .group("EMG", ChannelKind::Control, 2, 1.0)
            .samples_per_frame(2)
            .build()
            .unwrap();
        // Frame 0: [k0: c0 c1][k1: c0 c1], frame 1 likewise.
        let raw: Vec<u8> = [10i16, 20, 11, 21, 12, 22, 13, 23]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let decoded = decode_block(&raw, &profile, 2).unwrap();
        assert_eq!(
            decoded.rows(),
            &[vec![10.0, 11.0, 12.0, 13.0], vec![20.0, 21.0, 22.0, 23.0]]
        );
    }

    #[test]
    fn control_channels_keep_raw_counts() {
        let profile = DeviceProfile::builder("mixed", 2, 2000)
            .group("EMG", ChannelKind::Bioelectric, 1, 0.5)
            .group("Ramp", ChannelKind::Control, 1, 0.5)
            .build()
            .unwrap();
        let raw = [0x00, 0x0A, 0x00, 0x0A];
        let decoded = decode(&raw, &profile).unwrap();
        assert_eq!(decoded.column(0).unwrap(), vec![5.0, 10.0]);
    }

    #[test]
    fn wrong_sizes_are_rejected() {
        let profile = due_plus_like();
        assert!(matches!(
            decode(&[0u8; 15], &profile),
            Err(Error::FrameSizeMismatch {
                expected: 16,
                actual: 15
            })
        ));
        assert!(matches!(
            decode(&[], &profile),
            Err(Error::FrameSizeMismatch { .. })
        ));
        assert!(matches!(
            decode_block(&[0u8; 32], &profile, 1),
            Err(Error::FrameSizeMismatch {
                expected: 16,
                actual: 32
            })
        ));
    }

    #[test]
    fn encode_matches_decode() {
        let profile = DeviceProfile::builder("enc", 3, 2000)
            .group("EMG", ChannelKind::Control, 3, 1.0)
            .byte_order(ByteOrder::Little)
            .build()
            .unwrap();
        let counts = vec![vec![-8388608, 0], vec![-1, 1], vec![8388607, 42]];
        let raw = encode(&counts, &profile).unwrap();
        assert_eq!(raw.len(), 18);
        let decoded = decode(&raw, &profile).unwrap();
        let expected: Vec<Vec<f64>> = counts
            .iter()
            .map(|row| row.iter().map(|&c| c as f64).collect())
            .collect();
        assert_eq!(decoded.rows(), expected.as_slice());
    }

    #[test]
    fn encode_rejects_out_of_range_counts() {
        let counts = vec![vec![40000]; 8];
        assert!(encode(&counts, &due_plus_like()).is_err());
    }

    #[test]
    fn column_reads_one_instant() {
        let m = SampleMatrix::new(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(m.column(1), Some(vec![2.0, 4.0]));
        assert_eq!(m.column(2), None);
    }

    #[test]
    fn block_decoder_component() {
        let plan = ProbeConfig {
            kind: ProbeKind::DuePlus,
            ..Default::default()
        }
        .plan()
        .unwrap()
        .with_frames_per_block(1);
        let (test_tx, rx) = channel();
        let (tx, test_rx) = channel();
        run_component(Box::new(BlockDecoder::new(&plan)), rx, tx);

        let raw: Vec<u8> = (0i16..8).flat_map(|v| v.to_be_bytes()).collect();
        test_tx.send(raw).unwrap();
        test_tx.send(vec![0u8; 3]).unwrap();

        let groups = test_rx.recv().unwrap().unwrap();
        assert_eq!(groups.last().unwrap().samples.rows(), &[vec![7.0]]);
        assert!(matches!(
            test_rx.recv().unwrap(),
            Err(Error::FrameSizeMismatch {
                expected: 16,
                actual: 3
            })
        ));
    }
}
