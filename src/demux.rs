//! Splitting composite links: one connection, several logical sub-devices,
//! plus a few trailing channels that belong to the link itself.

use crate::decoder::{decode_segment, encode_segment, SampleMatrix};
use crate::error::{Error, Result};
use crate::profile::DeviceProfile;
use log::debug;

/// A named set of decoded channels that belong together, e.g. one
/// sub-device of a composite link or the "AUX" channels of a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelGroup {
    /// Group or segment name
    pub name: String,
    /// Per-channel rate of `samples`
    pub sample_rate_hz: u32,
    /// `[channel][time]` values in physical units
    pub samples: SampleMatrix,
}

/// The byte layout of one frame of a composite link.
///
/// Built from the declared devices in order. Devices that resolved to zero
/// channels are skipped and take no space; every other device is placed
/// right after the previous active one, and the trailer segments follow the
/// last device.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeLayout {
    devices: Vec<DeviceProfile>,
    trailer: Vec<DeviceProfile>,
    frame_bytes: usize,
}

impl CompositeLayout {
    /// Resolve offsets for `declared` devices followed by `trailer`
    /// segments.
    pub fn new(declared: Vec<DeviceProfile>, trailer: Vec<DeviceProfile>) -> Result<Self> {
        let mut offset = 0;
        let mut place = |profile: DeviceProfile| -> Result<DeviceProfile> {
            profile.validate()?;
            let placed = profile.at_offset(offset);
            offset += placed.frame_bytes();
            Ok(placed)
        };

        let mut devices = Vec::new();
        for profile in declared {
            if profile.channel_count() == 0 {
                debug!("{}: no active channels, skipped", profile.name);
                continue;
            }
            devices.push(place(profile)?);
        }
        let trailer = trailer
            .into_iter()
            .map(&mut place)
            .collect::<Result<Vec<_>>>()?;

        let layout = Self {
            devices,
            trailer,
            frame_bytes: offset,
        };

        let mixed = {
            let mut orders = layout.segments().map(|p| p.order);
            orders
                .next()
                .is_some_and(|first| orders.any(|o| o != first))
        };
        if mixed {
            return Err(Error::invalid(
                "all segments of a composite link must share one sample order",
            ));
        }

        Ok(layout)
    }

    /// Active sub-devices, with their resolved offsets.
    pub fn devices(&self) -> &[DeviceProfile] {
        &self.devices
    }

    /// Shared trailing segments, with their resolved offsets.
    pub fn trailer(&self) -> &[DeviceProfile] {
        &self.trailer
    }

    /// Every segment of the frame in wire order.
    pub fn segments(&self) -> impl Iterator<Item = &DeviceProfile> {
        self.devices.iter().chain(self.trailer.iter())
    }

    /// Bytes in one frame of the link.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Bytes in a block of `frames` frames.
    pub fn block_size(&self, frames: usize) -> usize {
        self.frame_bytes * frames
    }

    /// Total channels across every segment.
    pub fn channel_count(&self) -> usize {
        self.segments().map(DeviceProfile::channel_count).sum()
    }

    /// Decode a block of `frames` frames into one group per active device
    /// followed by one group per trailer segment.
    ///
    /// The block must be exactly [`Self::block_size`] bytes; no partial or
    /// misaligned decoding is ever attempted.
    pub fn demultiplex(&self, raw: &[u8], frames: usize) -> Result<Vec<ChannelGroup>> {
        let expected = self.block_size(frames);
        if raw.len() != expected {
            return Err(Error::FrameSizeMismatch {
                expected,
                actual: raw.len(),
            });
        }

        self.segments()
            .map(|profile| {
                Ok(ChannelGroup {
                    name: profile.name.clone(),
                    sample_rate_hz: profile.sample_rate_hz,
                    samples: decode_segment(raw, profile, self.frame_bytes, frames)?,
                })
            })
            .collect()
    }

    /// The inverse of [`Self::demultiplex`]: one `[channel][time]` count
    /// matrix per segment, in wire order.
    pub fn multiplex(&self, counts: &[Vec<Vec<i32>>], frames: usize) -> Result<Vec<u8>> {
        let segments: Vec<_> = self.segments().collect();
        if counts.len() != segments.len() {
            return Err(Error::invalid(format!(
                "expected counts for {} segments, got {}",
                segments.len(),
                counts.len()
            )));
        }
        let mut out = vec![0u8; self.block_size(frames)];
        for (profile, counts) in segments.into_iter().zip(counts) {
            encode_segment(counts, profile, self.frame_bytes, frames, &mut out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ChannelKind, SampleOrder};

    fn device(name: &str, channels: usize, width: usize) -> DeviceProfile {
        DeviceProfile::builder(name, width, 2000)
            .group("EMG", ChannelKind::Control, channels, 1.0)
            .build()
            .unwrap()
    }

    fn sync_trailer() -> DeviceProfile {
        DeviceProfile::builder("SyncStation", 2, 2000)
            .group("AUX", ChannelKind::Control, 3, 1.0)
            .group("Load cell", ChannelKind::Control, 1, 1.0)
            .group("Buffer", ChannelKind::Control, 1, 1.0)
            .group("Ramp", ChannelKind::Control, 1, 1.0)
            .build()
            .unwrap()
    }

    fn three_of_four() -> CompositeLayout {
        CompositeLayout::new(
            vec![
                device("Muovi 1", 38, 2),
                device("Muovi 2", 0, 2),
                device("Sessantaquattro+ 5", 70, 2),
                device("Due+ 7", 8, 2),
            ],
            vec![sync_trailer()],
        )
        .unwrap()
    }

    #[test]
    fn offsets_skip_inactive_devices() {
        let layout = three_of_four();
        let offsets: Vec<_> = layout.segments().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 76, 216, 232]);
        assert_eq!(layout.frame_bytes(), (38 + 70 + 8) * 2 + 12);
        assert_eq!(layout.devices().len(), 3);
    }

    #[test]
    fn segments_do_not_overlap() {
        let layout = three_of_four();
        let spans: Vec<_> = layout
            .segments()
            .map(|p| p.offset..p.offset + p.frame_bytes())
            .collect();
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let covered: usize = spans.iter().map(|s| s.len()).sum();
        assert_eq!(covered, layout.frame_bytes());
    }

    #[test]
    fn groups_come_back_in_declared_order() {
        let layout = three_of_four();
        let frames = 3;
        let counts: Vec<Vec<Vec<i32>>> = layout
            .segments()
            .enumerate()
            .map(|(i, p)| {
                (0..p.channel_count())
                    .map(|c| (0..frames).map(|t| (i * 1000 + c * 10 + t) as i32).collect())
                    .collect()
            })
            .collect();

        let raw = layout.multiplex(&counts, frames).unwrap();
        let groups = layout.demultiplex(&raw, frames).unwrap();

        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Muovi 1", "Sessantaquattro+ 5", "Due+ 7", "SyncStation"]
        );
        let widths: Vec<_> = groups.iter().map(|g| g.samples.channel_count()).collect();
        assert_eq!(widths, vec![38, 70, 8, 6]);
        assert_eq!(groups[1].samples.row(3).unwrap(), &[1030.0, 1031.0, 1032.0]);
        assert_eq!(groups[3].samples.row(5).unwrap(), &[3050.0, 3051.0, 3052.0]);
    }

    #[test]
    fn mixed_widths() {
        let layout =
            CompositeLayout::new(vec![device("Muovi 1", 2, 3), device("Due+ 7", 1, 2)], vec![])
                .unwrap();
        assert_eq!(layout.frame_bytes(), 8);
        let raw = [0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x07, 0x80, 0x00];
        let groups = layout.demultiplex(&raw, 1).unwrap();
        assert_eq!(groups[0].samples.rows(), &[vec![-1.0], vec![7.0]]);
        assert_eq!(groups[1].samples.rows(), &[vec![-32768.0]]);
    }

    #[test]
    fn size_mismatch_fails_fast() {
        let layout = three_of_four();
        let short = vec![0u8; layout.block_size(2) - 1];
        assert!(matches!(
            layout.demultiplex(&short, 2),
            Err(Error::FrameSizeMismatch { .. })
        ));
    }

    #[test]
    fn mixed_orders_are_rejected() {
        let mut channel_major = device("cm", 4, 2);
        channel_major.order = SampleOrder::ChannelMajor;
        let err = CompositeLayout::new(vec![device("tm", 4, 2), channel_major], vec![]);
        assert!(matches!(err, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn bad_width_is_rejected() {
        let mut wide = device("wide", 4, 2);
        wide.bytes_per_sample = 4;
        assert!(matches!(
            CompositeLayout::new(vec![wide], vec![]),
            Err(Error::UnsupportedSampleWidth(4))
        ));
    }
}
