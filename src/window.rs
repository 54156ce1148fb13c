//! The sliding window of recent samples that a session keeps for its
//! consumers, one ring buffer per channel group.

use crate::decoder::SampleMatrix;
use crate::demux::ChannelGroup;
use crate::error::{Error, Result};
use crate::plan::GroupLayout;
use crate::ring_buffer::RingBuffer;
use std::time::Duration;

/// The recent past of one group, oldest sample first.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSnapshot {
    /// Group name
    pub name: String,
    /// Per-channel rate
    pub sample_rate_hz: u32,
    /// Oldest sample first
    pub samples: SampleMatrix,
}

#[derive(Debug, Clone)]
struct Track {
    layout: GroupLayout,
    buffer: RingBuffer<f64>,
}

/// Samples per channel that cover `span` at `rate`.
fn capacity(rate: u32, span: Duration) -> usize {
    (rate as f64 * span.as_secs_f64()).round() as usize
}

/// One ring buffer per group, all covering the same span of time.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    tracks: Vec<Track>,
    span: Duration,
}

impl SignalWindow {
    /// Empty buffers for `groups`, each holding `span` worth of samples at
    /// its own rate.
    pub fn new(groups: Vec<GroupLayout>, span: Duration) -> Self {
        let tracks = groups
            .into_iter()
            .map(|layout| Track {
                buffer: RingBuffer::new(layout.channels, capacity(layout.sample_rate_hz, span)),
                layout,
            })
            .collect();
        Self { tracks, span }
    }

    /// History kept per group.
    pub fn span(&self) -> Duration {
        self.span
    }

    /// Append a decoded block. The groups must match the ones the window
    /// was built for; on mismatch nothing is written.
    pub fn feed(&mut self, groups: &[ChannelGroup]) -> Result<()> {
        if groups.len() != self.tracks.len() {
            return Err(Error::invalid(format!(
                "window tracks {} groups, block has {}",
                self.tracks.len(),
                groups.len()
            )));
        }
        for (track, group) in self.tracks.iter().zip(groups) {
            if track.layout.name != group.name
                || track.layout.channels != group.samples.channel_count()
            {
                return Err(Error::invalid(format!(
                    "block group {} ({} channels) does not match window group {} ({} channels)",
                    group.name,
                    group.samples.channel_count(),
                    track.layout.name,
                    track.layout.channels
                )));
            }
        }
        for (track, group) in self.tracks.iter_mut().zip(groups) {
            track.buffer.feed(group.samples.rows());
        }
        Ok(())
    }

    /// Every group's stored samples in chronological order.
    pub fn snapshot(&self) -> Vec<GroupSnapshot> {
        self.tracks
            .iter()
            .map(|track| GroupSnapshot {
                name: track.layout.name.clone(),
                sample_rate_hz: track.layout.sample_rate_hz,
                samples: SampleMatrix::new(track.buffer.read_ordered()),
            })
            .collect()
    }

    /// Change the span, keeping the newest samples that still fit.
    pub fn resize(&mut self, span: Duration) {
        for track in &mut self.tracks {
            track
                .buffer
                .resize(capacity(track.layout.sample_rate_hz, span));
        }
        self.span = span;
    }

    /// Samples per channel currently held by the first group.
    pub fn len(&self) -> usize {
        self.tracks.first().map_or(0, |t| t.buffer.len())
    }

    /// True when no group has a sample yet.
    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|t| t.buffer.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layouts() -> Vec<GroupLayout> {
        vec![
            GroupLayout {
                name: "EMG".into(),
                channels: 2,
                sample_rate_hz: 10,
            },
            GroupLayout {
                name: "AUX".into(),
                channels: 1,
                sample_rate_hz: 20,
            },
        ]
    }

    fn block(start: f64) -> Vec<ChannelGroup> {
        vec![
            ChannelGroup {
                name: "EMG".into(),
                sample_rate_hz: 10,
                samples: SampleMatrix::new(vec![
                    vec![start, start + 1.0],
                    vec![-start, -start - 1.0],
                ]),
            },
            ChannelGroup {
                name: "AUX".into(),
                sample_rate_hz: 20,
                samples: SampleMatrix::new(vec![(0..4).map(|i| start + i as f64).collect()]),
            },
        ]
    }

    #[test]
    fn capacity_follows_each_rate() {
        let mut window = SignalWindow::new(layouts(), Duration::from_millis(500));
        for i in 0..5 {
            window.feed(&block(i as f64 * 10.0)).unwrap();
        }
        let snapshot = window.snapshot();
        assert_eq!(snapshot[0].samples.samples_per_channel(), 5);
        assert_eq!(snapshot[1].samples.samples_per_channel(), 10);
        assert_eq!(snapshot[0].samples.row(0).unwrap(), &[21.0, 30.0, 31.0, 40.0, 41.0]);
        assert_eq!(snapshot[0].samples.row(1).unwrap()[4], -41.0);
    }

    #[test]
    fn mismatched_blocks_are_refused() {
        let mut window = SignalWindow::new(layouts(), Duration::from_secs(1));
        let mut bad = block(0.0);
        bad.pop();
        assert!(window.feed(&bad).is_err());

        let mut renamed = block(0.0);
        renamed[1].name = "Ramp".into();
        assert!(window.feed(&renamed).is_err());
        assert!(window.is_empty());
    }

    #[test]
    fn resize_keeps_the_newest() {
        let mut window = SignalWindow::new(layouts(), Duration::from_secs(1));
        for i in 0..3 {
            window.feed(&block(i as f64 * 10.0)).unwrap();
        }
        window.resize(Duration::from_millis(200));
        assert_eq!(window.span(), Duration::from_millis(200));
        let snapshot = window.snapshot();
        assert_eq!(snapshot[0].samples.row(0).unwrap(), &[20.0, 21.0]);
        assert_eq!(snapshot[1].samples.row(0).unwrap(), &[20.0, 21.0, 22.0, 23.0]);
        assert_eq!(window.len(), 2);
    }
}
