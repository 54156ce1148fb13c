//! Per-group summaries of decoded blocks, smoothed over the last few blocks.

use crate::component::Component;
use crate::demux::ChannelGroup;
use crate::error::Result;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::fmt;

const BUFFER_SIZE: usize = 5;

/// Level of one channel group over the recent past.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    /// Group the summary belongs to
    pub name: String,
    /// Root mean square over every channel and sample, averaged per block
    pub rms: f64,
    /// Smallest value seen in the recent blocks
    pub min: f64,
    /// Largest value seen in the recent blocks
    pub max: f64,
    /// Blocks the summary is built from
    pub blocks: usize,
}

impl fmt::Display for GroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: rms {:.4}, range [{:.4}, {:.4}]",
            self.name, self.rms, self.min, self.max
        )
    }
}

fn summarize(group: &ChannelGroup) -> GroupSummary {
    let values = group.samples.rows().iter().flatten().copied();
    let (count, sum_sq, min, max) = values.fold(
        (0usize, 0.0, f64::INFINITY, f64::NEG_INFINITY),
        |(n, s, lo, hi), v| (n + 1, s + v * v, lo.min(v), hi.max(v)),
    );
    let rms = if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt()
    };
    GroupSummary {
        name: group.name.clone(),
        rms,
        min: if count == 0 { 0.0 } else { min },
        max: if count == 0 { 0.0 } else { max },
        blocks: 1,
    }
}

/// The `GroupStats` component turns each decoded block into one
/// [`GroupSummary`] per group, averaged with the blocks before it.
#[derive(Debug, Default)]
pub struct GroupStats {
    history: HashMap<String, VecDeque<GroupSummary>>,
    blocks: usize,
}

impl GroupStats {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one block into the history and return the smoothed summaries,
    /// in the order of the block's groups.
    pub fn push(&mut self, groups: &[ChannelGroup]) -> Vec<GroupSummary> {
        self.blocks += 1;
        groups
            .iter()
            .map(|group| {
                let latest = summarize(group);
                let history = self.history.entry(group.name.clone()).or_default();
                history.push_back(latest);
                if history.len() > BUFFER_SIZE {
                    history.pop_front();
                }

                let len = history.len();
                let sum = history
                    .iter()
                    .cloned()
                    .reduce(|l, r| GroupSummary {
                        rms: l.rms + r.rms,
                        min: l.min.min(r.min),
                        max: l.max.max(r.max),
                        ..l
                    })
                    .unwrap_or_else(|| summarize(group));

                GroupSummary {
                    rms: sum.rms / len as f64,
                    blocks: len,
                    ..sum
                }
            })
            .collect()
    }
}

impl fmt::Display for GroupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupStats")
    }
}

impl Component for GroupStats {
    type InData = Vec<ChannelGroup>;
    type OutData = Vec<GroupSummary>;

    fn convert(&mut self, input: Self::InData) -> Self::OutData {
        self.push(&input)
    }

    fn finalize(&mut self) -> Result<()> {
        debug!("{} : summarized {} blocks.", self, self.blocks);
        self.history.clear();
        Ok(())
    }
}
