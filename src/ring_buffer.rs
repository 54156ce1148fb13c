//! A fixed-capacity, per-channel circular store for the most recent samples.
//!
//! Writes never block and never fail: once the buffer is full the oldest
//! samples are overwritten. Reads always come back oldest-first, the raw
//! storage order is never exposed.

/// `capacity` samples for each of `channels` channels, sharing one write
/// cursor.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: Vec<Vec<T>>,
    capacity: usize,
    cursor: usize,
    filled: usize,
}

impl<T> RingBuffer<T>
where
    T: Copy + Default,
{
    /// An empty buffer.
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            data: vec![vec![T::default(); capacity]; channels],
            capacity,
            cursor: 0,
            filled: 0,
        }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.data.len()
    }

    /// Samples each channel can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples per channel that have actually been fed and not yet
    /// overwritten.
    pub fn len(&self) -> usize {
        self.filled
    }

    /// True before anything was fed.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Forget every sample, keeping the capacity.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.filled = 0;
    }

    /// Append one chunk per channel. Every chunk must have the same length.
    ///
    /// A chunk that runs past the end of the storage is split: the head is
    /// written at the cursor and the tail wraps around to index 0. A chunk
    /// longer than the whole capacity only keeps its newest samples.
    ///
    /// # Panics
    ///
    /// If `chunk` does not hold exactly one slice per channel, or if the
    /// slices differ in length.
    pub fn feed(&mut self, chunk: &[Vec<T>]) {
        assert_eq!(chunk.len(), self.channels(), "one chunk per channel");
        let Some(incoming) = chunk.first().map(Vec::len) else {
            return;
        };
        assert!(
            chunk.iter().all(|c| c.len() == incoming),
            "chunks of one feed must have the same length"
        );
        if self.capacity == 0 || incoming == 0 {
            return;
        }

        let skip = incoming.saturating_sub(self.capacity);
        let n = incoming - skip;
        let head = n.min(self.capacity - self.cursor);
        let tail = n - head;

        for (row, samples) in self.data.iter_mut().zip(chunk) {
            let samples = &samples[skip..];
            row[self.cursor..self.cursor + head].copy_from_slice(&samples[..head]);
            row[..tail].copy_from_slice(&samples[head..]);
        }

        self.cursor = if tail > 0 {
            tail
        } else {
            (self.cursor + head) % self.capacity
        };
        self.filled = (self.filled + n).min(self.capacity);
    }

    /// Every stored sample, oldest first, one `Vec` per channel: the run
    /// from the oldest sample to the end of storage, then whatever wrapped
    /// to the front.
    pub fn read_ordered(&self) -> Vec<Vec<T>> {
        let start = (self.cursor + self.capacity - self.filled) % self.capacity.max(1);
        let wrapped = (start + self.filled).saturating_sub(self.capacity);
        let head = start..start + self.filled - wrapped;
        self.data
            .iter()
            .map(|row| [&row[head.clone()], &row[..wrapped]].concat())
            .collect()
    }

    /// A full-capacity view with the newest sample at the right edge and
    /// `T::default()` filling whatever has not been written yet.
    pub fn read_padded(&self) -> Vec<Vec<T>> {
        let pad = self.capacity - self.filled;
        self.read_ordered()
            .into_iter()
            .map(|row| {
                let mut padded = vec![T::default(); pad];
                padded.extend(row);
                padded
            })
            .collect()
    }

    /// Change the capacity, keeping the newest `min(len, new_capacity)`
    /// samples of each channel.
    pub fn resize(&mut self, new_capacity: usize) {
        let keep = self.filled.min(new_capacity);
        let ordered = self.read_ordered();

        self.data = ordered
            .into_iter()
            .map(|row| {
                let mut fresh = vec![T::default(); new_capacity];
                fresh[..keep].copy_from_slice(&row[row.len() - keep..]);
                fresh
            })
            .collect();
        self.capacity = new_capacity;
        self.filled = keep;
        self.cursor = if new_capacity == 0 {
            0
        } else {
            keep % new_capacity
        };
    }
}
