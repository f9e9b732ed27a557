//! Rolling buffer of timestamped multichannel sample blocks.
//!
//! Blocks arrive in arbitrary sizes and are consumed front-first in
//! arbitrary other sizes. Dropping the front of a block only advances an
//! offset; sample data is copied exactly once, on extraction.

use std::collections::VecDeque;

use ndarray::{Array2, s};

use crate::stream::{TIME_UNITS_PER_SECOND, Timestamp};

struct Block {
    samples: Array2<f32>,
    /// Timestamp of the block's column 0 as pushed. Dropping front
    /// samples never moves this anchor; column offsets are added to it,
    /// so timestamp round-off only spans one block.
    first_timestamp: Timestamp,
}

/// An append-only, front-truncatable sequence of timestamped sample
/// blocks with cross-block extraction and zero right-padding.
pub struct SampleBlockBuffer {
    blocks: VecDeque<Block>,
    /// Already-consumed columns at the front of the oldest block.
    first_block_offset: usize,
    num_channels: usize,
    /// Real-valued (not necessarily integral) time units per sample.
    timestamp_units_per_sample: f64,
    available: usize,
}

impl SampleBlockBuffer {
    pub fn new(sample_rate: f64, num_channels: usize) -> Self {
        Self {
            blocks: VecDeque::new(),
            first_block_offset: 0,
            num_channels,
            timestamp_units_per_sample: TIME_UNITS_PER_SECOND as f64 / sample_rate,
            available: 0,
        }
    }

    /// Number of samples that can be copied without padding.
    pub fn len(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Appends a block. O(1). The caller's timestamps are trusted; no
    /// contiguity check is performed.
    pub fn push(&mut self, samples: Array2<f32>, first_sample_timestamp: Timestamp) {
        debug_assert_eq!(samples.nrows(), self.num_channels);
        self.available += samples.ncols();
        self.blocks.push_back(Block {
            samples,
            first_timestamp: first_sample_timestamp,
        });
    }

    /// Copies exactly `count` columns from the front, reading across block
    /// boundaries as needed and zero-padding any shortfall on the right.
    /// Non-destructive. The second element is the timestamp of the last
    /// actually-copied (non-padded) sample, `None` when the buffer was
    /// empty.
    pub fn copy_samples(&self, count: usize) -> (Array2<f32>, Option<Timestamp>) {
        let mut out = Array2::zeros((self.num_channels, count));
        let mut copied = 0usize;
        let mut front_offset = self.first_block_offset;
        let mut last_timestamp = None;

        for block in &self.blocks {
            if copied == count {
                break;
            }
            let offset = front_offset;
            front_offset = 0;

            let take = (count - copied).min(block.samples.ncols() - offset);
            if take == 0 {
                continue;
            }
            out.slice_mut(s![.., copied..copied + take])
                .assign(&block.samples.slice(s![.., offset..offset + take]));
            last_timestamp = Some(self.column_timestamp(block, offset + take - 1));
            copied += take;
        }

        (out, last_timestamp)
    }

    /// Discards up to `count` samples from the front, returning how many
    /// were actually dropped (less than `count` if the buffer held fewer).
    /// Whole blocks are erased once consumed; a partially consumed block
    /// only has its offset advanced. O(blocks dropped).
    pub fn drop_samples(&mut self, count: usize) -> usize {
        let mut remaining = count;
        while remaining > 0 {
            let Some(block) = self.blocks.front() else {
                break;
            };
            let block_remaining = block.samples.ncols() - self.first_block_offset;
            if remaining >= block_remaining {
                remaining -= block_remaining;
                self.first_block_offset = 0;
                self.blocks.pop_front();
            } else {
                self.first_block_offset += remaining;
                remaining = 0;
            }
        }
        let dropped = count - remaining;
        self.available -= dropped;
        dropped
    }

    /// Discards everything, keeping the stream parameters.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.first_block_offset = 0;
        self.available = 0;
    }

    fn column_timestamp(&self, block: &Block, column: usize) -> Timestamp {
        block
            .first_timestamp
            .advanced_by((self.timestamp_units_per_sample * column as f64).round() as i64)
    }
}
