//! Uniform sweeps over the replay store.
use crate::error::TwmError;
use anyhow::Result;
use ndarray::Array2;
use rand::{rngs::StdRng, seq::SliceRandom, Rng};

/// One pass over the valid range of a replay store in non-overlapping windows.
///
/// Yields index batches of shape `[b, sequence_length + extra]`, where `b` is
/// the batch size except possibly for the last batch. Window starts are spaced
/// `sequence_length` apart, so the trailing `extra` indices of a window
/// overlap with the next window. Created by
/// [`ReplayStore::generate_uniform_indices`](super::ReplayStore::generate_uniform_indices).
#[derive(Debug, Clone)]
pub struct UniformSweep {
    starts: Vec<usize>,
    batch_size: usize,
    window: usize,
    pos: usize,
}

impl UniformSweep {
    /// Partitions observation indices `context..=size` into windows.
    ///
    /// A random offset is drawn inside the slack left over by the partition,
    /// so the number of windows does not depend on the offset.
    pub(super) fn new(
        size: usize,
        context: usize,
        batch_size: usize,
        sequence_length: usize,
        extra: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if batch_size == 0 || sequence_length == 0 {
            return Err(TwmError::DataAvailability(
                "batch size and sequence length must be positive".to_string(),
            )
            .into());
        }

        let avail = (size + 1).saturating_sub(context + extra);
        let count = avail / sequence_length;
        if count == 0 {
            return Err(TwmError::DataAvailability(format!(
                "no window of length {} fits in {} observations",
                sequence_length + extra,
                size + 1
            ))
            .into());
        }

        let slack = avail - count * sequence_length;
        let offset = context + rng.gen_range(0..=slack);
        let mut starts: Vec<usize> = (0..count).map(|k| offset + k * sequence_length).collect();
        starts.shuffle(rng);

        Ok(Self {
            starts,
            batch_size,
            window: sequence_length + extra,
            pos: 0,
        })
    }

    /// Number of windows in the sweep.
    pub fn num_windows(&self) -> usize {
        self.starts.len()
    }
}

impl Iterator for UniformSweep {
    type Item = Array2<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.starts.len() {
            return None;
        }
        let end = (self.pos + self.batch_size).min(self.starts.len());
        let starts = &self.starts[self.pos..end];
        self.pos = end;
        Some(Array2::from_shape_fn((starts.len(), self.window), |(b, t)| {
            starts[b] + t
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.starts.len() - self.pos;
        let n = (remaining + self.batch_size - 1) / self.batch_size;
        (n, Some(n))
    }
}

impl ExactSizeIterator for UniformSweep {}
