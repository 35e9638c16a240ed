//! Batches exchanged between the replay store, the roller and the models.
use super::WorldModel;
use crate::error::TwmError;
use anyhow::Result;
use ndarray::{s, Array2, Array3, ArrayD, Zip};

/// Aligned windows of transitions read from the replay store.
///
/// With `B` windows, `L` transitions per window and `p` prefix transitions,
/// `obs` has shape `[B, p + L, ...]`, or `[B, p + L + 1, ...]` when the
/// observation following the last transition was requested. The other fields
/// have `p + L` steps.
#[derive(Debug, Clone)]
pub struct SequenceBatch {
    /// Observations.
    pub obs: ArrayD<f32>,

    /// Actions, `[B, p + L, A]`.
    pub act: Array3<f32>,

    /// Rewards.
    pub reward: Array2<f32>,

    /// Termination flags.
    pub is_terminated: Array2<bool>,

    /// Truncation flags.
    pub is_truncated: Array2<bool>,
}

impl SequenceBatch {
    /// Number of windows.
    pub fn len(&self) -> usize {
        self.act.shape()[0]
    }

    /// Returns `true` if the batch has no windows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of transitions per window, prefix included.
    pub fn seq_len(&self) -> usize {
        self.act.shape()[1]
    }

    /// Terminated or truncated.
    pub fn is_done(&self) -> Array2<bool> {
        Zip::from(&self.is_terminated)
            .and(&self.is_truncated)
            .map_collect(|t, u| *t || *u)
    }
}

/// Input of the dynamics model.
///
/// All fields have the same number of positions `T`. Position `t` holds the
/// latent `z_t`, the action `a_t` taken at `z_t`, and the reward, discount and
/// done flag observed on arrival at `z_t`. The first position of a history
/// carries neutral values (`0`, `1`, `false`) when its arrival is unknown.
#[derive(Debug, Clone)]
pub struct DynamicsInput {
    /// Latents, `[B, T, Z]`.
    pub z: Array3<f32>,

    /// Actions, `[B, T, A]`.
    pub a: Array3<f32>,

    /// Arrival rewards, `[B, T]`.
    pub r: Array2<f32>,

    /// Arrival discounts, `[B, T]`.
    pub g: Array2<f32>,

    /// Arrival done flags, `[B, T]`.
    pub d: Array2<bool>,
}

impl DynamicsInput {
    /// Aligns latents with transitions read from the replay store.
    ///
    /// `batch` must hold `T + 1` transitions per window, starting with the
    /// transition that arrives at the first latent.
    pub fn new<W: WorldModel + ?Sized>(
        wm: &W,
        z: Array3<f32>,
        batch: &SequenceBatch,
    ) -> Result<Self> {
        let (b, t) = (z.shape()[0], z.shape()[1]);
        if batch.len() != b || batch.seq_len() != t + 1 {
            return Err(TwmError::Shape(format!(
                "{} latents per window need {} transitions, got {:?}",
                t,
                t + 1,
                batch.act.shape()
            ))
            .into());
        }

        let terminated = batch.is_terminated.slice(s![.., ..t]).to_owned();
        Ok(Self {
            z,
            a: batch.act.slice(s![.., 1.., ..]).to_owned(),
            r: batch.reward.slice(s![.., ..t]).to_owned(),
            g: wm.to_discounts(&terminated),
            d: batch.is_done().slice(s![.., ..t]).to_owned(),
        })
    }

    /// Number of rows.
    pub fn batch_size(&self) -> usize {
        self.z.shape()[0]
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.z.shape()[1]
    }

    /// Returns `true` if there is no position.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A latent trajectory recorded by a [`Dreamer`](crate::dreamer::Dreamer).
///
/// With horizon `T`, `z` and `h` have `T + 1` steps, the others `T`. Step `t`
/// goes from `z[t]` to `z[t + 1]` with action `a[t]`, reward `r[t]`, discount
/// `g[t]` and done flag `d[t]`.
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// Latents, `[B, T + 1, Z]`.
    pub z: Array3<f32>,

    /// Decoded observations, present when the roller always computes them.
    pub o: Option<ArrayD<f32>>,

    /// Hidden states paired with the latents, `[B, T + 1, H]`.
    pub h: Option<Array3<f32>>,

    /// Actions, `[B, T, A]`.
    pub a: Array3<f32>,

    /// Rewards.
    pub r: Array2<f32>,

    /// Discounts.
    pub g: Array2<f32>,

    /// Done flags.
    pub d: Array2<bool>,

    /// Per-step weights.
    pub weights: Array2<f32>,
}

impl Trajectory {
    /// Number of steps.
    pub fn horizon(&self) -> usize {
        self.a.shape()[1]
    }

    /// Number of rows.
    pub fn batch_size(&self) -> usize {
        self.z.shape()[0]
    }
}
