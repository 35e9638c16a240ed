//! Actor-critic.
use super::Trajectory;
use crate::record::Record;
use anyhow::Result;
use ndarray::{Array2, Array3};

/// A policy and its value estimator, trained on latent trajectories.
pub trait ActorCritic {
    /// Samples actions `[B, A]` for latents `[B, Z]` and optional hidden states `[B, H]`.
    ///
    /// Does not change the state of the rollout that calls it.
    fn act(&self, z: &Array2<f32>, h: Option<&Array2<f32>>) -> Result<Array2<f32>>;

    /// Optimizes the actor and the critic on an imagined trajectory.
    fn optimize(&mut self, trajectory: &Trajectory) -> Result<Record>;

    /// Optimizes on trajectories taken from the replay store.
    ///
    /// `z` and `h` have one more step than `r`, `g` and `d`.
    fn optimize_pretrain(
        &mut self,
        z: &Array3<f32>,
        h: Option<&Array3<f32>>,
        r: &Array2<f32>,
        g: &Array2<f32>,
        d: &Array2<bool>,
    ) -> Result<Record>;

    /// Copies the parameters of the online critic into the target critic.
    fn sync_target(&mut self);

    /// Serializes the parameters.
    fn save_params(&self) -> Result<Vec<u8>>;

    /// Restores parameters serialized with [`ActorCritic::save_params`].
    fn load_params(&mut self, bytes: &[u8]) -> Result<()>;
}
