//! World model.
use super::{DynamicsInput, SequenceBatch};
use crate::record::Record;
use anyhow::Result;
use ndarray::{Array2, Array3, ArrayD};

/// Output of [`WorldModel::predict`].
///
/// Holds the last `tgt_length` positions of the input. The values at position
/// `t` describe the step taken with `a_t`: the next latent `z_{t+1}`, the
/// reward and termination of the step, and the hidden state `h_t` paired with
/// `z_{t+1}` as input of the actor.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Sampled next latents, `[B, tgt_length, Z]`.
    pub z: Array3<f32>,

    /// Logits of the next latents.
    pub logits: ArrayD<f32>,

    /// Hidden states, `[B, tgt_length, H]`.
    pub h: Option<Array3<f32>>,

    /// Predicted rewards.
    pub reward: Array2<f32>,

    /// Predicted terminations.
    pub is_terminated: Array2<bool>,
}

/// Output of [`WorldModel::optimize`].
#[derive(Debug, Clone)]
pub struct WorldModelOutput {
    /// Latents of every observation of the batch except the trailing one.
    pub z: Array3<f32>,

    /// Hidden states paired with `z`.
    pub h: Option<Array3<f32>>,

    /// Metrics of the optimization step.
    pub record: Record,
}

/// A learned model of an environment.
///
/// It owns the observation encoder, the decoder and the dynamics model.
/// Inference takes `&self`; optimization mutates the parameters and never
/// touches the replay store.
pub trait WorldModel {
    /// Latent distribution computed by the encoder.
    type Dist;

    /// Encodes observations `[N, T, ...]` into latent distributions.
    fn encode(&self, obs: &ArrayD<f32>) -> Result<Self::Dist>;

    /// Encodes observations `[N, T, ...]` and samples latents `[N, T, Z]`.
    fn encode_sample(&self, obs: &ArrayD<f32>, temperature: f32) -> Result<Array3<f32>> {
        let dist = self.encode(obs)?;
        let (z, _) = self.sample_z(&dist, None, temperature)?;
        Ok(z)
    }

    /// Samples latents from a distribution computed by [`WorldModel::encode`].
    ///
    /// `idx` selects rows along the first axis, so a distribution computed once
    /// over `[N, 1, ...]` observations can be re-sampled for arbitrary windows.
    /// Returns the latents and their logits.
    fn sample_z(
        &self,
        dist: &Self::Dist,
        idx: Option<&[usize]>,
        temperature: f32,
    ) -> Result<(Array3<f32>, ArrayD<f32>)>;

    /// Reconstructs observations from latents `[N, T, Z]`.
    fn decode(&self, z: &Array3<f32>) -> Result<ArrayD<f32>>;

    /// Runs the dynamics model and returns the last `tgt_length` positions.
    fn predict(
        &self,
        input: &DynamicsInput,
        tgt_length: usize,
        temperature: f32,
    ) -> Result<Prediction>;

    /// Maps termination flags to discounts. Truncation is not a termination.
    fn to_discounts(&self, is_terminated: &Array2<bool>) -> Array2<f32>;

    /// Joint optimization step on windows read with a context prefix and the
    /// trailing next observation.
    fn optimize(&mut self, batch: &SequenceBatch) -> Result<WorldModelOutput>;

    /// Optimizes the observation model on single observations `[N, 1, ...]`.
    fn optimize_pretrain_obs(&mut self, obs: &ArrayD<f32>) -> Result<Record>;

    /// Optimizes the dynamics model towards the logits of the next latents.
    fn optimize_pretrain_dyn(
        &mut self,
        input: &DynamicsInput,
        target_logits: &ArrayD<f32>,
    ) -> Result<Record>;

    /// Serializes the parameters.
    fn save_params(&self) -> Result<Vec<u8>>;

    /// Restores parameters serialized with [`WorldModel::save_params`].
    fn load_params(&mut self, bytes: &[u8]) -> Result<()>;
}
