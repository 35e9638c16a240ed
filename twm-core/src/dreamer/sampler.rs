//! Start latents for imagined rollouts.
use crate::{base::WorldModel, replay_buffer::ReplayStore};
use anyhow::Result;
use ndarray::{Array2, Axis};
use rand::{rngs::StdRng, SeedableRng};

/// Draws latents to restart rows of an imagined rollout whose episode ended.
pub trait LatentSampler {
    /// Returns `n` latents `[n, Z]`.
    fn sample(&mut self, n: usize) -> Result<Array2<f32>>;
}

/// Encodes uniformly drawn observations of a replay store.
pub struct StartZSampler<'a, W: WorldModel> {
    wm: &'a W,
    store: &'a ReplayStore,
    temperature: f32,
    rng: StdRng,
}

impl<'a, W: WorldModel> StartZSampler<'a, W> {
    /// Creates a sampler encoding with the given temperature, drawing
    /// observations with a generator seeded by `seed`.
    pub fn new(wm: &'a W, store: &'a ReplayStore, temperature: f32, seed: u64) -> Self {
        Self {
            wm,
            store,
            temperature,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<'a, W: WorldModel> LatentSampler for StartZSampler<'a, W> {
    fn sample(&mut self, n: usize) -> Result<Array2<f32>> {
        let ixs = self.store.random_obs_indices(n, &mut self.rng);
        let obs = self.store.get_obs(&ixs, 0, false)?;
        let z = self.wm.encode_sample(&obs, self.temperature)?;
        Ok(z.index_axis(Axis(1), 0).to_owned())
    }
}
