//! This module is used for tests.
//!
//! The environment and models here are deterministic stand-ins that count
//! their calls and check the shapes of their inputs.
use crate::{
    base::{
        ActionSpace, ActorCritic, DynamicsInput, Env, Prediction, SequenceBatch, Step, StepInfo,
        Trajectory, WorldModel, WorldModelOutput,
    },
    error::TwmError,
    record::{Record, RecordValue},
};
use anyhow::Result;
use ndarray::{s, Array, Array1, Array2, Array3, ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::cell::Cell;

fn shape_error(msg: String) -> anyhow::Error {
    TwmError::Shape(msg).into()
}

/// Configuration of [`DummyEnv`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DummyEnvConfig {
    /// Number of steps of an episode (or of a life).
    pub episode_len: usize,

    /// Length of the observation vectors.
    pub obs_dim: usize,

    /// Number of discrete actions.
    pub num_actions: usize,

    /// Number of lives. With zero, no lives are reported.
    pub lives: u32,

    /// Truncates the episode at this step.
    pub truncate_at: Option<usize>,
}

impl Default for DummyEnvConfig {
    fn default() -> Self {
        Self {
            episode_len: 7,
            obs_dim: 3,
            num_actions: 2,
            lives: 0,
            truncate_at: None,
        }
    }
}

impl DummyEnvConfig {
    /// Sets the episode length.
    pub fn episode_len(mut self, v: usize) -> Self {
        self.episode_len = v;
        self
    }

    /// Sets the number of lives.
    pub fn lives(mut self, v: u32) -> Self {
        self.lives = v;
        self
    }

    /// Sets the truncation step.
    pub fn truncate_at(mut self, v: Option<usize>) -> Self {
        self.truncate_at = v;
        self
    }
}

/// Environment giving reward one per step.
///
/// An episode terminates every `episode_len` steps. With lives, terminations
/// consume a life and the episode goes on until no life is left. Once
/// finished, steps keep returning the final flags with zero reward until the
/// environment is reset.
pub struct DummyEnv {
    config: DummyEnvConfig,
    t: usize,
    lives: u32,
    finished: Option<(bool, bool)>,
    seed: i64,
}

impl DummyEnv {
    fn obs(&self) -> ArrayD<f32> {
        Array::from_elem(
            IxDyn(&[self.config.obs_dim]),
            (self.t % self.config.episode_len.max(1)) as f32 / self.config.episode_len.max(1) as f32,
        )
    }

    /// The seed of the last reset, or the seed given at construction.
    pub fn seed(&self) -> i64 {
        self.seed
    }
}

impl Env for DummyEnv {
    type Config = DummyEnvConfig;

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            t: 0,
            lives: config.lives,
            finished: None,
            seed,
        })
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discrete(self.config.num_actions)
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<ArrayD<f32>> {
        if let Some(seed) = seed {
            self.seed = seed as i64;
        }
        self.t = 0;
        self.lives = self.config.lives;
        self.finished = None;
        Ok(self.obs())
    }

    fn step(&mut self, act: &Array1<f32>) -> Result<Step> {
        let ix = act.get(0).copied().unwrap_or(-1.0);
        if act.len() != 1 || ix < 0.0 || ix as usize >= self.config.num_actions {
            return Err(shape_error(format!("invalid action {:?}", act)));
        }

        let info = StepInfo {
            lives: if self.config.lives > 0 {
                Some(self.lives)
            } else {
                None
            },
        };
        if let Some((is_terminated, is_truncated)) = self.finished {
            return Ok(Step {
                obs: self.obs(),
                reward: 0.0,
                is_terminated,
                is_truncated,
                info,
            });
        }

        self.t += 1;
        let is_truncated = self.config.truncate_at == Some(self.t);
        let is_terminated = !is_truncated && self.t % self.config.episode_len.max(1) == 0;
        if is_terminated {
            self.lives = self.lives.saturating_sub(1);
        }
        if is_truncated || (is_terminated && self.lives == 0) {
            self.finished = Some((is_terminated, is_truncated));
        }

        Ok(Step {
            obs: self.obs(),
            reward: 1.0,
            is_terminated,
            is_truncated,
            info: StepInfo {
                lives: info.lives.map(|_| self.lives),
            },
        })
    }
}

/// World model with deterministic latents.
///
/// The latent of an observation is its mean plus the latent index. The
/// dynamics model adds one to every latent, rewards one and terminates row
/// `i` at the `k`-th prediction call when `(k + i) % terminate_every == 0`.
pub struct DummyWorldModel {
    z_dim: usize,
    h_dim: usize,
    obs_dim: usize,
    terminate_every: usize,
    discount: f32,
    n_encode: Cell<usize>,
    n_predict: Cell<usize>,
    n_optimize: usize,
    n_pretrain_obs: usize,
    n_pretrain_dyn: usize,
    pretrain_obs_samples: usize,
}

impl DummyWorldModel {
    /// Creates a model with latents of `z_dim` and hidden states of `h_dim`.
    /// With `h_dim == 0`, no hidden states are produced.
    pub fn new(z_dim: usize, h_dim: usize) -> Self {
        Self {
            z_dim: z_dim.max(1),
            h_dim,
            obs_dim: 3,
            terminate_every: 0,
            discount: 0.99,
            n_encode: Cell::new(0),
            n_predict: Cell::new(0),
            n_optimize: 0,
            n_pretrain_obs: 0,
            n_pretrain_dyn: 0,
            pretrain_obs_samples: 0,
        }
    }

    /// Sets the termination period of predictions. Zero never terminates.
    pub fn terminate_every(mut self, v: usize) -> Self {
        self.terminate_every = v;
        self
    }

    /// Sets the length of decoded observations.
    pub fn obs_dim(mut self, v: usize) -> Self {
        self.obs_dim = v;
        self
    }

    /// Number of calls of [`WorldModel::encode`].
    pub fn num_encode(&self) -> usize {
        self.n_encode.get()
    }

    /// Number of calls of [`WorldModel::predict`].
    pub fn num_predict(&self) -> usize {
        self.n_predict.get()
    }

    /// Number of calls of [`WorldModel::optimize`].
    pub fn num_optimize(&self) -> usize {
        self.n_optimize
    }

    /// Number of calls of [`WorldModel::optimize_pretrain_obs`].
    pub fn num_pretrain_obs(&self) -> usize {
        self.n_pretrain_obs
    }

    /// Number of observations given to [`WorldModel::optimize_pretrain_obs`].
    pub fn pretrain_obs_samples(&self) -> usize {
        self.pretrain_obs_samples
    }

    /// Number of calls of [`WorldModel::optimize_pretrain_dyn`].
    pub fn num_pretrain_dyn(&self) -> usize {
        self.n_pretrain_dyn
    }
}

impl WorldModel for DummyWorldModel {
    type Dist = Array3<f32>;

    fn encode(&self, obs: &ArrayD<f32>) -> Result<Self::Dist> {
        if obs.ndim() < 2 {
            return Err(shape_error(format!("cannot encode {:?}", obs.shape())));
        }
        self.n_encode.set(self.n_encode.get() + 1);
        let (n, t) = (obs.shape()[0], obs.shape()[1]);
        let rest: usize = obs.shape()[2..].iter().product();
        let flat = Array3::from_shape_vec((n, t, rest), obs.iter().cloned().collect())?;
        let mean = flat
            .mean_axis(Axis(2))
            .unwrap_or_else(|| Array2::zeros((n, t)));
        Ok(Array3::from_shape_fn((n, t, self.z_dim), |(i, j, k)| {
            mean[[i, j]] + k as f32
        }))
    }

    fn sample_z(
        &self,
        dist: &Self::Dist,
        idx: Option<&[usize]>,
        _temperature: f32,
    ) -> Result<(Array3<f32>, ArrayD<f32>)> {
        let z = match idx {
            Some(idx) => {
                if idx.iter().any(|&i| i >= dist.shape()[0]) {
                    return Err(shape_error(format!(
                        "index out of {} distributions",
                        dist.shape()[0]
                    )));
                }
                dist.select(Axis(0), idx)
            }
            None => dist.clone(),
        };
        let logits = z.clone().into_dyn();
        Ok((z, logits))
    }

    fn decode(&self, z: &Array3<f32>) -> Result<ArrayD<f32>> {
        let (n, t, _) = z.dim();
        Ok(Array3::from_shape_fn((n, t, self.obs_dim), |(i, j, _)| z[[i, j, 0]]).into_dyn())
    }

    fn predict(
        &self,
        input: &DynamicsInput,
        tgt_length: usize,
        _temperature: f32,
    ) -> Result<Prediction> {
        let (b, t) = (input.batch_size(), input.len());
        if tgt_length == 0
            || tgt_length > t
            || input.a.shape()[..2] != [b, t]
            || input.r.dim() != (b, t)
            || input.g.dim() != (b, t)
            || input.d.dim() != (b, t)
        {
            return Err(shape_error(format!(
                "predict {} of {:?} latents with actions {:?}",
                tgt_length,
                input.z.shape(),
                input.a.shape()
            )));
        }
        let count = self.n_predict.get() + 1;
        self.n_predict.set(count);

        let z = input.z.slice(s![.., t - tgt_length.., ..]).mapv(|v| v + 1.0);
        let h = if self.h_dim > 0 {
            Some(Array3::from_shape_fn((b, tgt_length, self.h_dim), |(_, j, _)| {
                (t - tgt_length + j + 1) as f32
            }))
        } else {
            None
        };
        let every = self.terminate_every;
        Ok(Prediction {
            logits: z.clone().into_dyn(),
            z,
            h,
            reward: Array2::ones((b, tgt_length)),
            is_terminated: Array2::from_shape_fn((b, tgt_length), |(i, _)| {
                every > 0 && (count + i) % every == 0
            }),
        })
    }

    fn to_discounts(&self, is_terminated: &Array2<bool>) -> Array2<f32> {
        let discount = self.discount;
        is_terminated.mapv(|t| if t { 0.0 } else { discount })
    }

    fn optimize(&mut self, batch: &SequenceBatch) -> Result<WorldModelOutput> {
        let n = batch.obs.shape().get(1).copied().unwrap_or(0);
        if n != batch.seq_len() + 1 {
            return Err(shape_error(format!(
                "{} observations for {} transitions",
                n,
                batch.seq_len()
            )));
        }
        self.n_optimize += 1;

        let obs = batch.obs.slice_axis(Axis(1), Slice::from(..n - 1)).to_owned();
        let z = self.encode(&obs)?;
        let h = if self.h_dim > 0 {
            Some(Array3::zeros((batch.len(), n - 1, self.h_dim)))
        } else {
            None
        };
        Ok(WorldModelOutput {
            z,
            h,
            record: Record::from_scalar("loss", 1.0 / self.n_optimize as f32),
        })
    }

    fn optimize_pretrain_obs(&mut self, obs: &ArrayD<f32>) -> Result<Record> {
        if obs.ndim() < 2 || obs.shape()[1] != 1 {
            return Err(shape_error(format!("obs pretraining on {:?}", obs.shape())));
        }
        self.n_pretrain_obs += 1;
        self.pretrain_obs_samples += obs.shape()[0];
        Ok(Record::from_scalar("obs_loss", 1.0))
    }

    fn optimize_pretrain_dyn(
        &mut self,
        input: &DynamicsInput,
        target_logits: &ArrayD<f32>,
    ) -> Result<Record> {
        if target_logits.ndim() < 2
            || target_logits.shape()[..2] != [input.batch_size(), input.len()]
        {
            return Err(shape_error(format!(
                "targets {:?} for {:?} latents",
                target_logits.shape(),
                input.z.shape()
            )));
        }
        self.n_pretrain_dyn += 1;
        Ok(Record::from_scalar("dyn_loss", 1.0))
    }

    fn save_params(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(
            self.n_optimize as u64,
            self.n_pretrain_obs as u64,
            self.n_pretrain_dyn as u64,
        ))?)
    }

    fn load_params(&mut self, bytes: &[u8]) -> Result<()> {
        let (n_optimize, n_pretrain_obs, n_pretrain_dyn): (u64, u64, u64) =
            bincode::deserialize(bytes)?;
        self.n_optimize = n_optimize as usize;
        self.n_pretrain_obs = n_pretrain_obs as usize;
        self.n_pretrain_dyn = n_pretrain_dyn as usize;
        Ok(())
    }
}

/// Actor-critic choosing a discrete action from the first latent component.
pub struct DummyActorCritic {
    num_actions: usize,
    n_act: Cell<usize>,
    n_optimize: usize,
    n_pretrain: usize,
    n_sync: usize,
    last_horizon: Option<usize>,
}

impl DummyActorCritic {
    /// Creates an actor-critic for `num_actions` discrete actions.
    pub fn new(num_actions: usize) -> Self {
        Self {
            num_actions: num_actions.max(1),
            n_act: Cell::new(0),
            n_optimize: 0,
            n_pretrain: 0,
            n_sync: 0,
            last_horizon: None,
        }
    }

    /// Number of calls of [`ActorCritic::act`].
    pub fn num_act(&self) -> usize {
        self.n_act.get()
    }

    /// Number of calls of [`ActorCritic::optimize`].
    pub fn num_optimize(&self) -> usize {
        self.n_optimize
    }

    /// Number of calls of [`ActorCritic::optimize_pretrain`].
    pub fn num_pretrain(&self) -> usize {
        self.n_pretrain
    }

    /// Number of calls of [`ActorCritic::sync_target`].
    pub fn num_sync(&self) -> usize {
        self.n_sync
    }

    /// Horizon of the last trajectory given to [`ActorCritic::optimize`].
    pub fn last_horizon(&self) -> Option<usize> {
        self.last_horizon
    }
}

impl ActorCritic for DummyActorCritic {
    fn act(&self, z: &Array2<f32>, h: Option<&Array2<f32>>) -> Result<Array2<f32>> {
        if let Some(h) = h {
            if h.nrows() != z.nrows() {
                return Err(shape_error(format!(
                    "{} hidden states for {} latents",
                    h.nrows(),
                    z.nrows()
                )));
            }
        }
        self.n_act.set(self.n_act.get() + 1);
        let n = self.num_actions;
        Ok(Array2::from_shape_fn((z.nrows(), 1), |(b, _)| {
            ((z[[b, 0]].abs() * 7.0) as usize % n) as f32
        }))
    }

    fn optimize(&mut self, trajectory: &Trajectory) -> Result<Record> {
        let (b, horizon) = (trajectory.batch_size(), trajectory.horizon());
        let steps_ok = [
            trajectory.r.dim(),
            trajectory.g.dim(),
            trajectory.d.dim(),
            trajectory.weights.dim(),
        ]
        .iter()
        .all(|dim| *dim == (b, horizon));
        let h_ok = trajectory
            .h
            .as_ref()
            .map_or(true, |h| h.shape()[..2] == [b, horizon + 1]);
        if !steps_ok || !h_ok || trajectory.z.shape()[1] != horizon + 1 {
            return Err(shape_error(format!(
                "trajectory of {:?} latents and {:?} actions",
                trajectory.z.shape(),
                trajectory.a.shape()
            )));
        }
        self.n_optimize += 1;
        self.last_horizon = Some(horizon);
        Ok(Record::from_slice(&[
            ("actor_loss", RecordValue::Scalar(0.5)),
            ("critic_loss", RecordValue::Scalar(0.25)),
        ]))
    }

    fn optimize_pretrain(
        &mut self,
        z: &Array3<f32>,
        h: Option<&Array3<f32>>,
        r: &Array2<f32>,
        g: &Array2<f32>,
        d: &Array2<bool>,
    ) -> Result<Record> {
        let (b, t) = r.dim();
        let ok = z.shape()[..2] == [b, t + 1]
            && h.map_or(true, |h| h.shape()[..2] == [b, t + 1])
            && g.dim() == (b, t)
            && d.dim() == (b, t);
        if !ok {
            return Err(shape_error(format!(
                "pretraining on {:?} latents and {:?} rewards",
                z.shape(),
                r.shape()
            )));
        }
        self.n_pretrain += 1;
        Ok(Record::from_scalar("critic_loss", 0.25))
    }

    fn sync_target(&mut self) {
        self.n_sync += 1;
    }

    fn save_params(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(self.n_optimize as u64, self.n_sync as u64))?)
    }

    fn load_params(&mut self, bytes: &[u8]) -> Result<()> {
        let (n_optimize, n_sync): (u64, u64) = bincode::deserialize(bytes)?;
        self.n_optimize = n_optimize as usize;
        self.n_sync = n_sync as usize;
        Ok(())
    }
}
