//! Environment.
use super::Step;
use anyhow::Result;
use ndarray::{Array1, ArrayD};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Action space of an environment.
///
/// Actions are carried as `Array1<f32>`. For a discrete space the array has a
/// single element holding the action index.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ActionSpace {
    /// `n` discrete actions.
    Discrete(usize),

    /// A box of continuous actions.
    Continuous {
        /// Lower bounds.
        low: Vec<f32>,
        /// Upper bounds.
        high: Vec<f32>,
    },
}

impl ActionSpace {
    /// Length of the action vectors stored in the replay buffer.
    pub fn dim(&self) -> usize {
        match self {
            Self::Discrete(_) => 1,
            Self::Continuous { low, .. } => low.len(),
        }
    }

    /// Number of discrete actions, or the dimension of the continuous space.
    pub fn num_actions(&self) -> usize {
        match self {
            Self::Discrete(n) => *n,
            Self::Continuous { low, .. } => low.len(),
        }
    }

    /// Samples an action uniformly at random.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f32> {
        match self {
            Self::Discrete(n) => Array1::from_elem(1, rng.gen_range(0..(*n).max(1)) as f32),
            Self::Continuous { low, high } => low
                .iter()
                .zip(high.iter())
                .map(|(l, h)| l + (h - l) * rng.gen::<f32>())
                .collect(),
        }
    }
}

/// Represents an environment, typically an MDP.
///
/// Environments do not reset themselves; the caller resets after a step whose
/// [`Step::is_done`] is `true`.
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// The action space.
    fn action_space(&self) -> ActionSpace;

    /// Resets the environment and returns the initial observation.
    ///
    /// `seed` reseeds the environment when given.
    fn reset(&mut self, seed: Option<u64>) -> Result<ArrayD<f32>>;

    /// Performs an environment step.
    fn step(&mut self, act: &Array1<f32>) -> Result<Step>;

    /// Releases resources held by the environment.
    fn close(&mut self) {}
}
