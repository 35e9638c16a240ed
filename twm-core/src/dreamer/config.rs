//! Configuration of [`Dreamer`](super::Dreamer).
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a [`Dreamer`](super::Dreamer) obtains its latents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RollerMode {
    /// Latents are encoded from real observations.
    Observe,

    /// Latents are sampled from the predictions of the dynamics model.
    Imagine,
}

impl fmt::Display for RollerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observe => write!(f, "observe"),
            Self::Imagine => write!(f, "imagine"),
        }
    }
}

/// Configuration of [`Dreamer`](super::Dreamer).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DreamerConfig {
    /// Mode, fixed for the lifetime of the roller.
    pub mode: RollerMode,

    /// Records the trajectory for [`Dreamer::get_data`](super::Dreamer::get_data).
    pub store_data: bool,

    /// Decodes an observation for every latent.
    pub always_compute_obs: bool,

    /// Maximal number of latents the dynamics model conditions on.
    pub memory_length: usize,

    /// Sampling temperature of the latents.
    pub temperature: f32,

    /// Passes hidden states to the actor-critic and into recorded trajectories.
    pub ac_input_h: bool,
}

impl Default for DreamerConfig {
    fn default() -> Self {
        Self {
            mode: RollerMode::Observe,
            store_data: false,
            always_compute_obs: false,
            memory_length: 16,
            temperature: 1.0,
            ac_input_h: true,
        }
    }
}

impl DreamerConfig {
    /// Creates a configuration for the given mode.
    pub fn new(mode: RollerMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Sets whether to record the trajectory.
    pub fn store_data(mut self, v: bool) -> Self {
        self.store_data = v;
        self
    }

    /// Sets whether to decode an observation for every latent.
    pub fn always_compute_obs(mut self, v: bool) -> Self {
        self.always_compute_obs = v;
        self
    }

    /// Sets the memory length. Values below one are treated as one.
    pub fn memory_length(mut self, v: usize) -> Self {
        self.memory_length = v;
        self
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, v: f32) -> Self {
        self.temperature = v;
        self
    }

    /// Sets whether the actor-critic sees hidden states.
    pub fn ac_input_h(mut self, v: bool) -> Self {
        self.ac_input_h = v;
        self
    }
}
