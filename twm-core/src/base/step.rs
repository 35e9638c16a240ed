//! Environment step and transition.
use ndarray::{Array1, ArrayD};

/// Additional information of a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Remaining lives in arcade-style domains.
    pub lives: Option<u32>,
}

/// Represents an observation, reward and flags emitted by an environment step.
#[derive(Debug, Clone)]
pub struct Step {
    /// Observation after the step.
    pub obs: ArrayD<f32>,

    /// Reward.
    pub reward: f32,

    /// Flag denoting if episode is terminated.
    pub is_terminated: bool,

    /// Flag denoting if episode is truncated.
    pub is_truncated: bool,

    /// Information defined by the environment.
    pub info: StepInfo,
}

impl Step {
    #[inline]
    /// Terminated or truncated.
    pub fn is_done(&self) -> bool {
        self.is_terminated || self.is_truncated
    }
}

/// An item pushed into the [`ReplayStore`](crate::replay_buffer::ReplayStore).
#[derive(Debug, Clone)]
pub struct Transition {
    /// Observation on which the action was taken.
    pub obs: ArrayD<f32>,

    /// Action.
    pub act: Array1<f32>,

    /// Reward of the action.
    pub reward: f32,

    /// Flag denoting if episode is terminated.
    pub is_terminated: bool,

    /// Flag denoting if episode is truncated.
    pub is_truncated: bool,

    /// Observation the next transition starts from.
    ///
    /// This is the reset observation of the next episode when this transition
    /// ended an episode.
    pub next_obs: ArrayD<f32>,
}

impl Transition {
    #[inline]
    /// Terminated or truncated.
    pub fn is_done(&self) -> bool {
        self.is_terminated || self.is_truncated
    }
}
