#![warn(missing_docs)]
//! Core of world-model reinforcement learning.
//!
//! A [`Trainer`] collects transitions of an [`Env`] into a
//! [`ReplayStore`](replay_buffer::ReplayStore), optimizes a [`WorldModel`] on
//! windows of the store and an [`ActorCritic`] on trajectories imagined by a
//! [`Dreamer`](dreamer::Dreamer). The models themselves are supplied by the
//! user through the two traits.
pub mod checkpoint;
pub mod dreamer;
pub mod dummy;
pub mod error;
pub mod evaluator;
pub mod record;
pub mod replay_buffer;

mod base;
pub use base::{
    ActionSpace, ActorCritic, DynamicsInput, Env, Prediction, SequenceBatch, Step, StepInfo,
    Trajectory, Transition, WorldModel, WorldModelOutput,
};

mod trainer;
pub use trainer::{
    BufferObsPolicy, BufferPolicy, EnvSuite, RandomPolicy, Sampler, TrainSchedule, Trainer,
    TrainerConfig, TrainerState,
};
