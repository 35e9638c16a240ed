//! Core interfaces: environments, models and the data exchanged between them.
mod actor_critic;
mod batch;
mod env;
mod step;
mod world_model;
pub use actor_critic::ActorCritic;
pub use batch::{DynamicsInput, SequenceBatch, Trajectory};
pub use env::{ActionSpace, Env};
pub use step::{Step, StepInfo, Transition};
pub use world_model::{Prediction, WorldModel, WorldModelOutput};
