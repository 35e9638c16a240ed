//! Replay store of environment transitions.
//!
//! [`ReplayStore`] keeps a fixed number of transitions in a ring. Training code
//! reads windows of consecutive transitions from it: random windows for the
//! world model ([`ReplayStore::sample_indices`]) and full sweeps for
//! pretraining ([`ReplayStore::generate_uniform_indices`]).
mod base;
mod config;
mod sweep;
pub use base::ReplayStore;
pub use config::ReplayStoreConfig;
pub use sweep::UniformSweep;
