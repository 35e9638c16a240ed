use super::RollerMode;
use thiserror::Error;

/// Misuse of a [`Dreamer`](super::Dreamer).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RollerError {
    /// `act` or a step was called before a reset.
    #[error("the roller must be reset before acting or stepping")]
    NotReset,

    /// An operation of the other mode was called.
    #[error("operation of {expected} mode called on a roller in {actual} mode")]
    WrongMode {
        /// Mode the operation belongs to.
        expected: RollerMode,
        /// Mode of the roller.
        actual: RollerMode,
    },

    /// The roller does not record trajectories.
    #[error("the roller was created without store_data")]
    NoStoredData,
}
