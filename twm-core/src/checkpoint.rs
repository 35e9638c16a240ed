//! Checkpoints of a training run.
use crate::{
    base::{ActorCritic, WorldModel},
    trainer::TrainerConfig,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Parameters of both models together with the configuration that trained them.
///
/// Checkpoints are written with `bincode`. They do not contain the replay
/// store, so a restored run starts collecting into an empty store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Checkpoint {
    /// Configuration of the run.
    pub config: TrainerConfig,

    /// Output of [`WorldModel::save_params`].
    pub world_model: Vec<u8>,

    /// Output of [`ActorCritic::save_params`].
    pub actor_critic: Vec<u8>,

    /// Number of transitions in the replay store when the checkpoint was taken.
    pub size: usize,
}

impl Checkpoint {
    /// Takes a checkpoint of the models.
    pub fn new<W: WorldModel, A: ActorCritic>(
        config: &TrainerConfig,
        wm: &W,
        ac: &A,
        size: usize,
    ) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            world_model: wm.save_params()?,
            actor_critic: ac.save_params()?,
            size,
        })
    }

    /// Writes the checkpoint.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        bincode::serialize_into(file, self)?;
        Ok(())
    }

    /// Reads a checkpoint.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let rdr = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(rdr)?)
    }

    /// Loads the parameters into the models.
    pub fn restore<W: WorldModel, A: ActorCritic>(&self, wm: &mut W, ac: &mut A) -> Result<()> {
        wm.load_params(&self.world_model)?;
        ac.load_params(&self.actor_critic)
    }
}
