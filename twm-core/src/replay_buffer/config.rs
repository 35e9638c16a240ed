//! Configuration of the replay store.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`ReplayStore`](super::ReplayStore).
///
/// # Examples
///
/// ```rust
/// use twm_core::replay_buffer::ReplayStoreConfig;
///
/// let config = ReplayStoreConfig::default()
///     .capacity(100_000)
///     .temperature(Some(20.0))
///     .seed(42);
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayStoreConfig {
    /// Maximum number of transitions. The trainer stops collecting when the
    /// store is full, so this is also the number of environment steps.
    pub capacity: usize,

    /// Number of transitions every sampled window is guaranteed to have
    /// before its first index.
    pub context: usize,

    /// Temperature of the softmax over negative visit counts used when
    /// sampling window starts. `None` samples uniformly.
    pub temperature: Option<f32>,

    /// Random seed used for sampling.
    pub seed: u64,
}

impl Default for ReplayStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            context: 1,
            temperature: None,
            seed: 42,
        }
    }
}

impl ReplayStoreConfig {
    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the number of guaranteed context transitions.
    pub fn context(mut self, context: usize) -> Self {
        self.context = context;
        self
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_replay_store_config() -> Result<()> {
        let config = ReplayStoreConfig::default()
            .capacity(500)
            .context(2)
            .temperature(Some(20.0));

        let dir = TempDir::new("replay_store_config")?;
        let path = dir.path().join("replay_store_config.yaml");
        config.save(&path)?;
        let config_ = ReplayStoreConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}
