//! Configuration of [`Trainer`](super::Trainer).
use super::TrainSchedule;
use crate::error::TwmError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Family of environments, selecting how evaluation scores are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvSuite {
    /// Atari games, scored with the human-normalized score.
    Atari,

    /// D4RL tasks.
    D4rl,

    /// D3RL tasks.
    D3rl,
}

impl fmt::Display for EnvSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atari => write!(f, "atari"),
            Self::D4rl => write!(f, "d4rl"),
            Self::D3rl => write!(f, "d3rl"),
        }
    }
}

/// Configuration of [`Trainer`](super::Trainer).
///
/// Sizes and intervals are counted in environment steps, which equal the
/// number of transitions in the replay store. Budgets are counted in samples
/// seen by the optimizers.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrainerConfig {
    /// Seed of the training environment, the replay store and evaluations.
    pub seed: i64,

    /// Number of environment steps, also the capacity of the replay store.
    pub env_steps: usize,

    /// Number of random steps before pretraining.
    pub buffer_prefill: usize,

    /// Temperature of the visit-count softmax of the replay store.
    /// `None` samples windows uniformly.
    pub buffer_temperature: Option<f32>,

    /// Total number of samples given to the optimizers.
    pub budget: usize,

    /// Part of [`TrainerConfig::budget`] spent on pretraining.
    pub pretrain_budget: usize,

    /// Fraction of the pretraining budget spent on the observation model.
    pub pretrain_obs_p: f32,

    /// Fraction of the pretraining budget spent on the dynamics model.
    pub pretrain_dyn_p: f32,

    /// Number of windows of a world-model batch.
    pub wm_batch_size: usize,

    /// Number of transitions of a world-model window.
    pub wm_sequence_length: usize,

    /// World-model optimization steps per training round.
    pub wm_train_steps: usize,

    /// Maximal number of latents the dynamics model conditions on.
    pub wm_memory_length: usize,

    /// Number of imagined rollouts per actor-critic optimization.
    pub ac_batch_size: usize,

    /// Length of imagined rollouts.
    pub ac_horizon: usize,

    /// Feeds hidden states of the dynamics model to the actor-critic.
    pub ac_input_h: bool,

    /// Interval of evaluations.
    pub eval_every: usize,

    /// Number of episodes of an evaluation.
    pub eval_episodes: usize,

    /// Number of episodes of the final evaluation.
    pub final_eval_episodes: usize,

    /// Number of environments run side by side during evaluation.
    pub eval_num_envs: usize,

    /// Saves checkpoints to [`TrainerConfig::model_dir`].
    pub save: bool,

    /// Interval of checkpoints.
    pub save_every: usize,

    /// Directory of checkpoints.
    pub model_dir: Option<String>,

    /// Interval of emitted records.
    pub log_every: usize,

    /// Family of the environment.
    pub env_suite: EnvSuite,

    /// Name of the game or task.
    pub game: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            env_steps: 100_000,
            buffer_prefill: 5_000,
            buffer_temperature: Some(20.0),
            budget: 1_000_000_000,
            pretrain_budget: 50_000_000,
            pretrain_obs_p: 0.6,
            pretrain_dyn_p: 0.3,
            wm_batch_size: 100,
            wm_sequence_length: 16,
            wm_train_steps: 1,
            wm_memory_length: 16,
            ac_batch_size: 400,
            ac_horizon: 15,
            ac_input_h: false,
            eval_every: 5_000,
            eval_episodes: 10,
            final_eval_episodes: 100,
            eval_num_envs: 10,
            save: false,
            save_every: 5_000,
            model_dir: None,
            log_every: 20,
            env_suite: EnvSuite::Atari,
            game: "Breakout".to_string(),
        }
    }
}

impl TrainerConfig {
    /// Sets the seed.
    pub fn seed(mut self, v: i64) -> Self {
        self.seed = v;
        self
    }

    /// Sets the number of environment steps.
    pub fn env_steps(mut self, v: usize) -> Self {
        self.env_steps = v;
        self
    }

    /// Sets the number of random steps before pretraining.
    pub fn buffer_prefill(mut self, v: usize) -> Self {
        self.buffer_prefill = v;
        self
    }

    /// Sets the temperature of the replay store.
    pub fn buffer_temperature(mut self, v: Option<f32>) -> Self {
        self.buffer_temperature = v;
        self
    }

    /// Sets the total budget.
    pub fn budget(mut self, v: usize) -> Self {
        self.budget = v;
        self
    }

    /// Sets the pretraining budget.
    pub fn pretrain_budget(mut self, v: usize) -> Self {
        self.pretrain_budget = v;
        self
    }

    /// Sets the fraction of pretraining spent on the observation model.
    pub fn pretrain_obs_p(mut self, v: f32) -> Self {
        self.pretrain_obs_p = v;
        self
    }

    /// Sets the fraction of pretraining spent on the dynamics model.
    pub fn pretrain_dyn_p(mut self, v: f32) -> Self {
        self.pretrain_dyn_p = v;
        self
    }

    /// Sets the world-model batch size.
    pub fn wm_batch_size(mut self, v: usize) -> Self {
        self.wm_batch_size = v;
        self
    }

    /// Sets the world-model sequence length.
    pub fn wm_sequence_length(mut self, v: usize) -> Self {
        self.wm_sequence_length = v;
        self
    }

    /// Sets the world-model optimization steps per round.
    pub fn wm_train_steps(mut self, v: usize) -> Self {
        self.wm_train_steps = v;
        self
    }

    /// Sets the memory length of the dynamics model.
    pub fn wm_memory_length(mut self, v: usize) -> Self {
        self.wm_memory_length = v;
        self
    }

    /// Sets the actor-critic batch size.
    pub fn ac_batch_size(mut self, v: usize) -> Self {
        self.ac_batch_size = v;
        self
    }

    /// Sets the imagination horizon.
    pub fn ac_horizon(mut self, v: usize) -> Self {
        self.ac_horizon = v;
        self
    }

    /// Sets whether the actor-critic sees hidden states.
    pub fn ac_input_h(mut self, v: bool) -> Self {
        self.ac_input_h = v;
        self
    }

    /// Sets the evaluation interval.
    pub fn eval_every(mut self, v: usize) -> Self {
        self.eval_every = v;
        self
    }

    /// Sets the number of evaluation episodes.
    pub fn eval_episodes(mut self, v: usize) -> Self {
        self.eval_episodes = v;
        self
    }

    /// Sets the number of episodes of the final evaluation.
    pub fn final_eval_episodes(mut self, v: usize) -> Self {
        self.final_eval_episodes = v;
        self
    }

    /// Sets the number of evaluation environments.
    pub fn eval_num_envs(mut self, v: usize) -> Self {
        self.eval_num_envs = v;
        self
    }

    /// Sets whether checkpoints are saved.
    pub fn save(mut self, v: bool) -> Self {
        self.save = v;
        self
    }

    /// Sets the checkpoint interval.
    pub fn save_every(mut self, v: usize) -> Self {
        self.save_every = v;
        self
    }

    /// Sets the checkpoint directory.
    pub fn model_dir(mut self, v: impl Into<String>) -> Self {
        self.model_dir = Some(v.into());
        self
    }

    /// Sets the interval of emitted records.
    pub fn log_every(mut self, v: usize) -> Self {
        self.log_every = v;
        self
    }

    /// Sets the environment family.
    pub fn env_suite(mut self, v: EnvSuite) -> Self {
        self.env_suite = v;
        self
    }

    /// Sets the game.
    pub fn game(mut self, v: impl Into<String>) -> Self {
        self.game = v.into();
        self
    }

    /// Checks the invariants a [`Trainer`](super::Trainer) relies on.
    ///
    /// Every violation is reported as [`TwmError::Configuration`].
    pub fn validate(&self) -> Result<(), TwmError> {
        let err = |msg: String| Err(TwmError::Configuration(msg));

        let positive = [
            ("buffer_prefill", self.buffer_prefill),
            ("wm_batch_size", self.wm_batch_size),
            ("wm_sequence_length", self.wm_sequence_length),
            ("wm_train_steps", self.wm_train_steps),
            ("ac_batch_size", self.ac_batch_size),
            ("ac_horizon", self.ac_horizon),
            ("eval_every", self.eval_every),
            ("eval_episodes", self.eval_episodes),
            ("final_eval_episodes", self.final_eval_episodes),
            ("eval_num_envs", self.eval_num_envs),
            ("log_every", self.log_every),
        ];
        for (name, v) in positive.iter() {
            if *v == 0 {
                return err(format!("{} must be positive", name));
            }
        }

        let (obs_p, dyn_p) = (self.pretrain_obs_p, self.pretrain_dyn_p);
        if !(obs_p >= 0.0 && dyn_p >= 0.0) {
            return err(format!(
                "pretraining fractions must be non-negative, got {} and {}",
                obs_p, dyn_p
            ));
        }
        if obs_p + dyn_p > 1.0 + 1e-6 {
            return err(format!(
                "pretraining fractions {} and {} sum to more than one",
                obs_p, dyn_p
            ));
        }

        if self.buffer_prefill > self.env_steps {
            return err(format!(
                "buffer_prefill {} exceeds env_steps {}",
                self.buffer_prefill, self.env_steps
            ));
        }
        let min_prefill = self.wm_sequence_length.max(self.ac_horizon) + 2;
        if self.buffer_prefill < min_prefill {
            return err(format!(
                "buffer_prefill {} is below {}, the length of the longest pretraining window",
                self.buffer_prefill, min_prefill
            ));
        }

        if let Some(t) = self.buffer_temperature {
            if !(t > 0.0) {
                return err(format!("buffer_temperature must be positive, got {}", t));
            }
        }

        if self.save {
            if self.model_dir.is_none() {
                return err("save requires model_dir".to_string());
            }
            if self.save_every == 0 {
                return err("save_every must be positive".to_string());
            }
        }

        TrainSchedule::new(self).map(|_| ())
    }

    /// Constructs [`TrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrainerConfig`].
    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn small() -> TrainerConfig {
        TrainerConfig::default()
            .env_steps(100)
            .buffer_prefill(10)
            .budget(10_000)
            .pretrain_budget(1_000)
            .wm_batch_size(2)
            .wm_sequence_length(4)
            .ac_batch_size(3)
            .ac_horizon(5)
    }

    fn is_configuration(err: TwmError) -> bool {
        matches!(err, TwmError::Configuration(_))
    }

    #[test]
    fn test_serde_trainer_config() -> Result<()> {
        let config = small()
            .seed(3)
            .model_dir("some/directory")
            .env_suite(EnvSuite::D4rl)
            .game("hopper");

        let dir = TempDir::new("trainer_config")?;
        let path = dir.path().join("trainer_config.yaml");
        config.save_yaml(&path)?;
        let config_ = TrainerConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }

    #[test]
    fn test_validate_default() {
        assert!(TrainerConfig::default().validate().is_ok());
        assert!(small().validate().is_ok());
    }

    #[test]
    fn test_validate_pretrain_fractions() {
        let ok = small().pretrain_obs_p(0.6).pretrain_dyn_p(0.3);
        assert!(ok.validate().is_ok());
        let ok = small().pretrain_obs_p(0.7).pretrain_dyn_p(0.3);
        assert!(ok.validate().is_ok());

        let bad = small().pretrain_obs_p(0.7).pretrain_dyn_p(0.4);
        assert!(is_configuration(bad.validate().unwrap_err()));
        let bad = small().pretrain_obs_p(-0.1);
        assert!(is_configuration(bad.validate().unwrap_err()));
    }

    #[test]
    fn test_validate_prefill() {
        assert!(is_configuration(small().buffer_prefill(0).validate().unwrap_err()));
        assert!(is_configuration(small().buffer_prefill(101).validate().unwrap_err()));
        // The longest pretraining window needs ac_horizon + 2 observations.
        assert!(is_configuration(small().buffer_prefill(6).validate().unwrap_err()));
        assert!(small().buffer_prefill(7).validate().is_ok());
    }

    #[test]
    fn test_validate_save_and_budget() {
        assert!(is_configuration(small().save(true).validate().unwrap_err()));
        assert!(small().save(true).model_dir("dir").validate().is_ok());
        assert!(is_configuration(small().budget(1_000).validate().unwrap_err()));
        assert!(is_configuration(small().buffer_prefill(100).validate().unwrap_err()));
        assert!(is_configuration(small().ac_horizon(0).validate().unwrap_err()));
    }

    #[test]
    fn test_validate_buffer_temperature() {
        assert!(small().buffer_temperature(None).validate().is_ok());
        assert!(small().buffer_temperature(Some(0.5)).validate().is_ok());
        for t in [0.0, -20.0, f32::NAN] {
            let bad = small().buffer_temperature(Some(t));
            assert!(is_configuration(bad.validate().unwrap_err()));
        }
    }
}
