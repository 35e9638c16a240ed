//! Evaluation of a world model and an actor-critic in real environments.
mod score;
mod vec_env;
use crate::{
    base::{ActorCritic, Env, WorldModel},
    dreamer::{Dreamer, DreamerConfig, RollerMode},
    error::TwmError,
    trainer::{EnvSuite, TrainerConfig},
};
use anyhow::Result;
use log::{info, warn};
use ndarray::Axis;
pub use score::{atari_hns, normalize_game_name, EvalScores};
pub use vec_env::{SerialVecEnv, VecStep};

/// Runs episodes with an observing [`Dreamer`] and collects their returns.
///
/// An evaluation builds `min(num_episodes, eval_num_envs)` fresh environments
/// and plays them side by side. An environment is finished when it is
/// truncated, or terminated without lives left. Environments are reset only
/// once all of them are finished, so short episodes are not over-represented;
/// the returns beyond `num_episodes` are dropped.
///
/// The first reset uses seed `(seed + 13) * 7919 + 13`, every following one
/// `s * 3 + 13 + num_envs` where `s` is the previous seed. Seed arithmetic wraps.
pub struct DefaultEvaluator<E: Env> {
    env_config: E::Config,
    seed: i64,
    max_envs: usize,
    env_suite: EnvSuite,
    game: String,
    dreamer_config: DreamerConfig,
}

impl<E: Env> DefaultEvaluator<E> {
    /// Creates an evaluator for environments built from `env_config`.
    ///
    /// Fails when the suite is Atari and the game is not part of the score table.
    pub fn new(env_config: &E::Config, config: &TrainerConfig) -> Result<Self> {
        if config.env_suite == EnvSuite::Atari && atari_hns(&config.game, 0.0).is_none() {
            return Err(TwmError::Configuration(format!(
                "no human-normalized score for Atari game {}",
                config.game
            ))
            .into());
        }
        Ok(Self {
            env_config: env_config.clone(),
            seed: config.seed,
            max_envs: config.eval_num_envs,
            env_suite: config.env_suite,
            game: config.game.clone(),
            dreamer_config: DreamerConfig::new(RollerMode::Observe)
                .memory_length(config.wm_memory_length)
                .ac_input_h(config.ac_input_h),
        })
    }

    fn first_seed(&self) -> i64 {
        self.seed.wrapping_add(13).wrapping_mul(7919).wrapping_add(13)
    }

    /// Human-normalized score of a mean score, or the mean itself outside Atari.
    pub fn hns(&self, score_mean: f32) -> f32 {
        match self.env_suite {
            EnvSuite::Atari => atari_hns(&self.game, score_mean).unwrap_or(score_mean),
            _ => score_mean,
        }
    }

    /// Plays `num_episodes` episodes.
    pub fn evaluate<W, A>(&mut self, wm: &W, ac: &A, num_episodes: usize) -> Result<EvalScores>
    where
        W: WorldModel,
        A: ActorCritic,
    {
        let num_envs = num_episodes.min(self.max_envs).max(1);
        let mut envs = SerialVecEnv::<E>::build(&self.env_config, num_envs, self.seed)?;
        let mut seed = self.first_seed();
        info!(
            "Evaluating {} episodes in {} environments",
            num_episodes, num_envs
        );

        let obs = envs.reset(Some(seed as u64))?.insert_axis(Axis(1));
        let mut dreamer = Dreamer::new(self.dreamer_config.clone(), wm, ac);
        dreamer.observe_reset_single(&obs)?;

        let mut scores = vec![];
        let mut current = vec![0f32; num_envs];
        let mut finished = vec![false; num_envs];
        let mut num_truncated = 0;

        while scores.len() < num_episodes {
            let a = dreamer.act()?;
            let step = envs.step(&a)?;

            for i in 0..num_envs {
                if finished[i] {
                    continue;
                }
                current[i] += step.reward[i];
                if step.is_truncated[i] {
                    num_truncated += 1;
                    finished[i] = true;
                } else if step.is_terminated[i] && step.lives[i].unwrap_or(0) == 0 {
                    finished[i] = true;
                }
            }

            let obs = step.obs.insert_axis(Axis(1));
            dreamer.observe_step(&a, &obs, &step.reward, &step.is_terminated, &step.is_truncated)?;

            if finished.iter().all(|f| *f) {
                scores.extend(current.iter().cloned());
                if scores.len() >= num_episodes {
                    break;
                }
                current.iter_mut().for_each(|c| *c = 0.0);
                finished.iter_mut().for_each(|f| *f = false);
                seed = seed
                    .wrapping_mul(3)
                    .wrapping_add(13 + num_envs as i64);
                let obs = envs.reset(Some(seed as u64))?.insert_axis(Axis(1));
                dreamer = Dreamer::new(self.dreamer_config.clone(), wm, ac);
                dreamer.observe_reset_single(&obs)?;
            }
        }
        envs.close();

        scores.truncate(num_episodes);
        if num_truncated > 0 {
            warn!("{} episode(s) truncated", num_truncated);
        }
        Ok(EvalScores {
            scores,
            num_truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyActorCritic, DummyEnv, DummyEnvConfig, DummyWorldModel};

    fn config() -> TrainerConfig {
        TrainerConfig::default()
            .seed(1)
            .eval_num_envs(3)
            .game("Pong")
            .wm_memory_length(4)
    }

    #[test]
    fn test_evaluate_returns_requested_episodes() -> Result<()> {
        let wm = DummyWorldModel::new(4, 2);
        let ac = DummyActorCritic::new(2);
        let env_config = DummyEnvConfig::default().episode_len(3).lives(2);
        let mut evaluator = DefaultEvaluator::<DummyEnv>::new(&env_config, &config())?;

        for n in [1, 3, 5] {
            let scores = evaluator.evaluate(&wm, &ac, n)?;
            assert_eq!(scores.len(), n);
            assert!(scores.min() <= scores.mean() && scores.mean() <= scores.max());
            // Two lives of three steps with reward one.
            assert!(scores.scores.iter().all(|s| *s == 6.0));
            assert_eq!(scores.num_truncated, 0);
        }
        Ok(())
    }

    #[test]
    fn test_evaluate_counts_truncations() -> Result<()> {
        let wm = DummyWorldModel::new(4, 0);
        let ac = DummyActorCritic::new(2);
        let env_config = DummyEnvConfig::default()
            .episode_len(10)
            .truncate_at(Some(4));
        let mut evaluator = DefaultEvaluator::<DummyEnv>::new(&env_config, &config())?;
        let scores = evaluator.evaluate(&wm, &ac, 2)?;
        assert_eq!(scores.scores, vec![4.0, 4.0]);
        assert_eq!(scores.num_truncated, 2);
        Ok(())
    }

    #[test]
    fn test_unknown_atari_game() {
        let env_config = DummyEnvConfig::default();
        let config = config().game("hopper");
        assert!(DefaultEvaluator::<DummyEnv>::new(&env_config, &config).is_err());
        let config = config.env_suite(EnvSuite::D4rl);
        let evaluator = DefaultEvaluator::<DummyEnv>::new(&env_config, &config).unwrap();
        assert_eq!(evaluator.hns(3.0), 3.0);
    }
}
