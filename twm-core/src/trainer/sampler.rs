//! Experience sampling into the replay store.
//!
//! The sampler steps the training environment with actions chosen by a
//! [`BufferPolicy`] and appends every step to the store as a [`Transition`].
//! When an episode ends, the environment is reset and the reset observation
//! becomes the `next_obs` of the final transition, so the tail observation of
//! the store is always the observation the environment presents.
use super::BufferPolicy;
use crate::{
    base::{Env, Transition},
    record::Record,
    replay_buffer::ReplayStore,
};
use anyhow::Result;
use ndarray::ArrayD;

/// Manages the sampling of experiences from the environment.
pub struct Sampler<E: Env> {
    /// The environment being sampled from.
    env: E,

    /// Previous observation from the environment.
    prev_obs: Option<ArrayD<f32>>,

    /// Return of the running episode.
    episode_return: f32,
}

impl<E: Env> Sampler<E> {
    /// Creates a sampler; the environment is reset on the first sample.
    pub fn new(env: E) -> Self {
        Self {
            env,
            prev_obs: None,
            episode_return: 0.0,
        }
    }

    /// Resets the environment and returns the initial observation.
    pub fn reset(&mut self) -> Result<&ArrayD<f32>> {
        self.episode_return = 0.0;
        Ok(&*self.prev_obs.insert(self.env.reset(None)?))
    }

    /// The environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Takes one step chosen by `policy` and pushes it to `buffer`.
    ///
    /// Returns the episode return under `episode_return` when the step ended
    /// an episode, an empty record otherwise.
    pub fn sample_and_push<P: BufferPolicy + ?Sized>(
        &mut self,
        policy: &mut P,
        buffer: &mut ReplayStore,
    ) -> Result<Record> {
        if self.prev_obs.is_none() {
            self.reset()?;
        }

        let act = policy.act(buffer)?;
        let step = self.env.step(&act)?;
        let is_done = step.is_done();
        self.episode_return += step.reward;

        let next_obs = match is_done {
            true => self.env.reset(None)?,
            false => step.obs,
        };
        let obs = match self.prev_obs.replace(next_obs.clone()) {
            Some(obs) => obs,
            None => next_obs.clone(),
        };

        buffer.push(Transition {
            obs,
            act,
            reward: step.reward,
            is_terminated: step.is_terminated,
            is_truncated: step.is_truncated,
            next_obs,
        })?;

        let mut record = Record::empty();
        if is_done {
            record = Record::from_scalar("episode_return", self.episode_return);
            self.episode_return = 0.0;
        }
        Ok(record)
    }

    /// Closes the environment.
    pub fn close(&mut self) {
        self.env.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::ActionSpace,
        dummy::{DummyEnv, DummyEnvConfig},
        replay_buffer::ReplayStoreConfig,
        trainer::RandomPolicy,
    };
    use ndarray::Array2;

    #[test]
    fn test_sample_and_push() -> Result<()> {
        let config = DummyEnvConfig::default().episode_len(4);
        let mut sampler = Sampler::new(DummyEnv::build(&config, 0)?);
        let mut store = ReplayStore::build(&ReplayStoreConfig::default(), &[3], 1)?;
        let mut policy = RandomPolicy::new(ActionSpace::Discrete(2), 0);

        let mut returns = vec![];
        for _ in 0..10 {
            let record = sampler.sample_and_push(&mut policy, &mut store)?;
            if let Ok(r) = record.get_scalar("episode_return") {
                returns.push(r);
            }
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.total_reward(), 10.0);
        assert_eq!(store.num_episodes(), 2);
        assert_eq!(returns, vec![4.0, 4.0]);

        // The final transition of an episode leads to the reset observation.
        let ixs = Array2::from_elem((1, 1), 4);
        let obs = store.get_obs(&ixs, 1, false)?;
        assert_eq!(obs[[0, 1, 0]], 0.0);
        assert!(store.get_terminated(&Array2::from_elem((1, 1), 3), 0)?[[0, 0]]);
        Ok(())
    }
}
