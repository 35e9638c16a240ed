//! Environments stepped side by side.
use crate::{base::Env, error::TwmError};
use anyhow::Result;
use ndarray::{stack, Array1, Array2, ArrayD, Axis};

/// Batched outcome of [`SerialVecEnv::step`].
#[derive(Debug, Clone)]
pub struct VecStep {
    /// Observations `[N, ...]`.
    pub obs: ArrayD<f32>,

    /// Rewards `[N]`.
    pub reward: Array1<f32>,

    /// Termination flags `[N]`.
    pub is_terminated: Array1<bool>,

    /// Truncation flags `[N]`.
    pub is_truncated: Array1<bool>,

    /// Remaining lives reported by each environment.
    pub lives: Vec<Option<u32>>,
}

/// `N` independent environments stepped one after the other.
///
/// Environments are never reset automatically: a finished environment keeps
/// being stepped until [`SerialVecEnv::reset`] is called for all of them.
pub struct SerialVecEnv<E: Env> {
    envs: Vec<E>,
}

fn stack_obs(obs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    let views: Vec<_> = obs.iter().map(|o| o.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

impl<E: Env> SerialVecEnv<E> {
    /// Builds `n` environments. Environment `i` is built with seed `seed + i`.
    pub fn build(config: &E::Config, n: usize, seed: i64) -> Result<Self> {
        if n == 0 {
            return Err(TwmError::Configuration("no environment to build".to_string()).into());
        }
        let envs = (0..n)
            .map(|i| E::build(config, seed.wrapping_add(i as i64)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { envs })
    }

    /// Number of environments.
    pub fn len(&self) -> usize {
        self.envs.len()
    }

    /// Returns `true` if there is no environment.
    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    /// Resets all environments and returns the observations `[N, ...]`.
    ///
    /// With a seed, environment `i` is reseeded with `seed + i`.
    pub fn reset(&mut self, seed: Option<u64>) -> Result<ArrayD<f32>> {
        let obs = self
            .envs
            .iter_mut()
            .enumerate()
            .map(|(i, env)| env.reset(seed.map(|s| s.wrapping_add(i as u64))))
            .collect::<Result<Vec<_>>>()?;
        stack_obs(&obs)
    }

    /// Steps environment `i` with row `i` of `acts` `[N, A]`.
    pub fn step(&mut self, acts: &Array2<f32>) -> Result<VecStep> {
        if acts.nrows() != self.envs.len() {
            return Err(TwmError::Shape(format!(
                "{} actions for {} environments",
                acts.nrows(),
                self.envs.len()
            ))
            .into());
        }

        let steps = self
            .envs
            .iter_mut()
            .zip(acts.outer_iter())
            .map(|(env, act)| env.step(&act.to_owned()))
            .collect::<Result<Vec<_>>>()?;

        let obs: Vec<_> = steps.iter().map(|s| s.obs.clone()).collect();
        Ok(VecStep {
            obs: stack_obs(&obs)?,
            reward: steps.iter().map(|s| s.reward).collect(),
            is_terminated: steps.iter().map(|s| s.is_terminated).collect(),
            is_truncated: steps.iter().map(|s| s.is_truncated).collect(),
            lives: steps.iter().map(|s| s.info.lives).collect(),
        })
    }

    /// Closes all environments.
    pub fn close(&mut self) {
        for env in self.envs.iter_mut() {
            env.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyEnv, DummyEnvConfig};

    #[test]
    fn test_serial_vec_env() -> Result<()> {
        let config = DummyEnvConfig::default().episode_len(2);
        let mut envs = SerialVecEnv::<DummyEnv>::build(&config, 3, 5)?;
        assert_eq!(envs.len(), 3);

        let obs = envs.reset(Some(100))?;
        assert_eq!(obs.shape(), &[3, 3]);
        let seeds: Vec<i64> = envs.envs.iter().map(|e| e.seed()).collect();
        assert_eq!(seeds, vec![100, 101, 102]);

        let acts = Array2::zeros((3, 1));
        let step = envs.step(&acts)?;
        assert_eq!(step.reward, Array1::<f32>::from_elem(3, 1.0));
        assert!(step.is_terminated.iter().all(|t| !*t));
        let step = envs.step(&acts)?;
        assert!(step.is_terminated.iter().all(|t| *t));
        assert_eq!(step.lives, vec![None; 3]);

        // Finished environments are not reset.
        let step = envs.step(&acts)?;
        assert_eq!(step.reward, Array1::<f32>::zeros(3));

        assert!(envs.step(&Array2::zeros((2, 1))).is_err());
        Ok(())
    }
}
