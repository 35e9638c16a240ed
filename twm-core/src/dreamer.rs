//! Sequential roller of latent states.
//!
//! A [`Dreamer`] advances the latent state of a batch of rollouts. In
//! [`RollerMode::Observe`] the latents come from encoding real observations;
//! in [`RollerMode::Imagine`] they are sampled from the predictions of the
//! dynamics model. Both modes keep the same history and record the same
//! trajectory layout, so imagined and observed data are interchangeable for
//! the actor-critic.
mod config;
mod error;
mod history;
mod recording;
mod sampler;
use crate::{
    base::{ActorCritic, DynamicsInput, Prediction, Trajectory, WorldModel},
    error::TwmError,
};
use anyhow::Result;
pub use config::{DreamerConfig, RollerMode};
pub use error::RollerError;
use history::History;
use ndarray::{Array1, Array2, Array3, ArrayD, Axis, Zip};
use recording::Recording;
pub use sampler::{LatentSampler, StartZSampler};

/// Output of [`Dreamer::observe_step`].
#[derive(Debug, Clone)]
pub struct ObserveOutput {
    /// Latents of the new observations, `[B, Z]`.
    pub z: Array2<f32>,

    /// Hidden states paired with `z`.
    pub h: Option<Array2<f32>>,

    /// Logits of `z`.
    pub logits: ArrayD<f32>,

    /// Terminated or truncated.
    pub is_done: Array1<bool>,
}

/// Output of [`Dreamer::imagine_step`].
#[derive(Debug, Clone)]
pub struct ImagineOutput {
    /// Next latents, `[B, Z]`. Rows whose episode ended are re-seeded when the
    /// roller has a start-latent sampler.
    pub z: Array2<f32>,

    /// Hidden states paired with `z`.
    pub h: Option<Array2<f32>>,

    /// Predicted rewards.
    pub reward: Array1<f32>,

    /// Predicted terminations.
    pub is_terminated: Array1<bool>,

    /// Decoded observations `[B, 1, ...]` when `always_compute_obs` is set.
    pub o: Option<ArrayD<f32>>,
}

/// Stateful driver of latent rollouts.
///
/// A reset is required before [`Dreamer::act`] or a step. Rollouts have no
/// internal stopping condition: termination only changes discounts and
/// weights, every row runs for as many steps as the caller takes.
///
/// Step weights are one while the episode of a row is alive. Without a
/// start-latent sampler, the weight of a row is zero after its first done
/// step. With a sampler, rows are re-seeded instead and keep weight one.
pub struct Dreamer<'a, W: WorldModel, A: ActorCritic> {
    config: DreamerConfig,
    wm: &'a W,
    ac: &'a A,
    start_z_sampler: Option<Box<dyn LatentSampler + 'a>>,
    history: Option<History>,
    recording: Option<Recording>,
    alive: Array1<bool>,
}

fn first_step(x: &Array3<f32>) -> Array2<f32> {
    x.index_axis(Axis(1), 0).to_owned()
}

fn check_prediction(pred: &Prediction, batch_size: usize) -> Result<()> {
    let ok = pred.z.shape()[0] == batch_size
        && pred.z.shape()[1] == 1
        && pred.reward.dim() == (batch_size, 1)
        && pred.is_terminated.dim() == (batch_size, 1)
        && pred
            .h
            .as_ref()
            .map_or(true, |h| h.shape()[0] == batch_size && h.shape()[1] == 1);
    if ok {
        Ok(())
    } else {
        Err(TwmError::Shape(format!(
            "prediction of one step for {} rows, got latents {:?}",
            batch_size,
            pred.z.shape()
        ))
        .into())
    }
}

impl<'a, W: WorldModel, A: ActorCritic> Dreamer<'a, W, A> {
    /// Creates a roller.
    pub fn new(config: DreamerConfig, wm: &'a W, ac: &'a A) -> Self {
        Self {
            config,
            wm,
            ac,
            start_z_sampler: None,
            history: None,
            recording: None,
            alive: Array1::from_elem(0, true),
        }
    }

    /// Sets the sampler re-seeding rows whose imagined episode ended.
    pub fn with_start_z_sampler(mut self, sampler: impl LatentSampler + 'a) -> Self {
        self.start_z_sampler = Some(Box::new(sampler));
        self
    }

    /// The mode of the roller.
    pub fn mode(&self) -> RollerMode {
        self.config.mode
    }

    fn check_mode(&self, expected: RollerMode) -> Result<()> {
        if self.config.mode != expected {
            return Err(RollerError::WrongMode {
                expected,
                actual: self.config.mode,
            }
            .into());
        }
        Ok(())
    }

    fn decode(&self, z: &Array2<f32>) -> Result<Option<ArrayD<f32>>> {
        if self.config.always_compute_obs {
            let z = z.view().insert_axis(Axis(1)).to_owned();
            Ok(Some(self.wm.decode(&z)?))
        } else {
            Ok(None)
        }
    }

    fn reset_with(
        &mut self,
        z: Array3<f32>,
        a: &Array3<f32>,
        r: &Array2<f32>,
        terminated: &Array2<bool>,
        truncated: &Array2<bool>,
    ) -> Result<()> {
        let mut history = History::new(self.wm, z, a, r, terminated, truncated)?;
        if let Some(input) = history.warmup_input() {
            let pred = self.wm.predict(&input, 1, self.config.temperature)?;
            check_prediction(&pred, history.batch_size())?;
            history.h = pred.h.as_ref().map(first_step);
        }
        history.trim(self.config.memory_length);

        self.alive = Array1::from_elem(history.batch_size(), true);
        self.recording = if self.config.store_data {
            let z = history.current_z();
            let o = self.decode(&z)?;
            Some(Recording::new(z, history.h.clone(), o))
        } else {
            None
        };
        self.history = Some(history);
        Ok(())
    }

    /// Starts observing from a history of `n` observations `[B, n, ...]` and
    /// the `n - 1` transitions between them.
    ///
    /// The dynamics model is run once over the history to compute the hidden
    /// state of the latest latent.
    pub fn observe_reset(
        &mut self,
        start_o: &ArrayD<f32>,
        start_a: &Array3<f32>,
        start_r: &Array2<f32>,
        start_terminated: &Array2<bool>,
        start_truncated: &Array2<bool>,
    ) -> Result<()> {
        self.check_mode(RollerMode::Observe)?;
        let z = self.wm.encode_sample(start_o, self.config.temperature)?;
        self.reset_with(z, start_a, start_r, start_terminated, start_truncated)
    }

    /// Starts observing from single observations `[B, 1, ...]`.
    pub fn observe_reset_single(&mut self, start_o: &ArrayD<f32>) -> Result<()> {
        self.check_mode(RollerMode::Observe)?;
        let b = start_o.shape().first().copied().unwrap_or(0);
        let z = self.wm.encode_sample(start_o, self.config.temperature)?;
        self.reset_with(
            z,
            &Array3::zeros((b, 0, 0)),
            &Array2::zeros((b, 0)),
            &Array2::from_elem((b, 0), false),
            &Array2::from_elem((b, 0), false),
        )
    }

    /// Starts imagining from a history of `n` latents `[B, n, Z]`.
    pub fn imagine_reset(
        &mut self,
        start_z: &Array3<f32>,
        start_a: &Array3<f32>,
        start_r: &Array2<f32>,
        start_terminated: &Array2<bool>,
        start_truncated: &Array2<bool>,
    ) -> Result<()> {
        self.check_mode(RollerMode::Imagine)?;
        self.reset_with(
            start_z.clone(),
            start_a,
            start_r,
            start_terminated,
            start_truncated,
        )
    }

    /// Queries the actor-critic for actions `[B, A]` at the current state.
    pub fn act(&self) -> Result<Array2<f32>> {
        let history = self.history.as_ref().ok_or(RollerError::NotReset)?;
        let h = if self.config.ac_input_h {
            history.h.as_ref()
        } else {
            None
        };
        self.ac.act(&history.current_z(), h)
    }

    #[allow(clippy::too_many_arguments)]
    fn advance(
        &mut self,
        input: DynamicsInput,
        a: &Array2<f32>,
        z: &Array2<f32>,
        h: &Option<Array2<f32>>,
        r: &Array1<f32>,
        g: &Array1<f32>,
        d: &Array1<bool>,
    ) -> Result<Option<ArrayD<f32>>> {
        let weights = self.alive.mapv(|alive| if alive { 1.0 } else { 0.0 });
        if self.start_z_sampler.is_none() {
            self.alive.zip_mut_with(d, |alive, d| *alive = *alive && !*d);
        }
        let o = self.decode(z)?;

        if let Some(recording) = self.recording.as_mut() {
            recording.push(
                a.clone(),
                z.clone(),
                h.clone(),
                o.clone(),
                r.clone(),
                g.clone(),
                d.clone(),
                weights,
            );
        }

        if let Some(history) = self.history.as_mut() {
            history.advance(input, z, r, g, d, h.clone(), self.config.memory_length)?;
        }
        Ok(o)
    }

    /// Takes actions `a` `[B, A]` in the environment, which returned `next_obs`
    /// `[B, 1, ...]`, rewards and flags `[B]`.
    pub fn observe_step(
        &mut self,
        a: &Array2<f32>,
        next_obs: &ArrayD<f32>,
        r: &Array1<f32>,
        terminated: &Array1<bool>,
        truncated: &Array1<bool>,
    ) -> Result<ObserveOutput> {
        self.check_mode(RollerMode::Observe)?;
        let history = self.history.as_ref().ok_or(RollerError::NotReset)?;
        let b = history.batch_size();
        let input = history.input_with(a)?;
        let temperature = self.config.temperature;

        let pred = self.wm.predict(&input, 1, temperature)?;
        check_prediction(&pred, b)?;
        let h = pred.h.as_ref().map(first_step);

        let dist = self.wm.encode(next_obs)?;
        let (z, logits) = self.wm.sample_z(&dist, None, temperature)?;
        if z.shape()[0] != b || z.shape()[1] != 1 {
            return Err(TwmError::Shape(format!(
                "encoded {:?} latents for {} rows",
                z.shape(),
                b
            ))
            .into());
        }
        let z = first_step(&z);

        let g = self
            .wm
            .to_discounts(&terminated.view().insert_axis(Axis(1)).to_owned())
            .column(0)
            .to_owned();
        let d = Zip::from(terminated)
            .and(truncated)
            .map_collect(|t, u| *t || *u);

        self.advance(input, a, &z, &h, r, &g, &d)?;
        Ok(ObserveOutput {
            z,
            h,
            logits,
            is_done: d,
        })
    }

    /// Takes actions `a` `[B, A]` in the world model.
    ///
    /// `temperature` overrides the sampling temperature of the configuration.
    pub fn imagine_step(
        &mut self,
        a: &Array2<f32>,
        temperature: Option<f32>,
    ) -> Result<ImagineOutput> {
        self.check_mode(RollerMode::Imagine)?;
        let temperature = temperature.unwrap_or(self.config.temperature);
        let history = self.history.as_ref().ok_or(RollerError::NotReset)?;
        let b = history.batch_size();
        let input = history.input_with(a)?;

        let pred = self.wm.predict(&input, 1, temperature)?;
        check_prediction(&pred, b)?;
        let mut z = first_step(&pred.z);
        let h = pred.h.as_ref().map(first_step);
        let reward = pred.reward.column(0).to_owned();
        let is_terminated = pred.is_terminated.column(0).to_owned();
        let g = self.wm.to_discounts(&pred.is_terminated).column(0).to_owned();

        if let Some(sampler) = self.start_z_sampler.as_mut() {
            let rows: Vec<usize> = is_terminated
                .iter()
                .enumerate()
                .filter_map(|(i, d)| if *d { Some(i) } else { None })
                .collect();
            if !rows.is_empty() {
                let fresh = sampler.sample(rows.len())?;
                for (j, &row) in rows.iter().enumerate() {
                    z.row_mut(row).assign(&fresh.row(j));
                }
            }
        }

        let o = self.advance(input, a, &z, &h, &reward, &g, &is_terminated)?;
        Ok(ImagineOutput {
            z,
            h,
            reward,
            is_terminated,
            o,
        })
    }

    /// Returns the trajectory recorded since the last reset or flush.
    ///
    /// The recording restarts at the current latent.
    pub fn get_data(&mut self) -> Result<Trajectory> {
        if !self.config.store_data {
            return Err(RollerError::NoStoredData.into());
        }
        let recording = self.recording.as_mut().ok_or(RollerError::NotReset)?;
        let mut trajectory = recording.flush()?;
        if !self.config.ac_input_h {
            trajectory.h = None;
        }
        Ok(trajectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyActorCritic, DummyWorldModel};
    use ndarray::{Array, IxDyn};

    struct ZeroSampler(usize);

    impl LatentSampler for ZeroSampler {
        fn sample(&mut self, n: usize) -> Result<Array2<f32>> {
            Ok(Array2::zeros((n, self.0)))
        }
    }

    fn start(k: usize, n: usize, z_dim: usize) -> (Array3<f32>, Array3<f32>, Array2<f32>, Array2<bool>) {
        (
            Array3::from_elem((k, n, z_dim), 0.5),
            Array3::zeros((k, n - 1, 1)),
            Array2::zeros((k, n - 1)),
            Array2::from_elem((k, n - 1), false),
        )
    }

    fn roll(dreamer: &mut Dreamer<DummyWorldModel, DummyActorCritic>, horizon: usize) -> Trajectory {
        let (z, a, r, d) = start(5, 2, 4);
        dreamer.imagine_reset(&z, &a, &r, &d, &d).unwrap();
        for _ in 0..horizon {
            let a = dreamer.act().unwrap();
            dreamer.imagine_step(&a, None).unwrap();
        }
        dreamer.get_data().unwrap()
    }

    #[test]
    fn test_imagine_runs_full_horizon() {
        let wm = DummyWorldModel::new(4, 3).terminate_every(3);
        let ac = DummyActorCritic::new(2);
        let config = DreamerConfig::new(RollerMode::Imagine).store_data(true);
        let mut dreamer = Dreamer::new(config, &wm, &ac);
        let horizon = 7;
        let traj = roll(&mut dreamer, horizon);

        assert!(traj.d.iter().any(|d| *d));
        assert_eq!(traj.horizon(), horizon);
        assert_eq!(traj.z.shape(), &[5, horizon + 1, 4]);
        assert_eq!(traj.h.as_ref().unwrap().shape(), &[5, horizon + 1, 3]);
        assert_eq!(traj.r.dim(), (5, horizon));
        assert_eq!(traj.g.dim(), (5, horizon));
        assert_eq!(traj.weights.dim(), (5, horizon));
        assert!(traj.o.is_none());

        // Without a sampler the weight drops after the first done step.
        for row in 0..5 {
            let first_done = (0..horizon).find(|&t| traj.d[[row, t]]);
            for t in 0..horizon {
                let expected = match first_done {
                    Some(t_done) if t > t_done => 0.0,
                    _ => 1.0,
                };
                assert_eq!(traj.weights[[row, t]], expected);
            }
        }
        for ((t, d), g) in traj.d.indexed_iter().zip(traj.g.iter()) {
            assert_eq!(*g == 0.0, *d, "discount at {:?}", t);
        }
    }

    #[test]
    fn test_imagine_reseeds_done_rows() {
        let wm = DummyWorldModel::new(4, 0).terminate_every(2);
        let ac = DummyActorCritic::new(2);
        let config = DreamerConfig::new(RollerMode::Imagine)
            .store_data(true)
            .always_compute_obs(true);
        let mut dreamer = Dreamer::new(config, &wm, &ac).with_start_z_sampler(ZeroSampler(4));
        let traj = roll(&mut dreamer, 6);

        assert!(traj.h.is_none());
        assert!(traj.weights.iter().all(|w| *w == 1.0));
        assert_eq!(traj.o.as_ref().unwrap().shape()[..2], [5, 7]);
        for ((row, t), d) in traj.d.indexed_iter() {
            if *d {
                assert!(traj.z.slice(ndarray::s![row, t + 1, ..]).iter().all(|z| *z == 0.0));
            }
        }
    }

    #[test]
    fn test_get_data_restarts_recording() {
        let wm = DummyWorldModel::new(4, 3);
        let ac = DummyActorCritic::new(2);
        let config = DreamerConfig::new(RollerMode::Imagine).store_data(true);
        let mut dreamer = Dreamer::new(config, &wm, &ac);
        let traj = roll(&mut dreamer, 3);

        let a = dreamer.act().unwrap();
        dreamer.imagine_step(&a, Some(0.0)).unwrap();
        let next = dreamer.get_data().unwrap();
        assert_eq!(next.horizon(), 1);
        assert_eq!(next.z.index_axis(Axis(1), 0), traj.z.index_axis(Axis(1), 3));
    }

    #[test]
    fn test_observe_warms_up_hidden_state() {
        let wm = DummyWorldModel::new(4, 3);
        let ac = DummyActorCritic::new(2);
        let config = DreamerConfig::new(RollerMode::Observe).memory_length(2);
        let mut dreamer = Dreamer::new(config, &wm, &ac);

        let obs = Array::from_elem(IxDyn(&[2, 3, 5]), 1.0);
        let a = Array3::zeros((2, 2, 1));
        let r = Array2::zeros((2, 2));
        let flags = Array2::from_elem((2, 2), false);
        dreamer.observe_reset(&obs, &a, &r, &flags, &flags).unwrap();
        assert_eq!(wm.num_predict(), 1);
        assert!(dreamer.history.as_ref().unwrap().h.is_some());
        assert_eq!(dreamer.history.as_ref().unwrap().len(), 2);

        let next_obs = Array::from_elem(IxDyn(&[2, 1, 5]), 2.0);
        let out = dreamer
            .observe_step(
                &dreamer.act().unwrap(),
                &next_obs,
                &Array1::ones(2),
                &Array1::from_elem(2, false),
                &Array1::from_elem(2, true),
            )
            .unwrap();
        assert_eq!(out.z.dim(), (2, 4));
        assert!(out.is_done.iter().all(|d| *d));
        assert_eq!(dreamer.history.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_observe_truncation_keeps_discount() {
        let wm = DummyWorldModel::new(4, 3);
        let ac = DummyActorCritic::new(2);
        let config = DreamerConfig::new(RollerMode::Observe).store_data(true);
        let mut dreamer = Dreamer::new(config, &wm, &ac);

        let obs = Array::from_elem(IxDyn(&[3, 1, 5]), 1.0);
        dreamer.observe_reset_single(&obs).unwrap();
        let next_obs = Array::from_elem(IxDyn(&[3, 1, 5]), 2.0);
        let terminated = Array1::from(vec![true, false, false]);
        let truncated = Array1::from(vec![false, true, false]);
        dreamer
            .observe_step(
                &dreamer.act().unwrap(),
                &next_obs,
                &Array1::ones(3),
                &terminated,
                &truncated,
            )
            .unwrap();

        let traj = dreamer.get_data().unwrap();
        assert_eq!(traj.g.dim(), (3, 1));
        assert_eq!(traj.g[[0, 0]], 0.0);
        assert_eq!(traj.g[[1, 0]], traj.g[[2, 0]]);
        assert!(traj.g[[1, 0]] > 0.0);
        assert_eq!(traj.d.column(0).to_vec(), vec![true, true, false]);
    }

    #[test]
    fn test_misuse_is_reported() {
        let wm = DummyWorldModel::new(4, 3);
        let ac = DummyActorCritic::new(2);

        let mut dreamer = Dreamer::new(DreamerConfig::new(RollerMode::Imagine), &wm, &ac);
        let err = dreamer.act().unwrap_err();
        assert_eq!(err.downcast_ref::<RollerError>(), Some(&RollerError::NotReset));
        let err = dreamer
            .imagine_step(&Array2::zeros((1, 1)), None)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<RollerError>(), Some(&RollerError::NotReset));

        let obs = Array::from_elem(IxDyn(&[1, 1, 5]), 1.0);
        let err = dreamer.observe_reset_single(&obs).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RollerError>(),
            Some(&RollerError::WrongMode {
                expected: RollerMode::Observe,
                actual: RollerMode::Imagine
            })
        );

        let mut dreamer = Dreamer::new(DreamerConfig::new(RollerMode::Observe), &wm, &ac);
        dreamer.observe_reset_single(&obs).unwrap();
        assert!(dreamer.act().is_ok());
        assert_eq!(ac.num_act(), 1);
        let err = dreamer.get_data().unwrap_err();
        assert_eq!(
            err.downcast_ref::<RollerError>(),
            Some(&RollerError::NoStoredData)
        );
    }
}
