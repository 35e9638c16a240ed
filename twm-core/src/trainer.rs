//! Train a world model and an actor-critic.
mod config;
mod policy;
mod sampler;
mod schedule;
use crate::{
    base::{ActionSpace, ActorCritic, DynamicsInput, Env, SequenceBatch, WorldModel},
    checkpoint::Checkpoint,
    dreamer::{Dreamer, DreamerConfig, RollerMode, StartZSampler},
    error::TwmError,
    evaluator::DefaultEvaluator,
    record::{MetricsSummarizer, Record, RecordValue, Recorder},
    replay_buffer::{ReplayStore, ReplayStoreConfig},
};
use anyhow::Result;
use chrono::Local;
pub use config::{EnvSuite, TrainerConfig};
use log::{debug, info};
use ndarray::{s, Array, Array2, Array3, ArrayD, Axis, Ix3, IxDyn, Slice};
pub use policy::{BufferObsPolicy, BufferPolicy, RandomPolicy};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
pub use sampler::Sampler;
pub use schedule::TrainSchedule;
use std::{path::PathBuf, time::Instant};

/// Scalars of the replay store that are reported as the latest value.
const BUFFER_KEYS: [&str; 4] = [
    "buffer/size",
    "buffer/capacity",
    "buffer/total_reward",
    "buffer/num_episodes",
];

/// Counters of a training run.
///
/// Reset at the start of [`Trainer::train`] and mutated only by the trainer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainerState {
    /// Environment steps taken.
    pub env_steps: usize,

    /// Training rounds done in the main loop.
    pub train_rounds: usize,

    /// Environment steps not yet paid with a training round.
    pub step_counter: f64,

    /// Store size at the last evaluation.
    pub last_eval: usize,

    /// Store size at the last checkpoint.
    pub last_save: usize,

    /// Seconds spent in evaluations.
    pub total_eval_time: f64,
}

/// Start states of imagined rollouts: pairs of consecutive latents and the
/// transition between them.
struct StartStates {
    z: Array3<f32>,
    a: Array3<f32>,
    r: Array2<f32>,
    terminated: Array2<bool>,
    truncated: Array2<bool>,
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the training loop of a world model and an actor-critic.
///
/// # Training loop
///
/// The replay store has a capacity of [`TrainerConfig::env_steps`] and the
/// run ends when it is full, so every environment step of the run is kept.
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Prefill
///     Prefill --> Pretrain: size == buffer_prefill
///     Pretrain --> Collect
///     Collect --> Train: step_counter >= train_every
///     Train --> Collect: step_counter < train_every
///     Collect --> FinalEvaluate: size == capacity
///     Train --> FinalEvaluate: size == capacity
///     FinalEvaluate --> [*]
/// ```
///
/// 1. *Prefill*: uniformly random actions until the store holds
///    [`TrainerConfig::buffer_prefill`] transitions.
/// 2. *Pretrain*: the observation model on single observations, the dynamics
///    model on sweeps over the store, then the actor-critic on latent
///    sequences of the store. The budget of each part is a fraction of
///    [`TrainerConfig::pretrain_budget`]. The target critic is synchronized at
///    the end. An evaluation follows.
/// 3. *Collect*: a [`BufferObsPolicy`] chooses actions from the latents of
///    the real observations until a training round is due, see
///    [`TrainSchedule`].
/// 4. *Train*: every due round optimizes the world model
///    [`TrainerConfig::wm_train_steps`] times on windows sampled from the
///    store, then the actor-critic once on a rollout imagined from latents of
///    the last world-model batch.
/// 5. Evaluations run every [`TrainerConfig::eval_every`] transitions and
///    checkpoints are written every [`TrainerConfig::save_every`] transitions.
///    A final evaluation and a final checkpoint close the run.
///
/// # Interaction of objects
///
/// ```mermaid
/// graph LR
///     E[Env] -->|Transition|S[ReplayStore]
///     S -->|SequenceBatch|W[WorldModel]
///     W -->|z|D[Dreamer]
///     D -->|Trajectory|A[ActorCritic]
///     A -->|action|P[BufferObsPolicy]
///     S -->|obs|P
///     P -->|action|E
/// ```
pub struct Trainer<E: Env, W: WorldModel, A: ActorCritic> {
    config: TrainerConfig,
    sampler: Sampler<E>,
    action_space: ActionSpace,
    buffer: ReplayStore,
    wm: W,
    ac: A,
    schedule: TrainSchedule,
    state: TrainerState,
    summarizer: MetricsSummarizer,
    evaluator: DefaultEvaluator<E>,
    rng: StdRng,
}

/// Reward, discount and done targets of the critic for a window batch.
///
/// The first two transitions of each window only lead to the first latent,
/// so the targets start at transition 2. Discounts are zero only at
/// terminations; a truncation ends the episode without zeroing the discount.
fn pretrain_targets<W: WorldModel>(
    wm: &W,
    batch: &SequenceBatch,
) -> (Array2<f32>, Array2<f32>, Array2<bool>) {
    let r = batch.reward.slice(s![.., 2..]).to_owned();
    let terminated = batch.is_terminated.slice(s![.., 2..]).to_owned();
    let d = batch.is_done().slice(s![.., 2..]).to_owned();
    let g = wm.to_discounts(&terminated);
    (r, g, d)
}

fn buffer_record(buffer: &ReplayStore) -> Record {
    buffer.metrics().with_prefix("buffer/")
}

/// Summarizes the stored records and writes them with a timestamp.
fn emit(summarizer: &mut MetricsSummarizer, recorder: &mut dyn Recorder) {
    let mut record = summarizer.summarize();
    record.insert("datetime", RecordValue::DateTime(Local::now()));
    recorder.write(record);
}

fn evaluate_record<E, W, A>(
    evaluator: &mut DefaultEvaluator<E>,
    wm: &W,
    ac: &A,
    buffer: &ReplayStore,
    state: &mut TrainerState,
    num_episodes: usize,
    is_final: bool,
) -> Result<Record>
where
    E: Env,
    W: WorldModel,
    A: ActorCritic,
{
    let start = Instant::now();
    let scores = evaluator.evaluate(wm, ac, num_episodes)?;
    let hns = evaluator.hns(scores.mean());
    state.total_eval_time += start.elapsed().as_secs_f64();
    state.last_eval = buffer.len();
    info!(
        "Evaluation at {} steps: score {:.2} (std {:.2}), hns {:.3}",
        buffer.len(),
        scores.mean(),
        scores.std(),
        hns
    );

    let mut record = scores.to_record(hns, is_final);
    record.insert(
        "eval/total_time",
        RecordValue::Scalar(state.total_eval_time as f32),
    );
    record.insert(
        "buffer/visits",
        RecordValue::Array1(buffer.visit_histogram()),
    );
    record.insert(
        "buffer/sample_probs",
        RecordValue::Array1(buffer.sample_probs_histogram()),
    );
    Ok(record)
}

/// Lays out `[B * L, 1, ...]` as `[B, L, ...]`.
fn unflatten(x: ArrayD<f32>, b: usize, l: usize) -> Result<ArrayD<f32>> {
    if x.ndim() < 2 || x.shape()[0] != b * l || x.shape()[1] != 1 {
        return Err(TwmError::Shape(format!(
            "expected {} single-step samples, got {:?}",
            b * l,
            x.shape()
        ))
        .into());
    }
    let shape = [&[b, l][..], &x.shape()[2..]].concat();
    Ok(Array::from_shape_vec(IxDyn(&shape), x.iter().cloned().collect())?)
}

/// Re-samples the cached distribution at windows of observation indices.
///
/// Returns latents `[B, L, Z]` and logits `[B, L, ...]`.
fn sample_windows<W: WorldModel>(
    wm: &W,
    dist: &W::Dist,
    windows: &Array2<usize>,
) -> Result<(Array3<f32>, ArrayD<f32>)> {
    let (b, l) = windows.dim();
    let ixs: Vec<usize> = windows.iter().cloned().collect();
    let (z, logits) = wm.sample_z(dist, Some(&ixs), 1.0)?;
    let z = unflatten(z.into_dyn(), b, l)?.into_dimensionality::<Ix3>()?;
    Ok((z, unflatten(logits, b, l)?))
}

/// Draws `n` random pairs of consecutive latents of `z` `[B, T, Z]`, with
/// replacement.
///
/// Latent `t` of a row belongs to transition `t` of `batch`, which leads to
/// latent `t + 1`.
fn start_states<R: Rng + ?Sized>(
    z: &Array3<f32>,
    batch: &SequenceBatch,
    n: usize,
    rng: &mut R,
) -> Result<StartStates> {
    let (b, t, z_dim) = z.dim();
    if t < 2 || batch.len() != b || batch.seq_len() + 1 < t {
        return Err(TwmError::Shape(format!(
            "no start states in latents {:?} with actions {:?}",
            z.shape(),
            batch.act.shape()
        ))
        .into());
    }

    let per_row = t - 1;
    let picks: Vec<(usize, usize)> = (0..n)
        .map(|_| (rng.gen_range(0..b), rng.gen_range(0..per_row)))
        .collect();
    let pick = |k: usize| picks[k];
    let m = n;
    let a_dim = batch.act.shape()[2];

    Ok(StartStates {
        z: Array3::from_shape_fn((m, 2, z_dim), |(k, j, c)| {
            let (row, col) = pick(k);
            z[[row, col + j, c]]
        }),
        a: Array3::from_shape_fn((m, 1, a_dim), |(k, _, c)| {
            let (row, col) = pick(k);
            batch.act[[row, col, c]]
        }),
        r: Array2::from_shape_fn((m, 1), |(k, _)| {
            let (row, col) = pick(k);
            batch.reward[[row, col]]
        }),
        terminated: Array2::from_shape_fn((m, 1), |(k, _)| {
            let (row, col) = pick(k);
            batch.is_terminated[[row, col]]
        }),
        truncated: Array2::from_shape_fn((m, 1), |(k, _)| {
            let (row, col) = pick(k);
            batch.is_truncated[[row, col]]
        }),
    })
}

impl<E, W, A> Trainer<E, W, A>
where
    E: Env,
    W: WorldModel,
    A: ActorCritic,
{
    /// Constructs a trainer.
    ///
    /// The training environment is built and reset with [`TrainerConfig::seed`]
    /// to learn the observation shape. Fails with
    /// [`TwmError::Configuration`] when the configuration is invalid.
    pub fn build(
        config: TrainerConfig,
        env_config: &E::Config,
        env_config_eval: &E::Config,
        wm: W,
        ac: A,
    ) -> Result<Self> {
        config.validate()?;
        let schedule = TrainSchedule::new(&config)?;
        let evaluator = DefaultEvaluator::new(env_config_eval, &config)?;

        let env = E::build(env_config, config.seed)?;
        let action_space = env.action_space();
        let mut sampler = Sampler::new(env);
        let obs_shape = sampler.reset()?.shape().to_vec();

        let buffer_config = ReplayStoreConfig::default()
            .capacity(config.env_steps)
            .temperature(config.buffer_temperature)
            .seed(config.seed as u64);
        let buffer = ReplayStore::build(&buffer_config, &obs_shape, action_space.dim())?;
        let rng = StdRng::seed_from_u64((config.seed as u64).wrapping_add(1));
        info!(
            "Training {} for {} steps, one round every {:.3} steps",
            config.game,
            config.env_steps,
            schedule.train_every()
        );

        Ok(Self {
            config,
            sampler,
            action_space,
            buffer,
            wm,
            ac,
            schedule,
            state: TrainerState::default(),
            summarizer: MetricsSummarizer::new(&BUFFER_KEYS),
            evaluator,
            rng,
        })
    }

    /// The configuration.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// The counters of the current or last run.
    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// The replay store.
    pub fn buffer(&self) -> &ReplayStore {
        &self.buffer
    }

    /// The world model.
    pub fn world_model(&self) -> &W {
        &self.wm
    }

    /// The actor-critic.
    pub fn actor_critic(&self) -> &A {
        &self.ac
    }

    /// Returns the models.
    pub fn into_models(self) -> (W, A) {
        (self.wm, self.ac)
    }

    fn emit(&mut self, recorder: &mut dyn Recorder) {
        emit(&mut self.summarizer, recorder);
    }

    /// Runs a whole training and returns its final counters.
    pub fn train(&mut self, recorder: &mut dyn Recorder) -> Result<TrainerState> {
        self.state = TrainerState::default();
        self.schedule.reset();
        let capacity = self.buffer.capacity();

        info!(
            "Prefilling the replay store with {} random steps",
            self.config.buffer_prefill
        );
        self.prefill(recorder)?;

        info!("Pretraining with a budget of {}", self.config.pretrain_budget);
        let mut record = self.pretrain()?;
        record.merge_inplace(buffer_record(&self.buffer));
        record.merge_inplace(self.evaluate(false)?);
        self.summarizer.append(record);
        self.emit(recorder);

        info!("Training for {} steps", capacity - self.buffer.len());
        while self.buffer.len() < capacity {
            let mut should_log = self.collect(recorder)?;

            let mut records = vec![];
            while self.schedule.next_round() {
                records.push(self.train_step()?);
                self.state.train_rounds += 1;
            }
            self.state.step_counter = self.schedule.step_counter();

            let size = self.buffer.len();
            let mut record = MetricsSummarizer::mean_records(records);
            record.merge_inplace(buffer_record(&self.buffer));
            if size - self.state.last_eval >= self.config.eval_every && size < capacity {
                record.merge_inplace(self.evaluate(false)?);
                should_log = true;
            }
            self.summarizer.append(record);
            if should_log {
                self.emit(recorder);
            }

            if self.config.save && size - self.state.last_save >= self.config.save_every && size < capacity {
                self.save_checkpoint("agent.pt")?;
            }
        }

        info!("Final evaluation");
        let mut record = buffer_record(&self.buffer);
        record.merge_inplace(self.evaluate(true)?);
        self.summarizer.append(record);
        self.emit(recorder);
        if self.config.save {
            self.save_checkpoint("agent_final.pt")?;
        }
        recorder.flush();
        self.sampler.close();

        Ok(self.state.clone())
    }

    /// Fills the replay store with random actions up to [`TrainerConfig::buffer_prefill`].
    pub fn prefill(&mut self, recorder: &mut dyn Recorder) -> Result<()> {
        let mut policy = RandomPolicy::new(self.action_space.clone(), self.rng.gen());
        while self.buffer.len() < self.config.buffer_prefill {
            let record = self.sampler.sample_and_push(&mut policy, &mut self.buffer)?;
            self.state.env_steps += 1;
            self.summarizer.append(
                record
                    .with_prefix("train/")
                    .merge(buffer_record(&self.buffer)),
            );
            if self.buffer.len() % self.config.log_every == 0 {
                self.emit(recorder);
            }
        }
        Ok(())
    }

    /// Collects transitions with the actor-critic until a training round is due.
    ///
    /// Returns `true` if the store crossed a multiple of [`TrainerConfig::log_every`].
    fn collect(&mut self, recorder: &mut dyn Recorder) -> Result<bool> {
        let Self {
            config,
            sampler,
            buffer,
            wm,
            ac,
            schedule,
            state,
            summarizer,
            evaluator,
            ..
        } = self;
        let (wm, ac) = (&*wm, &*ac);
        let mut policy = BufferObsPolicy::new(wm, ac, config.wm_memory_length, config.ac_input_h);
        let mut should_log = false;

        while schedule.should_collect() && buffer.len() < buffer.capacity() {
            if buffer.len() - state.last_eval >= config.eval_every {
                let mut record = buffer_record(buffer);
                record.merge_inplace(evaluate_record(
                    evaluator,
                    wm,
                    ac,
                    buffer,
                    state,
                    config.eval_episodes,
                    false,
                )?);
                summarizer.append(record);
                emit(summarizer, recorder);
            }

            let record = sampler.sample_and_push(&mut policy, buffer)?;
            state.env_steps += 1;
            schedule.collect();
            summarizer.append(record.with_prefix("train/").merge(buffer_record(buffer)));
            if buffer.len() % config.log_every == 0 {
                should_log = true;
            }
        }
        state.step_counter = schedule.step_counter();
        Ok(should_log)
    }

    /// Evaluates the models on [`TrainerConfig::eval_episodes`] episodes, or on
    /// [`TrainerConfig::final_eval_episodes`] for the final evaluation.
    pub fn evaluate(&mut self, is_final: bool) -> Result<Record> {
        let num_episodes = match is_final {
            true => self.config.final_eval_episodes,
            false => self.config.eval_episodes,
        };
        evaluate_record(
            &mut self.evaluator,
            &self.wm,
            &self.ac,
            &self.buffer,
            &mut self.state,
            num_episodes,
            is_final,
        )
    }

    /// Pretrains both models on the prefilled store.
    ///
    /// Returns the mean of the records of all pretraining steps.
    pub fn pretrain(&mut self) -> Result<Record> {
        if self.buffer.is_empty() {
            return Err(TwmError::DataAvailability("nothing to pretrain on".to_string()).into());
        }
        let mut records = self.pretrain_obs()?;
        let dist = self.encode_all()?;
        records.extend(self.pretrain_dyn(&dist)?);
        records.extend(self.pretrain_ac(&dist)?);
        self.ac.sync_target();
        info!("Pretrained with {} optimization steps", records.len());
        Ok(MetricsSummarizer::mean_records(records))
    }

    fn pretrain_budget(&self, fraction: f32) -> f64 {
        self.config.pretrain_budget as f64 * fraction.max(0.0) as f64
    }

    /// Optimizes the observation model on shuffled single observations.
    fn pretrain_obs(&mut self) -> Result<Vec<Record>> {
        let chunk = self.config.wm_batch_size * self.config.wm_sequence_length;
        let mut budget = self.pretrain_budget(self.config.pretrain_obs_p);
        let mut records = vec![];

        while budget > 0.0 {
            let mut perm: Vec<usize> = (0..self.buffer.len()).collect();
            perm.shuffle(&mut self.rng);
            for ixs in perm.chunks(chunk) {
                let ixs = Array2::from_shape_vec((ixs.len(), 1), ixs.to_vec())?;
                let obs = self.buffer.get_obs(&ixs, 0, false)?;
                let record = self.wm.optimize_pretrain_obs(&obs)?;
                records.push(record.with_prefix("pretrain/wm/"));
                budget -= ixs.nrows() as f64;
                if budget <= 0.0 {
                    break;
                }
            }
        }
        debug!("Observation pretraining: {} batches", records.len());
        Ok(records)
    }

    /// Encodes every observation of the store, the tail observation included.
    fn encode_all(&self) -> Result<W::Dist> {
        let ixs = Array2::from_shape_fn((self.buffer.len() + 1, 1), |(i, _)| i);
        let obs = self.buffer.get_obs(&ixs, 0, false)?;
        self.wm.encode(&obs)
    }

    /// Optimizes the dynamics model over sweeps of the store.
    ///
    /// A window of `L + 2` observations gives `L + 1` input latents and the
    /// logits of the `L + 1` latents that follow them as targets.
    fn pretrain_dyn(&mut self, dist: &W::Dist) -> Result<Vec<Record>> {
        let (batch_size, seq_len) = (self.config.wm_batch_size, self.config.wm_sequence_length);
        let mut budget = self.pretrain_budget(self.config.pretrain_dyn_p);
        let mut records = vec![];

        while budget > 0.0 {
            let sweep = self
                .buffer
                .generate_uniform_indices(batch_size, seq_len, 2)?;
            for windows in sweep {
                let (z, logits) = sample_windows(&self.wm, dist, &windows)?;
                let n = windows.ncols() - 1;
                let batch = self
                    .buffer
                    .get_data(&windows.slice(s![.., ..n]).to_owned(), 1, false)?;
                let input = DynamicsInput::new(&self.wm, z.slice(s![.., ..n, ..]).to_owned(), &batch)?;
                let target = logits.slice_axis(Axis(1), Slice::from(1..)).to_owned();

                let record = self.wm.optimize_pretrain_dyn(&input, &target)?;
                records.push(record.with_prefix("pretrain/wm/"));
                budget -= (windows.nrows() * seq_len) as f64;
                if budget <= 0.0 {
                    break;
                }
            }
        }
        debug!("Dynamics pretraining: {} batches", records.len());
        Ok(records)
    }

    /// Optimizes the critic on latent sequences of the store.
    ///
    /// A window of `H + 2` observations gives `H + 1` latents (all but the
    /// first) and the `H` transitions between them. The first latent only
    /// conditions the hidden states.
    fn pretrain_ac(&mut self, dist: &W::Dist) -> Result<Vec<Record>> {
        let (batch_size, horizon) = (self.config.ac_batch_size, self.config.ac_horizon);
        let fraction = 1.0 - self.config.pretrain_obs_p - self.config.pretrain_dyn_p;
        let mut budget = self.pretrain_budget(fraction);
        let mut records = vec![];

        while budget > 0.0 {
            let sweep = self
                .buffer
                .generate_uniform_indices(batch_size, horizon, 2)?;
            for windows in sweep {
                let (z_all, _) = sample_windows(&self.wm, dist, &windows)?;
                let n = windows.ncols() - 1;
                let batch = self
                    .buffer
                    .get_data(&windows.slice(s![.., ..n]).to_owned(), 1, false)?;

                let h = match self.config.ac_input_h {
                    true => {
                        let z = z_all.slice(s![.., ..n, ..]).to_owned();
                        let input = DynamicsInput::new(&self.wm, z, &batch)?;
                        self.wm.predict(&input, n, 1.0)?.h
                    }
                    false => None,
                };
                let z = z_all.slice(s![.., 1.., ..]).to_owned();
                let (r, g, d) = pretrain_targets(&self.wm, &batch);

                let record = self.ac.optimize_pretrain(&z, h.as_ref(), &r, &g, &d)?;
                records.push(record.with_prefix("pretrain/ac/"));
                budget -= (windows.nrows() * horizon) as f64;
                if budget <= 0.0 {
                    break;
                }
            }
        }
        debug!("Actor-critic pretraining: {} batches", records.len());
        Ok(records)
    }

    /// Runs one training round and returns its metrics.
    ///
    /// The world model is optimized [`TrainerConfig::wm_train_steps`] times.
    /// The latents of the last batch seed [`TrainerConfig::ac_batch_size`]
    /// imagined rollouts of [`TrainerConfig::ac_horizon`] steps, on which the
    /// actor-critic is optimized once. Rollouts whose episode ends restart
    /// from latents of random observations of the store.
    pub fn train_step(&mut self) -> Result<Record> {
        let (batch_size, seq_len) = (self.config.wm_batch_size, self.config.wm_sequence_length);
        let mut record = Record::empty();
        let mut last = None;
        for _ in 0..self.config.wm_train_steps {
            let windows = self.buffer.sample_indices(batch_size, seq_len)?;
            let batch = self.buffer.get_data(&windows, 1, true)?;
            let out = self.wm.optimize(&batch)?;
            record = out.record.with_prefix("wm/");
            last = Some((out.z, batch));
        }
        let (z, batch) = last.ok_or_else(|| {
            TwmError::Configuration("wm_train_steps must be positive".to_string())
        })?;
        let start = start_states(&z, &batch, self.config.ac_batch_size, &mut self.rng)?;
        let seed: u64 = self.rng.gen();

        let trajectory = {
            let config = DreamerConfig::new(RollerMode::Imagine)
                .store_data(true)
                .memory_length(self.config.wm_memory_length)
                .ac_input_h(self.config.ac_input_h);
            let sampler = StartZSampler::new(&self.wm, &self.buffer, 1.0, seed);
            let mut dreamer =
                Dreamer::new(config, &self.wm, &self.ac).with_start_z_sampler(sampler);
            dreamer.imagine_reset(
                &start.z,
                &start.a,
                &start.r,
                &start.terminated,
                &start.truncated,
            )?;
            for _ in 0..self.config.ac_horizon {
                let a = dreamer.act()?;
                dreamer.imagine_step(&a, None)?;
            }
            dreamer.get_data()?
        };

        record.merge_inplace(self.ac.optimize(&trajectory)?.with_prefix("ac/"));
        debug!(
            "Training round at {} steps: {} rollouts of {} steps",
            self.buffer.len(),
            trajectory.batch_size(),
            trajectory.horizon()
        );
        Ok(record)
    }

    /// Saves a checkpoint in [`TrainerConfig::model_dir`].
    ///
    /// Fails with [`TwmError::Configuration`] without a model directory.
    fn save_checkpoint(&mut self, name: &str) -> Result<()> {
        let model_dir = match &self.config.model_dir {
            Some(dir) => PathBuf::from(dir),
            None => {
                return Err(TwmError::Configuration(format!(
                    "cannot save {} without model_dir",
                    name
                ))
                .into())
            }
        };
        std::fs::create_dir_all(&model_dir)?;
        let path = model_dir.join(name);
        Checkpoint::new(&self.config, &self.wm, &self.ac, self.buffer.len())?.save(&path)?;
        self.state.last_save = self.buffer.len();
        info!("Saved a checkpoint in {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::Transition,
        dummy::{DummyActorCritic, DummyEnv, DummyEnvConfig, DummyWorldModel},
    };
    use ndarray::{arr1, arr2, IxDyn};

    #[test]
    fn test_start_states_alignment() -> Result<()> {
        // Latent t of row b is 10 * b + t; transition t has reward 10 * b + t.
        let z = Array3::from_shape_fn((2, 4, 1), |(b, t, _)| (10 * b + t) as f32);
        let batch = SequenceBatch {
            obs: ArrayD::zeros(IxDyn(&[2, 5, 1])),
            act: Array3::from_shape_fn((2, 4, 1), |(b, t, _)| (10 * b + t) as f32),
            reward: Array2::from_shape_fn((2, 4), |(b, t)| (10 * b + t) as f32),
            is_terminated: Array2::from_elem((2, 4), false),
            is_truncated: Array2::from_elem((2, 4), false),
        };

        let mut rng = StdRng::seed_from_u64(0);
        let start = start_states(&z, &batch, 4, &mut rng)?;
        assert_eq!(start.z.dim(), (4, 2, 1));
        for k in 0..4 {
            let z0 = start.z[[k, 0, 0]];
            assert_eq!(start.z[[k, 1, 0]], z0 + 1.0);
            assert_eq!(start.a[[k, 0, 0]], z0);
            assert_eq!(start.r[[k, 0]], z0);
            // The last latent of a row has no successor.
            assert!(z0 as usize % 10 < 3);
        }

        // More start states than latent pairs.
        let all = start_states(&z, &batch, 100, &mut rng)?;
        assert_eq!(all.z.dim(), (100, 2, 1));
        assert_eq!(all.r.dim(), (100, 1));
        assert!(all.z.outer_iter().all(|pair| pair[[1, 0]] == pair[[0, 0]] + 1.0));
        Ok(())
    }

    #[test]
    fn test_pretrain_targets_truncation() {
        let wm = DummyWorldModel::new(3, 0);
        let batch = SequenceBatch {
            obs: ArrayD::zeros(IxDyn(&[1, 6, 1])),
            act: Array3::zeros((1, 5, 1)),
            reward: arr2(&[[0.0, 1.0, 2.0, 3.0, 4.0]]),
            is_terminated: arr2(&[[false, false, false, true, false]]),
            is_truncated: arr2(&[[false, false, true, false, false]]),
        };
        let (r, g, d) = pretrain_targets(&wm, &batch);
        assert_eq!(r, arr2(&[[2.0, 3.0, 4.0]]));
        assert_eq!(d, arr2(&[[true, true, false]]));
        // A truncated step keeps its discount.
        assert!(g[[0, 0]] > 0.0);
        assert_eq!(g[[0, 1]], 0.0);
        assert_eq!(g[[0, 0]], g[[0, 2]]);
    }

    #[test]
    fn test_save_checkpoint_without_model_dir() -> Result<()> {
        let config = TrainerConfig::default()
            .env_steps(20)
            .buffer_prefill(10)
            .budget(1_000)
            .pretrain_budget(100)
            .wm_batch_size(2)
            .wm_sequence_length(4)
            .ac_batch_size(3)
            .ac_horizon(5);
        let env_config = DummyEnvConfig::default();
        let mut trainer: Trainer<DummyEnv, _, _> = Trainer::build(
            config,
            &env_config,
            &env_config,
            DummyWorldModel::new(3, 2),
            DummyActorCritic::new(2),
        )?;
        let err = trainer.save_checkpoint("agent.pt").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TwmError>(),
            Some(TwmError::Configuration(_))
        ));
        assert_eq!(trainer.state().last_save, 0);
        Ok(())
    }

    #[test]
    fn test_unflatten() -> Result<()> {
        let x = Array::from_shape_fn(IxDyn(&[6, 1, 2]), |ix| (ix[0] * 2 + ix[2]) as f32);
        let y = unflatten(x, 2, 3)?;
        assert_eq!(y.shape(), &[2, 3, 2]);
        assert_eq!(y[[1, 2, 1]], 11.0);
        assert!(unflatten(ArrayD::zeros(IxDyn(&[5, 1, 2])), 2, 3).is_err());
        Ok(())
    }

    #[test]
    fn test_sample_windows() -> Result<()> {
        let wm = DummyWorldModel::new(3, 0);
        let mut store = ReplayStore::build(&ReplayStoreConfig::default(), &[2], 1)?;
        for i in 0..8 {
            store.push(Transition {
                obs: ArrayD::from_elem(IxDyn(&[2]), i as f32),
                act: arr1(&[0.0]),
                reward: 0.0,
                is_terminated: false,
                is_truncated: false,
                next_obs: ArrayD::from_elem(IxDyn(&[2]), (i + 1) as f32),
            })?;
        }
        let ixs = Array2::from_shape_fn((9, 1), |(i, _)| i);
        let dist = wm.encode(&store.get_obs(&ixs, 0, false)?)?;
        let windows = Array2::from_shape_fn((2, 3), |(b, t)| 1 + 4 * b + t);
        let (z, logits) = sample_windows(&wm, &dist, &windows)?;
        assert_eq!(z.dim(), (2, 3, 3));
        assert_eq!(logits.shape(), &[2, 3, 3]);
        assert_eq!(z[[1, 2, 0]], 7.0);
        Ok(())
    }
}
