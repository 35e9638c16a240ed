//! Fixed-capacity store of transitions with windowed reads.
use super::{ReplayStoreConfig, UniformSweep};
use crate::{
    base::{SequenceBatch, Transition},
    error::TwmError,
    record::{Record, RecordValue},
};
use anyhow::Result;
use ndarray::{Array2, Array3, ArrayD, ArrayViewD, Axis, IxDyn};
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
    Rng, SeedableRng,
};

/// A circular store of transitions addressed by logical indices.
///
/// Logical index `0` is the oldest surviving transition and `len() - 1` the
/// newest one. Observation index `len()` refers to the observation following
/// the newest transition, so every transition has its next observation.
///
/// Reads take windows `[B, L]` of consecutive logical indices, as returned by
/// [`ReplayStore::sample_indices`] and [`ReplayStore::generate_uniform_indices`],
/// and extend them backwards by `prefix` steps. A read reaching before index `0`
/// or past the newest data fails with [`TwmError::DataAvailability`].
/// Windows are not cut at episode boundaries.
pub struct ReplayStore {
    capacity: usize,
    context: usize,
    temperature: Option<f32>,

    /// Write cursor, a physical slot.
    i: usize,
    size: usize,

    obs_shape: Vec<usize>,
    act_dim: usize,

    obs: ArrayD<f32>,
    tail_obs: ArrayD<f32>,
    act: Array2<f32>,
    reward: Vec<f32>,
    is_terminated: Vec<i8>,
    is_truncated: Vec<i8>,

    /// Number of times each physical slot was sampled as a window start.
    visits: Vec<usize>,
    total_reward: f32,
    num_episodes: usize,
    rng: StdRng,
}

impl ReplayStore {
    /// Creates an empty store for observations of `obs_shape` and actions of length `act_dim`.
    pub fn build(config: &ReplayStoreConfig, obs_shape: &[usize], act_dim: usize) -> Result<Self> {
        if config.capacity == 0 {
            return Err(TwmError::Configuration("capacity must be positive".to_string()).into());
        }
        if let Some(temperature) = config.temperature {
            if !(temperature > 0.0) {
                return Err(TwmError::Configuration(format!(
                    "sampling temperature must be positive, got {}",
                    temperature
                ))
                .into());
            }
        }
        let capacity = config.capacity;
        let shape = [&[capacity][..], obs_shape].concat();

        Ok(Self {
            capacity,
            context: config.context,
            temperature: config.temperature,
            i: 0,
            size: 0,
            obs_shape: obs_shape.to_vec(),
            act_dim,
            obs: ArrayD::zeros(IxDyn(&shape)),
            tail_obs: ArrayD::zeros(IxDyn(obs_shape)),
            act: Array2::zeros((capacity, act_dim)),
            reward: vec![0.; capacity],
            is_terminated: vec![0; capacity],
            is_truncated: vec![0; capacity],
            visits: vec![0; capacity],
            total_reward: 0.,
            num_episodes: 0,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Number of stored transitions.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Maximum number of transitions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Physical slot the next transition is written to.
    pub fn write_cursor(&self) -> usize {
        self.i
    }

    /// Shape of a single observation.
    pub fn obs_shape(&self) -> &[usize] {
        &self.obs_shape
    }

    /// Length of the action vectors.
    pub fn act_dim(&self) -> usize {
        self.act_dim
    }

    /// Sum of the rewards of all transitions pushed so far.
    pub fn total_reward(&self) -> f32 {
        self.total_reward
    }

    /// Number of transitions pushed with a done flag.
    pub fn num_episodes(&self) -> usize {
        self.num_episodes
    }

    #[inline]
    fn physical(&self, ix: usize) -> usize {
        let oldest = if self.size == self.capacity { self.i } else { 0 };
        (oldest + ix) % self.capacity
    }

    #[inline]
    fn obs_at(&self, ix: usize) -> ArrayViewD<f32> {
        if ix == self.size {
            self.tail_obs.view()
        } else {
            self.obs.index_axis(Axis(0), self.physical(ix))
        }
    }

    /// Appends a transition, overwriting the oldest one when the store is full.
    pub fn push(&mut self, tr: Transition) -> Result<()> {
        if tr.obs.shape() != self.obs_shape.as_slice()
            || tr.next_obs.shape() != self.obs_shape.as_slice()
        {
            return Err(TwmError::Shape(format!(
                "expected observations of shape {:?}, got {:?} and {:?}",
                self.obs_shape,
                tr.obs.shape(),
                tr.next_obs.shape()
            ))
            .into());
        }
        if tr.act.len() != self.act_dim {
            return Err(TwmError::Shape(format!(
                "expected actions of length {}, got {}",
                self.act_dim,
                tr.act.len()
            ))
            .into());
        }

        let i = self.i;
        self.obs.index_axis_mut(Axis(0), i).assign(&tr.obs);
        self.act.row_mut(i).assign(&tr.act);
        self.reward[i] = tr.reward;
        self.is_terminated[i] = tr.is_terminated as i8;
        self.is_truncated[i] = tr.is_truncated as i8;
        self.visits[i] = 0;
        self.tail_obs = tr.next_obs;

        self.total_reward += tr.reward;
        if tr.is_terminated || tr.is_truncated {
            self.num_episodes += 1;
        }

        self.i = (self.i + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        Ok(())
    }

    /// Returns the first index of each extended window and the extended length.
    ///
    /// Every index of the extended windows must be at most `last`.
    fn extend_windows(
        &self,
        indices: &Array2<usize>,
        prefix: usize,
        extra: usize,
        last: Option<usize>,
    ) -> Result<(Vec<usize>, usize)> {
        let n = prefix + indices.ncols() + extra;
        let last = match last {
            Some(last) => last,
            None => {
                return Err(TwmError::DataAvailability("the store is empty".to_string()).into())
            }
        };

        let mut firsts = Vec::with_capacity(indices.nrows());
        for row in indices.outer_iter() {
            let start = row.get(0).copied().unwrap_or(0);
            if start < prefix {
                return Err(TwmError::DataAvailability(format!(
                    "window at {} has no {} preceding steps",
                    start, prefix
                ))
                .into());
            }
            let first = start - prefix;
            if n > 0 && first + n - 1 > last {
                return Err(TwmError::DataAvailability(format!(
                    "window at {} of length {} reaches past index {}",
                    start, n, last
                ))
                .into());
            }
            firsts.push(first);
        }
        Ok((firsts, n))
    }

    fn transition_windows(
        &self,
        indices: &Array2<usize>,
        prefix: usize,
    ) -> Result<(Vec<usize>, usize)> {
        self.extend_windows(indices, prefix, 0, self.size.checked_sub(1))
    }

    /// Observations `[B, prefix + L (+ 1), ...]`.
    ///
    /// Index `len()` is valid and refers to the observation following the
    /// newest transition.
    pub fn get_obs(
        &self,
        indices: &Array2<usize>,
        prefix: usize,
        return_next: bool,
    ) -> Result<ArrayD<f32>> {
        let (firsts, n) = self.extend_windows(indices, prefix, return_next as usize, Some(self.size))?;
        let shape = [&[firsts.len(), n][..], self.obs_shape.as_slice()].concat();
        let mut obs = ArrayD::zeros(IxDyn(&shape));
        for (first, mut row) in firsts.iter().zip(obs.outer_iter_mut()) {
            for (k, mut o) in row.outer_iter_mut().enumerate() {
                o.assign(&self.obs_at(first + k));
            }
        }
        Ok(obs)
    }

    /// Actions `[B, prefix + L, A]`.
    pub fn get_actions(&self, indices: &Array2<usize>, prefix: usize) -> Result<Array3<f32>> {
        let (firsts, n) = self.transition_windows(indices, prefix)?;
        Ok(Array3::from_shape_fn(
            (firsts.len(), n, self.act_dim),
            |(b, t, k)| self.act[[self.physical(firsts[b] + t), k]],
        ))
    }

    /// Rewards `[B, prefix + L]`.
    pub fn get_rewards(&self, indices: &Array2<usize>, prefix: usize) -> Result<Array2<f32>> {
        let (firsts, n) = self.transition_windows(indices, prefix)?;
        Ok(Array2::from_shape_fn((firsts.len(), n), |(b, t)| {
            self.reward[self.physical(firsts[b] + t)]
        }))
    }

    /// Termination flags `[B, prefix + L]`.
    pub fn get_terminated(&self, indices: &Array2<usize>, prefix: usize) -> Result<Array2<bool>> {
        let (firsts, n) = self.transition_windows(indices, prefix)?;
        Ok(Array2::from_shape_fn((firsts.len(), n), |(b, t)| {
            self.is_terminated[self.physical(firsts[b] + t)] == 1
        }))
    }

    /// Truncation flags `[B, prefix + L]`.
    pub fn get_truncated(&self, indices: &Array2<usize>, prefix: usize) -> Result<Array2<bool>> {
        let (firsts, n) = self.transition_windows(indices, prefix)?;
        Ok(Array2::from_shape_fn((firsts.len(), n), |(b, t)| {
            self.is_truncated[self.physical(firsts[b] + t)] == 1
        }))
    }

    /// Aligned windows of transitions, optionally followed by the next observation.
    pub fn get_data(
        &self,
        indices: &Array2<usize>,
        prefix: usize,
        return_next_obs: bool,
    ) -> Result<SequenceBatch> {
        Ok(SequenceBatch {
            obs: self.get_obs(indices, prefix, return_next_obs)?,
            act: self.get_actions(indices, prefix)?,
            reward: self.get_rewards(indices, prefix)?,
            is_terminated: self.get_terminated(indices, prefix)?,
            is_truncated: self.get_truncated(indices, prefix)?,
        })
    }

    /// Valid window starts for windows of `sequence_length` transitions.
    ///
    /// A start `s` leaves `context` transitions before the window and the
    /// observation after its last transition readable.
    fn valid_starts(&self, sequence_length: usize) -> Vec<usize> {
        match self.size.checked_sub(sequence_length) {
            Some(hi) if sequence_length > 0 && hi >= self.context => (self.context..=hi).collect(),
            _ => vec![],
        }
    }

    /// Sampling weights of the given starts, normalized to a maximum of one.
    fn start_weights(&self, starts: &[usize]) -> Vec<f64> {
        match self.temperature {
            None => vec![1.0; starts.len()],
            Some(temperature) => {
                let visits: Vec<f64> = starts
                    .iter()
                    .map(|&s| self.visits[self.physical(s)] as f64)
                    .collect();
                let min = visits.iter().cloned().fold(f64::INFINITY, f64::min);
                visits
                    .iter()
                    .map(|v| (-(v - min) / temperature as f64).exp().max(f64::MIN_POSITIVE))
                    .collect()
            }
        }
    }

    /// Samples `batch_size` windows `[batch_size, sequence_length]`.
    ///
    /// Starts are drawn independently, with replacement, with probabilities
    /// `softmax(-visits / temperature)`, or uniformly without a temperature.
    /// The visit count of a start is incremented once per draw.
    pub fn sample_indices(
        &mut self,
        batch_size: usize,
        sequence_length: usize,
    ) -> Result<Array2<usize>> {
        let starts = self.valid_starts(sequence_length);
        if starts.is_empty() || batch_size == 0 {
            return Err(TwmError::DataAvailability(format!(
                "cannot sample windows of length {} from {} transitions",
                sequence_length, self.size
            ))
            .into());
        }

        let mut chosen = Vec::with_capacity(batch_size);
        match self.temperature {
            None => {
                for _ in 0..batch_size {
                    chosen.push(starts[self.rng.gen_range(0..starts.len())]);
                }
            }
            Some(_) => {
                let dist = WeightedIndex::new(&self.start_weights(&starts))?;
                for _ in 0..batch_size {
                    chosen.push(starts[dist.sample(&mut self.rng)]);
                }
            }
        }

        for &s in chosen.iter() {
            let slot = self.physical(s);
            self.visits[slot] += 1;
        }

        Ok(Array2::from_shape_fn((batch_size, sequence_length), |(b, t)| {
            chosen[b] + t
        }))
    }

    /// Creates a sweep over the whole valid range.
    ///
    /// Windows have `sequence_length + extra` observation indices, the first
    /// one at least `context`. Fails when no window fits.
    pub fn generate_uniform_indices(
        &mut self,
        batch_size: usize,
        sequence_length: usize,
        extra: usize,
    ) -> Result<UniformSweep> {
        UniformSweep::new(
            self.size,
            self.context,
            batch_size,
            sequence_length,
            extra,
            &mut self.rng,
        )
    }

    /// Visit counts of the stored transitions in logical order.
    pub fn visit_histogram(&self) -> Vec<f32> {
        (0..self.size)
            .map(|ix| self.visits[self.physical(ix)] as f32)
            .collect()
    }

    /// Current probabilities of sampling each logical index as a window start
    /// of length one. Indices that are no valid start have probability zero.
    pub fn sample_probs_histogram(&self) -> Vec<f32> {
        let mut probs = vec![0.; self.size];
        let starts = self.valid_starts(1);
        let weights = self.start_weights(&starts);
        let sum: f64 = weights.iter().sum();
        if sum > 0. {
            for (s, w) in starts.iter().zip(weights.iter()) {
                probs[*s] = (w / sum) as f32;
            }
        }
        probs
    }

    /// Size, capacity, total reward and number of episodes.
    pub fn metrics(&self) -> Record {
        let mut record = Record::from_scalar("size", self.size as f32);
        record.insert("capacity", RecordValue::Scalar(self.capacity as f32));
        record.insert("total_reward", RecordValue::Scalar(self.total_reward));
        record.insert("num_episodes", RecordValue::Scalar(self.num_episodes as f32));
        record
    }

    /// Windows `[n, 1]` of uniformly random observation indices in `[0, len())`.
    pub fn random_obs_indices<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<usize> {
        let size = self.size.max(1);
        Array2::from_shape_fn((n, 1), |_| rng.gen_range(0..size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array};
    use std::collections::HashSet;

    fn transition(i: usize) -> Transition {
        Transition {
            obs: Array::from_elem(IxDyn(&[2]), i as f32),
            act: arr1(&[i as f32]),
            reward: 1.0 + i as f32,
            is_terminated: i % 4 == 3,
            is_truncated: false,
            next_obs: Array::from_elem(IxDyn(&[2]), (i + 1) as f32),
        }
    }

    fn store(capacity: usize, n: usize) -> ReplayStore {
        let config = ReplayStoreConfig::default().capacity(capacity);
        let mut store = ReplayStore::build(&config, &[2], 1).unwrap();
        for i in 0..n {
            store.push(transition(i)).unwrap();
        }
        store
    }

    fn is_data_availability(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<TwmError>(),
            Some(TwmError::DataAvailability(_))
        )
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut store = store(5, 5);
        assert_eq!(store.len(), 5);
        assert_eq!(store.write_cursor(), 0);

        store.push(transition(5)).unwrap();
        assert_eq!(store.len(), 5);
        assert_eq!(store.write_cursor(), 1);
        assert_eq!(store.obs.index_axis(Axis(0), 0)[[0]], 5.0);

        // Logical index 0 is now the second transition.
        let obs = store.get_obs(&Array2::from_elem((1, 1), 0), 0, false).unwrap();
        assert_eq!(obs[[0, 0, 0]], 1.0);
        let obs = store.get_obs(&Array2::from_elem((1, 1), 5), 0, false).unwrap();
        assert_eq!(obs[[0, 0, 0]], 6.0);
    }

    #[test]
    fn test_prefix_reads_in_insertion_order() {
        let store = store(20, 12);
        for i in 0..=12 {
            for p in 0..=i {
                let obs = store.get_obs(&Array2::from_elem((1, 1), i), p, false).unwrap();
                assert_eq!(obs.shape(), &[1, p + 1, 2]);
                for k in 0..=p {
                    assert_eq!(obs[[0, k, 1]], (i - p + k) as f32);
                }
            }
        }
    }

    #[test]
    fn test_get_data_alignment() {
        let store = store(20, 12);
        let indices = Array2::from_shape_fn((2, 3), |(b, t)| 4 + 5 * b + t);
        let batch = store.get_data(&indices, 1, true).unwrap();
        assert_eq!(batch.obs.shape(), &[2, 5, 2]);
        assert_eq!(batch.act.shape(), &[2, 4, 1]);
        assert_eq!(batch.reward.shape(), &[2, 4]);
        assert_eq!(batch.obs[[1, 0, 0]], 8.0);
        assert_eq!(batch.obs[[1, 4, 0]], 12.0);
        assert_eq!(batch.act[[0, 0, 0]], 3.0);
        assert_eq!(batch.reward[[0, 0]], 4.0);
        assert!(batch.is_terminated[[0, 0]]);
        assert!(!batch.is_truncated[[0, 0]]);
    }

    #[test]
    fn test_out_of_range_reads_fail() {
        let mut store = store(20, 5);
        let err = store.get_obs(&Array2::from_elem((1, 1), 1), 2, false).unwrap_err();
        assert!(is_data_availability(&err));
        let err = store.get_actions(&Array2::from_elem((1, 1), 5), 0).unwrap_err();
        assert!(is_data_availability(&err));
        let err = store.get_obs(&Array2::from_elem((1, 1), 5), 0, true).unwrap_err();
        assert!(is_data_availability(&err));
        assert!(store.get_obs(&Array2::from_elem((1, 1), 5), 0, false).is_ok());

        let err = store.sample_indices(4, 5).unwrap_err();
        assert!(is_data_availability(&err));

        let mut empty = ReplayStore::build(&ReplayStoreConfig::default(), &[2], 1).unwrap();
        let err = empty.sample_indices(1, 1).unwrap_err();
        assert!(is_data_availability(&err));
        let err = empty.generate_uniform_indices(1, 1, 0).unwrap_err();
        assert!(is_data_availability(&err));
    }

    #[test]
    fn test_sample_indices_valid() {
        for temperature in [None, Some(20.0)] {
            let config = ReplayStoreConfig::default()
                .capacity(50)
                .temperature(temperature);
            let mut store = ReplayStore::build(&config, &[2], 1).unwrap();
            for i in 0..30 {
                store.push(transition(i)).unwrap();
            }

            for _ in 0..20 {
                let indices = store.sample_indices(8, 4).unwrap();
                assert_eq!(indices.shape(), &[8, 4]);
                for row in indices.outer_iter() {
                    assert!(row[0] >= 1 && row[0] <= 26);
                    for t in 1..4 {
                        assert_eq!(row[t], row[0] + t);
                    }
                }
                store.get_data(&indices, 1, true).unwrap();
            }
            assert_eq!(store.visit_histogram().iter().sum::<f32>(), 160.0);
        }
    }

    #[test]
    fn test_sample_indices_more_rows_than_starts() {
        for temperature in [None, Some(20.0)] {
            let config = ReplayStoreConfig::default()
                .capacity(100)
                .temperature(temperature);
            let mut store = ReplayStore::build(&config, &[2], 1).unwrap();
            for i in 0..20 {
                store.push(transition(i)).unwrap();
            }

            // Starts 1..=4 are the only valid ones.
            let indices = store.sample_indices(32, 16).unwrap();
            assert_eq!(indices.shape(), &[32, 16]);
            assert!(indices.column(0).iter().all(|s| *s >= 1 && *s <= 4));
            assert_eq!(store.visit_histogram().iter().sum::<f32>(), 32.0);
            assert!(store.get_data(&indices, 1, true).is_ok());
        }
    }

    #[test]
    fn test_sampling_is_seeded() {
        let config = ReplayStoreConfig::default()
            .capacity(50)
            .temperature(Some(20.0))
            .seed(11);
        let mut stores: Vec<ReplayStore> = (0..2)
            .map(|_| ReplayStore::build(&config, &[2], 1).unwrap())
            .collect();
        for store in stores.iter_mut() {
            for i in 0..30 {
                store.push(transition(i)).unwrap();
            }
        }
        for _ in 0..5 {
            let a = stores[0].sample_indices(6, 4).unwrap();
            let b = stores[1].sample_indices(6, 4).unwrap();
            assert_eq!(a, b);
        }
        let a = stores[0].generate_uniform_indices(3, 4, 2).unwrap().next();
        let b = stores[1].generate_uniform_indices(3, 4, 2).unwrap().next();
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_positive_temperature_is_rejected() {
        for temperature in [0.0, -1.0] {
            let config = ReplayStoreConfig::default().temperature(Some(temperature));
            let err = ReplayStore::build(&config, &[2], 1).err().unwrap();
            assert!(matches!(
                err.downcast_ref::<TwmError>(),
                Some(TwmError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_visits_lower_sample_probs() {
        let config = ReplayStoreConfig::default()
            .capacity(50)
            .temperature(Some(1.0));
        let mut store = ReplayStore::build(&config, &[2], 1).unwrap();
        for i in 0..10 {
            store.push(transition(i)).unwrap();
        }
        let indices = store.sample_indices(1, 1).unwrap();
        let s = indices[[0, 0]];
        assert_eq!(store.visit_histogram()[s], 1.0);

        let probs = store.sample_probs_histogram();
        assert_eq!(probs[0], 0.0);
        assert!(probs.iter().skip(1).all(|p| *p > 0.0));
        let other = if s == 1 { 2 } else { 1 };
        assert!(probs[s] < probs[other]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_uniform_sweep_coverage() {
        let mut store = store(200, 100);
        let (batch_size, sequence_length) = (4, 5);
        let sweep = store
            .generate_uniform_indices(batch_size, sequence_length, 0)
            .unwrap();
        let batches: Vec<Array2<usize>> = sweep.collect();
        assert!(batches.len() >= 100 / (batch_size * sequence_length));

        let mut seen = HashSet::new();
        for batch in batches.iter() {
            assert!(batch.nrows() <= batch_size);
            assert_eq!(batch.ncols(), sequence_length);
            for &ix in batch.iter() {
                assert!(ix >= 1 && ix <= 100);
                assert!(seen.insert(ix));
            }
        }
        assert_eq!(seen.len(), 20 * sequence_length);
    }

    #[test]
    fn test_uniform_sweep_with_extra_is_readable() {
        let mut store = store(200, 37);
        let sweep = store.generate_uniform_indices(3, 6, 2).unwrap();
        let windows: Vec<Array2<usize>> = sweep.collect();
        assert_eq!(windows.iter().map(|w| w.nrows()).sum::<usize>(), (37 + 1 - 1 - 2) / 6);
        for w in windows.iter() {
            assert_eq!(w.ncols(), 8);
            assert!(store.get_obs(w, 1, false).is_ok());
            let starts = w.slice(ndarray::s![.., ..7]).to_owned();
            assert!(store.get_data(&starts, 1, false).is_ok());
        }
    }

    #[test]
    fn test_metrics() {
        let store = store(100, 10);
        let record = store.metrics();
        assert_eq!(record.get_scalar("size").unwrap(), 10.0);
        assert_eq!(record.get_scalar("capacity").unwrap(), 100.0);
        assert_eq!(record.get_scalar("num_episodes").unwrap(), 2.0);
        let expected: f32 = (0..10).map(|i| 1.0 + i as f32).sum();
        assert_eq!(record.get_scalar("total_reward").unwrap(), expected);
    }
}
