//! Policies acting on the latest observation of the replay store.
use crate::{
    base::{ActionSpace, ActorCritic, WorldModel},
    dreamer::{Dreamer, DreamerConfig, RollerMode},
    replay_buffer::ReplayStore,
};
use anyhow::Result;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, SeedableRng};

/// Chooses the action at the tail observation of a replay store.
///
/// The tail observation is the observation the environment currently
/// presents, as the sampler pushes every transition before the next action.
pub trait BufferPolicy {
    /// Returns the action to take.
    fn act(&mut self, store: &ReplayStore) -> Result<Array1<f32>>;
}

/// Uniformly random actions, used to prefill the store.
pub struct RandomPolicy {
    action_space: ActionSpace,
    rng: StdRng,
}

impl RandomPolicy {
    /// Creates a policy over the given action space drawing from a seeded generator.
    pub fn new(action_space: ActionSpace, seed: u64) -> Self {
        Self {
            action_space,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl BufferPolicy for RandomPolicy {
    fn act(&mut self, _store: &ReplayStore) -> Result<Array1<f32>> {
        Ok(self.action_space.sample(&mut self.rng))
    }
}

/// Runs an observing [`Dreamer`] over the transitions appended to the store.
///
/// The first call warms up the roller on the last `memory_length`
/// observations of the store. Later calls feed it the transition appended
/// since the previous call. If the store moved by more than one transition,
/// the roller is warmed up again.
pub struct BufferObsPolicy<'a, W: WorldModel, A: ActorCritic> {
    dreamer: Dreamer<'a, W, A>,
    memory_length: usize,

    /// `(len, write_cursor)` of the store at the previous call.
    seen: Option<(usize, usize)>,
}

fn single(ix: usize) -> Array2<usize> {
    Array2::from_elem((1, 1), ix)
}

impl<'a, W: WorldModel, A: ActorCritic> BufferObsPolicy<'a, W, A> {
    /// Creates a policy whose roller conditions on `memory_length` latents.
    pub fn new(wm: &'a W, ac: &'a A, memory_length: usize, ac_input_h: bool) -> Self {
        let config = DreamerConfig::new(RollerMode::Observe)
            .memory_length(memory_length)
            .ac_input_h(ac_input_h);
        Self {
            dreamer: Dreamer::new(config, wm, ac),
            memory_length: memory_length.max(1),
            seen: None,
        }
    }

    fn warm_up(&mut self, store: &ReplayStore) -> Result<()> {
        let tail = store.len();
        let n = self.memory_length.min(tail + 1);
        let obs = store.get_obs(&single(tail), n - 1, false)?;
        if n == 1 {
            return self.dreamer.observe_reset_single(&obs);
        }

        let last = single(tail - 1);
        let prefix = n - 2;
        self.dreamer.observe_reset(
            &obs,
            &store.get_actions(&last, prefix)?,
            &store.get_rewards(&last, prefix)?,
            &store.get_terminated(&last, prefix)?,
            &store.get_truncated(&last, prefix)?,
        )
    }

    fn observe_last(&mut self, store: &ReplayStore) -> Result<()> {
        let tail = store.len();
        let last = single(tail - 1);
        let next_obs = store.get_obs(&single(tail), 0, false)?;
        let a = store.get_actions(&last, 0)?.index_axis(Axis(1), 0).to_owned();
        let r = store.get_rewards(&last, 0)?.column(0).to_owned();
        let terminated = store.get_terminated(&last, 0)?.column(0).to_owned();
        let truncated = store.get_truncated(&last, 0)?.column(0).to_owned();
        self.dreamer
            .observe_step(&a, &next_obs, &r, &terminated, &truncated)?;
        Ok(())
    }
}

impl<'a, W: WorldModel, A: ActorCritic> BufferPolicy for BufferObsPolicy<'a, W, A> {
    fn act(&mut self, store: &ReplayStore) -> Result<Array1<f32>> {
        let now = (store.len(), store.write_cursor());
        match self.seen {
            Some(seen) if seen == now => {}
            Some((_, cursor)) if !store.is_empty() && (cursor + 1) % store.capacity() == now.1 => {
                self.observe_last(store)?
            }
            _ => self.warm_up(store)?,
        }
        self.seen = Some(now);

        let a = self.dreamer.act()?;
        Ok(a.row(0).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::Transition,
        dummy::{DummyActorCritic, DummyWorldModel},
        replay_buffer::ReplayStoreConfig,
    };
    use ndarray::{arr1, Array, IxDyn};

    fn push(store: &mut ReplayStore, i: usize) {
        let obs = |v: usize| Array::from_elem(IxDyn(&[3]), v as f32);
        store
            .push(Transition {
                obs: obs(i),
                act: arr1(&[1.0]),
                reward: 1.0,
                is_terminated: false,
                is_truncated: false,
                next_obs: obs(i + 1),
            })
            .unwrap();
    }

    #[test]
    fn test_buffer_obs_policy_follows_store() {
        let wm = DummyWorldModel::new(4, 2);
        let ac = DummyActorCritic::new(3);
        let mut store = ReplayStore::build(&ReplayStoreConfig::default(), &[3], 1).unwrap();
        push(&mut store, 0);
        push(&mut store, 1);

        let mut policy = BufferObsPolicy::new(&wm, &ac, 4, true);
        let a = policy.act(&store).unwrap();
        assert_eq!(a.len(), 1);
        assert!(a[0] < 3.0);
        // Warm-up over three observations runs the dynamics model once.
        assert_eq!(wm.num_predict(), 1);
        assert_eq!(wm.num_encode(), 1);

        // Acting again without a new transition does not step the roller.
        policy.act(&store).unwrap();
        assert_eq!(wm.num_predict(), 1);

        push(&mut store, 2);
        policy.act(&store).unwrap();
        assert_eq!(wm.num_predict(), 2);
        assert_eq!(wm.num_encode(), 2);
        assert_eq!(ac.num_act(), 3);
    }

    #[test]
    fn test_buffer_obs_policy_single_observation() {
        let wm = DummyWorldModel::new(4, 2);
        let ac = DummyActorCritic::new(3);
        let mut store = ReplayStore::build(&ReplayStoreConfig::default(), &[3], 1).unwrap();
        push(&mut store, 0);

        let mut policy = BufferObsPolicy::new(&wm, &ac, 1, false);
        policy.act(&store).unwrap();
        assert_eq!(wm.num_predict(), 0);
    }

    #[test]
    fn test_random_policy() {
        let store = ReplayStore::build(&ReplayStoreConfig::default(), &[3], 1).unwrap();
        let mut policy = RandomPolicy::new(ActionSpace::Discrete(4), 5);
        let mut same_seed = RandomPolicy::new(ActionSpace::Discrete(4), 5);
        for _ in 0..20 {
            let a = policy.act(&store).unwrap();
            assert!(a[0] >= 0.0 && a[0] < 4.0);
            assert_eq!(a, same_seed.act(&store).unwrap());
        }
    }
}
