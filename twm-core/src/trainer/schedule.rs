//! Interleaving of environment steps and training rounds.
use super::TrainerConfig;
use crate::error::TwmError;

/// Spreads the training budget evenly over the environment steps of the main loop.
///
/// The budget left after pretraining is divided into batches of
/// `wm_train_steps * wm_batch_size * wm_sequence_length + ac_batch_size * ac_horizon`
/// samples. One training round is due every `train_every` environment steps,
/// where `train_every` may be fractional: the step counter is a float
/// accumulator and the remainder of a round carries over to the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSchedule {
    train_every: f64,
    num_batches: f64,
    step_counter: f64,
}

impl TrainSchedule {
    /// Computes the schedule of a configuration.
    pub fn new(config: &TrainerConfig) -> Result<Self, TwmError> {
        let remaining = config.budget as f64 - config.pretrain_budget as f64;
        if remaining <= 0.0 {
            return Err(TwmError::Configuration(format!(
                "pretrain_budget {} leaves nothing of budget {}",
                config.pretrain_budget, config.budget
            )));
        }

        let per_batch = (config.wm_train_steps * config.wm_batch_size * config.wm_sequence_length
            + config.ac_batch_size * config.ac_horizon) as f64;
        let num_batches = remaining / per_batch;
        let main_steps = config.env_steps as f64 - config.buffer_prefill as f64;
        let train_every = main_steps / num_batches;

        if !(num_batches.is_finite() && num_batches > 0.0) {
            return Err(TwmError::Configuration(format!(
                "budget gives {} training rounds",
                num_batches
            )));
        }
        if !(train_every.is_finite() && train_every > 0.0) {
            return Err(TwmError::Configuration(format!(
                "{} environment steps for {} training rounds give an interval of {}",
                main_steps, num_batches, train_every
            )));
        }

        Ok(Self {
            train_every,
            num_batches,
            step_counter: 0.0,
        })
    }

    /// Environment steps per training round.
    pub fn train_every(&self) -> f64 {
        self.train_every
    }

    /// Number of training rounds of the main loop.
    pub fn num_batches(&self) -> f64 {
        self.num_batches
    }

    /// Environment steps not yet paid with a training round.
    pub fn step_counter(&self) -> f64 {
        self.step_counter
    }

    /// Returns `true` while the next environment step is due.
    pub fn should_collect(&self) -> bool {
        self.step_counter < self.train_every
    }

    /// Counts one environment step.
    pub fn collect(&mut self) {
        self.step_counter += 1.0;
    }

    /// Consumes one training round if one is due.
    pub fn next_round(&mut self) -> bool {
        if self.step_counter >= self.train_every {
            self.step_counter -= self.train_every;
            true
        } else {
            false
        }
    }

    /// Clears the step counter.
    pub fn reset(&mut self) {
        self.step_counter = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(per_batch: usize, remaining: usize, main_steps: usize) -> TrainerConfig {
        TrainerConfig::default()
            .buffer_prefill(20)
            .env_steps(20 + main_steps)
            .pretrain_budget(100)
            .budget(100 + remaining)
            .wm_train_steps(1)
            .wm_batch_size(1)
            .wm_sequence_length(per_batch)
            .ac_batch_size(0)
    }

    /// Runs the main loop of the trainer without training.
    fn run(schedule: &mut TrainSchedule, steps: usize) -> usize {
        let (mut collected, mut rounds) = (0, 0);
        while collected < steps {
            while schedule.should_collect() && collected < steps {
                schedule.collect();
                collected += 1;
            }
            while schedule.next_round() {
                rounds += 1;
            }
        }
        rounds
    }

    #[test]
    fn test_fractional_interval() {
        // 40 rounds over 100 steps.
        let mut schedule = TrainSchedule::new(&config(10, 400, 100)).unwrap();
        assert_eq!(schedule.train_every(), 2.5);
        assert_eq!(schedule.num_batches(), 40.0);
        assert_eq!(run(&mut schedule, 100), 40);
        assert_eq!(schedule.step_counter(), 0.0);
    }

    #[test]
    fn test_several_rounds_per_step() {
        // 400 rounds over 100 steps.
        let mut schedule = TrainSchedule::new(&config(1, 400, 100)).unwrap();
        assert_eq!(schedule.train_every(), 0.25);
        schedule.collect();
        let mut rounds = 0;
        while schedule.next_round() {
            rounds += 1;
        }
        assert_eq!(rounds, 4);
        assert!(schedule.should_collect());
    }

    #[test]
    fn test_invalid_budgets() {
        assert!(TrainSchedule::new(&config(10, 0, 100)).is_err());
        assert!(TrainSchedule::new(&config(10, 400, 0)).is_err());
        let no_batch = config(10, 400, 100).wm_train_steps(0);
        assert!(TrainSchedule::new(&no_batch).is_err());
    }
}
