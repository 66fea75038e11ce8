use crate::corpus::Corpus;
use crate::input::Input;
use rand_core::RngCore;
use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Indicates that the corpus is empty, and therefore no input can be scheduled.
    #[error("Corpus is empty, cannot schedule next input")]
    CorpusEmpty,
}

/// A `Scheduler` picks the corpus entry the next mutation starts from.
pub trait Scheduler<I: Input>: Send + Sync {
    /// Returns the ID of the next input to mutate.
    ///
    /// The corpus may have grown since the previous call; schedulers see the
    /// current population every time.
    fn next(
        &mut self,
        corpus: &dyn Corpus<I>,
        rng: &mut dyn RngCore,
    ) -> Result<usize, SchedulerError>;
}

/// Uniform random selection with replacement over the current corpus.
///
/// Crash-inducing inputs are appended to the corpus as the campaign runs, so later
/// iterations draw from a larger pool biased toward crash-adjacent inputs.
#[derive(Default, Debug)]
pub struct RandomScheduler;

impl RandomScheduler {
    /// Creates a new `RandomScheduler`.
    pub fn new() -> Self {
        RandomScheduler
    }
}

impl<I: Input> Scheduler<I> for RandomScheduler {
    fn next(
        &mut self,
        corpus: &dyn Corpus<I>,
        rng: &mut dyn RngCore,
    ) -> Result<usize, SchedulerError> {
        corpus
            .random_select(rng)
            .map(|(id, _input)| id)
            .ok_or(SchedulerError::CorpusEmpty)
    }
}
