use crate::corpus::{Corpus, InMemoryCorpus};
use crate::executor::{CommandExecutor, CommandExecutorConfig, Executor};
use crate::mutator::{ByteFlipMutator, Mutator};
use crate::oracle::{CrashOracle, Oracle};
use crate::reproducer::{CrashRecord, DEFAULT_REPRODUCER_DIR, ReproducerError, ReproducerStore};
use crate::scheduler::{RandomScheduler, Scheduler};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CampaignError {
    /// The reproducer directory could not be prepared; no iteration ran.
    #[error("Campaign setup failed: {0}")]
    Setup(#[from] ReproducerError),
}

/// Outcome of a finished campaign.
#[derive(Debug, Clone, Default)]
pub struct CampaignReport {
    /// Crash records in discovery order.
    pub crashes: Vec<CrashRecord>,
    pub executions: u64,
    pub timeouts: u64,
    /// Crashes that were detected but could not be written to disk.
    pub unpersisted_crashes: u64,
    pub corpus_len: usize,
    pub elapsed: Duration,
}

/// One bounded fuzzing run against one target.
///
/// Every iteration does sample, mutate, execute, classify; a crash is persisted
/// and its input appended to the corpus. The loop always runs exactly
/// `iterations` steps: no single iteration can end it early.
pub struct Campaign<M, E, O> {
    mutator: M,
    executor: E,
    oracle: O,
    scheduler: RandomScheduler,
    store: ReproducerStore,
    iterations: u64,
}

impl<M, E, O> Campaign<M, E, O>
where
    E: Executor<Vec<u8>>,
    O: Oracle,
{
    /// Assembles a campaign that runs exactly `iterations` steps.
    pub fn new(
        mutator: M,
        executor: E,
        oracle: O,
        store: ReproducerStore,
        iterations: u64,
    ) -> Self {
        Self {
            mutator,
            executor,
            oracle,
            scheduler: RandomScheduler::new(),
            store,
            iterations,
        }
    }

    /// Runs the campaign against `corpus`, growing it with every crash found.
    ///
    /// # Arguments
    /// * `corpus`: Starting inputs; crash-inducing inputs are appended to it.
    /// * `rng`: Source of all scheduling and mutation randomness.
    ///
    /// # Returns
    /// Counters and the crash records, in discovery order. Never fails: per-iteration
    /// problems are logged and counted.
    pub fn run<R>(&mut self, corpus: &mut InMemoryCorpus<Vec<u8>>, rng: &mut R) -> CampaignReport
    where
        R: Rng,
        M: Mutator<Vec<u8>, R>,
    {
        let start_time = Instant::now();
        let mut report = CampaignReport::default();
        let progress_every = (self.iterations / 100).max(1);

        log::info!(
            "Starting campaign: {} iterations, {} initial corpus entries",
            self.iterations,
            corpus.len()
        );

        for i in 0..self.iterations {
            let seed = match <RandomScheduler as Scheduler<Vec<u8>>>::next(
                &mut self.scheduler,
                &*corpus,
                rng,
            ) {
                Ok(id) => match corpus.get(id) {
                    Some(entry) => entry.input.clone(),
                    None => {
                        log::error!("Scheduler returned unknown corpus id {id}, skipping");
                        continue;
                    }
                },
                Err(e) => {
                    log::error!("Iteration {i}: {e}");
                    continue;
                }
            };

            let candidate = self.mutator.mutate(&seed, rng);
            let result = self.executor.execute(&candidate);
            report.executions += 1;
            if result.timed_out {
                report.timeouts += 1;
            }

            if self.oracle.is_crash(&result) {
                match self.store.persist(&candidate, &result) {
                    Ok(record) => {
                        log::info!(
                            "Crash at iteration {} (rc {}): {:?}",
                            i,
                            record.return_code,
                            record.input_path
                        );
                        corpus.extend(candidate, Some(record.input_path.clone()));
                        report.crashes.push(record);
                    }
                    Err(e) => {
                        log::error!("Crash at iteration {i} could not be persisted: {e}");
                        report.unpersisted_crashes += 1;
                        corpus.extend(candidate, None);
                    }
                }
            }

            if i > 0 && i % progress_every == 0 {
                let elapsed = start_time.elapsed().as_secs_f32();
                let exec_per_sec = if elapsed > 0.0 {
                    report.executions as f32 / elapsed
                } else {
                    0.0
                };
                log::debug!(
                    "Iter: {}/{}, Corpus: {}, Crashes: {}, Execs/sec: {:.2}",
                    i,
                    self.iterations,
                    corpus.len(),
                    report.crashes.len(),
                    exec_per_sec
                );
            }
        }

        report.corpus_len = corpus.len();
        report.elapsed = start_time.elapsed();
        log::info!(
            "Campaign finished in {:.2?}: {} executions, {} crashes, {} timeouts, corpus size {}",
            report.elapsed,
            report.executions,
            report.crashes.len(),
            report.timeouts,
            report.corpus_len
        );
        report
    }
}

/// Fuzzes `binary` for `iterations` steps with default components, writing
/// reproducers to `reproducers/` and using the process-wide random source.
pub fn run_campaign<P: AsRef<Path>>(
    binary: &Path,
    seed_paths: &[P],
    iterations: u64,
    timeout: Duration,
) -> Result<Vec<CrashRecord>, CampaignError> {
    run_campaign_in(
        binary,
        seed_paths,
        iterations,
        timeout,
        PathBuf::from(DEFAULT_REPRODUCER_DIR),
        &mut rand::rng(),
    )
}

/// [`run_campaign`] with an explicit reproducer directory and random source.
pub fn run_campaign_in<P: AsRef<Path>, R: Rng>(
    binary: &Path,
    seed_paths: &[P],
    iterations: u64,
    timeout: Duration,
    reproducer_dir: PathBuf,
    rng: &mut R,
) -> Result<Vec<CrashRecord>, CampaignError> {
    let store = ReproducerStore::create(reproducer_dir)?;
    let mut corpus = InMemoryCorpus::load(seed_paths);
    let executor = CommandExecutor::new(CommandExecutorConfig::for_binary(binary, timeout));
    let mut campaign = Campaign::new(
        ByteFlipMutator::default(),
        executor,
        CrashOracle::new(),
        store,
        iterations,
    );
    Ok(campaign.run(&mut corpus, rng).crashes)
}
