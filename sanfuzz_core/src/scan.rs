use crate::campaign::Campaign;
use crate::config::SanfuzzConfig;
use crate::corpus::InMemoryCorpus;
use crate::executor::CommandExecutor;
use crate::mutator::ByteFlipMutator;
use crate::oracle::CrashOracle;
use crate::report::{SanitizerEntry, ScanReport};
use crate::reproducer::{ReproducerError, ReproducerStore};
use crate::sanitizer::SanitizerCompiler;
use crate::static_checks::{self, StaticCheckError};
use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan target {0:?} is not a directory")]
    TargetNotFound(PathBuf),

    #[error(transparent)]
    Reproducers(#[from] ReproducerError),

    #[error(transparent)]
    Rules(#[from] StaticCheckError),
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Fuzz every binary that compiled.
    pub fuzz: bool,
    pub iterations: u64,
}

impl ScanOptions {
    pub fn from_config(config: &SanfuzzConfig) -> Self {
        Self {
            fuzz: true,
            iterations: config.fuzzer.iterations,
        }
    }
}

/// Seed file for `source`: the same path with an `.in` extension.
pub fn seed_path_for(source: &Path) -> PathBuf {
    source.with_extension("in")
}

fn binary_name_for(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    format!("{stem}_bin")
}

/// Static checks, sanitizer builds, smoke runs and fuzzing over every `*.c`
/// file under `target`.
///
/// Only setup problems are errors. A source that fails to compile is recorded
/// in the report and skipped.
pub fn run_scan<R: Rng>(
    target: &Path,
    config: &SanfuzzConfig,
    options: &ScanOptions,
    rng: &mut R,
) -> Result<ScanReport, ScanError> {
    if !target.is_dir() {
        return Err(ScanError::TargetNotFound(target.to_path_buf()));
    }
    let store = ReproducerStore::create(&config.reproducers.dir)?;
    let rules = static_checks::load_rules(&config.static_checks.extra_rules)?;
    let mut report = ScanReport::new(target.to_string_lossy());

    log::info!("Running static checks on {:?}", target);
    report.static_findings = static_checks::scan_directory(target, &rules);
    log::info!("Found {} static issues", report.static_findings.len());

    let compiler =
        SanitizerCompiler::new(&config.sanitizer).with_run_env(config.executor.env.clone());

    for source in static_checks::c_sources(target) {
        let key = source.to_string_lossy().into_owned();
        log::info!("Compiling {key}");
        let outcome = compiler.compile(&source, &binary_name_for(&source));
        let mut entry = SanitizerEntry::from(&outcome);

        if !outcome.succeeded() {
            log::warn!("Compile failed for {key} (rc {})", outcome.return_code);
            report.sanitizer.insert(key, entry);
            continue;
        }

        log::info!("Running {:?}", outcome.binary_path);
        entry.record_run(&compiler.smoke_run(&outcome.binary_path));
        report.sanitizer.insert(key.clone(), entry);

        if !options.fuzz {
            continue;
        }

        let seed = seed_path_for(&source);
        let seeds: Vec<PathBuf> = if seed.is_file() { vec![seed] } else { Vec::new() };
        let mut corpus = InMemoryCorpus::load(&seeds);
        let executor = CommandExecutor::new(
            config
                .executor
                .command_config(&outcome.binary_path, config.fuzzer.timeout()),
        );
        let mut campaign = Campaign::new(
            ByteFlipMutator::new(config.mutator.append_probability),
            executor,
            CrashOracle::with_markers(&config.oracle.crash_markers),
            store.clone(),
            options.iterations,
        );
        let crashes = campaign.run(&mut corpus, rng).crashes;
        log::info!("Fuzzing {key}: {} crashes", crashes.len());
        report.fuzzer_crashes.extend(crashes);
    }

    Ok(report)
}
