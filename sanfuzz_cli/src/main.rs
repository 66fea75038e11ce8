use sanfuzz_core::campaign::Campaign;
use sanfuzz_core::config::SanfuzzConfig;
use sanfuzz_core::corpus::InMemoryCorpus;
use sanfuzz_core::executor::CommandExecutor;
use sanfuzz_core::mutator::ByteFlipMutator;
use sanfuzz_core::oracle::CrashOracle;
use sanfuzz_core::report::{self, ScanReport};
use sanfuzz_core::reproducer::ReproducerStore;
use sanfuzz_core::scan::{ScanOptions, run_scan};

use clap::{Parser, Subcommand};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "sanfuzz.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration. Defaults to ./sanfuzz.toml when present.
    #[clap(short, long, global = true, value_parser)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Static checks, sanitizer builds and fuzzing over a directory of C sources.
    Scan {
        target: PathBuf,
        #[clap(long, default_value = "reports/report.json")]
        out: PathBuf,
        #[clap(long)]
        no_fuzz: bool,
        #[clap(short, long)]
        iterations: Option<u64>,
        /// Also render the report as HTML.
        #[clap(long)]
        html: Option<PathBuf>,
    },
    /// Fuzz an existing binary and print the crashes as JSON.
    Fuzz {
        binary: PathBuf,
        #[clap(short, long = "seed")]
        seeds: Vec<PathBuf>,
        #[clap(short, long)]
        iterations: Option<u64>,
        #[clap(long)]
        timeout_ms: Option<u64>,
        #[clap(long)]
        rng_seed: Option<u64>,
    },
    /// Render a saved JSON report as HTML.
    Report {
        json: PathBuf,
        #[clap(long, default_value = "reports/report.html")]
        out: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<SanfuzzConfig, anyhow::Error> {
    match path {
        Some(config_path) => {
            log::info!("Loading configuration from {config_path:?}");
            SanfuzzConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                log::info!("Loading default configuration {default_config_path:?}");
                SanfuzzConfig::load_from_file(default_config_path)
            } else {
                log::debug!("No {DEFAULT_CONFIG_FILE} found, using built-in defaults");
                Ok(SanfuzzConfig::default())
            }
        }
    }
}

fn make_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => {
            log::info!("Using fixed RNG seed {seed}");
            ChaCha8Rng::seed_from_u64(seed)
        }
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    log::debug!("Effective configuration: {config:#?}");

    match cli.command {
        Command::Scan {
            target,
            out,
            no_fuzz,
            iterations,
            html,
        } => {
            let options = ScanOptions {
                fuzz: !no_fuzz,
                iterations: iterations.unwrap_or(config.fuzzer.iterations),
            };
            let mut rng = make_rng(config.fuzzer.rng_seed);
            let scan = run_scan(&target, &config, &options, &mut rng)?;
            scan.write_json(&out)?;
            log::info!(
                "Report saved to {:?}: {} static findings, {} crashes",
                out,
                scan.static_findings.len(),
                scan.fuzzer_crashes.len()
            );
            if let Some(html_path) = html {
                report::write_html(&report::render_html(&scan), &html_path)?;
                log::info!("HTML report saved to {html_path:?}");
            }
        }
        Command::Fuzz {
            binary,
            seeds,
            iterations,
            timeout_ms,
            rng_seed,
        } => {
            if let Some(iterations) = iterations {
                config.fuzzer.iterations = iterations;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.fuzzer.timeout_ms = timeout_ms;
            }
            if rng_seed.is_some() {
                config.fuzzer.rng_seed = rng_seed;
            }

            let store = ReproducerStore::create(&config.reproducers.dir)?;
            let mut corpus = InMemoryCorpus::load(&seeds);
            let executor = CommandExecutor::new(
                config
                    .executor
                    .command_config(&binary, config.fuzzer.timeout()),
            );
            let mut campaign = Campaign::new(
                ByteFlipMutator::new(config.mutator.append_probability),
                executor,
                CrashOracle::with_markers(&config.oracle.crash_markers),
                store,
                config.fuzzer.iterations,
            );
            let mut rng = make_rng(config.fuzzer.rng_seed);
            let outcome = campaign.run(&mut corpus, &mut rng);
            println!("{}", serde_json::to_string_pretty(&outcome.crashes)?);
        }
        Command::Report { json, out } => {
            let scan = ScanReport::load_json(&json)?;
            report::write_html(&report::render_html(&scan), &out)?;
            log::info!("Saved HTML report to {out:?}");
        }
    }

    Ok(())
}
