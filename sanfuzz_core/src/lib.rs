pub mod campaign;
pub mod config;
pub mod corpus;
pub mod executor;
pub mod input;
pub mod mutator;
pub mod oracle;
pub mod report;
pub mod reproducer;
pub mod sanitizer;
pub mod scan;
pub mod scheduler;
pub mod static_checks;

pub use campaign::{Campaign, CampaignError, CampaignReport, run_campaign, run_campaign_in};
pub use config::SanfuzzConfig;
pub use corpus::{Corpus, CorpusEntry, CorpusError, EntryOrigin, InMemoryCorpus};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionResult, Executor, InputDelivery,
};
pub use input::Input;
pub use mutator::{ByteFlipMutator, Mutator};
pub use oracle::{CrashOracle, Oracle};
pub use report::{ReportError, SanitizerEntry, ScanReport, render_html};
pub use reproducer::{CrashRecord, ReproducerError, ReproducerStore};
pub use sanitizer::{CompileOutcome, SanitizerCompiler};
pub use scan::{ScanError, ScanOptions, run_scan};
pub use scheduler::{RandomScheduler, Scheduler, SchedulerError};
pub use static_checks::{Finding, Rule, RuleSpec, StaticCheckError};
