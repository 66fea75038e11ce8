use crate::executor::{CommandExecutorConfig, InputDelivery};
use crate::mutator::DEFAULT_APPEND_PROBABILITY;
use crate::oracle::DEFAULT_CRASH_MARKERS;
use crate::reproducer::DEFAULT_REPRODUCER_DIR;
use crate::static_checks::RuleSpec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

impl From<ConfigInputDelivery> for InputDelivery {
    fn from(delivery: ConfigInputDelivery) -> Self {
        match delivery {
            ConfigInputDelivery::StdIn => InputDelivery::StdIn,
            ConfigInputDelivery::File { template } => InputDelivery::File(template),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Fixed seed for reproducible campaigns. Unset means a fresh random seed.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

pub fn default_iterations() -> u64 {
    200
}

fn default_timeout_ms() -> u64 {
    3000
}

impl FuzzerSettings {
    /// Per-execution time budget.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            timeout_ms: default_timeout_ms(),
            rng_seed: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    /// Environment passed to the target process only.
    #[serde(default = "default_target_env")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

pub fn default_target_env() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "ASAN_OPTIONS".to_string(),
        "detect_leaks=1:abort_on_error=1".to_string(),
    )])
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            input_delivery: ConfigInputDelivery::default(),
            env: default_target_env(),
            working_dir: None,
        }
    }
}

impl ExecutorSettings {
    /// Builds the executor configuration for `binary` with the given time budget.
    pub fn command_config(&self, binary: &Path, timeout: Duration) -> CommandExecutorConfig {
        CommandExecutorConfig {
            command: vec![binary.to_string_lossy().into_owned()],
            input_delivery: self.input_delivery.clone().into(),
            timeout,
            envs: self.env.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OracleSettings {
    #[serde(default = "default_crash_markers")]
    pub crash_markers: Vec<String>,
}

fn default_crash_markers() -> Vec<String> {
    DEFAULT_CRASH_MARKERS.iter().map(|m| m.to_string()).collect()
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            crash_markers: default_crash_markers(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MutatorSettings {
    #[serde(default = "default_append_probability")]
    pub append_probability: f64,
}

fn default_append_probability() -> f64 {
    DEFAULT_APPEND_PROBABILITY
}

impl Default for MutatorSettings {
    fn default() -> Self {
        Self {
            append_probability: default_append_probability(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ReproducerSettings {
    #[serde(default = "default_reproducer_dir")]
    pub dir: PathBuf,
}

pub fn default_reproducer_dir() -> PathBuf {
    PathBuf::from(DEFAULT_REPRODUCER_DIR)
}

impl Default for ReproducerSettings {
    fn default() -> Self {
        Self {
            dir: default_reproducer_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SanitizerSettings {
    #[serde(default = "default_compiler")]
    pub compiler: String,
    #[serde(default = "default_sanitizer_flags")]
    pub flags: Vec<String>,
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    #[serde(default = "default_smoke_timeout_ms")]
    pub smoke_timeout_ms: u64,
}

fn default_compiler() -> String {
    "gcc".to_string()
}

pub fn default_sanitizer_flags() -> Vec<String> {
    ["-fsanitize=address,undefined", "-fno-omit-frame-pointer", "-g", "-O1"]
        .iter()
        .map(|f| f.to_string())
        .collect()
}

pub fn default_build_dir() -> PathBuf {
    PathBuf::from(".sanfuzz_build")
}

fn default_smoke_timeout_ms() -> u64 {
    5000
}

impl Default for SanitizerSettings {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            flags: default_sanitizer_flags(),
            build_dir: default_build_dir(),
            smoke_timeout_ms: default_smoke_timeout_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct StaticCheckSettings {
    /// Rules appended to the built-in set.
    #[serde(default)]
    pub extra_rules: Vec<RuleSpec>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SanfuzzConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub oracle: OracleSettings,
    #[serde(default)]
    pub mutator: MutatorSettings,
    #[serde(default)]
    pub reproducers: ReproducerSettings,
    #[serde(default)]
    pub sanitizer: SanitizerSettings,
    #[serde(default)]
    pub static_checks: StaticCheckSettings,
}

impl SanfuzzConfig {
    /// Loads and parses a TOML configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid configuration.
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
