use crate::config::{SanitizerSettings, default_target_env};
use crate::executor::{CommandExecutor, CommandExecutorConfig, ExecutionResult, Executor};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Reported in stderr when the compiler itself could not be started.
pub const COMPILER_NOT_FOUND_MARKER: &str = "COMPILER_NOT_FOUND";

/// Result of one compiler invocation. A zero `return_code` means `binary_path`
/// is ready to fuzz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub binary_path: PathBuf,
}

impl CompileOutcome {
    /// Returns `true` if the compiler exited with code 0.
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }
}

/// Builds C sources with memory and undefined-behavior sanitizers enabled.
#[derive(Debug, Clone)]
pub struct SanitizerCompiler {
    compiler: String,
    flags: Vec<String>,
    build_dir: PathBuf,
    smoke_timeout: Duration,
    run_env: BTreeMap<String, String>,
}

impl SanitizerCompiler {
    /// Builds a compiler from configuration. Smoke runs get the default
    /// sanitizer environment until [`SanitizerCompiler::with_run_env`] replaces it.
    pub fn new(settings: &SanitizerSettings) -> Self {
        Self {
            compiler: settings.compiler.clone(),
            flags: settings.flags.clone(),
            build_dir: settings.build_dir.clone(),
            smoke_timeout: Duration::from_millis(settings.smoke_timeout_ms),
            run_env: default_target_env(),
        }
    }

    /// Environment given to binaries started by [`SanitizerCompiler::smoke_run`].
    pub fn with_run_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.run_env = env;
        self
    }

    /// `<compiler> <flags…> <source> -o <build-dir>/<out_name>`, without a shell.
    pub fn command_line(&self, source: &Path, out_name: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(self.flags.len() + 4);
        args.push(self.compiler.clone());
        args.extend(self.flags.iter().cloned());
        args.push(source.to_string_lossy().into_owned());
        args.push("-o".to_string());
        args.push(self.build_dir.join(out_name).to_string_lossy().into_owned());
        args
    }

    /// Compiles `source` into `<build-dir>/<out_name>`.
    ///
    /// Never fails: a missing build directory or compiler is reported through a
    /// non-zero return code and a marker in `stderr`.
    pub fn compile(&self, source: &Path, out_name: &str) -> CompileOutcome {
        let binary_path = self.build_dir.join(out_name);
        let failed = |stderr: String| CompileOutcome {
            return_code: -1,
            stdout: String::new(),
            stderr,
            binary_path: binary_path.clone(),
        };

        if let Err(e) = fs::create_dir_all(&self.build_dir) {
            return failed(format!(
                "failed to create build directory {:?}: {e}",
                self.build_dir
            ));
        }

        let argv = self.command_line(source, out_name);
        log::debug!("Compiling: {}", argv.join(" "));
        match Command::new(&argv[0]).args(&argv[1..]).output() {
            Ok(output) => CompileOutcome {
                return_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                binary_path,
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("Compiler {:?} not found", self.compiler);
                failed(COMPILER_NOT_FOUND_MARKER.to_string())
            }
            Err(e) => failed(format!("failed to run compiler {:?}: {e}", self.compiler)),
        }
    }

    /// Runs a freshly built binary once with empty input.
    pub fn smoke_run(&self, binary: &Path) -> ExecutionResult {
        let mut config = CommandExecutorConfig::for_binary(binary, self.smoke_timeout);
        config.envs = self.run_env.clone();
        let mut executor = CommandExecutor::new(config);
        executor.execute(&Vec::new())
    }
}
