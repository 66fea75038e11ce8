use crate::executor::ExecutionResult;
use crate::input::Input;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default directory for reproducer pairs, relative to the working directory.
pub const DEFAULT_REPRODUCER_DIR: &str = "reproducers";
const INPUT_EXTENSION: &str = "bin";
const LOG_EXTENSION: &str = "log";
/// How many suffixed names are tried when several crashes share a millisecond.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

#[derive(Error, Debug)]
pub enum ReproducerError {
    #[error("Failed to create reproducer directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Reproducer path {0:?} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("Failed to write reproducer file {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("No free reproducer name for id {0}")]
    NamesExhausted(i64),

    #[error("Failed to read reproducer log {path:?}: {source}")]
    ReadLog { path: PathBuf, source: io::Error },

    #[error("Reproducer log {0:?} has no return code line")]
    MalformedLog(PathBuf),
}

/// A persisted crash. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecord {
    /// The crashing input, `crash_<id>.bin`.
    #[serde(rename = "input")]
    pub input_path: PathBuf,
    /// Return code and captured streams, `crash_<id>.log`.
    #[serde(rename = "log")]
    pub log_path: PathBuf,
    #[serde(rename = "rc")]
    pub return_code: i32,
    /// MD5 of the input bytes.
    #[serde(default)]
    pub input_hash: String,
}

/// Writes crash reproducers as write-once `crash_<id>.bin` / `crash_<id>.log` pairs.
///
/// The identifier is the wall-clock time in milliseconds. Names are claimed with
/// create-new semantics; when two crashes land in the same millisecond the later one
/// becomes `crash_<id>_<n>`. Existing reproducers are never overwritten.
#[derive(Debug, Clone)]
pub struct ReproducerStore {
    dir: PathBuf,
}

impl ReproducerStore {
    /// Opens the store, creating `dir` (and parents) if needed.
    ///
    /// Failing here is the only caller-visible setup error of a campaign.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, ReproducerError> {
        let dir = dir.into();
        if dir.exists() {
            if !dir.is_dir() {
                return Err(ReproducerError::NotADirectory(dir));
            }
        } else {
            fs::create_dir_all(&dir).map_err(|source| ReproducerError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(Self { dir })
    }

    /// Directory the reproducer pairs are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists `input` and the diagnostic log for `result`.
    ///
    /// # Arguments
    /// * `input`: The crashing input, written verbatim to `<stem>.bin`.
    /// * `result`: The execution outcome, rendered into `<stem>.log`.
    ///
    /// # Returns
    /// The record describing both files, or an error if either could not be
    /// written. A failed log write leaves no partial pair behind.
    pub fn persist<I: Input>(
        &self,
        input: &I,
        result: &ExecutionResult,
    ) -> Result<CrashRecord, ReproducerError> {
        let id = chrono::Utc::now().timestamp_millis();
        let (stem, mut input_file) = self.claim_stem(id)?;
        let input_path = self.dir.join(format!("{stem}.{INPUT_EXTENSION}"));
        let log_path = self.dir.join(format!("{stem}.{LOG_EXTENSION}"));

        if let Err(source) = input_file.write_all(input.as_bytes()) {
            drop(input_file);
            discard(&input_path);
            return Err(ReproducerError::Write {
                path: input_path,
                source,
            });
        }
        drop(input_file);

        if let Err(source) = Self::write_new(&log_path, render_log(result).as_bytes()) {
            discard(&input_path);
            return Err(ReproducerError::Write {
                path: log_path,
                source,
            });
        }

        Ok(CrashRecord {
            input_path,
            log_path,
            return_code: result.return_code,
            input_hash: input.digest_hex(),
        })
    }

    /// Creates `path` exclusively and writes `bytes`; an existing file is an error.
    fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?
            .write_all(bytes)
    }

    /// Atomically reserves an input file name for `id`, returning its stem.
    ///
    /// A stem is only handed out when neither of its files exists yet.
    fn claim_stem(&self, id: i64) -> Result<(String, File), ReproducerError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stem = if attempt == 0 {
                format!("crash_{id}")
            } else {
                format!("crash_{id}_{attempt}")
            };
            if self.dir.join(format!("{stem}.{LOG_EXTENSION}")).exists() {
                continue;
            }
            let path = self.dir.join(format!("{stem}.{INPUT_EXTENSION}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((stem, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ReproducerError::Write { path, source }),
            }
        }
        Err(ReproducerError::NamesExhausted(id))
    }
}

/// Removes the input half of a pair whose other half could not be written.
fn discard(input_path: &Path) {
    if let Err(e) = fs::remove_file(input_path) {
        log::warn!("Failed to remove orphaned reproducer {:?}: {}", input_path, e);
    }
}

/// Fixed plain-text layout: return code, then labeled stdout and stderr sections.
pub fn render_log(result: &ExecutionResult) -> String {
    format!(
        "rc: {}\nstdout:\n{}\nstderr:\n{}\n",
        result.return_code, result.stdout, result.stderr
    )
}

/// Reads a reproducer log back as text.
pub fn read_log(path: &Path) -> Result<String, ReproducerError> {
    let bytes = fs::read(path).map_err(|source| ReproducerError::ReadLog {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Extracts the return code recorded in a reproducer log.
pub fn read_logged_return_code(path: &Path) -> Result<i32, ReproducerError> {
    read_log(path)?
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("rc: "))
        .and_then(|code| code.trim().parse().ok())
        .ok_or_else(|| ReproducerError::MalformedLog(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn crash_result(return_code: i32) -> ExecutionResult {
        ExecutionResult {
            return_code,
            stdout: "partial output".to_string(),
            stderr: "==42==ERROR: AddressSanitizer: heap-buffer-overflow".to_string(),
            timed_out: false,
        }
    }

    #[test]
    fn create_makes_missing_directories() {
        let base = tempdir().unwrap();
        let dir = base.path().join("nested").join("reproducers");
        assert!(!dir.exists());
        let store = ReproducerStore::create(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(store.dir(), dir.as_path());
    }

    #[test]
    fn create_rejects_a_regular_file() {
        let base = tempdir().unwrap();
        let file_path = base.path().join("not_a_dir");
        fs::write(&file_path, b"x").unwrap();
        match ReproducerStore::create(&file_path) {
            Err(ReproducerError::NotADirectory(p)) => assert_eq!(p, file_path),
            other => panic!("Expected NotADirectory, got {other:?}"),
        }
    }

    #[test]
    fn persist_writes_matching_pair() {
        let base = tempdir().unwrap();
        let store = ReproducerStore::create(base.path()).unwrap();
        let input: Vec<u8> = vec![0x41, 0x00, 0xFE];

        let record = store.persist(&input, &crash_result(-6)).unwrap();

        assert_eq!(fs::read(&record.input_path).unwrap(), input);
        assert_eq!(record.return_code, -6);
        assert_eq!(record.input_hash, input.digest_hex());
        assert_eq!(
            record.input_path.file_stem(),
            record.log_path.file_stem(),
            "input and log share an identifier"
        );
        let stem = record.input_path.file_stem().unwrap().to_string_lossy();
        assert!(stem.starts_with("crash_"));
        assert_eq!(record.input_path.extension().unwrap(), "bin");
        assert_eq!(record.log_path.extension().unwrap(), "log");

        let log = read_log(&record.log_path).unwrap();
        assert_eq!(
            log,
            "rc: -6\nstdout:\npartial output\nstderr:\n\
             ==42==ERROR: AddressSanitizer: heap-buffer-overflow\n"
        );
    }

    #[test]
    fn sequential_persists_never_collide() {
        let base = tempdir().unwrap();
        let store = ReproducerStore::create(base.path()).unwrap();

        let first = store.persist(&b"first".to_vec(), &crash_result(1)).unwrap();
        let second = store.persist(&b"second".to_vec(), &crash_result(2)).unwrap();

        assert_ne!(first.input_path, second.input_path);
        assert_ne!(first.log_path, second.log_path);
        assert_eq!(fs::read(&first.input_path).unwrap(), b"first");
        assert_eq!(fs::read(&second.input_path).unwrap(), b"second");
        assert_eq!(read_logged_return_code(&first.log_path).unwrap(), 1);
        assert_eq!(read_logged_return_code(&second.log_path).unwrap(), 2);
    }

    #[test]
    fn same_millisecond_gets_a_suffixed_name() {
        let base = tempdir().unwrap();
        let store = ReproducerStore::create(base.path()).unwrap();

        let (stem_a, _file_a) = store.claim_stem(1_700_000_000_000).unwrap();
        let (stem_b, _file_b) = store.claim_stem(1_700_000_000_000).unwrap();
        assert_eq!(stem_a, "crash_1700000000000");
        assert_eq!(stem_b, "crash_1700000000000_1");
    }

    #[test]
    fn stale_log_without_input_is_never_overwritten() {
        let base = tempdir().unwrap();
        let store = ReproducerStore::create(base.path()).unwrap();
        let stale = base.path().join("crash_1700000000000.log");
        fs::write(&stale, "rc: 9\n").unwrap();

        let (stem, _file) = store.claim_stem(1_700_000_000_000).unwrap();
        assert_eq!(stem, "crash_1700000000000_1");
        assert_eq!(fs::read_to_string(&stale).unwrap(), "rc: 9\n");
    }

    #[test]
    fn write_new_refuses_existing_files() {
        let base = tempdir().unwrap();
        let path = base.path().join("crash_1.log");
        fs::write(&path, "original").unwrap();

        let err = ReproducerStore::write_new(&path, b"replacement").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn discard_removes_the_orphaned_input() {
        let base = tempdir().unwrap();
        let store = ReproducerStore::create(base.path()).unwrap();
        let (stem, _file) = store.claim_stem(42).unwrap();
        let input_path = base.path().join(format!("{stem}.bin"));
        assert!(input_path.exists());

        discard(&input_path);
        assert!(!input_path.exists());
        // The freed name is handed out again.
        assert_eq!(store.claim_stem(42).unwrap().0, stem);
    }

    #[test]
    fn malformed_log_is_reported() {
        let base = tempdir().unwrap();
        let log_path = base.path().join("crash_1.log");
        fs::write(&log_path, "garbage\n").unwrap();
        assert!(matches!(
            read_logged_return_code(&log_path),
            Err(ReproducerError::MalformedLog(_))
        ));
    }

    #[test]
    fn crash_record_serializes_with_report_keys() {
        let record = CrashRecord {
            input_path: PathBuf::from("reproducers/crash_1.bin"),
            log_path: PathBuf::from("reproducers/crash_1.log"),
            return_code: 1,
            input_hash: "abc".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["input"], "reproducers/crash_1.bin");
        assert_eq!(json["log"], "reproducers/crash_1.log");
        assert_eq!(json["rc"], 1);
        assert_eq!(json["input_hash"], "abc");
    }
}
