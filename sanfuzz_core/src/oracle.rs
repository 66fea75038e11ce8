use crate::executor::ExecutionResult;

/// Substrings whose case-insensitive presence in stderr marks a crash.
pub const DEFAULT_CRASH_MARKERS: [&str; 3] = ["error", "segmentation", "asan"];

/// An `Oracle` decides whether an execution outcome is a reportable crash.
pub trait Oracle: Send + Sync {
    /// Returns `true` if `result` should be persisted as a crash.
    fn is_crash(&self, result: &ExecutionResult) -> bool;
}

/// Textual crash heuristic.
///
/// A result is a crash iff its return code is non-zero, or its stderr contains any
/// of the configured markers (case-insensitively). Timeouts and missing binaries
/// carry return code -1 and therefore always classify as crashes.
///
/// This is not a parse of sanitizer output. Benign stderr containing "error" is a
/// false positive and sanitizer messages phrased differently are false negatives.
/// The marker list is configurable for that reason.
#[derive(Debug, Clone)]
pub struct CrashOracle {
    /// Lowercased markers.
    markers: Vec<String>,
}

impl CrashOracle {
    /// An oracle using [`DEFAULT_CRASH_MARKERS`].
    pub fn new() -> Self {
        Self::with_markers(DEFAULT_CRASH_MARKERS)
    }

    /// An empty marker list reduces the oracle to a pure exit-code check.
    pub fn with_markers<S: AsRef<str>>(markers: impl IntoIterator<Item = S>) -> Self {
        let markers = markers
            .into_iter()
            .map(|m| m.as_ref().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// The active markers, lowercased.
    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for CrashOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl Oracle for CrashOracle {
    fn is_crash(&self, result: &ExecutionResult) -> bool {
        if result.return_code != 0 {
            return true;
        }
        if self.markers.is_empty() {
            return false;
        }
        let stderr = result.stderr.to_lowercase();
        self.markers.iter().any(|marker| stderr.contains(marker.as_str()))
    }
}
