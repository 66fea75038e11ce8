use crate::input::Input;
use rand::Rng;
use rand_core::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Injected when no seed could be loaded, so sampling is never undefined.
pub const FALLBACK_SEED: &[u8] = b"AAAA";

/// Errors that can arise during corpus operations.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// An operation could not be performed because the corpus is empty.
    #[error("Corpus is empty, cannot select an input")]
    CorpusIsEmpty,
}

/// Where a corpus entry came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Read from a seed file on disk.
    Seed(PathBuf),
    /// The built-in fallback seed.
    Fallback,
    /// A mutated input that was classified as a crash; the path is its reproducer.
    Crash(PathBuf),
    /// Added programmatically without further provenance.
    Manual,
}

/// A corpus entry. Entries are immutable once added.
#[derive(Debug, Clone)]
pub struct CorpusEntry<I: Input> {
    pub input: I,
    pub origin: EntryOrigin,
}

/// The working set of inputs available for mutation during a campaign.
///
/// A corpus is append-only: entries are never removed or modified, so its size is
/// monotonically non-decreasing and IDs handed out by [`Corpus::add`] stay valid.
pub trait Corpus<I: Input> {
    /// Appends an input and returns its ID (its position in insertion order).
    fn add(&mut self, input: I, origin: EntryOrigin) -> usize;

    /// Looks up an entry by the ID [`Corpus::add`] returned.
    ///
    /// # Returns
    /// `None` if no entry with this ID exists.
    fn get(&self, id: usize) -> Option<&CorpusEntry<I>>;

    /// Selects an entry uniformly at random, with replacement.
    /// Returns `None` only when the corpus is empty.
    fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &I)>;

    /// Number of entries currently in the corpus.
    fn len(&self) -> usize;

    /// Returns `true` if the corpus has no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory, `Vec`-backed corpus.
#[derive(Debug, Clone)]
pub struct InMemoryCorpus<I: Input> {
    entries: Vec<CorpusEntry<I>>,
}

impl<I: Input> InMemoryCorpus<I> {
    /// Creates a new, empty `InMemoryCorpus`.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<I: Input> Default for InMemoryCorpus<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Input + From<Vec<u8>>> InMemoryCorpus<I> {
    /// Builds a corpus from seed files.
    ///
    /// Every path is read as raw bytes. Unreadable paths are logged and skipped; a
    /// campaign has to tolerate partially missing seeds. If nothing loads, the corpus
    /// is seeded with [`FALLBACK_SEED`], so the result is never empty.
    pub fn load<P: AsRef<Path>>(seed_paths: &[P]) -> Self {
        let mut corpus = Self::new();
        for path in seed_paths {
            let path = path.as_ref();
            match fs::read(path) {
                Ok(bytes) => {
                    log::debug!("Loaded seed {:?} ({} bytes)", path, bytes.len());
                    corpus.add(I::from(bytes), EntryOrigin::Seed(path.to_path_buf()));
                }
                Err(e) => {
                    log::warn!("Skipping unreadable seed {:?}: {}", path, e);
                }
            }
        }
        if corpus.is_empty() {
            log::info!("No seeds loaded, using fallback seed {:?}", FALLBACK_SEED);
            corpus.add(I::from(FALLBACK_SEED.to_vec()), EntryOrigin::Fallback);
        }
        corpus
    }

    /// Uniform random pick with replacement, cloned out of the corpus.
    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<I, CorpusError> {
        self.random_select(rng)
            .map(|(_, input)| input.clone())
            .ok_or(CorpusError::CorpusIsEmpty)
    }

    /// Adds a crash-inducing input so later samples can build on it.
    ///
    /// # Arguments
    /// * `input`: The input that was classified as a crash.
    /// * `reproducer`: Path of its persisted reproducer, or `None` if persisting failed.
    ///
    /// # Returns
    /// The ID of the new entry.
    pub fn extend(&mut self, input: I, reproducer: Option<PathBuf>) -> usize {
        let origin = match reproducer {
            Some(path) => EntryOrigin::Crash(path),
            None => EntryOrigin::Manual,
        };
        self.add(input, origin)
    }
}

impl<I: Input> Corpus<I> for InMemoryCorpus<I> {
    fn add(&mut self, input: I, origin: EntryOrigin) -> usize {
        let id = self.entries.len();
        self.entries.push(CorpusEntry { input, origin });
        id
    }

    fn get(&self, id: usize) -> Option<&CorpusEntry<I>> {
        self.entries.get(id)
    }

    fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &I)> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.entries.len());
        self.entries.get(index).map(|entry| (index, &entry.input))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
