use crate::input::Input;
use rand::Rng;

/// Substituted for an empty input so mutation never works on a zero-length buffer.
pub const EMPTY_INPUT_PLACEHOLDER: [u8; 4] = *b"AAAA";
/// One flipped byte per this many input bytes (minimum one).
const BYTES_PER_FLIP: usize = 10;
/// Default probability that a mutation also grows the input.
pub const DEFAULT_APPEND_PROBABILITY: f64 = 0.2;
/// Upper bound (inclusive) on bytes appended in a single growth step.
const MAX_APPENDED_BYTES: usize = 7;

/// A `Mutator` derives a new `Input` from an existing one.
///
/// Implementations must never modify the seed they are given: corpus entries
/// are immutable once added, so every mutation yields a fresh buffer.
///
/// # Type Parameters
/// * `I`: The type of `Input` this mutator operates on.
/// * `R`: The random number generator driving mutation decisions.
pub trait Mutator<I: Input, R: Rng + ?Sized> {
    /// Produces a mutated copy of `input`. Mutation cannot fail.
    fn mutate(&mut self, input: &I, rng: &mut R) -> I;
}

/// Randomized byte corruption with occasional growth.
///
/// * Flips `max(1, len / 10)` bytes, each to a uniformly random value in `1..=254`
///   so corruptions never degrade into plain null bytes.
/// * With probability `append_probability`, appends 1 to 7 random bytes.
///
/// The output is never shorter than the input.
#[derive(Debug, Clone, Copy)]
pub struct ByteFlipMutator {
    append_probability: f64,
}

impl ByteFlipMutator {
    /// Creates a mutator with a custom growth probability. Values outside
    /// `0.0..=1.0` fall back to [`DEFAULT_APPEND_PROBABILITY`].
    pub fn new(append_probability: f64) -> Self {
        let append_probability = if (0.0..=1.0).contains(&append_probability) {
            append_probability
        } else {
            DEFAULT_APPEND_PROBABILITY
        };
        Self { append_probability }
    }

    pub fn append_probability(&self) -> f64 {
        self.append_probability
    }
}

impl Default for ByteFlipMutator {
    fn default() -> Self {
        Self::new(DEFAULT_APPEND_PROBABILITY)
    }
}

impl<I, R> Mutator<I, R> for ByteFlipMutator
where
    I: Input + From<Vec<u8>>,
    R: Rng + ?Sized,
{
    fn mutate(&mut self, input: &I, rng: &mut R) -> I {
        let mut bytes = if input.is_empty() {
            EMPTY_INPUT_PLACEHOLDER.to_vec()
        } else {
            input.as_bytes().to_vec()
        };

        let flips = (bytes.len() / BYTES_PER_FLIP).max(1);
        for _ in 0..flips {
            let index = rng.random_range(0..bytes.len());
            bytes[index] = rng.random_range(1u8..=254u8);
        }

        if rng.random_bool(self.append_probability) {
            let extra = rng.random_range(1..=MAX_APPENDED_BYTES);
            bytes.extend((0..extra).map(|_| rng.random_range(0u8..=254u8)));
        }

        I::from(bytes)
    }
}
