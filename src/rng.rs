//! Random number sources for augmentation and shuffling.
//!
//! All randomness is drawn from explicit generator objects which are passed
//! to the code that needs them, so that a fixed seed reproduces the same
//! sequence of batches.

use std::ops::{Range, RangeInclusive};

/// Source of uniformly distributed random values.
///
/// This is implemented for [`fastrand::Rng`]. Tests can provide their own
/// implementation to force specific draws.
pub trait UniformSource {
    /// Return a value drawn uniformly from the half-open range `[start, end)`.
    fn uniform_f32(&mut self, range: Range<f32>) -> f32;

    /// Return a value drawn uniformly from the closed range `[start, end]`.
    fn uniform_usize(&mut self, range: RangeInclusive<usize>) -> usize;
}

impl UniformSource for fastrand::Rng {
    fn uniform_f32(&mut self, range: Range<f32>) -> f32 {
        let value = range.start + self.f32() * (range.end - range.start);

        // Rounding in the line above can produce `range.end` when the draw is
        // very close to 1.
        if value >= range.end {
            range.start
        } else {
            value
        }
    }

    fn uniform_usize(&mut self, range: RangeInclusive<usize>) -> usize {
        self.usize(range)
    }
}

/// Create a generator from an optional seed.
///
/// If `seed` is `None` the generator is seeded from entropy.
pub fn seeded_rng(seed: Option<u64>) -> fastrand::Rng {
    match seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    }
}

/// An ordering of the samples in a dataset.
///
/// A single permutation decides which sample each position in a batch is
/// filled from. The target image, source frames, their semantic masks and
/// the intrinsics of a sample are all looked up using the same index, so the
/// streams cannot drift out of alignment.
#[derive(Clone, Debug, PartialEq)]
pub struct Permutation {
    indices: Vec<usize>,
}

impl Permutation {
    /// Return the identity ordering `0..len`.
    pub fn identity(len: usize) -> Permutation {
        Permutation {
            indices: (0..len).collect(),
        }
    }

    /// Return a random ordering of `0..len`.
    pub fn shuffled(len: usize, rng: &mut fastrand::Rng) -> Permutation {
        let mut perm = Self::identity(len);
        rng.shuffle(&mut perm.indices);
        perm
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Return the sample indices in order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Return the sample index at a position in the ordering.
    pub fn get(&self, position: usize) -> Option<usize> {
        self.indices.get(position).copied()
    }
}
