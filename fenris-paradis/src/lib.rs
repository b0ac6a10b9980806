//! fenris-paradis
//! ==============
//!
//! Parallel processing of disjoint index lists.
//!
//! Writing to scattered entries of a slice from several threads is sound as long as no two
//! threads ever touch the same entry. [`DisjointIndices`] is a list of indices that has been
//! verified to be pairwise distinct and bounded, which lets
//! [`DisjointIndices::par_for_each_mut`] hand out mutable references to the indexed entries from
//! a rayon parallel iterator without any synchronization.

pub mod slice;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// An indexed collection that exposes parallel indexed access to its contents.
///
/// The typical pattern for a generic parallel algorithm is to take any collection satisfying
/// this trait as input, at which point we can guarantee that we are able to create the only
/// parallel access to the collection.
///
/// # Examples
///
/// Doubling the even and the odd entries of a slice on separate rayon tasks. Creating the access
/// takes a mutable reference, so no one else can observe the slice while the access is alive.
///
/// ```rust
/// use fenris_paradis::ParallelIndexedCollection;
///
/// fn par_double_all_numbers(numbers: &mut [i32]) {
///     let n = numbers.len();
///     let access = unsafe { numbers.create_access() };
///     rayon::join(
///         || {
///             for i in (0..n).step_by(2) {
///                 unsafe { *access.get_unchecked_mut(i) *= 2 };
///             }
///         },
///         || {
///             for i in (1..n).step_by(2) {
///                 unsafe { *access.get_unchecked_mut(i) *= 2 };
///             }
///         },
///     );
/// }
///
/// let mut numbers = [0, 1, 2, 3, 4, 5, 6, 7];
/// par_double_all_numbers(&mut numbers);
/// assert_eq!(numbers, [0, 2, 4, 6, 8, 10, 12, 14]);
/// ```
///
/// # Safety
///
/// Consumers of this trait are permitted to access records with indices `[0, len)` through the
/// access. An incorrect [`len`](ParallelIndexedCollection::len) may therefore lead to
/// unsoundness.
pub unsafe trait ParallelIndexedCollection<'a> {
    type Access;

    unsafe fn create_access(&'a mut self) -> Self::Access;
    fn len(&self) -> usize;
}

/// A list of pairwise distinct indices, each strictly smaller than a fixed bound.
///
/// The order of the indices is preserved. Positions in the list (as opposed to the indices
/// themselves) are what callbacks of [`par_for_each_mut`](Self::par_for_each_mut) receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedIndices")]
pub struct DisjointIndices {
    indices: Vec<usize>,
    bound: usize,
}

// Deserialized lists are validated like any other
#[derive(Deserialize)]
struct UncheckedIndices {
    indices: Vec<usize>,
    bound: usize,
}

impl TryFrom<UncheckedIndices> for DisjointIndices {
    type Error = IndexSetError;

    fn try_from(unchecked: UncheckedIndices) -> Result<Self, Self::Error> {
        Self::try_new(unchecked.indices, unchecked.bound)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexSetError {
    OutOfBounds { index: usize, bound: usize },
    Duplicate { index: usize },
}

impl Display for IndexSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { index, bound } => {
                write!(f, "index {} is out of bounds for a set of size {}", index, bound)
            }
            Self::Duplicate { index } => write!(f, "index {} occurs more than once", index),
        }
    }
}

impl Error for IndexSetError {}

impl DisjointIndices {
    pub fn try_new(indices: Vec<usize>, bound: usize) -> Result<Self, IndexSetError> {
        let mut seen = vec![false; bound];
        for &index in &indices {
            if index >= bound {
                return Err(IndexSetError::OutOfBounds { index, bound });
            }
            if seen[index] {
                return Err(IndexSetError::Duplicate { index });
            }
            seen[index] = true;
        }
        Ok(Self { indices, bound })
    }

    /// Construct the index list without checking that the indices are distinct and bounded.
    ///
    /// # Safety
    ///
    /// Every index must be smaller than `bound`, and no index may occur twice.
    pub unsafe fn from_indices_unchecked(indices: Vec<usize>, bound: usize) -> Self {
        Self { indices, bound }
    }

    pub fn empty(bound: usize) -> Self {
        Self {
            indices: Vec::new(),
            bound,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn into_indices(self) -> Vec<usize> {
        self.indices
    }

    /// The exclusive upper bound on the indices.
    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Returns a mask of length `bound` which is `true` exactly at the listed indices.
    pub fn membership(&self) -> Vec<bool> {
        let mut mask = vec![false; self.bound];
        for &index in &self.indices {
            mask[index] = true;
        }
        mask
    }

    /// Calls `f(position, &mut data[indices[position]])` for every position in the list.
    ///
    /// # Panics
    ///
    /// Panics if `data` is shorter than the bound of the index list.
    pub fn for_each_mut<T, F>(&self, data: &mut [T], mut f: F)
    where
        F: FnMut(usize, &mut T),
    {
        assert!(data.len() >= self.bound, "Indices out of bounds for storage.");
        for (position, &index) in self.indices.iter().enumerate() {
            f(position, &mut data[index]);
        }
    }

    /// Parallel version of [`for_each_mut`](Self::for_each_mut).
    ///
    /// # Panics
    ///
    /// Panics if `data` is shorter than the bound of the index list.
    pub fn par_for_each_mut<T, F>(&self, data: &mut [T], f: F)
    where
        T: Send + Sync,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        assert!(data.len() >= self.bound, "Indices out of bounds for storage.");
        let access = unsafe { data.create_access() };
        self.indices
            .par_iter()
            .enumerate()
            .for_each(|(position, &index)| {
                // Indices are distinct and bounded, so every entry is visited by exactly one task
                let record = unsafe { access.get_unchecked_mut(index) };
                f(position, record)
            });
    }
}
