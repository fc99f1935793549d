//! A `no_std` ordered map backed by a single contiguous, index-addressed allocation.
//!
//! [`Rbt`] is a red-black tree whose nodes live in one flat array instead of
//! heap-scattered allocations. Every parent/child reference is a fixed-width
//! unsigned index into that array, which makes the whole tree position
//! independent: the backing allocation is itself a byte image that can be
//! written to a file or shared memory and adopted back with
//! [`set_backing`](Rbt::set_backing). The dense slot layout also gives
//! cache-friendly O(n) unordered scans next to the usual O(log n) ordered
//! operations.
//!
//! Three index widths are available, chosen by the `W` type parameter and
//! wrapped in the [`Rbt16`], [`Rbt32`], and [`Rbt64`] aliases. The width bounds
//! both the per-node footprint and the maximum number of pairs: the all-ones
//! value of the width is reserved as the NIL sentinel, so a 16-bit tree holds
//! at most 65535 pairs.
//!
//! The tree is a single-owner container. There is no internal locking; callers
//! needing shared access wrap it in their own mutual exclusion.
//!
//! ## Examples
//!
//! ```rust
//! use flat_rbt::{Rbt16, Rbt32};
//!
//! let mut tree: Rbt32<u32, u64> = Rbt32::new();
//! tree.insert(20, 200).unwrap();
//! tree.insert(10, 100).unwrap();
//! tree.insert(30, 300).unwrap();
//!
//! assert_eq!(tree.get(&10), Some(&100));
//! assert_eq!(tree.min(), Some((&10, &100)));
//! assert_eq!(tree.ceiling(&15), Some((&20, &200)));
//!
//! let keys: Vec<u32> = tree.ordered_iter().map(|(k, _)| *k).collect();
//! assert_eq!(keys, [10, 20, 30]);
//!
//! // Rehome the same logical tree into a narrower index width.
//! let mut narrow: Rbt16<u32, u64> = Rbt16::new();
//! narrow.transform(&tree).unwrap();
//! assert_eq!(narrow.len(), 3);
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![no_std]

extern crate alloc;

mod iter;
mod node;
#[cfg(test)]
mod proptests;
mod rbt;

pub use iter::{OrderedCursor, UnorderedCursor};
pub use node::{image_size, node_size};
pub use rbt::{Rbt, Rbt16, Rbt32, Rbt64, DEFAULT_CAPACITY, REBUILD_DELETE_RATE, SPARSE_DELETE_RATE};

/// Public result type for the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Public error types for the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested capacity or live count exceeds what the index width can address.
    CapacityExceeded,
    /// The backing allocation could not be obtained.
    AllocFail,
    /// The image presented for adoption was built with a different index width.
    WidthMismatch,
    /// The predicate of a bulk delete reported failure.
    InvalidPredicate,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::CapacityExceeded => write!(f, "capacity exceeds the index width's maximum"),
            Error::AllocFail => write!(f, "backing allocation failed"),
            Error::WidthMismatch => write!(f, "image was built with a different index width"),
            Error::InvalidPredicate => write!(f, "bulk delete predicate failed"),
        }
    }
}

impl core::error::Error for Error {}

/// The bit width used for every parent/child link in a tree's backing array.
///
/// Implemented for [`u16`], [`u32`], and [`u64`]. The all-ones value of the
/// width is reserved as the NIL sentinel, so a `W`-indexed tree addresses at
/// most [`MAX_COUNT`](IndexWidth::MAX_COUNT) slots.
pub trait IndexWidth: Copy + Eq + core::fmt::Debug + 'static {
    /// Number of bits in a stored link index.
    const BITS: u32;
    /// Largest addressable live count; doubles as the NIL sentinel.
    const MAX_COUNT: u64;

    /// Narrows `index` into the stored representation.
    fn from_u64(index: u64) -> Self;
    /// Widens the stored representation back to an index.
    fn to_u64(self) -> u64;
}

impl IndexWidth for u16 {
    const BITS: u32 = u16::BITS;
    const MAX_COUNT: u64 = u16::MAX as u64;

    #[inline]
    fn from_u64(index: u64) -> Self {
        debug_assert!(index <= Self::MAX_COUNT);
        index as u16
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }
}

impl IndexWidth for u32 {
    const BITS: u32 = u32::BITS;
    const MAX_COUNT: u64 = u32::MAX as u64;

    #[inline]
    fn from_u64(index: u64) -> Self {
        debug_assert!(index <= Self::MAX_COUNT);
        index as u32
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }
}

impl IndexWidth for u64 {
    const BITS: u32 = u64::BITS;
    const MAX_COUNT: u64 = u64::MAX;

    #[inline]
    fn from_u64(index: u64) -> Self {
        index
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self
    }
}
