/*
 * lhtab
 *
 * A concurrent, in-memory linear-hash associative table supporting
 * set, bag and duplicate-bag semantics over opaque structured terms.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! C1: the two-level bucket array. Segment sizing and addressing follow
//! `erl_db_hash.c`'s `FIRST_SEGSZ`/`EXT_SEGSZ`/`SLOT_IX_TO_SEG_IX`: fixed
//! constants rather than tunables, since both sizes are powers of two and
//! the two-level split keeps a grow/shrink from ever needing to reallocate
//! or move an existing segment.
//!
//! Bucket storage sits behind `UnsafeCell` rather than behind `&mut self`
//! borrows, the same way `erl_db_hash.c` reaches a bucket through a raw
//! pointer and leaves mutual exclusion to the caller's stripe lock rather
//! than to the storage type. [`SegmentStore::bucket`]/[`SegmentStore::bucket_mut`]
//! are `unsafe`: the caller must already hold whatever lock makes the
//! access exclusive (see `Table::with_stripe` in `table.rs`), because a
//! `&SegmentStore` receiver gives the type system nothing to check that
//! against.

use crate::{entry::Bucket, term::Term};
use std::cell::UnsafeCell;

/// buckets in the first segment
pub(crate) const FIRST_SEGSZ: usize = 256;
/// buckets in every subsequent segment
pub(crate) const EXT_SEGSZ: usize = 2048;

const EXT_SEGSZ_SHIFT: u32 = EXT_SEGSZ.trailing_zeros();
const EXT_SEGSZ_MASK: usize = EXT_SEGSZ - 1;

/// A fixed-size contiguous array of buckets.
pub(crate) struct Segment<T: Term> {
    buckets: Box<[UnsafeCell<Bucket<T>>]>,
}

// SAFETY: every `UnsafeCell<Bucket<T>>` in `buckets` is reached only
// through `SegmentStore::bucket`/`bucket_mut`/`bucket_pair_mut`, whose own
// safety contract requires the caller to hold a lock (a stripe lock for
// ordinary access, or the table-wide `linhash` write lock for a structural
// grow/shrink step, which excludes every stripe access by construction)
// that makes the access exclusive with respect to any other thread
// touching the same slot. `Segment` itself never reasons about which lock
// that is.
unsafe impl<T: Term> Sync for Segment<T> {}

impl<T: Term> Segment<T> {
    fn with_size(size: usize) -> Self {
        let mut v = Vec::with_capacity(size);
        v.resize_with(size, || UnsafeCell::new(Bucket::new()));
        Self {
            buckets: v.into_boxed_slice(),
        }
    }

    fn first() -> Self {
        Self::with_size(FIRST_SEGSZ)
    }

    fn extra() -> Self {
        Self::with_size(EXT_SEGSZ)
    }
}

/// `seg_ix = (s + (EXT_SEGSZ - FIRST_SEGSZ)) >> log2(EXT_SEGSZ)`.
pub(crate) const fn seg_ix(slot: usize) -> usize {
    (slot + (EXT_SEGSZ - FIRST_SEGSZ)) >> EXT_SEGSZ_SHIFT
}

/// Intra-segment index; degenerates to `slot` itself inside the first
/// segment since `slot < FIRST_SEGSZ < EXT_SEGSZ` there.
pub(crate) const fn intra_ix(slot: usize) -> usize {
    slot & EXT_SEGSZ_MASK
}

/// The ordered sequence of segment pointers. Segments are appended on
/// growth and only the last one is ever removed (on shrink, once it is
/// fully empty).
pub(crate) struct SegmentStore<T: Term> {
    segments: Vec<Box<Segment<T>>>,
}

impl<T: Term> SegmentStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            segments: vec![Box::new(Segment::first())],
        }
    }

    pub(crate) fn nslots(&self) -> usize {
        if self.segments.is_empty() {
            0
        } else {
            FIRST_SEGSZ + (self.segments.len() - 1) * EXT_SEGSZ
        }
    }

    pub(crate) fn nsegments(&self) -> usize {
        self.segments.len()
    }

    /// Append one fresh, fully-empty extra segment.
    pub(crate) fn push_segment(&mut self) {
        self.segments.push(Box::new(Segment::extra()));
    }

    /// Drop the topmost segment. Caller must have already verified it is
    /// empty (all buckets unlinked).
    pub(crate) fn pop_segment(&mut self) {
        assert!(self.segments.len() > 1, "refuse to drop the first segment");
        self.segments.pop();
    }

    /// # Safety
    /// The caller must hold at least shared access to slot `slot` (the read
    /// side of the stripe lock covering it, per `Table::with_stripe`), so
    /// no concurrent writer is unlinking nodes from this chain.
    #[inline]
    pub(crate) unsafe fn bucket(&self, slot: usize) -> &Bucket<T> {
        &*self.segments[seg_ix(slot)].buckets[intra_ix(slot)].get()
    }

    /// # Safety
    /// The caller must hold exclusive access to slot `slot` (the write
    /// side of the stripe lock covering it, or the table-wide `linhash`
    /// write lock during a grow/shrink structural step).
    #[inline]
    pub(crate) unsafe fn bucket_mut(&self, slot: usize) -> &mut Bucket<T> {
        &mut *self.segments[seg_ix(slot)].buckets[intra_ix(slot)].get()
    }

    /// Reach a bucket's two raw slots as independent mutable borrows; used
    /// by grow/shrink, which must touch `from` and `to` simultaneously.
    ///
    /// # Safety
    /// The caller must hold the table-wide `linhash` write lock: unlike
    /// ordinary single-slot mutation, a resplit/merge step touches two
    /// slots that may fall under two different stripes, so no single
    /// stripe lock covers both.
    pub(crate) unsafe fn bucket_pair_mut(&self, a: usize, b: usize) -> (&mut Bucket<T>, &mut Bucket<T>) {
        assert_ne!(a, b);
        let pa = self.segments[seg_ix(a)].buckets[intra_ix(a)].get();
        let pb = self.segments[seg_ix(b)].buckets[intra_ix(b)].get();
        (&mut *pa, &mut *pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing_covers_whole_segment() {
        // every slot in segment 1 (the first extra segment) must map to a
        // distinct intra index in 0..EXT_SEGSZ
        let mut seen = vec![false; EXT_SEGSZ];
        for slot in FIRST_SEGSZ..FIRST_SEGSZ + EXT_SEGSZ {
            assert_eq!(seg_ix(slot), 1);
            let ix = intra_ix(slot);
            assert!(!seen[ix], "duplicate intra index {ix} for slot {slot}");
            seen[ix] = true;
        }
        assert!(seen.iter().all(|&b| b));
    }

    #[test]
    fn first_segment_boundary() {
        assert_eq!(seg_ix(0), 0);
        assert_eq!(seg_ix(FIRST_SEGSZ - 1), 0);
        assert_eq!(seg_ix(FIRST_SEGSZ), 1);
    }
}
