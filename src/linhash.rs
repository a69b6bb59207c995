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

//! C3: the linear-hash controller. Owns the segment store plus
//! `nactive`/`nslots`/mask bookkeeping.
//!
//! A reader that observes a new mask must also observe the matching
//! `nactive` — otherwise [`crate::entry::slot_of`] can route a lookup to a
//! slot that doesn't exist yet. This crate gets that happens-before edge
//! for free from a `parking_lot::RwLock` rather than a hand-rolled pair of
//! atomics: a reader takes `.read()` before computing a slot index, a
//! grower takes `.write()` for the handful of instructions that bump
//! `nactive`/the mask and (rarely) append/pop a segment. See DESIGN.md for
//! the trade-off this makes against a fully lock-free segment table.

use crate::{
    entry::{rebuild_chain, take_chain},
    options::NITEMS_STRIPES,
    segment::SegmentStore,
    term::Term,
};

pub(crate) struct LinHashState<T: Term> {
    pub(crate) segments: SegmentStore<T>,
    pub(crate) nactive: usize,
    pub(crate) mask: usize,
    pub(crate) shrink_limit: usize,
}

impl<T: Term> LinHashState<T> {
    pub(crate) fn new() -> Self {
        let segments = SegmentStore::new();
        Self {
            nactive: crate::segment::FIRST_SEGSZ,
            mask: crate::segment::FIRST_SEGSZ - 1,
            shrink_limit: 0,
            segments,
        }
    }

    pub(crate) fn nslots(&self) -> usize {
        self.segments.nslots()
    }

    /// Recomputed after every segment alloc/free and stripe-array resize.
    pub(crate) fn recompute_shrink_limit(&mut self, nlocks: usize, centralized_counter: bool) {
        let nslots = self.nslots();
        let statistically_large_enough =
            centralized_counter || nslots >= 100 * NITEMS_STRIPES.max(nlocks.min(NITEMS_STRIPES));
        self.shrink_limit = if statistically_large_enough {
            nslots.saturating_sub(crate::segment::EXT_SEGSZ) / 2
        } else {
            0
        };
    }

    /// Advance the split point by one bucket. `from`/`to` are the two slots
    /// whose chains must be re-partitioned; caller has already locked the
    /// stripe covering both (guaranteed identical by `(m+1) mod L == 0`).
    ///
    /// Returns the `(from, to)` slot pair that was split, for the caller to
    /// pass to its stripe-counter bookkeeping.
    pub(crate) fn grow_one(&mut self) -> (usize, usize) {
        if self.nactive == self.nslots() {
            self.segments.push_segment();
        }
        let from = if self.nactive <= self.mask {
            self.nactive & (self.mask >> 1)
        } else {
            0
        };
        let to = self.nactive;
        if from == 0 {
            self.mask = 2 * self.mask + 1;
        }
        self.nactive += 1;
        self.resplit(from, to);
        (from, to)
    }

    /// Inverse of [`Self::grow_one`]: merge the top bucket's chain back
    /// into its sibling and retract `nactive` by one.
    ///
    /// `from` is computed the same way `grow_one` computed it when it split
    /// `to` out of `from` in the first place: `to & (mask >> 1)` under the
    /// *current* mask. Symmetrically with `grow_one`'s `if from == 0 { mask
    /// = 2*mask+1 }`, a `from` of zero here means `to` was the bucket that
    /// triggered the last mask doubling, so the mask must be halved back
    /// (erl_db_hash.c's `shrink()`: `if (dst_ix == 0) szm = low_szm;`).
    pub(crate) fn shrink_one(&mut self) -> (usize, usize) {
        let to = self.nactive - 1;
        let from = to & (self.mask >> 1);
        if from == 0 && self.mask > crate::segment::FIRST_SEGSZ - 1 {
            self.mask >>= 1;
        }
        self.nactive -= 1;
        self.merge_back(from, to);
        // drop the top segment once it has gone fully empty
        if self.nactive <= self.nslots() - crate::segment::EXT_SEGSZ
            && self.segments.nsegments() > 1
        {
            self.segments.pop_segment();
        }
        (from, to)
    }

    /// Re-partition the chain at `from` into `from`/`to` under the new
    /// mask, freeing any pseudo-deleted entries encountered along the way —
    /// they are unreachable by any not-yet-run iteration of this fixation
    /// cycle.
    fn resplit(&mut self, from: usize, to: usize) {
        let mask = self.mask;
        let nactive = self.nactive;
        // SAFETY: `grow_one`/`shrink_one` take `&mut LinHashState`, which the
        // caller (`Table::maybe_grow_or_shrink`) only obtains by holding
        // `linhash.write()` — exclusive against every stripe-based access.
        let (from_bucket, to_bucket) = unsafe { self.segments.bucket_pair_mut(from, to) };
        let mut nodes = take_chain(from_bucket);
        let mut keep_from = Vec::with_capacity(nodes.len());
        let mut move_to = Vec::with_capacity(nodes.len());
        for node in nodes.drain(..) {
            if node.pseudo_deleted {
                drop(node);
                continue;
            }
            let slot = crate::entry::slot_of(node.hash, mask, nactive);
            if slot == to {
                move_to.push(node);
            } else {
                keep_from.push(node);
            }
        }
        from_bucket.head = rebuild_chain(keep_from);
        to_bucket.head = rebuild_chain(move_to);
    }

    fn merge_back(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        // SAFETY: see `resplit` above.
        let (from_bucket, to_bucket) = unsafe { self.segments.bucket_pair_mut(from, to) };
        let to_nodes = take_chain(to_bucket);
        let mut merged = take_chain(from_bucket);
        for node in to_nodes {
            if !node.pseudo_deleted {
                merged.push(node);
            }
        }
        from_bucket.head = rebuild_chain(merged);
    }
}
