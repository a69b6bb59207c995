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

//! C5: fixation and pseudo-deletion.
//!
//! The deferred-deletion log records buckets that gained a pseudo-deletion
//! while the table was fixed, so `unfix`'s reclamation sweep knows which
//! buckets to revisit without rescanning the whole key space. This crate's
//! bucket chains are already guarded by stripe `RwLock`s rather than being
//! lock-free, so the log follows suit: a small
//! `parking_lot::Mutex<VecDeque<_>>` rather than a lock-free singly linked
//! stack with CAS insertion. A push happens while the pusher already holds
//! the relevant stripe's write lock (during an erase under fixation), so the
//! mutex here is never contended by the hot path, only by `unfix`'s
//! reclamation sweep — the same trade-off `linhash` documents for the
//! segment table.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// One bucket index with a pending unlink, or a single bulk "every bucket"
/// record left by `delete_all_objects` while fixed.
#[derive(Clone, Copy, Debug)]
pub(crate) enum DlogEntry {
    Bucket(usize),
    AllBuckets,
}

pub(crate) struct Fixation {
    count: AtomicUsize,
    dlog: Mutex<VecDeque<DlogEntry>>,
    reclaiming: AtomicBool,
}

impl Fixation {
    pub(crate) fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            dlog: Mutex::new(VecDeque::new()),
            reclaiming: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_fixed(&self) -> bool {
        self.count.load(Ordering::Acquire) > 0
    }

    pub(crate) fn fix(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the post-decrement fixation depth; `0` means the caller
    /// should run reclamation.
    pub(crate) fn unfix(&self) -> usize {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unfix on a table that isn't fixed");
        prev - 1
    }

    pub(crate) fn log_bucket(&self, bucket_ix: usize) {
        self.dlog.lock().push_back(DlogEntry::Bucket(bucket_ix));
    }

    pub(crate) fn log_all(&self) {
        self.dlog.lock().push_back(DlogEntry::AllBuckets);
    }

    /// Pop one log entry, but only while the table remains unfixed; if a
    /// concurrent `fix()` raced in, stop without consuming anything — the
    /// remaining log tail simply stays in the queue for the next sweep.
    pub(crate) fn try_pop(&self) -> Option<DlogEntry> {
        if self.is_fixed() {
            return None;
        }
        self.dlog.lock().pop_front()
    }

    /// Ensures only one thread runs the reclamation sweep at a time.
    pub(crate) fn try_begin_reclaim(&self) -> bool {
        self.reclaiming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn end_reclaim(&self) {
        self.reclaiming.store(false, Ordering::Release);
    }
}
