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

//! C8: the table itself, tying the linear-hash controller, the stripe
//! array, fixation and the match-traversal engine into the public surface.

use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering};
use std::{collections::hash_map::RandomState, hash::BuildHasher};

use parking_lot::RwLock;

use crate::{
    chain,
    entry::{hash_term, slot_of},
    error::{Error, TableResult},
    fixation::{DlogEntry, Fixation},
    linhash::LinHashState,
    options::CreateOpts,
    pattern::MatchSpec,
    stats::TableStats,
    stripe::{ResizeRequest, StripeArray},
    term::{Record, Term},
    traverse::{self, Continuation, CountOutcome, MutateOutcome, SelectOutcome},
};

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub struct Table<T: Term> {
    pub(crate) linhash: RwLock<LinHashState<T>>,
    pub(crate) stripes: RwLock<StripeArray>,
    pub(crate) fixation: Fixation,
    pub(crate) opts: CreateOpts,
    pub(crate) tid: u64,
    /// authoritative live-item count; always maintained, independent of
    /// the approximate per-stripe `nitems` counters used only for the
    /// grow/shrink heuristic.
    pub(crate) total_items: AtomicIsize,
    hasher: RandomState,
}

impl<T: Term> Table<T> {
    pub fn new(opts: CreateOpts) -> Self {
        let nstripes = opts.effective_stripes();
        let adaptive = opts.adaptive();
        Self {
            linhash: RwLock::new(LinHashState::new()),
            stripes: RwLock::new(StripeArray::new(nstripes, adaptive)),
            fixation: Fixation::new(),
            opts,
            tid: NEXT_TID.fetch_add(1, Ordering::Relaxed),
            total_items: AtomicIsize::new(0),
            hasher: RandomState::new(),
        }
    }

    fn hash_key(&self, key: &T) -> u32 {
        hash_term(&self.hasher, key)
    }

    /// Resolve `hash` to its bucket slot under a `linhash.read()` snapshot,
    /// acquire the stripe that slot maps to, run `f` with the resolved
    /// `LinHashState`/slot, then poll for a resize request.
    ///
    /// Ordinary single-key mutation only ever needs shared access to
    /// `linhash` (to read `mask`/`nactive` and to reach a bucket through
    /// `unsafe fn bucket_mut`, whose exclusivity comes from the stripe lock,
    /// not from `linhash`): many threads can hold `linhash.read()` at once,
    /// so two keys that hash into different stripes now genuinely run
    /// concurrently. `linhash.write()` is reserved for
    /// [`Self::maybe_grow_or_shrink`]'s structural resplit/merge, which
    /// excludes every stripe access while it runs. The stripe is picked
    /// from the *resolved slot*, not the raw hash (see
    /// `StripeArray::index_of`), so any other access to the same slot —
    /// regardless of which hash produced it — always contends on the same
    /// lock.
    fn with_stripe<R>(
        &self,
        hash: u32,
        write: bool,
        f: impl FnOnce(&LinHashState<T>, usize) -> R,
    ) -> R {
        let linhash = self.linhash.read();
        let slot = slot_of(hash, linhash.mask, linhash.nactive);
        let (result, request) = {
            let stripes = self.stripes.read();
            let ix = stripes.index_of(slot);
            let stripe = stripes.get(ix);
            let result = if write {
                let _guard = stripe.write();
                f(&linhash, slot)
            } else {
                let _guard = stripe.read();
                f(&linhash, slot)
            };
            (result, stripes.poll_resize())
        };
        drop(linhash);
        if request != ResizeRequest::None {
            self.maybe_resize(request);
        }
        result
    }

    /// Acquire the stripe covering a diagnostic/cursor read at `slot`,
    /// already resolved under a held `linhash.read()` guard. Used by
    /// `first`/`next`/`slot`, which otherwise only take `linhash.read()`
    /// and would race a concurrent stripe-locked writer under the new
    /// locking model.
    fn read_bucket<R>(
        &self,
        linhash: &LinHashState<T>,
        slot: usize,
        f: impl FnOnce(&crate::entry::Bucket<T>) -> R,
    ) -> R {
        let stripes = self.stripes.read();
        let ix = stripes.index_of(slot);
        let _guard = stripes.get(ix).read();
        // SAFETY: the read side of the stripe covering `slot` is held; any
        // writer to this same slot takes the same stripe's write lock
        // first (stripe selection is a function of the resolved slot).
        let bucket = unsafe { linhash.segments.bucket(slot) };
        f(bucket)
    }

    fn maybe_resize(&self, request: ResizeRequest) {
        if self.fixation.is_fixed() {
            return;
        }
        let mut stripes = self.stripes.write();
        if stripes.poll_resize() != request {
            // contention profile already changed since we decided to resize
            return;
        }
        *stripes = stripes.resized(request);
        let mut linhash = self.linhash.write();
        linhash.recompute_shrink_limit(stripes.len(), true);
    }

    fn bump_counter(&self, hash: u32, delta: isize) {
        if delta == 0 {
            return;
        }
        self.total_items.fetch_add(delta, Ordering::Relaxed);
        {
            let stripes = self.stripes.read();
            stripes
                .get(crate::stripe::counter_index_of(hash))
                .add_items(delta);
        }
        self.maybe_grow_or_shrink();
    }

    /// Grow or shrink the bucket address space to track the table's load
    /// factor (live items per active bucket) — independent of the
    /// stripe-lock resize in [`Self::maybe_resize`], which tracks lock
    /// contention instead.
    ///
    /// Growth runs regardless of fixation: a split only ever moves entries
    /// from slot `i` to the new, higher-numbered slot `i + nactive_old`, so
    /// a forward walk in slot order still visits every key exactly once
    /// whether or not it has passed `i` yet (this is what makes a fixed
    /// full scan resilient to concurrent grows). Shrink is blocked while
    /// fixed: a merge moves entries backward into a lower slot and frees
    /// the vacated segment, which could either double-visit a key a walk
    /// already passed or free memory a fixed traversal still holds a
    /// reference into.
    fn maybe_grow_or_shrink(&self) {
        let nlocks = self.stripes.read().len();
        let mut linhash = self.linhash.write();
        loop {
            let items = self.total_items.load(Ordering::Relaxed).max(0) as usize;
            if items > linhash.nactive {
                linhash.grow_one();
                linhash.recompute_shrink_limit(nlocks, true);
                continue;
            }
            if !self.fixation.is_fixed()
                && linhash.nactive > crate::segment::FIRST_SEGSZ
                && items * 2 < linhash.nactive
                && linhash.nslots() > linhash.shrink_limit.max(crate::segment::FIRST_SEGSZ)
            {
                linhash.shrink_one();
                linhash.recompute_shrink_limit(nlocks, true);
                continue;
            }
            break;
        }
    }

    // ---- single-key operations (C4) ----------------------------------

    pub fn insert(&self, record: Record<T>) -> TableResult<()> {
        self.insert_impl(record, self.opts.semantics)
    }

    /// Always requires the key to be absent (or only pseudo-deleted),
    /// regardless of the table's configured semantics — the "insert_new"
    /// variant of insert.
    pub fn insert_or_fail(&self, record: Record<T>) -> TableResult<()> {
        use crate::options::Semantics;
        let forced = match self.opts.semantics {
            Semantics::Bag | Semantics::Dbag => self.opts.semantics,
            _ => Semantics::SetUniqueFailOnClash,
        };
        self.insert_impl(record, forced)
    }

    fn insert_impl(&self, record: Record<T>, semantics: crate::options::Semantics) -> TableResult<()> {
        if record.len() < self.opts.keypos {
            return Err(Error::BadParam);
        }
        let key = record[self.opts.keypos - 1].clone();
        let hash = self.hash_key(&key);
        let keypos = self.opts.keypos;
        let delta = self.with_stripe(hash, true, |linhash, slot| {
            // SAFETY: the stripe write lock covering `slot` is held for
            // this whole closure, and no grow/shrink can run concurrently
            // (that needs `linhash.write()`, excluded by the `linhash.read()`
            // guard `with_stripe` holds throughout).
            let bucket = unsafe { linhash.segments.bucket_mut(slot) };
            chain::insert(bucket, semantics, keypos, hash, record)
        })?;
        self.bump_counter(hash, delta);
        Ok(())
    }

    pub fn erase(&self, key: &T) -> TableResult<isize> {
        let hash = self.hash_key(key);
        let keypos = self.opts.keypos;
        let fixed = self.fixation.is_fixed();
        let delta = self.with_stripe(hash, true, |linhash, slot| {
            // SAFETY: see `insert_impl`.
            let bucket = unsafe { linhash.segments.bucket_mut(slot) };
            let result = chain::erase_by_key(bucket, keypos, hash, key, fixed);
            if fixed && result.count_delta != 0 {
                self.fixation.log_bucket(slot);
            }
            result
        });
        self.bump_counter(hash, delta.count_delta);
        drop(delta.freed);
        Ok(-delta.count_delta)
    }

    pub fn erase_object(&self, record: &Record<T>) -> TableResult<isize> {
        use crate::options::Semantics;
        if record.len() < self.opts.keypos {
            return Err(Error::BadParam);
        }
        let key = record[self.opts.keypos - 1].clone();
        let hash = self.hash_key(&key);
        let keypos = self.opts.keypos;
        let fixed = self.fixation.is_fixed();
        let semantics = self.opts.semantics;
        let delta = self.with_stripe(hash, true, |linhash, slot| {
            // SAFETY: see `insert_impl`.
            let bucket = unsafe { linhash.segments.bucket_mut(slot) };
            let result = if matches!(semantics, Semantics::Bag) {
                // BAG: one structurally-equal match suffices
                let mut done = false;
                chain::erase_matching(bucket, fixed, |node| {
                    if done || node.hash != hash || &node.record != record {
                        return false;
                    }
                    done = true;
                    true
                })
            } else {
                // SET/SET_UNIQUE_FAIL_ON_CLASH/DBAG: every structurally-equal
                // entry in the key-group
                chain::erase_matching(bucket, fixed, |node| {
                    node.hash == hash && node.key(keypos) == &key && &node.record == record
                })
            };
            if fixed && result.count_delta != 0 {
                self.fixation.log_bucket(slot);
            }
            result
        });
        self.bump_counter(hash, delta.count_delta);
        drop(delta.freed);
        Ok(-delta.count_delta)
    }

    pub fn take(&self, key: &T) -> Vec<Record<T>> {
        let hash = self.hash_key(key);
        let keypos = self.opts.keypos;
        let fixed = self.fixation.is_fixed();
        let (taken, delta) = self.with_stripe(hash, true, |linhash, slot| {
            // SAFETY: see `insert_impl`.
            let bucket = unsafe { linhash.segments.bucket_mut(slot) };
            let r = chain::take_by_key(bucket, keypos, hash, key, fixed);
            if fixed && r.1.count_delta != 0 {
                self.fixation.log_bucket(slot);
            }
            r
        });
        self.bump_counter(hash, delta.count_delta);
        drop(delta.freed);
        taken
    }

    pub fn lookup(&self, key: &T) -> Vec<Record<T>> {
        let hash = self.hash_key(key);
        let keypos = self.opts.keypos;
        self.with_stripe(hash, false, |linhash, slot| {
            // SAFETY: the stripe read lock covering `slot` is held; a
            // concurrent writer to this slot would need the same stripe's
            // write lock, so no chain mutation races this read.
            let bucket = unsafe { linhash.segments.bucket(slot) };
            chain::lookup(bucket, keypos, hash, key)
        })
    }

    pub fn member(&self, key: &T) -> bool {
        let hash = self.hash_key(key);
        let keypos = self.opts.keypos;
        self.with_stripe(hash, false, |linhash, slot| {
            // SAFETY: see `lookup`.
            let bucket = unsafe { linhash.segments.bucket(slot) };
            chain::member(bucket, keypos, hash, key)
        })
    }

    pub fn get_element(&self, key: &T, pos: usize) -> TableResult<Vec<T>> {
        let hash = self.hash_key(key);
        let keypos = self.opts.keypos;
        self.with_stripe(hash, false, |linhash, slot| {
            // SAFETY: see `lookup`.
            let bucket = unsafe { linhash.segments.bucket(slot) };
            chain::get_element(bucket, keypos, hash, key, pos)
        })
    }

    // ---- diagnostic / cursor operations ------------------------------

    /// Diagnostic dump of the live entries at raw slot `i`. Not stable
    /// across resizes — a grow or shrink can re-home any bucket's contents.
    pub fn slot(&self, i: usize) -> TableResult<Vec<Record<T>>> {
        let linhash = self.linhash.read();
        if i >= linhash.nactive {
            return Err(Error::BadParam);
        }
        Ok(self.read_bucket(&linhash, i, |bucket| {
            let mut out = Vec::new();
            let mut cur = bucket.head.as_deref();
            while let Some(node) = cur {
                if !node.pseudo_deleted {
                    out.push(node.record.clone());
                }
                cur = node.next.as_deref();
            }
            out
        }))
    }

    /// First live key in slot order, or `None` if the table is empty.
    pub fn first(&self) -> Option<T> {
        self.first_with_values().map(|(k, _)| k)
    }

    pub fn first_with_values(&self) -> Option<(T, Vec<Record<T>>)> {
        let keypos = self.opts.keypos;
        let linhash = self.linhash.read();
        for slot in 0..linhash.nactive {
            let found = self.read_bucket(&linhash, slot, |bucket| {
                let mut cur = bucket.head.as_deref();
                while let Some(node) = cur {
                    if !node.pseudo_deleted {
                        let key = node.key(keypos).clone();
                        let group = chain::lookup(bucket, keypos, node.hash, &key);
                        return Some((key, group));
                    }
                    cur = node.next.as_deref();
                }
                None
            });
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Next live key in slot order after `prev_key`, or `None` at the end.
    /// Stable only under fixation; without fixation a concurrent grow/shrink
    /// may skip or repeat a key.
    pub fn next(&self, prev_key: &T) -> TableResult<Option<T>> {
        Ok(self.next_with_values(prev_key)?.map(|(k, _)| k))
    }

    pub fn next_with_values(&self, prev_key: &T) -> TableResult<Option<(T, Vec<Record<T>>)>> {
        let hash = self.hash_key(prev_key);
        let keypos = self.opts.keypos;
        let linhash = self.linhash.read();
        let start_slot = slot_of(hash, linhash.mask, linhash.nactive);
        if start_slot >= linhash.nactive {
            return Err(Error::BadKey);
        }

        // finish the current bucket, skipping entries up to and including
        // the key-group we are resuming from
        let found = self.read_bucket(&linhash, start_slot, |bucket| {
            let mut cur = bucket.head.as_deref();
            let mut past_prev = false;
            while let Some(node) = cur {
                if !node.pseudo_deleted {
                    let key = node.key(keypos);
                    if past_prev && key != prev_key {
                        let key = key.clone();
                        let group = chain::lookup(bucket, keypos, node.hash, &key);
                        return Some((key, group));
                    }
                    if key == prev_key {
                        past_prev = true;
                    }
                }
                cur = node.next.as_deref();
            }
            None
        });
        if found.is_some() {
            return Ok(found);
        }

        for slot in (start_slot + 1)..linhash.nactive {
            let found = self.read_bucket(&linhash, slot, |bucket| {
                let mut cur = bucket.head.as_deref();
                while let Some(node) = cur {
                    if !node.pseudo_deleted {
                        let key = node.key(keypos).clone();
                        let group = chain::lookup(bucket, keypos, node.hash, &key);
                        return Some((key, group));
                    }
                    cur = node.next.as_deref();
                }
                None
            });
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    // ---- fixation (C5) ------------------------------------------------

    pub fn fix(&self) {
        self.fixation.fix();
    }

    /// Decrements the fixation count; if it reaches zero, runs a bounded
    /// reclamation sweep draining the deferred-deletion log.
    pub fn unfix(&self) {
        if self.fixation.unfix() == 0 {
            self.reclaim();
        }
    }

    fn reclaim(&self) {
        if !self.fixation.try_begin_reclaim() {
            return;
        }
        while let Some(entry) = self.fixation.try_pop() {
            match entry {
                DlogEntry::Bucket(ix) => self.reclaim_bucket(ix),
                DlogEntry::AllBuckets => {
                    let nactive = self.linhash.read().nactive;
                    for ix in 0..nactive {
                        if self.fixation.is_fixed() {
                            break;
                        }
                        self.reclaim_bucket(ix);
                    }
                }
            }
            if self.fixation.is_fixed() {
                break;
            }
        }
        self.fixation.end_reclaim();
    }

    fn reclaim_bucket(&self, slot: usize) {
        let mut linhash = self.linhash.write();
        if slot >= linhash.nactive {
            return;
        }
        // SAFETY: `linhash.write()` above excludes every stripe-based
        // access to this slot.
        let bucket = unsafe { linhash.segments.bucket_mut(slot) };
        let nodes = crate::entry::take_chain(bucket);
        let mut kept = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !node.pseudo_deleted {
                kept.push(node);
            }
        }
        bucket.head = crate::entry::rebuild_chain(kept);
    }

    // ---- match traversal (C6) -----------------------------------------

    pub fn select(&self, pattern: &dyn MatchSpec<T>) -> SelectOutcome<T> {
        traverse::select(self, pattern, None)
    }

    pub fn select_chunk(&self, pattern: &dyn MatchSpec<T>, chunk: usize) -> SelectOutcome<T> {
        traverse::select(self, pattern, Some(chunk))
    }

    pub fn select_continue(
        &self,
        pattern: &dyn MatchSpec<T>,
        cont: Continuation<T>,
    ) -> TableResult<SelectOutcome<T>> {
        traverse::select_continue(self, pattern, cont)
    }

    pub fn select_count(&self, pattern: &dyn MatchSpec<T>) -> CountOutcome<T> {
        traverse::select_count(self, pattern)
    }

    pub fn select_count_continue(
        &self,
        pattern: &dyn MatchSpec<T>,
        cont: Continuation<T>,
    ) -> TableResult<CountOutcome<T>> {
        traverse::select_count_continue(self, pattern, cont)
    }

    pub fn select_delete(&self, pattern: &dyn MatchSpec<T>) -> MutateOutcome<T> {
        traverse::select_delete(self, pattern)
    }

    pub fn select_delete_continue(
        &self,
        pattern: &dyn MatchSpec<T>,
        cont: Continuation<T>,
    ) -> TableResult<MutateOutcome<T>> {
        traverse::select_delete_continue(self, pattern, cont)
    }

    /// BAG is not supported for replace.
    pub fn select_replace(&self, pattern: &dyn MatchSpec<T>) -> TableResult<MutateOutcome<T>> {
        if matches!(self.opts.semantics, crate::options::Semantics::Bag) {
            return Err(Error::BadParam);
        }
        Ok(traverse::select_replace(self, pattern))
    }

    pub fn select_replace_continue(
        &self,
        pattern: &dyn MatchSpec<T>,
        cont: Continuation<T>,
    ) -> TableResult<MutateOutcome<T>> {
        if matches!(self.opts.semantics, crate::options::Semantics::Bag) {
            return Err(Error::BadParam);
        }
        traverse::select_replace_continue(self, pattern, cont)
    }

    // ---- bulk / lifecycle (C8) -----------------------------------------

    /// Clears every live entry, returning the pre-clear live count.
    /// Fixation-aware: while fixed, entries are pseudo-deleted in bounded
    /// chunks rather than unlinked immediately.
    pub fn delete_all_objects(&self) -> isize {
        let pre = self.total_items.load(Ordering::Relaxed);
        if self.fixation.is_fixed() {
            traverse::mark_all_deleted(self);
        } else {
            let linhash = self.linhash.write();
            for slot in 0..linhash.nactive {
                // SAFETY: `linhash.write()` excludes every stripe-based
                // access for the whole loop.
                unsafe { linhash.segments.bucket_mut(slot) }.head = None;
            }
            self.total_items.store(0, Ordering::Relaxed);
        }
        pre
    }

    pub fn stats(&self) -> TableStats {
        let linhash = self.linhash.read();
        let stripes = self.stripes.read();
        TableStats {
            nactive: linhash.nactive,
            nslots: linhash.nslots(),
            nsegments: linhash.segments.nsegments(),
            nstripes: stripes.len(),
            nitems: self.total_items.load(Ordering::Relaxed),
            is_fixed: self.fixation.is_fixed(),
            keypos: self.opts.keypos,
            compressed: self.opts.compressed,
        }
    }

    /// Human-readable diagnostic dump; also emitted at debug level the way
    /// `server/src/corestore/htable.rs` logs its own table summaries.
    pub fn print(&self) -> String {
        let stats = self.stats();
        let s = format!(
            "table(tid={}, nitems={}, nactive={}, nslots={}, nstripes={}, fixed={})",
            self.tid, stats.nitems, stats.nactive, stats.nslots, stats.nstripes, stats.is_fixed
        );
        log::debug!("{s}");
        s
    }

    /// Bounded teardown: drains the deferred-deletion log, then frees
    /// segments from the top down, `budget` reductions at a time.
    /// Returns the remaining entry count; `0` means teardown is complete
    /// and the table may be dropped.
    pub fn free_table_continue(&self, budget: usize) -> usize {
        let mut remaining = budget;
        while remaining > 0 {
            if self.fixation.try_pop().is_some() {
                remaining -= 1;
                continue;
            }
            break;
        }
        let mut linhash = self.linhash.write();
        while remaining > 0 && linhash.segments.nsegments() > 1 {
            for slot in
                (linhash.nslots() - crate::segment::EXT_SEGSZ)..linhash.nslots()
            {
                // SAFETY: `linhash.write()` excludes every stripe-based
                // access for the whole teardown.
                unsafe { linhash.segments.bucket_mut(slot) }.head = None;
            }
            linhash.segments.pop_segment();
            remaining -= 1;
        }
        if linhash.segments.nsegments() == 1 && remaining > 0 {
            for slot in 0..crate::segment::FIRST_SEGSZ {
                unsafe { linhash.segments.bucket_mut(slot) }.head = None;
            }
            remaining -= 1;
            return 0;
        }
        remaining
    }
}
