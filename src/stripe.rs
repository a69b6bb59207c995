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

//! C2 (lock/counter stripe) and C7 (adaptive lock striping).
//!
//! Each stripe is a `parking_lot::RwLock<()>` guarding, by convention
//! rather than by type, the bucket chains whose resolved slot maps to it
//! (see `server/src/corestore/map/mod.rs` for the sibling pattern of
//! sharding a table behind an array of locks) plus two plain atomics for
//! the local item counter and the contention estimate.
//!
//! [`StripeArray::index_of`] takes a resolved bucket *slot*, not a raw
//! hash: two hashes that land in the same bucket (after [`crate::entry::slot_of`]
//! folds them through the active/mask boundary) must always pick the same
//! stripe, or the lock stops being mutually exclusive for that bucket.
//! Indexing straight off the hash doesn't give that guarantee once the
//! stripe count exceeds the active address-space width.

use std::sync::atomic::{AtomicI64, AtomicIsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::options::{Locking, NITEMS_STRIPES, STRIPE_MAX, STRIPE_MIN};

/// Contention bumps observed on a failed trylock followed by a blocking
/// acquire; decays by one on every uncontended acquire.
const CONTENDED_BUMP: i64 = 100;
const UNCONTENDED_DECAY: i64 = -1;
const GROW_THRESHOLD: i64 = 1000;
const SHRINK_THRESHOLD: i64 = -10_000_000;

pub(crate) struct Stripe {
    lock: RwLock<()>,
    /// only the first `NITEMS_STRIPES` stripes carry a nonzero counter
    nitems: AtomicIsize,
    stat: AtomicI64,
}

impl Stripe {
    fn new() -> Self {
        Self {
            lock: RwLock::new(()),
            nitems: AtomicIsize::new(0),
            stat: AtomicI64::new(0),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ()> {
        match self.lock.try_read() {
            Some(g) => {
                self.stat.fetch_add(UNCONTENDED_DECAY, Ordering::Relaxed);
                g
            }
            None => {
                let g = self.lock.read();
                self.stat.fetch_add(CONTENDED_BUMP, Ordering::Relaxed);
                g
            }
        }
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ()> {
        match self.lock.try_write() {
            Some(g) => {
                self.stat.fetch_add(UNCONTENDED_DECAY, Ordering::Relaxed);
                g
            }
            None => {
                let g = self.lock.write();
                self.stat.fetch_add(CONTENDED_BUMP, Ordering::Relaxed);
                g
            }
        }
    }

    pub(crate) fn add_items(&self, delta: isize) {
        if delta != 0 {
            self.nitems.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub(crate) fn items(&self) -> isize {
        self.nitems.load(Ordering::Relaxed)
    }

    fn stat(&self) -> i64 {
        self.stat.load(Ordering::Relaxed)
    }

    fn reset_stat(&self) {
        self.stat.store(0, Ordering::Relaxed);
    }
}

/// A resize request staged by [`Stripe::read`]/[`Stripe::write`] observers;
/// applied later under the table-wide writer lock so all stripes are
/// drained first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ResizeRequest {
    None,
    Grow,
    Shrink,
}

/// Item-count bucketing is fixed at `NITEMS_STRIPES`-way granularity
/// regardless of the current stripe-lock count `L`: only the first
/// `NITEMS_STRIPES` stripes ever carry a nonzero counter. This is
/// independent of [`StripeArray::index_of`], which picks the *lock* stripe
/// and tracks `L`.
#[inline]
pub(crate) fn counter_index_of(hash: u32) -> usize {
    hash as usize & (NITEMS_STRIPES - 1)
}

pub(crate) struct StripeArray {
    stripes: Vec<Stripe>,
    adaptive: bool,
}

impl StripeArray {
    pub(crate) fn new(count: usize, adaptive: bool) -> Self {
        let count = count.clamp(STRIPE_MIN, STRIPE_MAX).next_power_of_two();
        Self {
            stripes: (0..count).map(|_| Stripe::new()).collect(),
            adaptive,
        }
    }

    pub(crate) fn from_locking(locking: Locking, hint: usize) -> Self {
        Self::new(hint, matches!(locking, Locking::FineAuto))
    }

    pub(crate) fn len(&self) -> usize {
        self.stripes.len()
    }

    /// `self.stripes.len()` is always a power of two, so `slot & (L - 1)`
    /// is `slot mod L`: a pure function of the resolved bucket slot, hence
    /// every access to the same slot picks the same stripe regardless of
    /// which hash bits produced it.
    #[inline]
    pub(crate) fn index_of(&self, slot: usize) -> usize {
        slot & (self.stripes.len() - 1)
    }

    #[inline]
    pub(crate) fn get(&self, ix: usize) -> &Stripe {
        &self.stripes[ix]
    }

    /// Authoritative count: sum the first `NITEMS_STRIPES` counters. Caller
    /// is expected to hold the table-wide writer lock when precision
    /// matters.
    pub(crate) fn authoritative_count(&self) -> isize {
        self.stripes
            .iter()
            .take(NITEMS_STRIPES)
            .map(Stripe::items)
            .sum()
    }

    /// Cheap, approximate estimate: sample one counter and extrapolate.
    pub(crate) fn estimate_count(&self) -> isize {
        if self.stripes.is_empty() {
            return 0;
        }
        let sample = self.stripes[0].items();
        sample * NITEMS_STRIPES as isize
    }

    /// Scan every stripe's contention stat and decide whether a resize
    /// should be requested. Does not itself resize (that needs the
    /// table-wide writer lock).
    pub(crate) fn poll_resize(&self) -> ResizeRequest {
        if !self.adaptive {
            return ResizeRequest::None;
        }
        for s in &self.stripes {
            let stat = s.stat();
            if stat > GROW_THRESHOLD && self.stripes.len() < STRIPE_MAX {
                return ResizeRequest::Grow;
            }
            if stat < SHRINK_THRESHOLD && self.stripes.len() > STRIPE_MIN {
                return ResizeRequest::Shrink;
            }
        }
        ResizeRequest::None
    }

    /// Allocate a new stripe array of size `2L` or `L/2` (clamped),
    /// carrying over the first `NITEMS_STRIPES` counters verbatim (they are
    /// stripe-independent by design) and zeroing the rest.
    pub(crate) fn resized(&self, request: ResizeRequest) -> Self {
        let new_len = match request {
            ResizeRequest::Grow => (self.stripes.len() * 2).min(STRIPE_MAX),
            ResizeRequest::Shrink => (self.stripes.len() / 2).max(STRIPE_MIN),
            ResizeRequest::None => self.stripes.len(),
        };
        let mut new_stripes = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let s = Stripe::new();
            if i < NITEMS_STRIPES && i < self.stripes.len() {
                s.nitems
                    .store(self.stripes[i].items(), Ordering::Relaxed);
            }
            new_stripes.push(s);
        }
        for s in &self.stripes {
            s.reset_stat();
        }
        Self {
            stripes: new_stripes,
            adaptive: self.adaptive,
        }
    }
}
