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

//! Table creation options. Small, chained-setter builder, the way
//! `server/src/engine/config.rs` shapes its own option structs.

pub const NITEMS_STRIPES: usize = 64;
pub const STRIPE_MIN: usize = NITEMS_STRIPES;
pub const STRIPE_MAX: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantics {
    /// unique key, last writer wins
    Set,
    /// unique key, insert fails if the key already holds a live entry
    SetUniqueFailOnClash,
    /// multiset by key, structurally-equal duplicates are suppressed
    Bag,
    /// multiset by key, duplicates (even structurally identical ones) are kept
    Dbag,
}

impl Semantics {
    pub(crate) fn fail_on_clash(self) -> bool {
        matches!(self, Self::SetUniqueFailOnClash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locking {
    /// a single stripe; no adaptive resizing
    Coarse,
    /// a fixed stripe count, chosen at creation and never changed
    Fine,
    /// stripe count adapts to observed contention (C7)
    FineAuto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderBias {
    /// balanced read/write priority
    False,
    /// bias stripe locks towards readers while `L <= 128`
    True,
}

#[derive(Debug, Clone)]
pub struct CreateOpts {
    pub(crate) semantics: Semantics,
    pub(crate) locking: Locking,
    pub(crate) reader_bias: ReaderBias,
    pub(crate) compressed: bool,
    pub(crate) keypos: usize,
    pub(crate) initial_stripes: usize,
}

impl Default for CreateOpts {
    fn default() -> Self {
        Self {
            semantics: Semantics::Set,
            locking: Locking::FineAuto,
            reader_bias: ReaderBias::False,
            compressed: false,
            keypos: 1,
            initial_stripes: STRIPE_MIN,
        }
    }
}

impl CreateOpts {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn semantics(mut self, semantics: Semantics) -> Self {
        self.semantics = semantics;
        self
    }
    pub fn locking(mut self, locking: Locking) -> Self {
        self.locking = locking;
        self
    }
    pub fn reader_bias(mut self, reader_bias: ReaderBias) -> Self {
        self.reader_bias = reader_bias;
        self
    }
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }
    /// 1-based index into the stored tuple that is the key.
    pub fn keypos(mut self, keypos: usize) -> Self {
        assert!(keypos >= 1, "keypos is 1-based");
        self.keypos = keypos;
        self
    }
    /// Hint for the initial stripe count. Clamped into `[64, 8192]` and
    /// rounded down to a power of two.
    pub fn initial_stripes(mut self, hint: usize) -> Self {
        self.initial_stripes = clamp_stripes(hint);
        self
    }

    pub(crate) fn effective_stripes(&self) -> usize {
        match self.locking {
            // coarse locking still keeps L >= NITEMS_STRIPES so item
            // counting stays correct, it just never grows past the minimum
            Locking::Coarse => STRIPE_MIN,
            Locking::Fine | Locking::FineAuto => self.initial_stripes,
        }
    }
    pub(crate) fn adaptive(&self) -> bool {
        matches!(self.locking, Locking::FineAuto)
    }
}

/// Clamp a stripe-count hint into `[STRIPE_MIN, STRIPE_MAX]` and round it
/// down to the nearest power of two.
pub(crate) fn clamp_stripes(hint: usize) -> usize {
    let hint = hint.clamp(STRIPE_MIN, STRIPE_MAX);
    // round down to a power of two
    1usize << (usize::BITS - 1 - hint.leading_zeros())
}

/// Default initial stripe count when the caller gives no hint: derived from
/// the visible CPU count the way `server/src/corestore/map/mod.rs` derives
/// its shard count, then clamped to `[STRIPE_MIN, STRIPE_MAX]`.
pub fn default_initial_stripes() -> usize {
    clamp_stripes((num_cpus::get() * 4).next_power_of_two())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rounds_down_to_power_of_two() {
        assert_eq!(clamp_stripes(100), 64);
        assert_eq!(clamp_stripes(64), 64);
        assert_eq!(clamp_stripes(1), STRIPE_MIN);
        assert_eq!(clamp_stripes(1_000_000), STRIPE_MAX);
    }
}
