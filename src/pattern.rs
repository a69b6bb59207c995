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

//! Pattern analysis and the match-program seam.
//!
//! The match-program compiler itself is external to this engine — the same
//! way term encoding is external (see `term.rs`). What the traversal engine
//! needs from a pattern is the three-way classification that decides
//! whether a traversal touches zero buckets, a precomputed set of keyed
//! buckets, or the whole active address space, plus a callback that decides
//! whether a given record matches and (for select/select-replace) what to
//! project or substitute.

use crate::term::{Record, Term};

/// Result of pre-analyzing a pattern against a table's key space.
pub enum MatchClass<T: Term> {
    /// No record can possibly satisfy the pattern; the traversal can return
    /// immediately without acquiring any lock.
    Nothing,
    /// The pattern fixes the key to one of these exact values; only the
    /// buckets holding these keys need be visited.
    Keyed(Vec<T>),
    /// No key restriction was derivable; every active bucket must be
    /// walked.
    Scanning,
}

/// The callback surface the traversal engine (`traverse.rs`) drives. A
/// `MatchSpec` is purely a predicate/projection; it never touches locks or
/// bucket internals itself.
pub trait MatchSpec<T: Term> {
    /// Classify this pattern ahead of taking any stripe lock.
    fn classify(&self, keypos: usize) -> MatchClass<T>;

    /// Does `record` satisfy the pattern?
    fn matches(&self, record: &Record<T>) -> bool;

    /// Project a matched record into its select/select-chunk output form.
    /// Default: return the whole record.
    fn project(&self, record: &Record<T>) -> Record<T> {
        record.clone()
    }

    /// For `select-replace`: compute the replacement record for a matched
    /// entry. Must preserve the key field (validated by the caller before
    /// the traversal starts, per the key-preserving requirement on replace).
    /// `None` means "leave this entry untouched".
    fn replace(&self, record: &Record<T>) -> Option<Record<T>> {
        let _ = record;
        None
    }
}

/// The trivial pattern: every live record matches, nothing is projected
/// away, nothing is replaced. Used by `select_count(matchall)`-style full
/// scans (scenario S6) and as a default when no finer pattern is supplied.
pub struct MatchAll;

impl<T: Term> MatchSpec<T> for MatchAll {
    fn classify(&self, _keypos: usize) -> MatchClass<T> {
        MatchClass::Scanning
    }
    fn matches(&self, _record: &Record<T>) -> bool {
        true
    }
}

/// Matches only records whose key field is structurally equal to one of a
/// fixed set of keys. This is the concrete shape a compiled match-program
/// takes once the external compiler has proven the pattern keyed; building
/// one directly (bypassing the external compiler) is also a reasonable way
/// for a caller to request a keyed multi-get.
pub struct KeyedEquals<T: Term> {
    pub keys: Vec<T>,
}

impl<T: Term> MatchSpec<T> for KeyedEquals<T> {
    fn classify(&self, keypos: usize) -> MatchClass<T> {
        let _ = keypos;
        if self.keys.is_empty() {
            MatchClass::Nothing
        } else {
            MatchClass::Keyed(self.keys.clone())
        }
    }
    fn matches(&self, record: &Record<T>) -> bool {
        // keypos is validated by the traversal engine before `matches` is
        // ever called; here we only need structural presence among `keys`.
        record.iter().any(|f| self.keys.contains(f))
    }
}
