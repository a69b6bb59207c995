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

//! A concurrent, in-memory linear-hash table over opaque structured terms.
//!
//! [`Table`] is the entry point: a segmented, striped-lock bucket array
//! (`segment`, `stripe`) addressed by a linear-hash controller (`linhash`)
//! that grows and shrinks one bucket at a time rather than rehashing the
//! whole table. `fixation` adds pseudo-deletion so a long-running cursor
//! (C6's match traversal, `traverse`) never observes a bucket chain
//! mutated out from under it. SET, SET_UNIQUE_FAIL_ON_CLASH, BAG and DBAG
//! key semantics all live in `chain`, the one place that actually walks a
//! bucket's entry list.

mod chain;
mod entry;
mod error;
mod fixation;
mod linhash;
mod options;
mod pattern;
mod segment;
mod stats;
mod stripe;
mod table;
mod term;
mod traverse;

pub use error::{Error, TableResult};
pub use options::{default_initial_stripes, CreateOpts, Locking, ReaderBias, Semantics};
pub use pattern::{KeyedEquals, MatchAll, MatchClass, MatchSpec};
pub use stats::TableStats;
pub use table::Table;
pub use term::{record, Record, Term};
pub use traverse::{Continuation, CountOutcome, MutateOutcome, SelectOutcome};
