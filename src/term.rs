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

//! The term model this table stores.
//!
//! Term encoding/decoding is external to this engine (it is owned by whatever
//! sits above the table: a query executor, a binding layer, a client
//! protocol). What the engine needs from a term is only that it can be
//! hashed and structurally compared: keys and values are opaque structured
//! terms, and equality between them is structural.

use std::{fmt, hash::Hash};

/// A term stored in a [`Record`]. Any type with value semantics, structural
/// equality and a stable hash qualifies; there is nothing table-specific
/// about it.
pub trait Term: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}
impl<T> Term for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// A stored tuple. `keypos` (see [`crate::options::CreateOpts`]) selects
/// which field is the key; the rest are payload.
pub type Record<T> = Box<[T]>;

/// Build a [`Record`] from an iterator of terms, in tuple order.
pub fn record<T: Term>(fields: impl IntoIterator<Item = T>) -> Record<T> {
    fields.into_iter().collect::<Vec<_>>().into_boxed_slice()
}
