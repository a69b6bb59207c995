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

//! `stats()` diagnostic snapshot. Serialized with `serde` the way
//! `server/src/corestore/htable.rs` exposes its own counters to callers
//! outside the engine (a metrics exporter, an admin command), even though
//! this crate carries no such surface itself.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub nactive: usize,
    pub nslots: usize,
    pub nsegments: usize,
    pub nstripes: usize,
    pub nitems: isize,
    pub is_fixed: bool,
    pub keypos: usize,
    pub compressed: bool,
}
