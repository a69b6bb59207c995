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

use std::fmt;

pub type TableResult<T> = Result<T, Error>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
/// Error codes surfaced by table operations. None of these are retried by
/// the engine; they are returned to the caller as-is.
pub enum Error {
    /// no error; operation completed
    None,
    /// a tuple position was out of range for `get_element`
    BadItem,
    /// insert_or_fail found a live entry under the key, or next() was asked
    /// to resume from a key the cursor doesn't recognize
    BadKey,
    /// a malformed argument, most commonly a continuation that doesn't
    /// belong to this table or points past its current address space
    BadParam,
    /// a bounded resource (the match-program compiler, external to this
    /// crate) refused the request
    SysRes,
    /// an assertion-backed invariant was violated; should never occur
    Unspec,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "no error",
            Self::BadItem => "bad item: tuple position out of range",
            Self::BadKey => "bad key: clash on unique insert, or unknown cursor key",
            Self::BadParam => "bad parameter: malformed pattern or continuation",
            Self::SysRes => "system resource limit exceeded",
            Self::Unspec => "unspecified internal error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for Error {}
