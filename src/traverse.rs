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

//! C6: the match traversal engine. `select`, `select_chunk`, `select_count`,
//! `select_delete` and `select_replace` are all one walk skeleton driven by
//! a different per-match/end-of-chunk callback; [`MatchAction`] is that
//! callback's return type.

use crate::{
    entry::{rebuild_chain, take_chain},
    error::{Error, TableResult},
    pattern::{MatchClass, MatchSpec},
    table::Table,
    term::{Record, Term},
};

/// Iterations budget per invocation: one iteration is one live entry
/// visited, and a walk traps and returns a [`Continuation`] once it hits
/// this many without finishing the key space.
const TRAP_BUDGET: usize = 1000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Safety {
    /// under fixation: no missed or doubled keys, pseudo-deleted entries
    /// are skipped
    Safe,
    /// no fixation held: a concurrent grow split may double-visit or skip
    /// a key; the caller accepted this when it chose not to fix
    Unsafe,
}

enum Accumulator<T: Term> {
    Select(Vec<Record<T>>),
    Count(usize),
    Mutate(isize),
}

/// Opaque resumable traversal state: which table it belongs to, where the
/// walk left off, the chunk limit (if any), the accumulated result so far,
/// and the safety mode the walk started under.
pub struct Continuation<T: Term> {
    tid: u64,
    slot_ix: usize,
    chunk_limit: Option<usize>,
    accumulator: Accumulator<T>,
    safety: Safety,
    op: OperatorKind,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OperatorKind {
    Select,
    Count,
    Delete,
    Replace,
}

pub enum SelectOutcome<T: Term> {
    Done(Vec<Record<T>>),
    Trapped(Vec<Record<T>>, Continuation<T>),
}

pub enum CountOutcome<T: Term> {
    Done(usize),
    Trapped(usize, Continuation<T>),
}

pub enum MutateOutcome<T: Term> {
    Done(isize),
    Trapped(isize, Continuation<T>),
}

/// Walk result for one invocation: either it finished (consuming the whole
/// key space from `start_slot` onward) or it trapped with the next slot to
/// resume at.
enum WalkStep {
    Finished,
    Trapped { next_slot: usize },
}

/// Drive the shared skeleton from `start_slot` through at most
/// `TRAP_BUDGET` entry visits, calling `on_match` for every live record the
/// pattern accepts and `on_bucket_done` after each bucket is fully walked
/// (used by select-delete/replace to release locks between buckets the way
/// the stripe-coherent stride does).
///
/// `on_match` may mutate the bucket it is given (for delete/replace); it
/// must not change the chain's length in a way that breaks the walk
/// (callers use `take_chain`/`rebuild_chain` internally and return a cursor
/// offset, never mutate while iterating the raw list).
fn walk<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    start_slot: usize,
    budget: usize,
    on_match: impl FnMut(&Record<T>) -> MatchAction<T>,
) -> (usize, WalkStep) {
    walk_with_stop(table, pattern, start_slot, budget, &mut || false, on_match)
}

/// As [`walk`] but also traps as soon as `should_stop` returns true after a
/// match (used by `select_chunk` to stop at the requested chunk size well
/// before the 1000-iteration budget is exhausted).
fn walk_with_stop<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    start_slot: usize,
    budget: usize,
    should_stop: &mut dyn FnMut() -> bool,
    mut on_match: impl FnMut(&Record<T>) -> MatchAction<T>,
) -> (usize, WalkStep) {
    let mut visited = 0usize;
    let mut slot = start_slot;
    let linhash = table.linhash.read();
    let nactive = linhash.nactive;
    drop(linhash);

    'outer: while slot < nactive {
        let mut linhash = table.linhash.write();
        if slot >= linhash.nactive {
            drop(linhash);
            break;
        }
        // SAFETY: `linhash.write()` above excludes every stripe-based
        // access to any slot, this one included.
        let bucket = unsafe { linhash.segments.bucket_mut(slot) };
        let mut nodes = take_chain(bucket);
        let mut rebuilt = Vec::with_capacity(nodes.len());
        let mut trapped_mid_bucket = false;
        let mut pseudo_deleted_here = false;
        for node in nodes.drain(..) {
            if node.pseudo_deleted {
                // a pseudo-deleted entry is never live data under either
                // safety mode; skip it without counting against the budget
                rebuilt.push(node);
                continue;
            }
            visited += 1;
            let action = if pattern.matches(&node.record) {
                on_match(&node.record)
            } else {
                MatchAction::Keep
            };
            match action {
                MatchAction::Keep => rebuilt.push(node),
                MatchAction::Drop => { /* freed implicitly by not pushing back */ }
                MatchAction::PseudoDelete => {
                    let mut node = node;
                    node.pseudo_deleted = true;
                    pseudo_deleted_here = true;
                    rebuilt.push(node);
                }
                MatchAction::Replace(new_record) => {
                    let mut node = node;
                    node.record = new_record;
                    rebuilt.push(node);
                }
            }
            if visited >= budget || should_stop() {
                trapped_mid_bucket = true;
                break;
            }
        }
        // anything left in `nodes` (if we broke early) still needs to be
        // reattached untouched
        for node in nodes.drain(..) {
            rebuilt.push(node);
        }
        // SAFETY: see above; still under the same `linhash.write()` guard.
        let bucket = unsafe { linhash.segments.bucket_mut(slot) };
        bucket.head = rebuild_chain(rebuilt);
        let nactive_now = linhash.nactive;
        drop(linhash);
        if pseudo_deleted_here {
            table.fixation.log_bucket(slot);
        }

        if trapped_mid_bucket {
            return (visited, WalkStep::Trapped { next_slot: slot });
        }
        if visited >= budget {
            return (visited, WalkStep::Trapped { next_slot: slot + 1 });
        }
        if slot + 1 >= nactive_now {
            break 'outer;
        }
        slot += 1;
    }
    (visited, WalkStep::Finished)
}

enum MatchAction<T: Term> {
    Keep,
    Drop,
    PseudoDelete,
    Replace(Record<T>),
}

/// Fixation makes a traversal safe: while fixed, `maybe_resize`
/// refuses to grow or shrink the table, so a walk starting now cannot race a
/// concurrent split/merge and miss or double-visit a key. The tag is
/// recorded on the [`Continuation`] so a later `*_continue` call still knows
/// which guarantee the walk started under, even if fixation is released
/// mid-traversal.
fn start_safety<T: Term>(table: &Table<T>) -> Safety {
    if table.fixation.is_fixed() {
        Safety::Safe
    } else {
        Safety::Unsafe
    }
}

fn classify_start<T: Term>(table: &Table<T>, pattern: &dyn MatchSpec<T>) -> Option<usize> {
    match pattern.classify(table.opts.keypos) {
        MatchClass::Nothing => None,
        // keyed classification still walks from slot 0: the traversal
        // engine does not special-case per-key bucket lookup here; callers
        // wanting a pure multi-get should use `Table::lookup` per key
        // instead, which is the cheaper path for that case.
        MatchClass::Keyed(_) | MatchClass::Scanning => Some(0),
    }
}

pub(crate) fn select<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    chunk: Option<usize>,
) -> SelectOutcome<T> {
    let start = match classify_start(table, pattern) {
        Some(s) => s,
        None => return SelectOutcome::Done(Vec::new()),
    };
    select_from(table, pattern, start, chunk, Vec::new(), start_safety(table))
}

fn select_from<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    start: usize,
    chunk: Option<usize>,
    mut acc: Vec<Record<T>>,
    safety: Safety,
) -> SelectOutcome<T> {
    let budget = TRAP_BUDGET;
    let chunk_limit = chunk;
    // counts matches produced *by this call*, not the cumulative length of
    // `acc` — a resumed call must still be allowed up to `chunk` more
    // matches even though `acc` already holds matches from earlier calls.
    let produced_this_call = std::cell::Cell::new(0usize);
    let (_, step) = walk_with_stop(
        table,
        pattern,
        start,
        budget,
        &mut || chunk_limit.map_or(false, |c| produced_this_call.get() >= c),
        |record| {
            if chunk_limit.map_or(true, |c| produced_this_call.get() < c) {
                acc.push(pattern.project(record));
                produced_this_call.set(produced_this_call.get() + 1);
            }
            MatchAction::Keep
        },
    );
    match step {
        WalkStep::Finished => SelectOutcome::Done(acc),
        WalkStep::Trapped { next_slot } => {
            let cont = Continuation {
                tid: table.tid,
                slot_ix: next_slot,
                chunk_limit: chunk,
                accumulator: Accumulator::Select(acc.clone()),
                safety,
                op: OperatorKind::Select,
            };
            SelectOutcome::Trapped(acc, cont)
        }
    }
}

pub(crate) fn select_continue<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    cont: Continuation<T>,
) -> TableResult<SelectOutcome<T>> {
    validate(table, &cont, OperatorKind::Select)?;
    let acc = match cont.accumulator {
        Accumulator::Select(v) => v,
        _ => return Err(Error::BadParam),
    };
    Ok(select_from(table, pattern, cont.slot_ix, cont.chunk_limit, acc, cont.safety))
}

pub(crate) fn select_count<T: Term>(table: &Table<T>, pattern: &dyn MatchSpec<T>) -> CountOutcome<T> {
    let start = match classify_start(table, pattern) {
        Some(s) => s,
        None => return CountOutcome::Done(0),
    };
    select_count_from(table, pattern, start, 0, start_safety(table))
}

fn select_count_from<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    start: usize,
    mut acc: usize,
    safety: Safety,
) -> CountOutcome<T> {
    let (_, step) = walk(table, pattern, start, TRAP_BUDGET, |_| {
        acc += 1;
        MatchAction::Keep
    });
    match step {
        WalkStep::Finished => CountOutcome::Done(acc),
        WalkStep::Trapped { next_slot } => CountOutcome::Trapped(
            acc,
            Continuation {
                tid: table.tid,
                slot_ix: next_slot,
                chunk_limit: None,
                accumulator: Accumulator::Count(acc),
                safety,
                op: OperatorKind::Count,
            },
        ),
    }
}

pub(crate) fn select_count_continue<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    cont: Continuation<T>,
) -> TableResult<CountOutcome<T>> {
    validate(table, &cont, OperatorKind::Count)?;
    let acc = match cont.accumulator {
        Accumulator::Count(n) => n,
        _ => return Err(Error::BadParam),
    };
    Ok(select_count_from(table, pattern, cont.slot_ix, acc, cont.safety))
}

pub(crate) fn select_delete<T: Term>(table: &Table<T>, pattern: &dyn MatchSpec<T>) -> MutateOutcome<T> {
    let start = match classify_start(table, pattern) {
        Some(s) => s,
        None => return MutateOutcome::Done(0),
    };
    select_delete_from(table, pattern, start, 0, start_safety(table))
}

fn select_delete_from<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    start: usize,
    mut acc: isize,
    safety: Safety,
) -> MutateOutcome<T> {
    let fixed = table.fixation.is_fixed();
    let (_, step) = walk(table, pattern, start, TRAP_BUDGET, |_record| {
        acc += 1;
        table
            .total_items
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        if fixed {
            MatchAction::PseudoDelete
        } else {
            MatchAction::Drop
        }
    });
    match step {
        WalkStep::Finished => MutateOutcome::Done(acc),
        WalkStep::Trapped { next_slot } => MutateOutcome::Trapped(
            acc,
            Continuation {
                tid: table.tid,
                slot_ix: next_slot,
                chunk_limit: None,
                accumulator: Accumulator::Mutate(acc),
                safety,
                op: OperatorKind::Delete,
            },
        ),
    }
}

pub(crate) fn select_delete_continue<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    cont: Continuation<T>,
) -> TableResult<MutateOutcome<T>> {
    validate(table, &cont, OperatorKind::Delete)?;
    let acc = match cont.accumulator {
        Accumulator::Mutate(n) => n,
        _ => return Err(Error::BadParam),
    };
    Ok(select_delete_from(table, pattern, cont.slot_ix, acc, cont.safety))
}

/// BAG is not supported for replace; caller validates semantics before
/// calling in.
pub(crate) fn select_replace<T: Term>(table: &Table<T>, pattern: &dyn MatchSpec<T>) -> MutateOutcome<T> {
    let start = match classify_start(table, pattern) {
        Some(s) => s,
        None => return MutateOutcome::Done(0),
    };
    select_replace_from(table, pattern, start, 0, start_safety(table))
}

fn select_replace_from<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    start: usize,
    mut acc: isize,
    safety: Safety,
) -> MutateOutcome<T> {
    let (_, step) = walk(table, pattern, start, TRAP_BUDGET, |record| {
        match pattern.replace(record) {
            Some(new_record) => {
                acc += 1;
                MatchAction::Replace(new_record)
            }
            None => MatchAction::Keep,
        }
    });
    match step {
        WalkStep::Finished => MutateOutcome::Done(acc),
        WalkStep::Trapped { next_slot } => MutateOutcome::Trapped(
            acc,
            Continuation {
                tid: table.tid,
                slot_ix: next_slot,
                chunk_limit: None,
                accumulator: Accumulator::Mutate(acc),
                safety,
                op: OperatorKind::Replace,
            },
        ),
    }
}

pub(crate) fn select_replace_continue<T: Term>(
    table: &Table<T>,
    pattern: &dyn MatchSpec<T>,
    cont: Continuation<T>,
) -> TableResult<MutateOutcome<T>> {
    validate(table, &cont, OperatorKind::Replace)?;
    let acc = match cont.accumulator {
        Accumulator::Mutate(n) => n,
        _ => return Err(Error::BadParam),
    };
    Ok(select_replace_from(table, pattern, cont.slot_ix, acc, cont.safety))
}

fn validate<T: Term>(table: &Table<T>, cont: &Continuation<T>, expected: OperatorKind) -> TableResult<()> {
    if cont.tid != table.tid || cont.op != expected {
        return Err(Error::BadParam);
    }
    let nactive = table.linhash.read().nactive;
    if cont.slot_ix >= nactive {
        return Err(Error::BadParam);
    }
    Ok(())
}

/// Bulk pseudo-delete used by `delete_all_objects` while fixed: logs one
/// "all buckets" record and walks buckets in bounded chunks via the same
/// trap mechanism, without needing a pattern at all.
pub(crate) fn mark_all_deleted<T: Term>(table: &Table<T>) -> isize {
    let mut total = 0isize;
    let mut slot = 0usize;
    loop {
        let nactive = table.linhash.read().nactive;
        if slot >= nactive {
            break;
        }
        let mut linhash = table.linhash.write();
        let end = (slot + TRAP_BUDGET).min(linhash.nactive);
        for s in slot..end {
            // SAFETY: `linhash.write()` above excludes every stripe-based
            // access to slot `s`.
            let bucket = unsafe { linhash.segments.bucket_mut(s) };
            let mut cur = bucket.head.as_mut();
            while let Some(node) = cur {
                if !node.pseudo_deleted {
                    node.pseudo_deleted = true;
                    total += 1;
                    table
                        .total_items
                        .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                }
                cur = node.next.as_mut();
            }
        }
        slot = end;
    }
    table.fixation.log_all();
    total
}
