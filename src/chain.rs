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

//! C4: bucket chain operations (insert/erase/take/get_element) across all
//! four semantic modes. Everything here runs under the stripe write (or
//! read, for lookups) lock already held by the caller; nothing here blocks.

use crate::{
    entry::{rebuild_chain, take_chain, Bucket, EntryNode},
    error::{Error, TableResult},
    options::Semantics,
    term::{Record, Term},
};

/// Net change in live item count plus any nodes that must be freed once the
/// stripe lock is released (freeing while the chain is pinned under lock is
/// unnecessary work held inside a critical section).
pub(crate) struct ChainDelta<T: Term> {
    pub(crate) count_delta: isize,
    pub(crate) freed: Vec<Box<EntryNode<T>>>,
}

impl<T: Term> ChainDelta<T> {
    fn new() -> Self {
        Self {
            count_delta: 0,
            freed: Vec::new(),
        }
    }
}

/// Insert `record` into `bucket` under `semantics`, keyed by `record[keypos
/// - 1]`. `hash` is the already-computed hash of the key. `fixed` selects
/// pseudo-deletion-aware resurrection bookkeeping — insert never itself
/// produces a pseudo-deletion, but a BAG/SET resurrection of a
/// pseudo-deleted sibling must be able to happen regardless of fixation.
///
/// Returns the net item-count delta (0 or +1) on success.
pub(crate) fn insert<T: Term>(
    bucket: &mut Bucket<T>,
    semantics: Semantics,
    keypos: usize,
    hash: u32,
    record: Record<T>,
) -> TableResult<isize> {
    match semantics {
        Semantics::Set | Semantics::SetUniqueFailOnClash => {
            insert_unique(bucket, semantics, keypos, hash, record)
        }
        Semantics::Bag => Ok(insert_bag(bucket, keypos, hash, record, true)),
        Semantics::Dbag => Ok(insert_bag(bucket, keypos, hash, record, false)),
    }
}

fn insert_unique<T: Term>(
    bucket: &mut Bucket<T>,
    semantics: Semantics,
    keypos: usize,
    hash: u32,
    record: Record<T>,
) -> TableResult<isize> {
    let key = &record[keypos - 1];
    let mut cur = bucket.head.as_mut();
    while let Some(node) = cur {
        if node.hash == hash && node.key(keypos) == key {
            if node.pseudo_deleted {
                node.pseudo_deleted = false;
                node.record = record;
                return Ok(1);
            }
            if semantics.fail_on_clash() {
                return Err(Error::BadKey);
            }
            node.record = record;
            return Ok(0);
        }
        cur = node.next.as_mut();
    }
    let new_head = EntryNode::new(hash, record, bucket.head.take());
    bucket.head = Some(new_head);
    Ok(1)
}

/// Shared BAG/DBAG insert. `suppress_duplicates` distinguishes BAG (true,
/// structural-equality check against the whole key-group) from DBAG
/// (false, always append).
fn insert_bag<T: Term>(
    bucket: &mut Bucket<T>,
    keypos: usize,
    hash: u32,
    record: Record<T>,
    suppress_duplicates: bool,
) -> isize {
    let key = &record[keypos - 1];

    if suppress_duplicates {
        let mut nodes = take_chain(bucket);
        let mut found_at = None;
        for (i, node) in nodes.iter().enumerate() {
            if node.hash == hash && node.key(keypos) == key && node.record == record {
                found_at = Some(i);
                break;
            }
        }
        let delta;
        if let Some(i) = found_at {
            let mut node = nodes.remove(i);
            let was_deleted = node.pseudo_deleted;
            node.pseudo_deleted = false;
            delta = if was_deleted { 1 } else { 0 };
            // move to front of key-group: find key-group head position
            let insert_at = key_group_insert_point(&nodes, keypos, hash, key);
            nodes.insert(insert_at, node);
        } else {
            let node = EntryNode::new(hash, record, None);
            let insert_at = key_group_insert_point(&nodes, keypos, hash, key);
            nodes.insert(insert_at, node);
            delta = 1;
        }
        bucket.head = rebuild_chain(nodes);
        delta
    } else {
        let mut nodes = take_chain(bucket);
        let node = EntryNode::new(hash, record, None);
        let insert_at = key_group_insert_point(&nodes, keypos, hash, key);
        nodes.insert(insert_at, node);
        bucket.head = rebuild_chain(nodes);
        1
    }
}

/// Position (in head-first `Vec` order) immediately after the key-group's
/// head, i.e. right after the first entry sharing `key`; if no entry shares
/// the key, the very front (entries are inserted at chain head when a key
/// is new, per the unique-mode rule, so a new key's only entry becomes its
/// own head).
fn key_group_insert_point<T: Term>(
    nodes: &[Box<EntryNode<T>>],
    keypos: usize,
    hash: u32,
    key: &T,
) -> usize {
    match nodes
        .iter()
        .position(|n| n.hash == hash && n.key(keypos) == key)
    {
        Some(head_ix) => head_ix + 1,
        None => 0,
    }
}

/// Erase every live entry keyed by `key`; if `fixed`, pseudo-delete instead
/// of unlinking and ask the caller to log the bucket in the deferred-delete
/// log. Returns the net count delta (always <= 0) and any freed nodes.
pub(crate) fn erase_by_key<T: Term>(
    bucket: &mut Bucket<T>,
    keypos: usize,
    hash: u32,
    key: &T,
    fixed: bool,
) -> ChainDelta<T> {
    erase_where(bucket, fixed, |node| node.hash == hash && node.key(keypos) == key)
}

/// As [`erase_by_key`] but driven by an arbitrary predicate instead of a
/// fixed key. For BAG semantics the caller's predicate should report `false`
/// once it has already accepted one match (e.g. by closing over a `done`
/// flag), since this function removes every node the predicate accepts; for
/// DBAG the predicate may accept the whole key-group.
pub(crate) fn erase_matching<T: Term>(
    bucket: &mut Bucket<T>,
    fixed: bool,
    predicate: impl FnMut(&EntryNode<T>) -> bool,
) -> ChainDelta<T> {
    erase_where(bucket, fixed, predicate)
}

fn erase_where<T: Term>(
    bucket: &mut Bucket<T>,
    fixed: bool,
    mut predicate: impl FnMut(&EntryNode<T>) -> bool,
) -> ChainDelta<T> {
    let mut delta = ChainDelta::new();
    if fixed {
        let mut cur = bucket.head.as_mut();
        while let Some(node) = cur {
            if !node.pseudo_deleted && predicate(node) {
                node.pseudo_deleted = true;
                delta.count_delta -= 1;
            }
            cur = node.next.as_mut();
        }
    } else {
        let nodes = take_chain(bucket);
        let mut kept = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !node.pseudo_deleted && predicate(&node) {
                delta.count_delta -= 1;
                delta.freed.push(node);
            } else {
                kept.push(node);
            }
        }
        bucket.head = rebuild_chain(kept);
    }
    delta
}

/// Remove and return every live entry sharing `key` (same fixation-aware
/// policy as erase). Order among the returned entries matches chain order.
pub(crate) fn take_by_key<T: Term>(
    bucket: &mut Bucket<T>,
    keypos: usize,
    hash: u32,
    key: &T,
    fixed: bool,
) -> (Vec<Record<T>>, ChainDelta<T>) {
    let mut delta = ChainDelta::new();
    let mut taken = Vec::new();
    if fixed {
        let mut cur = bucket.head.as_mut();
        while let Some(node) = cur {
            if !node.pseudo_deleted && node.hash == hash && node.key(keypos) == key {
                node.pseudo_deleted = true;
                delta.count_delta -= 1;
                taken.push(node.record.clone());
            }
            cur = node.next.as_mut();
        }
    } else {
        let nodes = take_chain(bucket);
        let mut kept = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !node.pseudo_deleted && node.hash == hash && node.key(keypos) == key {
                delta.count_delta -= 1;
                taken.push(node.record.clone());
                delta.freed.push(node);
            } else {
                kept.push(node);
            }
        }
        bucket.head = rebuild_chain(kept);
    }
    (taken, delta)
}

/// Materialize field `pos` (1-based) across every live entry sharing `key`.
/// For SET/SET_UNIQUE_FAIL_ON_CLASH there is at most one such entry; for
/// BAG/DBAG this may be a list spanning the whole key-group, in chain
/// order.
pub(crate) fn get_element<T: Term>(
    bucket: &Bucket<T>,
    keypos: usize,
    hash: u32,
    key: &T,
    pos: usize,
) -> TableResult<Vec<T>> {
    let mut out = Vec::new();
    let mut cur = bucket.head.as_deref();
    while let Some(node) = cur {
        if !node.pseudo_deleted && node.hash == hash && node.key(keypos) == key {
            let field = node
                .record
                .get(pos - 1)
                .cloned()
                .ok_or(Error::BadItem)?;
            out.push(field);
        }
        cur = node.next.as_deref();
    }
    Ok(out)
}

/// Collect every live record sharing `key`, in chain order.
pub(crate) fn lookup<T: Term>(bucket: &Bucket<T>, keypos: usize, hash: u32, key: &T) -> Vec<Record<T>> {
    let mut out = Vec::new();
    let mut cur = bucket.head.as_deref();
    while let Some(node) = cur {
        if !node.pseudo_deleted && node.hash == hash && node.key(keypos) == key {
            out.push(node.record.clone());
        }
        cur = node.next.as_deref();
    }
    out
}

/// `true` if any live entry under `key` exists.
pub(crate) fn member<T: Term>(bucket: &Bucket<T>, keypos: usize, hash: u32, key: &T) -> bool {
    let mut cur = bucket.head.as_deref();
    while let Some(node) = cur {
        if !node.pseudo_deleted && node.hash == hash && node.key(keypos) == key {
            return true;
        }
        cur = node.next.as_deref();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(k: i32, v: &str) -> Record<String> {
        crate::term::record([k.to_string(), v.to_string()])
    }

    #[test]
    fn set_overwrites_live_entry() {
        let mut b = Bucket::new();
        insert(&mut b, Semantics::Set, 1, 7, rec(1, "a")).unwrap();
        insert(&mut b, Semantics::Set, 1, 7, rec(1, "b")).unwrap();
        let got = lookup(&b, 1, 7, &"1".to_string());
        assert_eq!(got.len(), 1);
        assert_eq!(&*got[0], &[String::from("1"), String::from("b")][..]);
    }

    #[test]
    fn set_unique_fail_on_clash_rejects_second_insert() {
        let mut b = Bucket::new();
        insert(&mut b, Semantics::SetUniqueFailOnClash, 1, 7, rec(1, "a")).unwrap();
        let err = insert(&mut b, Semantics::SetUniqueFailOnClash, 1, 7, rec(1, "b")).unwrap_err();
        assert_eq!(err, Error::BadKey);
    }

    #[test]
    fn bag_suppresses_structural_duplicate_but_keeps_distinct() {
        let mut b = Bucket::new();
        insert(&mut b, Semantics::Bag, 1, 7, rec(1, "a")).unwrap();
        insert(&mut b, Semantics::Bag, 1, 7, rec(1, "b")).unwrap();
        insert(&mut b, Semantics::Bag, 1, 7, rec(1, "a")).unwrap();
        let got = lookup(&b, 1, 7, &"1".to_string());
        assert_eq!(got.len(), 2);
        assert_eq!(&*got[0], &[String::from("1"), String::from("a")][..]);
        assert_eq!(&*got[1], &[String::from("1"), String::from("b")][..]);
    }

    #[test]
    fn dbag_keeps_identical_duplicates() {
        let mut b = Bucket::new();
        insert(&mut b, Semantics::Dbag, 1, 7, rec(1, "a")).unwrap();
        insert(&mut b, Semantics::Dbag, 1, 7, rec(1, "a")).unwrap();
        let got = lookup(&b, 1, 7, &"1".to_string());
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn erase_by_key_removes_all_live_entries_under_key() {
        let mut b = Bucket::new();
        insert(&mut b, Semantics::Bag, 1, 7, rec(1, "a")).unwrap();
        insert(&mut b, Semantics::Bag, 1, 7, rec(1, "b")).unwrap();
        let delta = erase_by_key(&mut b, 1, 7, &"1".to_string(), false);
        assert_eq!(delta.count_delta, -2);
        assert_eq!(delta.freed.len(), 2);
        assert!(lookup(&b, 1, 7, &"1".to_string()).is_empty());
    }

    #[test]
    fn erase_under_fixation_pseudo_deletes_instead_of_freeing() {
        let mut b = Bucket::new();
        insert(&mut b, Semantics::Set, 1, 7, rec(1, "a")).unwrap();
        let delta = erase_by_key(&mut b, 1, 7, &"1".to_string(), true);
        assert_eq!(delta.count_delta, -1);
        assert!(delta.freed.is_empty());
        assert!(lookup(&b, 1, 7, &"1".to_string()).is_empty());
        assert_eq!(b.live_len(), 0);
    }

    #[test]
    fn resurrection_of_pseudo_deleted_set_entry_reoccupies_slot() {
        let mut b = Bucket::new();
        insert(&mut b, Semantics::Set, 1, 7, rec(1, "a")).unwrap();
        erase_by_key(&mut b, 1, 7, &"1".to_string(), true);
        let delta = insert(&mut b, Semantics::Set, 1, 7, rec(1, "c")).unwrap();
        assert_eq!(delta, 1);
        assert_eq!(b.live_len(), 1);
        let got = lookup(&b, 1, 7, &"1".to_string());
        assert_eq!(&*got[0], &[String::from("1"), String::from("c")][..]);
    }

    #[test]
    fn take_by_key_returns_and_clears_key_group() {
        let mut b = Bucket::new();
        insert(&mut b, Semantics::Bag, 1, 7, rec(1, "a")).unwrap();
        insert(&mut b, Semantics::Bag, 1, 7, rec(1, "b")).unwrap();
        let (taken, delta) = take_by_key(&mut b, 1, 7, &"1".to_string(), false);
        assert_eq!(taken.len(), 2);
        assert_eq!(delta.count_delta, -2);
        assert!(lookup(&b, 1, 7, &"1".to_string()).is_empty());
    }

    #[test]
    fn get_element_out_of_range_is_baditem() {
        let b = {
            let mut b = Bucket::new();
            insert(&mut b, Semantics::Set, 1, 7, rec(1, "a")).unwrap();
            b
        };
        let err = get_element(&b, 1, 7, &"1".to_string(), 5).unwrap_err();
        assert_eq!(err, Error::BadItem);
    }
}
