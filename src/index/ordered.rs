//! Ordered index over position ids.
//!
//! An ascending-key doubly linked list stored as a slot map from id to
//! node, with id 0 as the nil sentinel for head/tail/prev/next. Two
//! instances exist in the protocol: the liquidation index (key =
//! debt-to-collateral ratio, tail is the riskiest position) and the
//! redemption index (key = fee weight, head is the cheapest to redeem).
//!
//! `upsert` takes an advisory "near spot" neighbor id. A usable hint turns
//! insertion into a short local walk; an absent or unusable hint falls back
//! to a boundary scan from the head.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Sentinel id marking the ends of the chain
pub const NIL: u64 = 0;

/// A single chain node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Ordering key (1e18-scaled ratio or weight)
    pub key: u128,
    /// Previous id toward the head, NIL at the head
    pub prev: u64,
    /// Next id toward the tail, NIL at the tail
    pub next: u64,
}

/// Ascending-key doubly linked ranking structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderedIndex {
    nodes: HashMap<u64, Node>,
    head: u64,
    tail: u64,
}

impl OrderedIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// First id in ascending key order, NIL when empty
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Last id in ascending key order, NIL when empty
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Node for an id, if present
    pub fn get(&self, id: u64) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Whether the id has a node
    pub fn contains(&self, id: u64) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert or relocate `id` so the chain stays in ascending key order.
    ///
    /// The new node lands before the first node (head to tail) whose key is
    /// greater than or equal to `key`, so equal keys keep the newcomer ahead
    /// of incumbents. `near_spot_hint` is advisory: when it names a live
    /// node other than `id` itself, the walk starts there; otherwise the
    /// scan starts from the head.
    pub fn upsert(&mut self, id: u64, key: u128, near_spot_hint: u64) -> Result<()> {
        if id == NIL {
            return Err(Error::InvalidParameter {
                name: "id".into(),
                reason: "index ids must be non-zero".into(),
            });
        }

        // Relocation detaches first so the scan never sees the stale node.
        if self.nodes.contains_key(&id) {
            self.detach(id);
        }

        let spot = self.find_spot(key, near_spot_hint, id);
        self.insert_before(id, key, spot);
        Ok(())
    }

    /// Remove `id`, relinking its neighbors. Not idempotent: removing an
    /// absent id fails `NodeNotFound`.
    pub fn remove(&mut self, id: u64) -> Result<Node> {
        if !self.nodes.contains_key(&id) {
            return Err(Error::NodeNotFound(id));
        }
        let node = self.detach(id);
        self.nodes.remove(&id);
        Ok(node)
    }

    /// Ids in ascending key order
    pub fn iter_ids(&self) -> impl Iterator<Item = u64> + '_ {
        let mut current = self.head;
        std::iter::from_fn(move || {
            if current == NIL {
                return None;
            }
            let id = current;
            current = self.nodes.get(&id).map(|n| n.next).unwrap_or(NIL);
            Some(id)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Find the id the new node should be inserted before (NIL = append at
    /// the tail): the first node whose key is >= `key`.
    fn find_spot(&self, key: u128, hint: u64, skip: u64) -> u64 {
        let start = if hint != NIL && hint != skip && self.nodes.contains_key(&hint) {
            hint
        } else {
            self.head
        };
        if start == NIL {
            return NIL;
        }

        let start_key = self.nodes[&start].key;
        if start_key >= key {
            // Walk toward the head past every node with key >= `key`.
            let mut spot = start;
            let mut prev = self.nodes[&spot].prev;
            while prev != NIL && self.nodes[&prev].key >= key {
                spot = prev;
                prev = self.nodes[&spot].prev;
            }
            spot
        } else {
            // Walk toward the tail to the first node with key >= `key`.
            let mut current = self.nodes[&start].next;
            while current != NIL && self.nodes[&current].key < key {
                current = self.nodes[&current].next;
            }
            current
        }
    }

    /// Link a fresh node before `spot` (NIL appends at the tail)
    fn insert_before(&mut self, id: u64, key: u128, spot: u64) {
        let (prev, next) = if spot == NIL {
            (self.tail, NIL)
        } else {
            (self.nodes[&spot].prev, spot)
        };

        if let Some(node) = self.nodes.get_mut(&prev) {
            node.next = id;
        } else {
            self.head = id;
        }
        if let Some(node) = self.nodes.get_mut(&next) {
            node.prev = id;
        } else {
            self.tail = id;
        }

        self.nodes.insert(id, Node { key, prev, next });
    }

    /// Unlink a node from the chain, leaving its map entry in place.
    /// Emptying the chain resets head/tail to the sentinel.
    fn detach(&mut self, id: u64) -> Node {
        let node = self.nodes[&id];
        if let Some(prev) = self.nodes.get_mut(&node.prev) {
            prev.next = node.next;
        } else {
            self.head = node.next;
        }
        if let Some(next) = self.nodes.get_mut(&node.next) {
            next.prev = node.prev;
        } else {
            self.tail = node.prev;
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_well_formed(index: &OrderedIndex) {
        let ids: Vec<u64> = index.iter_ids().collect();
        assert_eq!(ids.len(), index.len(), "chain must reach every node");

        let mut prev_id = NIL;
        let mut prev_key = 0u128;
        for id in &ids {
            let node = index.get(*id).unwrap();
            assert_eq!(node.prev, prev_id, "back-link mismatch at {}", id);
            assert!(node.key >= prev_key, "keys must be non-decreasing");
            prev_id = *id;
            prev_key = node.key;
        }
        assert_eq!(index.tail(), prev_id);
        if ids.is_empty() {
            assert_eq!(index.head(), NIL);
            assert_eq!(index.tail(), NIL);
        } else {
            assert_eq!(index.head(), ids[0]);
        }
    }

    #[test]
    fn test_single_insert_is_head_and_tail() {
        let mut index = OrderedIndex::new();
        index.upsert(1, 1, NIL).unwrap();
        assert_eq!(index.head(), 1);
        assert_eq!(index.tail(), 1);
        assert_eq!(index.get(1).unwrap().key, 1);
    }

    #[test]
    fn test_insert_ascending_appends() {
        let mut index = OrderedIndex::new();
        for id in 1..=3u64 {
            index.upsert(id, id as u128, NIL).unwrap();
        }
        assert_eq!(index.head(), 1);
        assert_eq!(index.tail(), 3);
        assert_well_formed(&index);
    }

    #[test]
    fn test_insert_descending_prepends() {
        let mut index = OrderedIndex::new();
        for id in (1..=3u64).rev() {
            index.upsert(id, id as u128, NIL).unwrap();
            assert_eq!(index.head(), id);
        }
        assert_eq!(index.head(), 1);
        assert_eq!(index.tail(), 3);
        assert_well_formed(&index);
    }

    #[test]
    fn test_insert_middle_with_hints() {
        // Mirrors the equal-key fixture: later arrivals with a key equal to
        // an incumbent land before it.
        let mut index = OrderedIndex::new();
        index.upsert(5, 5, NIL).unwrap();
        index.upsert(10, 10, NIL).unwrap();
        index.upsert(15, 15, 5).unwrap();
        index.upsert(14, 15, 5).unwrap();
        index.upsert(9, 10, 15).unwrap();
        index.upsert(4, 5, 15).unwrap();

        assert_eq!(index.head(), 4);
        assert_eq!(index.tail(), 15);
        let expect = [
            (5u64, 4u64, 9u64),
            (10, 9, 14),
            (15, 14, NIL),
            (14, 10, 15),
            (9, 5, 10),
            (4, NIL, 5),
        ];
        for (id, prev, next) in expect {
            let node = index.get(id).unwrap();
            assert_eq!((node.prev, node.next), (prev, next), "node {}", id);
        }
        assert_well_formed(&index);
    }

    #[test]
    fn test_upsert_relocates_to_tail() {
        let mut index = OrderedIndex::new();
        index.upsert(5, 5, NIL).unwrap();
        index.upsert(10, 10, NIL).unwrap();
        index.upsert(15, 15, 5).unwrap();
        index.upsert(14, 15, 5).unwrap();
        index.upsert(9, 10, 15).unwrap();
        index.upsert(4, 5, 15).unwrap();

        index.upsert(4, 100, 15).unwrap();
        assert_eq!(index.head(), 5);
        assert_eq!(index.tail(), 4);
        let node = index.get(4).unwrap();
        assert_eq!((node.prev, node.next), (15, NIL));
        assert_well_formed(&index);
    }

    #[test]
    fn test_remove_relinking() {
        let mut index = OrderedIndex::new();
        index.upsert(5, 5, NIL).unwrap();
        index.upsert(10, 10, NIL).unwrap();
        index.upsert(15, 15, 5).unwrap();
        index.upsert(14, 15, 5).unwrap();
        index.upsert(9, 10, 15).unwrap();
        index.upsert(4, 5, 15).unwrap();

        index.remove(9).unwrap();
        assert_eq!((index.head(), index.tail()), (4, 15));
        index.remove(15).unwrap();
        assert_eq!((index.head(), index.tail()), (4, 14));
        index.remove(4).unwrap();
        assert_eq!((index.head(), index.tail()), (5, 14));
        assert_well_formed(&index);
    }

    #[test]
    fn test_remove_absent_fails() {
        let mut index = OrderedIndex::new();
        index.upsert(1, 1, NIL).unwrap();
        index.remove(1).unwrap();
        assert_eq!(index.remove(1), Err(Error::NodeNotFound(1)));
        assert_eq!(index.head(), NIL);
        assert_eq!(index.tail(), NIL);
    }

    #[test]
    fn test_zero_id_rejected() {
        let mut index = OrderedIndex::new();
        assert!(index.upsert(NIL, 1, NIL).is_err());
    }

    #[test]
    fn test_stale_hint_falls_back() {
        let mut index = OrderedIndex::new();
        index.upsert(1, 10, NIL).unwrap();
        index.upsert(2, 20, NIL).unwrap();
        // hint 99 never existed; hint equal to the moved id is unusable too
        index.upsert(3, 15, 99).unwrap();
        index.upsert(3, 25, 3).unwrap();
        assert_eq!(index.tail(), 3);
        assert_well_formed(&index);
    }

    proptest! {
        #[test]
        fn prop_ordered_under_random_ops(
            ops in prop::collection::vec((1u64..40, 0u128..100, 0u64..40, prop::bool::ANY), 1..200)
        ) {
            let mut index = OrderedIndex::new();
            for (id, key, hint, is_remove) in ops {
                if is_remove {
                    let _ = index.remove(id);
                } else {
                    index.upsert(id, key, hint).unwrap();
                }
                assert_well_formed(&index);
            }
        }
    }
}
