//! Flat Red-Black Tree Map
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::{cmp::Ordering, convert::Infallible, mem};

use alloc::vec::Vec;

use crate::{
    node::{image_size, Node, RawTree, TreeHeader, BLACK, RED},
    Error, IndexWidth, Result,
};

/// Default slot capacity of a newly constructed tree.
pub const DEFAULT_CAPACITY: u64 = 256;

/// Predicate match rate below which a bulk delete issues point deletes.
pub const SPARSE_DELETE_RATE: f64 = 0.25;

/// Predicate match rate at or above which a bulk delete rebuilds the tree
/// from the surviving pairs instead of deleting one by one.
pub const REBUILD_DELETE_RATE: f64 = 0.5;

/// An ordered map from `K` to `V`, stored as a red-black tree whose nodes
/// occupy a single contiguous allocation indexed by `W`.
///
/// Live slots are kept dense in `[0, len)`: deleting a pair moves the last
/// live slot into the hole and rewrites its neighbors' links, so unordered
/// scans touch exactly `len` consecutive records. The allocation doubles when
/// full, up to the width's maximum count, and the whole region can be viewed
/// as a serializable byte image (see [`as_bytes`](Rbt::as_bytes)).
///
/// Keys are unique; inserting an existing key overwrites its value. Every
/// slot, live or reserved, holds a constructed key and value, which is why
/// `K` and `V` require [`Default`].
pub struct Rbt<K, V, W: IndexWidth = u32> {
    raw: RawTree<K, V, W>,
}

/// A tree limited to 65535 pairs, with 16-bit links.
pub type Rbt16<K, V> = Rbt<K, V, u16>;
/// A tree limited to 4294967295 pairs, with 32-bit links.
pub type Rbt32<K, V> = Rbt<K, V, u32>;
/// A tree with 64-bit links, limited only by memory.
pub type Rbt64<K, V> = Rbt<K, V, u64>;

impl<K, V, W: IndexWidth> Rbt<K, V, W> {
    pub(crate) const NIL: u64 = W::MAX_COUNT;

    /// Returns the number of key-value pairs in the tree.
    pub fn len(&self) -> usize {
        self.raw.header().live_count as usize
    }

    /// Indicates whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.raw.header().live_count == 0
    }

    /// Returns the number of node slots in the backing allocation.
    pub fn capacity(&self) -> u64 {
        self.raw.header().capacity
    }

    /// Returns the bit width of the link indices (16, 32, or 64).
    pub fn index_width(&self) -> u32 {
        W::BITS
    }

    /// Returns how many more pairs the width can address beyond the current
    /// count.
    pub fn available(&self) -> u64 {
        W::MAX_COUNT - self.raw.header().live_count
    }

    pub(crate) fn node(&self, index: u64) -> &Node<K, V, W> {
        &self.raw.slots()[index as usize]
    }

    fn node_mut(&mut self, index: u64) -> &mut Node<K, V, W> {
        &mut self.raw.slots_mut()[index as usize]
    }

    pub(crate) fn root_index(&self) -> u64 {
        self.raw.header().root_index
    }

    fn set_root(&mut self, index: u64) {
        self.raw.header_mut().root_index = index;
    }

    fn parent_of(&self, index: u64) -> u64 {
        self.node(index).parent.to_u64()
    }

    fn left_of(&self, index: u64) -> u64 {
        self.node(index).left.to_u64()
    }

    fn right_of(&self, index: u64) -> u64 {
        self.node(index).right.to_u64()
    }

    fn set_parent(&mut self, index: u64, parent: u64) {
        self.node_mut(index).parent = W::from_u64(parent);
    }

    fn set_left(&mut self, index: u64, left: u64) {
        self.node_mut(index).left = W::from_u64(left);
    }

    fn set_right(&mut self, index: u64, right: u64) {
        self.node_mut(index).right = W::from_u64(right);
    }

    /// NIL reads as Black.
    fn is_red(&self, index: u64) -> bool {
        index != Self::NIL && self.node(index).color == RED
    }

    fn set_color(&mut self, index: u64, color: u32) {
        self.node_mut(index).color = color;
    }

    pub(crate) fn pair_at(&self, index: u64) -> Option<(&K, &V)> {
        if index == Self::NIL {
            return None;
        }
        let node = self.node(index);
        Some((&node.key, &node.value))
    }

    /// Index of the leftmost slot under `from`, or NIL.
    pub(crate) fn min_index(&self, from: u64) -> u64 {
        if from == Self::NIL {
            return Self::NIL;
        }
        let mut current = from;
        while self.left_of(current) != Self::NIL {
            current = self.left_of(current);
        }
        current
    }

    /// Index of the rightmost slot under `from`, or NIL.
    pub(crate) fn max_index(&self, from: u64) -> u64 {
        if from == Self::NIL {
            return Self::NIL;
        }
        let mut current = from;
        while self.right_of(current) != Self::NIL {
            current = self.right_of(current);
        }
        current
    }

    /// Index of the in-order successor of `index`, or NIL past the maximum.
    pub(crate) fn next_in_order(&self, index: u64) -> u64 {
        let right = self.right_of(index);
        if right != Self::NIL {
            return self.min_index(right);
        }
        let mut current = index;
        loop {
            let parent = self.parent_of(current);
            if parent == Self::NIL {
                return Self::NIL;
            }
            if self.right_of(parent) != current {
                return parent;
            }
            current = parent;
        }
    }

    /// Index of the in-order predecessor of `index`, or NIL before the minimum.
    pub(crate) fn prev_in_order(&self, index: u64) -> u64 {
        let left = self.left_of(index);
        if left != Self::NIL {
            return self.max_index(left);
        }
        let mut current = index;
        loop {
            let parent = self.parent_of(current);
            if parent == Self::NIL {
                return Self::NIL;
            }
            if self.left_of(parent) != current {
                return parent;
            }
            current = parent;
        }
    }

    /// Mutable references to two distinct slots.
    fn slot_pair_mut(&mut self, a: u64, b: u64) -> (&mut Node<K, V, W>, &mut Node<K, V, W>) {
        debug_assert_ne!(a, b);
        let slots = self.raw.slots_mut();
        if a < b {
            let (low, high) = slots.split_at_mut(b as usize);
            (&mut low[a as usize], &mut high[0])
        } else {
            let (low, high) = slots.split_at_mut(a as usize);
            (&mut high[0], &mut low[b as usize])
        }
    }

    /// Rotates the subtree at `index` to the left and relinks its parent (or
    /// the root) to the risen right child.
    fn rotate_left(&mut self, index: u64) {
        let rising = self.right_of(index);
        debug_assert_ne!(rising, Self::NIL);
        let inner = self.left_of(rising);
        self.set_right(index, inner);
        if inner != Self::NIL {
            self.set_parent(inner, index);
        }
        let parent = self.parent_of(index);
        self.set_parent(rising, parent);
        if parent == Self::NIL {
            self.set_root(rising);
        } else if self.left_of(parent) == index {
            self.set_left(parent, rising);
        } else {
            self.set_right(parent, rising);
        }
        self.set_left(rising, index);
        self.set_parent(index, rising);
    }

    /// Mirror of [`rotate_left`](Self::rotate_left).
    fn rotate_right(&mut self, index: u64) {
        let rising = self.left_of(index);
        debug_assert_ne!(rising, Self::NIL);
        let inner = self.right_of(rising);
        self.set_left(index, inner);
        if inner != Self::NIL {
            self.set_parent(inner, index);
        }
        let parent = self.parent_of(index);
        self.set_parent(rising, parent);
        if parent == Self::NIL {
            self.set_root(rising);
        } else if self.left_of(parent) == index {
            self.set_left(parent, rising);
        } else {
            self.set_right(parent, rising);
        }
        self.set_right(rising, index);
        self.set_parent(index, rising);
    }

    /// Restores the red-black properties after a fresh Red leaf was linked in.
    fn fixup_insert(&mut self, mut current: u64) {
        loop {
            let parent = self.parent_of(current);
            if parent == Self::NIL {
                self.set_color(current, BLACK);
                return;
            }
            if !self.is_red(parent) {
                return;
            }
            // A red parent is never the root, so the grandparent exists.
            let grand = self.parent_of(parent);
            debug_assert_ne!(grand, Self::NIL);
            let parent_is_left = self.left_of(grand) == parent;
            let uncle = if parent_is_left { self.right_of(grand) } else { self.left_of(grand) };
            if self.is_red(uncle) {
                self.set_color(parent, BLACK);
                self.set_color(uncle, BLACK);
                self.set_color(grand, RED);
                current = grand;
                continue;
            }
            if parent_is_left {
                if current == self.right_of(parent) {
                    // The grand->parent->current path bends; straighten at the
                    // parent first, then the single rotation below applies.
                    self.rotate_left(parent);
                    self.rotate_right(grand);
                    self.set_color(current, BLACK);
                } else {
                    self.rotate_right(grand);
                    self.set_color(parent, BLACK);
                }
            } else if current == self.left_of(parent) {
                self.rotate_right(parent);
                self.rotate_left(grand);
                self.set_color(current, BLACK);
            } else {
                self.rotate_left(grand);
                self.set_color(parent, BLACK);
            }
            self.set_color(grand, RED);
            return;
        }
    }

    /// Repairs the double-black introduced by unlinking a Black node.
    /// `current` is the slot that replaced it (possibly NIL) and `parent` its
    /// parent at that position.
    fn fixup_delete(&mut self, mut current: u64, mut parent: u64) {
        while parent != Self::NIL && !self.is_red(current) {
            if current == self.left_of(parent) {
                let mut sibling = self.right_of(parent);
                debug_assert_ne!(sibling, Self::NIL);
                if self.is_red(sibling) {
                    self.set_color(sibling, BLACK);
                    self.set_color(parent, RED);
                    self.rotate_left(parent);
                    sibling = self.right_of(parent);
                }
                if !self.is_red(self.left_of(sibling)) && !self.is_red(self.right_of(sibling)) {
                    self.set_color(sibling, RED);
                    current = parent;
                    parent = self.parent_of(current);
                } else {
                    if !self.is_red(self.right_of(sibling)) {
                        self.set_color(self.left_of(sibling), BLACK);
                        self.set_color(sibling, RED);
                        self.rotate_right(sibling);
                        sibling = self.right_of(parent);
                    }
                    let parent_color = self.node(parent).color;
                    self.set_color(sibling, parent_color);
                    self.set_color(parent, BLACK);
                    self.set_color(self.right_of(sibling), BLACK);
                    self.rotate_left(parent);
                    current = self.root_index();
                    parent = Self::NIL;
                }
            } else {
                let mut sibling = self.left_of(parent);
                debug_assert_ne!(sibling, Self::NIL);
                if self.is_red(sibling) {
                    self.set_color(sibling, BLACK);
                    self.set_color(parent, RED);
                    self.rotate_right(parent);
                    sibling = self.left_of(parent);
                }
                if !self.is_red(self.left_of(sibling)) && !self.is_red(self.right_of(sibling)) {
                    self.set_color(sibling, RED);
                    current = parent;
                    parent = self.parent_of(current);
                } else {
                    if !self.is_red(self.left_of(sibling)) {
                        self.set_color(self.right_of(sibling), BLACK);
                        self.set_color(sibling, RED);
                        self.rotate_left(sibling);
                        sibling = self.left_of(parent);
                    }
                    let parent_color = self.node(parent).color;
                    self.set_color(sibling, parent_color);
                    self.set_color(parent, BLACK);
                    self.set_color(self.left_of(sibling), BLACK);
                    self.rotate_right(parent);
                    current = self.root_index();
                    parent = Self::NIL;
                }
            }
        }
        if current != Self::NIL {
            self.set_color(current, BLACK);
        }
    }
}

impl<K: Ord + Default, V: Default, W: IndexWidth> Rbt<K, V, W> {
    /// Creates an empty tree with the default capacity.
    ///
    /// Aborts the process if the backing allocation cannot be obtained, like
    /// any infallible collection constructor. Use
    /// [`with_capacity`](Self::with_capacity) to observe allocation failure.
    pub fn new() -> Self {
        Rbt { raw: RawTree::must_allocate(DEFAULT_CAPACITY.min(W::MAX_COUNT)) }
    }

    /// Creates an empty tree with at least `capacity` node slots (minimum 1).
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`](Error::CapacityExceeded) if `capacity`
    /// exceeds the width's maximum count, or [`AllocFail`](Error::AllocFail)
    /// if the allocation cannot be obtained.
    pub fn with_capacity(capacity: u64) -> Result<Self> {
        if capacity > W::MAX_COUNT {
            return Err(Error::CapacityExceeded);
        }
        Ok(Rbt { raw: RawTree::allocate(capacity.max(1))? })
    }

    /// Inserts a key-value pair, overwriting the value if the key is present.
    ///
    /// A fresh pair always lands in the slot just past the live region; the
    /// backing doubles (clamped to the width's maximum) when full. On any
    /// failure the tree is unchanged.
    ///
    /// # Time Complexity
    ///
    /// O(log n), amortized over growth.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`](Error::CapacityExceeded) once the width's
    /// maximum count is reached, or [`AllocFail`](Error::AllocFail) if growth
    /// fails.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let (index, existing) = self.locate_or_insert(key, value)?;
        if let Some(value) = existing {
            self.node_mut(index).value = value;
        }
        Ok(())
    }

    /// Returns a mutable reference to the value bound to `key`, inserting a
    /// default value first if the key is absent.
    ///
    /// # Errors
    ///
    /// Fails only when an insertion is needed and no slot is available; see
    /// [`insert`](Self::insert).
    pub fn entry(&mut self, key: K) -> Result<&mut V> {
        let (index, _) = self.locate_or_insert(key, V::default())?;
        Ok(&mut self.node_mut(index).value)
    }

    /// Descends to `key`, linking and fixing up a fresh Red leaf holding
    /// `value` if the key is absent. Returns the slot index, plus `value`
    /// back again when an existing slot was found instead.
    fn locate_or_insert(&mut self, key: K, value: V) -> Result<(u64, Option<V>)> {
        if self.is_empty() {
            let root = self.new_slot(Self::NIL, key, value)?;
            self.set_color(root, BLACK);
            self.set_root(root);
            return Ok((root, None));
        }
        let mut current = self.root_index();
        loop {
            let ordering = key.cmp(&self.node(current).key);
            match ordering {
                Ordering::Less => {
                    let left = self.left_of(current);
                    if left == Self::NIL {
                        let leaf = self.new_slot(current, key, value)?;
                        self.set_left(current, leaf);
                        self.fixup_insert(leaf);
                        return Ok((leaf, None));
                    }
                    current = left;
                }
                Ordering::Greater => {
                    let right = self.right_of(current);
                    if right == Self::NIL {
                        let leaf = self.new_slot(current, key, value)?;
                        self.set_right(current, leaf);
                        self.fixup_insert(leaf);
                        return Ok((leaf, None));
                    }
                    current = right;
                }
                Ordering::Equal => return Ok((current, Some(value))),
            }
        }
    }

    /// Claims the slot at the end of the live region for a fresh Red leaf,
    /// growing the backing first when it is full.
    fn new_slot(&mut self, parent: u64, key: K, value: V) -> Result<u64> {
        let live = self.raw.header().live_count;
        let capacity = self.raw.header().capacity;
        if live == W::MAX_COUNT {
            return Err(Error::CapacityExceeded);
        }
        if live == capacity {
            let grown = capacity.saturating_mul(2).min(W::MAX_COUNT);
            log::trace!("growing backing from {capacity} to {grown} slots");
            self.raw.reallocate(grown)?;
        }
        let index = live;
        {
            let node = self.node_mut(index);
            node.parent = W::from_u64(parent);
            node.left = W::from_u64(Self::NIL);
            node.right = W::from_u64(Self::NIL);
            node.color = RED;
            node.key = key;
            node.value = value;
        }
        self.raw.header_mut().live_count = live + 1;
        Ok(index)
    }

    /// Looks up `key` and returns its value.
    ///
    /// # Time Complexity
    ///
    /// O(log n), non-allocating.
    pub fn get(&self, key: &K) -> Option<&V> {
        let index = self.find_index(key);
        if index == Self::NIL {
            return None;
        }
        Some(&self.node(index).value)
    }

    /// Returns the pair with the smallest key.
    pub fn min(&self) -> Option<(&K, &V)> {
        self.pair_at(self.min_index(self.root_index()))
    }

    /// Returns the pair with the largest key.
    pub fn max(&self) -> Option<(&K, &V)> {
        self.pair_at(self.max_index(self.root_index()))
    }

    /// Returns the pair with the largest key strictly smaller than `key`.
    pub fn floor(&self, key: &K) -> Option<(&K, &V)> {
        self.pair_at(self.floor_index(key))
    }

    /// Returns the pair with the smallest key strictly greater than `key`.
    pub fn ceiling(&self, key: &K) -> Option<(&K, &V)> {
        self.pair_at(self.ceiling_index(key))
    }

    fn find_index(&self, key: &K) -> u64 {
        let mut current = self.root_index();
        while current != Self::NIL {
            match key.cmp(&self.node(current).key) {
                Ordering::Less => current = self.left_of(current),
                Ordering::Greater => current = self.right_of(current),
                Ordering::Equal => return current,
            }
        }
        Self::NIL
    }

    /// Descends tracking the most recent slot whose key compares strictly
    /// greater, taking the left branch whenever the current key is greater.
    fn ceiling_index(&self, key: &K) -> u64 {
        let mut candidate = Self::NIL;
        let mut current = self.root_index();
        while current != Self::NIL {
            if *key < self.node(current).key {
                candidate = current;
                current = self.left_of(current);
            } else {
                current = self.right_of(current);
            }
        }
        candidate
    }

    fn floor_index(&self, key: &K) -> u64 {
        let mut candidate = Self::NIL;
        let mut current = self.root_index();
        while current != Self::NIL {
            if *key > self.node(current).key {
                candidate = current;
                current = self.right_of(current);
            } else {
                current = self.left_of(current);
            }
        }
        candidate
    }

    /// Deletes the pair bound to `key`. Returns whether the key was present.
    ///
    /// The freed slot is refilled by moving the last live slot into it, so
    /// the live region stays dense; any outstanding slot index from a prior
    /// call is invalidated.
    ///
    /// # Time Complexity
    ///
    /// O(log n), non-allocating.
    pub fn delete(&mut self, key: &K) -> bool {
        let mut target = self.find_index(key);
        if target == Self::NIL {
            return false;
        }
        if self.left_of(target) != Self::NIL && self.right_of(target) != Self::NIL {
            // Two children: the in-order successor takes over the payload and
            // becomes the node to unlink, now with at most one child.
            let successor = self.min_index(self.right_of(target));
            self.swap_payload(target, successor);
            target = successor;
        }
        let left = self.left_of(target);
        let child = if left != Self::NIL { left } else { self.right_of(target) };
        let parent = self.parent_of(target);
        if parent == Self::NIL {
            self.set_root(child);
        } else if self.left_of(parent) == target {
            self.set_left(parent, child);
        } else {
            self.set_right(parent, child);
        }
        if child != Self::NIL {
            self.set_parent(child, parent);
        }
        if !self.is_red(target) {
            self.fixup_delete(child, parent);
        }
        self.compact(target);
        true
    }

    /// Swaps the key and value of two distinct slots, leaving links and
    /// colors in place.
    fn swap_payload(&mut self, a: u64, b: u64) {
        let (first, second) = self.slot_pair_mut(a, b);
        mem::swap(&mut first.key, &mut second.key);
        mem::swap(&mut first.value, &mut second.value);
    }

    /// Keeps the live region dense after slot `freed` was unlinked: the last
    /// live slot moves into the hole and the links of its parent (or the
    /// root) and children are rewritten to the new position. The vacated
    /// slot's payload is reset to the default.
    fn compact(&mut self, freed: u64) {
        let last = self.raw.header().live_count - 1;
        if freed != last {
            let parent = self.parent_of(last);
            let left = self.left_of(last);
            let right = self.right_of(last);
            if parent == Self::NIL {
                self.set_root(freed);
            } else if self.left_of(parent) == last {
                self.set_left(parent, freed);
            } else {
                self.set_right(parent, freed);
            }
            if left != Self::NIL {
                self.set_parent(left, freed);
            }
            if right != Self::NIL {
                self.set_parent(right, freed);
            }
            let (hole, moved) = self.slot_pair_mut(freed, last);
            hole.parent = moved.parent;
            hole.left = moved.left;
            hole.right = moved.right;
            hole.color = moved.color;
            hole.key = mem::take(&mut moved.key);
            hole.value = mem::take(&mut moved.value);
        } else {
            let slot = self.node_mut(freed);
            slot.key = K::default();
            slot.value = V::default();
        }
        self.raw.header_mut().live_count = last;
    }

    /// Destroys all stored pairs, resetting every slot's payload to the
    /// default, without releasing memory. Follow with
    /// [`shrink_to_fit`](Self::shrink_to_fit) to release it.
    pub fn clear(&mut self) {
        for slot in self.raw.slots_mut() {
            slot.key = K::default();
            slot.value = V::default();
        }
        let header = self.raw.header_mut();
        header.live_count = 0;
        header.root_index = W::MAX_COUNT;
    }

    /// Reallocates the backing to exactly `capacity` slots (minimum 1),
    /// move-assigning the live region across.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`](Error::CapacityExceeded) when `capacity`
    /// is below the live count or above the width's maximum, and
    /// [`AllocFail`](Error::AllocFail) if the new allocation cannot be
    /// obtained (the tree is then unchanged).
    pub fn resize(&mut self, capacity: u64) -> Result<()> {
        if capacity < self.raw.header().live_count || capacity > W::MAX_COUNT {
            return Err(Error::CapacityExceeded);
        }
        let capacity = capacity.max(1);
        if capacity == self.capacity() {
            return Ok(());
        }
        log::debug!("resizing backing from {} to {capacity} slots", self.capacity());
        self.raw.reallocate(capacity)
    }

    /// Shrinks the backing to the live count (minimum 1).
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        self.resize(self.raw.header().live_count.max(1))
    }

    /// Rehomes the contents of `other` into this tree, translating every
    /// link index between the two widths. The tree shape and colors carry
    /// over unchanged, so no rebalancing happens.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`](Error::CapacityExceeded) when `other`
    /// holds more pairs than this width can address, or
    /// [`AllocFail`](Error::AllocFail) when the backing must grow and cannot.
    /// On failure this tree is unchanged.
    pub fn transform<W2: IndexWidth>(&mut self, other: &Rbt<K, V, W2>) -> Result<()>
    where
        K: Clone,
        V: Clone,
    {
        let source_live = other.raw.header().live_count;
        if source_live > W::MAX_COUNT {
            return Err(Error::CapacityExceeded);
        }
        if self.capacity() < source_live.max(1) {
            self.raw.reallocate(other.capacity().min(W::MAX_COUNT))?;
        }
        log::debug!("transforming {source_live} pairs from {}-bit into {}-bit links", W2::BITS, W::BITS);
        let old_live = self.raw.header().live_count;
        {
            let source = other.raw.slots();
            let target = self.raw.slots_mut();
            for index in 0..source_live as usize {
                let src = &source[index];
                let dst = &mut target[index];
                dst.parent = W::from_u64(rehome_index::<W2, W>(src.parent.to_u64()));
                dst.left = W::from_u64(rehome_index::<W2, W>(src.left.to_u64()));
                dst.right = W::from_u64(rehome_index::<W2, W>(src.right.to_u64()));
                dst.color = src.color;
                dst.key = src.key.clone();
                dst.value = src.value.clone();
            }
            // Previously live slots past the new count keep only default
            // payloads, like any other reserved slot.
            for slot in target.iter_mut().take(old_live as usize).skip(source_live as usize) {
                slot.key = K::default();
                slot.value = V::default();
            }
        }
        let root = rehome_index::<W2, W>(other.raw.header().root_index);
        let header = self.raw.header_mut();
        header.live_count = source_live;
        header.root_index = root;
        Ok(())
    }

    /// Deletes every pair the predicate matches and returns how many were
    /// removed.
    ///
    /// A counting pre-pass estimates the deletion rate, then one of three
    /// strategies runs: point deletes below [`SPARSE_DELETE_RATE`], an
    /// in-order walk between the thresholds, and a rebuild from the surviving
    /// pairs at or above [`REBUILD_DELETE_RATE`]. If scratch or rebuild
    /// allocation fails, the in-order walk runs instead.
    ///
    /// The predicate may be invoked more than once per pair depending on the
    /// strategy chosen, so predicates with observable side effects will see a
    /// rate-dependent call count.
    pub fn conditional_delete<F>(&mut self, mut predicate: F) -> u64
    where
        K: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        match self.conditional_delete_impl(&mut |key, value| Ok::<_, Infallible>(predicate(key, value))) {
            Ok(count) => count,
            Err(never) => match never {},
        }
    }

    /// Like [`conditional_delete`](Self::conditional_delete) for predicates
    /// that can fail. A predicate error aborts the sweep and surfaces as
    /// [`InvalidPredicate`](Error::InvalidPredicate); pairs already deleted
    /// stay deleted and the tree remains valid.
    pub fn try_conditional_delete<E, F>(&mut self, mut predicate: F) -> Result<u64>
    where
        K: Clone,
        F: FnMut(&K, &V) -> core::result::Result<bool, E>,
    {
        self.conditional_delete_impl(&mut predicate).map_err(|_| Error::InvalidPredicate)
    }

    /// Deletes the first pair, in slot order, that the predicate matches.
    /// Returns 0 or 1.
    pub fn conditional_delete_once<F>(&mut self, mut predicate: F) -> u64
    where
        K: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        for index in 0..self.raw.header().live_count {
            let node = self.node(index);
            if predicate(&node.key, &node.value) {
                let key = node.key.clone();
                return self.delete(&key) as u64;
            }
        }
        0
    }

    fn conditional_delete_impl<E, F>(&mut self, predicate: &mut F) -> core::result::Result<u64, E>
    where
        K: Clone,
        F: FnMut(&K, &V) -> core::result::Result<bool, E>,
    {
        let total = self.raw.header().live_count;
        if total == 0 {
            return Ok(0);
        }
        let mut survivors: Vec<u64> = Vec::new();
        if survivors.try_reserve(total as usize).is_err() {
            log::trace!("conditional delete: scratch allocation failed, walking in order");
            return self.delete_in_order(predicate);
        }
        let mut matched = 0u64;
        for index in 0..total {
            let node = self.node(index);
            if predicate(&node.key, &node.value)? {
                matched += 1;
            } else {
                survivors.push(index);
            }
        }
        if matched == 0 {
            return Ok(0);
        }
        let rate = matched as f64 / total as f64;
        if rate < SPARSE_DELETE_RATE {
            log::trace!("conditional delete: rate {rate:.3}, point deletes");
            self.delete_sparse(predicate)
        } else if rate < REBUILD_DELETE_RATE {
            log::trace!("conditional delete: rate {rate:.3}, in-order walk");
            self.delete_in_order(predicate)
        } else {
            log::trace!("conditional delete: rate {rate:.3}, rebuilding from {} survivors", survivors.len());
            self.delete_by_rebuild(predicate, &survivors)
        }
    }

    /// Sparse strategy: rescan the slot array issuing point deletes. The
    /// compaction after each delete can move a not-yet-visited pair behind
    /// the scan position, so a second pass snapshots any stragglers and
    /// deletes them by key.
    fn delete_sparse<E, F>(&mut self, predicate: &mut F) -> core::result::Result<u64, E>
    where
        K: Clone,
        F: FnMut(&K, &V) -> core::result::Result<bool, E>,
    {
        let mut deleted = 0u64;
        let mut index = 0u64;
        while index < self.raw.header().live_count {
            let node = self.node(index);
            if predicate(&node.key, &node.value)? {
                let key = node.key.clone();
                if self.delete(&key) {
                    deleted += 1;
                }
            }
            index += 1;
        }
        let mut stragglers: Vec<K> = Vec::new();
        for index in 0..self.raw.header().live_count {
            let node = self.node(index);
            if predicate(&node.key, &node.value)? {
                stragglers.push(node.key.clone());
            }
        }
        for key in &stragglers {
            if self.delete(key) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Medium strategy: walk in key order. After a delete the slot indices
    /// are stale, so the walk re-seeks the successor of the deleted key.
    fn delete_in_order<E, F>(&mut self, predicate: &mut F) -> core::result::Result<u64, E>
    where
        K: Clone,
        F: FnMut(&K, &V) -> core::result::Result<bool, E>,
    {
        let mut deleted = 0u64;
        let mut index = self.min_index(self.root_index());
        while index != Self::NIL {
            let node = self.node(index);
            if predicate(&node.key, &node.value)? {
                let key = node.key.clone();
                if self.delete(&key) {
                    deleted += 1;
                }
                index = self.ceiling_index(&key);
            } else {
                index = self.next_in_order(index);
            }
        }
        Ok(deleted)
    }

    /// Heavy strategy: reinsert the surviving pairs into a fresh tree of the
    /// same capacity and replace this one. Falls back to the in-order walk if
    /// the fresh backing cannot be allocated.
    fn delete_by_rebuild<E, F>(&mut self, predicate: &mut F, survivors: &[u64]) -> core::result::Result<u64, E>
    where
        K: Clone,
        F: FnMut(&K, &V) -> core::result::Result<bool, E>,
    {
        let mut fresh = match Self::with_capacity(self.capacity()) {
            Ok(tree) => tree,
            Err(_) => {
                log::trace!("conditional delete: rebuild allocation failed, walking in order");
                return self.delete_in_order(predicate);
            }
        };
        let total = self.raw.header().live_count;
        for &index in survivors {
            let (key, value) = {
                let slot = self.node_mut(index);
                (mem::take(&mut slot.key), mem::take(&mut slot.value))
            };
            fresh.insert(key, value).expect("rebuild target sized to hold every survivor");
        }
        let deleted = total - fresh.raw.header().live_count;
        *self = fresh;
        Ok(deleted)
    }

    /// All keys, in slot order.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.raw.slots()[..self.len()].iter().map(|node| node.key.clone()).collect()
    }

    /// All values, in slot order.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.raw.slots()[..self.len()].iter().map(|node| node.value.clone()).collect()
    }

    /// All pairs, in slot order. Use the ordered cursor for key order.
    pub fn pairs(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.raw.slots()[..self.len()].iter().map(|node| (node.key.clone(), node.value.clone())).collect()
    }
}

/// Maps a link index from one width's representation into another's,
/// carrying the NIL sentinel across.
fn rehome_index<S: IndexWidth, D: IndexWidth>(index: u64) -> u64 {
    if index == S::MAX_COUNT {
        D::MAX_COUNT
    } else {
        index
    }
}

impl<K: Ord + Default + Copy, V: Default + Copy, W: IndexWidth> Rbt<K, V, W> {
    /// The backing allocation viewed as its serialized image: the four-field
    /// header (`live_count`, `root_index`, `capacity`, `index_width`, each
    /// 64-bit) immediately followed by `capacity` slot records, all in native
    /// endianness. Keys and values appear bitwise; portability across
    /// machines is the caller's concern and requires `K` and `V` to have a
    /// stable layout.
    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    /// Adopts `image` as this tree's backing, destroying the current one.
    /// The image must come from a tree of the same index width and the same
    /// key/value layout; use [`transform`](Rbt::transform) to change widths.
    ///
    /// # Errors
    ///
    /// Returns [`WidthMismatch`](Error::WidthMismatch) when the image was
    /// built with a different index width, and
    /// [`AllocFail`](Error::AllocFail) when the adopted backing cannot be
    /// allocated. A structurally impossible header is a caller bug and
    /// panics.
    pub fn set_backing(&mut self, image: &[u8]) -> Result<()> {
        assert!(image.len() >= mem::size_of::<TreeHeader>(), "image too short for a tree header");
        let header = unsafe { core::ptr::read_unaligned(image.as_ptr() as *const TreeHeader) };
        if header.index_width != W::BITS as u64 {
            return Err(Error::WidthMismatch);
        }
        assert!(header.capacity >= 1 && header.capacity <= W::MAX_COUNT, "image capacity out of range");
        assert!(header.live_count <= header.capacity, "image live count exceeds its capacity");
        assert_eq!(image.len(), image_size::<K, V, W>(header.capacity), "image length does not match its header");
        if header.live_count == 0 {
            assert_eq!(header.root_index, W::MAX_COUNT, "empty image carries a root");
        } else {
            assert!(header.root_index < header.live_count, "image root outside the live region");
        }
        let mut fresh: RawTree<K, V, W> = RawTree::allocate(header.capacity)?;
        fresh.bytes_mut().copy_from_slice(image);
        #[cfg(debug_assertions)]
        {
            let live = header.live_count;
            for slot in &fresh.slots()[..live as usize] {
                debug_assert!(slot.color == RED || slot.color == BLACK, "image slot carries an invalid color");
                for link in [slot.parent.to_u64(), slot.left.to_u64(), slot.right.to_u64()] {
                    debug_assert!(link == W::MAX_COUNT || link < live, "image slot carries a dangling link");
                }
            }
        }
        log::debug!("adopted image with {} pairs in {} slots", header.live_count, header.capacity);
        self.raw = fresh;
        Ok(())
    }
}

impl<K: Ord + Default, V: Default, W: IndexWidth> Default for Rbt<K, V, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Default + Clone, V: Default + Clone, W: IndexWidth> Clone for Rbt<K, V, W> {
    fn clone(&self) -> Self {
        let mut tree = Rbt { raw: RawTree::must_allocate(self.capacity()) };
        tree.transform(self).expect("same-width transform always fits");
        tree
    }
}

impl<K: Ord + Default, V: Default, W: IndexWidth> Extend<(K, V)> for Rbt<K, V, W> {
    /// # Panics
    ///
    /// Panics when the width's maximum count is reached or growth fails;
    /// use [`insert`](Rbt::insert) to observe those as errors.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value).expect("tree capacity exhausted during extend");
        }
    }
}

impl<K: Ord + Default, V: Default, W: IndexWidth> FromIterator<(K, V)> for Rbt<K, V, W> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tree = Self::new();
        tree.extend(iter);
        tree
    }
}

impl<K, V, W: IndexWidth> core::fmt::Debug for Rbt<K, V, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rbt")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("index_width", &W::BITS)
            .finish()
    }
}

#[cfg(test)]
impl<K: Ord + Default, V: Default, W: IndexWidth> Rbt<K, V, W> {
    /// Asserts every structural invariant: density and link bounds,
    /// parent/child symmetry, a single root, strict key order, legal colors,
    /// no red-red edge, and a uniform black height.
    pub(crate) fn check_invariants(&self) {
        let live = self.raw.header().live_count;
        let header = self.raw.header();
        assert!(header.capacity >= 1 && header.capacity <= W::MAX_COUNT);
        assert!(live <= header.capacity);
        assert_eq!(header.index_width, W::BITS as u64);
        if live == 0 {
            assert_eq!(self.root_index(), Self::NIL);
            return;
        }
        let root = self.root_index();
        assert!(root < live, "root outside the live region");
        assert_eq!(self.parent_of(root), Self::NIL);
        assert!(!self.is_red(root), "red root");
        let mut roots = 0;
        for index in 0..live {
            let node = self.node(index);
            assert!(node.color == RED || node.color == BLACK, "invalid color");
            let parent = self.parent_of(index);
            let left = self.left_of(index);
            let right = self.right_of(index);
            for link in [parent, left, right] {
                assert!(link == Self::NIL || link < live, "dangling link");
            }
            if parent == Self::NIL {
                roots += 1;
            } else {
                assert!(
                    self.left_of(parent) == index || self.right_of(parent) == index,
                    "parent does not link back"
                );
            }
            if left != Self::NIL {
                assert_eq!(self.parent_of(left), index);
                assert!(self.node(left).key < node.key, "left child out of order");
            }
            if right != Self::NIL {
                assert_eq!(self.parent_of(right), index);
                assert!(self.node(right).key > node.key, "right child out of order");
            }
            if node.color == RED {
                assert!(!self.is_red(left) && !self.is_red(right), "red child of a red node");
            }
        }
        assert_eq!(roots, 1, "exactly one slot may have no parent");
        self.black_height(root);
        let mut visited = 0u64;
        let mut index = self.min_index(root);
        let mut previous: Option<&K> = None;
        while index != Self::NIL {
            let key = &self.node(index).key;
            if let Some(prev) = previous {
                assert!(prev < key, "in-order walk not strictly increasing");
            }
            previous = Some(key);
            visited += 1;
            index = self.next_in_order(index);
        }
        assert_eq!(visited, live, "in-order walk missed a slot");
    }

    fn black_height(&self, index: u64) -> u64 {
        if index == Self::NIL {
            return 1;
        }
        let left = self.black_height(self.left_of(index));
        let right = self.black_height(self.right_of(index));
        assert_eq!(left, right, "black height differs between subtrees");
        left + u64::from(!self.is_red(index))
    }
}
