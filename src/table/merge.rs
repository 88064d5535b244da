//! Merging of multiple sorted, versioned-key iterators.
//!
//! [`MergeIterator`] fuses N inputs into one seek-able stream. It is
//! built as a binary tree of two-way mergers: N inputs split at N/2 into
//! a left and a right subtree, so every hot-path decision is a single
//! two-way comparison.
//!
//! # Duplicate keys
//!
//! Two inputs may surface the byte-identical full key, for example when
//! a compaction overlaps a read. Inside `fix()`, equal full keys advance
//! the right child so the left copy wins; on `next()`, entries equal to
//! the last emitted key are skipped. Both checks compare the *full* key
//! including the version suffix, so distinct versions of one user key
//! are all emitted: the level read path depends on seeing every
//! version.

use std::cmp::Ordering;

use crate::error::Result;
use crate::key::compare_keys;
use crate::table::concat::ConcatIterator;
use crate::table::{TableIterator, Value};

/// The iterator shapes a merge node can hold as a child.
///
/// Dispatching through this enum instead of a `Box<dyn TableIterator>`
/// keeps child calls on the merge hot path monomorphic.
pub enum LsmIterator {
    Table(Box<dyn TableIterator>),
    Concat(ConcatIterator),
    Merge(Box<MergeIterator>),
}

impl TableIterator for LsmIterator {
    fn rewind(&mut self) {
        match self {
            LsmIterator::Table(it) => it.rewind(),
            LsmIterator::Concat(it) => it.rewind(),
            LsmIterator::Merge(it) => it.rewind(),
        }
    }

    fn seek(&mut self, key: &[u8]) {
        match self {
            LsmIterator::Table(it) => it.seek(key),
            LsmIterator::Concat(it) => it.seek(key),
            LsmIterator::Merge(it) => it.seek(key),
        }
    }

    fn next(&mut self) {
        match self {
            LsmIterator::Table(it) => it.next(),
            LsmIterator::Concat(it) => it.next(),
            LsmIterator::Merge(it) => it.next(),
        }
    }

    fn valid(&self) -> bool {
        match self {
            LsmIterator::Table(it) => it.valid(),
            LsmIterator::Concat(it) => it.valid(),
            LsmIterator::Merge(it) => it.valid(),
        }
    }

    fn key(&self) -> &[u8] {
        match self {
            LsmIterator::Table(it) => it.key(),
            LsmIterator::Concat(it) => it.key(),
            LsmIterator::Merge(it) => it.key(),
        }
    }

    fn value(&self) -> Value {
        match self {
            LsmIterator::Table(it) => it.value(),
            LsmIterator::Concat(it) => it.value(),
            LsmIterator::Merge(it) => it.value(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            LsmIterator::Table(it) => it.close(),
            LsmIterator::Concat(it) => it.close(),
            LsmIterator::Merge(it) => it.close(),
        }
    }
}

/// One child of a two-way merge node. Caches the child's validity and a
/// copy of its current key so comparisons don't re-enter the child.
struct Node {
    valid: bool,
    key: Vec<u8>,
    iter: LsmIterator,
}

impl Node {
    fn new(iter: LsmIterator) -> Node {
        Node {
            valid: false,
            key: Vec::new(),
            iter,
        }
    }

    fn update_key(&mut self) {
        self.valid = self.iter.valid();
        if self.valid {
            self.key.clear();
            self.key.extend_from_slice(self.iter.key());
        }
    }

    fn next(&mut self) {
        self.iter.next();
        self.update_key();
    }

    fn rewind(&mut self) {
        self.iter.rewind();
        self.update_key();
    }

    fn seek(&mut self, key: &[u8]) {
        self.iter.seek(key);
        self.update_key();
    }
}

/// A two-way merge node over sorted, versioned-key iterators.
///
/// `is_left_small` designates the child currently positioned at the
/// preferred key: the smaller one, or the larger one in reverse mode.
/// `cur_key` holds the last emitted key, used to suppress duplicates on
/// [`MergeIterator::next`].
pub struct MergeIterator {
    left: Node,
    right: Node,
    is_left_small: bool,
    cur_key: Vec<u8>,
    reverse: bool,
}

impl MergeIterator {
    /// Builds a merge tree over `iters`. Returns `None` for no inputs
    /// and the input itself for a single one.
    pub fn from_iterators(mut iters: Vec<LsmIterator>, reverse: bool) -> Option<LsmIterator> {
        match iters.len() {
            0 => None,
            1 => iters.pop(),
            2 => {
                let right = iters.pop()?;
                let left = iters.pop()?;
                Some(LsmIterator::Merge(Box::new(MergeIterator {
                    left: Node::new(left),
                    right: Node::new(right),
                    // Arbitrary; fixed by the first rewind/seek.
                    is_left_small: true,
                    cur_key: Vec::new(),
                    reverse,
                })))
            }
            n => {
                let right_half = iters.split_off(n / 2);
                match (
                    Self::from_iterators(iters, reverse),
                    Self::from_iterators(right_half, reverse),
                ) {
                    (Some(left), Some(right)) => Self::from_iterators(vec![left, right], reverse),
                    (left, right) => left.or(right),
                }
            }
        }
    }

    fn small(&self) -> &Node {
        if self.is_left_small {
            &self.left
        } else {
            &self.right
        }
    }

    fn small_mut(&mut self) -> &mut Node {
        if self.is_left_small {
            &mut self.left
        } else {
            &mut self.right
        }
    }

    fn bigger(&self) -> &Node {
        if self.is_left_small {
            &self.right
        } else {
            &self.left
        }
    }

    fn swap_small(&mut self) {
        self.is_left_small = !self.is_left_small;
    }

    /// Re-establishes the invariant that `small` points at the child
    /// whose current key is preferred (smaller forward, larger reverse).
    fn fix(&mut self) {
        if !self.bigger().valid {
            return;
        }
        if !self.small().valid {
            self.swap_small();
            return;
        }
        match compare_keys(&self.small().key, &self.bigger().key) {
            Ordering::Equal => {
                // Same full key on both sides: advance the right child,
                // dropping its copy. If right was the small one, small
                // must move to its sibling.
                self.right.next();
                if !self.is_left_small {
                    self.swap_small();
                }
            }
            Ordering::Less => {
                if self.reverse {
                    self.swap_small();
                }
            }
            Ordering::Greater => {
                if !self.reverse {
                    self.swap_small();
                }
            }
        }
    }

    fn store_current(&mut self) {
        self.cur_key.clear();
        if self.is_left_small {
            self.cur_key.extend_from_slice(&self.left.key);
        } else {
            self.cur_key.extend_from_slice(&self.right.key);
        }
    }

    pub fn rewind(&mut self) {
        self.left.rewind();
        self.right.rewind();
        self.fix();
        self.store_current();
    }

    pub fn seek(&mut self, key: &[u8]) {
        self.left.seek(key);
        self.right.seek(key);
        self.fix();
        self.store_current();
    }

    /// Advances past every entry whose full key equals the last emitted
    /// one, then settles on the next key.
    pub fn next(&mut self) {
        while self.valid() {
            if self.small().key != self.cur_key {
                break;
            }
            self.small_mut().next();
            self.fix();
        }
        self.store_current();
    }

    pub fn valid(&self) -> bool {
        self.small().valid
    }

    pub fn key(&self) -> &[u8] {
        &self.small().key
    }

    pub fn value(&self) -> Value {
        self.small().iter.value()
    }

    /// Closes both children; the first error wins, both are attempted.
    pub fn close(&mut self) -> Result<()> {
        let left = self.left.iter.close();
        let right = self.right.iter.close();
        left.and(right).map_err(|e| e.wrap("MergeIterator::close"))
    }
}
