//! In-memory test double for the table seam.
//!
//! Backs level, concat and merge tests with a sorted `Vec` instead of an
//! on-disk table, while keeping the parts the plumbing cares about real:
//! an atomic reference count with release-on-zero, a bloom-style hash
//! set, and a seekable forward/reverse iterator.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::key::{compare_keys, hash, parse_user_key};
use crate::table::{Table, TableIterator, Value, REVERSED};

struct MemCore {
    id: u64,
    entries: Vec<(Vec<u8>, Value)>,
    smallest: Vec<u8>,
    biggest: Vec<u8>,
    size: i64,
    stale: u32,
    hashes: HashSet<u32>,
    refs: AtomicI64,
    released: AtomicBool,
    last_close_flag: AtomicI64,
}

impl MemCore {
    fn decr(&self) -> Result<()> {
        let prev = self.refs.fetch_sub(1, Ordering::SeqCst);
        assert!(prev >= 1, "reference count went negative on table {}", self.id);
        if prev == 1 {
            self.released.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A sorted in-memory table. Starts with one reference, like a freshly
/// opened table file.
pub(crate) struct MemTable {
    core: Arc<MemCore>,
}

impl MemTable {
    pub(crate) fn new(id: u64, entries: Vec<(Vec<u8>, Value)>) -> MemTable {
        Self::with_stale(id, entries, 0)
    }

    pub(crate) fn with_stale(id: u64, mut entries: Vec<(Vec<u8>, Value)>, stale: u32) -> MemTable {
        entries.sort_by(|a, b| compare_keys(&a.0, &b.0));
        let smallest = entries.first().map(|(k, _)| k.clone()).unwrap_or_default();
        let biggest = entries.last().map(|(k, _)| k.clone()).unwrap_or_default();
        let size = entries
            .iter()
            .map(|(k, v)| (k.len() + v.data.len()) as i64)
            .sum();
        let hashes = entries.iter().map(|(k, _)| hash(parse_user_key(k))).collect();
        MemTable {
            core: Arc::new(MemCore {
                id,
                entries,
                smallest,
                biggest,
                size,
                stale,
                hashes,
                refs: AtomicI64::new(1),
                released: AtomicBool::new(false),
                last_close_flag: AtomicI64::new(0),
            }),
        }
    }

    /// Current reference count, for assertions.
    pub(crate) fn ref_count(&self) -> i64 {
        self.core.refs.load(Ordering::SeqCst)
    }

    /// True once the last reference has been released.
    pub(crate) fn is_released(&self) -> bool {
        self.core.released.load(Ordering::SeqCst)
    }

    /// The flag passed to the most recent `close` call.
    pub(crate) fn last_close_flag(&self) -> i64 {
        self.core.last_close_flag.load(Ordering::SeqCst)
    }
}

impl Table for MemTable {
    fn id(&self) -> u64 {
        self.core.id
    }

    fn smallest(&self) -> &[u8] {
        &self.core.smallest
    }

    fn biggest(&self) -> &[u8] {
        &self.core.biggest
    }

    fn size(&self) -> i64 {
        self.core.size
    }

    fn stale_data_size(&self) -> u32 {
        self.core.stale
    }

    fn does_not_have(&self, hash: u32) -> bool {
        !self.core.hashes.contains(&hash)
    }

    fn new_iterator(&self, flags: u8) -> Box<dyn TableIterator> {
        self.core.refs.fetch_add(1, Ordering::SeqCst);
        Box::new(MemIterator {
            core: Arc::clone(&self.core),
            pos: None,
            reverse: flags & REVERSED != 0,
            owns_ref: true,
        })
    }

    fn incr_ref(&self) {
        self.core.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn decr_ref(&self) -> Result<()> {
        self.core.decr()
    }

    fn close(&self, flag: i64) -> Result<()> {
        self.core.last_close_flag.store(flag, Ordering::SeqCst);
        Ok(())
    }
}

/// Cursor over a [`MemTable`], or over a bare entry list in iterator
/// tests.
pub(crate) struct MemIterator {
    core: Arc<MemCore>,
    pos: Option<usize>,
    reverse: bool,
    owns_ref: bool,
}

impl MemIterator {
    /// Builds a standalone iterator over pre-sorted `entries`.
    pub(crate) fn from_entries(entries: Vec<(Vec<u8>, Value)>, reverse: bool) -> MemIterator {
        let table = MemTable::new(0, entries);
        MemIterator {
            core: table.core,
            pos: None,
            reverse,
            owns_ref: false,
        }
    }

    fn entries(&self) -> &[(Vec<u8>, Value)] {
        &self.core.entries
    }
}

impl TableIterator for MemIterator {
    fn rewind(&mut self) {
        let n = self.entries().len();
        self.pos = if n == 0 {
            None
        } else if self.reverse {
            Some(n - 1)
        } else {
            Some(0)
        };
    }

    fn seek(&mut self, key: &[u8]) {
        if self.reverse {
            // Largest entry <= key.
            let idx = self
                .entries()
                .partition_point(|(k, _)| compare_keys(k, key) != std::cmp::Ordering::Greater);
            self.pos = idx.checked_sub(1);
        } else {
            // Smallest entry >= key.
            let idx = self
                .entries()
                .partition_point(|(k, _)| compare_keys(k, key) == std::cmp::Ordering::Less);
            self.pos = (idx < self.entries().len()).then_some(idx);
        }
    }

    fn next(&mut self) {
        self.pos = match (self.pos, self.reverse) {
            (Some(i), false) if i + 1 < self.entries().len() => Some(i + 1),
            (Some(i), true) => i.checked_sub(1),
            _ => None,
        };
    }

    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn key(&self) -> &[u8] {
        match self.pos {
            Some(i) => &self.core.entries[i].0,
            None => &[],
        }
    }

    fn value(&self) -> Value {
        match self.pos {
            Some(i) => self.core.entries[i].1.clone(),
            None => Value::default(),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.owns_ref {
            self.owns_ref = false;
            self.core.decr()?;
        }
        Ok(())
    }
}
