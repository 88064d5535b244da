use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::key::compare_keys;
use crate::table::{decr_refs, Table, TableIterator, Value, REVERSED};

/// Iterator over a list of tables with pairwise disjoint key ranges, as
/// found at levels >= 1. Walks one table at a time, rolling into the
/// next when the current one is exhausted.
///
/// Holds one reference on every table for its lifetime; per-table
/// iterators are created lazily, on first entry into each table.
pub struct ConcatIterator {
    idx: Option<usize>,
    iters: Vec<Option<Box<dyn TableIterator>>>,
    tables: Vec<Arc<dyn Table>>,
    flags: u8,
    reverse: bool,
}

impl ConcatIterator {
    /// Creates an iterator over `tables`, which must be sorted by
    /// smallest key with non-overlapping ranges.
    pub fn new(tables: Vec<Arc<dyn Table>>, flags: u8) -> ConcatIterator {
        for table in &tables {
            table.incr_ref();
        }
        let iters = tables.iter().map(|_| None).collect();
        ConcatIterator {
            idx: None,
            iters,
            tables,
            flags,
            reverse: flags & REVERSED != 0,
        }
    }

    fn set_idx(&mut self, idx: Option<usize>) {
        self.idx = match idx {
            Some(i) if i < self.tables.len() => {
                if self.iters[i].is_none() {
                    self.iters[i] = Some(self.tables[i].new_iterator(self.flags));
                }
                Some(i)
            }
            _ => None,
        };
    }

    fn cur(&self) -> Option<&dyn TableIterator> {
        self.idx.and_then(|i| self.iters[i].as_deref())
    }

    fn cur_mut(&mut self) -> Option<&mut Box<dyn TableIterator>> {
        let idx = self.idx?;
        self.iters[idx].as_mut()
    }
}

impl TableIterator for ConcatIterator {
    fn rewind(&mut self) {
        if self.tables.is_empty() {
            return;
        }
        let start = if self.reverse { self.tables.len() - 1 } else { 0 };
        self.set_idx(Some(start));
        if let Some(cur) = self.cur_mut() {
            cur.rewind();
        }
    }

    fn seek(&mut self, key: &[u8]) {
        let idx = if self.reverse {
            // Last table whose smallest key is <= key.
            self.tables
                .partition_point(|t| compare_keys(t.smallest(), key) != Ordering::Greater)
                .checked_sub(1)
        } else {
            // First table whose biggest key is >= key.
            let i = self
                .tables
                .partition_point(|t| compare_keys(t.biggest(), key) == Ordering::Less);
            (i < self.tables.len()).then_some(i)
        };

        self.set_idx(idx);
        if let Some(cur) = self.cur_mut() {
            cur.seek(key);
        }
    }

    fn next(&mut self) {
        let Some(cur) = self.cur_mut() else { return };
        cur.next();
        if cur.valid() {
            return;
        }
        // Current table exhausted; roll into the following tables until
        // one yields an entry or the list runs out.
        loop {
            let next_idx = match (self.idx, self.reverse) {
                (Some(i), false) => Some(i + 1),
                (Some(i), true) => i.checked_sub(1),
                (None, _) => None,
            };
            self.set_idx(next_idx);
            match self.cur_mut() {
                None => return,
                Some(cur) => {
                    cur.rewind();
                    if cur.valid() {
                        return;
                    }
                }
            }
        }
    }

    fn valid(&self) -> bool {
        self.cur().map(|c| c.valid()).unwrap_or(false)
    }

    fn key(&self) -> &[u8] {
        match self.cur() {
            Some(cur) => cur.key(),
            None => &[],
        }
    }

    fn value(&self) -> Value {
        match self.cur() {
            Some(cur) => cur.value(),
            None => Value::default(),
        }
    }

    fn close(&mut self) -> Result<()> {
        let mut first_err: Option<Error> = None;
        for iter in self.iters.iter_mut().flatten() {
            if let Err(e) = iter.close() {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = decr_refs(&self.tables) {
            first_err.get_or_insert(e);
        }
        match first_err {
            Some(e) => Err(e.wrap("ConcatIterator::close")),
            None => Ok(()),
        }
    }
}
