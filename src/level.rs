//! Per-level table ownership and the level read path.
//!
//! A [`LevelHandler`] owns the set of tables at one LSM level and
//! mediates between concurrent readers and the compaction machinery
//! that installs and removes tables. Readers snapshot the table list
//! under a read lock and pin the tables they touch with references, so
//! structural swaps never invalidate an in-flight lookup.
//!
//! Level 0 is special: its tables' key ranges may overlap arbitrarily,
//! so they are kept in insertion order (newest at the back) and every
//! lookup must consider all of them. Levels >= 1 keep their tables
//! sorted by smallest key with pairwise disjoint ranges, which allows
//! binary search and concatenated scans.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::config::LsmConfig;
use crate::error::{Error, Result};
use crate::key;
use crate::metrics::LevelMetrics;
use crate::table::concat::ConcatIterator;
use crate::table::merge::LsmIterator;
use crate::table::{decr_refs, Table, TableIterator, Value, REVERSED};

/// A half-open key range `[left, right)` over full keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub left: Vec<u8>,
    pub right: Vec<u8>,
}

impl KeyRange {
    pub fn new(left: Vec<u8>, right: Vec<u8>) -> KeyRange {
        KeyRange { left, right }
    }
}

type PickTableFn = Box<dyn Fn(&dyn Table) -> bool + Send + Sync>;
type PickTablesFn = Box<dyn Fn(&[Arc<dyn Table>]) -> Vec<Arc<dyn Table>> + Send + Sync>;

/// Options steering [`LevelHandler::append_iterators`].
///
/// The pick predicates let callers drop tables that cannot contain the
/// keys of interest (prefix and range scans); by default every table is
/// kept.
#[derive(Default)]
pub struct IteratorOptions {
    pub reverse: bool,
    pick_table: Option<PickTableFn>,
    pick_tables: Option<PickTablesFn>,
}

impl IteratorOptions {
    pub fn new(reverse: bool) -> IteratorOptions {
        IteratorOptions {
            reverse,
            ..IteratorOptions::default()
        }
    }

    /// Filters individual level-0 tables.
    pub fn with_pick_table(
        mut self,
        f: impl Fn(&dyn Table) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.pick_table = Some(Box::new(f));
        self
    }

    /// Filters the sorted table list of a level >= 1.
    pub fn with_pick_tables(
        mut self,
        f: impl Fn(&[Arc<dyn Table>]) -> Vec<Arc<dyn Table>> + Send + Sync + 'static,
    ) -> Self {
        self.pick_tables = Some(Box::new(f));
        self
    }

    fn pick_table(&self, table: &dyn Table) -> bool {
        self.pick_table.as_ref().map_or(true, |f| f(table))
    }

    fn pick_tables(&self, tables: &[Arc<dyn Table>]) -> Vec<Arc<dyn Table>> {
        match &self.pick_tables {
            Some(f) => f(tables),
            None => tables.to_vec(),
        }
    }
}

/// The lock-guarded portion of a level: its table list and size sums.
pub struct LevelState {
    tables: Vec<Arc<dyn Table>>,
    total_size: i64,
    total_stale_size: i64,
}

impl LevelState {
    /// Tables currently in the level, in level order.
    pub fn tables(&self) -> &[Arc<dyn Table>] {
        &self.tables
    }

    pub fn total_size(&self) -> i64 {
        self.total_size
    }

    pub fn total_stale_size(&self) -> i64 {
        self.total_stale_size
    }

    fn add_size(&mut self, table: &dyn Table) {
        self.total_size += table.size();
        self.total_stale_size += i64::from(table.stale_data_size());
    }

    fn subtract_size(&mut self, table: &dyn Table) {
        self.total_size -= table.size();
        self.total_stale_size -= i64::from(table.stale_data_size());
    }
}

/// Owner of the table set at one level.
pub struct LevelHandler {
    state: RwLock<LevelState>,
    level: usize,
    str_level: String,
    config: Arc<LsmConfig>,
    metrics: LevelMetrics,
}

impl LevelHandler {
    pub fn new(config: Arc<LsmConfig>, level: usize) -> LevelHandler {
        LevelHandler {
            state: RwLock::new(LevelState {
                tables: Vec::new(),
                total_size: 0,
                total_stale_size: 0,
            }),
            level,
            str_level: format!("l{level}"),
            config,
            metrics: LevelMetrics::new(),
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_last_level(&self) -> bool {
        self.level == self.config.max_levels - 1
    }

    pub fn metrics(&self) -> &LevelMetrics {
        &self.metrics
    }

    /// Takes the level's read lock. The returned guard doubles as the
    /// capability for [`LevelHandler::overlapping_tables`].
    pub fn read(&self) -> RwLockReadGuard<'_, LevelState> {
        self.state.read().unwrap()
    }

    pub fn num_tables(&self) -> usize {
        self.state.read().unwrap().tables.len()
    }

    pub fn total_size(&self) -> i64 {
        self.state.read().unwrap().total_size
    }

    pub fn total_stale_size(&self) -> i64 {
        self.state.read().unwrap().total_stale_size
    }

    /// Replaces the level's table set during load. Takes ownership of
    /// the caller's reference on every table.
    ///
    /// Level 0 sorts by id ascending, which is insertion order with the
    /// newest table at the back. Higher levels sort by smallest key.
    pub fn init_tables(&self, tables: Vec<Arc<dyn Table>>) {
        let mut state = self.state.write().unwrap();
        state.total_size = 0;
        state.total_stale_size = 0;
        for table in &tables {
            state.add_size(table.as_ref());
        }
        state.tables = tables;

        if self.level == 0 {
            state.tables.sort_by_key(|t| t.id());
        } else {
            state
                .tables
                .sort_by(|a, b| key::compare_keys(a.smallest(), b.smallest()));
        }
    }

    /// Appends a table without re-sorting, for streamed bulk loads.
    /// The level is not in reader-usable order until [`Self::sort_tables`]
    /// has run.
    pub fn add_table(&self, table: Arc<dyn Table>) {
        let mut state = self.state.write().unwrap();
        state.add_size(table.as_ref());
        table.incr_ref();
        state.tables.push(table);
    }

    /// Restores the level >= 1 ordering contract after a run of
    /// [`Self::add_table`] calls.
    pub fn sort_tables(&self) {
        let mut state = self.state.write().unwrap();
        state
            .tables
            .sort_by(|a, b| key::compare_keys(a.smallest(), b.smallest()));
    }

    /// Appends a table to level 0, unless the level already holds the
    /// stall threshold's worth of tables. Returns false to signal the
    /// caller to back off; never blocks.
    pub fn try_add_level0_table(&self, table: &Arc<dyn Table>) -> bool {
        assert_eq!(self.level, 0, "level 0 insert attempted on level {}", self.level);

        let mut state = self.state.write().unwrap();
        if state.tables.len() >= self.config.num_level_zero_tables_stall {
            return false;
        }

        table.incr_ref();
        state.add_size(table.as_ref());
        state.tables.push(Arc::clone(table));
        true
    }

    /// Removes `to_del` from the level. The level's references on the
    /// removed tables are released only after the write lock is dropped,
    /// since the final release may close files.
    pub fn delete_tables(&self, to_del: &[Arc<dyn Table>]) -> Result<()> {
        let to_del_ids: HashSet<u64> = to_del.iter().map(|t| t.id()).collect();
        {
            let mut state = self.state.write().unwrap();
            // Rebuild rather than mutate in place: readers may still hold
            // a snapshot of the old list.
            let old = std::mem::take(&mut state.tables);
            let mut kept = Vec::with_capacity(old.len());
            for table in old {
                if to_del_ids.contains(&table.id()) {
                    state.subtract_size(table.as_ref());
                } else {
                    kept.push(table);
                }
            }
            state.tables = kept;
        }
        decr_refs(to_del)
    }

    /// Atomically swaps `to_del` for `to_add`, re-sorting by smallest
    /// key. The caller must have recorded the change in the manifest
    /// first, so that a release-triggered file deletion can never
    /// precede its manifest record. References on `to_del` are released
    /// after the lock is dropped.
    pub fn replace_tables(
        &self,
        to_del: &[Arc<dyn Table>],
        to_add: &[Arc<dyn Table>],
    ) -> Result<()> {
        let to_del_ids: HashSet<u64> = to_del.iter().map(|t| t.id()).collect();
        {
            let mut state = self.state.write().unwrap();

            let old = std::mem::take(&mut state.tables);
            let mut new_tables = Vec::with_capacity(old.len() + to_add.len());
            for table in old {
                if to_del_ids.contains(&table.id()) {
                    state.subtract_size(table.as_ref());
                } else {
                    new_tables.push(table);
                }
            }
            for table in to_add {
                state.add_size(table.as_ref());
                table.incr_ref();
                new_tables.push(Arc::clone(table));
            }
            new_tables.sort_by(|a, b| key::compare_keys(a.smallest(), b.smallest()));
            state.tables = new_tables;
        }
        decr_refs(to_del)
    }

    /// Closes every table with the level-shutdown flag. All tables are
    /// attempted; the first error is returned, wrapped.
    pub fn close(&self) -> Result<()> {
        let state = self.state.read().unwrap();
        let mut first_err: Option<Error> = None;
        for table in &state.tables {
            if let Err(e) = table.close(-1) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.wrap("LevelHandler::close")),
            None => Ok(()),
        }
    }

    /// Returns the tables that may contain `key`, each with a reference
    /// taken; the caller releases them with [`decr_refs`] when done.
    ///
    /// Level 0 returns every table, newest first, because ranges
    /// overlap and all of them must be consulted; newest-first merely
    /// reaches the likely maximum version sooner. Higher levels return
    /// the single table whose range covers the key, if any.
    fn tables_for_key(&self, key: &[u8]) -> Vec<Arc<dyn Table>> {
        let state = self.state.read().unwrap();

        if self.level == 0 {
            let mut out = Vec::with_capacity(state.tables.len());
            for table in state.tables.iter().rev() {
                table.incr_ref();
                out.push(Arc::clone(table));
            }
            return out;
        }

        let idx = state
            .tables
            .partition_point(|t| key::compare_keys(t.biggest(), key) == Ordering::Less);
        match state.tables.get(idx) {
            Some(table) => {
                table.incr_ref();
                vec![Arc::clone(table)]
            }
            None => Vec::new(),
        }
    }

    /// Looks up `key`, returning the value with the maximum version
    /// across every candidate table. A missing key yields a default
    /// value with version 0.
    ///
    /// Every candidate is consulted even after a match: value-log
    /// rewrites can leave a newer version of a key in an older table,
    /// so first-match is not maximum-version.
    pub fn get(&self, key: &[u8]) -> Result<Value> {
        let tables = self.tables_for_key(key);
        let user_key = key::parse_user_key(key);
        let hash = key::hash(user_key);

        let mut max_value = Value::default();
        for table in &tables {
            if table.does_not_have(hash) {
                self.metrics.add_bloom_hit(self.config.metrics_enabled);
                continue;
            }
            self.metrics.add_get(self.config.metrics_enabled);

            let mut iter = table.new_iterator(0);
            iter.seek(key);
            if iter.valid() && key::same_user_key(key, iter.key()) {
                let version = key::parse_version(iter.key());
                if max_value.version < version {
                    let mut value = iter.value();
                    value.version = version;
                    max_value = value;
                }
            }
            if let Err(e) = iter.close() {
                tracing::warn!(
                    level = %self.str_level,
                    error = %e,
                    "table iterator close failed during get"
                );
            }
        }

        decr_refs(&tables)?;
        Ok(max_value)
    }

    /// Appends this level's contribution to a scan, for the caller to
    /// merge. Level 0 contributes one iterator per table, newest first,
    /// so the merge prefers newer versions on duplicate keys; higher
    /// levels contribute a single concatenated iterator over their
    /// disjoint tables.
    pub fn append_iterators(&self, out: &mut Vec<LsmIterator>, opt: &IteratorOptions) {
        let state = self.state.read().unwrap();
        let flags = if opt.reverse { REVERSED } else { 0 };

        if self.level == 0 {
            for table in state.tables.iter().rev() {
                if opt.pick_table(table.as_ref()) {
                    out.push(LsmIterator::Table(table.new_iterator(flags)));
                }
            }
            return;
        }

        let tables = opt.pick_tables(&state.tables);
        if !tables.is_empty() {
            out.push(LsmIterator::Concat(ConcatIterator::new(tables, flags)));
        }
    }

    /// Returns the `[i, j)` interval of tables intersecting `kr` on a
    /// level >= 1. `state` must be this level's guard, obtained from
    /// [`Self::read`]: holding it proves the read lock is held across
    /// the answer's use. Either endpoint empty yields `(0, 0)`.
    pub fn overlapping_tables(&self, state: &LevelState, kr: &KeyRange) -> (usize, usize) {
        assert!(self.level > 0, "overlap query attempted on level 0");
        if kr.left.is_empty() || kr.right.is_empty() {
            return (0, 0);
        }
        let left = state
            .tables
            .partition_point(|t| key::compare_keys(&kr.left, t.biggest()) == Ordering::Greater);
        let right = state
            .tables
            .partition_point(|t| key::compare_keys(&kr.right, t.smallest()) != Ordering::Less);
        (left, right)
    }

    /// Emits a structured snapshot of the level's counters and sizes.
    pub fn log_metrics(&self) {
        let (num_tables, total_size, total_stale_size) = {
            let state = self.state.read().unwrap();
            (state.tables.len(), state.total_size, state.total_stale_size)
        };
        tracing::info!(
            level = %self.str_level,
            num_tables,
            total_size,
            total_stale_size,
            num_gets = self.metrics.num_gets(),
            num_bloom_hits = self.metrics.num_bloom_hits(),
            "level metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{key_with_version, parse_user_key};
    use crate::table::mem::MemTable;
    use crate::table::merge::MergeIterator;
    use itertools::Itertools;
    use std::thread;

    fn test_config() -> Arc<LsmConfig> {
        Arc::new(LsmConfig {
            num_level_zero_tables_stall: 3,
            ..LsmConfig::new("/tmp/emberdb-test")
        })
    }

    fn kv(user_key: &str, version: u64, data: &str) -> (Vec<u8>, Value) {
        (
            key_with_version(user_key.as_bytes(), version),
            Value {
                meta: 0,
                version,
                data: data.as_bytes().to_vec(),
            },
        )
    }

    fn table(id: u64, entries: Vec<(Vec<u8>, Value)>) -> (Arc<MemTable>, Arc<dyn Table>) {
        let handle = Arc::new(MemTable::new(id, entries));
        let table = Arc::clone(&handle) as Arc<dyn Table>;
        (handle, table)
    }

    fn probe(user_key: &str) -> Vec<u8> {
        key_with_version(user_key.as_bytes(), u64::MAX)
    }

    #[test]
    fn init_tables_sorts_level0_by_id() {
        let handler = LevelHandler::new(test_config(), 0);
        let (_, t3) = table(3, vec![kv("c", 1, "c")]);
        let (_, t1) = table(1, vec![kv("a", 1, "a")]);
        let (_, t2) = table(2, vec![kv("b", 1, "b")]);

        handler.init_tables(vec![t3, t1, t2]);

        let state = handler.read();
        let ids: Vec<u64> = state.tables().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn init_tables_sorts_higher_levels_by_smallest_and_sums_sizes() {
        let handler = LevelHandler::new(test_config(), 1);
        let (h1, t1) = table(1, vec![kv("d", 1, "dd")]);
        let (h2, t2) = table(2, vec![kv("a", 1, "aa")]);
        let (h3, t3) = table(3, vec![kv("g", 1, "gg")]);

        handler.init_tables(vec![t1, t2, t3]);

        let state = handler.read();
        let ids: Vec<u64> = state.tables().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(
            state.total_size(),
            h1.size() + h2.size() + h3.size()
        );
        assert_eq!(state.total_stale_size(), 0);
    }

    #[test]
    fn level0_get_scans_every_table_for_max_version() {
        let handler = LevelHandler::new(test_config(), 0);
        let (h1, t1) = table(1, vec![kv("a", 5, "x")]);
        let (h2, t2) = table(2, vec![kv("a", 7, "y")]);
        let (h3, t3) = table(3, vec![kv("a", 3, "z")]);

        handler.init_tables(vec![t1, t2, t3]);

        let value = handler.get(&probe("a")).expect("get failed");
        assert_eq!(value.version, 7);
        assert_eq!(value.data, b"y");

        // The lookup pinned and released its candidates; only the
        // level's own reference remains.
        for h in [&h1, &h2, &h3] {
            assert_eq!(h.ref_count(), 1);
        }
    }

    #[test]
    fn stale_sizes_follow_the_table_set() {
        let handler = LevelHandler::new(test_config(), 1);
        let h1 = Arc::new(MemTable::with_stale(1, vec![kv("a", 1, "aa")], 7));
        let h2 = Arc::new(MemTable::with_stale(2, vec![kv("c", 1, "cc")], 11));
        let t1 = Arc::clone(&h1) as Arc<dyn Table>;
        let t2 = Arc::clone(&h2) as Arc<dyn Table>;

        handler.init_tables(vec![Arc::clone(&t1), t2]);
        assert_eq!(handler.total_stale_size(), 18);

        handler.delete_tables(&[t1]).expect("delete failed");
        assert_eq!(handler.total_stale_size(), 11);
        assert_eq!(handler.total_size(), h2.size());
    }

    #[test]
    fn level_accessors_reflect_configuration() {
        let config = test_config();
        let handler = LevelHandler::new(Arc::clone(&config), 6);
        assert_eq!(handler.level(), 6);
        assert!(handler.is_last_level());
        assert!(!LevelHandler::new(config, 0).is_last_level());
        handler.log_metrics();
    }

    #[test]
    fn per_level_get_returns_that_levels_max_version() {
        let l1 = LevelHandler::new(test_config(), 1);
        let (_, t1) = table(1, vec![kv("a", 10, "new")]);
        l1.init_tables(vec![t1]);

        let l2 = LevelHandler::new(test_config(), 2);
        let (_, t2) = table(2, vec![kv("a", 12, "older-but-rewritten")]);
        l2.init_tables(vec![t2]);

        let v1 = l1.get(&probe("a")).expect("get failed");
        assert_eq!(v1.version, 10);
        assert_eq!(v1.data, b"new");

        let v2 = l2.get(&probe("a")).expect("get failed");
        assert_eq!(v2.version, 12);
        assert_eq!(v2.data, b"older-but-rewritten");
    }

    #[test]
    fn get_missing_key_returns_version_zero() {
        let handler = LevelHandler::new(test_config(), 1);
        let (_, t1) = table(1, vec![kv("a", 1, "a")]);
        handler.init_tables(vec![t1]);

        let value = handler.get(&probe("zz")).expect("get failed");
        assert_eq!(value, Value::default());
        assert_eq!(value.version, 0);
    }

    #[test]
    fn get_counts_bloom_ruled_out_tables() {
        let handler = LevelHandler::new(test_config(), 0);
        let (_, t1) = table(1, vec![kv("a", 1, "a")]);
        let (_, t2) = table(2, vec![kv("b", 1, "b")]);
        handler.init_tables(vec![t1, t2]);

        let value = handler.get(&probe("a")).expect("get failed");
        assert_eq!(value.version, 1);
        assert_eq!(handler.metrics().num_gets(), 1);
        assert_eq!(handler.metrics().num_bloom_hits(), 1);
    }

    #[test]
    fn try_add_level0_table_stalls_at_threshold() {
        let handler = LevelHandler::new(test_config(), 0);

        let mut handles = Vec::new();
        let mut tables = Vec::new();
        for id in 1..=3u64 {
            let (h, t) = table(id, vec![kv("a", id, "v")]);
            handles.push(h);
            tables.push(t);
        }
        for t in &tables {
            assert!(handler.try_add_level0_table(t));
        }

        let (_, t4) = table(4, vec![kv("a", 9, "v")]);
        assert!(!handler.try_add_level0_table(&t4));
        assert_eq!(handler.num_tables(), 3);

        handler
            .delete_tables(std::slice::from_ref(&tables[0]))
            .expect("delete failed");
        assert!(handler.try_add_level0_table(&t4));
        assert_eq!(handler.num_tables(), 3);
    }

    #[test]
    fn delete_tables_releases_the_levels_reference() {
        let handler = LevelHandler::new(test_config(), 1);
        let (h1, t1) = table(1, vec![kv("a", 1, "a")]);
        let (h2, t2) = table(2, vec![kv("c", 1, "c")]);

        // init_tables takes ownership of the creation reference.
        handler.init_tables(vec![Arc::clone(&t1), t2]);
        assert_eq!(h1.ref_count(), 1);

        handler.delete_tables(&[t1]).expect("delete failed");
        assert_eq!(handler.num_tables(), 1);
        assert_eq!(h1.ref_count(), 0);
        assert!(h1.is_released());
        assert_eq!(h2.ref_count(), 1);
        assert!(!h2.is_released());
    }

    #[test]
    fn replace_tables_updates_sizes_order_and_references() {
        let handler = LevelHandler::new(test_config(), 1);
        let (_, t1) = table(1, vec![kv("a", 1, "aa"), kv("c", 1, "cc")]);
        let (h2, t2) = table(2, vec![kv("d", 1, "dd"), kv("f", 1, "ff")]);
        handler.init_tables(vec![Arc::clone(&t1), Arc::clone(&t2)]);

        let (h2a, t2a) = table(3, vec![kv("d", 1, "dd")]);
        let (h2b, t2b) = table(4, vec![kv("f", 1, "ff")]);
        handler
            .replace_tables(&[t2], &[Arc::clone(&t2a), Arc::clone(&t2b)])
            .expect("replace failed");

        let state = handler.read();
        let ids: Vec<u64> = state.tables().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        assert_eq!(
            state.total_size(),
            t1.size() + t2a.size() + t2b.size()
        );
        drop(state);

        assert_eq!(h2.ref_count(), 0);
        assert!(h2.is_released());
        // The caller still holds its own reference on the new tables.
        assert_eq!(h2a.ref_count(), 2);
        assert_eq!(h2b.ref_count(), 2);
    }

    #[test]
    fn replace_keeps_level_sorted_and_disjoint() {
        let handler = LevelHandler::new(test_config(), 1);
        let (_, t1) = table(1, vec![kv("a", 1, ""), kv("b", 1, "")]);
        let (_, t2) = table(2, vec![kv("m", 1, ""), kv("p", 1, "")]);
        let (_, t3) = table(3, vec![kv("x", 1, ""), kv("z", 1, "")]);
        handler.init_tables(vec![t1, Arc::clone(&t2), t3]);

        let (_, t2a) = table(4, vec![kv("m", 1, ""), kv("n", 1, "")]);
        let (_, t2b) = table(5, vec![kv("o", 1, ""), kv("p", 1, "")]);
        handler
            .replace_tables(&[t2], &[t2a, t2b])
            .expect("replace failed");

        let state = handler.read();
        let expected_size: i64 = state.tables().iter().map(|t| t.size()).sum();
        assert_eq!(state.total_size(), expected_size);
        assert!(state
            .tables()
            .iter()
            .tuple_windows()
            .all(|(a, b)| key::compare_keys(a.biggest(), b.smallest()) == Ordering::Less));
    }

    #[test]
    fn add_table_then_sort_tables_restores_order() {
        let handler = LevelHandler::new(test_config(), 1);
        let (_, t1) = table(1, vec![kv("m", 1, "")]);
        let (_, t2) = table(2, vec![kv("a", 1, "")]);
        handler.add_table(t1);
        handler.add_table(t2);

        handler.sort_tables();

        let state = handler.read();
        let ids: Vec<u64> = state.tables().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn replace_tables_is_atomic_under_concurrent_readers() {
        let handler = Arc::new(LevelHandler::new(test_config(), 1));
        let (_, t1) = table(1, vec![kv("a", 1, "aa"), kv("c", 1, "cc")]);
        let (h2, t2) = table(2, vec![kv("d", 1, "dd"), kv("e", 1, "ee"), kv("f", 1, "ff")]);
        handler.init_tables(vec![Arc::clone(&t1), Arc::clone(&t2)]);

        let reader = {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                for _ in 0..2000 {
                    let value = handler.get(&probe("e")).expect("get failed");
                    assert_eq!(value.version, 1, "reader observed a missing entry");
                    assert_eq!(value.data, b"ee");
                }
            })
        };

        let (_, t2a) = table(3, vec![kv("d", 1, "dd"), kv("e", 1, "ee")]);
        let (_, t2b) = table(4, vec![kv("f", 1, "ff")]);
        handler
            .replace_tables(&[Arc::clone(&t2)], &[Arc::clone(&t2a), Arc::clone(&t2b)])
            .expect("replace failed");

        reader.join().expect("reader panicked");

        assert_eq!(
            handler.total_size(),
            t1.size() + t2a.size() + t2b.size()
        );
        assert_eq!(h2.ref_count(), 0);
        assert!(h2.is_released());
    }

    #[test]
    fn overlapping_tables_returns_half_open_interval() {
        let handler = LevelHandler::new(test_config(), 1);
        let (_, t1) = table(1, vec![kv("a", 1, ""), kv("c", 1, "")]);
        let (_, t2) = table(2, vec![kv("d", 1, ""), kv("f", 1, "")]);
        let (_, t3) = table(3, vec![kv("g", 1, ""), kv("i", 1, "")]);
        handler.init_tables(vec![t1, t2, t3]);

        let state = handler.read();

        // Covers the middle table only.
        let kr = KeyRange::new(probe("d"), probe("f"));
        assert_eq!(handler.overlapping_tables(&state, &kr), (1, 2));

        // Spans the first two tables.
        let kr = KeyRange::new(probe("b"), probe("e"));
        assert_eq!(handler.overlapping_tables(&state, &kr), (0, 2));

        // Entirely past the last table.
        let kr = KeyRange::new(probe("x"), probe("z"));
        assert_eq!(handler.overlapping_tables(&state, &kr), (3, 3));
    }

    #[test]
    fn overlapping_tables_with_empty_endpoint_is_empty() {
        let handler = LevelHandler::new(test_config(), 1);
        let (_, t1) = table(1, vec![kv("a", 1, ""), kv("c", 1, "")]);
        handler.init_tables(vec![t1]);

        let state = handler.read();
        let kr = KeyRange::new(Vec::new(), probe("z"));
        assert_eq!(handler.overlapping_tables(&state, &kr), (0, 0));
        let kr = KeyRange::new(probe("a"), Vec::new());
        assert_eq!(handler.overlapping_tables(&state, &kr), (0, 0));
    }

    #[test]
    fn close_passes_shutdown_flag_to_every_table() {
        let handler = LevelHandler::new(test_config(), 1);
        let (h1, t1) = table(1, vec![kv("a", 1, "")]);
        let (h2, t2) = table(2, vec![kv("c", 1, "")]);
        handler.init_tables(vec![t1, t2]);

        handler.close().expect("close failed");
        assert_eq!(h1.last_close_flag(), -1);
        assert_eq!(h2.last_close_flag(), -1);
    }

    #[test]
    fn append_iterators_level0_yields_newest_table_first() {
        let handler = LevelHandler::new(test_config(), 0);
        let (_, t1) = table(1, vec![kv("k1", 1, "")]);
        let (_, t2) = table(2, vec![kv("k2", 1, "")]);
        let (_, t3) = table(3, vec![kv("k3", 1, "")]);
        handler.init_tables(vec![t1, t2, t3]);

        let mut iters = Vec::new();
        handler.append_iterators(&mut iters, &IteratorOptions::new(false));
        assert_eq!(iters.len(), 3);

        let first_keys: Vec<Vec<u8>> = iters
            .iter_mut()
            .map(|it| {
                it.rewind();
                parse_user_key(it.key()).to_vec()
            })
            .collect();
        assert_eq!(first_keys, vec![b"k3".to_vec(), b"k2".to_vec(), b"k1".to_vec()]);

        for mut it in iters {
            it.close().expect("close failed");
        }
    }

    #[test]
    fn append_iterators_higher_level_uses_one_concat() {
        let handler = LevelHandler::new(test_config(), 1);
        let (_, t1) = table(1, vec![kv("a", 1, "")]);
        let (_, t2) = table(2, vec![kv("c", 1, "")]);
        handler.init_tables(vec![t1, t2]);

        let mut iters = Vec::new();
        handler.append_iterators(&mut iters, &IteratorOptions::new(false));
        assert_eq!(iters.len(), 1);
        assert!(matches!(iters[0], LsmIterator::Concat(_)));
        for mut it in iters {
            it.close().expect("close failed");
        }

        // A pick_tables predicate that drops everything yields nothing.
        let opt = IteratorOptions::new(false).with_pick_tables(|_| Vec::new());
        let mut iters = Vec::new();
        handler.append_iterators(&mut iters, &opt);
        assert!(iters.is_empty());
    }

    #[test]
    fn cross_level_scan_merges_version_aware() {
        let l0 = LevelHandler::new(test_config(), 0);
        let (_, t1) = table(1, vec![kv("a", 2, "l0-old")]);
        let (_, t2) = table(2, vec![kv("a", 4, "l0-new")]);
        l0.init_tables(vec![t1, t2]);

        let l1 = LevelHandler::new(test_config(), 1);
        let (_, t3) = table(3, vec![kv("a", 3, "l1"), kv("b", 1, "l1-b")]);
        l1.init_tables(vec![t3]);

        let mut iters = Vec::new();
        let opt = IteratorOptions::new(false);
        l0.append_iterators(&mut iters, &opt);
        l1.append_iterators(&mut iters, &opt);

        let mut merged = MergeIterator::from_iterators(iters, false).expect("iterator expected");
        merged.rewind();

        let mut seen = Vec::new();
        while merged.valid() {
            seen.push((
                parse_user_key(merged.key()).to_vec(),
                key::parse_version(merged.key()),
            ));
            merged.next();
        }
        merged.close().expect("close failed");

        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), 4),
                (b"a".to_vec(), 3),
                (b"a".to_vec(), 2),
                (b"b".to_vec(), 1),
            ]
        );
    }
}
