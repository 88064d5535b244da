//! Per-value-log-file discard statistics.
//!
//! Value-log garbage collection needs to know, for every log file, how
//! many bytes have been superseded by newer versions. [`DiscardStats`]
//! keeps those counters in a small memory-mapped file of fixed 16-byte
//! slots so they survive restarts and cost one write to bump.
//!
//! On-disk layout (`DISCARD` in the value directory):
//!
//! ```text
//! +----------------+---------+----------------+
//! |   slot (16B)   |   ...   |   slot (16B)   |
//! +----------------+---------+----------------+
//! slot = [ fid: u64 BE ][ discard: u64 BE ]
//! ```
//!
//! Slots `[0, next_empty_slot)` are valid and sorted by fid ascending;
//! the slot at `next_empty_slot` is zeroed as a sentinel. The file
//! starts at 1 MiB and doubles when it fills; it never shrinks.

use std::sync::Mutex;

use byteorder::{BigEndian, ByteOrder};

use crate::config::LsmConfig;
use crate::error::Result;
use crate::mmap::MmapFile;

/// Name of the stats file inside the value directory.
pub const DISCARD_FILE_NAME: &str = "DISCARD";

const SLOT_SIZE: usize = 16;

/// 1 MiB holds 65 536 slots.
const INITIAL_FILE_SIZE: u64 = 1 << 20;

/// Reclaimable-byte counters per value-log file, mapped from disk.
///
/// One mutex serialises every reader and writer, including the
/// truncate-and-remap window during growth.
pub struct DiscardStats {
    inner: Mutex<DiscardInner>,
}

struct DiscardInner {
    file: MmapFile,
    next_empty_slot: usize,
}

impl DiscardInner {
    fn get(&self, offset: usize) -> u64 {
        BigEndian::read_u64(&self.file.data()[offset..offset + 8])
    }

    fn set(&mut self, offset: usize, val: u64) {
        BigEndian::write_u64(&mut self.file.data_mut()[offset..offset + 8], val);
    }

    fn max_slot(&self) -> usize {
        self.file.len() / SLOT_SIZE
    }

    /// Zeroes the sentinel slot at `next_empty_slot`.
    fn zero_out(&mut self) {
        let offset = self.next_empty_slot * SLOT_SIZE;
        self.set(offset, 0);
        self.set(offset + 8, 0);
    }

    /// Sorts the valid prefix by fid. The file may have been written by
    /// an older version in arbitrary order.
    fn sort_slots(&mut self) {
        let n = self.next_empty_slot;
        let mut slots: Vec<(u64, u64)> = (0..n)
            .map(|slot| (self.get(slot * SLOT_SIZE), self.get(slot * SLOT_SIZE + 8)))
            .collect();
        slots.sort_by_key(|&(fid, _)| fid);
        for (slot, (fid, discard)) in slots.into_iter().enumerate() {
            self.set(slot * SLOT_SIZE, fid);
            self.set(slot * SLOT_SIZE + 8, discard);
        }
    }
}

impl DiscardStats {
    /// Maps the stats file in `value_dir`, creating it if missing, and
    /// recovers `next_empty_slot` from the first zero-fid slot.
    pub fn open(config: &LsmConfig) -> Result<DiscardStats> {
        let path = config.value_dir.join(DISCARD_FILE_NAME);
        let (file, is_new) = MmapFile::open(&path, INITIAL_FILE_SIZE)?;

        let mut inner = DiscardInner {
            file,
            next_empty_slot: 0,
        };
        if is_new {
            inner.zero_out();
        }
        for slot in 0..inner.max_slot() {
            if inner.get(slot * SLOT_SIZE) == 0 {
                inner.next_empty_slot = slot;
                break;
            }
        }
        inner.sort_slots();
        tracing::info!(
            path = %inner.file.path().display(),
            next_empty_slot = inner.next_empty_slot,
            "discard stats loaded"
        );

        Ok(DiscardStats {
            inner: Mutex::new(inner),
        })
    }

    /// Updates the discard counter for `fid` and returns the resulting
    /// value:
    ///
    /// * `discard > 0` adds to the counter, creating the slot if needed;
    /// * `discard == 0` queries the current value;
    /// * `discard < 0` resets the counter to zero.
    ///
    /// Queries and resets for an unknown fid return 0 without
    /// allocating a slot. Growing the file can fail, hence the Result.
    pub fn update(&self, fid: u32, discard: i64) -> Result<i64> {
        let fid = u64::from(fid);
        let mut inner = self.inner.lock().unwrap();

        let n = inner.next_empty_slot;
        let (mut lo, mut hi) = (0usize, n);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if inner.get(mid * SLOT_SIZE) < fid {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let idx = lo;

        if idx < n && inner.get(idx * SLOT_SIZE) == fid {
            let offset = idx * SLOT_SIZE + 8;
            let current = inner.get(offset);
            if discard == 0 {
                return Ok(current as i64);
            }
            if discard < 0 {
                inner.set(offset, 0);
                return Ok(0);
            }
            let updated = current + discard as u64;
            inner.set(offset, updated);
            return Ok(updated as i64);
        }

        if discard <= 0 {
            // Unknown fid and nothing to add; no slot is created.
            return Ok(0);
        }

        // New fid: open its sorted position by shifting the tail one
        // slot to the right. The sentinel slot guarantees room.
        for slot in (idx..n).rev() {
            let fid_v = inner.get(slot * SLOT_SIZE);
            let discard_v = inner.get(slot * SLOT_SIZE + 8);
            inner.set((slot + 1) * SLOT_SIZE, fid_v);
            inner.set((slot + 1) * SLOT_SIZE + 8, discard_v);
        }
        inner.set(idx * SLOT_SIZE, fid);
        inner.set(idx * SLOT_SIZE + 8, discard as u64);
        inner.next_empty_slot += 1;

        while inner.next_empty_slot >= inner.max_slot() {
            let new_len = 2 * inner.file.len() as u64;
            inner.file.truncate(new_len)?;
        }
        inner.zero_out();

        Ok(discard)
    }

    /// Invokes `f(fid, discard)` for every valid slot in storage order.
    pub fn iterate<F: FnMut(u64, u64)>(&self, mut f: F) {
        let inner = self.inner.lock().unwrap();
        for slot in 0..inner.next_empty_slot {
            let offset = slot * SLOT_SIZE;
            f(inner.get(offset), inner.get(offset + 8));
        }
    }

    /// Returns the `(fid, discard)` pair with the maximum discard, or
    /// `(0, 0)` if there are no counters.
    pub fn max_discard(&self) -> (u32, i64) {
        let inner = self.inner.lock().unwrap();
        let (mut max_fid, mut max_val) = (0u64, 0u64);
        for slot in 0..inner.next_empty_slot {
            let offset = slot * SLOT_SIZE;
            let (fid, val) = (inner.get(offset), inner.get(offset + 8));
            if max_val < val {
                max_val = val;
                max_fid = fid;
            }
        }
        (max_fid as u32, max_val as i64)
    }

    /// Flushes the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().unwrap().file.sync()
    }

    /// Flushes and releases the mapping.
    pub fn close(self) -> Result<()> {
        let inner = self.inner.into_inner().unwrap();
        inner.file.sync()
    }
}
