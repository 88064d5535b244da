//! Level plumbing for an LSM-tree key-value store.
//!
//! This crate implements the read-side and compaction-side machinery
//! that sits between an LSM tree's public API and its on-disk tables:
//!
//! * [`level::LevelHandler`] owns the table set at one level and
//!   mediates concurrent readers and table installers.
//! * [`table::merge::MergeIterator`] fuses N sorted, versioned-key
//!   iterators into one seek-able stream.
//! * [`discard::DiscardStats`] holds the memory-mapped per-value-log-file
//!   reclaimable-byte counters that steer value-log garbage collection.
//!
//! Tables themselves are opaque: anything implementing [`table::Table`]
//! plugs in.

pub mod config;
pub mod discard;
pub mod error;
pub mod key;
pub mod level;
pub mod metrics;
pub mod mmap;
pub mod table;

pub use config::LsmConfig;
pub use discard::DiscardStats;
pub use error::{Error, Result};
pub use level::{IteratorOptions, KeyRange, LevelHandler};
pub use table::{Table, TableIterator, Value};
