use std::sync::atomic::{AtomicU64, Ordering};

/// Lookup counters for one level.
///
/// Increments are gated by the `metrics_enabled` configuration flag and
/// use relaxed atomics; the counters are advisory and never synchronise
/// other state.
#[derive(Debug, Default)]
pub struct LevelMetrics {
    num_gets: AtomicU64,
    num_bloom_hits: AtomicU64,
}

impl LevelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a table probe during a point lookup.
    pub fn add_get(&self, enabled: bool) {
        if enabled {
            self.num_gets.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a table skipped because its bloom filter ruled the key out.
    pub fn add_bloom_hit(&self, enabled: bool) {
        if enabled {
            self.num_bloom_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn num_gets(&self) -> u64 {
        self.num_gets.load(Ordering::Relaxed)
    }

    pub fn num_bloom_hits(&self) -> u64 {
        self.num_bloom_hits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_respect_enabled_flag() {
        let metrics = LevelMetrics::new();
        metrics.add_get(true);
        metrics.add_get(true);
        metrics.add_bloom_hit(true);
        metrics.add_get(false);
        metrics.add_bloom_hit(false);

        assert_eq!(metrics.num_gets(), 2);
        assert_eq!(metrics.num_bloom_hits(), 1);
    }
}
