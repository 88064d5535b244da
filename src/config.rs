use std::path::PathBuf;

/// Configuration for the LSM level plumbing.
#[derive(Debug, Clone)]
pub struct LsmConfig {
    /// Directory path for LSM tree files.
    pub dir: PathBuf,

    /// Directory path for value log files. The discard-stats file lives
    /// here. Defaults to `dir`.
    pub value_dir: PathBuf,

    /// Number of levels in the tree (default: 7).
    pub max_levels: usize,

    /// Number of level 0 tables at which writers must stall (default: 15).
    pub num_level_zero_tables_stall: usize,

    /// Whether per-level counters are recorded (default: true).
    pub metrics_enabled: bool,
}

impl LsmConfig {
    /// Creates a configuration rooted at `dir`, with the value directory
    /// colocated.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            value_dir: dir.clone(),
            dir,
            ..Self::default()
        }
    }
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            value_dir: PathBuf::from("./emberdb"),
            max_levels: 7,
            num_level_zero_tables_stall: 15,
            metrics_enabled: true,
        }
    }
}
