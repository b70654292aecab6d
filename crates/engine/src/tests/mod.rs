mod compaction_tests;
mod recovery_tests;
mod write_tests;

use crate::DbOptions;
use std::time::Duration;

/// Options tuned for tests: tiny flush threshold, fast worker ticks.
pub fn test_options() -> DbOptions {
    DbOptions {
        sync_on_write: false,
        flush_threshold: 1024,
        compaction_threshold: 4,
        flush_interval: Duration::from_millis(50),
        compaction_interval: Duration::from_millis(50),
    }
}

/// Polls `cond` for up to two seconds.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Counts `.sst` files in a database directory.
pub fn count_sst_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "sst")
                .unwrap_or(false)
        })
        .count()
}
