//! Persistence for per-edge [`ExecutionInfo`].
//!
//! Retry/backoff state would otherwise reset on every restart; this module
//! persists the table with bincode at [`crate::layout::runtimedata_path`] so
//! a restarted scheduler picks up where it left off.

use std::collections::HashMap;
use std::path::Path;

use crate::model::ExecutionInfo;

pub type ExecInfoTable = HashMap<String, ExecutionInfo>;

/// Loads the table from `path`, or an empty table if it doesn't exist yet
/// (a fresh routine has no execution history).
pub fn load(path: &Path) -> anyhow::Result<ExecInfoTable> {
    if !path.exists() {
        return Ok(ExecInfoTable::new());
    }
    let bytes = std::fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Writes the table to `path`, creating parent directories as needed.
pub fn save(path: &Path, table: &ExecInfoTable) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = bincode::serialize(table)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtimedata.bin");
        let table = load(&path).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runtimedata.bin");
        let mut table = ExecInfoTable::new();
        table.insert(
            "e1".to_string(),
            ExecutionInfo {
                total_attempts: 3,
                failure_count: 1,
                consecutive_failures: 1,
                next_retry_ms: 1_000,
            },
        );
        save(&path, &table).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded["e1"].total_attempts, 3);
        assert_eq!(loaded["e1"].next_retry_ms, 1_000);
    }
}
