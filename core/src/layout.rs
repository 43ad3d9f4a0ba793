//! On-disk path conventions for a routine's data directory.
//!
//! A working tree is a plain directory, not an archive: `<data_dir>/<routine_id>/`
//! holding the routine definition, its reference frames and persisted
//! execution stats. Archival (`.zip`/similar) is an external collaborator
//! concern — this module only names the paths involved
//! so the scheduler binary and tests agree on where things live.

use std::path::{Path, PathBuf};

/// The directory holding everything for one routine.
pub fn routine_dir(data_dir: &Path, routine_id: &str) -> PathBuf {
    data_dir.join(routine_id)
}

/// The routine definition file (bincode-serialized [`crate::model::Routine`]).
pub fn routine_path(data_dir: &Path, routine_id: &str) -> PathBuf {
    routine_dir(data_dir, routine_id).join("routine.bin")
}

/// A reference frame's PNG, by frame id.
pub fn frame_path(data_dir: &Path, routine_id: &str, frame_id: &str) -> PathBuf {
    routine_dir(data_dir, routine_id)
        .join("img")
        .join(format!("{frame_id}.png"))
}

/// Persisted per-edge [`crate::model::ExecutionInfo`] table.
pub fn runtimedata_path(data_dir: &Path, routine_id: &str) -> PathBuf {
    routine_dir(data_dir, routine_id).join("runtimedata.bin")
}

/// Where an archived (exported) copy of the routine directory would be
/// written. The archiving itself is out of scope; only the destination
/// naming convention is fixed here.
pub fn archive_path(data_dir: &Path, routine_id: &str) -> PathBuf {
    data_dir.join(format!("{routine_id}.zip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_under_the_routine_directory() {
        let data_dir = Path::new("/data");
        assert_eq!(
            frame_path(data_dir, "r1", "f1"),
            PathBuf::from("/data/r1/img/f1.png")
        );
        assert_eq!(
            runtimedata_path(data_dir, "r1"),
            PathBuf::from("/data/r1/runtimedata.bin")
        );
        assert_eq!(archive_path(data_dir, "r1"), PathBuf::from("/data/r1.zip"));
    }
}
