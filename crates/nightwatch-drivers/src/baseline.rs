//! Persisted calibration baselines.
//!
//! One JSON file per detector under `<data_dir>/baselines/`. The cache is
//! advisory: a missing or unreadable file simply means recalibration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};

/// Stores per-detector baseline parameter maps.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    /// Creates a store rooted at `<data_dir>/baselines`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("baselines"),
        }
    }

    fn path_for(&self, detector: &str) -> PathBuf {
        self.dir.join(format!("{detector}.json"))
    }

    /// Loads a detector's baseline, `None` when absent or unreadable.
    pub fn load(&self, detector: &str) -> Option<BTreeMap<String, f64>> {
        let path = self.path_for(detector);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(map) => {
                debug!(detector, path = %path.display(), "baseline loaded");
                Some(map)
            }
            Err(e) => {
                warn!(detector, error = %e, "baseline unreadable, will rebuild");
                None
            }
        }
    }

    /// Saves a detector's baseline, creating the directory as needed.
    pub fn save(&self, detector: &str, baseline: &BTreeMap<String, f64>) -> DriverResult<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| DriverError::fatal(format!("create {}: {e}", self.dir.display())))?;
        let path = self.path_for(detector);
        let json = serde_json::to_string_pretty(baseline)
            .map_err(|e| DriverError::fatal(format!("encode baseline: {e}")))?;
        std::fs::write(&path, json)
            .map_err(|e| DriverError::fatal(format!("write {}: {e}", path.display())))?;
        debug!(detector, path = %path.display(), "baseline saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());

        assert!(store.load("capacitive").is_none());

        let mut baseline = BTreeMap::new();
        baseline.insert("occupancy_threshold".to_string(), 0.042);
        store.save("capacitive", &baseline).unwrap();

        let loaded = store.load("capacitive").unwrap();
        assert_eq!(loaded.get("occupancy_threshold"), Some(&0.042));
    }

    #[test]
    fn corrupt_file_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("baselines")).unwrap();
        std::fs::write(dir.path().join("baselines/bcg.json"), "{not json").unwrap();
        assert!(store.load("bcg").is_none());
    }
}
