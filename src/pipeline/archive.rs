//! Cycle archive - one JSON document per run

use std::path::{Path, PathBuf};

use crate::core::Result;

use super::state::StateRecord;

/// Write `record` to `<dir>/<cycle_id>.json`, creating `dir` if needed.
pub fn write_record(dir: &Path, record: &StateRecord) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", record.cycle_id()));
    let document = record.to_document()?;
    std::fs::write(&path, serde_json::to_vec_pretty(&document)?)?;
    tracing::info!("💾 Archived cycle {} to {}", record.cycle_id(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Symbol;
    use uuid::Uuid;

    #[test]
    fn test_write_record() {
        let dir = tempfile::tempdir().unwrap();
        let cycle_id = Uuid::new_v4();
        let record = StateRecord::new(Symbol::new("hdfcbank"), cycle_id);

        let path = write_record(&dir.path().join("cycles"), &record).unwrap();
        assert_eq!(path.file_name().unwrap().to_string_lossy(), format!("{}.json", cycle_id));

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["symbol"], "HDFCBANK");
        assert_eq!(doc["cycle_id"], cycle_id.to_string());
    }
}
