use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Record of the last successful source retrieval for one component.
///
/// Removed before every fresh retrieval attempt so an interrupted fetch
/// never leaves a marker describing sources that are not on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalMarker {
    pub component: String,
    pub source: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    pub fetched_at: String,
}

impl RetrievalMarker {
    pub fn new(component: &str, source: &str) -> Self {
        Self {
            component: component.to_owned(),
            source: source.to_owned(),
            revision: None,
            checksum: None,
            fetched_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(self)?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }

    /// Read a marker; a missing file is `Ok(None)`.
    pub fn read(path: &Path) -> Result<Option<Self>, StoreError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a marker if present.
    pub fn remove(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_ofi.fetched");
        let mut marker = RetrievalMarker::new("ofi", "https://example.com/ofi.git");
        marker.revision = Some("v1.15.1".to_owned());
        marker.write(&path).unwrap();

        let loaded = RetrievalMarker::read(&path).unwrap().unwrap();
        assert_eq!(loaded, marker);
        assert!(chrono::DateTime::parse_from_rfc3339(&loaded.fetched_at).is_ok());
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RetrievalMarker::read(&dir.path().join("_x.fetched"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_ofi.fetched");
        RetrievalMarker::new("ofi", "src").write(&path).unwrap();
        RetrievalMarker::remove(&path).unwrap();
        assert!(!path.exists());
        RetrievalMarker::remove(&path).unwrap();
    }

    #[test]
    fn corrupt_marker_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_ofi.fetched");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            RetrievalMarker::read(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}
