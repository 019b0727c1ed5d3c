//! Companion manifest written by the exporter.

use crate::error::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the manifest at the catalog root.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Export manifest: authoritative object count plus an optional object list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    pub object_count: usize,

    #[serde(default)]
    pub objects: Vec<ManifestObject>,
}

/// One exported object as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestObject {
    #[serde(rename = "type")]
    pub object_type: String,

    #[serde(default)]
    pub schema: Option<String>,

    pub name: String,

    #[serde(default)]
    pub file_path: Option<String>,
}

impl ExportManifest {
    /// Load the manifest from a catalog root, if one is present.
    pub fn load_from_root(root: &Path) -> Result<Option<Self>> {
        let path = root.join(MANIFEST_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let manifest: Self = serde_json::from_str(&content).map_err(|e| {
            ImportError::Catalog(format!("invalid manifest {}: {}", path.display(), e))
        })?;
        Ok(Some(manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ExportManifest::load_from_root(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_manifest_parses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE_NAME),
            r#"{"objectCount": 2, "objects": [
                {"type": "Table", "schema": "dbo", "name": "Orders",
                 "filePath": "09_Tables_PrimaryKey/dbo.Orders.sql"},
                {"type": "Schema", "name": "app"}
            ]}"#,
        )
        .unwrap();

        let manifest = ExportManifest::load_from_root(dir.path()).unwrap().unwrap();
        assert_eq!(manifest.object_count, 2);
        assert_eq!(manifest.objects[0].schema.as_deref(), Some("dbo"));
        assert_eq!(manifest.objects[1].file_path, None);
    }

    #[test]
    fn test_corrupt_manifest_is_catalog_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE_NAME), "{not json").unwrap();
        let err = ExportManifest::load_from_root(dir.path()).unwrap_err();
        assert!(matches!(err, ImportError::Catalog(_)));
    }
}
