//! Export-tree walker.

use super::manifest::{ExportManifest, ManifestObject};
use super::object_type::{
    classify_programmability_folder, classify_top_folder, ObjectType, PROGRAMMABILITY_FOLDER,
};
use super::ScriptUnit;
use crate::error::{ImportError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A loaded catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Catalog root directory.
    pub root: PathBuf,

    /// Units in execution order (phase, sub-phase, path).
    pub units: Vec<ScriptUnit>,

    /// Manifest object count, or the number of script files found.
    pub exported_object_count: usize,

    /// Object list from the manifest (empty without one).
    pub exported_objects: Vec<ManifestObject>,

    /// Whether a manifest was found.
    pub has_manifest: bool,
}

/// Load every script under `root` into ordered units.
pub fn load_catalog(root: &Path) -> Result<Catalog> {
    if !root.is_dir() {
        return Err(ImportError::Catalog(format!(
            "source directory not found: {}",
            root.display()
        )));
    }

    let mut units = Vec::new();
    let mut script_files = 0usize;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ImportError::Catalog(format!("cannot read {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() || !is_script(entry.path()) {
            continue;
        }
        script_files += 1;

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let relative_path = components.join("/");

        if components.len() < 2 {
            warn!("Ignoring script outside any phase folder: {}", relative_path);
            continue;
        }

        let (phase, top_type) = classify_top_folder(&components[0]);
        let (sub_phase, object_type) = match top_type {
            Some(object_type) => (None, object_type),
            None if components.len() >= 3 => {
                let (sub_phase, object_type) = classify_programmability_folder(&components[1]);
                (Some(sub_phase), object_type)
            }
            None => (
                Some(0),
                ObjectType::Other(PROGRAMMABILITY_FOLDER.to_string()),
            ),
        };

        let bytes = std::fs::read(entry.path())?;
        let content = decode_script(&bytes).map_err(|e| {
            ImportError::Catalog(format!("cannot decode {}: {}", relative_path, e))
        })?;

        debug!(
            path = %relative_path,
            phase,
            object_type = %object_type,
            "Loaded script"
        );
        units.push(ScriptUnit::new(
            relative_path,
            phase,
            sub_phase,
            object_type,
            content,
        ));
    }

    units.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

    let manifest = ExportManifest::load_from_root(root)?;
    let has_manifest = manifest.is_some();
    let (exported_object_count, exported_objects) = match manifest {
        Some(manifest) => {
            reconcile(&manifest, &units);
            (manifest.object_count, manifest.objects)
        }
        None => (script_files, Vec::new()),
    };

    info!(
        "Loaded {} scripts from {} ({} exported objects{})",
        units.len(),
        root.display(),
        exported_object_count,
        if has_manifest { ", from manifest" } else { "" }
    );

    Ok(Catalog {
        root: root.to_path_buf(),
        units,
        exported_object_count,
        exported_objects,
        has_manifest,
    })
}

fn is_script(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("sql"))
        .unwrap_or(false)
}

/// Decode script bytes, honouring UTF-8 and UTF-16 byte order marks.
fn decode_script(bytes: &[u8]) -> std::result::Result<String, String> {
    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8(rest.to_vec()).map_err(|e| e.to_string()),
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        _ => String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string()),
    }
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> std::result::Result<String, String> {
    if bytes.len() % 2 != 0 {
        return Err("odd byte count in UTF-16 script".to_string());
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| read([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| e.to_string())
}

/// Warn about manifest entries that have no script in the tree.
fn reconcile(manifest: &ExportManifest, units: &[ScriptUnit]) {
    let present: HashSet<String> = units
        .iter()
        .map(|u| u.relative_path.to_ascii_lowercase())
        .collect();

    let missing: Vec<&str> = manifest
        .objects
        .iter()
        .filter_map(|o| o.file_path.as_deref())
        .filter(|p| !present.contains(&p.replace('\\', "/").to_ascii_lowercase()))
        .collect();

    for path in &missing {
        warn!("Manifest lists {} but no such script exists", path);
    }
    if manifest.object_count != manifest.objects.len() && !manifest.objects.is_empty() {
        warn!(
            "Manifest objectCount {} differs from its object list ({} entries)",
            manifest.object_count,
            manifest.objects.len()
        );
    }
}
