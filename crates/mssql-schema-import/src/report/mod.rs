//! Integrity report written at the end of every import run.

use crate::catalog::{FailureClass, ManifestObject, ObjectType, ScriptUnit, SkipReason, UnitStatus};
use crate::config::{EffectiveConfiguration, ImportMode};
use crate::error::Result;
use crate::scheduler::RunStatus;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

/// Report file name prefix; the full name is `import-report-<yyyyMMdd_HHmmss>.json`,
/// with a `_N` suffix when that name is already taken.
pub const REPORT_FILE_PREFIX: &str = "import-report-";

/// A unit that was not submitted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRecord {
    pub object: String,
    pub path: String,
    pub object_type: ObjectType,
    pub reason_code: SkipReason,
}

/// A unit whose last attempt failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub object: String,
    pub path: String,
    pub object_type: ObjectType,
    pub status: UnitStatus,
    pub attempts: u32,
    pub error_message: String,
    pub classification: FailureClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// A unit applied to the target.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedObject {
    pub object: String,
    pub path: String,
    pub object_type: ObjectType,
    pub phase: u8,
    /// SHA-256 of the script text as submitted.
    pub sha256: String,
}

/// Where a StopOnError run stopped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRecord {
    pub object: String,
    pub message: String,
}

/// Run-level facts the report is built from.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub import_mode: ImportMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub exported_object_count: usize,
    pub exported_objects: Vec<ManifestObject>,
    pub effective_configuration: EffectiveConfiguration,
    pub aborted_at: Option<(String, String)>,
}

/// Final report of an import run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub run_id: String,
    pub status: RunStatus,
    pub import_mode: ImportMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Total duration in seconds.
    pub duration: f64,
    pub exported_object_count: usize,
    pub imported_object_count: usize,
    pub skipped_object_count: usize,
    pub failed_object_count: usize,
    /// Units never attempted because the run stopped early.
    pub pending_object_count: usize,
    pub skipped_reasons: BTreeMap<String, usize>,
    pub effective_configuration: EffectiveConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<AbortRecord>,
    pub exported_objects: Vec<ManifestObject>,
    pub imported_objects: Vec<ImportedObject>,
    pub skipped_objects: Vec<SkipRecord>,
    pub failed_objects: Vec<FailureRecord>,
}

/// Reason code → number of skipped units.
pub fn skip_histogram(records: &[SkipRecord]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for record in records {
        *histogram
            .entry(record.reason_code.code().to_string())
            .or_insert(0) += 1;
    }
    histogram
}

fn sha256_hex(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl ImportReport {
    /// Build the report from final unit states.
    pub fn build(summary: RunSummary, units: &[ScriptUnit]) -> Self {
        let mut imported_objects = Vec::new();
        let mut skipped_objects = Vec::new();
        let mut failed_objects = Vec::new();
        let mut pending_object_count = 0;

        for unit in units {
            match unit.status {
                UnitStatus::Applied => imported_objects.push(ImportedObject {
                    object: unit.qualified_name(),
                    path: unit.relative_path.clone(),
                    object_type: unit.object_type.clone(),
                    phase: unit.phase,
                    sha256: sha256_hex(&unit.content),
                }),
                UnitStatus::Skipped => {
                    if let Some(reason) = unit.skip_reason {
                        skipped_objects.push(SkipRecord {
                            object: unit.qualified_name(),
                            path: unit.relative_path.clone(),
                            object_type: unit.object_type.clone(),
                            reason_code: reason,
                        });
                    }
                }
                UnitStatus::FailedDeferred | UnitStatus::FailedFatal | UnitStatus::FailedPermanent => {
                    failed_objects.push(FailureRecord {
                        object: unit.qualified_name(),
                        path: unit.relative_path.clone(),
                        object_type: unit.object_type.clone(),
                        status: unit.status,
                        attempts: unit.attempt_count,
                        error_message: unit.last_error.clone().unwrap_or_default(),
                        classification: unit.classification.unwrap_or(FailureClass::Fatal),
                        hint: unit.hint.clone(),
                    })
                }
                UnitStatus::Pending => pending_object_count += 1,
            }
        }

        let duration = (summary.completed_at - summary.started_at).num_milliseconds() as f64 / 1000.0;

        Self {
            run_id: summary.run_id,
            status: summary.status,
            import_mode: summary.import_mode,
            started_at: summary.started_at,
            completed_at: summary.completed_at,
            duration,
            exported_object_count: summary.exported_object_count,
            imported_object_count: imported_objects.len(),
            skipped_object_count: skipped_objects.len(),
            failed_object_count: failed_objects.len(),
            pending_object_count,
            skipped_reasons: skip_histogram(&skipped_objects),
            effective_configuration: summary.effective_configuration,
            aborted_at: summary
                .aborted_at
                .map(|(object, message)| AbortRecord { object, message }),
            exported_objects: summary.exported_objects,
            imported_objects,
            skipped_objects,
            failed_objects,
        }
    }

    /// `import-report-<yyyyMMdd_HHmmss>.json`, in local time of completion.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}.json",
            REPORT_FILE_PREFIX,
            self.completed_at
                .with_timezone(&Local)
                .format("%Y%m%d_%H%M%S")
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report into `dir`. Returns the path written.
    ///
    /// An existing report with the same timestamp is never replaced; the
    /// name gets a `_1`, `_2`, ... suffix instead.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let content = self.to_json()?;
        let path = reserve_path(dir, &self.file_name())?;

        // Atomic write: write to temp file, then rename over the reservation
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &path)?;

        info!(path = %path.display(), "Import report written");
        Ok(path)
    }
}

/// Claim the first free name derived from `file_name` by creating it empty.
fn reserve_path(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            dir.join(file_name)
        } else {
            dir.join(format!("{}_{}.json", stem, attempt))
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
