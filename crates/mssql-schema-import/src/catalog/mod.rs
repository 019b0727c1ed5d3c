//! Script catalog: the unit model and the export-tree loader.
//!
//! A catalog is the directory tree written by the exporter: numbered
//! top-level folders (`00_FileGroups` .. `21_Data`), nested numbering under
//! `14_Programmability`, one `.sql` file per object, plus an optional
//! `manifest.json` at the root.

mod loader;
mod manifest;
mod object_type;

pub use loader::{load_catalog, Catalog};
pub use manifest::{ExportManifest, ManifestObject, MANIFEST_FILE_NAME};
pub use object_type::{
    classify_programmability_folder, classify_top_folder, split_numeric_prefix, ObjectType,
    PROGRAMMABILITY_PHASE, UNNUMBERED_PHASE,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a script unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Pending,
    Applied,
    Skipped,
    #[serde(rename = "Failed-Deferred")]
    FailedDeferred,
    #[serde(rename = "Failed-Fatal")]
    FailedFatal,
    #[serde(rename = "Failed-Permanent")]
    FailedPermanent,
}

/// Why a unit was not submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    ExcludedByType,
    ExcludedBySchema,
    ExcludedByName,
    #[serde(rename = "DevMode_FileGroup")]
    DevModeFileGroup,
    #[serde(rename = "DevMode_DatabaseConfiguration")]
    DevModeDatabaseConfiguration,
    #[serde(rename = "DevMode_SecurityPolicy")]
    DevModeSecurityPolicy,
    #[serde(rename = "DevMode_ExternalData")]
    DevModeExternalData,
    #[serde(rename = "DevMode_AlwaysEncrypted")]
    DevModeAlwaysEncrypted,
    #[serde(rename = "DevMode_FileStream")]
    DevModeFileStream,
    #[serde(rename = "DevMode_CLRAssembly")]
    DevModeClrAssembly,
    EmptyScript,
}

impl SkipReason {
    /// Reason code as written in reports.
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::ExcludedByType => "ExcludedByType",
            SkipReason::ExcludedBySchema => "ExcludedBySchema",
            SkipReason::ExcludedByName => "ExcludedByName",
            SkipReason::DevModeFileGroup => "DevMode_FileGroup",
            SkipReason::DevModeDatabaseConfiguration => "DevMode_DatabaseConfiguration",
            SkipReason::DevModeSecurityPolicy => "DevMode_SecurityPolicy",
            SkipReason::DevModeExternalData => "DevMode_ExternalData",
            SkipReason::DevModeAlwaysEncrypted => "DevMode_AlwaysEncrypted",
            SkipReason::DevModeFileStream => "DevMode_FileStream",
            SkipReason::DevModeClrAssembly => "DevMode_CLRAssembly",
            SkipReason::EmptyScript => "EmptyScript",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure classification of a unit's last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// Referenced object not found yet; likely an ordering problem.
    Deferred,
    /// Anything else.
    Fatal,
}

/// One object-definition script from the catalog.
#[derive(Debug, Clone)]
pub struct ScriptUnit {
    /// Path relative to the catalog root, always with `/` separators.
    pub relative_path: String,

    /// Ordinal of the top-level folder.
    pub phase: u8,

    /// Ordinal of the programmability sub-folder.
    pub sub_phase: Option<u8>,

    pub object_type: ObjectType,

    pub schema: Option<String>,

    pub name: String,

    /// Script text; rewritten in place by the transformation pipeline.
    pub content: String,

    pub status: UnitStatus,

    /// Number of submission attempts so far.
    pub attempt_count: u32,

    /// Leading `GO` batches already applied; a retry resumes after them.
    pub completed_batches: usize,

    pub skip_reason: Option<SkipReason>,

    pub last_error: Option<String>,

    pub classification: Option<FailureClass>,

    /// Operator guidance attached to a failure.
    pub hint: Option<String>,
}

impl ScriptUnit {
    /// Create a pending unit.
    pub fn new(
        relative_path: impl Into<String>,
        phase: u8,
        sub_phase: Option<u8>,
        object_type: ObjectType,
        content: impl Into<String>,
    ) -> Self {
        let relative_path = relative_path.into();
        let (schema, name) = split_object_name(&relative_path);
        Self {
            relative_path,
            phase,
            sub_phase,
            object_type,
            schema,
            name,
            content: content.into(),
            status: UnitStatus::Pending,
            attempt_count: 0,
            completed_batches: 0,
            skip_reason: None,
            last_error: None,
            classification: None,
            hint: None,
        }
    }

    /// `schema.name`, or just `name` when the file had no schema part.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    /// Sort key: phase, sub-phase, then path.
    pub fn order_key(&self) -> (u8, u8, &str) {
        (self.phase, self.sub_phase.unwrap_or(0), &self.relative_path)
    }

    pub fn is_skipped(&self) -> bool {
        self.status == UnitStatus::Skipped
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self.status,
            UnitStatus::FailedDeferred | UnitStatus::FailedFatal | UnitStatus::FailedPermanent
        )
    }

    /// Mark the unit as skipped. The first reason recorded wins.
    pub fn mark_skipped(&mut self, reason: SkipReason) {
        if self.status == UnitStatus::Skipped {
            return;
        }
        self.status = UnitStatus::Skipped;
        self.skip_reason = Some(reason);
    }

    /// Mark the unit as applied, clearing any earlier failure.
    pub fn mark_applied(&mut self) {
        self.status = UnitStatus::Applied;
        self.last_error = None;
        self.classification = None;
    }

    /// Mark the unit as failed with the given terminal or deferred status.
    pub fn mark_failed(&mut self, status: UnitStatus, class: FailureClass, error: &str) {
        self.status = status;
        self.classification = Some(class);
        self.last_error = Some(error.to_string());
    }
}

/// Split a script path into (schema, name) on the first `.` of its base name.
///
/// The `.sql` extension is dropped first; `dbo.Orders.sql` gives
/// `(Some("dbo"), "Orders")` and `Setup.sql` gives `(None, "Setup")`.
pub fn split_object_name(relative_path: &str) -> (Option<String>, String) {
    let file_name = relative_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(relative_path);
    let base = match file_name.len().checked_sub(4) {
        Some(cut)
            if file_name.is_char_boundary(cut) && file_name[cut..].eq_ignore_ascii_case(".sql") =>
        {
            &file_name[..cut]
        }
        _ => file_name,
    };

    match base.split_once('.') {
        Some((schema, name)) => (Some(schema.to_string()), name.to_string()),
        None => (None, base.to_string()),
    }
}
