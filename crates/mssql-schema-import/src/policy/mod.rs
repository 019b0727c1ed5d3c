//! Environment policy: what a Dev or Prod import is allowed to create.

use crate::catalog::{ObjectType, ScriptUnit, SkipReason};
use crate::config::{FileGroupSizing, FileGroupStrategy, ImportMode, ImportSettings};
use crate::transform::{filegroup, PipelineOptions};
use tracing::debug;

/// Per-run environment policy.
#[derive(Debug, Clone)]
pub struct EnvironmentPolicy {
    mode: ImportMode,
    strategy: FileGroupStrategy,
    enable_clr: bool,
    strip_filestream: bool,
    strip_always_encrypted: bool,
    sizing_override: Option<FileGroupSizing>,
}

impl EnvironmentPolicy {
    pub fn from_settings(settings: &ImportSettings) -> Self {
        Self {
            mode: settings.import_mode,
            strategy: settings.file_group_strategy,
            enable_clr: settings.clr.enable_clr,
            strip_filestream: settings.strip_filestream,
            strip_always_encrypted: settings.strip_always_encrypted,
            sizing_override: settings.file_group_sizing,
        }
    }

    pub fn mode(&self) -> ImportMode {
        self.mode
    }

    pub fn strategy(&self) -> FileGroupStrategy {
        self.strategy
    }

    /// Rewrite stages this policy enables.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            file_group_strategy: self.strategy,
            strip_filestream: self.strip_filestream,
            strip_always_encrypted: self.strip_always_encrypted,
        }
    }

    /// Sizing for filegroup data files created on the target.
    ///
    /// Overrides only apply in Prod.
    pub fn file_group_sizing(&self) -> FileGroupSizing {
        match (self.mode, self.sizing_override) {
            (ImportMode::Prod, Some(sizing)) => sizing,
            _ => FileGroupSizing::default(),
        }
    }

    /// The Dev-mode skip reason for a unit, if the policy withholds it.
    pub fn gate(&self, unit: &ScriptUnit) -> Option<SkipReason> {
        let dev = self.mode == ImportMode::Dev;
        match unit.object_type {
            ObjectType::FileGroup => {
                if filegroup::is_memory_optimized_script(&unit.content) {
                    None
                } else if dev || self.strategy == FileGroupStrategy::RemoveToPrimary {
                    Some(SkipReason::DevModeFileGroup)
                } else {
                    None
                }
            }
            ObjectType::DatabaseConfiguration if dev => {
                Some(SkipReason::DevModeDatabaseConfiguration)
            }
            ObjectType::SecurityPolicy if dev => Some(SkipReason::DevModeSecurityPolicy),
            ObjectType::ExternalData if dev => Some(SkipReason::DevModeExternalData),
            ObjectType::Assembly if dev && !self.enable_clr => Some(SkipReason::DevModeClrAssembly),
            _ => None,
        }
    }

    /// Mark gated units as skipped. Returns the number newly skipped.
    pub fn apply(&self, units: &mut [ScriptUnit]) -> usize {
        let mut skipped = 0;
        for unit in units.iter_mut().filter(|u| !u.is_skipped()) {
            if let Some(reason) = self.gate(unit) {
                debug!(path = %unit.relative_path, reason = %reason, "Withheld by policy");
                unit.mark_skipped(reason);
                skipped += 1;
            }
        }
        skipped
    }
}
