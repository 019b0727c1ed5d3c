//! Script text rewrites applied before execution.
//!
//! Stages run in a fixed order: filegroup strategy, FILESTREAM stripping,
//! Always Encrypted stripping. Every stage is idempotent and only touches
//! its own construct.

pub mod batches;
pub mod encryption;
pub mod filegroup;
pub mod filestream;

pub use batches::{has_executable_text, split_batches};

use crate::catalog::{ObjectType, ScriptUnit, SkipReason};
use crate::config::FileGroupStrategy;
use std::collections::HashSet;
use tracing::debug;

/// Which rewrites are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub file_group_strategy: FileGroupStrategy,
    pub strip_filestream: bool,
    pub strip_always_encrypted: bool,
}

/// Catalog-wide facts the rewrites depend on.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    /// Lower-cased memory-optimized filegroup names.
    pub memory_optimized: HashSet<String>,
    /// Lower-cased FILESTREAM filegroup names.
    pub filestream: HashSet<String>,
}

impl TransformContext {
    pub fn from_units(units: &[ScriptUnit]) -> Self {
        Self {
            memory_optimized: filegroup::memory_optimized_filegroups(units),
            filestream: filestream::filestream_filegroups(units),
        }
    }
}

/// Ordered rewrite stages.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    options: PipelineOptions,
    context: TransformContext,
}

impl TransformPipeline {
    pub fn new(options: PipelineOptions, context: TransformContext) -> Self {
        Self { options, context }
    }

    pub fn context(&self) -> &TransformContext {
        &self.context
    }

    /// Rewrite one unit's text in place; returns a skip reason when the unit
    /// must not run.
    pub fn transform(&self, unit: &mut ScriptUnit) -> Option<SkipReason> {
        let had_text = has_executable_text(&unit.content);
        let mut content = unit.content.clone();

        if self.options.file_group_strategy == FileGroupStrategy::RemoveToPrimary {
            content = filegroup::remove_to_primary(&content, &self.context.memory_optimized);
        }

        if self.options.strip_filestream {
            content = filestream::strip(&content, &self.context.filestream);
            if unit.object_type == ObjectType::FileGroup
                && had_text
                && !has_executable_text(&content)
            {
                unit.content = content;
                return Some(SkipReason::DevModeFileStream);
            }
        }

        if self.options.strip_always_encrypted {
            if encryption::creates_column_key(&content) {
                return Some(SkipReason::DevModeAlwaysEncrypted);
            }
            content = encryption::strip(&content);
        }

        unit.content = content;

        if !has_executable_text(&unit.content) {
            return Some(SkipReason::EmptyScript);
        }
        None
    }

    /// Transform every unit not already skipped. Returns the number skipped.
    pub fn apply(&self, units: &mut [ScriptUnit]) -> usize {
        let mut skipped = 0;
        for unit in units.iter_mut().filter(|u| !u.is_skipped()) {
            if let Some(reason) = self.transform(unit) {
                debug!(path = %unit.relative_path, reason = %reason, "Skipped by transform");
                unit.mark_skipped(reason);
                skipped += 1;
            }
        }
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(strategy: FileGroupStrategy) -> PipelineOptions {
        PipelineOptions {
            file_group_strategy: strategy,
            strip_filestream: true,
            strip_always_encrypted: true,
        }
    }

    fn table(content: &str) -> ScriptUnit {
        ScriptUnit::new(
            "09_Tables_PrimaryKey/dbo.T.sql",
            9,
            None,
            ObjectType::Table,
            content,
        )
    }

    #[test]
    fn test_all_stages_applied_in_order() {
        let pipeline = TransformPipeline::new(
            options(FileGroupStrategy::RemoveToPrimary),
            TransformContext::default(),
        );
        let mut unit = table(
            "CREATE TABLE [dbo].[T](\n\t[Doc] [varbinary](max) FILESTREAM NULL,\n\t[SSN] [char](11) ENCRYPTED WITH (ENCRYPTION_TYPE = Deterministic) NULL\n) ON [FG_DATA] FILESTREAM_ON [FS]\nGO",
        );
        assert_eq!(pipeline.transform(&mut unit), None);
        assert_eq!(
            unit.content,
            "CREATE TABLE [dbo].[T](\n\t[Doc] [varbinary](max) NULL,\n\t[SSN] [char](11) NULL\n) ON [PRIMARY]\nGO"
        );
    }

    #[test]
    fn test_auto_remap_leaves_references() {
        let pipeline = TransformPipeline::new(
            options(FileGroupStrategy::AutoRemap),
            TransformContext::default(),
        );
        let mut unit = table("CREATE TABLE t (a int\n) ON [FG_DATA]");
        assert_eq!(pipeline.transform(&mut unit), None);
        assert!(unit.content.contains("ON [FG_DATA]"));
    }

    #[test]
    fn test_filestream_filegroup_unit_skipped() {
        let script = "ALTER DATABASE [Sales] ADD FILEGROUP [FS_DOCS] CONTAINS FILESTREAM\nGO\n";
        let units = vec![ScriptUnit::new(
            "00_FileGroups/FS_DOCS.sql",
            0,
            None,
            ObjectType::FileGroup,
            script,
        )];
        let pipeline = TransformPipeline::new(
            options(FileGroupStrategy::AutoRemap),
            TransformContext::from_units(&units),
        );
        let mut units = units;
        assert_eq!(pipeline.apply(&mut units), 1);
        assert_eq!(units[0].skip_reason, Some(SkipReason::DevModeFileStream));
    }

    #[test]
    fn test_column_key_unit_skipped() {
        let pipeline = TransformPipeline::new(
            options(FileGroupStrategy::AutoRemap),
            TransformContext::default(),
        );
        let mut unit = ScriptUnit::new(
            "01_Security/CMK_Auto1.sql",
            1,
            None,
            ObjectType::Security,
            "CREATE COLUMN MASTER KEY [CMK_Auto1] WITH (KEY_STORE_PROVIDER_NAME = N'AZURE_KEY_VAULT', KEY_PATH = N'https://vault/keys/cmk')",
        );
        assert_eq!(
            pipeline.transform(&mut unit),
            Some(SkipReason::DevModeAlwaysEncrypted)
        );
    }

    #[test]
    fn test_empty_script_skipped() {
        let pipeline = TransformPipeline::new(
            options(FileGroupStrategy::AutoRemap),
            TransformContext::default(),
        );
        let mut units = vec![table("-- nothing to do\nGO\n")];
        pipeline.apply(&mut units);
        assert_eq!(units[0].skip_reason, Some(SkipReason::EmptyScript));
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let pipeline = TransformPipeline::new(
            options(FileGroupStrategy::RemoveToPrimary),
            TransformContext::default(),
        );
        let mut unit = table(
            "CREATE TABLE t ([b] varbinary(max) FILESTREAM, [c] int ENCRYPTED WITH (ENCRYPTION_TYPE = Randomized)\n) ON [FG] TEXTIMAGE_ON [FG2] FILESTREAM_ON [FS]",
        );
        pipeline.transform(&mut unit);
        let once = unit.content.clone();
        pipeline.transform(&mut unit);
        assert_eq!(unit.content, once);
    }
}
