//! Filegroup provisioning and data-file remapping.
//!
//! Memory-optimized filegroup scripts are remapped under every strategy;
//! everything else here only happens under `autoRemap`.

use crate::catalog::{ObjectType, ScriptUnit};
use crate::config::{FileGroupSizing, FileGroupStrategy};
use crate::target::{BatchError, BatchExecutor};
use crate::transform::filegroup;
use std::collections::HashSet;
use tracing::info;

/// Tracks which filegroups exist on the target during a run.
#[derive(Debug)]
pub struct FileGroupProvisioner {
    auto_remap: bool,
    sizing: FileGroupSizing,
    /// Lower-cased names known to exist.
    ensured: HashSet<String>,
    data_path: Option<String>,
}

impl FileGroupProvisioner {
    /// Memory-optimized filegroups are never provisioned here; their own
    /// scripts create them.
    pub fn new(
        strategy: FileGroupStrategy,
        sizing: FileGroupSizing,
        memory_optimized: &HashSet<String>,
    ) -> Self {
        Self {
            auto_remap: strategy == FileGroupStrategy::AutoRemap,
            sizing,
            ensured: memory_optimized.clone(),
            data_path: None,
        }
    }

    async fn data_path(&mut self, executor: &mut dyn BatchExecutor) -> Result<String, BatchError> {
        if let Some(path) = &self.data_path {
            return Ok(path.clone());
        }
        let path = executor
            .default_data_path()
            .await
            .map_err(|e| BatchError::other(format!("resolving default data path: {}", e)))?;
        self.data_path = Some(path.clone());
        Ok(path)
    }

    /// Text to execute for a unit: filegroup scripts get their data files
    /// moved to the target's data directory and sized by policy.
    pub async fn prepare(
        &mut self,
        executor: &mut dyn BatchExecutor,
        unit: &ScriptUnit,
    ) -> Result<String, BatchError> {
        if unit.object_type != ObjectType::FileGroup
            || !(self.auto_remap || filegroup::is_memory_optimized_script(&unit.content))
        {
            return Ok(unit.content.clone());
        }
        let data_path = self.data_path(executor).await?;
        Ok(filegroup::remap_file_definitions(
            &unit.content,
            &data_path,
            executor.database(),
            &self.sizing,
        ))
    }

    /// Create every filegroup the unit places data on that is not known to
    /// exist yet.
    pub async fn ensure_referenced(
        &mut self,
        executor: &mut dyn BatchExecutor,
        unit: &ScriptUnit,
    ) -> Result<(), BatchError> {
        if !self.auto_remap || unit.object_type == ObjectType::FileGroup {
            return Ok(());
        }

        for name in filegroup::referenced_filegroups(&unit.content) {
            if self.ensured.contains(&name.to_ascii_lowercase()) {
                continue;
            }
            let data_path = self.data_path(executor).await?;
            let batch = filegroup::ensure_filegroup_batch(
                &name,
                &data_path,
                executor.database(),
                &self.sizing,
            );
            executor.execute_batch(&batch).await.map_err(|e| BatchError {
                message: format!("provisioning filegroup [{}]: {}", name, e.message),
                ..e
            })?;
            info!(filegroup = %name, "Provisioned filegroup");
            self.ensured.insert(name.to_ascii_lowercase());
        }
        Ok(())
    }

    /// Record filegroups created by an applied filegroup script.
    pub fn record_applied(&mut self, unit: &ScriptUnit) {
        if unit.object_type == ObjectType::FileGroup {
            for name in filegroup::defined_filegroups(&unit.content) {
                self.ensured.insert(name.to_ascii_lowercase());
            }
        }
    }
}
