//! Import orchestrator - main workflow coordinator.
//!
//! Load → filter → policy gate → transform → schedule → report.

use crate::catalog::{load_catalog, Catalog, ObjectType, ScriptUnit, UnitStatus};
use crate::config::{EffectiveConfiguration, ImportSettings};
use crate::error::{ImportError, Result};
use crate::filter::ExclusionFilter;
use crate::policy::EnvironmentPolicy;
use crate::report::{skip_histogram, ImportReport, RunSummary, SkipRecord};
use crate::scheduler::{RunStatus, Scheduler, SchedulerOptions};
use crate::target::{BatchExecutor, MssqlExecutor};
use crate::transform::{TransformContext, TransformPipeline};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Import orchestrator.
pub struct ImportOrchestrator {
    settings: ImportSettings,
    effective: EffectiveConfiguration,
}

/// A catalog after filtering, gating and rewriting, ready to schedule.
#[derive(Debug, Clone)]
pub struct PreparedImport {
    pub catalog: Catalog,
    pub context: TransformContext,
}

/// One unit that a run would submit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedUnit {
    pub object: String,
    pub path: String,
    pub object_type: ObjectType,
    pub phase: u8,
}

/// What a run would do, without connecting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPlan {
    pub exported_object_count: usize,
    pub scheduled_object_count: usize,
    pub skipped_object_count: usize,
    pub skipped_reasons: BTreeMap<String, usize>,
    pub scheduled: Vec<PlannedUnit>,
}

impl ImportOrchestrator {
    /// Create an orchestrator from resolved settings and their origins.
    pub fn new(settings: ImportSettings, effective: EffectiveConfiguration) -> Self {
        Self {
            settings,
            effective,
        }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Load the catalog and apply exclusions, policy and rewrites.
    pub fn prepare(&self) -> Result<PreparedImport> {
        let settings = &self.settings;

        info!("Phase 1: Loading catalog from {}", settings.source_directory.display());
        let mut catalog = load_catalog(&settings.source_directory)?;

        info!("Phase 2: Applying exclusions and {:?} policy", settings.import_mode);
        let filter = ExclusionFilter::new(
            &settings.exclude_object_types,
            &settings.exclude_schemas,
            &settings.exclude_objects,
        )?;
        let excluded = filter.apply(&mut catalog.units);

        let policy = EnvironmentPolicy::from_settings(settings);
        let withheld = policy.apply(&mut catalog.units);

        info!(
            "Phase 3: Transforming scripts (fileGroupStrategy: {:?})",
            policy.strategy()
        );
        let context = TransformContext::from_units(&catalog.units);
        let pipeline = TransformPipeline::new(policy.pipeline_options(), context.clone());
        let emptied = pipeline.apply(&mut catalog.units);

        info!(
            units = catalog.units.len(),
            excluded, withheld, emptied, "Catalog prepared"
        );

        Ok(PreparedImport { catalog, context })
    }

    /// Dry run: everything up to scheduling.
    pub fn plan(&self) -> Result<ImportPlan> {
        let prepared = self.prepare()?;
        let units = &prepared.catalog.units;

        let scheduled: Vec<PlannedUnit> = units
            .iter()
            .filter(|u| !u.is_skipped())
            .map(|u| PlannedUnit {
                object: u.qualified_name(),
                path: u.relative_path.clone(),
                object_type: u.object_type.clone(),
                phase: u.phase,
            })
            .collect();
        let skipped = skip_records(units);

        Ok(ImportPlan {
            exported_object_count: prepared.catalog.exported_object_count,
            scheduled_object_count: scheduled.len(),
            skipped_object_count: skipped.len(),
            skipped_reasons: skip_histogram(&skipped),
            scheduled,
        })
    }

    /// Run the import against the configured server.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ImportReport> {
        let prepared = self.prepare()?;

        info!("Phase 4: Connecting to target");
        let mut executor = MssqlExecutor::connect(&self.settings.connection).await?;

        self.execute(prepared, &mut executor, cancel).await
    }

    /// Run the import against an arbitrary executor.
    pub async fn run_with_executor(
        &self,
        executor: &mut dyn BatchExecutor,
        cancel: CancellationToken,
    ) -> Result<ImportReport> {
        let prepared = self.prepare()?;
        self.execute(prepared, executor, cancel).await
    }

    async fn execute(
        &self,
        prepared: PreparedImport,
        executor: &mut dyn BatchExecutor,
        cancel: CancellationToken,
    ) -> Result<ImportReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let PreparedImport {
            mut catalog,
            context,
        } = prepared;
        info!("Starting import run: {}", run_id);

        let policy = EnvironmentPolicy::from_settings(&self.settings);
        let options = SchedulerOptions {
            continue_on_error: self.settings.continue_on_error,
            file_group_strategy: policy.strategy(),
            file_group_sizing: policy.file_group_sizing(),
            clr: self.settings.clr,
            memory_optimized: context.memory_optimized,
        };

        info!("Phase 5: Applying scripts");
        let outcome = Scheduler::new(executor, options, cancel)
            .run(&mut catalog.units)
            .await?;

        let report = ImportReport::build(
            RunSummary {
                run_id,
                status: outcome.status,
                import_mode: self.settings.import_mode,
                started_at,
                completed_at: Utc::now(),
                exported_object_count: catalog.exported_object_count,
                exported_objects: catalog.exported_objects,
                effective_configuration: self.effective.clone(),
                aborted_at: outcome.aborted_at.clone(),
            },
            &catalog.units,
        );

        if let Err(e) = report.write(&self.settings.report_directory()) {
            error!("Failed to write import report: {}", e);
        }

        info!(
            "Import {:?}: {} imported, {} skipped, {} failed of {} exported in {:.1}s",
            report.status,
            report.imported_object_count,
            report.skipped_object_count,
            report.failed_object_count,
            report.exported_object_count,
            report.duration
        );

        match outcome.status {
            RunStatus::Cancelled => Err(ImportError::Cancelled),
            RunStatus::Aborted => {
                let (object, message) = outcome.aborted_at.unwrap_or_default();
                Err(ImportError::aborted(object, message))
            }
            RunStatus::Completed => {
                let failed = catalog.units.iter().filter(|u| u.is_failed()).count();
                if failed > 0 && !self.settings.continue_on_error {
                    warn!("{} object(s) still failing after catch-up", failed);
                    return Err(ImportError::ImportFailed { failed });
                }
                Ok(report)
            }
        }
    }
}

fn skip_records(units: &[ScriptUnit]) -> Vec<SkipRecord> {
    units
        .iter()
        .filter(|u| u.status == UnitStatus::Skipped)
        .filter_map(|u| {
            u.skip_reason.map(|reason| SkipRecord {
                object: u.qualified_name(),
                path: u.relative_path.clone(),
                object_type: u.object_type.clone(),
                reason_code: reason,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_settings, CliOverrides, ConfigFile};
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn orchestrator(root: &Path, extra_yaml: &str) -> ImportOrchestrator {
        let yaml = format!(
            "import:\n  sourceDirectory: {}\n{}",
            root.display(),
            extra_yaml
        );
        let file = ConfigFile::from_yaml(&yaml).unwrap();
        let (settings, effective) =
            resolve_settings(Some(&file), &CliOverrides::default(), |_| None).unwrap();
        ImportOrchestrator::new(settings, effective)
    }

    #[test]
    fn test_plan_applies_filter_policy_and_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "00_FileGroups/FG_ARCHIVE.sql", "ALTER DATABASE CURRENT ADD FILEGROUP [FG_ARCHIVE]");
        write(root, "03_Schemas/app.sql", "CREATE SCHEMA [app]");
        write(root, "03_Schemas/cdc.sql", "CREATE SCHEMA [cdc]");
        write(root, "09_Tables_PrimaryKey/dbo.Orders.sql", "CREATE TABLE [dbo].[Orders]([Id] int\n) ON [FG_ARCHIVE]\nGO");
        write(root, "09_Tables_PrimaryKey/dbo.Empty.sql", "-- nothing\nGO\n");

        let orchestrator = orchestrator(root, "  excludeSchemas: [cdc]\n");
        let plan = orchestrator.plan().unwrap();

        assert_eq!(plan.exported_object_count, 5);
        assert_eq!(plan.scheduled_object_count, 2);
        assert_eq!(plan.skipped_reasons["ExcludedBySchema"], 1);
        assert_eq!(plan.skipped_reasons["DevMode_FileGroup"], 1);
        assert_eq!(plan.skipped_reasons["EmptyScript"], 1);

        let prepared = orchestrator.prepare().unwrap();
        let orders = prepared
            .catalog
            .units
            .iter()
            .find(|u| u.name == "Orders")
            .unwrap();
        assert!(orders.content.contains(") ON [PRIMARY]"));
    }

    #[test]
    fn test_missing_catalog_is_catalog_error() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir.path().join("missing"), "");
        assert!(matches!(
            orchestrator.plan(),
            Err(ImportError::Catalog(_))
        ));
    }
}
