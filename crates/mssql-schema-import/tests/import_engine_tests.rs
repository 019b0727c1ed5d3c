//! End-to-end tests for the import engine against an in-memory executor.
//!
//! Each test lays out a catalog in a temp directory, runs the full
//! load → filter → policy → transform → schedule → report workflow, and
//! inspects both the executed batches and the report written to disk.

use async_trait::async_trait;
use mssql_schema_import::{
    resolve_settings, BatchError, BatchExecutor, CliOverrides, ConfigFile, ImportError,
    ImportOrchestrator, ImportReport, RunStatus,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Executor that records batches and fails the ones containing a fragment.
#[derive(Default)]
struct RecordingExecutor {
    executed: Vec<String>,
    failures: HashMap<String, (BatchError, usize)>,
    options: HashMap<String, i64>,
}

impl RecordingExecutor {
    fn fail(mut self, fragment: &str, error: BatchError, times: usize) -> Self {
        self.failures.insert(fragment.to_string(), (error, times));
        self
    }

    fn ran(&self, fragment: &str) -> bool {
        self.executed.iter().any(|b| b.contains(fragment))
    }
}

#[async_trait]
impl BatchExecutor for RecordingExecutor {
    async fn execute_batch(&mut self, sql: &str) -> Result<(), BatchError> {
        for (fragment, (error, remaining)) in self.failures.iter_mut() {
            if sql.contains(fragment.as_str()) && *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        self.executed.push(sql.to_string());
        Ok(())
    }

    async fn server_option(&mut self, name: &str) -> mssql_schema_import::Result<i64> {
        Ok(*self.options.get(name).unwrap_or(&1))
    }

    async fn set_server_option(
        &mut self,
        name: &str,
        value: i64,
    ) -> mssql_schema_import::Result<()> {
        self.options.insert(name.to_string(), value);
        Ok(())
    }

    async fn default_data_path(&mut self) -> mssql_schema_import::Result<String> {
        Ok("/var/opt/mssql/data/".to_string())
    }

    fn database(&self) -> &str {
        "SalesProd"
    }
}

fn write_script(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A small catalog spanning filegroups, schemas, tables, keys and views.
fn sales_catalog() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_script(
        root,
        "00_FileGroups/FG_ARCHIVE.sql",
        "ALTER DATABASE CURRENT ADD FILEGROUP [FG_ARCHIVE]\nGO\n",
    );
    write_script(root, "03_Schemas/sales.sql", "CREATE SCHEMA [sales]\nGO\n");
    write_script(
        root,
        "09_Tables_PrimaryKey/sales.Customer.sql",
        "CREATE TABLE [sales].[Customer](\n  [Id] int NOT NULL PRIMARY KEY\n) ON [FG_ARCHIVE]\nGO\n",
    );
    write_script(
        root,
        "09_Tables_PrimaryKey/sales.Orders.sql",
        "CREATE TABLE [sales].[Orders](\n  [Id] int NOT NULL,\n  [CustomerId] int NOT NULL\n)\nGO\n",
    );
    write_script(
        root,
        "10_Tables_ForeignKeys/sales.FK_Orders_Customer.sql",
        "ALTER TABLE [sales].[Orders] ADD CONSTRAINT [FK_Orders_Customer] \
         FOREIGN KEY ([CustomerId]) REFERENCES [sales].[Customer]([Id])\nGO\n",
    );
    write_script(
        root,
        "14_Programmability/03_Views/sales.OrderSummary.sql",
        "CREATE VIEW [sales].[OrderSummary] AS SELECT [CustomerId], COUNT(*) AS [Orders] \
         FROM [sales].[Orders] GROUP BY [CustomerId]\nGO\n",
    );
    dir
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

fn report_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().unwrap().to_string_lossy().to_string();
            name.starts_with("import-report-") && name.ends_with(".json")
        })
        .collect()
}

fn read_report(dir: &Path) -> serde_json::Value {
    let files = report_files(dir);
    assert_eq!(files.len(), 1, "expected exactly one report in {:?}", dir);
    serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap()
}

fn missing(name: &str) -> BatchError {
    BatchError::server(208, format!("Invalid object name '{}'.", name))
}

// =============================================================================
// Successful Runs
// =============================================================================

#[tokio::test]
async fn test_dev_run_applies_catalog_and_writes_report() {
    let catalog = sales_catalog();
    let mut executor = RecordingExecutor::default();

    let report: ImportReport = orchestrator(catalog.path(), "")
        .run_with_executor(&mut executor, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.exported_object_count, 6);
    assert_eq!(report.imported_object_count, 5);
    assert_eq!(report.skipped_object_count, 1);
    assert_eq!(report.failed_object_count, 0);
    assert_eq!(report.skipped_reasons["DevMode_FileGroup"], 1);

    // Dev collapses filegroup placement onto PRIMARY.
    assert!(!executor.ran("ADD FILEGROUP"));
    assert!(executor.ran(") ON [PRIMARY]"));

    let json = read_report(catalog.path());
    assert_eq!(json["status"], "completed");
    assert_eq!(json["importedObjectCount"], 5);
    assert_eq!(
        json["effectiveConfiguration"]["import.importMode"]["sourceKind"],
        "default"
    );
    assert_eq!(json["importedObjects"][0]["sha256"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_excluded_views_are_never_submitted() {
    let catalog = sales_catalog();
    let mut executor = RecordingExecutor::default();

    let report = orchestrator(catalog.path(), "  excludeObjectTypes: [Views]\n")
        .run_with_executor(&mut executor, CancellationToken::new())
        .await
        .unwrap();

    assert!(!executor.ran("CREATE VIEW"));
    assert!(executor.ran("CREATE TABLE [sales].[Orders]"));
    assert_eq!(report.skipped_reasons["ExcludedByType"], 1);
    assert!(report
        .imported_objects
        .iter()
        .all(|o| o.object_type.as_str() != "View"));
    assert!(report
        .imported_objects
        .iter()
        .any(|o| o.object_type.as_str() == "Table"));

    let json = read_report(catalog.path());
    assert_eq!(
        json["effectiveConfiguration"]["import.excludeObjectTypes"]["sourceKind"],
        "configFile"
    );
}

#[tokio::test]
async fn test_deferred_object_is_applied_in_catch_up_pass() {
    let catalog = sales_catalog();
    let mut executor = RecordingExecutor::default().fail(
        "FK_Orders_Customer",
        missing("sales.Customer"),
        1,
    );

    let report = orchestrator(catalog.path(), "")
        .run_with_executor(&mut executor, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed_object_count, 0);
    assert_eq!(report.imported_object_count, 5);

    // The key lands after the view because it was retried in the catch-up pass.
    let view = executor
        .executed
        .iter()
        .position(|b| b.contains("CREATE VIEW"))
        .unwrap();
    let key = executor
        .executed
        .iter()
        .position(|b| b.contains("FK_Orders_Customer"))
        .unwrap();
    assert!(key > view);
}

#[tokio::test]
async fn test_prod_auto_remap_provisions_missing_filegroup() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_script(
        root,
        "09_Tables_PrimaryKey/sales.History.sql",
        "CREATE TABLE [sales].[History]([Id] int NOT NULL) ON [FG_HISTORY]\nGO\n",
    );
    let mut executor = RecordingExecutor::default();

    let report = orchestrator(root, "  importMode: Prod\n")
        .run_with_executor(&mut executor, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.imported_object_count, 1);
    assert!(executor.ran("ADD FILEGROUP [FG_HISTORY]"));
    assert!(executor.ran("/var/opt/mssql/data/SalesProd_FG_HISTORY.ndf"));
    assert!(executor.ran(") ON [FG_HISTORY]"));
}

// =============================================================================
// Failing Runs
// =============================================================================

#[tokio::test]
async fn test_stop_on_error_aborts_and_still_writes_report() {
    let catalog = sales_catalog();
    let mut executor = RecordingExecutor::default().fail(
        "CREATE TABLE [sales].[Orders]",
        BatchError::server(102, "Incorrect syntax near 'NOT'."),
        1,
    );

    let result = orchestrator(catalog.path(), "")
        .run_with_executor(&mut executor, CancellationToken::new())
        .await;

    match result {
        Err(ImportError::Aborted { object, .. }) => assert_eq!(object, "sales.Orders"),
        other => panic!("expected abort, got {:?}", other.map(|r| r.status)),
    }
    assert!(!executor.ran("CREATE VIEW"));

    let json = read_report(catalog.path());
    assert_eq!(json["status"], "aborted");
    assert_eq!(json["abortedAt"]["object"], "sales.Orders");
    assert_eq!(json["failedObjects"][0]["classification"], "Fatal");
}

#[tokio::test]
async fn test_persistent_deferred_failure_fails_the_run() {
    let catalog = sales_catalog();
    let mut executor = RecordingExecutor::default().fail(
        "CREATE VIEW",
        missing("sales.Orders"),
        usize::MAX,
    );

    let result = orchestrator(catalog.path(), "")
        .run_with_executor(&mut executor, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ImportError::ImportFailed { failed: 1 })));

    let json = read_report(catalog.path());
    assert_eq!(json["failedObjectCount"], 1);
    assert_eq!(json["failedObjects"][0]["status"], "FailedPermanent");
    assert_eq!(json["failedObjects"][0]["attempts"], 2);
}

#[tokio::test]
async fn test_prod_assembly_without_clr_fails_with_hint_and_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_script(
        root,
        "14_Programmability/01_Assemblies/Util.sql",
        "CREATE ASSEMBLY [Util] FROM 0x4D5A WITH PERMISSION_SET = SAFE\nGO\n",
    );
    write_script(
        root,
        "14_Programmability/03_Views/dbo.Totals.sql",
        "CREATE VIEW [dbo].[Totals] AS SELECT 1 AS [Total]\nGO\n",
    );
    write_script(
        root,
        "15_Synonyms/dbo.TotalsAlias.sql",
        "CREATE SYNONYM [dbo].[TotalsAlias] FOR [dbo].[Totals]\nGO\n",
    );
    let mut executor = RecordingExecutor::default().fail(
        "CREATE ASSEMBLY",
        BatchError::server(
            10343,
            "CREATE or ALTER ASSEMBLY for assembly 'Util' failed because the 'clr strict security' option is set",
        ),
        usize::MAX,
    );

    let result = orchestrator(root, "  importMode: Prod\n")
        .run_with_executor(&mut executor, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ImportError::ImportFailed { failed: 1 })));
    assert!(executor.ran("CREATE VIEW [dbo].[Totals]"));
    assert!(executor.ran("CREATE SYNONYM [dbo].[TotalsAlias]"));

    let json = read_report(root);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["importedObjectCount"], 2);
    assert_eq!(json["failedObjects"][0]["status"], "FailedPermanent");
    assert_eq!(json["failedObjects"][0]["attempts"], 1);
    assert!(json["failedObjects"][0]["hint"]
        .as_str()
        .unwrap()
        .contains("clr.enableClr"));
}

#[tokio::test]
async fn test_continue_on_error_keeps_going() {
    let catalog = sales_catalog();
    let mut executor = RecordingExecutor::default().fail(
        "CREATE TABLE [sales].[Orders]",
        BatchError::server(102, "Incorrect syntax near 'NOT'."),
        usize::MAX,
    );

    let report = orchestrator(catalog.path(), "  continueOnError: true\n")
        .run_with_executor(&mut executor, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(executor.ran("CREATE VIEW"));
    assert!(report.failed_object_count >= 1);
    assert!(report
        .failed_objects
        .iter()
        .any(|f| f.object == "sales.Orders"));
}

#[tokio::test]
async fn test_cancelled_run_reports_cancellation() {
    let catalog = sales_catalog();
    let mut executor = RecordingExecutor::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator(catalog.path(), "")
        .run_with_executor(&mut executor, cancel)
        .await;

    assert!(matches!(result, Err(ImportError::Cancelled)));
    assert!(executor.executed.is_empty());
    assert_eq!(read_report(catalog.path())["status"], "cancelled");
}
