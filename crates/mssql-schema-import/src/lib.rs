//! # mssql-schema-import
//!
//! Imports a SQL Server schema catalog (one `.sql` script per object, laid
//! out in numbered phase folders) into a target database.
//!
//! - **Ordered execution** by phase, with one catch-up pass for scripts that
//!   ran before their dependencies
//! - **Exclusions** by object type, schema and `schema.name` glob
//! - **Dev/Prod policy** for environment-bound objects (filegroups, CLR, ...)
//! - **Script rewrites** for filegroups, FILESTREAM and Always Encrypted
//! - **Integrity report** with per-object outcomes and the effective configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_schema_import::{resolve_settings, CliOverrides, ConfigFile, ImportOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mssql_schema_import::Result<()> {
//!     let file = ConfigFile::load("config.yaml")?;
//!     let (settings, effective) =
//!         resolve_settings(Some(&file), &CliOverrides::default(), |name| std::env::var(name).ok())?;
//!     let report = ImportOrchestrator::new(settings, effective)
//!         .run(CancellationToken::new())
//!         .await?;
//!     println!("Imported {} objects", report.imported_object_count);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod orchestrator;
pub mod policy;
pub mod report;
pub mod scheduler;
pub mod target;
pub mod transform;

// Re-exports for convenient access
pub use catalog::{load_catalog, Catalog, ObjectType, ScriptUnit, SkipReason, UnitStatus};
pub use config::{
    resolve_settings, CliOverrides, ConfigFile, EffectiveConfiguration, FileGroupStrategy,
    ImportMode, ImportSettings, SettingSource,
};
pub use error::{ImportError, Result};
pub use orchestrator::{ImportOrchestrator, ImportPlan};
pub use report::ImportReport;
pub use scheduler::RunStatus;
pub use target::{health_check, BatchError, BatchExecutor, HealthCheckResult, MssqlExecutor};
