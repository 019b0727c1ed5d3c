//! Configuration type definitions.
//!
//! File-level fields are all `Option<T>` so the resolver can tell "not set"
//! apart from "explicitly set" when layering CLI, environment, file and
//! built-in defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Root of the YAML configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    /// Target server connection.
    #[serde(default)]
    pub connection: ConnectionSection,

    /// Import behaviour.
    #[serde(default)]
    pub import: ImportSection,
}

/// `connection:` section.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectionSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Name of an environment variable holding the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_from_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_from_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_from_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_from_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_server_certificate: Option<bool>,

    /// Per-batch execution timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_seconds: Option<u64>,

    /// Create the target database when it does not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_database: Option<bool>,
}

impl fmt::Debug for ConnectionSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSection")
            .field("server", &self.server)
            .field("server_from_env", &self.server_from_env)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("database_from_env", &self.database_from_env)
            .field("user", &self.user)
            .field("user_from_env", &self.user_from_env)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("password_from_env", &self.password_from_env)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("command_timeout_seconds", &self.command_timeout_seconds)
            .field("create_database", &self.create_database)
            .finish()
    }
}

/// `import:` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportSection {
    /// Catalog root written by the exporter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_directory: Option<PathBuf>,

    /// Where the import report is written (default: the catalog root).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_directory: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_mode: Option<ImportMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_object_types: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_schemas: Option<Vec<String>>,

    /// Glob patterns on `schema.name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_objects: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_group_strategy: Option<FileGroupStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_filestream: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_always_encrypted: Option<bool>,

    /// Prod-mode filegroup sizing overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_group_sizing: Option<FileGroupSizing>,

    #[serde(default)]
    pub clr: ClrSection,
}

/// `import.clr:` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClrSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_clr: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_strict_security_for_import: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_strict_security_setting: Option<bool>,
}

/// Named environment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImportMode {
    /// Skip server-level and environment-bound objects.
    #[default]
    #[serde(alias = "dev", alias = "DEV")]
    Dev,

    /// Import everything.
    #[serde(alias = "prod", alias = "PROD")]
    Prod,
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(ImportMode::Dev),
            "prod" => Ok(ImportMode::Prod),
            _ => Err(format!("invalid import mode '{}', expected Dev or Prod", s)),
        }
    }
}

/// How non-primary filegroup references are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileGroupStrategy {
    /// Keep references; create the filegroups on the target.
    #[serde(alias = "AutoRemap")]
    AutoRemap,

    /// Rewrite references to `[PRIMARY]`.
    #[serde(alias = "RemoveToPrimary")]
    RemoveToPrimary,
}

impl FromStr for FileGroupStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "autoremap" => Ok(FileGroupStrategy::AutoRemap),
            "removetoprimary" => Ok(FileGroupStrategy::RemoveToPrimary),
            _ => Err(format!(
                "invalid filegroup strategy '{}', expected autoRemap or removeToPrimary",
                s
            )),
        }
    }
}

/// Data file sizing for filegroups created on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileGroupSizing {
    #[serde(default = "default_file_size_mb")]
    pub initial_size_mb: u32,

    #[serde(default = "default_file_growth_mb")]
    pub growth_mb: u32,
}

impl Default for FileGroupSizing {
    fn default() -> Self {
        Self {
            initial_size_mb: default_file_size_mb(),
            growth_mb: default_file_growth_mb(),
        }
    }
}

/// Resolved CLR settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClrSettings {
    pub enable_clr: bool,
    pub disable_strict_security_for_import: bool,
    pub restore_strict_security_setting: bool,
}

impl Default for ClrSettings {
    fn default() -> Self {
        Self {
            enable_clr: false,
            disable_strict_security_for_import: false,
            restore_strict_security_setting: true,
        }
    }
}

/// Resolved target connection.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub server: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub command_timeout_seconds: u64,
    pub create_database: bool,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("command_timeout_seconds", &self.command_timeout_seconds)
            .field("create_database", &self.create_database)
            .finish()
    }
}

/// Fully resolved settings for one import run.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub connection: ConnectionSettings,
    pub source_directory: PathBuf,
    pub report_directory: Option<PathBuf>,
    pub import_mode: ImportMode,
    pub continue_on_error: bool,
    pub exclude_object_types: Vec<String>,
    pub exclude_schemas: Vec<String>,
    pub exclude_objects: Vec<String>,
    pub file_group_strategy: FileGroupStrategy,
    pub strip_filestream: bool,
    pub strip_always_encrypted: bool,
    pub file_group_sizing: Option<FileGroupSizing>,
    pub clr: ClrSettings,
}

impl ImportSettings {
    /// Directory the report is written to.
    pub fn report_directory(&self) -> PathBuf {
        self.report_directory
            .clone()
            .unwrap_or_else(|| self.source_directory.clone())
    }
}

pub(crate) fn default_file_size_mb() -> u32 {
    64
}

pub(crate) fn default_file_growth_mb() -> u32 {
    64
}

pub(crate) const DEFAULT_SERVER: &str = "localhost";
pub(crate) const DEFAULT_PORT: u16 = 1433;
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 300;
