//! Settings validation.

use super::{ConnectionSettings, ImportSettings};
use crate::error::{ImportError, Result};
use tracing::warn;

const SYSTEM_DATABASES: &[&str] = &["master", "model", "msdb", "tempdb"];

/// Validate resolved settings.
///
/// `offline` skips the connection checks (dry runs never connect).
pub fn validate(settings: &ImportSettings, offline: bool) -> Result<()> {
    if settings.source_directory.as_os_str().is_empty() {
        return Err(ImportError::Config(
            "import.sourceDirectory is required".into(),
        ));
    }

    for pattern in &settings.exclude_objects {
        glob::Pattern::new(pattern).map_err(|e| {
            ImportError::Config(format!(
                "import.excludeObjects: invalid pattern '{}': {}",
                pattern, e
            ))
        })?;
    }

    if settings.clr.disable_strict_security_for_import && !settings.clr.enable_clr {
        warn!("clr.disableStrictSecurityForImport has no effect unless clr.enableClr is true");
    }

    if offline {
        return Ok(());
    }

    validate_connection(&settings.connection)
}

/// Validate the target connection settings alone.
pub fn validate_connection(conn: &ConnectionSettings) -> Result<()> {
    if conn.server.is_empty() {
        return Err(ImportError::Config("connection.server is required".into()));
    }
    if conn.database.is_empty() {
        return Err(ImportError::Config("connection.database is required".into()));
    }
    if SYSTEM_DATABASES
        .iter()
        .any(|db| db.eq_ignore_ascii_case(&conn.database))
    {
        return Err(ImportError::Config(format!(
            "connection.database cannot be the system database '{}'",
            conn.database
        )));
    }
    if conn.user.as_deref().unwrap_or_default().is_empty() {
        return Err(ImportError::Config("connection.user is required".into()));
    }
    if conn.password.is_none() {
        return Err(ImportError::Config(
            "connection.password (or passwordFromEnv / --password-env) is required".into(),
        ));
    }
    if conn.command_timeout_seconds == 0 {
        return Err(ImportError::Config(
            "connection.commandTimeoutSeconds must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ClrSettings, ConnectionSettings, FileGroupStrategy, ImportMode, ImportSettings,
    };
    use std::path::PathBuf;

    fn valid_settings() -> ImportSettings {
        ImportSettings {
            connection: ConnectionSettings {
                server: "localhost".to_string(),
                port: 1433,
                database: "Sales".to_string(),
                user: Some("importer".to_string()),
                password: Some("password".to_string()),
                encrypt: true,
                trust_server_certificate: true,
                command_timeout_seconds: 300,
                create_database: false,
            },
            source_directory: PathBuf::from("./export"),
            report_directory: None,
            import_mode: ImportMode::Dev,
            continue_on_error: false,
            exclude_object_types: Vec::new(),
            exclude_schemas: Vec::new(),
            exclude_objects: Vec::new(),
            file_group_strategy: FileGroupStrategy::RemoveToPrimary,
            strip_filestream: false,
            strip_always_encrypted: false,
            file_group_sizing: None,
            clr: ClrSettings::default(),
        }
    }

    #[test]
    fn test_valid_settings() {
        assert!(validate(&valid_settings(), false).is_ok());
    }

    #[test]
    fn test_missing_source_directory() {
        let mut settings = valid_settings();
        settings.source_directory = PathBuf::new();
        assert!(validate(&settings, true).is_err());
    }

    #[test]
    fn test_missing_database() {
        let mut settings = valid_settings();
        settings.connection.database = String::new();
        assert!(validate(&settings, false).is_err());
        assert!(validate(&settings, true).is_ok());
    }

    #[test]
    fn test_system_database_rejected() {
        let mut settings = valid_settings();
        settings.connection.database = "MASTER".to_string();
        assert!(validate(&settings, false).is_err());
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let mut settings = valid_settings();
        settings.exclude_objects = vec!["dbo.[abc".to_string()];
        assert!(matches!(
            validate(&settings, true),
            Err(ImportError::Config(_))
        ));
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut settings = valid_settings();
        settings.connection.password = Some("super_secret_password_123".to_string());
        let debug_output = format!("{:?}", settings.connection);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
