//! Layered settings resolution.
//!
//! Precedence, highest first: command-line flag, named environment
//! variable, config file, built-in default. List-valued settings are taken
//! whole from the winning layer; a CLI list replaces the file's list.

use super::types::*;
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Where a resolved setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingSource {
    Default,
    ConfigFile,
    EnvVar,
    Cli,
}

/// A resolved, non-secret setting as recorded in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveSetting {
    pub value: serde_json::Value,
    pub source_kind: SettingSource,
}

/// Setting name → resolved value and origin.
pub type EffectiveConfiguration = BTreeMap<String, EffectiveSetting>;

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub source_directory: Option<PathBuf>,
    pub report_directory: Option<PathBuf>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub server_env: Option<String>,
    pub database_env: Option<String>,
    pub user_env: Option<String>,
    pub password_env: Option<String>,
    pub import_mode: Option<ImportMode>,
    pub continue_on_error: Option<bool>,
    pub exclude_object_types: Option<Vec<String>>,
    pub exclude_schemas: Option<Vec<String>>,
    pub exclude_objects: Option<Vec<String>>,
    pub file_group_strategy: Option<FileGroupStrategy>,
    pub strip_filestream: Option<bool>,
    pub strip_always_encrypted: Option<bool>,
    pub enable_clr: Option<bool>,
    pub disable_strict_security: Option<bool>,
    pub restore_strict_security: Option<bool>,
    pub create_database: Option<bool>,
    pub command_timeout_seconds: Option<u64>,
}

/// Records which layer each setting was taken from.
struct Layers {
    effective: EffectiveConfiguration,
}

impl Layers {
    fn pick<T: Serialize>(
        &mut self,
        key: &str,
        cli: Option<T>,
        env: Option<T>,
        file: Option<T>,
        default: T,
    ) -> T {
        let (value, source) = Self::choose(cli, env, file, default);
        self.effective.insert(
            key.to_string(),
            EffectiveSetting {
                value: serde_json::to_value(&value).unwrap_or_default(),
                source_kind: source,
            },
        );
        value
    }

    /// Same precedence as [`Layers::pick`], but never recorded.
    fn pick_secret<T>(cli: Option<T>, env: Option<T>, file: Option<T>, default: T) -> T {
        Self::choose(cli, env, file, default).0
    }

    fn choose<T>(
        cli: Option<T>,
        env: Option<T>,
        file: Option<T>,
        default: T,
    ) -> (T, SettingSource) {
        if let Some(v) = cli {
            (v, SettingSource::Cli)
        } else if let Some(v) = env {
            (v, SettingSource::EnvVar)
        } else if let Some(v) = file {
            (v, SettingSource::ConfigFile)
        } else {
            (default, SettingSource::Default)
        }
    }
}

/// Look up the environment variable named by the CLI or the file.
fn indirect<F>(cli_name: Option<&String>, file_name: Option<&String>, env: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let name = cli_name.or(file_name)?;
    let value = env(name);
    if value.is_none() {
        warn!("Environment variable {} is not set", name);
    }
    value
}

/// Resolve the effective settings from all layers.
///
/// `env` looks up an environment variable by name; the CLI passes
/// `|name| std::env::var(name).ok()`.
pub fn resolve_settings<F>(
    file: Option<&ConfigFile>,
    cli: &CliOverrides,
    env: F,
) -> Result<(ImportSettings, EffectiveConfiguration)>
where
    F: Fn(&str) -> Option<String>,
{
    let empty = ConfigFile::default();
    let file = file.unwrap_or(&empty);
    let conn = &file.connection;
    let imp = &file.import;
    let mut layers = Layers {
        effective: BTreeMap::new(),
    };

    let server = layers.pick(
        "connection.server",
        cli.server.clone(),
        indirect(cli.server_env.as_ref(), conn.server_from_env.as_ref(), &env),
        conn.server.clone(),
        DEFAULT_SERVER.to_string(),
    );
    let port = layers.pick("connection.port", cli.port, None, conn.port, DEFAULT_PORT);
    let database = layers.pick(
        "connection.database",
        cli.database.clone(),
        indirect(cli.database_env.as_ref(), conn.database_from_env.as_ref(), &env),
        conn.database.clone(),
        String::new(),
    );
    let user = Layers::pick_secret(
        cli.user.clone().map(Some),
        indirect(cli.user_env.as_ref(), conn.user_from_env.as_ref(), &env).map(Some),
        conn.user.clone().map(Some),
        None,
    );
    let password = Layers::pick_secret(
        None,
        indirect(cli.password_env.as_ref(), conn.password_from_env.as_ref(), &env).map(Some),
        conn.password.clone().map(Some),
        None,
    );
    let encrypt = layers.pick("connection.encrypt", None, None, conn.encrypt, true);
    let trust_server_certificate = layers.pick(
        "connection.trustServerCertificate",
        None,
        None,
        conn.trust_server_certificate,
        false,
    );
    let command_timeout_seconds = layers.pick(
        "connection.commandTimeoutSeconds",
        cli.command_timeout_seconds,
        None,
        conn.command_timeout_seconds,
        DEFAULT_COMMAND_TIMEOUT_SECONDS,
    );
    let create_database = layers.pick(
        "connection.createDatabase",
        cli.create_database,
        None,
        conn.create_database,
        false,
    );

    let source_directory = layers.pick(
        "import.sourceDirectory",
        cli.source_directory.clone(),
        None,
        imp.source_directory.clone(),
        PathBuf::new(),
    );
    let report_directory = layers.pick(
        "import.reportDirectory",
        cli.report_directory.clone().map(Some),
        None,
        imp.report_directory.clone().map(Some),
        None,
    );
    let import_mode = layers.pick(
        "import.importMode",
        cli.import_mode,
        None,
        imp.import_mode,
        ImportMode::Dev,
    );
    let continue_on_error = layers.pick(
        "import.continueOnError",
        cli.continue_on_error,
        None,
        imp.continue_on_error,
        false,
    );
    let exclude_object_types = layers.pick(
        "import.excludeObjectTypes",
        cli.exclude_object_types.clone(),
        None,
        imp.exclude_object_types.clone(),
        Vec::new(),
    );
    let exclude_schemas = layers.pick(
        "import.excludeSchemas",
        cli.exclude_schemas.clone(),
        None,
        imp.exclude_schemas.clone(),
        Vec::new(),
    );
    let exclude_objects = layers.pick(
        "import.excludeObjects",
        cli.exclude_objects.clone(),
        None,
        imp.exclude_objects.clone(),
        Vec::new(),
    );
    let default_strategy = match import_mode {
        ImportMode::Dev => FileGroupStrategy::RemoveToPrimary,
        ImportMode::Prod => FileGroupStrategy::AutoRemap,
    };
    let file_group_strategy = layers.pick(
        "import.fileGroupStrategy",
        cli.file_group_strategy,
        None,
        imp.file_group_strategy,
        default_strategy,
    );
    let strip_filestream = layers.pick(
        "import.stripFilestream",
        cli.strip_filestream,
        None,
        imp.strip_filestream,
        false,
    );
    let strip_always_encrypted = layers.pick(
        "import.stripAlwaysEncrypted",
        cli.strip_always_encrypted,
        None,
        imp.strip_always_encrypted,
        false,
    );
    let file_group_sizing = layers.pick(
        "import.fileGroupSizing",
        None,
        None,
        imp.file_group_sizing.map(Some),
        None,
    );

    let clr_defaults = ClrSettings::default();
    let clr = ClrSettings {
        enable_clr: layers.pick(
            "import.clr.enableClr",
            cli.enable_clr,
            None,
            imp.clr.enable_clr,
            clr_defaults.enable_clr,
        ),
        disable_strict_security_for_import: layers.pick(
            "import.clr.disableStrictSecurityForImport",
            cli.disable_strict_security,
            None,
            imp.clr.disable_strict_security_for_import,
            clr_defaults.disable_strict_security_for_import,
        ),
        restore_strict_security_setting: layers.pick(
            "import.clr.restoreStrictSecuritySetting",
            cli.restore_strict_security,
            None,
            imp.clr.restore_strict_security_setting,
            clr_defaults.restore_strict_security_setting,
        ),
    };

    let settings = ImportSettings {
        connection: ConnectionSettings {
            server,
            port,
            database,
            user,
            password,
            encrypt,
            trust_server_certificate,
            command_timeout_seconds,
            create_database,
        },
        source_directory,
        report_directory,
        import_mode,
        continue_on_error,
        exclude_object_types,
        exclude_schemas,
        exclude_objects,
        file_group_strategy,
        strip_filestream,
        strip_always_encrypted,
        file_group_sizing,
        clr,
    };

    Ok((settings, layers.effective))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn file_from_yaml(yaml: &str) -> ConfigFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_cli_exclusions_replace_file_exclusions() {
        let file = file_from_yaml(
            r#"
import:
  excludeSchemas: [cdc, staging]
"#,
        );
        let cli = CliOverrides {
            exclude_schemas: Some(vec!["app".to_string()]),
            ..Default::default()
        };

        let (settings, effective) = resolve_settings(Some(&file), &cli, no_env).unwrap();
        assert_eq!(settings.exclude_schemas, vec!["app".to_string()]);
        assert_eq!(
            effective["import.excludeSchemas"].source_kind,
            SettingSource::Cli
        );
    }

    #[test]
    fn test_file_exclusions_used_without_cli() {
        let file = file_from_yaml(
            r#"
import:
  excludeSchemas: [cdc, staging]
"#,
        );
        let (settings, effective) =
            resolve_settings(Some(&file), &CliOverrides::default(), no_env).unwrap();
        assert_eq!(settings.exclude_schemas, vec!["cdc", "staging"]);
        assert_eq!(
            effective["import.excludeSchemas"].source_kind,
            SettingSource::ConfigFile
        );
    }

    #[test]
    fn test_env_indirection_beats_file_but_not_cli() {
        let file = file_from_yaml(
            r#"
connection:
  server: file-server
  serverFromEnv: IMPORT_SERVER
  database: Sales
"#,
        );
        let env = |name: &str| (name == "IMPORT_SERVER").then(|| "env-server".to_string());

        let (settings, effective) =
            resolve_settings(Some(&file), &CliOverrides::default(), env).unwrap();
        assert_eq!(settings.connection.server, "env-server");
        assert_eq!(
            effective["connection.server"].source_kind,
            SettingSource::EnvVar
        );

        let cli = CliOverrides {
            server: Some("cli-server".to_string()),
            ..Default::default()
        };
        let (settings, _) = resolve_settings(Some(&file), &cli, env).unwrap();
        assert_eq!(settings.connection.server, "cli-server");
    }

    #[test]
    fn test_password_never_recorded() {
        let file = file_from_yaml(
            r#"
connection:
  user: importer
  passwordFromEnv: IMPORT_PASSWORD
"#,
        );
        let env = |name: &str| (name == "IMPORT_PASSWORD").then(|| "s3cret".to_string());
        let (settings, effective) =
            resolve_settings(Some(&file), &CliOverrides::default(), env).unwrap();

        assert_eq!(settings.connection.password.as_deref(), Some("s3cret"));
        assert!(effective.keys().all(|k| !k.contains("password")));
        assert!(effective.keys().all(|k| !k.contains("user")));
        let serialized = serde_json::to_string(&effective).unwrap();
        assert!(!serialized.contains("s3cret"));
    }

    #[test]
    fn test_defaults_depend_on_mode() {
        let (dev, effective) = resolve_settings(None, &CliOverrides::default(), no_env).unwrap();
        assert_eq!(dev.import_mode, ImportMode::Dev);
        assert_eq!(dev.file_group_strategy, FileGroupStrategy::RemoveToPrimary);
        assert_eq!(
            effective["import.fileGroupStrategy"].source_kind,
            SettingSource::Default
        );
        assert!(dev.clr.restore_strict_security_setting);
        assert!(!dev.clr.enable_clr);

        let cli = CliOverrides {
            import_mode: Some(ImportMode::Prod),
            ..Default::default()
        };
        let (prod, _) = resolve_settings(None, &cli, no_env).unwrap();
        assert_eq!(prod.file_group_strategy, FileGroupStrategy::AutoRemap);
    }

    #[test]
    fn test_clr_section_from_file() {
        let file = file_from_yaml(
            r#"
import:
  importMode: Prod
  clr:
    enableClr: true
    disableStrictSecurityForImport: true
    restoreStrictSecuritySetting: false
"#,
        );
        let (settings, _) =
            resolve_settings(Some(&file), &CliOverrides::default(), no_env).unwrap();
        assert!(settings.clr.enable_clr);
        assert!(settings.clr.disable_strict_security_for_import);
        assert!(!settings.clr.restore_strict_security_setting);
    }
}
