//! SQL Server executor over a single tiberius connection.

use super::{BatchError, BatchExecutor};
use crate::config::ConnectionSettings;
use crate::error::{ImportError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

type TdsClient = Client<Compat<TcpStream>>;

fn build_config(settings: &ConnectionSettings, database: &str) -> Config {
    let mut config = Config::new();
    config.host(&settings.server);
    config.port(settings.port);
    config.database(database);
    config.authentication(AuthMethod::sql_server(
        settings.user.as_deref().unwrap_or_default(),
        settings.password.as_deref().unwrap_or_default(),
    ));

    if settings.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::NotSupported);
    }
    if settings.trust_server_certificate {
        config.trust_cert();
    }

    config
}

async fn connect_client(settings: &ConnectionSettings, database: &str) -> Result<TdsClient> {
    let config = build_config(settings, database);
    let context = format!("{}:{}/{}", settings.server, settings.port, database);

    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| ImportError::connection(e, format!("connecting to {}", context)))?;
    tcp.set_nodelay(true).ok();

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| ImportError::connection(e, format!("logging in to {}", context)))
}

async fn run_batch(client: &mut TdsClient, sql: &str) -> std::result::Result<(), tiberius::error::Error> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

/// Create the target database through `master` if it does not exist.
async fn ensure_database(settings: &ConnectionSettings) -> Result<()> {
    let mut client = connect_client(settings, "master").await?;
    let sql = format!(
        "IF DB_ID(N'{}') IS NULL CREATE DATABASE [{}]",
        settings.database.replace('\'', "''"),
        settings.database.replace(']', "]]")
    );
    client.simple_query(sql).await?.into_results().await?;
    info!(database = %settings.database, "Ensured target database exists");
    Ok(())
}

/// Executes batches against the target database.
///
/// The connection is taken out for each batch; a batch that times out or is
/// dropped mid-flight discards it and the next call reconnects.
pub struct MssqlExecutor {
    settings: ConnectionSettings,
    client: Option<TdsClient>,
    data_path: Option<String>,
}

impl MssqlExecutor {
    /// Connect to the target database, creating it first if configured to.
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        if settings.create_database {
            ensure_database(settings).await?;
        }

        let client = connect_client(settings, &settings.database).await?;
        info!(
            "Connected to target: {}:{}/{}",
            settings.server, settings.port, settings.database
        );

        Ok(Self {
            settings: settings.clone(),
            client: Some(client),
            data_path: None,
        })
    }

    async fn take_client(&mut self) -> Result<TdsClient> {
        match self.client.take() {
            Some(client) => Ok(client),
            None => {
                warn!("Reconnecting to target after an interrupted batch");
                connect_client(&self.settings, &self.settings.database).await
            }
        }
    }

    async fn client(&mut self) -> Result<&mut TdsClient> {
        let client = self.take_client().await?;
        Ok(self.client.insert(client))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.command_timeout_seconds)
    }
}

#[async_trait]
impl BatchExecutor for MssqlExecutor {
    async fn execute_batch(&mut self, sql: &str) -> std::result::Result<(), BatchError> {
        let timeout = self.timeout();
        let mut client = self
            .take_client()
            .await
            .map_err(|e| BatchError::other(e.to_string()))?;

        match tokio::time::timeout(timeout, run_batch(&mut client, sql)).await {
            Ok(Ok(())) => {
                self.client = Some(client);
                Ok(())
            }
            Ok(Err(e)) => {
                if matches!(e, tiberius::error::Error::Server(_)) {
                    self.client = Some(client);
                }
                Err(e.into())
            }
            Err(_) => {
                debug!("Discarding connection after timeout");
                Err(BatchError::timeout(self.settings.command_timeout_seconds))
            }
        }
    }

    async fn server_option(&mut self, name: &str) -> Result<i64> {
        let client = self.client().await?;
        let row = client
            .query(
                "SELECT CAST(value_in_use AS BIGINT) FROM sys.configurations WHERE name = @P1",
                &[&name],
            )
            .await?
            .into_row()
            .await?;

        row.and_then(|r| r.get::<i64, _>(0))
            .ok_or_else(|| ImportError::Config(format!("unknown server option '{}'", name)))
    }

    async fn set_server_option(&mut self, name: &str, value: i64) -> Result<()> {
        let sql = format!(
            "EXEC sp_configure N'{}', {}; RECONFIGURE;",
            name.replace('\'', "''"),
            value
        );
        let client = self.client().await?;
        client.simple_query(sql).await?.into_results().await?;
        info!(option = name, value, "Server option set");
        Ok(())
    }

    async fn default_data_path(&mut self) -> Result<String> {
        if let Some(path) = &self.data_path {
            return Ok(path.clone());
        }

        let client = self.client().await?;
        let row = client
            .simple_query("SELECT CAST(SERVERPROPERTY('InstanceDefaultDataPath') AS NVARCHAR(4000))")
            .await?
            .into_row()
            .await?;
        let mut path = row
            .as_ref()
            .and_then(|r| r.get::<&str, _>(0))
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        if path.is_none() {
            let row = client
                .simple_query(
                    "SELECT TOP (1) physical_name FROM sys.database_files WHERE type = 0 ORDER BY file_id",
                )
                .await?
                .into_row()
                .await?;
            path = row
                .as_ref()
                .and_then(|r| r.get::<&str, _>(0))
                .and_then(|p| p.rfind(['\\', '/']).map(|i| p[..=i].to_string()));
        }

        let path = path.ok_or_else(|| {
            ImportError::connection(
                "server did not report a data directory",
                "resolving default data path",
            )
        })?;
        debug!(path = %path, "Target data directory");
        self.data_path = Some(path.clone());
        Ok(path)
    }

    fn database(&self) -> &str {
        &self.settings.database
    }
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connect to the target and read the server version.
pub async fn health_check(settings: &ConnectionSettings) -> HealthCheckResult {
    let start = Instant::now();
    let outcome = async {
        let mut client = connect_client(settings, &settings.database).await?;
        let row = client
            .simple_query("SELECT @@VERSION")
            .await?
            .into_row()
            .await?;
        Ok::<_, ImportError>(
            row.and_then(|r| r.get::<&str, _>(0).map(|v| v.lines().next().unwrap_or(v).to_string())),
        )
    }
    .await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(server_version) => HealthCheckResult {
            connected: true,
            latency_ms,
            server_version,
            error: None,
        },
        Err(e) => HealthCheckResult {
            connected: false,
            latency_ms,
            server_version: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            server: "sqlprod01".to_string(),
            port: 1444,
            database: "Sales".to_string(),
            user: Some("importer".to_string()),
            password: Some("secret".to_string()),
            encrypt: true,
            trust_server_certificate: false,
            command_timeout_seconds: 300,
            create_database: false,
        }
    }

    #[test]
    fn test_build_config_address() {
        let config = build_config(&settings(), "Sales");
        assert_eq!(config.get_addr(), "sqlprod01:1444");
    }

    #[test]
    fn test_server_error_maps_number() {
        let io = tiberius::error::Error::Io {
            kind: std::io::ErrorKind::ConnectionReset,
            message: "reset".into(),
        };
        let err = BatchError::from(io);
        assert_eq!(err.number, None);
        assert!(!err.timed_out);
    }

    #[test]
    fn test_health_check_result_serializes_camel_case() {
        let result = HealthCheckResult {
            connected: true,
            latency_ms: 12,
            server_version: Some("Microsoft SQL Server 2022".into()),
            error: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"latencyMs\":12"));
        assert!(json.contains("\"serverVersion\""));
        assert!(!json.contains("\"error\""));
    }
}
