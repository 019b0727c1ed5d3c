//! mssql-schema-import CLI - apply an exported SQL Server schema catalog.

use clap::{Args, Parser, Subcommand};
use mssql_schema_import::{
    health_check, resolve_settings, CliOverrides, ConfigFile, FileGroupStrategy, ImportError,
    ImportMode, ImportOrchestrator, ImportPlan, ImportReport,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

const DEFAULT_CONFIG: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "mssql-schema-import")]
#[command(about = "Import an exported SQL Server schema catalog into a target database")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file [default: config.yaml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import the catalog into the target database
    Run(RunArgs),

    /// Test the target database connection
    HealthCheck(ConnectionArgs),
}

/// Target connection overrides.
#[derive(Args)]
struct ConnectionArgs {
    /// Target server host
    #[arg(long)]
    server: Option<String>,

    /// Target server port
    #[arg(long)]
    port: Option<u16>,

    /// Target database
    #[arg(long)]
    database: Option<String>,

    /// Login user
    #[arg(long)]
    user: Option<String>,

    /// Environment variable holding the server host
    #[arg(long, value_name = "VAR")]
    server_env: Option<String>,

    /// Environment variable holding the database name
    #[arg(long, value_name = "VAR")]
    database_env: Option<String>,

    /// Environment variable holding the login user
    #[arg(long, value_name = "VAR")]
    user_env: Option<String>,

    /// Environment variable holding the password
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,

    /// Per-batch timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    command_timeout: Option<u64>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Catalog root directory
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Directory for the import report [default: catalog root]
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Dev or Prod
    #[arg(long)]
    import_mode: Option<ImportMode>,

    /// Keep going after a failed object
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    continue_on_error: Option<bool>,

    /// Object types to skip (comma-separated, e.g. Views,Synonyms)
    #[arg(long, value_delimiter = ',')]
    exclude_object_types: Option<Vec<String>>,

    /// Schemas to skip (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_schemas: Option<Vec<String>>,

    /// schema.name globs to skip (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_objects: Option<Vec<String>>,

    /// autoRemap or removeToPrimary
    #[arg(long)]
    file_group_strategy: Option<FileGroupStrategy>,

    /// Remove FILESTREAM clauses and filegroups
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    strip_filestream: Option<bool>,

    /// Remove Always Encrypted column clauses and keys
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    strip_always_encrypted: Option<bool>,

    /// Import CLR assemblies and enable CLR integration
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    enable_clr: Option<bool>,

    /// Relax 'clr strict security' while importing
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    disable_strict_security: Option<bool>,

    /// Restore 'clr strict security' after the run
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    restore_strict_security: Option<bool>,

    /// Create the target database if it does not exist
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    create_database: Option<bool>,

    /// Dry run: load, filter and transform, then show the plan without connecting
    #[arg(long)]
    dry_run: bool,
}

impl ConnectionArgs {
    fn apply(self, overrides: &mut CliOverrides) {
        overrides.server = self.server;
        overrides.port = self.port;
        overrides.database = self.database;
        overrides.user = self.user;
        overrides.server_env = self.server_env;
        overrides.database_env = self.database_env;
        overrides.user_env = self.user_env;
        overrides.password_env = self.password_env;
        overrides.command_timeout_seconds = self.command_timeout;
    }
}

impl RunArgs {
    fn overrides(self) -> (CliOverrides, bool) {
        let mut overrides = CliOverrides {
            source_directory: self.source_dir,
            report_directory: self.report_dir,
            import_mode: self.import_mode,
            continue_on_error: self.continue_on_error,
            exclude_object_types: self.exclude_object_types,
            exclude_schemas: self.exclude_schemas,
            exclude_objects: self.exclude_objects,
            file_group_strategy: self.file_group_strategy,
            strip_filestream: self.strip_filestream,
            strip_always_encrypted: self.strip_always_encrypted,
            enable_clr: self.enable_clr,
            disable_strict_security: self.disable_strict_security,
            restore_strict_security: self.restore_strict_security,
            create_database: self.create_database,
            ..Default::default()
        };
        self.connection.apply(&mut overrides);
        (overrides, self.dry_run)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), ImportError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(ImportError::Config)?;

    let file = load_config_file(cli.config.as_deref())?;
    let env = |name: &str| std::env::var(name).ok();

    match cli.command {
        Commands::Run(args) => {
            let (overrides, dry_run) = args.overrides();
            let (settings, effective) = resolve_settings(file.as_ref(), &overrides, env)?;
            settings.validate(dry_run)?;

            let orchestrator = ImportOrchestrator::new(settings, effective);

            if dry_run {
                let plan = orchestrator.plan()?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    print_plan(&plan);
                }
                return Ok(());
            }

            let cancel_token = setup_signal_handler();
            let report = orchestrator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }
        }

        Commands::HealthCheck(args) => {
            let mut overrides = CliOverrides::default();
            args.apply(&mut overrides);
            let (settings, _) = resolve_settings(file.as_ref(), &overrides, env)?;
            settings.connection.validate()?;

            let result = health_check(&settings.connection).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target ({}:{}/{}): {} ({}ms)",
                    settings.connection.server,
                    settings.connection.port,
                    settings.connection.database,
                    if result.connected { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref version) = result.server_version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
            }

            if let Some(err) = result.error {
                return Err(ImportError::connection(err, "health check"));
            }
        }
    }

    Ok(())
}

/// Load the config file. A missing default file is allowed; a missing
/// explicit file is an error.
fn load_config_file(explicit: Option<&Path>) -> Result<Option<ConfigFile>, ImportError> {
    match explicit {
        Some(path) => {
            let file = ConfigFile::load(path)?;
            info!("Loaded configuration from {:?}", path);
            Ok(Some(file))
        }
        None => {
            let path = Path::new(DEFAULT_CONFIG);
            if !path.exists() {
                return Ok(None);
            }
            let file = ConfigFile::load(path)?;
            info!("Loaded configuration from {:?}", path);
            Ok(Some(file))
        }
    }
}

fn print_plan(plan: &ImportPlan) {
    println!("\nDry run completed!");
    println!("  Exported objects: {}", plan.exported_object_count);
    println!("  Would apply: {}", plan.scheduled_object_count);
    println!("  Would skip: {}", plan.skipped_object_count);
    for (reason, count) in &plan.skipped_reasons {
        println!("    {}: {}", reason, count);
    }
    for unit in &plan.scheduled {
        println!("  [{:02}] {} ({})", unit.phase, unit.object, unit.object_type);
    }
}

fn print_report(report: &ImportReport) {
    println!("\nImport completed!");
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration);
    println!(
        "  Objects: {} imported, {} skipped, {} failed (of {} exported)",
        report.imported_object_count,
        report.skipped_object_count,
        report.failed_object_count,
        report.exported_object_count
    );
    for failed in &report.failed_objects {
        println!("  Failed: {}: {}", failed.object, failed.error_message);
        if let Some(ref hint) = failed.hint {
            println!("    Hint: {}", hint);
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("invalid --log-format '{}', expected text or json", other)),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Stopping after the current batch...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
        token.cancel();
    });

    cancel_token
}
