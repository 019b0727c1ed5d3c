//! Error types for the import engine.

use thiserror::Error;

/// Main error type for import operations.
#[derive(Error, Debug)]
pub enum ImportError {
    /// Configuration error (invalid YAML, missing fields, bad enum values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target server connection error with context
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Target database error outside of per-unit execution
    #[error("Target database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Catalog directory or manifest problem
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// A unit failed under StopOnError and the run was aborted
    #[error("Import aborted at {object}: {message}")]
    Aborted { object: String, message: String },

    /// The run completed but left failed objects under StopOnError
    #[error("Import failed: {failed} object(s) could not be applied")]
    ImportFailed { failed: usize },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Import was cancelled (SIGINT, SIGTERM)
    #[error("Import cancelled")]
    Cancelled,
}

/// Process exit codes used by the CLI.
pub const EXIT_CONFIG_ERROR: u8 = 1;
pub const EXIT_CONNECTION_ERROR: u8 = 2;
pub const EXIT_CATALOG_ERROR: u8 = 3;
pub const EXIT_IMPORT_FAILED: u8 = 4;
pub const EXIT_IO_ERROR: u8 = 7;
pub const EXIT_CANCELLED: u8 = 130;

impl ImportError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        ImportError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create an Aborted error for the given object
    pub fn aborted(object: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::Aborted {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            ImportError::Config(_) | ImportError::Yaml(_) => EXIT_CONFIG_ERROR,
            ImportError::Connection { .. } | ImportError::Database(_) => EXIT_CONNECTION_ERROR,
            ImportError::Catalog(_) | ImportError::Json(_) => EXIT_CATALOG_ERROR,
            ImportError::Aborted { .. } | ImportError::ImportFailed { .. } => EXIT_IMPORT_FAILED,
            ImportError::Io(_) => EXIT_IO_ERROR,
            ImportError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;
