//! Target SQL Server access.
//!
//! The scheduler talks to the server only through [`BatchExecutor`], so a
//! run can be driven against an in-memory executor in tests.

mod mssql;

pub use mssql::{health_check, HealthCheckResult, MssqlExecutor};

use crate::catalog::FailureClass;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Server option relaxed for CLR assembly import.
pub const CLR_STRICT_SECURITY: &str = "clr strict security";

/// Server option enabling CLR integration.
pub const CLR_ENABLED: &str = "clr enabled";

/// Server option that must be on before `clr strict security` can change.
pub const SHOW_ADVANCED_OPTIONS: &str = "show advanced options";

/// Error numbers that indicate a referenced object does not exist yet.
const DEFERRABLE_ERRORS: &[u32] = &[
    208,   // Invalid object name
    2715,  // Cannot find data type
    1767,  // Foreign key references invalid table
    1769,  // Foreign key references invalid column
    4902,  // Cannot find the object
    15151, // Cannot find the object, it does not exist or no permission
    2760,  // Specified schema name does not exist
    4121,  // Cannot find either column or user-defined function
    1088,  // Cannot find the object
];

/// Message fragments used when the server gave no error number.
const DEFERRABLE_MESSAGES: &[&str] = &[
    "invalid object name",
    "cannot find the object",
    "does not exist",
];

/// Failure of one submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Server error number, when the failure came from the server.
    pub number: Option<u32>,
    pub message: String,
    pub timed_out: bool,
}

impl BatchError {
    pub fn server(number: u32, message: impl Into<String>) -> Self {
        Self {
            number: Some(number),
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            number: None,
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self {
            number: None,
            message: format!("batch timed out after {}s", seconds),
            timed_out: true,
        }
    }

    /// Deferred when the error suggests a not-yet-created dependency.
    pub fn classify(&self) -> FailureClass {
        if self.timed_out {
            return FailureClass::Fatal;
        }
        let deferrable = match self.number {
            Some(number) => DEFERRABLE_ERRORS.contains(&number),
            None => {
                let message = self.message.to_ascii_lowercase();
                DEFERRABLE_MESSAGES.iter().any(|m| message.contains(m))
            }
        };
        if deferrable {
            FailureClass::Deferred
        } else {
            FailureClass::Fatal
        }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(number) => write!(f, "Msg {}: {}", number, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BatchError {}

impl From<tiberius::error::Error> for BatchError {
    fn from(e: tiberius::error::Error) -> Self {
        match e {
            tiberius::error::Error::Server(token) => {
                BatchError::server(token.code(), token.message())
            }
            other => BatchError::other(other.to_string()),
        }
    }
}

/// Sequential access to the target database.
#[async_trait]
pub trait BatchExecutor: Send {
    /// Submit one batch and drain all of its results.
    async fn execute_batch(&mut self, sql: &str) -> std::result::Result<(), BatchError>;

    /// Current `value_in_use` of a server configuration option.
    async fn server_option(&mut self, name: &str) -> Result<i64>;

    /// Set a server configuration option and apply it.
    async fn set_server_option(&mut self, name: &str, value: i64) -> Result<()>;

    /// Directory new data files are created in, with a trailing separator.
    async fn default_data_path(&mut self) -> Result<String>;

    /// Name of the database scripts are applied to.
    fn database(&self) -> &str;
}
