//! Unified error types for iocage-reconcile
//!
//! Every variant is fatal: nothing in the engine retries or recovers.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for reconciliation runs
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    /// A desired value or manifest entry that cannot be expressed to iocage
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Protocol errors (utility output not understood)
    #[error("Unreadable output from '{command}': {message}\n'{line}'")]
    Protocol {
        command: String,
        line: String,
        message: String,
    },

    // Caller asked for something the current facts do not allow
    #[error("{0}")]
    Precondition(String),

    #[error("Failed to execute '{command}': {source}")]
    Spawn { command: String, source: io::Error },

    #[error("{label}\ncmd: '{command}' return: {code}\nstdout: '{stdout}'\nstderr: '{stderr}'")]
    Command {
        label: String,
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The utility reported success but the facts disagree
    #[error("{message}\n{stdout}\n{stderr}")]
    Postcondition {
        message: String,
        stdout: String,
        stderr: String,
    },

    /// The planner produced a sequence the lifecycle machine rejects
    #[error("Invalid plan for '{jail}': cannot {action} while {state}")]
    Plan {
        jail: String,
        action: String,
        state: String,
    },

    // System errors
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),
}

impl Error {
    /// Build a protocol error for a line of utility output
    pub fn protocol(command: &str, line: &str, message: impl Into<String>) -> Self {
        Error::Protocol {
            command: command.to_string(),
            line: line.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;
