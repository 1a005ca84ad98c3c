//! CLI error types.

use std::fmt;

use pager_escalation::EscalationError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// The scenario file is malformed or inconsistent.
    Scenario(String),
    /// The escalation engine failed.
    Engine(EscalationError),
    /// No escalation stored for the alert group.
    NotFound(String),
    /// Output formatting error.
    Format(String),
    /// Invalid argument.
    InvalidArgument(String),
    /// IO error.
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scenario(msg) => write!(f, "scenario error: {msg}"),
            Self::Engine(e) => write!(f, "engine error: {e}"),
            Self::NotFound(id) => write!(f, "no escalation stored for alert group {id}"),
            Self::Format(msg) => write!(f, "format error: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<EscalationError> for CliError {
    fn from(err: EscalationError) -> Self {
        Self::Engine(err)
    }
}
