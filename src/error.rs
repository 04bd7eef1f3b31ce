use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid campaign file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid settings: {0}")]
    Toml(String),
    #[error("{0}")]
    InvalidValue(String),
    #[error("missing argument '{0}'")]
    MissingArgument(String),
    #[error("Command '{command}' failed.")]
    CommandFailed { command: String, code: Option<i32> },
    #[error("{0}")]
    Simulation(String),
    #[error("cannot render {name}: {reason}")]
    Template { name: String, reason: String },
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("command '{0}' is already registered")]
    DuplicateCommand(String),
    #[error("task was cancelled")]
    Cancelled,
}

impl CommandError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CommandError::Io {
            context: context.into(),
            source,
        }
    }

    /// Name of the error kind, reported alongside the message of failed tasks.
    pub fn class(&self) -> &'static str {
        match self {
            CommandError::Io { .. } => "IoError",
            CommandError::Json { .. } => "JsonError",
            CommandError::Toml(_) => "TomlError",
            CommandError::InvalidValue(_) => "InvalidValue",
            CommandError::MissingArgument(_) => "MissingArgument",
            CommandError::CommandFailed { .. } => "CommandFailed",
            CommandError::Simulation(_) => "SimulationError",
            CommandError::Template { .. } => "TemplateError",
            CommandError::UnknownCommand(_) => "UnknownCommand",
            CommandError::DuplicateCommand(_) => "DuplicateCommand",
            CommandError::Cancelled => "Cancelled",
        }
    }
}

pub type CommandResult = Result<Option<String>, CommandError>;

/// Error half of a worker outcome; plain data so it can leave the worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub class: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

impl From<&CommandError> for ErrorInfo {
    fn from(err: &CommandError) -> Self {
        ErrorInfo::new(err.class(), err.to_string())
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

pub type Outcome = Result<String, ErrorInfo>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("unterminated string starting at column {0}")]
    UnterminatedString(usize),
    #[error("unexpected character '{1}' at column {0}")]
    UnexpectedChar(usize, char),
    #[error("positional argument '{0}' after keyword arguments")]
    PositionalAfterKeyword(String),
    #[error("missing value for '{0}'")]
    MissingValue(String),
}
