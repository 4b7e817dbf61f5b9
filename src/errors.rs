//! Error types for script building and live runs.

use std::path::PathBuf;
use thiserror::Error;

/// The script text could not be tokenized, so it was not rewritten.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("syntax error at line {line}, column {column}: {message}")]
pub struct RewriteError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl RewriteError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Failures while the interpreter runs the rewritten script.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("failed to start interpreter '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running script: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message from script host: {0}")]
    Protocol(String),

    #[error("script exited with {status}{}", format_stderr(.stderr))]
    ScriptFailed { status: String, stderr: Vec<String> },

    #[error("run stopped before the script finished")]
    Stopped,
}

fn format_stderr(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!(":\n{}", lines.join("\n"))
    }
}

/// The reporter produced output that cannot be turned into a sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("first report has a header but no data line")]
    MissingDataLine,

    #[error("reporter header has {headers} fields but the data line has {values}")]
    FieldCountMismatch { headers: usize, values: usize },

    #[error("field '{field}' has non-numeric value '{value}'")]
    InvalidNumber { field: String, value: String },
}

/// Plot set misuse and schema resolution failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlotError {
    #[error("the reporter published neither {} so there is no x-axis to plot against (fields: {})", .preferred.join(" nor "), .fields.join(", "))]
    NoAxisField {
        preferred: Vec<String>,
        fields: Vec<String>,
    },

    #[error("plots were already created for this run")]
    AlreadyCreated,

    #[error("plots have not been created yet")]
    NotCreated,

    #[error("sample has no value for axis field '{0}'")]
    MissingAxisValue(String),
}

/// Everything that can end a run, kept distinguishable for the caller.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("could not parse reporter output: {0}")]
    AdapterParse(#[from] AdapterError),

    #[error("cannot plot this run: {0}")]
    SchemaResolution(PlotError),

    #[error("plot update failed: {0}")]
    Plot(PlotError),

    #[error("failed to open sample log {path}: {source}")]
    SampleLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

impl RunError {
    /// A user-requested stop rather than a failure of the script itself.
    pub fn is_stop(&self) -> bool {
        matches!(self, RunError::Execution(ExecutionError::Stopped))
    }
}

impl From<PlotError> for RunError {
    fn from(err: PlotError) -> Self {
        match err {
            PlotError::NoAxisField { .. } => RunError::SchemaResolution(err),
            other => RunError::Plot(other),
        }
    }
}

/// Invalid form values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid quantity '{value}': {message}")]
    Unit { value: String, message: String },

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Malformed templates or missing context values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("unclosed tag starting at byte {0}")]
    UnclosedTag(usize),

    #[error("section '{0}' is never closed")]
    UnclosedSection(String),

    #[error("closing tag '{found}' does not match open section '{expected}'")]
    MismatchedSection { expected: String, found: String },

    #[error("no value for '{0}'")]
    UnknownKey(String),

    #[error("'{0}' is not a flag and cannot open a section")]
    NotAFlag(String),
}
