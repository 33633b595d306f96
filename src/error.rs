//! Error types for the schema registry

use thiserror::Error;

use crate::report::Report;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Failures while building a [`ProtoDomain`](crate::ProtoDomain) from descriptors.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("malformed descriptor bytes: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("file descriptor at position {0} has no name")]
    UnnamedFile(usize),

    #[error("file '{0}' appears more than once in the descriptor set")]
    DuplicateFile(String),

    #[error("'{name}' is declared in both '{first}' and '{second}'")]
    DuplicateType {
        name: String,
        first: String,
        second: String,
    },

    #[error("checksum mismatch for stored schema: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Schema registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{kind} '{name}' not found{}", suggestion_suffix(.suggestions))]
    NotFound {
        kind: &'static str,
        name: String,
        suggestions: Vec<String>,
    },

    #[error("unknown compatibility profile '{0}'")]
    UnknownProfile(String),

    #[error("unknown registry '{0}'")]
    UnknownRegistry(String),

    #[error("shadow registry '{shadow}' cannot follow the change: {source}")]
    ShadowConflict {
        shadow: String,
        #[source]
        source: LoadError,
    },

    #[error("resource binding for '{0}' already exists")]
    BindingExists(String),

    #[error(
        "incompatible schema: {} diff error(s), {} lint error(s); use verify to inspect the report",
        .report.result_count.diff_errors,
        .report.result_count.lint_errors
    )]
    Incompatible { report: Box<Report> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Invalid lint pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("registry state lock poisoned")]
    Poisoned,
}

impl RegistryError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        RegistryError::NotFound {
            kind,
            name: name.into(),
            suggestions: Vec::new(),
        }
    }

    /// True for scope-resolution failures (missing file, type or binding).
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }
}

fn suggestion_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {})", suggestions.join(", "))
    }
}

impl<T> From<std::sync::PoisonError<T>> for RegistryError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        RegistryError::Poisoned
    }
}
