use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::domain::FileKind;
use crate::download::FetchReport;

#[derive(Debug, Error, Diagnostic)]
pub enum RefmanError {
    #[error("cannot resolve registry location: {0}")]
    #[diagnostic(help("pass an explicit registry path or set REFMAN_HOME"))]
    PathResolution(String),

    #[error("no registry found at {0}")]
    #[diagnostic(help("run `refman init` first"))]
    RegistryNotFound(Utf8PathBuf),

    #[error("a registry already exists at {0}")]
    RegistryAlreadyExists(Utf8PathBuf),

    #[error("failed to parse registry {path}: {message}")]
    RegistryParse { path: Utf8PathBuf, message: String },

    #[error("failed to write registry {path}: {message}")]
    RegistryWrite { path: Utf8PathBuf, message: String },

    #[error("invalid dataset '{label}': {reason}")]
    InvalidDataset { label: String, reason: String },

    #[error("dataset not registered: {0}")]
    DatasetNotFound(String),

    #[error("invalid {kind} location for '{label}': {value} ({reason})")]
    InvalidUrl {
        label: String,
        kind: FileKind,
        value: String,
        reason: String,
    },

    #[error("request to {url} failed: {message}")]
    Network {
        url: String,
        retryable: bool,
        message: String,
    },

    #[error("{url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("every requested file failed to download ({} attempted)", .report.len())]
    DownloadFailed { report: Box<FetchReport> },
}

impl RefmanError {
    /// Transient failures worth another attempt: connection problems, timeouts,
    /// rate limiting and server-side errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            RefmanError::Network { retryable, .. } => *retryable,
            RefmanError::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
