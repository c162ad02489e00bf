use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FileId, FileStatus, TransportKind};

/// Result type for uploader operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Operation errors surfaced by the uploader and its transports.
///
/// Validation and transfer failures are *not* represented here: they are
/// recorded on the affected file and announced as events.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No transport available for this host (tried: {tried:?})")]
    NoAdapterAvailable { tried: Vec<TransportKind> },

    #[error("File not found: {0}")]
    FileNotFound(FileId),

    #[error("Cannot {operation} file {id} while {from}")]
    InvalidTransition {
        id: FileId,
        from: FileStatus,
        operation: &'static str,
    },

    #[error("Selection is disabled")]
    SelectionDisabled,

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("{transport} transport cannot send this file source: {reason}")]
    UnsupportedSource {
        transport: TransportKind,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl UploadError {
    /// Create an invalid option error
    pub fn invalid_option<S: Into<String>>(message: S) -> Self {
        Self::InvalidOption(message.into())
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a plugin error
    pub fn plugin<S: Into<String>>(message: S) -> Self {
        Self::Plugin(message.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Reason a selected file was rejected before entering the queue
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("duplicate")]
    #[serde(rename = "duplicate")]
    Duplicate,

    #[error("fileListSizeMax")]
    #[serde(rename = "fileListSizeMax")]
    FileListSizeMax,

    #[error("fileListMax")]
    #[serde(rename = "fileListMax")]
    FileListMax,

    #[error("fileSizeMin")]
    #[serde(rename = "fileSizeMin")]
    FileSizeMin,

    #[error("fileSizeMax")]
    #[serde(rename = "fileSizeMax")]
    FileSizeMax,

    #[error("typeFilter")]
    #[serde(rename = "typeFilter")]
    TypeFilter,
}

impl ValidationError {
    /// Stable reason code reported to listeners
    pub fn code(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::FileListSizeMax => "fileListSizeMax",
            Self::FileListMax => "fileListMax",
            Self::FileSizeMin => "fileSizeMin",
            Self::FileSizeMax => "fileSizeMax",
            Self::TypeFilter => "typeFilter",
        }
    }
}

/// Terminal outcome of a failed transfer; cleared by requeue
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferFailure {
    /// Connection-level failure (DNS, refused, reset, aborted body)
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered outside the 2xx range
    #[error("HTTP status {code}")]
    Status { code: u16, body: String },

    /// The transport's own deadline elapsed
    #[error("Transfer timed out")]
    Timeout,

    /// Failure reported by the plugin host
    #[error("Plugin reported failure: {0}")]
    Plugin(String),

    /// Reading the local file source failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The request could not be assembled (bad option, unsupported source)
    #[error("Request rejected before sending: {0}")]
    Rejected(String),
}

impl TransferFailure {
    /// Create a network failure
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a plugin failure
    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::Plugin(msg.into())
    }

    /// HTTP status code when the server answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransferFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for TransferFailure {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<UploadError> for TransferFailure {
    fn from(err: UploadError) -> Self {
        Self::Rejected(err.to_string())
    }
}
