use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{FileId, UploadFile};

/// Lifecycle notifications emitted by an uploader.
///
/// File payloads are snapshots taken at the moment of the transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum UploadEvent {
    /// Files accepted from one selection batch
    SelectSuccess { files: Vec<UploadFile>, at: DateTime<Utc> },

    /// Files rejected from one selection batch
    SelectFailed { files: Vec<UploadFile>, at: DateTime<Utc> },

    /// A single file failed validation
    Invalid { file: UploadFile, at: DateTime<Utc> },

    /// Queue-wide start requested
    BeforeStart { at: DateTime<Utc> },

    /// Queue-wide stop requested
    BeforeStop { at: DateTime<Utc> },

    /// Queue-wide removal requested
    BeforeRemove { at: DateTime<Utc> },

    Start { file: UploadFile, at: DateTime<Utc> },

    Progress { file: UploadFile, at: DateTime<Utc> },

    Complete { file: UploadFile, at: DateTime<Utc> },

    /// Transfer failed; the file stays listed with its failure
    Fail { file: UploadFile, at: DateTime<Utc> },

    Stop { file: UploadFile, at: DateTime<Utc> },

    Requeue { file: UploadFile, at: DateTime<Utc> },

    Remove { file: UploadFile, at: DateTime<Utc> },

    /// Selection was enabled or disabled
    Enabled { enabled: bool, at: DateTime<Utc> },
}

impl UploadEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SelectSuccess { .. } => "selectSuccess",
            Self::SelectFailed { .. } => "selectFailed",
            Self::Invalid { .. } => "invalid",
            Self::BeforeStart { .. } => "beforeStart",
            Self::BeforeStop { .. } => "beforeStop",
            Self::BeforeRemove { .. } => "beforeRemove",
            Self::Start { .. } => "start",
            Self::Progress { .. } => "progress",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Stop { .. } => "stop",
            Self::Requeue { .. } => "requeue",
            Self::Remove { .. } => "remove",
            Self::Enabled { .. } => "enabled",
        }
    }

    /// The single file this event concerns, if any
    pub fn file(&self) -> Option<&UploadFile> {
        match self {
            Self::Invalid { file, .. }
            | Self::Start { file, .. }
            | Self::Progress { file, .. }
            | Self::Complete { file, .. }
            | Self::Fail { file, .. }
            | Self::Stop { file, .. }
            | Self::Requeue { file, .. }
            | Self::Remove { file, .. } => Some(file),
            _ => None,
        }
    }

    /// Get the file ID from single-file events
    pub fn file_id(&self) -> Option<FileId> {
        self.file().map(UploadFile::id)
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::SelectSuccess { at, .. }
            | Self::SelectFailed { at, .. }
            | Self::Invalid { at, .. }
            | Self::BeforeStart { at }
            | Self::BeforeStop { at }
            | Self::BeforeRemove { at }
            | Self::Start { at, .. }
            | Self::Progress { at, .. }
            | Self::Complete { at, .. }
            | Self::Fail { at, .. }
            | Self::Stop { at, .. }
            | Self::Requeue { at, .. }
            | Self::Remove { at, .. }
            | Self::Enabled { at, .. } => at,
        }
    }
}
