use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::UploadResult;
use crate::types::{FileId, UploadFile};

/// Raw handle to the bytes behind a selected file
#[derive(Debug, Clone)]
pub enum FileSource {
    /// A file on the local filesystem, streamed at send time
    Path(PathBuf),

    /// In-memory content
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },

    /// A file held by a plugin host, addressed by the plugin's id
    Remote { id: String },
}

impl FileSource {
    /// Plugin-side identifier, for remote sources
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Self::Remote { id } => Some(id),
            _ => None,
        }
    }

    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Remote { .. })
    }
}

/// One `(name, size, raw-handle)` tuple produced by a picking control
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub size: Option<u64>,
    pub source: FileSource,
}

impl SelectedFile {
    pub fn new<S: Into<String>>(name: S, size: Option<u64>, source: FileSource) -> Self {
        Self {
            name: name.into(),
            size,
            source,
        }
    }

    /// Select a file from disk; name and size come from the filesystem
    pub async fn from_path<P: AsRef<Path>>(path: P) -> UploadResult<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            size: Some(metadata.len()),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Select in-memory content under the given name
    pub fn from_bytes<S: Into<String>, B: Into<Bytes>>(name: S, data: B) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: Some(data.len() as u64),
            source: FileSource::Bytes {
                data,
                content_type: None,
            },
        }
    }

    /// A file reported by a plugin host
    pub fn remote<I: Into<String>, S: Into<String>>(id: I, name: S, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size,
            source: FileSource::Remote { id: id.into() },
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        if let FileSource::Bytes { content_type: ct, .. } = &mut self.source {
            *ct = Some(content_type.into());
        }
        self
    }
}

/// Outcome of one selection batch
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Files appended to the queue, in selection order
    pub accepted: Vec<FileId>,

    /// Files marked invalid; never part of the queue
    pub rejected: Vec<UploadFile>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}
