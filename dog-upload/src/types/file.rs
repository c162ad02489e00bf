use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{TransferFailure, UploadError, UploadResult, ValidationError};
use crate::types::{FileId, FileOptions, FileSource, SelectedFile};

/// File lifecycle.
///
/// `Queued -> Running -> {Complete | Error | Stopped}`; `Stopped` and `Error`
/// return to `Queued` through requeue. `Invalid` is reached only from
/// validation and, like `Complete`, is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Queued,
    Running,
    Complete,
    Error,
    Stopped,
    Invalid,
}

impl FileStatus {
    /// No transition leaves this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Invalid)
    }

    /// Requeue may bring the file back to `Queued`
    pub fn is_revivable(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a transport callback changed the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The callback belongs to a transfer that is no longer current
    Stale,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Lifecycle timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDates {
    pub added: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
}

/// Transfer progress of the current attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub bytes_loaded: u64,
    pub percent_loaded: f64,
    /// Average bytes per second since the attempt started
    pub rate: Option<f64>,
    /// Estimated seconds left, when size and rate are known
    pub time_remaining: Option<f64>,
}

impl Progress {
    fn zero() -> Self {
        Self {
            bytes_loaded: 0,
            percent_loaded: 0.0,
            rate: None,
            time_remaining: None,
        }
    }
}

/// Raw server answer recorded on completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    /// HTTP status, when the transport can observe it
    pub status: Option<u16>,
    pub text: String,
}

impl TransferResponse {
    pub fn new(status: Option<u16>, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }
}

/// One selected file and its upload lifecycle
#[derive(Debug, Clone, Serialize)]
pub struct UploadFile {
    pub(crate) id: FileId,
    pub(crate) name: String,
    pub(crate) extension: String,
    pub(crate) size: Option<u64>,
    pub(crate) status: FileStatus,
    pub(crate) validation_error: Option<ValidationError>,
    pub(crate) failure: Option<TransferFailure>,
    pub(crate) dates: FileDates,
    pub(crate) progress: Option<Progress>,
    pub(crate) response: Option<TransferResponse>,
    pub(crate) options: FileOptions,
    pub(crate) attempt: u64,
    #[serde(skip)]
    pub(crate) source: FileSource,
}

impl UploadFile {
    /// Create a queued file from a selection tuple
    pub fn new(selected: SelectedFile) -> Self {
        let extension = extension_of(&selected.name);
        Self {
            id: FileId::next(),
            name: selected.name,
            extension,
            size: selected.size,
            status: FileStatus::Queued,
            validation_error: None,
            failure: None,
            dates: FileDates {
                added: Utc::now(),
                started: None,
                completed: None,
            },
            progress: None,
            response: None,
            options: FileOptions::default(),
            attempt: 0,
            source: selected.source,
        }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn validation_error(&self) -> Option<ValidationError> {
        self.validation_error
    }

    pub fn failure(&self) -> Option<&TransferFailure> {
        self.failure.as_ref()
    }

    pub fn dates(&self) -> &FileDates {
        &self.dates
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    pub fn response(&self) -> Option<&TransferResponse> {
        self.response.as_ref()
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Number of times this file has been admitted
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn is_running(&self) -> bool {
        self.status == FileStatus::Running
    }

    /// Bytes of this file already on the server side
    pub fn bytes_loaded(&self) -> u64 {
        match self.status {
            FileStatus::Complete => self
                .size
                .or_else(|| self.progress.as_ref().map(|p| p.bytes_loaded))
                .unwrap_or(0),
            FileStatus::Running => self.progress.as_ref().map(|p| p.bytes_loaded).unwrap_or(0),
            _ => 0,
        }
    }

    pub(crate) fn set_options(&mut self, options: FileOptions) {
        self.options = options;
    }

    /// Validation rejected the file before it entered the queue
    pub(crate) fn invalidate(&mut self, reason: ValidationError) -> UploadResult<()> {
        if self.status != FileStatus::Queued || self.attempt > 0 {
            return Err(self.transition_error("invalidate"));
        }
        self.status = FileStatus::Invalid;
        self.validation_error = Some(reason);
        Ok(())
    }

    /// `Queued -> Running`; returns the new attempt number
    pub(crate) fn begin(&mut self) -> UploadResult<u64> {
        if self.status != FileStatus::Queued {
            return Err(self.transition_error("start"));
        }
        self.status = FileStatus::Running;
        self.attempt += 1;
        self.dates.started = Some(Utc::now());
        self.dates.completed = None;
        self.progress = Some(Progress::zero());
        self.response = None;
        self.failure = None;
        Ok(self.attempt)
    }

    /// Success callback, honored only for the current running attempt
    pub(crate) fn complete(&mut self, attempt: u64, response: TransferResponse) -> TransitionOutcome {
        if !self.accepts(attempt) {
            return TransitionOutcome::Stale;
        }
        self.status = FileStatus::Complete;
        self.dates.completed = Some(Utc::now());
        self.response = Some(response);
        if let (Some(size), Some(progress)) = (self.size, self.progress.as_mut()) {
            progress.bytes_loaded = progress.bytes_loaded.max(size);
            progress.percent_loaded = 100.0;
            progress.time_remaining = Some(0.0);
        }
        TransitionOutcome::Applied
    }

    /// Failure callback, honored only for the current running attempt
    pub(crate) fn fail(&mut self, attempt: u64, failure: TransferFailure) -> TransitionOutcome {
        if !self.accepts(attempt) {
            return TransitionOutcome::Stale;
        }
        self.status = FileStatus::Error;
        self.failure = Some(failure);
        TransitionOutcome::Applied
    }

    /// Progress callback. `bytes_total` is used only when the file size is unknown.
    pub(crate) fn record_progress(
        &mut self,
        attempt: u64,
        bytes_loaded: u64,
        bytes_total: Option<u64>,
    ) -> TransitionOutcome {
        if !self.accepts(attempt) {
            return TransitionOutcome::Stale;
        }
        let total = self.size.or(bytes_total);
        let elapsed = self
            .dates
            .started
            .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let progress = self.progress.get_or_insert_with(Progress::zero);
        progress.bytes_loaded = progress.bytes_loaded.max(bytes_loaded);
        progress.percent_loaded = match total {
            Some(0) => 100.0,
            Some(total) => (progress.bytes_loaded as f64 / total as f64 * 100.0).min(100.0),
            None => 0.0,
        };
        if elapsed > 0.0 {
            let rate = progress.bytes_loaded as f64 / elapsed;
            progress.rate = Some(rate);
            progress.time_remaining = match total {
                Some(total) if rate > 0.0 => {
                    Some(total.saturating_sub(progress.bytes_loaded) as f64 / rate)
                }
                _ => None,
            };
        }
        TransitionOutcome::Applied
    }

    /// `Running -> Stopped`; `false` when the file was not running
    pub(crate) fn halt(&mut self) -> bool {
        if self.status != FileStatus::Running {
            return false;
        }
        self.status = FileStatus::Stopped;
        true
    }

    /// `Stopped | Error -> Queued`; `Ok(false)` when already queued
    pub(crate) fn requeue(&mut self) -> UploadResult<bool> {
        match self.status {
            FileStatus::Queued => Ok(false),
            FileStatus::Stopped | FileStatus::Error => {
                self.status = FileStatus::Queued;
                self.failure = None;
                self.progress = None;
                Ok(true)
            }
            _ => Err(self.transition_error("requeue")),
        }
    }

    fn accepts(&self, attempt: u64) -> bool {
        self.status == FileStatus::Running && self.attempt == attempt
    }

    fn transition_error(&self, operation: &'static str) -> UploadError {
        UploadError::InvalidTransition {
            id: self.id,
            from: self.status,
            operation,
        }
    }
}

/// Lower-cased suffix after the last dot; empty when the name has none
fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> UploadFile {
        UploadFile::new(SelectedFile::from_bytes(name, vec![0u8; size as usize]))
    }

    #[test]
    fn new_file_is_queued_with_lowercase_extension() {
        let f = file("Holiday.JPG", 3);
        assert_eq!(f.status(), FileStatus::Queued);
        assert_eq!(f.extension(), "jpg");
        assert_eq!(f.size(), Some(3));
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of("archive.tar.GZ"), "gz");
    }

    #[test]
    fn begin_only_from_queued() {
        let mut f = file("a.txt", 1);
        assert_eq!(f.begin().unwrap(), 1);
        assert!(f.is_running());
        assert!(f.dates().started.is_some());
        assert!(matches!(f.begin(), Err(UploadError::InvalidTransition { .. })));
    }

    #[test]
    fn stale_completion_is_ignored_after_halt() {
        let mut f = file("a.txt", 1);
        let attempt = f.begin().unwrap();
        assert!(f.halt());

        let outcome = f.complete(attempt, TransferResponse::new(Some(200), "ok"));
        assert_eq!(outcome, TransitionOutcome::Stale);
        assert_eq!(f.status(), FileStatus::Stopped);
        assert!(f.response().is_none());
    }

    #[test]
    fn callbacks_from_an_older_attempt_are_stale() {
        let mut f = file("a.txt", 1);
        let first = f.begin().unwrap();
        f.halt();
        f.requeue().unwrap();
        let second = f.begin().unwrap();
        assert_ne!(first, second);

        assert_eq!(
            f.fail(first, TransferFailure::network("late")),
            TransitionOutcome::Stale
        );
        assert!(f.is_running());
        assert_eq!(
            f.complete(second, TransferResponse::new(Some(201), "")),
            TransitionOutcome::Applied
        );
        assert_eq!(f.status(), FileStatus::Complete);
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let mut f = file("a.bin", 100);
        let attempt = f.begin().unwrap();
        f.record_progress(attempt, 60, None);
        f.record_progress(attempt, 40, None);
        assert_eq!(f.progress().unwrap().bytes_loaded, 60);
        f.record_progress(attempt, 250, None);
        assert_eq!(f.progress().unwrap().percent_loaded, 100.0);
    }

    #[test]
    fn unknown_size_uses_reported_total() {
        let mut f = UploadFile::new(SelectedFile::remote("r1", "x.bin", None));
        let attempt = f.begin().unwrap();
        f.record_progress(attempt, 25, Some(50));
        assert_eq!(f.progress().unwrap().percent_loaded, 50.0);
    }

    #[test]
    fn requeue_revives_only_stopped_or_error() {
        let mut f = file("a.txt", 1);
        assert!(!f.requeue().unwrap());

        let attempt = f.begin().unwrap();
        assert!(f.requeue().is_err());
        f.fail(attempt, TransferFailure::Timeout);
        assert_eq!(f.failure(), Some(&TransferFailure::Timeout));
        assert!(f.requeue().unwrap());
        assert_eq!(f.status(), FileStatus::Queued);
        assert!(f.failure().is_none());

        let attempt = f.begin().unwrap();
        f.complete(attempt, TransferResponse::new(None, ""));
        assert!(f.requeue().is_err());
    }

    #[test]
    fn invalidate_sets_reason_and_is_terminal() {
        let mut f = file("a.txt", 1);
        f.invalidate(ValidationError::Duplicate).unwrap();
        assert_eq!(f.status(), FileStatus::Invalid);
        assert_eq!(f.validation_error(), Some(ValidationError::Duplicate));
        assert!(f.status().is_terminal());
        assert!(f.begin().is_err());
        assert!(f.requeue().is_err());
    }
}
