//! In-process transport driven by hand.
//!
//! Every request is recorded; callers decide when (and whether) progress,
//! success or failure is delivered, in any order. Used by the conformance
//! suites and handy for wiring an uploader before a server exists.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{TransferHandle, TransferSink, TransferTicket, Transport, WireRequest};
use crate::error::{TransferFailure, UploadResult};
use crate::merge::EffectiveRequest;
use crate::types::{FileId, TransferResponse, TransportCapabilities, TransportKind, UploadFile};

/// A request the memory transport was asked to send
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: WireRequest,
    sink: TransferSink,
}

impl RecordedRequest {
    pub fn ticket(&self) -> TransferTicket {
        self.request.ticket
    }

    pub fn progress(&self, bytes_loaded: u64) -> bool {
        self.sink.progress(self.ticket(), bytes_loaded, self.request.file.size)
    }

    pub fn succeed<S: Into<String>>(&self, status: u16, text: S) -> bool {
        self.sink
            .succeed(self.ticket(), TransferResponse::new(Some(status), text))
    }

    pub fn fail(&self, failure: TransferFailure) -> bool {
        self.sink.fail(self.ticket(), failure)
    }
}

#[derive(Debug, Default)]
struct Journal {
    requests: Vec<RecordedRequest>,
    cancelled: Vec<TransferTicket>,
    released: Vec<FileId>,
    enabled: Vec<bool>,
}

#[derive(Debug)]
pub struct MemoryTransport {
    kind: TransportKind,
    capabilities: TransportCapabilities,
    auto_complete: bool,
    journal: Mutex<Journal>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            kind: TransportKind::Request,
            capabilities: TransportCapabilities {
                progress: true,
                multiple: true,
                remote_selection: false,
            },
            auto_complete: false,
            journal: Mutex::new(Journal::default()),
        }
    }

    /// Report itself as `kind`
    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_capabilities(mut self, capabilities: TransportCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Answer every request with `200 ok` as soon as it is sent
    pub fn auto_complete(mut self) -> Self {
        self.auto_complete = true;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.journal.lock().requests.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.journal.lock().requests.len()
    }

    /// Latest request sent for `file_id`
    pub fn request_for(&self, file_id: FileId) -> Option<RecordedRequest> {
        self.journal
            .lock()
            .requests
            .iter()
            .rev()
            .find(|recorded| recorded.ticket().file_id == file_id)
            .cloned()
    }

    pub fn cancelled(&self) -> Vec<TransferTicket> {
        self.journal.lock().cancelled.clone()
    }

    pub fn released(&self) -> Vec<FileId> {
        self.journal.lock().released.clone()
    }

    pub fn enabled_calls(&self) -> Vec<bool> {
        self.journal.lock().enabled.clone()
    }

    /// Report progress on the latest attempt of `file_id`
    pub fn progress(&self, file_id: FileId, bytes_loaded: u64) -> bool {
        self.request_for(file_id)
            .map(|recorded| recorded.progress(bytes_loaded))
            .unwrap_or(false)
    }

    /// Complete the latest attempt of `file_id`
    pub fn complete(&self, file_id: FileId, status: u16, text: &str) -> bool {
        self.request_for(file_id)
            .map(|recorded| recorded.succeed(status, text))
            .unwrap_or(false)
    }

    /// Fail the latest attempt of `file_id`
    pub fn fail(&self, file_id: FileId, failure: TransferFailure) -> bool {
        self.request_for(file_id)
            .map(|recorded| recorded.fail(failure))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities.clone()
    }

    fn build_request(&self, request: &EffectiveRequest, file: &UploadFile) -> UploadResult<WireRequest> {
        Ok(WireRequest::form(request, file))
    }

    async fn send(&self, request: WireRequest, sink: TransferSink) -> UploadResult<TransferHandle> {
        let ticket = request.ticket;
        let recorded = RecordedRequest { request, sink };
        if self.auto_complete {
            recorded.succeed(200, "ok");
        }
        self.journal.lock().requests.push(recorded);
        Ok(TransferHandle::manual(ticket))
    }

    async fn cancel(&self, handle: TransferHandle) {
        self.journal.lock().cancelled.push(handle.ticket());
    }

    async fn set_enabled(&self, enabled: bool) -> UploadResult<()> {
        self.journal.lock().enabled.push(enabled);
        Ok(())
    }

    async fn release(&self, file: &UploadFile) {
        self.journal.lock().released.push(file.id());
    }
}
