//! Transports move one file's bytes to the server.
//!
//! The uploader drives every transport through the same contract: build a
//! [`WireRequest`] from the merged options, `send` it, and receive exactly one
//! success or failure (optionally preceded by progress) through the
//! [`TransferSink`]. Transports never touch the queue directly.

pub mod body;
pub mod frame;
pub mod memory;
pub mod plugin;
pub mod request;
pub mod select;

use async_trait::async_trait;
use reqwest::Url;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::codec::query;
use crate::error::{TransferFailure, UploadError, UploadResult};
use crate::merge::EffectiveRequest;
use crate::types::{
    FileId, FileSource, HttpMethod, TransferResponse, TransportCapabilities, TransportKind, UploadFile,
};

pub use frame::FrameTransport;
pub use memory::{MemoryTransport, RecordedRequest};
pub use plugin::{ChannelPluginHost, PluginEndpoint, PluginEvent, PluginHost, PluginTransport, RemoteCall};
pub use request::RequestTransport;
pub use select::AdapterSelector;

/// Fallback MIME type when nothing better is known
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A way of moving file bytes to a server
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn kind(&self) -> TransportKind;

    fn capabilities(&self) -> TransportCapabilities;

    /// Turn the merged options into what goes on the wire
    fn build_request(&self, request: &EffectiveRequest, file: &UploadFile) -> UploadResult<WireRequest>;

    /// Start the transfer. Returns once it is under way; the outcome arrives
    /// through `sink`.
    async fn send(&self, request: WireRequest, sink: TransferSink) -> UploadResult<TransferHandle>;

    /// Best-effort teardown of an in-flight transfer
    async fn cancel(&self, handle: TransferHandle);

    /// Selection was enabled or disabled on the queue
    async fn set_enabled(&self, _enabled: bool) -> UploadResult<()> {
        Ok(())
    }

    /// The file left the queue for good
    async fn release(&self, _file: &UploadFile) {}
}

/// Identifies one transfer attempt of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferTicket {
    pub file_id: FileId,
    pub attempt: u64,
}

impl TransferTicket {
    pub fn new(file_id: FileId, attempt: u64) -> Self {
        Self { file_id, attempt }
    }

    /// Ticket for the file's current attempt
    pub fn of(file: &UploadFile) -> Self {
        Self::new(file.id(), file.attempt())
    }
}

impl fmt::Display for TransferTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file_id, self.attempt)
    }
}

/// The file section of a wire request
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    pub size: Option<u64>,
    pub content_type: String,
    pub source: FileSource,
}

impl FilePayload {
    pub fn of(file: &UploadFile) -> Self {
        let content_type = match file.source() {
            FileSource::Bytes {
                content_type: Some(ct), ..
            } => ct.clone(),
            _ => mime_guess::from_path(file.name())
                .first_raw()
                .unwrap_or(OCTET_STREAM)
                .to_string(),
        };
        Self {
            name: file.name().to_string(),
            size: file.size(),
            content_type,
            source: file.source().clone(),
        }
    }
}

/// Everything a transport needs to perform one attempt
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub ticket: TransferTicket,
    pub method: HttpMethod,
    /// Target, with auxiliary data already in the query for GET
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub field_name: String,
    /// Auxiliary data sent as form fields (POST only)
    pub fields: Vec<(String, String)>,
    pub file: FilePayload,
}

impl WireRequest {
    /// Lay out a form submission: POST data becomes form fields, GET data
    /// is appended to the query.
    pub fn form(request: &EffectiveRequest, file: &UploadFile) -> Self {
        let mut url = request.url.clone();
        let fields = match request.method {
            HttpMethod::Get => {
                query::append_query(&mut url, &request.query_string());
                Vec::new()
            }
            HttpMethod::Post => request.form_fields(),
        };

        Self {
            ticket: TransferTicket::of(file),
            method: request.method,
            url,
            headers: request.headers.clone(),
            field_name: request.field_name.clone(),
            fields,
            file: FilePayload::of(file),
        }
    }
}

/// Reject sources the transport cannot read
pub(crate) fn require_local(kind: TransportKind, file: &UploadFile) -> UploadResult<()> {
    if file.source().is_local() {
        Ok(())
    } else {
        Err(UploadError::UnsupportedSource {
            transport: kind,
            reason: format!("{} is held by a plugin host", file.name()),
        })
    }
}

#[derive(Debug)]
enum HandleKind {
    Task(AbortHandle),
    Remote(String),
    Manual,
}

/// Cancellation handle for an in-flight transfer
#[derive(Debug)]
pub struct TransferHandle {
    ticket: TransferTicket,
    kind: HandleKind,
}

impl TransferHandle {
    /// Transfer running as a local task
    pub fn task(ticket: TransferTicket, abort: AbortHandle) -> Self {
        Self {
            ticket,
            kind: HandleKind::Task(abort),
        }
    }

    /// Transfer running inside a plugin host
    pub fn remote<S: Into<String>>(ticket: TransferTicket, id: S) -> Self {
        Self {
            ticket,
            kind: HandleKind::Remote(id.into()),
        }
    }

    /// Transfer driven by hand
    pub fn manual(ticket: TransferTicket) -> Self {
        Self {
            ticket,
            kind: HandleKind::Manual,
        }
    }

    pub fn ticket(&self) -> TransferTicket {
        self.ticket
    }

    pub fn remote_id(&self) -> Option<&str> {
        match &self.kind {
            HandleKind::Remote(id) => Some(id),
            _ => None,
        }
    }

    /// Abort the local task, if there is one
    pub fn abort(&self) {
        if let HandleKind::Task(abort) = &self.kind {
            abort.abort();
        }
    }
}

/// What happened to a transfer
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEventKind {
    Progress {
        bytes_loaded: u64,
        bytes_total: Option<u64>,
    },
    Success(TransferResponse),
    Failure(TransferFailure),
}

/// A transport callback addressed to one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub ticket: TransferTicket,
    pub kind: TransferEventKind,
}

impl TransferEvent {
    pub fn progress(ticket: TransferTicket, bytes_loaded: u64, bytes_total: Option<u64>) -> Self {
        Self {
            ticket,
            kind: TransferEventKind::Progress {
                bytes_loaded,
                bytes_total,
            },
        }
    }

    pub fn success(ticket: TransferTicket, response: TransferResponse) -> Self {
        Self {
            ticket,
            kind: TransferEventKind::Success(response),
        }
    }

    pub fn failure(ticket: TransferTicket, failure: TransferFailure) -> Self {
        Self {
            ticket,
            kind: TransferEventKind::Failure(failure),
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self.kind, TransferEventKind::Progress { .. })
    }
}

/// Where transports report progress and outcomes
#[derive(Debug, Clone)]
pub struct TransferSink {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferSink {
    pub fn new(tx: mpsc::UnboundedSender<TransferEvent>) -> Self {
        Self { tx }
    }

    /// A sink together with the receiving end of its inbox
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Deliver an event; `false` once the uploader is gone
    pub fn emit(&self, event: TransferEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn progress(&self, ticket: TransferTicket, bytes_loaded: u64, bytes_total: Option<u64>) -> bool {
        self.emit(TransferEvent::progress(ticket, bytes_loaded, bytes_total))
    }

    pub fn succeed(&self, ticket: TransferTicket, response: TransferResponse) -> bool {
        self.emit(TransferEvent::success(ticket, response))
    }

    pub fn fail(&self, ticket: TransferTicket, failure: TransferFailure) -> bool {
        self.emit(TransferEvent::failure(ticket, failure))
    }
}
