//! Bridge to a plugin-hosted upload agent.
//!
//! The plugin owns the selected files and performs the transfers itself;
//! every operation here is a [`RemoteCall`] keyed by the plugin's file id,
//! and the plugin answers with [`PluginEvent`]s that are routed back to the
//! attempt that started the transfer.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{TransferHandle, TransferSink, TransferTicket, Transport, WireRequest};
use crate::error::{TransferFailure, UploadError, UploadResult};
use crate::merge::EffectiveRequest;
use crate::types::{HttpMethod, TransferResponse, TransportCapabilities, TransportKind, UploadFile};

/// Request settings handed to the plugin when a file starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginOptions {
    pub url: String,
    pub method: HttpMethod,
    pub field_name: String,
    pub fields: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
}

/// Calls into the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "camelCase")]
pub enum RemoteCall {
    /// `attempt` is echoed back on every event of this transfer
    FileStart {
        id: String,
        attempt: u64,
        options: PluginOptions,
    },
    FileStop { id: String },
    FileRemove { id: String },
    SetEnabled { enabled: bool },
}

/// Callbacks out of the plugin, keyed by the plugin's file id and the
/// attempt its `FileStart` carried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PluginEvent {
    Progress {
        id: String,
        attempt: u64,
        bytes_loaded: u64,
        bytes_total: Option<u64>,
    },
    Complete {
        id: String,
        attempt: u64,
        status: Option<u16>,
        text: String,
    },
    Error {
        id: String,
        attempt: u64,
        message: String,
    },
}

impl PluginEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Progress { id, .. } | Self::Complete { id, .. } | Self::Error { id, .. } => id,
        }
    }

    pub fn attempt(&self) -> u64 {
        match self {
            Self::Progress { attempt, .. } | Self::Complete { attempt, .. } | Self::Error { attempt, .. } => *attempt,
        }
    }

    fn is_final(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// A running plugin instance
#[async_trait]
pub trait PluginHost: Send + Sync + fmt::Debug {
    /// Installed plugin version
    fn version(&self) -> u32;

    async fn call(&self, call: RemoteCall) -> UploadResult<()>;

    /// Hand over the plugin's event stream. Yields it once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PluginEvent>>;
}

/// Plugin host backed by in-process channels.
///
/// The returned [`PluginEndpoint`] plays the plugin: it receives the calls
/// and emits the events.
#[derive(Debug)]
pub struct ChannelPluginHost {
    version: u32,
    calls: mpsc::UnboundedSender<RemoteCall>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PluginEvent>>>,
}

impl ChannelPluginHost {
    pub fn new(version: u32) -> (Self, PluginEndpoint) {
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let host = Self {
            version,
            calls: call_tx,
            events: Mutex::new(Some(event_rx)),
        };
        let endpoint = PluginEndpoint {
            calls: call_rx,
            events: event_tx,
        };
        (host, endpoint)
    }
}

#[async_trait]
impl PluginHost for ChannelPluginHost {
    fn version(&self) -> u32 {
        self.version
    }

    async fn call(&self, call: RemoteCall) -> UploadResult<()> {
        self.calls
            .send(call)
            .map_err(|_| UploadError::plugin("plugin endpoint is gone"))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PluginEvent>> {
        self.events.lock().take()
    }
}

/// The plugin side of a [`ChannelPluginHost`]
#[derive(Debug)]
pub struct PluginEndpoint {
    calls: mpsc::UnboundedReceiver<RemoteCall>,
    events: mpsc::UnboundedSender<PluginEvent>,
}

impl PluginEndpoint {
    pub async fn next_call(&mut self) -> Option<RemoteCall> {
        self.calls.recv().await
    }

    pub fn try_next_call(&mut self) -> Option<RemoteCall> {
        self.calls.try_recv().ok()
    }

    pub fn emit(&self, event: PluginEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn progress<S: Into<String>>(
        &self,
        id: S,
        attempt: u64,
        bytes_loaded: u64,
        bytes_total: Option<u64>,
    ) -> bool {
        self.emit(PluginEvent::Progress {
            id: id.into(),
            attempt,
            bytes_loaded,
            bytes_total,
        })
    }

    pub fn complete<S: Into<String>, T: Into<String>>(
        &self,
        id: S,
        attempt: u64,
        status: Option<u16>,
        text: T,
    ) -> bool {
        self.emit(PluginEvent::Complete {
            id: id.into(),
            attempt,
            status,
            text: text.into(),
        })
    }

    pub fn error<S: Into<String>, M: Into<String>>(&self, id: S, attempt: u64, message: M) -> bool {
        self.emit(PluginEvent::Error {
            id: id.into(),
            attempt,
            message: message.into(),
        })
    }
}

#[derive(Debug)]
struct Route {
    ticket: TransferTicket,
    sink: TransferSink,
}

type Routes = Arc<Mutex<HashMap<String, Route>>>;

/// Transport whose transfers run inside a plugin host
#[derive(Debug)]
pub struct PluginTransport {
    host: Arc<dyn PluginHost>,
    routes: Routes,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl PluginTransport {
    pub fn new(host: Arc<dyn PluginHost>) -> Self {
        Self {
            host,
            routes: Arc::new(Mutex::new(HashMap::new())),
            router: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Arc<dyn PluginHost> {
        &self.host
    }

    /// Number of plugin transfers currently routed
    pub fn in_flight(&self) -> usize {
        self.routes.lock().len()
    }

    /// Start routing plugin events, once
    fn ensure_router(&self) {
        let mut router = self.router.lock();
        if router.is_some() {
            return;
        }
        let Some(mut events) = self.host.take_events() else {
            return;
        };
        let routes = self.routes.clone();
        *router = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                route_event(&routes, event);
            }
            debug!("plugin event stream closed");
        }));
    }
}

impl Drop for PluginTransport {
    fn drop(&mut self) {
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
    }
}

/// Forward one plugin event under the attempt it echoes. Events from a
/// superseded attempt keep the current route and are dropped by the file's
/// guard.
fn route_event(routes: &Mutex<HashMap<String, Route>>, event: PluginEvent) {
    let (ticket, sink) = {
        let mut routes = routes.lock();
        let Some(route) = routes.get(event.id()) else {
            debug!(plugin_id = %event.id(), attempt = event.attempt(), "event for unknown plugin file");
            return;
        };
        let current = route.ticket;
        let sink = route.sink.clone();
        let ticket = TransferTicket::new(current.file_id, event.attempt());
        if ticket != current {
            debug!(plugin_id = %event.id(), %ticket, %current, "event for a superseded plugin attempt");
        } else if event.is_final() {
            routes.remove(event.id());
        }
        (ticket, sink)
    };

    match event {
        PluginEvent::Progress {
            bytes_loaded,
            bytes_total,
            ..
        } => sink.progress(ticket, bytes_loaded, bytes_total),
        PluginEvent::Complete { status, text, .. } => sink.succeed(ticket, TransferResponse::new(status, text)),
        PluginEvent::Error { message, .. } => sink.fail(ticket, TransferFailure::plugin(message)),
    };
}

fn remote_id(kind: TransportKind, file: &UploadFile) -> UploadResult<String> {
    file.source()
        .remote_id()
        .map(str::to_string)
        .ok_or_else(|| UploadError::UnsupportedSource {
            transport: kind,
            reason: format!("{} was not selected through the plugin", file.name()),
        })
}

#[async_trait]
impl Transport for PluginTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Plugin
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            progress: true,
            multiple: true,
            remote_selection: true,
        }
    }

    fn build_request(&self, request: &EffectiveRequest, file: &UploadFile) -> UploadResult<WireRequest> {
        remote_id(self.kind(), file)?;
        Ok(WireRequest::form(request, file))
    }

    #[instrument(skip(self, request, sink), fields(ticket = %request.ticket))]
    async fn send(&self, request: WireRequest, sink: TransferSink) -> UploadResult<TransferHandle> {
        let id = request
            .file
            .source
            .remote_id()
            .map(str::to_string)
            .ok_or_else(|| UploadError::plugin("file has no plugin id"))?;
        self.ensure_router();

        let ticket = request.ticket;
        self.routes
            .lock()
            .insert(id.clone(), Route { ticket, sink });

        let options = PluginOptions {
            url: request.url.to_string(),
            method: request.method,
            field_name: request.field_name,
            fields: request.fields,
            headers: request.headers,
        };
        let start = RemoteCall::FileStart {
            id: id.clone(),
            attempt: ticket.attempt,
            options,
        };
        if let Err(err) = self.host.call(start).await {
            self.routes.lock().remove(&id);
            return Err(err);
        }

        Ok(TransferHandle::remote(ticket, id))
    }

    async fn cancel(&self, handle: TransferHandle) {
        let Some(id) = handle.remote_id() else {
            return;
        };
        {
            let mut routes = self.routes.lock();
            if routes.get(id).map(|route| route.ticket) == Some(handle.ticket()) {
                routes.remove(id);
            }
        }
        if let Err(err) = self.host.call(RemoteCall::FileStop { id: id.to_string() }).await {
            warn!(plugin_id = %id, error = %err, "plugin stop failed");
        }
    }

    async fn set_enabled(&self, enabled: bool) -> UploadResult<()> {
        self.host.call(RemoteCall::SetEnabled { enabled }).await
    }

    async fn release(&self, file: &UploadFile) {
        let Some(id) = file.source().remote_id() else {
            return;
        };
        self.routes.lock().remove(id);
        if let Err(err) = self.host.call(RemoteCall::FileRemove { id: id.to_string() }).await {
            warn!(plugin_id = %id, error = %err, "plugin remove failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransferEvent, TransferEventKind};
    use crate::types::FileId;

    fn routes_with(id: &str, ticket: TransferTicket) -> (Routes, mpsc::UnboundedReceiver<TransferEvent>) {
        let (sink, rx) = TransferSink::channel();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        routes.lock().insert(id.to_string(), Route { ticket, sink });
        (routes, rx)
    }

    #[test]
    fn events_reach_the_owning_attempt() {
        let ticket = TransferTicket::new(FileId(4), 2);
        let (routes, mut rx) = routes_with("swf-1", ticket);

        route_event(
            &routes,
            PluginEvent::Progress {
                id: "swf-1".into(),
                attempt: 2,
                bytes_loaded: 10,
                bytes_total: Some(20),
            },
        );
        route_event(
            &routes,
            PluginEvent::Complete {
                id: "swf-1".into(),
                attempt: 2,
                status: Some(200),
                text: "ok".into(),
            },
        );

        let progress = rx.try_recv().unwrap();
        assert_eq!(progress.ticket, ticket);
        let done = rx.try_recv().unwrap();
        assert_eq!(
            done.kind,
            TransferEventKind::Success(TransferResponse::new(Some(200), "ok"))
        );
        assert!(routes.lock().is_empty());
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let ticket = TransferTicket::new(FileId(5), 1);
        let (routes, mut rx) = routes_with("swf-1", ticket);

        route_event(
            &routes,
            PluginEvent::Error {
                id: "swf-9".into(),
                attempt: 1,
                message: "boom".into(),
            },
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(routes.lock().len(), 1);
    }

    #[test]
    fn superseded_attempts_keep_the_current_route() {
        let current = TransferTicket::new(FileId(6), 2);
        let (routes, mut rx) = routes_with("swf-1", current);

        route_event(
            &routes,
            PluginEvent::Complete {
                id: "swf-1".into(),
                attempt: 1,
                status: Some(200),
                text: "late".into(),
            },
        );

        let late = rx.try_recv().unwrap();
        assert_eq!(late.ticket, TransferTicket::new(FileId(6), 1));
        assert_eq!(routes.lock().get("swf-1").map(|route| route.ticket), Some(current));
    }

    #[test]
    fn events_deserialize_with_attempt() {
        let event: PluginEvent = serde_json::from_value(serde_json::json!({
            "event": "error",
            "id": "swf-1",
            "attempt": 3,
            "message": "io"
        }))
        .unwrap();
        assert_eq!(event.id(), "swf-1");
        assert_eq!(event.attempt(), 3);
    }

    #[test]
    fn calls_serialize_with_tag() {
        let call = RemoteCall::FileStop { id: "swf-1".into() };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["call"], "fileStop");
        assert_eq!(json["id"], "swf-1");
    }
}
