//! The upload queue controller.
//!
//! `Uploader` owns the file list and is mutated only through `&mut self`.
//! Transfers run as tasks inside the transport and report back through the
//! uploader's inbox; every callback is applied through the file's guard, so
//! late or duplicate callbacks from stopped, removed or superseded attempts
//! are discarded instead of corrupting the counters.

use chrono::Utc;
use futures_core::Stream;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::config::UploaderConfig;
use crate::error::{TransferFailure, UploadError, UploadResult, ValidationError};
use crate::merge::{merge_options, MergeContext};
use crate::observability::LiveMetrics;
use crate::transport::{
    AdapterSelector, FrameTransport, PluginHost, PluginTransport, RequestTransport, TransferEvent,
    TransferEventKind, TransferHandle, TransferSink, Transport,
};
use crate::types::{
    FileId, FileOptions, FileStatus, HostProbe, RequestOptions, SelectedFile, Selection, TransferResponse,
    TransitionOutcome, TransportKind, UploadEvent, UploadFile,
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

const EVENT_CAPACITY: usize = 1000;

/// Result of asking for one file to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// The file is not `Queued`
    NotQueued,
    /// The concurrency bound is saturated
    AtCapacity,
}

/// Aggregate view of the queue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub files: usize,
    pub queued: usize,
    pub running: usize,
    pub complete: usize,
    pub error: usize,
    pub stopped: usize,
    pub size: u64,
    pub bytes_loaded: u64,
    pub percent_loaded: f64,
}

/// Builds an [`Uploader`], choosing its transport
pub struct UploaderBuilder<'a> {
    config: UploaderConfig,
    host: HostProbe,
    selector: Option<&'a AdapterSelector>,
    transport: Option<Arc<dyn Transport>>,
    plugin_host: Option<Arc<dyn PluginHost>>,
    client: Option<Client>,
}

impl<'a> UploaderBuilder<'a> {
    pub fn new(config: UploaderConfig) -> Self {
        Self {
            config,
            host: HostProbe::native(),
            selector: None,
            transport: None,
            plugin_host: None,
            client: None,
        }
    }

    /// Describe the host instead of assuming a native runtime
    pub fn with_host_probe(mut self, host: HostProbe) -> Self {
        self.host = host;
        self
    }

    /// Select through this selector instead of the process-wide one
    pub fn with_selector(mut self, selector: &'a AdapterSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Use this transport as is, skipping selection
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attach a running plugin; its version overrides the probe's at build time
    pub fn with_plugin_host(mut self, host: Arc<dyn PluginHost>) -> Self {
        self.plugin_host = Some(host);
        self
    }

    /// HTTP client shared by the request and frame transports
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(mut self) -> UploadResult<Uploader> {
        if let Some(plugin) = &self.plugin_host {
            self.host.plugin_version = Some(plugin.version());
        }
        let transport = match self.transport.clone() {
            Some(transport) => transport,
            None => {
                let kind = match self.config.transport {
                    Some(kind) => kind,
                    None => self.selector.unwrap_or(AdapterSelector::global()).select(
                        &self.config.transport_priority,
                        &self.host,
                        self.config.plugin_min_version,
                    )?,
                };
                self.instantiate(kind)?
            }
        };
        Uploader::with_transport(self.config, transport)
    }

    fn instantiate(&self, kind: TransportKind) -> UploadResult<Arc<dyn Transport>> {
        let time_limit = self.config.time_limit();
        Ok(match kind {
            TransportKind::Request => Arc::new(
                RequestTransport::new(self.client()?)
                    .with_native_multipart(self.host.native_multipart)
                    .with_time_limit(time_limit),
            ),
            TransportKind::Frame => Arc::new(FrameTransport::new(self.client()?).with_time_limit(time_limit)),
            TransportKind::Plugin => {
                let host = self
                    .plugin_host
                    .clone()
                    .ok_or_else(|| UploadError::plugin("no plugin host attached"))?;
                Arc::new(PluginTransport::new(host))
            }
        })
    }

    fn client(&self) -> UploadResult<Client> {
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => Client::builder()
                .build()
                .map_err(|e| UploadError::transport(format!("cannot build HTTP client: {}", e))),
        }
    }
}

/// Transport-agnostic upload queue
pub struct Uploader {
    config: UploaderConfig,
    merge_ctx: MergeContext,
    transport: Arc<dyn Transport>,
    files: Vec<UploadFile>,
    handles: HashMap<FileId, TransferHandle>,
    uploading: usize,
    size: u64,
    enabled: bool,
    // Queue-wide stop/remove in progress; re-admission is held back
    sweeping: bool,
    sink: TransferSink,
    inbox: mpsc::UnboundedReceiver<TransferEvent>,
    events: broadcast::Sender<UploadEvent>,
    metrics: Arc<LiveMetrics>,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("transport", &self.transport.kind())
            .field("files", &self.files.len())
            .field("uploading", &self.uploading)
            .field("size", &self.size)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Uploader {
    /// Build with the process-wide selector and a native host
    pub fn new(config: UploaderConfig) -> UploadResult<Self> {
        UploaderBuilder::new(config).build()
    }

    pub fn builder<'a>(config: UploaderConfig) -> UploaderBuilder<'a> {
        UploaderBuilder::new(config)
    }

    /// Build around an existing transport
    pub fn with_transport(config: UploaderConfig, transport: Arc<dyn Transport>) -> UploadResult<Self> {
        let merge_ctx = MergeContext::new(config.base_url.as_deref())?;
        let (sink, inbox) = TransferSink::channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(transport = %transport.kind(), concurrency = ?config.concurrency, "uploader ready");
        Ok(Self {
            config,
            merge_ctx,
            transport,
            files: Vec::new(),
            handles: HashMap::new(),
            uploading: 0,
            size: 0,
            enabled: true,
            sweeping: false,
            sink,
            inbox,
            events,
            metrics: Arc::new(LiveMetrics::new()),
        })
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Replace the queue-level request defaults; queued files pick them up
    /// at admission
    pub fn set_request_defaults(&mut self, defaults: RequestOptions) {
        self.config.request = defaults;
    }

    /// Files in insertion order
    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> Option<&UploadFile> {
        self.files.iter().find(|file| file.id() == id)
    }

    /// Number of `Running` files
    pub fn uploading(&self) -> usize {
        self.uploading
    }

    /// Aggregate size of listed files
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn metrics(&self) -> Arc<LiveMetrics> {
        self.metrics.clone()
    }

    /// Sender side of the inbox, for transports driven from outside
    pub fn sink(&self) -> TransferSink {
        self.sink.clone()
    }

    /// Lifecycle notifications as a stream; lagging subscribers skip ahead
    pub fn subscribe(&self) -> BoxStream<UploadEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    /// Raw receiver for lifecycle notifications
    pub fn event_receiver(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> QueueStats {
        let count = |status: FileStatus| self.files.iter().filter(|f| f.status() == status).count();
        let bytes_loaded: u64 = self.files.iter().map(UploadFile::bytes_loaded).sum();
        let percent_loaded = if self.size > 0 {
            (bytes_loaded as f64 / self.size as f64 * 100.0).min(100.0)
        } else {
            0.0
        };

        QueueStats {
            files: self.files.len(),
            queued: count(FileStatus::Queued),
            running: count(FileStatus::Running),
            complete: count(FileStatus::Complete),
            error: count(FileStatus::Error),
            stopped: count(FileStatus::Stopped),
            size: self.size,
            bytes_loaded,
            percent_loaded,
        }
    }

    /// Validate and append a selection batch
    #[instrument(skip(self, selected), fields(count = selected.len()))]
    pub async fn select(&mut self, mut selected: Vec<SelectedFile>) -> UploadResult<Selection> {
        if !self.enabled {
            return Err(UploadError::SelectionDisabled);
        }

        let capabilities = self.transport.capabilities();
        if let Some(stray) = selected
            .iter()
            .find(|tuple| tuple.source.is_local() == capabilities.remote_selection)
        {
            return Err(UploadError::UnsupportedSource {
                transport: self.transport.kind(),
                reason: format!("{} was not selected through this transport", stray.name),
            });
        }

        let multiple = self.config.multiple && capabilities.multiple;
        if !multiple && selected.len() > 1 {
            debug!(dropped = selected.len() - 1, "single selection only; extra files ignored");
            selected.truncate(1);
        }

        let mut selection = Selection::default();
        let mut accepted = Vec::new();
        for tuple in selected {
            self.metrics.increment_files_selected();
            let mut file = UploadFile::new(tuple);
            match self.validate(&file) {
                Some(reason) => {
                    file.invalidate(reason)?;
                    self.metrics.increment_files_invalid(reason);
                    info!(file_id = %file.id(), name = file.name(), reason = reason.code(), "file rejected");
                    self.emit(UploadEvent::Invalid {
                        file: file.clone(),
                        at: Utc::now(),
                    });
                    selection.rejected.push(file);
                }
                None => {
                    self.size = self.size.saturating_add(file.size().unwrap_or(0));
                    selection.accepted.push(file.id());
                    accepted.push(file.clone());
                    self.files.push(file);
                }
            }
        }

        if !accepted.is_empty() {
            self.emit(UploadEvent::SelectSuccess {
                files: accepted,
                at: Utc::now(),
            });
        }
        if !selection.rejected.is_empty() {
            self.emit(UploadEvent::SelectFailed {
                files: selection.rejected.clone(),
                at: Utc::now(),
            });
        }
        info!(
            accepted = selection.accepted.len(),
            rejected = selection.rejected.len(),
            "selection processed"
        );

        if self.config.instant_start && !selection.accepted.is_empty() {
            self.start().await;
        }
        Ok(selection)
    }

    fn validate(&self, file: &UploadFile) -> Option<ValidationError> {
        let config = &self.config;
        if !config.allow_duplicates && self.files.iter().any(|listed| listed.name() == file.name()) {
            return Some(ValidationError::Duplicate);
        }
        if config.file_list_size_max > 0
            && self.size.saturating_add(file.size().unwrap_or(0)) > config.file_list_size_max
        {
            return Some(ValidationError::FileListSizeMax);
        }
        if config.file_list_max > 0 && self.files.len() >= config.file_list_max {
            return Some(ValidationError::FileListMax);
        }
        if let Some(size) = file.size() {
            if config.file_size_min > 0 && size < config.file_size_min {
                return Some(ValidationError::FileSizeMin);
            }
            if config.file_size_max > 0 && size > config.file_size_max {
                return Some(ValidationError::FileSizeMax);
            }
        }
        if !config.type_filter.is_empty() && !config.type_filter.iter().any(|ext| ext == file.extension()) {
            return Some(ValidationError::TypeFilter);
        }
        None
    }

    /// Admit queued files in insertion order up to the bound.
    /// Returns how many were admitted.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> usize {
        self.emit(UploadEvent::BeforeStart { at: Utc::now() });
        let admitted = self.admit_queued().await;
        info!(admitted, uploading = self.uploading, "queue started");
        admitted
    }

    /// Stop every running file, newest first. Nothing is re-admitted.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> usize {
        self.emit(UploadEvent::BeforeStop { at: Utc::now() });
        self.sweeping = true;
        let mut stopped = 0;
        for index in (0..self.files.len()).rev() {
            if self.halt(index, true).await {
                stopped += 1;
            }
        }
        self.sweeping = false;
        info!(stopped, "queue stopped");
        stopped
    }

    /// Remove every file, newest first
    #[instrument(skip(self))]
    pub async fn remove(&mut self) -> usize {
        self.emit(UploadEvent::BeforeRemove { at: Utc::now() });
        self.sweeping = true;
        let ids: Vec<FileId> = self.files.iter().rev().map(UploadFile::id).collect();
        let mut removed = 0;
        for id in ids {
            if self.remove_file(id).await {
                removed += 1;
            }
        }
        self.sweeping = false;
        info!(removed, "queue cleared");
        removed
    }

    /// Toggle selection; forwarded to the transport
    #[instrument(skip(self))]
    pub async fn set_enabled(&mut self, enabled: bool) -> UploadResult<()> {
        self.transport.set_enabled(enabled).await?;
        self.enabled = enabled;
        self.emit(UploadEvent::Enabled {
            enabled,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Start one file, respecting the concurrency bound
    #[instrument(skip(self), fields(file_id = %id))]
    pub async fn start_file(&mut self, id: FileId) -> UploadResult<Admission> {
        let index = self.index_of(id).ok_or(UploadError::FileNotFound(id))?;
        if self.files[index].status() != FileStatus::Queued {
            return Ok(Admission::NotQueued);
        }
        if self.config.concurrency.is_saturated(self.uploading) {
            return Ok(Admission::AtCapacity);
        }
        self.launch(index).await;
        Ok(Admission::Started)
    }

    /// Stop one file; `false` when it was not running
    #[instrument(skip(self), fields(file_id = %id))]
    pub async fn stop_file(&mut self, id: FileId) -> UploadResult<bool> {
        let index = self.index_of(id).ok_or(UploadError::FileNotFound(id))?;
        let stopped = self.halt(index, true).await;
        if stopped {
            self.admit_queued().await;
        }
        Ok(stopped)
    }

    /// Return a stopped or failed file to the queue. A running file is
    /// stopped first.
    #[instrument(skip(self), fields(file_id = %id))]
    pub async fn requeue_file(&mut self, id: FileId) -> UploadResult<()> {
        let index = self.index_of(id).ok_or(UploadError::FileNotFound(id))?;
        if self.halt(index, true).await {
            self.admit_queued().await;
        }

        // admission above never reorders or removes files
        if self.files[index].requeue()? {
            self.metrics.increment_files_requeued();
            info!(file_id = %id, "file requeued");
            let file = self.files[index].clone();
            self.emit(UploadEvent::Requeue { file, at: Utc::now() });
        }
        Ok(())
    }

    /// Remove one file. Idempotent: `false` when it is already gone.
    #[instrument(skip(self), fields(file_id = %id))]
    pub async fn remove_file(&mut self, id: FileId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let was_running = self.halt(index, false).await;

        let file = self.files.remove(index);
        self.size = self.size.saturating_sub(file.size().unwrap_or(0));
        self.transport.release(&file).await;
        self.metrics.increment_files_removed();
        info!(file_id = %id, name = file.name(), "file removed");
        self.emit(UploadEvent::Remove { file, at: Utc::now() });

        if was_running {
            self.admit_queued().await;
        }
        true
    }

    /// Replace a file's per-file option layer
    pub fn set_file_options(&mut self, id: FileId, options: FileOptions) -> UploadResult<()> {
        let index = self.index_of(id).ok_or(UploadError::FileNotFound(id))?;
        self.files[index].set_options(options);
        Ok(())
    }

    /// Apply one transport callback through the file's guard
    pub async fn handle_transfer_event(&mut self, event: TransferEvent) -> TransitionOutcome {
        let TransferEvent { ticket, kind } = event;
        let Some(index) = self.index_of(ticket.file_id) else {
            debug!(%ticket, "callback for a removed file discarded");
            self.metrics.increment_stale_callbacks();
            return TransitionOutcome::Stale;
        };

        if matches!(kind, TransferEventKind::Progress { .. }) && !self.transport.capabilities().progress {
            debug!(%ticket, "progress from a transport without progress reporting ignored");
            return TransitionOutcome::Stale;
        }

        let (outcome, settled) = match kind {
            TransferEventKind::Progress {
                bytes_loaded,
                bytes_total,
            } => {
                let outcome = self.files[index].record_progress(ticket.attempt, bytes_loaded, bytes_total);
                if outcome.is_applied() {
                    debug!(%ticket, bytes_loaded, "upload progress");
                    let file = self.files[index].clone();
                    self.emit(UploadEvent::Progress { file, at: Utc::now() });
                }
                (outcome, false)
            }
            TransferEventKind::Success(response) => (self.settle_success(index, ticket.attempt, response), true),
            TransferEventKind::Failure(failure) => (self.settle_failure(index, ticket.attempt, failure), true),
        };

        if !outcome.is_applied() {
            debug!(%ticket, status = %self.files[index].status(), "stale transfer callback discarded");
            self.metrics.increment_stale_callbacks();
        } else if settled {
            self.admit_queued().await;
        }
        outcome
    }

    /// Apply every callback already waiting in the inbox
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.handle_transfer_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Apply callbacks until nothing is running.
    ///
    /// Waits on the transports; a transfer that never reports keeps this
    /// pending, so callers usually bound it with a timeout.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut handled = self.pump().await;
        while self.uploading > 0 {
            match self.inbox.recv().await {
                Some(event) => {
                    self.handle_transfer_event(event).await;
                    handled += 1;
                }
                None => break,
            }
        }
        handled
    }

    fn index_of(&self, id: FileId) -> Option<usize> {
        self.files.iter().position(|file| file.id() == id)
    }

    fn emit(&self, event: UploadEvent) {
        if self.config.verbose {
            info!(event = event.event_name(), file_id = ?event.file_id(), "upload event");
        }
        let _ = self.events.send(event);
    }

    async fn admit_queued(&mut self) -> usize {
        if self.sweeping {
            return 0;
        }
        let mut admitted = 0;
        let mut index = 0;
        while index < self.files.len() && !self.config.concurrency.is_saturated(self.uploading) {
            if self.files[index].status() == FileStatus::Queued && self.launch(index).await {
                admitted += 1;
            }
            index += 1;
        }
        admitted
    }

    /// `Queued -> Running` and hand the file to the transport
    async fn launch(&mut self, index: usize) -> bool {
        let attempt = match self.files[index].begin() {
            Ok(attempt) => attempt,
            Err(err) => {
                debug!(error = %err, "admission skipped");
                return false;
            }
        };
        self.uploading += 1;
        self.metrics.increment_files_started();

        let file = self.files[index].clone();
        info!(file_id = %file.id(), name = file.name(), attempt, "upload started");
        self.emit(UploadEvent::Start { file, at: Utc::now() });

        let file = &self.files[index];
        let sent = match merge_options(self.config.request_defaults(), file.options(), &self.merge_ctx)
            .and_then(|effective| self.transport.build_request(&effective, file))
        {
            Ok(wire) => self.transport.send(wire, self.sink.clone()).await,
            Err(err) => Err(err),
        };

        match sent {
            Ok(handle) => {
                self.handles.insert(self.files[index].id(), handle);
            }
            Err(err) => {
                self.settle_failure(index, attempt, TransferFailure::from(err));
            }
        }
        true
    }

    fn settle_success(&mut self, index: usize, attempt: u64, response: TransferResponse) -> TransitionOutcome {
        let outcome = self.files[index].complete(attempt, response);
        if outcome.is_applied() {
            let file = self.files[index].clone();
            self.uploading = self.uploading.saturating_sub(1);
            self.handles.remove(&file.id());
            self.metrics.increment_files_completed(file.bytes_loaded());
            info!(file_id = %file.id(), name = file.name(), "upload complete");
            self.emit(UploadEvent::Complete { file, at: Utc::now() });
        }
        outcome
    }

    fn settle_failure(&mut self, index: usize, attempt: u64, failure: TransferFailure) -> TransitionOutcome {
        let outcome = self.files[index].fail(attempt, failure);
        if outcome.is_applied() {
            let file = self.files[index].clone();
            self.uploading = self.uploading.saturating_sub(1);
            self.handles.remove(&file.id());
            self.metrics.increment_files_failed();
            warn!(
                file_id = %file.id(),
                name = file.name(),
                error = ?file.failure(),
                "upload failed"
            );
            self.emit(UploadEvent::Fail { file, at: Utc::now() });
        }
        outcome
    }

    /// `Running -> Stopped` with best-effort transport teardown
    async fn halt(&mut self, index: usize, notify: bool) -> bool {
        if !self.files[index].halt() {
            return false;
        }
        self.uploading = self.uploading.saturating_sub(1);
        let id = self.files[index].id();
        if let Some(handle) = self.handles.remove(&id) {
            self.transport.cancel(handle).await;
        }
        self.metrics.increment_files_stopped();
        if notify {
            info!(file_id = %id, "upload stopped");
            let file = self.files[index].clone();
            self.emit(UploadEvent::Stop { file, at: Utc::now() });
        }
        true
    }
}
