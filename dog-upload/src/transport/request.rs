use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::body;
use super::{require_local, TransferHandle, TransferSink, Transport, WireRequest};
use crate::codec::multipart::{content_type_for, encode_multipart, new_boundary, trailer_len, FilePart};
use crate::error::{TransferFailure, UploadResult};
use crate::merge::EffectiveRequest;
use crate::types::{TransferResponse, TransportCapabilities, TransportKind, UploadFile};

/// Streaming multipart HTTP upload with byte-level progress
#[derive(Debug, Clone)]
pub struct RequestTransport {
    client: Client,
    native_multipart: bool,
    time_limit: Option<Duration>,
}

impl RequestTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            native_multipart: true,
            time_limit: None,
        }
    }

    /// Use the client's multipart builder, or the hand-built encoder when `false`
    pub fn with_native_multipart(mut self, native: bool) -> Self {
        self.native_multipart = native;
        self
    }

    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    async fn transfer(&self, request: WireRequest, sink: TransferSink) -> Result<TransferResponse, TransferFailure> {
        let WireRequest {
            ticket,
            method,
            url,
            headers,
            field_name,
            fields,
            file,
        } = request;

        let mut builder = self.client.request(method.into(), url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = if self.native_multipart {
            let stream = body::open_source(&file.source).await?;
            let body = Body::wrap_stream(body::with_progress(stream, sink, ticket, 0, file.size));
            let part = match file.size {
                Some(len) => Part::stream_with_length(body, len),
                None => Part::stream(body),
            }
            .file_name(file.name)
            .mime_str(&file.content_type)?;

            let form = fields
                .into_iter()
                .fold(Form::new(), |form, (name, value)| form.text(name, value));
            builder.multipart(form.part(field_name, part))
        } else {
            let data = body::read_source(&file.source).await?;
            let file_len = data.len() as u64;
            let boundary = new_boundary();
            let part = FilePart {
                field_name,
                file_name: file.name,
                content_type: file.content_type,
                data,
            };
            let encoded = encode_multipart(&boundary, &fields, Some(&part));
            let skip = (encoded.len() - trailer_len(&boundary)) as u64 - file_len;

            builder
                .header(CONTENT_TYPE, content_type_for(&boundary))
                .body(Body::wrap_stream(body::with_progress(
                    body::chunked(encoded),
                    sink,
                    ticket,
                    skip,
                    Some(file_len),
                )))
        };

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(TransferResponse::new(Some(status.as_u16()), text))
        } else {
            Err(TransferFailure::Status {
                code: status.as_u16(),
                body: text,
            })
        }
    }
}

/// Headers every request upload carries, before the configured ones
fn protocol_headers(file: &UploadFile, content_type: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("X-Requested-With".to_string(), "XMLHttpRequest".to_string());
    headers.insert("Cache-Control".to_string(), "no-cache".to_string());
    headers.insert(
        "If-Modified-Since".to_string(),
        "Mon, 26 Jul 1997 05:00:00 GMT".to_string(),
    );
    headers.insert(
        "X-File-Name".to_string(),
        urlencoding::encode(file.name()).into_owned(),
    );
    if let Some(size) = file.size() {
        headers.insert("X-File-Size".to_string(), size.to_string());
    }
    headers.insert("X-File-Type".to_string(), content_type.to_string());
    headers
}

#[async_trait]
impl Transport for RequestTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Request
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            progress: true,
            multiple: true,
            remote_selection: false,
        }
    }

    fn build_request(&self, request: &EffectiveRequest, file: &UploadFile) -> UploadResult<WireRequest> {
        require_local(self.kind(), file)?;
        let mut wire = WireRequest::form(request, file);
        let mut headers = protocol_headers(file, &wire.file.content_type);
        headers.append(&mut wire.headers);
        wire.headers = headers;
        Ok(wire)
    }

    #[instrument(skip(self, request, sink), fields(ticket = %request.ticket, url = %request.url))]
    async fn send(&self, request: WireRequest, sink: TransferSink) -> UploadResult<TransferHandle> {
        let ticket = request.ticket;
        let this = self.clone();

        let task = tokio::spawn(async move {
            let transfer = this.transfer(request, sink.clone());
            let outcome = match this.time_limit {
                Some(limit) => tokio::time::timeout(limit, transfer)
                    .await
                    .unwrap_or(Err(TransferFailure::Timeout)),
                None => transfer.await,
            };

            match outcome {
                Ok(response) => {
                    debug!(%ticket, status = ?response.status, "request upload finished");
                    sink.succeed(ticket, response);
                }
                Err(failure) => {
                    warn!(%ticket, error = %failure, "request upload failed");
                    sink.fail(ticket, failure);
                }
            }
        });

        Ok(TransferHandle::task(ticket, task.abort_handle()))
    }

    async fn cancel(&self, handle: TransferHandle) {
        debug!(ticket = %handle.ticket(), "aborting request upload");
        handle.abort();
    }
}
