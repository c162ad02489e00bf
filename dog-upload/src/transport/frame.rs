use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::body;
use super::{require_local, TransferHandle, TransferSink, Transport, WireRequest};
use crate::codec::multipart::{content_type_for, encode_multipart, new_boundary, FilePart};
use crate::error::{TransferFailure, UploadResult};
use crate::merge::EffectiveRequest;
use crate::types::{TransferResponse, TransportCapabilities, TransportKind, UploadFile};

/// Plain form submission, the way a hidden frame posts a file input.
///
/// The body is always the hand-built multipart form. A form cannot set
/// request headers, observe upload progress or read the response status:
/// any response document counts as completion and only connection-level
/// errors fail the transfer.
#[derive(Debug, Clone)]
pub struct FrameTransport {
    client: Client,
    time_limit: Option<Duration>,
}

impl FrameTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            time_limit: None,
        }
    }

    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    async fn submit(&self, request: WireRequest) -> Result<TransferResponse, TransferFailure> {
        let data = body::read_source(&request.file.source).await?;
        let boundary = new_boundary();
        let part = FilePart {
            field_name: request.field_name,
            file_name: request.file.name,
            content_type: request.file.content_type,
            data,
        };
        let encoded = encode_multipart(&boundary, &request.fields, Some(&part));

        let response = self
            .client
            .request(request.method.into(), request.url)
            .header(CONTENT_TYPE, content_type_for(&boundary))
            .body(encoded)
            .send()
            .await?;
        let text = response.text().await?;
        Ok(TransferResponse::new(None, text))
    }
}

#[async_trait]
impl Transport for FrameTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Frame
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            progress: false,
            multiple: false,
            remote_selection: false,
        }
    }

    fn build_request(&self, request: &EffectiveRequest, file: &UploadFile) -> UploadResult<WireRequest> {
        require_local(self.kind(), file)?;
        let mut wire = WireRequest::form(request, file);
        wire.headers.clear();
        Ok(wire)
    }

    #[instrument(skip(self, request, sink), fields(ticket = %request.ticket, url = %request.url))]
    async fn send(&self, request: WireRequest, sink: TransferSink) -> UploadResult<TransferHandle> {
        let ticket = request.ticket;
        let this = self.clone();

        let task = tokio::spawn(async move {
            let submit = this.submit(request);
            let outcome = match this.time_limit {
                Some(limit) => tokio::time::timeout(limit, submit)
                    .await
                    .unwrap_or(Err(TransferFailure::Timeout)),
                None => submit.await,
            };

            match outcome {
                Ok(response) => {
                    debug!(%ticket, "frame post loaded");
                    sink.succeed(ticket, response);
                }
                Err(failure) => {
                    warn!(%ticket, error = %failure, "frame post failed");
                    sink.fail(ticket, failure);
                }
            }
        });

        Ok(TransferHandle::task(ticket, task.abort_handle()))
    }

    async fn cancel(&self, handle: TransferHandle) {
        debug!(ticket = %handle.ticket(), "abandoning frame post");
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{merge_options, MergeContext};
    use crate::types::{RequestOptions, SelectedFile};

    #[test]
    fn forms_carry_no_custom_headers() {
        let transport = FrameTransport::new(Client::new());
        let file = UploadFile::new(SelectedFile::from_bytes("a.txt", "abc"));
        let options = RequestOptions::new()
            .with_url("http://host/up")
            .with_header("Authorization", "Bearer t");
        let effective = merge_options(&options, &RequestOptions::new(), &MergeContext::default()).unwrap();

        let wire = transport.build_request(&effective, &file).unwrap();
        assert!(wire.headers.is_empty());
        assert!(!transport.capabilities().progress);
    }
}
