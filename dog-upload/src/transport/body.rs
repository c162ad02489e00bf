//! Reading file sources as request bodies.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use futures_core::Stream;
use std::io;
use std::pin::Pin;
use tokio_util::io::ReaderStream;

use super::{TransferSink, TransferTicket};
use crate::types::FileSource;

/// Chunk size for in-memory bodies and file reads
pub const CHUNK_SIZE: usize = 64 * 1024;

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

fn remote_source() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "source is held by a plugin host")
}

/// Load the whole source into memory
pub async fn read_source(source: &FileSource) -> io::Result<Bytes> {
    match source {
        FileSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        FileSource::Bytes { data, .. } => Ok(data.clone()),
        FileSource::Remote { .. } => Err(remote_source()),
    }
}

/// Stream the source without loading it whole
pub async fn open_source(source: &FileSource) -> io::Result<ByteStream> {
    match source {
        FileSource::Path(path) => {
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::pin(ReaderStream::with_capacity(file, CHUNK_SIZE)))
        }
        FileSource::Bytes { data, .. } => Ok(chunked(data.clone())),
        FileSource::Remote { .. } => Err(remote_source()),
    }
}

/// Split an in-memory body into chunks
pub fn chunked(data: Bytes) -> ByteStream {
    let chunks: Vec<io::Result<Bytes>> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
        .collect();
    Box::pin(stream::iter(chunks))
}

/// Report file bytes as the body is pulled.
///
/// The first `skip` body bytes are framing that precedes the file; counts are
/// clamped to `file_len` so trailing framing is not reported either.
pub fn with_progress(
    body: ByteStream,
    sink: TransferSink,
    ticket: TransferTicket,
    skip: u64,
    file_len: Option<u64>,
) -> ByteStream {
    let mut sent: u64 = 0;
    let mut reported: u64 = 0;
    Box::pin(body.inspect(move |chunk| {
        if let Ok(chunk) = chunk {
            sent += chunk.len() as u64;
            let mut loaded = sent.saturating_sub(skip);
            if let Some(len) = file_len {
                loaded = loaded.min(len);
            }
            if loaded > reported {
                reported = loaded;
                sink.progress(ticket, loaded, file_len);
            }
        }
    }))
}
