//! # dog-upload: Transport-Agnostic File Upload Queue
//!
//! **Select files, validate them, and upload them through whichever transport
//! the host supports, with one queue contract for all of them.**
//!
//! ## Features
//!
//! - **Capability-based transport selection**: streaming multipart requests,
//!   plain form posts, or a plugin-hosted agent, chosen from host probes in
//!   priority order and memoized process-wide
//! - **Guarded file state machine**: late callbacks from stopped, removed or
//!   superseded attempts are discarded, so counters never drift
//! - **Bounded dispatch**: one-at-a-time, N-at-a-time or unbounded admission in
//!   insertion order, refilled on every completion, failure and stop
//! - **Layered options**: queue defaults, per-file overrides and computed values
//!   merged fresh on every admission
//! - **Structured observability**: lifecycle event streams, `tracing` spans and
//!   live counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_upload::prelude::*;
//!
//! # async fn run() -> UploadResult<()> {
//! let config = UploaderConfig::new()
//!     .with_url("https://example.com/upload")
//!     .with_data("album=7")
//!     .with_concurrency(Concurrency::Limit(2));
//!
//! let mut uploader = Uploader::new(config)?;
//! let selection = uploader
//!     .select(vec![SelectedFile::from_path("photo.jpg").await?])
//!     .await?;
//! println!("accepted {} file(s)", selection.accepted.len());
//!
//! uploader.start().await;
//! uploader.run_until_idle().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod merge;
pub mod observability;
pub mod queue;
pub mod transport;
pub mod types;

pub use config::UploaderConfig;
pub use error::{TransferFailure, UploadError, UploadResult, ValidationError};
pub use merge::{merge_options, EffectiveRequest, MergeContext};
pub use observability::{LiveMetrics, MetricsSnapshot};
pub use queue::{Admission, BoxStream, QueueStats, Uploader, UploaderBuilder};
pub use transport::{
    AdapterSelector, ChannelPluginHost, FrameTransport, MemoryTransport, PluginEndpoint, PluginEvent,
    PluginHost, PluginTransport, RemoteCall, RequestTransport, TransferEvent, TransferEventKind,
    TransferHandle, TransferSink, TransferTicket, Transport, WireRequest,
};
pub use types::*;

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::config::UploaderConfig;
    pub use crate::error::{TransferFailure, UploadError, UploadResult, ValidationError};
    pub use crate::queue::{Admission, QueueStats, Uploader};
    pub use crate::transport::{AdapterSelector, Transport};
    pub use crate::types::{
        Concurrency, FileId, FileOptions, FileStatus, HostProbe, RequestData, RequestOptions, SelectedFile,
        Selection, TransportKind, UploadEvent, UploadFile,
    };
}
