pub mod ids;
pub mod file;
pub mod options;
pub mod selection;
pub mod capabilities;
pub mod events;

pub use ids::FileId;
pub use file::{FileDates, FileStatus, Progress, TransferResponse, TransitionOutcome, UploadFile};
pub use options::{Concurrency, FileOptions, HttpMethod, RequestData, RequestOptions};
pub use selection::{FileSource, SelectedFile, Selection};
pub use capabilities::{HostProbe, TransportCapabilities, TransportKind};
pub use events::UploadEvent;
