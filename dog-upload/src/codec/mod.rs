//! Pure wire helpers shared by the transports.
//!
//! Nothing here performs I/O: query strings and multipart bodies are built
//! from values and can be tested byte-for-byte.

pub mod multipart;
pub mod query;

pub use multipart::{content_type_for, encode_multipart, new_boundary, trailer_len, FilePart};
pub use query::{append_query, decode_pairs, encode_fields};
