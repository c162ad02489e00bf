use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// The file section of a hand-built multipart body
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Fresh boundary token, unlikely to collide with payload bytes
pub fn new_boundary() -> String {
    format!("----DogUploadBoundary{}", uuid::Uuid::new_v4().simple())
}

/// `Content-Type` header value for a body encoded with `boundary`
pub fn content_type_for(boundary: &str) -> String {
    format!("multipart/form-data; boundary={}", boundary)
}

/// Encode form fields and an optional file as `multipart/form-data`.
///
/// Fields come first, in the given order, then the file. Quotes and line
/// breaks inside names are percent-escaped the way browsers submit forms.
pub fn encode_multipart(boundary: &str, fields: &[(String, String)], file: Option<&FilePart>) -> Bytes {
    let file_len = file.map(|f| f.data.len()).unwrap_or(0);
    let mut body = BytesMut::with_capacity(256 + file_len + fields.len() * 64);

    for (name, value) in fields {
        put_boundary(&mut body, boundary);
        body.put_slice(
            format!("Content-Disposition: form-data; name=\"{}\"", escape_name(name)).as_bytes(),
        );
        body.put_slice(CRLF);
        body.put_slice(CRLF);
        body.put_slice(value.as_bytes());
        body.put_slice(CRLF);
    }

    if let Some(file) = file {
        put_boundary(&mut body, boundary);
        body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"",
                escape_name(&file.field_name),
                escape_name(&file.file_name)
            )
            .as_bytes(),
        );
        body.put_slice(CRLF);
        body.put_slice(format!("Content-Type: {}", file.content_type).as_bytes());
        body.put_slice(CRLF);
        body.put_slice(CRLF);
        body.put_slice(&file.data);
        body.put_slice(CRLF);
    }

    body.put_slice(b"--");
    body.put_slice(boundary.as_bytes());
    body.put_slice(b"--");
    body.put_slice(CRLF);
    body.freeze()
}

/// Bytes that follow the file data: its line break and the closing boundary
pub fn trailer_len(boundary: &str) -> usize {
    CRLF.len() + boundary.len() + 4 + CRLF.len()
}

fn put_boundary(body: &mut BytesMut, boundary: &str) {
    body.put_slice(b"--");
    body.put_slice(boundary.as_bytes());
    body.put_slice(CRLF);
}

fn escape_name(name: &str) -> String {
    name.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}
