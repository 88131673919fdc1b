use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};

/// Single-file "multipart/form-data" encoder.
#[derive(Debug, Clone)]
pub struct Multipart {
    boundary: String,
}

impl Multipart {
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|v| v.as_nanos())
            .unwrap_or(0);

        Self::with_boundary(format!("hload-{nanos:032x}"))
    }

    #[inline]
    pub fn with_boundary(boundary: String) -> Self {
        Self { boundary }
    }

    /// Returns the value for the "Content-Type" request header.
    #[inline]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Encodes the given file contents as the only field of the form.
    pub fn encode(&self, name: &str, filename: &str, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(data.len() + 256);

        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n").as_bytes());
        buf.put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        buf.put_slice(data);
        buf.put_slice(b"\r\n--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--\r\n");

        buf.freeze()
    }
}
