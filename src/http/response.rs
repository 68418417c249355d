//! Response building and serialization.
//!
//! A handler fills the slot's pre-allocated response buffer with the body
//! and picks a MIME type; the connection driver serializes the head
//! separately once the handler has returned a status. The body buffer is
//! reused across every request served on its slot.

use crate::http::types::{StatusCode, Version};
use std::fmt;

/// Response under construction, backed by the slot's reusable buffer.
pub struct Response<'a> {
    buffer: &'a mut Vec<u8>,
    mime_type: &'static str,
}

impl<'a> Response<'a> {
    #[inline(always)]
    pub(crate) fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self {
            buffer,
            mime_type: "text/plain",
        }
    }

    /// Replaces the response body.
    #[inline]
    pub fn body<V: AsRef<[u8]>>(&mut self, body: V) -> &mut Self {
        self.buffer.clear();
        self.buffer.extend_from_slice(body.as_ref());
        self
    }

    /// Appends a chunk to the response body.
    #[inline]
    pub fn append(&mut self, chunk: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(chunk);
        self
    }

    /// Sets the `Content-Type` (default: `text/plain`). See
    /// [`mime_type_for_path`](crate::mime_type_for_path) for the
    /// extension-based table.
    #[inline(always)]
    pub fn mime_type(&mut self, mime_type: &'static str) -> &mut Self {
        self.mime_type = mime_type;
        self
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline(always)]
    pub(crate) fn current_mime_type(&self) -> &'static str {
        self.mime_type
    }
}

// `write!(resp, ...)` appends formatted text to the body.
impl fmt::Write for Response<'_> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buffer.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Serializes the response head for a body of `body_len` bytes.
pub(crate) fn serialize_head(
    out: &mut Vec<u8>,
    version: Version,
    status: StatusCode,
    mime_type: &str,
    body_len: usize,
    keep_alive: bool,
) {
    out.extend_from_slice(version.as_str().as_bytes());
    out.extend_from_slice(status.as_status_line_tail().as_bytes());

    out.extend_from_slice(b"Content-Length: ");
    push_usize(out, body_len);
    out.extend_from_slice(b"\r\nContent-Type: ");
    out.extend_from_slice(mime_type.as_bytes());
    out.extend_from_slice(match keep_alive {
        true => b"\r\nConnection: keep-alive\r\n\r\n" as &[u8],
        false => b"\r\nConnection: close\r\n\r\n",
    });
}

/// Fills `body` with the default error page for `status`.
pub(crate) fn error_page(body: &mut Vec<u8>, status: StatusCode) {
    body.clear();
    body.extend_from_slice(b"<html><head><title>");
    push_usize(body, status as usize);
    body.extend_from_slice(b" ");
    body.extend_from_slice(status.as_str().as_bytes());
    body.extend_from_slice(b"</title></head><body><h1>");
    body.extend_from_slice(status.as_str().as_bytes());
    body.extend_from_slice(b"</h1><p>");
    body.extend_from_slice(status.as_descriptive_str().as_bytes());
    body.extend_from_slice(b"</p></body></html>");
}

// Decimal digits without going through fmt machinery.
fn push_usize(out: &mut Vec<u8>, mut n: usize) {
    let mut digits = [0u8; 20];
    let mut at = digits.len();

    loop {
        at -= 1;
        digits[at] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }

    out.extend_from_slice(&digits[at..]);
}
