//! Request head parsing and the per-request view handed to handlers.
//!
//! Only the narrow slice of HTTP the scheduling core needs lives here:
//! request line, header terminator, and the `Connection` header that
//! drives keep-alive. Everything else a route cares about stays raw.

use crate::{
    errors::ErrorKind,
    http::{
        query::QueryParams,
        types::{Method, Version},
    },
};
use memchr::{memchr, memmem};

/// A parsed request, borrowed from the connection's read buffer and slot
/// scratch for the duration of one handler call.
#[derive(Debug)]
pub struct Request<'a> {
    pub(crate) method: Method,
    pub(crate) path: &'a str,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    pub(crate) query: &'a QueryParams,
}

impl<'a> Request<'a> {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request path, without the query string.
    #[inline(always)]
    pub const fn path(&self) -> &'a str {
        self.path
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Whether this exchange requested connection reuse.
    #[inline(always)]
    pub const fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Looks up a query parameter by key.
    ///
    /// Parameters are only populated for routes whose
    /// [`parse_flags`](crate::RouteHandler::parse_flags) include
    /// [`ParseFlags::QUERY_STRING`](crate::ParseFlags::QUERY_STRING).
    #[inline]
    pub fn query(&self, key: &[u8]) -> Option<&[u8]> {
        self.query.get(key)
    }

    /// All query parameters, in request order.
    #[inline(always)]
    pub const fn query_params(&self) -> &'a QueryParams {
        self.query
    }
}

/// The pieces of the request line and headers the core acts on.
#[derive(Debug, PartialEq)]
pub(crate) struct RequestHead<'a> {
    pub(crate) method: Method,
    pub(crate) path: &'a str,
    pub(crate) raw_query: Option<&'a [u8]>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
}

/// Returns the length of the request head once its `\r\n\r\n` terminator
/// has arrived.
#[inline]
pub(crate) fn head_complete(buf: &[u8]) -> Option<usize> {
    memmem::find(buf, b"\r\n\r\n").map(|pos| pos + 4)
}

/// Parses a complete request head.
pub(crate) fn parse_head(buf: &[u8]) -> Result<RequestHead<'_>, ErrorKind> {
    let (method, consumed) = Method::from_bytes(buf)?;
    let rest = &buf[consumed..];

    // Target runs to the space before the version token.
    let target_end = memchr(b' ', rest).ok_or(ErrorKind::InvalidUrl)?;
    let target = &rest[..target_end];
    match target.first() {
        Some(b'/') | Some(b'*') => {}
        _ => return Err(ErrorKind::InvalidUrl),
    }

    let (path_bytes, raw_query) = match memchr(b'?', target) {
        Some(mark) => (&target[..mark], Some(&target[mark + 1..])),
        None => (target, None),
    };
    let path = simdutf8::basic::from_utf8(path_bytes).map_err(|_| ErrorKind::InvalidUrl)?;

    let rest = &rest[target_end + 1..];
    let line_end = memchr(b'\r', rest).ok_or(ErrorKind::InvalidVersion)?;
    let (version, mut keep_alive) = Version::from_bytes(&rest[..line_end])?;

    if let Some(connection) = header_value(&rest[line_end..], b"connection:") {
        if connection.eq_ignore_ascii_case(b"close") {
            keep_alive = false;
        } else if connection.eq_ignore_ascii_case(b"keep-alive") {
            keep_alive = true;
        }
    }

    Ok(RequestHead {
        method,
        path,
        raw_query,
        version,
        keep_alive,
    })
}

// Case-insensitive scan of the header block for `name` (which includes the
// trailing ':'); returns the value with surrounding whitespace trimmed.
fn header_value<'a>(headers: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let mut rest = headers;

    while let Some(line_start) = memmem::find(rest, b"\r\n").map(|pos| pos + 2) {
        rest = &rest[line_start..];
        if rest.is_empty() || rest.starts_with(b"\r\n") {
            return None;
        }

        let line_end = memchr(b'\r', rest).unwrap_or(rest.len());
        let line = &rest[..line_end];

        if line.len() > name.len() && line[..name.len()].eq_ignore_ascii_case(name) {
            return Some(trim_ascii(&line[name.len()..]));
        }
    }

    None
}

#[inline]
fn trim_ascii(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}
