//! Core HTTP protocol types

use crate::errors::ErrorKind;

// METHOD

/// HTTP request methods understood by the request-line parser.
///
/// Whether a method is *served* is a per-route decision; handlers answer
/// [`StatusCode::NotAllowed`] for methods they reject.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
}

impl Method {
    /// Matches the method token at the start of a request line, returning
    /// the method and the number of bytes consumed (token plus space).
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, usize), ErrorKind> {
        match src {
            [b'G', b'E', b'T', b' ', ..] => Ok((Method::Get, 4)),
            [b'H', b'E', b'A', b'D', b' ', ..] => Ok((Method::Head, 5)),
            [b'P', b'O', b'S', b'T', b' ', ..] => Ok((Method::Post, 5)),
            [b'P', b'U', b'T', b' ', ..] => Ok((Method::Put, 4)),
            [b'D', b'E', b'L', b'E', b'T', b'E', b' ', ..] => Ok((Method::Delete, 7)),
            [b'O', b'P', b'T', b'I', b'O', b'N', b'S', b' ', ..] => Ok((Method::Options, 8)),
            _ => Err(ErrorKind::InvalidMethod),
        }
    }
}

// VERSION

/// HTTP protocol version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 - keep-alive only when requested explicitly.
    Http10,
    /// HTTP/1.1 - keep-alive by default.
    Http11,
}

impl Version {
    /// Parses the version token; the second value is the protocol's default
    /// keep-alive behavior.
    #[inline(always)]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<(Self, bool), ErrorKind> {
        match src {
            b"HTTP/1.1" => Ok((Self::Http11, true)),
            b"HTTP/1.0" => Ok((Self::Http10, false)),
            _ => Err(ErrorKind::InvalidVersion),
        }
    }

    #[inline(always)]
    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $name:ident = ($num:expr, $reason:expr, $descriptive:expr);
    )+) => {
        /// HTTP status codes recognized by the core.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $reason)]
            $name = $num,
        )+ }

        impl StatusCode {
            /// Short reason phrase, e.g. `"Not found"`.
            #[inline]
            pub const fn as_str(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $reason,
                )+ }
            }

            /// Human-oriented sentence used on default error pages.
            #[inline]
            pub const fn as_descriptive_str(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $descriptive,
                )+ }
            }

            /// Status line without the version, e.g. `" 200 OK\r\n"`.
            #[inline]
            pub(crate) const fn as_status_line_tail(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => concat!(" ", $num, " ", $reason, "\r\n"),
                )+ }
            }
        }
    }
}

set_status_codes! {
    Ok = (200, "OK", "Success!");
    NotModified = (304, "Not modified",
        "The content has not changed since previous request.");
    BadRequest = (400, "Bad request",
        "The client has issued a bad request.");
    Forbidden = (403, "Forbidden",
        "Access to this resource has been denied.");
    NotFound = (404, "Not found",
        "The requested resource could not be found on this server.");
    NotAllowed = (405, "Not allowed",
        "The requested method is not allowed by this server.");
    TooLarge = (413, "Request too large",
        "The request entity is too large.");
    RangeUnsatisfiable = (416, "Requested range unsatisfiable",
        "The server can't supply the requested portion of the requested resource.");
    InternalError = (500, "Internal server error",
        "The server encountered an internal error that couldn't be recovered from.");
}

impl StatusCode {
    #[inline(always)]
    pub const fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok | StatusCode::NotModified)
    }
}

// MIME

/// Maps a path to a MIME type by its extension (the last `.`).
///
/// Unknown and missing extensions fall back to `application/octet-stream`.
///
/// # Examples
///
/// ```
/// use strand_web::mime_type_for_path;
///
/// assert_eq!(mime_type_for_path("/static/app.css"), "text/css");
/// assert_eq!(mime_type_for_path("README"), "application/octet-stream");
/// ```
#[inline]
pub fn mime_type_for_path(path: &str) -> &'static str {
    let extension = match path.rfind('.') {
        Some(dot) => &path.as_bytes()[dot + 1..],
        None => return "application/octet-stream",
    };

    match extension {
        b"css" => "text/css",
        b"htm" | b"html" => "text/html",
        b"jpg" | b"jpeg" => "image/jpeg",
        b"js" => "application/javascript",
        b"png" => "image/png",
        b"txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tokens() {
        assert_eq!(Method::from_bytes(b"GET / HTTP/1.1"), Ok((Method::Get, 4)));
        assert_eq!(
            Method::from_bytes(b"DELETE /x HTTP/1.1"),
            Ok((Method::Delete, 7))
        );
        assert_eq!(
            Method::from_bytes(b"BREW /pot HTTP/1.1"),
            Err(ErrorKind::InvalidMethod)
        );
    }

    #[test]
    fn version_defaults() {
        assert_eq!(Version::from_bytes(b"HTTP/1.1"), Ok((Version::Http11, true)));
        assert_eq!(Version::from_bytes(b"HTTP/1.0"), Ok((Version::Http10, false)));
        assert_eq!(
            Version::from_bytes(b"HTTP/2.0"),
            Err(ErrorKind::InvalidVersion)
        );
    }

    #[test]
    fn status_strings() {
        assert_eq!(StatusCode::Ok.as_str(), "OK");
        assert_eq!(StatusCode::NotFound.as_str(), "Not found");
        assert_eq!(
            StatusCode::NotFound.as_descriptive_str(),
            "The requested resource could not be found on this server."
        );
        assert_eq!(StatusCode::Ok.as_status_line_tail(), " 200 OK\r\n");
    }

    #[test]
    fn mime_table() {
        assert_eq!(mime_type_for_path("a.css"), "text/css");
        assert_eq!(mime_type_for_path("a.htm"), "text/html");
        assert_eq!(mime_type_for_path("a.jpg"), "image/jpeg");
        assert_eq!(mime_type_for_path("a.js"), "application/javascript");
        assert_eq!(mime_type_for_path("a.png"), "image/png");
        assert_eq!(mime_type_for_path("a.txt"), "text/plain");
        assert_eq!(mime_type_for_path("a.wasm"), "application/octet-stream");
        assert_eq!(
            mime_type_for_path("no-extension"),
            "application/octet-stream"
        );
        assert_eq!(mime_type_for_path("dir.d/file"), "application/octet-stream");
    }
}
