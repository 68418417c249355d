use crate::http::types::StatusCode;
use std::{error, fmt, io};

/// What went wrong while turning socket bytes into a dispatched request.
///
/// Every parse-side variant maps onto the status code of the default error
/// page sent back to the client; I/O errors terminate the connection
/// without a response.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,
    InvalidUrl,
    InvalidVersion,
    RequestTooLarge,

    Io(IoError),
}

impl ErrorKind {
    #[inline]
    pub(crate) const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidMethod => StatusCode::NotAllowed,
            Self::InvalidUrl | Self::InvalidVersion => StatusCode::BadRequest,
            Self::RequestTooLarge => StatusCode::TooLarge,
            Self::Io(_) => StatusCode::InternalError,
        }
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

// io::Error is not PartialEq; comparing kinds is enough for tests.
#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
