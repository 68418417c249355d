//! URL query string parsing into per-slot key/value storage.

use memchr::memchr;
use std::{error, fmt};

/// Query parameters attached to a request slot.
///
/// The `Empty` variant is the shared do-nothing case: no storage, nothing
/// to release at request reset. Parsed parameters live in `Owned`, which is
/// dropped (and its storage with it) when the slot is reset.
///
/// There is no percent-decoding; keys and values are the raw bytes from
/// the request line.
///
/// # Examples
/// ```
/// use strand_web::query::QueryParams;
///
/// let params = QueryParams::parse(b"name=john&age=25&debug", 32).unwrap();
///
/// assert_eq!(params.len(), 3);
/// assert_eq!(params.get(b"name"), Some(&b"john"[..]));
/// assert_eq!(params.get(b"debug"), Some(&b""[..]));
/// assert_eq!(params.get(b"missing"), None);
/// ```
#[derive(Debug, Default, PartialEq, Eq)]
pub enum QueryParams {
    /// No parameters; nothing owned, nothing to free.
    #[default]
    Empty,
    /// Parsed parameters in request order.
    Owned(Vec<(Box<[u8]>, Box<[u8]>)>),
}

impl QueryParams {
    /// Parses a raw query string (with or without the leading `?`).
    ///
    /// An empty input produces [`QueryParams::Empty`]. More than `limit`
    /// parameters is a client error.
    ///
    /// All the shapes a parameter can take:
    /// ```
    /// use strand_web::query::QueryParams;
    ///
    /// let params = QueryParams::parse(b"debug&name=&=Qwe&key=sda&&", 10).unwrap();
    ///
    /// assert_eq!(params.len(), 5);
    /// assert_eq!(params.get(b"debug"), Some(&b""[..]));
    /// assert_eq!(params.get(b"name"), Some(&b""[..]));
    /// assert_eq!(params.get(b""), Some(&b"Qwe"[..]));
    /// assert_eq!(params.get(b"key"), Some(&b"sda"[..]));
    /// ```
    pub fn parse(query: &[u8], limit: usize) -> Result<Self, Error> {
        let data = match query.first() {
            None => return Ok(Self::Empty),
            Some(b'?') => &query[1..],
            Some(_) => query,
        };
        if data.is_empty() {
            return Ok(Self::Empty);
        }

        let mut pairs: Vec<(Box<[u8]>, Box<[u8]>)> = Vec::new();
        let mut start = 0;

        while start < data.len() {
            if pairs.len() >= limit {
                return Err(Error::OverLimit(limit));
            }

            // Parameter runs to the next '&' or the end of the string.
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let index = memchr(b'=', &data[start..end]).unwrap_or(end - start);
            let split_index = start + index;

            let key = &data[start..split_index];
            let value = match split_index < end {
                true => &data[split_index + 1..end],
                false => b"" as &[u8],
            };

            pairs.push((key.into(), value.into()));
            start = end + 1;
        }

        match pairs.is_empty() {
            true => Ok(Self::Empty),
            false => Ok(Self::Owned(pairs)),
        }
    }

    /// Returns the value of the first parameter named `key`.
    #[inline]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| value)
    }

    /// Parameters in request order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        let pairs = match self {
            Self::Empty => &[][..],
            Self::Owned(pairs) => pairs.as_slice(),
        };
        pairs.iter().map(|(k, v)| (&k[..], &v[..]))
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Owned(pairs) => pairs.len(),
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Query-string parse failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The number of parameters exceeded the configured limit.
    OverLimit(usize),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OverLimit(limit) => {
                write!(f, "Query parameter limit exceeded: limit={}", limit)
            }
        }
    }
}
