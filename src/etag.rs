use http::header::ETAG;
use http::HeaderMap;
use std::fmt;

/// Opaque validator sent back as `If-None-Match` when revalidating.
///
/// The value is kept verbatim, quotes and `W/` prefix included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Etag(Box<str>);

impl Etag {
    /// Wraps a validator token as received
    pub fn new(value: impl Into<Box<str>>) -> Self {
        Self(value.into())
    }

    /// Value of the first non-empty `ETag` header, if any.
    pub fn from_response(headers: &HeaderMap) -> Option<Self> {
        headers
            .get_all(ETAG)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(Self::new)
    }

    /// The raw validator
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
