use http::{HeaderMap, Method, StatusCode, Uri};
use thiserror::Error;

/// Any error a pipeline handler or collaborator may return.
///
/// Errors that downcast to [`Error`] are domain errors and pass through the
/// pipeline unchanged; anything else becomes [`Error::Unexpected`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of every fallible operation of this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure a caller of [`HttpExecutor`](crate::HttpExecutor) can observe.
#[derive(Debug, Error)]
pub enum Error {
    /// Cache key components could not be serialized.
    #[error("cache key components are not serializable: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A relative-time expression could not be parsed.
    #[error("invalid expiration: {0:?}")]
    InvalidExpiration(String),

    /// The base URL and request path do not form an absolute URL.
    #[error("invalid request URL {path:?}: {source}")]
    InvalidUrl {
        /// Path that was joined onto the base URL
        path: String,
        /// Why joining failed
        #[source]
        source: url::ParseError,
    },

    /// The origin answered `404 Not Found`.
    #[error("not found: {}", .0.message)]
    NotFound(Box<HttpErrorContext>),

    /// The origin answered with a 4xx status other than 404.
    #[error("bad request ({}): {}", .0.status(), .0.message)]
    BadRequest(Box<HttpErrorContext>),

    /// The origin answered with a 5xx status.
    #[error("server error ({}): {}", .0.status(), .0.message)]
    Server(Box<HttpErrorContext>),

    /// The response body could not be decoded or hydrated.
    #[error("hydration failed: {0}")]
    Hydration(#[source] BoxError),

    /// Anything else that escaped the pipeline.
    #[error("unexpected error: {0}")]
    Unexpected(#[source] BoxError),
}

impl Error {
    /// `true` for the kinds derived from an HTTP error status.
    pub fn is_http(&self) -> bool {
        self.http_context().is_some()
    }

    /// Request, response and extracted message of an HTTP error kind.
    pub fn http_context(&self) -> Option<&HttpErrorContext> {
        match self {
            Self::NotFound(ctx) | Self::BadRequest(ctx) | Self::Server(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Status code of an HTTP error kind.
    pub fn status(&self) -> Option<StatusCode> {
        self.http_context().map(HttpErrorContext::status)
    }

    /// Turns an error returned by a pipeline handler back into a domain error.
    ///
    /// Domain errors are unboxed as-is, anything else is wrapped in [`Error::Unexpected`].
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<Self>() {
            Ok(domain) => *domain,
            Err(other) => Self::Unexpected(other),
        }
    }
}

/// What went over the wire when the origin answered with an error status.
#[derive(Debug)]
pub struct HttpErrorContext {
    pub(crate) request: RequestSummary,
    pub(crate) response: http::Response<Vec<u8>>,
    pub(crate) message: String,
}

impl HttpErrorContext {
    /// Method, URI and headers of the failed request
    pub fn request(&self) -> &RequestSummary {
        &self.request
    }

    /// The full error response, body included
    pub fn response(&self) -> &http::Response<Vec<u8>> {
        &self.response
    }

    /// Message extracted from the response body
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Same as `response().status()`
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }
}

/// Body-less copy of an outgoing request, kept for error reporting.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    /// Request method
    pub method: Method,
    /// Absolute request URI
    pub uri: Uri,
    /// Request headers as sent to the transport
    pub headers: HeaderMap,
}

impl<B> From<&http::Request<B>> for RequestSummary {
    fn from(req: &http::Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
        }
    }
}
