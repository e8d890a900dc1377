//! Priority-ordered request/response interceptors.
//!
//! A [`MiddlewareStack`] is composed once into a single [`Handler`]. The middleware with
//! the highest priority is the outermost layer: it sees the request first and the
//! response (or error) last.

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde_json::Value;
use std::any::Any;
use std::cmp::Reverse;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::error::{BoxError, Error, HttpErrorContext, RequestSummary};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// One step of the composed call chain
pub type Handler = Arc<dyn Fn(HttpRequest) -> Result<HttpResponse, BoxError> + Send + Sync>;

/// An interceptor around the rest of the pipeline.
pub trait Middleware: Send + Sync {
    /// Unique, human-readable name
    fn name(&self) -> &str;

    /// Higher runs earlier on the way in and later on the way out
    fn priority(&self) -> i32;

    /// Returns a handler that does this middleware's work around `next`.
    fn wrap(&self, next: Handler) -> Handler;
}

/// Immutable, priority-sorted set of middlewares.
///
/// Adding returns a new stack and leaves the original untouched.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    // descending priority, insertion order among equals
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    /// Stack without any middleware; requests go straight to the transport
    pub fn new() -> Self {
        Self::default()
    }

    /// [`UnexpectedErrorMiddleware`] and [`ResponseExceptionMiddleware`]
    pub fn with_defaults() -> Self {
        Self::new()
            .with(UnexpectedErrorMiddleware)
            .with(ResponseExceptionMiddleware)
    }

    /// A new stack that also contains `middleware`.
    ///
    /// A middleware with the same name is replaced.
    #[must_use]
    pub fn with<M: Middleware + 'static>(&self, middleware: M) -> Self {
        self.with_shared(Arc::new(middleware))
    }

    /// Same as [`MiddlewareStack::with`] for an already shared middleware
    #[must_use]
    pub fn with_shared(&self, middleware: Arc<dyn Middleware>) -> Self {
        let mut middlewares: Vec<_> = self
            .middlewares
            .iter()
            .filter(|m| m.name() != middleware.name())
            .cloned()
            .collect();
        middlewares.push(middleware);
        middlewares.sort_by_key(|m| Reverse(m.priority()));
        Self { middlewares }
    }

    /// A new stack without the middleware called `name`
    #[must_use]
    pub fn without(&self, name: &str) -> Self {
        Self {
            middlewares: self
                .middlewares
                .iter()
                .filter(|m| m.name() != name)
                .cloned()
                .collect(),
        }
    }

    /// Middlewares by descending priority
    pub fn iter(&self) -> impl Iterator<Item = &dyn Middleware> + '_ {
        self.middlewares.iter().map(|m| &**m)
    }

    /// Names by descending priority
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|m| m.name()).collect()
    }

    /// Number of middlewares
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// No middleware at all
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Composes the stack around `transport` into one handler.
    pub fn build(&self, transport: Arc<dyn Transport>) -> Handler {
        let innermost: Handler = Arc::new(move |request: HttpRequest| transport.send(request));
        // wrap lowest priority first, so the highest ends up outermost
        self.middlewares
            .iter()
            .rev()
            .fold(innermost, |next, middleware| middleware.wrap(next))
    }
}

impl fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|m| (m.name(), m.priority())))
            .finish()
    }
}

/// Turns anything that is not a domain error, panics included, into [`Error::Unexpected`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnexpectedErrorMiddleware;

impl UnexpectedErrorMiddleware {
    /// Outermost of the reference middlewares
    pub const PRIORITY: i32 = 100;
}

impl Middleware for UnexpectedErrorMiddleware {
    fn name(&self) -> &str {
        "unexpected_error"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(move |request: HttpRequest| -> Result<HttpResponse, BoxError> {
            let uri = request.uri().clone();
            match panic::catch_unwind(AssertUnwindSafe(|| next(request))) {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => {
                    let err = Error::from_boxed(err);
                    if let Error::Unexpected(cause) = &err {
                        warn!(%uri, error = %cause, "unexpected error in request pipeline");
                    }
                    Err(err.into())
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    warn!(%uri, %message, "request pipeline panicked");
                    Err(Error::Unexpected(message.into()).into())
                }
            }
        })
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(s) => *s,
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map_or_else(|| "request handler panicked".to_owned(), |s| (*s).to_owned()),
    }
}

/// Raises [`Error::NotFound`], [`Error::BadRequest`] or [`Error::Server`] for responses with status 400 and above.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseExceptionMiddleware;

impl ResponseExceptionMiddleware {
    /// Right inside [`UnexpectedErrorMiddleware`]
    pub const PRIORITY: i32 = 90;
}

impl Middleware for ResponseExceptionMiddleware {
    fn name(&self) -> &str {
        "response_exception"
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(move |request: HttpRequest| -> Result<HttpResponse, BoxError> {
            let summary = RequestSummary::from(&request);
            let response = next(request)?;
            if response.status().as_u16() < 400 {
                return Ok(response);
            }
            Err(http_error(summary, response).into())
        })
    }
}

/// Maps an error response to its error kind, extracting a message from the body.
fn http_error(request: RequestSummary, response: HttpResponse) -> Error {
    let status = response.status();
    let message = error_message(&response);
    let ctx = Box::new(HttpErrorContext { request, response, message });
    if status == StatusCode::NOT_FOUND {
        Error::NotFound(ctx)
    } else if status.as_u16() >= 500 {
        Error::Server(ctx)
    } else {
        Error::BadRequest(ctx)
    }
}

/// JSON bodies carry the message in `data.error` (4xx) or `message` (5xx).
/// Anything else, or a JSON body without that field, yields the raw body text.
fn error_message(response: &HttpResponse) -> String {
    let raw = || String::from_utf8_lossy(response.body()).into_owned();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    if !is_json {
        return raw();
    }
    let Ok(body) = serde_json::from_slice::<Value>(response.body()) else {
        return raw();
    };
    let pointer = if response.status().as_u16() >= 500 {
        "/message"
    } else {
        "/data/error"
    };
    match body.pointer(pointer) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => raw(),
        Some(other) => other.to_string(),
    }
}

/// Sets a fixed header, e.g. an origin identifier, on every outgoing request.
#[derive(Debug, Clone)]
pub struct HeaderInjectionMiddleware {
    name: String,
    header: HeaderName,
    values: Vec<HeaderValue>,
    priority: i32,
}

impl HeaderInjectionMiddleware {
    /// Default priority, inside the error handling middlewares
    pub const PRIORITY: i32 = 80;

    /// Named `header:<header-name>`. An existing value of the same header is overwritten.
    pub fn new(header: HeaderName, value: HeaderValue) -> Self {
        Self::with_values(header, [value])
    }

    /// Same as [`HeaderInjectionMiddleware::new`] for a multi-valued header. All values are
    /// sent, in order, and replace whatever the request carried for that header.
    pub fn with_values(header: HeaderName, values: impl IntoIterator<Item = HeaderValue>) -> Self {
        Self {
            name: format!("header:{header}"),
            header,
            values: values.into_iter().collect(),
            priority: Self::PRIORITY,
        }
    }

    /// Changes where in the pipeline the header is added
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the generated name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Middleware for HeaderInjectionMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn wrap(&self, next: Handler) -> Handler {
        let header = self.header.clone();
        let values = self.values.clone();
        Arc::new(move |mut request: HttpRequest| -> Result<HttpResponse, BoxError> {
            let headers = request.headers_mut();
            headers.remove(&header);
            for value in &values {
                headers.append(header.clone(), value.clone());
            }
            next(request)
        })
    }
}
