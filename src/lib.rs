#![warn(missing_docs)]
#![deny(unconditional_recursion)]
//! Fetches JSON resources over HTTP and caches the hydrated results, honoring the
//! `no-store`, `no-cache`, `max-age` and `s-maxage` response directives and revalidating
//! stale entries with `If-None-Match`.
//!
//! Requests pass through a priority-ordered [`MiddlewareStack`] before they reach the
//! [`Transport`]; error statuses come back as typed [`Error`]s.
//!
//! ```
//! use http_cache_executor::{
//!     BoxError, CacheComponents, ExecutorOptions, HttpExecutor, HttpRequest, HttpResponse,
//!     MemoryStorage, ResourceRequest, SerdeHydrator,
//! };
//!
//! #[derive(serde::Deserialize)]
//! struct Banner { title: String }
//!
//! let transport = |_req: HttpRequest| -> Result<HttpResponse, BoxError> {
//!     Ok(http::Response::builder()
//!         .header("cache-control", "max-age=60")
//!         .body(br#"{"title":"Spring sale"}"#.to_vec())?)
//! };
//! let options = ExecutorOptions::new("https://cms.example.com/api/".parse().unwrap());
//! let executor = HttpExecutor::builder(options, transport, SerdeHydrator::new().register::<Banner>())
//!     .storage(MemoryStorage::new())
//!     .build()
//!     .unwrap();
//!
//! let request = ResourceRequest::get("banners/home")
//!     .cache(CacheComponents::new().with("placement", "home").unwrap());
//! let banner = executor.fetch::<Banner>(request).unwrap();
//! assert_eq!(banner.title, "Spring sale");
//! ```

mod cache_control;
mod error;
mod etag;
mod executor;
mod expiration;
mod hydrate;
mod key;
pub mod middleware;
mod request;
mod response;
mod storage;
mod transport;

pub use crate::cache_control::CacheControlHeader;
pub use crate::error::{BoxError, Error, HttpErrorContext, RequestSummary, Result};
pub use crate::etag::Etag;
pub use crate::executor::{ExecutorOptions, HttpExecutor, HttpExecutorBuilder};
pub use crate::expiration::{Expiration, ExpiresIn};
pub use crate::hydrate::{Hydrator, SerdeHydrator, TargetType};
pub use crate::key::CacheKey;
pub use crate::middleware::{
    Handler, HeaderInjectionMiddleware, Middleware, MiddlewareStack, ResponseExceptionMiddleware,
    UnexpectedErrorMiddleware,
};
pub use crate::request::{CacheComponents, ResourceRequest};
pub use crate::response::{CachedResponse, Payload};
pub use crate::storage::{CacheStorage, MemoryStorage, NullStorage, StorageError, StorageResult};
#[cfg(feature = "reqwest")]
pub use crate::transport::ReqwestTransport;
pub use crate::transport::{HttpRequest, HttpResponse, Transport};
