use http::header::IF_NONE_MATCH;
use http::{HeaderMap, HeaderValue, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache_control::CacheControlHeader;
use crate::error::{Error, Result};
use crate::etag::Etag;
use crate::expiration::{Expiration, ExpiresIn};
use crate::hydrate::{Hydrator, TargetType};
use crate::key::CacheKey;
use crate::middleware::{Handler, HeaderInjectionMiddleware, Middleware, MiddlewareStack};
use crate::request::ResourceRequest;
use crate::response::{CachedResponse, Payload};
use crate::storage::{CacheStorage, NullStorage};
use crate::transport::{HttpRequest, Transport};

/// Client-level settings of an [`HttpExecutor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorOptions {
    /// Request paths are resolved against this URL (RFC 3986 reference resolution,
    /// so a base without a trailing `/` loses its last segment).
    pub base_url: Url,
    /// How long storage keeps an entry. Should exceed typical max-age values, so that
    /// stale entries with an ETag stay around for revalidation. Default: one day.
    #[serde(default = "default_storage_ttl")]
    pub storage_ttl: ExpiresIn,
    /// Used instead of the response's own `Cache-Control` when set.
    #[serde(default)]
    pub cache_control_override: Option<CacheControlHeader>,
    /// Added to every outgoing request, one [`HeaderInjectionMiddleware`] per header name
    /// carrying all of its values.
    #[serde(default, with = "http_serde::header_map")]
    pub default_headers: HeaderMap,
}

fn default_storage_ttl() -> ExpiresIn {
    ExpiresIn::Expression("+1 day".into())
}

impl ExecutorOptions {
    /// Defaults for everything but the base URL
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            storage_ttl: default_storage_ttl(),
            cache_control_override: None,
            default_headers: HeaderMap::new(),
        }
    }
}

/// Fetches JSON resources, caching hydrated results according to `Cache-Control`
/// and revalidating stale ones with their ETag.
///
/// Holds no state between calls besides the injected storage. Concurrent calls for
/// the same key are not coalesced; each may hit the network and store its own result.
pub struct HttpExecutor {
    options: ExecutorOptions,
    storage: Arc<dyn CacheStorage>,
    hydrator: Arc<dyn Hydrator>,
    middlewares: MiddlewareStack,
    handler: Handler,
}

impl HttpExecutor {
    /// Starts building an executor. Storage defaults to [`NullStorage`], middlewares to
    /// [`MiddlewareStack::with_defaults`].
    pub fn builder(
        options: ExecutorOptions,
        transport: impl Transport + 'static,
        hydrator: impl Hydrator + 'static,
    ) -> HttpExecutorBuilder {
        HttpExecutorBuilder {
            options,
            transport: Arc::new(transport),
            hydrator: Arc::new(hydrator),
            storage: Arc::new(NullStorage),
            middlewares: MiddlewareStack::with_defaults(),
        }
    }

    /// Settings this executor was built with
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// The composed middlewares, outermost first
    pub fn middlewares(&self) -> &MiddlewareStack {
        &self.middlewares
    }

    /// Performs one request and returns the hydrated payload, from cache when possible.
    ///
    /// Storage failures never fail the request; they are logged and treated as a miss
    /// or a skipped save.
    pub fn request(&self, request: ResourceRequest, target: TargetType) -> Result<Payload> {
        let ResourceRequest {
            method,
            path,
            headers,
            body,
            cache_components,
        } = request;

        let url = self
            .options
            .base_url
            .join(&path)
            .map_err(|source| Error::InvalidUrl { path, source })?;

        let key = match cache_components {
            Some(mut components) => {
                components.insert_value("__method", Value::from(method.as_str()));
                components.insert_value("__url", Value::from(url.as_str()));
                let key = CacheKey::compute(&components)?;
                debug!(%key, %method, %url, "computed cache key");
                Some(key)
            }
            None => None,
        };

        let cached = key.as_ref().and_then(|key| self.lookup(key));
        if let Some(fresh) = cached.as_ref().filter(|c| c.is_fresh()) {
            debug!(key = %fresh.key(), "serving fresh cached response");
            return Ok(Arc::clone(fresh.payload()));
        }
        // anything still in `cached` is stale from here on
        let stale = cached;

        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| Error::Unexpected(e.into()))?;
        let mut http_request = HttpRequest::new(body);
        *http_request.method_mut() = method;
        *http_request.uri_mut() = uri;
        *http_request.headers_mut() = headers;

        if let Some(etag) = stale.as_ref().and_then(CachedResponse::etag) {
            match HeaderValue::from_str(etag.as_str()) {
                Ok(value) => {
                    debug!(%etag, "revalidating stale cached response");
                    http_request.headers_mut().insert(IF_NONE_MATCH, value);
                }
                Err(_) => warn!(%etag, "cached etag is not a valid header value, not revalidating"),
            }
        }

        let response = (self.handler)(http_request).map_err(Error::from_boxed)?;

        let cache_control = match &self.options.cache_control_override {
            Some(cc) => cc.clone(),
            None => CacheControlHeader::from_headers(response.headers()),
        };

        let not_modified = response.status() == StatusCode::NOT_MODIFIED;
        let (payload, previous_etag) = match stale {
            Some(previous) if not_modified => {
                debug!(key = %previous.key(), "origin confirmed cached response");
                (Arc::clone(previous.payload()), previous.etag().cloned())
            }
            _ => (self.hydrate(target, response.body())?, None),
        };

        let Some(key) = key else {
            return Ok(payload);
        };
        if cache_control.is_no_store() {
            debug!(%key, "response is no-store, not caching");
            return Ok(payload);
        }

        let max_age = Expiration::create(i64::try_from(cache_control.max_age_seconds()).unwrap_or(i64::MAX))?;
        let ttl = Expiration::create(self.options.storage_ttl.clone())?;
        let etag = Etag::from_response(response.headers()).or(previous_etag);
        debug!(%key, max_age = max_age.timestamp(), ttl = ttl.timestamp(), ?etag, "storing response");
        self.save(CachedResponse::new(key, Arc::clone(&payload), max_age, etag), ttl);

        Ok(payload)
    }

    /// Typed form of [`HttpExecutor::request`].
    pub fn fetch<T: Any + Send + Sync>(&self, request: ResourceRequest) -> Result<Arc<T>> {
        self.request(request, TargetType::of::<T>())?
            .downcast::<T>()
            .map_err(|_| {
                Error::Hydration(format!("hydrator did not produce a {}", any::type_name::<T>()).into())
            })
    }

    fn hydrate(&self, target: TargetType, body: &[u8]) -> Result<Payload> {
        let decoded: Value = serde_json::from_slice(body).map_err(|e| Error::Hydration(e.into()))?;
        self.hydrator.hydrate(target, decoded).map_err(Error::Hydration)
    }

    fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
        match self.storage.get(key) {
            Ok(found) => {
                debug!(%key, hit = found.is_some(), "cache lookup");
                found
            }
            Err(error) => {
                warn!(%key, %error, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn save(&self, response: CachedResponse, ttl: Expiration) {
        let key = response.key().clone();
        if let Err(error) = self.storage.save(response, ttl) {
            warn!(%key, %error, "storing cached response failed");
        }
    }
}

impl fmt::Debug for HttpExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExecutor")
            .field("options", &self.options)
            .field("middlewares", &self.middlewares)
            .finish_non_exhaustive()
    }
}

/// Collects the collaborators of an [`HttpExecutor`]. See [`HttpExecutor::builder`].
pub struct HttpExecutorBuilder {
    options: ExecutorOptions,
    transport: Arc<dyn Transport>,
    hydrator: Arc<dyn Hydrator>,
    storage: Arc<dyn CacheStorage>,
    middlewares: MiddlewareStack,
}

impl HttpExecutorBuilder {
    /// Where cached responses are kept
    pub fn storage(mut self, storage: impl CacheStorage + 'static) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    /// Adds a middleware to the default stack
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares = self.middlewares.with(middleware);
        self
    }

    /// Replaces the whole middleware stack, defaults included
    pub fn middlewares(mut self, middlewares: MiddlewareStack) -> Self {
        self.middlewares = middlewares;
        self
    }

    /// Composes the pipeline.
    ///
    /// Fails with [`Error::InvalidExpiration`] if the configured storage TTL doesn't parse.
    pub fn build(self) -> Result<HttpExecutor> {
        Expiration::create(self.options.storage_ttl.clone())?;

        let mut middlewares = self.middlewares;
        let defaults = &self.options.default_headers;
        for name in defaults.keys() {
            let values = defaults.get_all(name).iter().cloned();
            middlewares = middlewares.with(HeaderInjectionMiddleware::with_values(name.clone(), values));
        }
        let handler = middlewares.build(self.transport);

        Ok(HttpExecutor {
            options: self.options,
            storage: self.storage,
            hydrator: self.hydrator,
            middlewares,
            handler,
        })
    }
}
