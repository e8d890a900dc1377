use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Cache-relevant parts of a request, folded into its [`CacheKey`](crate::CacheKey).
///
/// The executor adds the normalized method and URL itself, under `__method` and `__url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CacheComponents(Map<String, Value>);

impl CacheComponents {
    /// No components yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one component.
    pub fn insert<T: Serialize + ?Sized>(&mut self, name: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(Error::Serialization)?;
        self.0.insert(name.into(), value);
        Ok(())
    }

    /// Builder form of [`CacheComponents::insert`]
    pub fn with<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    /// Component by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub(crate) fn insert_value(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_owned(), value);
    }
}

impl From<Map<String, Value>> for CacheComponents {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// What to fetch: method, path relative to the configured base URL, headers and body.
///
/// Requests without cache components bypass the cache entirely.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
    pub(crate) cache_components: Option<CacheComponents>,
}

impl ResourceRequest {
    /// Request with an empty body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            cache_components: None,
        }
    }

    /// Same as `ResourceRequest::new(Method::GET, path)`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Same as `ResourceRequest::new(Method::POST, path)`
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Adds a header, keeping earlier values of the same name
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Raw request body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `body` as JSON and sets `Content-Type` accordingly.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = serde_json::to_vec(body).map_err(Error::Serialization)?;
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }

    /// Makes the request cacheable under a key derived from `components`
    pub fn cache(mut self, components: CacheComponents) -> Self {
        self.cache_components = Some(components);
        self
    }

    /// Request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the base URL
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Cache components, if the request is cacheable
    pub fn cache_components(&self) -> Option<&CacheComponents> {
        self.cache_components.as_ref()
    }
}
