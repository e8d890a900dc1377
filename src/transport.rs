use crate::error::BoxError;

/// Request as handed to the middleware pipeline and the transport
pub type HttpRequest = http::Request<Vec<u8>>;

/// Response as returned by the transport, with the body fully read
pub type HttpResponse = http::Response<Vec<u8>>;

/// Innermost handler of the pipeline: performs the actual network round trip.
///
/// Timeouts belong here, the layers above never cancel a call.
pub trait Transport: Send + Sync {
    /// Sends the request and returns whatever the origin answered, error statuses included.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError>;
}

impl<F> Transport for F
where
    F: Fn(HttpRequest) -> Result<HttpResponse, BoxError> + Send + Sync,
{
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        self(request)
    }
}

#[cfg(feature = "reqwest")]
pub use self::blocking::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod blocking {
    use super::{HttpRequest, HttpResponse, Transport};
    use crate::error::BoxError;

    /// [`Transport`] on top of reqwest's blocking client.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::blocking::Client,
    }

    impl ReqwestTransport {
        /// Uses a preconfigured client, e.g. one with timeouts set
        pub fn new(client: reqwest::blocking::Client) -> Self {
            Self { client }
        }
    }

    impl Transport for ReqwestTransport {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
            let request = reqwest::blocking::Request::try_from(request)?;
            let response = self.client.execute(request)?;

            let mut builder = http::Response::builder()
                .status(response.status())
                .version(response.version());
            if let Some(headers) = builder.headers_mut() {
                headers.extend(response.headers().iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            let body = response.bytes()?.to_vec();
            Ok(builder.body(body)?)
        }
    }
}
