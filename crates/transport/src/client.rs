use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;

pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpClient {
    /// HTTP/1.1 client with connection reuse.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Client that speaks HTTP/2 prior knowledge only.
    pub fn http2_only() -> Self {
        Self::build(true)
    }

    fn build(http2_only: bool) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .http2_only(http2_only)
            .build(http);

        Self { client }
    }

    pub async fn send(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        self.client.request(req).await
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
