use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use tokio::sync::Semaphore;

use crate::{Transport, client::HttpClient};

#[derive(Debug)]
pub enum TransportError {
    Send(hyper_util::client::legacy::Error),
    Timeout(Duration),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Send(err) => write!(f, "send failed: {err}"),
            TransportError::Timeout(after) => {
                write!(f, "request timed out after {}ms", after.as_millis())
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Send(err) => Some(err),
            TransportError::Timeout(_) => None,
        }
    }
}

/// Shared client with a request deadline and a cap on concurrent requests
/// per backend authority.
pub struct HttpTransport {
    client: HttpClient,
    timeout: Duration,
    max_inflight: usize,
    inflight: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HttpTransport {
    pub fn new(client: HttpClient, timeout: Duration, max_inflight: usize) -> Self {
        Self {
            client,
            timeout,
            max_inflight: max_inflight.max(1),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn limiter(&self, authority: &str) -> Arc<Semaphore> {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight
            .entry(authority.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_inflight)))
            .clone()
    }
}

impl Transport for HttpTransport {
    type Response = Response<Incoming>;
    type Error = TransportError;

    async fn send(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, TransportError> {
        let authority = req
            .uri()
            .authority()
            .map(|authority| authority.as_str())
            .unwrap_or_default();
        let limiter = self.limiter(authority);

        // the deadline covers queueing for a permit as well as the exchange
        let exchange = async move {
            // limiters are never closed, so the permit is always granted
            let _permit = limiter.acquire_owned().await.ok();
            self.client.send(req).await
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result.map_err(TransportError::Send),
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}
