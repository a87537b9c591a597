//! Outbound HTTP plumbing used by the failover agent.

use std::future::Future;

use bytes::Bytes;
use http::Request;
use http_body_util::Full;

pub mod client;
pub mod pool;

pub use client::HttpClient;
pub use pool::{HttpTransport, TransportError};

/// Sends one fully addressed request and reports the outcome.
///
/// The request URI already carries the scheme and authority of the chosen
/// backend. Any response counts as success; only a request that could not be
/// completed is an error.
pub trait Transport: Send + Sync {
    type Response: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    fn send(
        &self,
        req: Request<Full<Bytes>>,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send;
}
