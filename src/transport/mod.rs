//! Transport layer: discrete HTTP request/response exchanges
//!
//! Provides:
//! - The [`Exchanger`] seam every tunnel leg talks through
//! - Obfuscated request construction ([`RequestBuilder`])
//! - One-retry execution for full-body exchanges ([`send_with_retry`])
//! - A `reqwest` backed exchanger ([`HttpExchanger`])

mod client;
mod exchange;
mod request;

#[cfg(test)]
pub(crate) mod mock;

pub use client::HttpExchanger;
pub use exchange::send_with_retry;
pub use request::RequestBuilder;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use std::fmt;
use std::io;
use std::pin::Pin;
use thiserror::Error;
use url::Url;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Server rejected exchange with status {0}")]
    Rejected(StatusCode),

    #[error("Connection closed")]
    Closed,
}

/// A body delivered chunk by chunk
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Outbound request body
pub enum RequestBody {
    /// Fully buffered payload sent with an exact Content-Length
    Full(Bytes),
    /// Payload of unknown length, produced while the exchange is in flight
    Streaming(BodyStream),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// One outbound exchange
#[derive(Debug)]
pub struct ExchangeRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ExchangeRequest {
    /// Exact body length, if the body is fully buffered
    pub fn content_length(&self) -> Option<u64> {
        match &self.body {
            RequestBody::Full(bytes) => Some(bytes.len() as u64),
            RequestBody::Streaming(_) => None,
        }
    }

    /// Duplicate the request for a retry; streaming bodies cannot be replayed
    pub fn try_clone(&self) -> Option<Self> {
        match &self.body {
            RequestBody::Full(bytes) => Some(Self {
                method: self.method.clone(),
                url: self.url.clone(),
                headers: self.headers.clone(),
                body: RequestBody::Full(bytes.clone()),
            }),
            RequestBody::Streaming(_) => None,
        }
    }
}

/// Response to one exchange
pub struct ExchangeResponse {
    pub status: StatusCode,
    /// Declared body length; `None` when unknown (chunked)
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl ExchangeResponse {
    /// Build a response around an in-memory body
    pub fn from_bytes(status: StatusCode, body: Option<Bytes>) -> Self {
        match body {
            Some(bytes) => Self {
                status,
                content_length: Some(bytes.len() as u64),
                body: Box::pin(stream::once(async move { Ok(bytes) })),
            },
            None => Self {
                status,
                content_length: Some(0),
                body: Box::pin(stream::empty()),
            },
        }
    }

    /// The body, unless the response declared it empty
    pub fn into_inbound(self) -> Option<BodyStream> {
        if self.content_length == Some(0) {
            None
        } else {
            Some(self.body)
        }
    }
}

impl fmt::Debug for ExchangeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Executes single HTTP exchanges
///
/// Implementations must not check the status code; callers decide what a
/// failed status means for their leg.
#[async_trait]
pub trait Exchanger: Send + Sync {
    /// Send the request and return once response headers arrive
    async fn execute(&self, request: ExchangeRequest) -> Result<ExchangeResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_try_clone_only_for_full_bodies() {
        let full = ExchangeRequest {
            method: Method::POST,
            url: Url::parse("http://example.com/http/push").unwrap(),
            headers: HeaderMap::new(),
            body: RequestBody::Full(Bytes::from_static(b"abc")),
        };
        assert_eq!(full.content_length(), Some(3));
        assert!(full.try_clone().is_some());

        let streaming = ExchangeRequest {
            body: RequestBody::Streaming(Box::pin(stream::empty())),
            ..full
        };
        assert_eq!(streaming.content_length(), None);
        assert!(streaming.try_clone().is_none());
    }

    #[tokio::test]
    async fn test_empty_response_has_no_inbound_body() {
        let empty = ExchangeResponse::from_bytes(StatusCode::OK, None);
        assert!(empty.into_inbound().is_none());

        let full = ExchangeResponse::from_bytes(StatusCode::OK, Some(Bytes::from_static(b"hi")));
        let mut body = full.into_inbound().unwrap();
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"hi"));
        assert!(body.next().await.is_none());
    }
}
