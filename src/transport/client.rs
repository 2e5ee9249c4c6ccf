//! `reqwest` backed exchanger

use super::{BodyStream, ExchangeRequest, ExchangeResponse, Exchanger, RequestBody, TransportError};
use crate::config::TransportSettings;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::io;
use std::time::Duration;

/// HTTP/1.1 exchanger shared by every channel of a registry
#[derive(Debug, Clone)]
pub struct HttpExchanger {
    client: reqwest::Client,
}

impl HttpExchanger {
    /// Build a client from transport settings
    pub fn new(settings: &TransportSettings) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .http1_only()
            .connect_timeout(Duration::from_secs(settings.connect_timeout))
            .pool_idle_timeout(Duration::from_secs(settings.pool_idle_timeout));

        if settings.keepalive_interval > 0 {
            builder = builder.tcp_keepalive(Duration::from_secs(settings.keepalive_interval));
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wrap an existing client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Exchanger for HttpExchanger {
    async fn execute(&self, request: ExchangeRequest) -> Result<ExchangeResponse, TransportError> {
        let body = match request.body {
            RequestBody::Full(bytes) => reqwest::Body::from(bytes),
            RequestBody::Streaming(stream) => reqwest::Body::wrap_stream(stream),
        };

        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let content_length = response.content_length();
        let body: BodyStream = Box::pin(response.bytes_stream().map_err(io::Error::other));

        Ok(ExchangeResponse {
            status,
            content_length,
            body,
        })
    }
}
