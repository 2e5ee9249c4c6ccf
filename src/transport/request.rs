//! Request construction with browser-like headers

use super::{BodyStream, ExchangeRequest, RequestBody, TransportError};
use crate::protocol::{PULL_PERIOD_HEADER, SPOOFED_CONTENT_TYPE};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use url::Url;

/// Builds push and pull exchanges
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    user_agent: Option<HeaderValue>,
}

impl RequestBuilder {
    /// Create a builder; an empty User-Agent means the header is omitted
    pub fn new(user_agent: Option<&str>) -> Result<Self, TransportError> {
        let user_agent = match user_agent {
            Some(ua) if !ua.is_empty() => Some(
                HeaderValue::from_str(ua)
                    .map_err(|_| TransportError::InvalidHeader(ua.to_string()))?,
            ),
            _ => None,
        };
        Ok(Self { user_agent })
    }

    /// POST with the spoofing headers shared by every exchange
    pub fn build(&self, url: &Url, body: RequestBody) -> ExchangeRequest {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(SPOOFED_CONTENT_TYPE));
        if let Some(ua) = &self.user_agent {
            headers.insert(USER_AGENT, ua.clone());
        }

        ExchangeRequest {
            method: Method::POST,
            url: url.clone(),
            headers,
            body,
        }
    }

    /// Non-streaming upload carrying `payload` as given
    pub fn push(&self, url: &Url, payload: Bytes) -> ExchangeRequest {
        self.build(url, RequestBody::Full(payload))
    }

    /// Streaming upload whose body is produced while the exchange runs
    pub fn push_stream(&self, url: &Url, body: BodyStream) -> ExchangeRequest {
        self.build(url, RequestBody::Streaming(body))
    }

    /// Poll whose body is exactly the auth frame
    ///
    /// `hold_secs` tells the server how long it may park the request
    /// waiting for inbound data.
    pub fn pull(&self, url: &Url, auth: Bytes, hold_secs: u64) -> ExchangeRequest {
        let mut request = self.build(url, RequestBody::Full(auth));
        request.headers.insert(
            HeaderName::from_static(PULL_PERIOD_HEADER),
            HeaderValue::from(hold_secs),
        );
        request
    }
}
