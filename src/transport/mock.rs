//! Scripted in-memory exchanger for tests

use super::{ExchangeRequest, ExchangeResponse, Exchanger, RequestBody, TransportError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use url::Url;

/// How the mock answers one exchange on a path
pub(crate) enum MockReply {
    /// Respond with a status and optional body
    Respond { status: u16, body: Option<Bytes> },
    /// Fail at the transport level after reading the body
    Fail,
    /// Wait, then fail without ever polling the request body
    FailUnread(Duration),
    /// Respond 200 with a body that errors after `prefix`
    Broken { prefix: Bytes },
    /// Wait for the gate, then respond 200 with no body
    Hold(Arc<Notify>),
}

impl MockReply {
    pub(crate) fn status(status: u16) -> Self {
        Self::Respond { status, body: None }
    }

    pub(crate) fn body(body: &'static [u8]) -> Self {
        Self::Respond {
            status: 200,
            body: Some(Bytes::from_static(body)),
        }
    }
}

/// A request as the server saw it
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub content_length: Option<u64>,
}

/// Exchange lifecycle notifications
pub(crate) struct MockEvents {
    /// Path of every exchange as soon as it starts
    pub started: mpsc::UnboundedReceiver<String>,
    /// Every exchange once its request body has been fully received
    pub finished: mpsc::UnboundedReceiver<RecordedRequest>,
}

pub(crate) struct MockExchanger {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    log: Mutex<Vec<RecordedRequest>>,
    started: mpsc::UnboundedSender<String>,
    finished: mpsc::UnboundedSender<RecordedRequest>,
}

impl MockExchanger {
    pub(crate) fn new() -> (Arc<Self>, MockEvents) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let mock = Arc::new(Self {
            replies: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            started: started_tx,
            finished: finished_tx,
        });
        let events = MockEvents {
            started: started_rx,
            finished: finished_rx,
        };
        (mock, events)
    }

    /// Queue a reply for the next unanswered exchange on `path`
    ///
    /// Paths without scripted replies answer 200 with an empty body.
    pub(crate) fn script(&self, path: &str, reply: MockReply) {
        self.replies
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    pub(crate) fn request_count(&self, path: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }
}

#[async_trait]
impl Exchanger for MockExchanger {
    async fn execute(&self, request: ExchangeRequest) -> Result<ExchangeResponse, TransportError> {
        let path = request.url.path().to_string();
        let _ = self.started.send(path.clone());

        let reply = self
            .replies
            .lock()
            .get_mut(&path)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(MockReply::status(200));

        if let MockReply::FailUnread(delay) = reply {
            tokio::time::sleep(delay).await;
            let record = RecordedRequest {
                url: request.url,
                headers: request.headers,
                body: Bytes::new(),
                content_length: None,
            };
            self.log.lock().push(record.clone());
            let _ = self.finished.send(record);
            return Err(TransportError::Closed);
        }

        let content_length = request.content_length();
        let body = match request.body {
            RequestBody::Full(bytes) => bytes,
            RequestBody::Streaming(mut stream) => {
                let mut collected = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    collected.extend_from_slice(&chunk?);
                }
                collected.freeze()
            }
        };

        let record = RecordedRequest {
            url: request.url,
            headers: request.headers,
            body,
            content_length,
        };
        self.log.lock().push(record.clone());
        let _ = self.finished.send(record);

        match reply {
            MockReply::Respond { status, body } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Ok(ExchangeResponse::from_bytes(status, body))
            }
            MockReply::Fail | MockReply::FailUnread(_) => Err(TransportError::Closed),
            MockReply::Broken { prefix } => {
                let chunks = vec![
                    Ok(prefix),
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "body reset")),
                ];
                Ok(ExchangeResponse {
                    status: StatusCode::OK,
                    content_length: None,
                    body: Box::pin(stream::iter(chunks)),
                })
            }
            MockReply::Hold(gate) => {
                gate.notified().await;
                Ok(ExchangeResponse::from_bytes(StatusCode::OK, None))
            }
        }
    }
}
