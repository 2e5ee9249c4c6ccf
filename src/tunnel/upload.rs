//! Upload leg: one long-lived streaming POST at a time
//!
//! The worker sleeps until the frame queue has data, then opens a push
//! exchange whose body is fed from the queue, prefixed with a fresh auth
//! frame. The body ends when a close sentinel is dequeued (rolling IV
//! change) or the reconnect period elapses, which bounds how long any
//! single auth frame stays in use.

use super::channel::ChannelShared;
use super::inbound::InboundBody;
use super::queue::FrameQueue;
use super::TunnelError;
use crate::transport::BodyStream;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// Pause after a failed leg before the next attempt
const RETRY_DELAY: Duration = Duration::from_millis(100);

pub(crate) struct UploadLeg {
    shared: Arc<ChannelShared>,
    queue: FrameQueue,
    push_url: Url,
}

impl UploadLeg {
    pub(crate) fn new(shared: Arc<ChannelShared>, queue: FrameQueue, push_url: Url) -> Self {
        Self {
            shared,
            queue,
            push_url,
        }
    }

    /// Run until every queue sender is gone
    pub(crate) async fn run(mut self) {
        loop {
            if !self.queue.wait_for_data().await {
                debug!(
                    "[{}:{}] frame queue closed, upload leg exiting",
                    self.shared.addr, self.shared.index
                );
                return;
            }

            self.shared.pushing.store(true, Ordering::SeqCst);
            let result = self.push().await;
            self.shared.pushing.store(false, Ordering::SeqCst);

            if let Err(e) = result {
                warn!(
                    "Failed to write data to {} for reason: {}",
                    self.push_url, e
                );
                sleep(RETRY_DELAY).await;
            }
        }
    }

    async fn push(&mut self) -> Result<(), TunnelError> {
        let auth = self.shared.encode_auth()?;
        self.queue.prepend(&auth);

        let handoff = Arc::new(BodyHandoff::default());
        let body: BodyStream = Box::pin(stream::unfold(Arc::clone(&handoff), |handoff| async move {
            let chunk = handoff.next().await?;
            Some((Ok(chunk), handoff))
        }));
        let request = self.shared.requests.push_stream(&self.push_url, body);

        info!(
            "[{}:{}] chunk push channel start.",
            self.shared.addr, self.shared.index
        );

        let exchanger = Arc::clone(&self.shared.exchanger);
        let exchange = exchanger.execute(request);
        tokio::pin!(exchange);
        let deadline = sleep(self.shared.settings.reconnect_period);
        tokio::pin!(deadline);

        let mut body_open = true;
        let result = loop {
            let mut end_body = false;
            tokio::select! {
                result = &mut exchange => break result,
                _ = &mut deadline, if body_open => {
                    debug!(
                        "[{}:{}] reconnect period elapsed, ending upload body",
                        self.shared.addr, self.shared.index
                    );
                    end_body = true;
                }
                chunk = next_for_body(&handoff, &mut self.queue), if body_open => match chunk {
                    Some(chunk) => handoff.offer(chunk),
                    None => {
                        debug!(
                            "[{}:{}] upload body force-closed",
                            self.shared.addr, self.shared.index
                        );
                        end_body = true;
                    }
                },
            }
            if end_body {
                body_open = false;
                handoff.end();
            }
        };

        // A chunk the transport never pulled goes back for the next leg,
        // minus this leg's auth frame if nothing was pulled at all.
        handoff.end();
        if let Some(chunk) = handoff.reclaim() {
            self.queue.prepend(&chunk);
        }
        if !handoff.delivered() {
            self.queue.discard(auth.len());
        }

        let response = result?;
        if response.status != StatusCode::OK {
            return Err(TunnelError::ServerRejected(response.status.as_u16()));
        }

        info!(
            "[{}:{}] chunk push channel stop.",
            self.shared.addr, self.shared.index
        );
        if let Some(body) = response.into_inbound() {
            self.shared.install_inbound(InboundBody::new(body));
        }
        Ok(())
    }
}

/// Wait for the handoff slot to empty, then take the next queued bytes
///
/// Cancel safe: both waits are.
async fn next_for_body(handoff: &BodyHandoff, queue: &mut FrameQueue) -> Option<Bytes> {
    handoff.wait_drained().await;
    queue.next_chunk().await
}

/// Single-chunk slot between the leg and the request body stream
///
/// A chunk counts as sent only once the body stream has taken it, so
/// whatever is still in the slot when the exchange ends can be reclaimed.
#[derive(Default)]
struct BodyHandoff {
    slot: Mutex<Option<Bytes>>,
    ended: AtomicBool,
    delivered: AtomicBool,
    filled: Notify,
    drained: Notify,
}

impl BodyHandoff {
    fn offer(&self, chunk: Bytes) {
        *self.slot.lock() = Some(chunk);
        self.filled.notify_waiters();
    }

    /// No more chunks will be offered; a chunk already in the slot is still handed out
    fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.filled.notify_waiters();
    }

    fn reclaim(&self) -> Option<Bytes> {
        self.slot.lock().take()
    }

    fn delivered(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Next chunk for the transport, `None` once ended and empty
    async fn next(&self) -> Option<Bytes> {
        loop {
            let filled = self.filled.notified();
            tokio::pin!(filled);
            filled.as_mut().enable();

            if let Some(chunk) = self.slot.lock().take() {
                self.delivered.store(true, Ordering::SeqCst);
                self.drained.notify_waiters();
                return Some(chunk);
            }
            if self.ended.load(Ordering::SeqCst) {
                return None;
            }
            filled.await;
        }
    }

    async fn wait_drained(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.slot.lock().is_none() {
                return;
            }
            drained.await;
        }
    }
}
