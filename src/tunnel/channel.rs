//! Tunnel channel facade
//!
//! A [`TunnelChannel`] looks like a socket to its caller. Inbound bytes come
//! from response bodies of pull exchanges (or any exchange that answers with
//! data); outbound bytes go out either as one-shot push exchanges or through
//! the long-lived upload leg when chunk push is enabled.

use super::inbound::InboundBody;
use super::queue::{frame_queue, FrameSender, QUEUE_CAPACITY};
use super::upload::UploadLeg;
use super::{ChannelSettings, TunnelError};
use crate::protocol::{AuthEncoder, AuthFrame, PULL_PATH, PUSH_PATH};
use crate::transport::{send_with_retry, ExchangeRequest, Exchanger, RequestBuilder};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};
use url::Url;

struct Endpoints {
    push: Url,
    pull: Url,
}

struct UploadHandle {
    sender: FrameSender,
    task: JoinHandle<()>,
}

/// Clears a flag when dropped
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The inbound body and whether a `read` currently holds it
#[derive(Default)]
struct InboundSlot {
    body: Option<InboundBody>,
    reading: bool,
}

/// Marks the end of a body read, even if the read is cancelled
struct ReadingGuard<'a>(&'a ChannelShared);

impl Drop for ReadingGuard<'_> {
    fn drop(&mut self) {
        self.0.inbound.lock().reading = false;
    }
}

/// State shared between the caller, poll tasks and the upload leg
pub(crate) struct ChannelShared {
    pub(crate) addr: String,
    pub(crate) index: i64,
    pub(crate) settings: ChannelSettings,
    pub(crate) requests: RequestBuilder,
    pub(crate) exchanger: Arc<dyn Exchanger>,
    encoder: Arc<dyn AuthEncoder>,
    endpoints: OnceLock<Endpoints>,
    rolling_iv: AtomicU64,
    pulling: AtomicBool,
    pub(crate) pushing: AtomicBool,
    shut_down: AtomicBool,
    inbound: Mutex<InboundSlot>,
    inbound_ready: Notify,
    upload: Mutex<Option<UploadHandle>>,
}

impl ChannelShared {
    fn endpoints(&self) -> Result<&Endpoints, TunnelError> {
        if let Some(endpoints) = self.endpoints.get() {
            return Ok(endpoints);
        }
        let base = Url::parse(&self.addr)?;
        let mut push = base.clone();
        push.set_path(PUSH_PATH);
        let mut pull = base;
        pull.set_path(PULL_PATH);
        Ok(self.endpoints.get_or_init(|| Endpoints { push, pull }))
    }

    /// Auth frame for the current index and rolling IV
    pub(crate) fn encode_auth(&self) -> Result<Bytes, TunnelError> {
        let frame = AuthFrame::new(self.index, self.rolling_iv.load(Ordering::SeqCst));
        Ok(self.encoder.encode(&frame)?)
    }

    /// Make `body` the body `read` drains next, replacing any previous one
    pub(crate) fn install_inbound(&self, body: InboundBody) {
        self.inbound.lock().body = Some(body);
        self.inbound_ready.notify_waiters();
    }

    fn restore_inbound(&self, body: InboundBody) {
        let mut slot = self.inbound.lock();
        if slot.body.is_none() {
            slot.body = Some(body);
        }
    }

    /// Take the body for a read; the slot stays marked as in use
    fn take_for_read(&self) -> Option<InboundBody> {
        let mut slot = self.inbound.lock();
        let body = slot.body.take();
        if body.is_some() {
            slot.reading = true;
        }
        body
    }

    fn clear_inbound(&self) {
        self.inbound.lock().body = None;
    }

    /// A body is waiting or being read
    fn has_inbound(&self) -> bool {
        let slot = self.inbound.lock();
        slot.body.is_some() || slot.reading
    }

    fn upload_sender(&self) -> Option<FrameSender> {
        self.upload.lock().as_ref().map(|upload| upload.sender.clone())
    }

    /// Issue one pull exchange unless one is already in flight
    async fn poll(&self) -> Result<(), TunnelError> {
        let pull_url = self.endpoints()?.pull.clone();
        if self
            .pulling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let _pulling = FlagGuard(&self.pulling);

        let auth = self.encode_auth()?;
        info!("[{}:{}] pull channel start.", self.addr, self.index);
        let request = self
            .requests
            .pull(&pull_url, auth, self.settings.pull_period_secs);
        self.post_url(request).await
    }

    /// One-shot exchange; a response carrying data becomes the inbound body
    async fn post_url(&self, request: ExchangeRequest) -> Result<(), TunnelError> {
        let url = request.url.clone();
        match send_with_retry(self.exchanger.as_ref(), request).await {
            Ok(response) => {
                if let Some(body) = response.into_inbound() {
                    self.install_inbound(InboundBody::new(body));
                }
                Ok(())
            }
            Err(e) => {
                error!(
                    "[{}:{}] Failed to exchange with {} for reason: {}",
                    self.addr, self.index, url, e
                );
                Err(e.into())
            }
        }
    }

    /// Wait for an inbound body, surfacing the error of the triggering poll
    async fn wait_inbound(
        &self,
        mut poll: Option<JoinHandle<Result<(), TunnelError>>>,
    ) -> Result<InboundBody, TunnelError> {
        loop {
            let notified = self.inbound_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(body) = self.take_for_read() {
                return Ok(body);
            }

            let joined = match poll.as_mut() {
                Some(handle) => tokio::select! {
                    joined = handle => Some(joined),
                    _ = &mut notified => None,
                },
                None => {
                    notified.await;
                    None
                }
            };

            if let Some(joined) = joined {
                poll = None;
                if let Ok(Err(e)) = joined {
                    return Err(e);
                }
            }
        }
    }

    fn stop_upload(&self) {
        if let Some(upload) = self.upload.lock().take() {
            upload.task.abort();
            debug!("[{}:{}] upload leg stopped", self.addr, self.index);
        }
    }
}

/// A duplex byte stream emulated over HTTP exchanges
///
/// Reads are single-reader-at-a-time: concurrent `read` calls on one channel
/// may observe each other's inbound body. A body being read still counts as
/// held for [`is_closed`](Self::is_closed).
pub struct TunnelChannel {
    shared: Arc<ChannelShared>,
}

impl TunnelChannel {
    /// Create a channel; nothing touches the network until [`open`](Self::open)
    pub fn new(
        addr: impl Into<String>,
        index: i64,
        settings: ChannelSettings,
        exchanger: Arc<dyn Exchanger>,
        encoder: Arc<dyn AuthEncoder>,
    ) -> Result<Self, TunnelError> {
        let requests = RequestBuilder::new(settings.user_agent.as_deref())?;
        Ok(Self {
            shared: Arc::new(ChannelShared {
                addr: addr.into(),
                index,
                settings,
                requests,
                exchanger,
                encoder,
                endpoints: OnceLock::new(),
                rolling_iv: AtomicU64::new(0),
                pulling: AtomicBool::new(false),
                pushing: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                inbound: Mutex::new(InboundSlot::default()),
                inbound_ready: Notify::new(),
                upload: Mutex::new(None),
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.shared.addr
    }

    pub fn index(&self) -> i64 {
        self.shared.index
    }

    pub fn rolling_iv(&self) -> u64 {
        self.shared.rolling_iv.load(Ordering::SeqCst)
    }

    /// Control channels never start a pull from `read`
    pub fn is_control(&self) -> bool {
        self.shared.index < 0
    }

    /// Whether an upload leg exchange is in flight
    pub fn is_pushing(&self) -> bool {
        self.shared.pushing.load(Ordering::SeqCst)
    }

    /// Resolve endpoints, start the upload leg if enabled, then pull once
    pub async fn open(&self) -> Result<(), TunnelError> {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }
        let push_url = self.shared.endpoints()?.push.clone();

        if self.shared.settings.chunk_push {
            let mut upload = self.shared.upload.lock();
            if upload.is_none() {
                let (sender, queue) = frame_queue(QUEUE_CAPACITY);
                let leg = UploadLeg::new(Arc::clone(&self.shared), queue, push_url);
                let task = tokio::spawn(leg.run());
                *upload = Some(UploadHandle { sender, task });
                debug!(
                    "[{}:{}] upload leg started",
                    self.shared.addr, self.shared.index
                );
            }
        }

        self.shared.poll().await
    }

    /// Issue a pull unless one is already in flight
    pub async fn poll(&self) -> Result<(), TunnelError> {
        self.shared.poll().await
    }

    /// Read inbound bytes
    ///
    /// `Ok(0)` marks the end of the current inbound body; the next call pulls
    /// again. Fails with [`TunnelError::ReadTimeout`] when no body arrives
    /// within the read timeout. The pull itself keeps running after a timeout
    /// and may satisfy a later call.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let poll = if !self.shared.has_inbound() && !self.is_control() {
            let shared = Arc::clone(&self.shared);
            Some(tokio::spawn(async move { shared.poll().await }))
        } else {
            None
        };

        let mut body = timeout(
            self.shared.settings.read_timeout,
            self.shared.wait_inbound(poll),
        )
        .await
        .map_err(|_| TunnelError::ReadTimeout)??;
        let _reading = ReadingGuard(&self.shared);

        match body.read(buf).await {
            Ok(0) => {
                debug!(
                    "[{}:{}] inbound body finished",
                    self.shared.addr, self.shared.index
                );
                Ok(0)
            }
            Ok(n) => {
                self.shared.restore_inbound(body);
                Ok(n)
            }
            Err(e) => {
                debug!(
                    "[{}:{}] inbound body failed: {}",
                    self.shared.addr, self.shared.index, e
                );
                Err(TunnelError::Io(e))
            }
        }
    }

    /// Send `buf` to the server
    ///
    /// With chunk push the bytes are queued for the upload leg and the call
    /// only waits for queue space. Otherwise `buf` is posted as is and the
    /// call returns once the server acknowledged it.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, TunnelError> {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(TunnelError::Closed);
        }

        if self.shared.settings.chunk_push {
            let sender = self.shared.upload_sender().ok_or(TunnelError::NotOpened)?;
            sender.append(Bytes::copy_from_slice(buf)).await?;
            return Ok(buf.len());
        }

        let push_url = self.shared.endpoints()?.push.clone();
        let request = self
            .shared
            .requests
            .push(&push_url, Bytes::copy_from_slice(buf));
        self.shared.post_url(request).await?;
        Ok(buf.len())
    }

    /// Change the rolling IV; an in-flight upload leg is ended so the next
    /// one carries the new value
    pub async fn set_iv(&self, iv: u64) {
        self.shared.rolling_iv.store(iv, Ordering::SeqCst);
        if !self.is_pushing() {
            return;
        }
        if let Some(sender) = self.shared.upload_sender() {
            if let Err(e) = sender.force_close().await {
                debug!(
                    "[{}:{}] could not end upload leg: {}",
                    self.shared.addr, self.shared.index, e
                );
            }
        }
    }

    /// Drop the current inbound body
    pub fn close(&self) -> Result<(), TunnelError> {
        self.shared.clear_inbound();
        Ok(())
    }

    /// True while no inbound body is held or being read
    pub fn is_closed(&self) -> bool {
        !self.shared.has_inbound()
    }

    /// Request/response exchange; this channel never answers one
    pub async fn request(&self, _payload: &[u8]) -> Result<Option<Bytes>, TunnelError> {
        Ok(None)
    }

    /// Stop the upload leg and release the inbound body
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        self.shared.stop_upload();
        self.shared.clear_inbound();
    }
}

impl Drop for TunnelChannel {
    fn drop(&mut self) {
        self.shared.stop_upload();
    }
}

impl std::fmt::Debug for TunnelChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelChannel")
            .field("addr", &self.shared.addr)
            .field("index", &self.shared.index)
            .field("rolling_iv", &self.rolling_iv())
            .finish()
    }
}
