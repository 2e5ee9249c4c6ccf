//! Registry-facing channel surface
//!
//! The session layer that pools channels drives them through
//! [`RemoteChannelIo`] and reads the per-transport [`ChannelOptions`] to
//! decide how auth frames are joined into payloads.

use super::{ChannelSettings, TunnelChannel, TunnelError};
use crate::protocol::AuthEncoder;
use crate::transport::Exchanger;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Operations a registry performs on a channel
#[async_trait]
pub trait RemoteChannelIo: Send + Sync {
    async fn open(&self) -> Result<(), TunnelError>;
    async fn close(&self) -> Result<(), TunnelError>;
    fn closed(&self) -> bool;
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TunnelError>;
    async fn write(&self, buf: &[u8]) -> Result<usize, TunnelError>;
    async fn set_iv(&self, iv: u64);
    async fn request(&self, payload: &[u8]) -> Result<Option<Bytes>, TunnelError>;
}

#[async_trait]
impl RemoteChannelIo for TunnelChannel {
    async fn open(&self) -> Result<(), TunnelError> {
        TunnelChannel::open(self).await
    }

    async fn close(&self) -> Result<(), TunnelError> {
        TunnelChannel::close(self)
    }

    fn closed(&self) -> bool {
        self.is_closed()
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        TunnelChannel::read(self, buf).await
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TunnelError> {
        TunnelChannel::write(self, buf).await
    }

    async fn set_iv(&self, iv: u64) {
        TunnelChannel::set_iv(self, iv).await
    }

    async fn request(&self, payload: &[u8]) -> Result<Option<Bytes>, TunnelError> {
        TunnelChannel::request(self, payload).await
    }
}

/// How the registry frames data for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Bytes go to the peer without session framing
    pub direct_io: bool,
    /// The registry prefixes its open request with an auth frame
    pub open_join_auth: bool,
    /// The registry prefixes every write with an auth frame
    pub write_join_auth: bool,
}

impl ChannelOptions {
    /// Options for an HTTP channel; streaming uploads carry their own auth
    pub fn http(chunk_push: bool) -> Self {
        Self {
            direct_io: false,
            open_join_auth: false,
            write_join_auth: !chunk_push,
        }
    }
}

/// A channel as the registry holds it
pub struct RemoteChannel {
    pub addr: String,
    pub index: i64,
    pub options: ChannelOptions,
    channel: Box<dyn RemoteChannelIo>,
}

impl RemoteChannel {
    pub fn new(
        addr: impl Into<String>,
        index: i64,
        options: ChannelOptions,
        channel: Box<dyn RemoteChannelIo>,
    ) -> Self {
        Self {
            addr: addr.into(),
            index,
            options,
            channel,
        }
    }

    /// Bring the channel up
    pub async fn init(&self) -> Result<(), TunnelError> {
        debug!("[{}:{}] initializing remote channel", self.addr, self.index);
        self.channel.open().await
    }

    pub fn io(&self) -> &dyn RemoteChannelIo {
        self.channel.as_ref()
    }
}

impl std::fmt::Debug for RemoteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChannel")
            .field("addr", &self.addr)
            .field("index", &self.index)
            .field("options", &self.options)
            .finish()
    }
}

/// Build and initialize an HTTP tunnel channel for `(addr, index)`
pub async fn new_http_channel(
    addr: &str,
    index: i64,
    settings: ChannelSettings,
    exchanger: Arc<dyn Exchanger>,
    encoder: Arc<dyn AuthEncoder>,
) -> Result<RemoteChannel, TunnelError> {
    let options = ChannelOptions::http(settings.chunk_push);
    let channel = TunnelChannel::new(addr, index, settings, exchanger, encoder)?;
    let remote = RemoteChannel::new(addr, index, options, Box::new(channel));
    remote.init().await?;
    Ok(remote)
}
