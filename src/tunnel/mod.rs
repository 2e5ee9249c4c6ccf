//! Tunnel layer - a duplex byte stream emulated over HTTP exchanges
//!
//! Provides:
//! - The bounded frame queue feeding streaming uploads
//! - The upload leg worker (push)
//! - The channel facade driving polls (pull) and reads
//! - The registry-facing channel surface

mod channel;
mod inbound;
mod queue;
mod remote;
mod upload;

pub use channel::TunnelChannel;
pub use inbound::InboundBody;
pub use queue::{frame_queue, FrameQueue, FrameSender, QueueEvent, QUEUE_CAPACITY};
pub use remote::{new_http_channel, ChannelOptions, RemoteChannel, RemoteChannelIo};

use crate::config::Config;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Invalid channel address: {0}")]
    InvalidAddress(#[from] url::ParseError),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Server rejected exchange with status {0}")]
    ServerRejected(u16),

    #[error("Channel read timed out")]
    ReadTimeout,

    #[error("Channel not opened")]
    NotOpened,

    #[error("Channel closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<TransportError> for TunnelError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected(status) => TunnelError::ServerRejected(status.as_u16()),
            other => TunnelError::Transport(other),
        }
    }
}

/// Per-channel behaviour, resolved from [`Config`]
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// How long `read` waits for an inbound body
    pub read_timeout: Duration,
    /// Upper bound on the lifetime of one upload leg
    pub reconnect_period: Duration,
    /// Hold hint sent with every pull, in seconds
    pub pull_period_secs: u64,
    /// Stream writes through the upload leg
    pub chunk_push: bool,
    /// User-Agent presented on every exchange
    pub user_agent: Option<String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(crate::config::DEFAULT_PERIOD_SECS),
            reconnect_period: Duration::from_secs(crate::config::DEFAULT_PERIOD_SECS),
            pull_period_secs: crate::config::DEFAULT_PERIOD_SECS,
            chunk_push: false,
            user_agent: None,
        }
    }
}

impl ChannelSettings {
    pub fn from_config(config: &Config) -> Result<Self, crate::Error> {
        Ok(Self {
            read_timeout: config.http.read_timeout(),
            reconnect_period: config.http.reconnect_period(),
            pull_period_secs: config.http.reconnect_period_secs(),
            chunk_push: config.http.chunk_push_enable,
            user_agent: config.effective_user_agent()?,
        })
    }
}
