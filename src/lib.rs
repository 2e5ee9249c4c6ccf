//! # HTTP Tunnel
//!
//! A persistent, bidirectional byte stream emulated over plain HTTP
//! request/response exchanges, for networks that block raw sockets but let
//! ordinary web traffic through.
//!
//! ## Features
//!
//! - **Pull leg**: inbound bytes arrive as response bodies of held polls
//! - **Push leg**: outbound bytes go out as one-shot posts or as one
//!   long-lived streaming upload per reconnect period
//! - **Rolling IV**: every exchange opens with a sealed `{index, iv}` frame
//! - **Browser-like requests**: spoofed content type and user agent
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Channel Registry                     │
//! │        (RemoteChannel, session framing, auth)       │
//! ├─────────────────────────────────────────────────────┤
//! │                   Tunnel Layer                       │
//! │   (TunnelChannel, FrameQueue, UploadLeg, polls)     │
//! ├─────────────────────────────────────────────────────┤
//! │                  Protocol Layer                      │
//! │          (AuthFrame sealing, wire constants)         │
//! ├─────────────────────────────────────────────────────┤
//! │                 Transport Layer                      │
//! │     (RequestBuilder, one-retry exchange, reqwest)    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod obfuscation;
pub mod protocol;
pub mod transport;
pub mod tunnel;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Configuration error: {0}")]
    Config(String),
}
