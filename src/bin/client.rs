//! HTTP Tunnel Client
//!
//! Opens one tunnel channel and pipes it through stdio:
//! - stdin is written to the channel
//! - inbound channel bytes are copied to stdout
//!
//! Logs go to stderr so stdout carries only tunnel data.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use http_tunnel::{
    config::{generate_example_config, Config},
    crypto::generate_key_base64,
    protocol::{AuthEncoder, AuthFrame, SealedAuthEncoder},
    transport::HttpExchanger,
    tunnel::{new_http_channel, ChannelSettings, RemoteChannel, TunnelError},
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, trace, warn};

/// Read buffer size for both directions
const BUF_SIZE: usize = 16 * 1024;

/// Pause after a failed read before pulling again
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

/// HTTP Tunnel Client - duplex stream over HTTP push/pull
#[derive(Parser, Debug)]
#[command(name = "http-tunnel-client")]
#[command(about = "HTTP Tunnel Client - pipes stdio through an HTTP tunnel channel")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Write an example configuration with a fresh auth key and exit
    #[arg(long)]
    generate_config: bool,

    /// Server base URL (overrides config)
    #[arg(short, long)]
    address: Option<String>,

    /// Channel index; negative values open a control channel
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    index: i64,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        return generate_config(&args.config);
    }

    // Load configuration; a missing file means defaults
    let config_found = Path::new(&args.config).exists();
    let config = if config_found {
        Config::load(&args.config).context("Failed to load configuration")?
    } else {
        Config::default()
    };

    // Initialize logging
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    if !config_found {
        warn!("Config file {} not found, using defaults", args.config);
    }

    let address = args
        .address
        .clone()
        .or_else(|| Some(config.address.clone()).filter(|a| !a.is_empty()))
        .ok_or_else(|| anyhow!("No server address given (use --address or set address in config)"))?;

    if config.auth_key.is_empty() {
        error!("Auth key not configured");
        return Err(anyhow!("Missing auth_key in config"));
    }
    let encoder =
        Arc::new(SealedAuthEncoder::from_base64(&config.auth_key).context("Invalid auth_key")?);

    let settings = ChannelSettings::from_config(&config)?;
    let exchanger =
        Arc::new(HttpExchanger::new(&config.transport).context("Failed to build HTTP client")?);

    info!("HTTP Tunnel Client v{}", http_tunnel::VERSION);
    info!("Server: {}", address);
    info!("Channel index: {}", args.index);
    info!(
        "Upload mode: {}",
        if settings.chunk_push { "chunk push" } else { "one-shot" }
    );

    let remote = Arc::new(
        new_http_channel(&address, args.index, settings, exchanger, encoder.clone())
            .await
            .context("Failed to open tunnel channel")?,
    );
    info!("Tunnel channel open");

    let writer = tokio::spawn(pump_stdin(Arc::clone(&remote), encoder));
    let reader = tokio::spawn(pump_stdout(Arc::clone(&remote)));

    tokio::select! {
        result = writer => {
            match result {
                Ok(Ok(())) => info!("Input finished"),
                Ok(Err(e)) => error!("Writer error: {:#}", e),
                Err(e) => error!("Writer task failed: {}", e),
            }
        }
        result = reader => {
            match result {
                Ok(Ok(())) => info!("Output closed"),
                Ok(Err(e)) => error!("Reader error: {:#}", e),
                Err(e) => error!("Reader task failed: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    remote.io().close().await.ok();
    Ok(())
}

fn generate_config(path: &str) -> Result<()> {
    let mut config = generate_example_config();
    config.auth_key = generate_key_base64().context("Failed to generate auth key")?;
    config.save(path).context("Failed to save config")?;

    println!("Example configuration written to {}", path);
    println!("Share this auth key with the server: {}", config.auth_key);
    Ok(())
}

/// Copy stdin into the channel until EOF
async fn pump_stdin(remote: Arc<RemoteChannel>, encoder: Arc<SealedAuthEncoder>) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        let n = stdin.read(&mut buf).await.context("Failed to read stdin")?;
        if n == 0 {
            return Ok(());
        }

        // One-shot uploads carry no framing of their own
        let payload = if remote.options.write_join_auth {
            let auth = encoder.encode(&AuthFrame::new(remote.index, 0))?;
            let mut joined = Vec::with_capacity(auth.len() + n);
            joined.extend_from_slice(&auth);
            joined.extend_from_slice(&buf[..n]);
            joined
        } else {
            buf[..n].to_vec()
        };

        remote
            .io()
            .write(&payload)
            .await
            .context("Failed to write to tunnel")?;
        trace!("Sent {} bytes", n);
    }
}

/// Copy inbound channel bytes to stdout
async fn pump_stdout(remote: Arc<RemoteChannel>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        match remote.io().read(&mut buf).await {
            Ok(0) => trace!("Inbound body finished"),
            Ok(n) => {
                stdout
                    .write_all(&buf[..n])
                    .await
                    .context("Failed to write stdout")?;
                stdout.flush().await.context("Failed to flush stdout")?;
            }
            Err(TunnelError::ReadTimeout) => debug!("No inbound data, pulling again"),
            Err(e) => {
                warn!("Tunnel read failed: {}", e);
                tokio::time::sleep(READ_RETRY_DELAY).await;
            }
        }
    }
}
