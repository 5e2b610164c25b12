//! `matchsync` server binary.
//!
//! Usage: `matchsync [config.toml]`. Without an argument the file named by
//! `MATCHSYNC_CONFIG` is used, or the built-in defaults. Log verbosity
//! follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;

use matchsync::prelude::*;
use matchsync::{Codec, Transport};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "matchsync failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), MatchsyncError> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(path.as_deref())?;
    tracing::info!(
        bind = %config.bind,
        transport = ?config.transport,
        codec = ?config.codec,
        tick_interval_ms = config.tick_interval_ms,
        idle_timeout_secs = config.idle_timeout_secs,
        auth = ?config.auth.mode,
        tls = config.tls.is_some(),
        "configuration loaded"
    );
    if config.auth.mode == AuthMode::Dev {
        tracing::warn!("development token verification is enabled");
    }

    let builder = MatchServerBuilder::from_config(&config)?;
    let verifier = config.auth.verifier();
    match (config.transport, config.codec) {
        (TransportKind::Tcp, CodecKind::Bincode) => {
            serve(builder.build_tcp(verifier, BincodeCodec).await?).await
        }
        (TransportKind::Tcp, CodecKind::Json) => {
            serve(builder.build_tcp(verifier, JsonCodec).await?).await
        }
        (TransportKind::Websocket, CodecKind::Bincode) => {
            serve(builder.build_websocket(verifier, BincodeCodec).await?).await
        }
        (TransportKind::Websocket, CodecKind::Json) => {
            serve(builder.build_websocket(verifier, JsonCodec).await?).await
        }
    }
}

async fn serve<T, V, K>(server: MatchServer<T, V, K>) -> Result<(), MatchsyncError>
where
    T: Transport,
    V: TokenVerifier,
    K: Codec,
{
    tracing::info!(addr = %server.local_addr(), "listening");
    server.run().await
}
