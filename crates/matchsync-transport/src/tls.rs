//! TLS termination for the server side of every transport.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls;

use crate::TransportError;

pub use tokio_rustls::TlsAcceptor;

/// Any bidirectional byte stream a transport can frame.
pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A plaintext or TLS stream, type-erased so transports don't care which.
pub(crate) type BoxedStream = Box<dyn AsyncStream>;

/// Builds a TLS acceptor from a PEM certificate chain and a PEM private key.
///
/// The key may be PKCS#1, PKCS#8 or SEC1; the first key in the file wins.
pub fn load_tls_acceptor(
    cert_path: &Path,
    key_path: &Path,
) -> Result<TlsAcceptor, TransportError> {
    let cert_file = File::open(cert_path).map_err(|e| {
        TransportError::Tls(format!("certificate file {}: {e}", cert_path.display()))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("parse certificate: {e}")))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key_file = File::open(key_path).map_err(|e| {
        TransportError::Tls(format!("private key file {}: {e}", key_path.display()))
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| TransportError::Tls(format!("parse private key: {e}")))?
        .ok_or_else(|| {
            TransportError::Tls(format!("no private key found in {}", key_path.display()))
        })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    tracing::info!(cert = %cert_path.display(), "TLS certificate loaded");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Wraps a freshly accepted TCP stream in TLS when an acceptor is configured.
pub(crate) async fn secure(
    stream: TcpStream,
    tls: Option<&TlsAcceptor>,
) -> Result<BoxedStream, TransportError> {
    match tls {
        Some(acceptor) => {
            let stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| TransportError::HandshakeFailed(format!("tls: {e}")))?;
            Ok(Box::new(stream))
        }
        None => Ok(Box::new(stream)),
    }
}
