//! Length-prefixed TCP transport.
//!
//! Every frame on the wire is a big-endian `u32` byte count followed by
//! that many bytes. Frames larger than the configured maximum terminate the
//! connection.

use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::listener::Listener;
use crate::tls::{BoxedStream, TlsAcceptor};
use crate::{Connection, ConnectionId, Transport, TransportError};

type FrameStream = Framed<BoxedStream, LengthDelimitedCodec>;

/// A TCP [`Transport`] that speaks length-prefixed frames.
pub struct FramedTransport {
    listener: Listener<FramedConnection>,
}

impl FramedTransport {
    /// Binds a new framed transport to the given address.
    ///
    /// When `tls` is set, every accepted stream is wrapped in TLS before any
    /// frame is read.
    pub async fn bind(
        addr: &str,
        tls: Option<TlsAcceptor>,
        max_frame_bytes: usize,
    ) -> Result<Self, TransportError> {
        let secure = tls.is_some();
        let listener = Listener::bind(addr, tls, move |stream, id| async move {
            Ok(FramedConnection::new(id, stream, max_frame_bytes))
        })
        .await?;
        tracing::info!(addr = %listener.local_addr(), secure, "framed transport listening");
        Ok(Self { listener })
    }
}

impl Transport for FramedTransport {
    type Connection = FramedConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        self.listener.next().await
    }

    fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    fn shutdown(&self) {
        self.listener.shutdown();
    }
}

/// A single length-prefixed connection.
pub struct FramedConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<FrameStream, Bytes>>,
    stream: Mutex<SplitStream<FrameStream>>,
}

impl FramedConnection {
    fn new(id: ConnectionId, io: BoxedStream, max_frame_bytes: usize) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .max_frame_length(max_frame_bytes)
            .new_codec();
        let (sink, stream) = Framed::new(io, codec).split();
        Self {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl Connection for FramedConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.stream.lock().await.next().await {
            Some(Ok(frame)) => Ok(Some(frame.to_vec())),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e)),
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
