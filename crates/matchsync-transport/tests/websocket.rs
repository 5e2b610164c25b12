//! Integration tests for the WebSocket transport.
//!
//! These tests spin up a real WebSocket server and client to verify
//! that frames actually flow over the network.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use matchsync_transport::{Connection, Transport, WebSocketTransport};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds a plaintext transport on an OS-assigned port.
    async fn bind() -> WebSocketTransport {
        WebSocketTransport::bind("127.0.0.1:0", None)
            .await
            .expect("should bind")
    }

    async fn connect_client(transport: &WebSocketTransport) -> ClientWs {
        let url = format!("ws://{}", transport.local_addr());
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let mut transport = bind().await;
        let mut client_ws = connect_client(&transport).await;
        let server_conn = transport.accept().await.expect("should accept");

        assert!(server_conn.id().into_inner() > 0);

        // --- Server sends, client receives ---
        server_conn
            .send(b"hello from server")
            .await
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"hello from server");

        // --- Client sends, server receives ---
        client_ws
            .send(Message::Binary(b"hello from client".to_vec().into()))
            .await
            .unwrap();
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"hello from client");

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let mut transport = bind().await;
        let mut client_ws = connect_client(&transport).await;
        let server_conn = transport.accept().await.expect("should accept");

        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_send_not_blocked_by_pending_recv() {
        let mut transport = bind().await;
        let mut client_ws = connect_client(&transport).await;
        let server_conn = Arc::new(transport.accept().await.expect("should accept"));

        let reader = Arc::clone(&server_conn);
        let pending = tokio::spawn(async move { reader.recv().await });

        // Give the reader time to park inside recv.
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), server_conn.send(b"tick"))
            .await
            .expect("send must not wait for recv")
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"tick");

        client_ws.send(Message::Close(None)).await.unwrap();
        let result = pending.await.unwrap().expect("recv should not error");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_websocket_failed_handshake_does_not_stall_accept() {
        let mut transport = bind().await;

        // A raw TCP client that never speaks HTTP.
        let _silent = tokio::net::TcpStream::connect(transport.local_addr())
            .await
            .unwrap();

        let mut client_ws = connect_client(&transport).await;
        let server_conn = tokio::time::timeout(Duration::from_secs(2), transport.accept())
            .await
            .expect("accept should not wait on the silent peer")
            .expect("should accept");

        server_conn.send(b"ok").await.unwrap();
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"ok");
    }
}
