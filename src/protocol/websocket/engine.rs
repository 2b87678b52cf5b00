//! WebSocket protocol engine.
//!
//! # Responsibilities
//! - Validate upgrade requests and answer with `101 Switching Protocols`
//! - Allocate session ids and track live sessions
//! - Hand new sessions to the application
//! - Fan frames out to every live session
//!
//! # Design Decisions
//! - Sessions are registered only after the 101 response is flushed
//! - Registration is removed by a drop guard, so cancellation and panics in
//!   the application callback still clean up the table

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::assembler::DEFAULT_MAX_FRAME_SIZE;
use super::frame::{encode_frame, OpCode};
use super::handshake::{switching_protocols, websocket_key};
use super::session::{self, Session, SessionSender};
use crate::net::rewind::RawSocket;
use crate::net::sniff::UpgradeRequest;
use crate::observability::metrics;
use crate::protocol::Protocol;
use crate::routing::Captures;

/// Callback invoked with every new session.
pub type SessionCallback = Arc<dyn Fn(Session) + Send + Sync>;

/// A WebSocket endpoint that can be mounted on one or more upgrade routes.
pub struct WebSocket {
    name: String,
    next_id: AtomicU64,
    sessions: DashMap<u64, SessionSender>,
    on_session: Option<SessionCallback>,
    max_frame_size: usize,
}

impl WebSocket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(0),
            sessions: DashMap::new(),
            on_session: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Limit for a single frame or reassembled message.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Register the callback that receives new sessions.
    pub fn on_session<F>(mut self, callback: F) -> Self
    where
        F: Fn(Session) + Send + Sync + 'static,
    {
        self.on_session = Some(Arc::new(callback));
        self
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Write handle of a live session.
    pub fn session(&self, id: u64) -> Option<SessionSender> {
        self.sessions.get(&id).map(|s| s.value().clone())
    }

    /// Send a text message to every live session; returns how many accepted it.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        self.broadcast(encode_frame(OpCode::Text, text.as_bytes())).await
    }

    pub async fn broadcast_binary(&self, data: &[u8]) -> usize {
        self.broadcast(encode_frame(OpCode::Binary, data)).await
    }

    /// Push one encoded frame to every live session.
    pub async fn broadcast(&self, frame: Bytes) -> usize {
        let senders: Vec<SessionSender> = self.sessions.iter().map(|s| s.value().clone()).collect();
        let mut delivered = 0;
        for sender in senders {
            match sender.send_frame(frame.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(protocol = %self.name, session_id = sender.id(), error = %e, "Broadcast skipped session");
                }
            }
        }
        delivered
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn accept(self: Arc<Self>, request: UpgradeRequest, mut socket: RawSocket, captures: Captures) {
        let Some(key) = websocket_key(&request).map(str::to_owned) else {
            tracing::debug!(protocol = %self.name, path = %request.path, "Not a WebSocket handshake, ignoring");
            return;
        };

        let response = switching_protocols(&key);
        if let Err(e) = write_response(&mut socket, response.as_bytes()).await {
            tracing::warn!(protocol = %self.name, path = %request.path, error = %e, "Handshake write failed");
            return;
        }

        let id = self.next_id();
        let (reader, writer) = tokio::io::split(socket);
        let sender = SessionSender::new(id, writer);
        let _registration = Registration::new(&self, sender.clone());

        tracing::info!(protocol = %self.name, session_id = id, path = %request.path, "WebSocket session opened");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Session::new(request, captures, sender.clone(), events_rx);
        match &self.on_session {
            Some(callback) => callback(session),
            None => tracing::debug!(protocol = %self.name, session_id = id, "No session callback registered"),
        }

        session::run(reader, sender, events_tx, self.max_frame_size).await;

        tracing::info!(protocol = %self.name, session_id = id, "WebSocket session closed");
    }
}

impl Protocol for WebSocket {
    fn name(&self) -> &str {
        &self.name
    }

    fn upgrade(
        self: Arc<Self>,
        request: UpgradeRequest,
        socket: RawSocket,
        captures: Captures,
    ) -> BoxFuture<'static, ()> {
        Box::pin(self.accept(request, socket, captures))
    }
}

async fn write_response(socket: &mut RawSocket, response: &[u8]) -> std::io::Result<()> {
    socket.write_all(response).await?;
    socket.flush().await
}

/// Keeps a session in the engine's table for as long as it lives.
struct Registration<'a> {
    engine: &'a WebSocket,
    id: u64,
}

impl<'a> Registration<'a> {
    fn new(engine: &'a WebSocket, sender: SessionSender) -> Self {
        let id = sender.id();
        engine.sessions.insert(id, sender);
        metrics::websocket_session_opened();
        Self { engine, id }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.engine.sessions.remove(&self.id);
        metrics::websocket_session_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::websocket::frame::tests::client_frame;
    use crate::protocol::websocket::frame::FrameHeader;
    use crate::protocol::websocket::session::SessionEvent;
    use tokio::io::{AsyncReadExt, DuplexStream};

    const KEY: [u8; 4] = [1, 2, 3, 4];

    fn upgrade_request(key: Option<&str>) -> UpgradeRequest {
        let mut headers = vec![
            ("connection".to_string(), "Upgrade".to_string()),
            ("upgrade".to_string(), "websocket".to_string()),
        ];
        if let Some(key) = key {
            headers.push(("sec-websocket-key".to_string(), key.to_string()));
        }
        UpgradeRequest {
            method: "GET".into(),
            path: "/ws".into(),
            version: "HTTP/1.1".into(),
            headers,
        }
    }

    async fn read_head(client: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            client.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    async fn read_frame(client: &mut DuplexStream) -> (FrameHeader, Vec<u8>) {
        let mut head = [0u8; 2];
        client.read_exact(&mut head).await.unwrap();
        let (header, _) = FrameHeader::decode(&head).unwrap().unwrap();
        let mut payload = vec![0u8; header.payload_len as usize];
        client.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    fn engine_with_channel() -> (Arc<WebSocket>, mpsc::UnboundedReceiver<Session>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = WebSocket::new("test").on_session(move |session| {
            let _ = tx.send(session);
        });
        (Arc::new(engine), rx)
    }

    #[tokio::test]
    async fn test_handshake_and_echo() {
        let (engine, mut sessions) = engine_with_channel();
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(engine.clone().upgrade(
            upgrade_request(Some("dGhlIHNhbXBsZSBub25jZQ==")),
            RawSocket::boxed(server, Bytes::new()),
            Captures::default(),
        ));

        let head = read_head(&mut client).await;
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        let mut session = sessions.recv().await.unwrap();
        assert_eq!(session.id(), 0);
        assert_eq!(engine.session_count(), 1);

        client
            .write_all(&client_frame(true, OpCode::Text, b"hi", KEY))
            .await
            .unwrap();
        match session.recv().await.unwrap() {
            SessionEvent::Text(text) => assert_eq!(text, "hi"),
            other => panic!("unexpected {other:?}"),
        }

        session.text("reply: hi").await.unwrap();
        let (header, payload) = read_frame(&mut client).await;
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.mask, None);
        assert_eq!(payload, b"reply: hi");

        drop(client);
        task.await.unwrap();
        assert_eq!(engine.session_count(), 0);
        assert!(session.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (engine, mut sessions) = engine_with_channel();
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(engine.upgrade(
            upgrade_request(Some("a2V5")),
            RawSocket::boxed(server, Bytes::new()),
            Captures::default(),
        ));
        read_head(&mut client).await;
        let mut session = sessions.recv().await.unwrap();

        client
            .write_all(&client_frame(true, OpCode::Ping, b"beat", KEY))
            .await
            .unwrap();

        let (header, payload) = read_frame(&mut client).await;
        assert_eq!(header.opcode, OpCode::Pong);
        assert_eq!(payload, b"beat");
        assert!(matches!(session.recv().await, Some(SessionEvent::Ping(p)) if &p[..] == b"beat"));
    }

    #[tokio::test]
    async fn test_close_replies_going_away() {
        let (engine, mut sessions) = engine_with_channel();
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(engine.clone().upgrade(
            upgrade_request(Some("a2V5")),
            RawSocket::boxed(server, Bytes::new()),
            Captures::default(),
        ));
        read_head(&mut client).await;
        let mut session = sessions.recv().await.unwrap();

        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"done");
        client
            .write_all(&client_frame(true, OpCode::Close, &payload, KEY))
            .await
            .unwrap();

        let (header, payload) = read_frame(&mut client).await;
        assert_eq!(header.opcode, OpCode::Close);
        assert_eq!(&payload[..2], &1001u16.to_be_bytes());

        match session.recv().await.unwrap() {
            SessionEvent::Close { code, reason } => {
                assert_eq!(code, Some(1000));
                assert_eq!(reason, "done");
            }
            other => panic!("unexpected {other:?}"),
        }
        task.await.unwrap();
        assert_eq!(engine.session_count(), 0);
    }

    #[tokio::test]
    async fn test_leftover_bytes_after_handshake_are_frames() {
        let (engine, mut sessions) = engine_with_channel();
        let (mut client, server) = tokio::io::duplex(4096);
        let early = client_frame(true, OpCode::Binary, &[7, 7], KEY);
        tokio::spawn(engine.upgrade(
            upgrade_request(Some("a2V5")),
            RawSocket::boxed(server, Bytes::from(early)),
            Captures::default(),
        ));
        read_head(&mut client).await;
        let mut session = sessions.recv().await.unwrap();
        assert!(matches!(session.recv().await, Some(SessionEvent::Binary(b)) if &b[..] == [7, 7]));
    }

    #[tokio::test]
    async fn test_oversized_frame_delivers_earlier_messages_first() {
        let (tx, mut sessions) = mpsc::unbounded_channel();
        let engine = Arc::new(WebSocket::new("small").max_frame_size(16).on_session(move |session| {
            let _ = tx.send(session);
        }));
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(engine.upgrade(
            upgrade_request(Some("a2V5")),
            RawSocket::boxed(server, Bytes::new()),
            Captures::default(),
        ));
        read_head(&mut client).await;
        let mut session = sessions.recv().await.unwrap();

        let mut wire = client_frame(true, OpCode::Text, b"ok", KEY);
        wire.extend(client_frame(true, OpCode::Binary, &[0u8; 32], KEY));
        client.write_all(&wire).await.unwrap();

        assert!(matches!(session.recv().await, Some(SessionEvent::Text(t)) if t == "ok"));
        assert!(matches!(
            session.recv().await,
            Some(SessionEvent::Error(crate::protocol::websocket::WebSocketError::FrameTooLarge { len: 32, max: 16 }))
        ));

        let (header, payload) = read_frame(&mut client).await;
        assert_eq!(header.opcode, OpCode::Close);
        assert_eq!(&payload[..2], &1009u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_unknown_opcode_event() {
        let (engine, mut sessions) = engine_with_channel();
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(engine.upgrade(
            upgrade_request(Some("a2V5")),
            RawSocket::boxed(server, Bytes::new()),
            Captures::default(),
        ));
        read_head(&mut client).await;
        let mut session = sessions.recv().await.unwrap();

        client
            .write_all(&client_frame(true, OpCode::Reserved(5), b"x", KEY))
            .await
            .unwrap();
        assert!(matches!(
            session.recv().await,
            Some(SessionEvent::Unknown { opcode: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_ignored() {
        let (engine, mut sessions) = engine_with_channel();
        let (mut client, server) = tokio::io::duplex(4096);

        engine
            .clone()
            .upgrade(
                upgrade_request(None),
                RawSocket::boxed(server, Bytes::new()),
                Captures::default(),
            )
            .await;

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
        assert!(sessions.try_recv().is_err());
        assert_eq!(engine.session_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session() {
        let (engine, mut sessions) = engine_with_channel();
        let mut clients = Vec::new();
        for _ in 0..3 {
            let (mut client, server) = tokio::io::duplex(4096);
            tokio::spawn(engine.clone().upgrade(
                upgrade_request(Some("a2V5")),
                RawSocket::boxed(server, Bytes::new()),
                Captures::default(),
            ));
            read_head(&mut client).await;
            sessions.recv().await.unwrap();
            clients.push(client);
        }
        assert_eq!(engine.session_count(), 3);

        assert_eq!(engine.broadcast_text("all").await, 3);
        for client in &mut clients {
            let (_, payload) = read_frame(client).await;
            assert_eq!(payload, b"all");
        }
    }
}
