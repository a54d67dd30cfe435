//! WebSocket transport: bridges raw connections to document sessions.
//!
//! A connection names its room in the URI path (last segment) and its
//! participant in the `sessionId` query parameter:
//!
//! ```text
//! ws://host:port/connect/<room-id>?sessionId=<participant-id>
//! ```
//!
//! The adapter validates the participant id *before* touching the registry —
//! a malformed connect must never load or create a room — then attaches the
//! participant through a socket facade. The facade's `send` drops frames once
//! the connection is gone and its `close` swallows errors, so transport
//! faults never reach the session.

use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use tabula_engine::ParticipantSocket;

use crate::registry::RoomRegistry;

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    total: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
}

/// Decrements the active-connection gauge on every exit path.
struct ActiveGuard(Arc<AtomicServerStats>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The WebSocket collaboration server.
#[derive(Clone)]
pub struct CollabServer {
    registry: Arc<RoomRegistry>,
    stats: Arc<AtomicServerStats>,
}

impl CollabServer {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    /// Bind and serve forever.
    pub async fn run(&self, bind_addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("Collab server listening on {addr}");
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, registry, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total.load(Ordering::Relaxed),
            active_connections: self.stats.active.load(Ordering::Relaxed),
            rejected_connections: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Outbound facade handed to the session for one participant.
///
/// Frames go through an unbounded channel drained by the connection's writer
/// task; once that task is gone the sends become no-ops.
struct WsParticipantSocket {
    tx: mpsc::UnboundedSender<Message>,
    /// Set when the *session* closes this socket (room closed, or this
    /// participant id was taken over by a newer connection). The connection
    /// handler must then not report a disconnect: the session has already
    /// detached this socket, and the id may belong to someone else now.
    detached: Arc<AtomicBool>,
}

impl ParticipantSocket for WsParticipantSocket {
    fn send(&self, payload: &[u8]) {
        let _ = self.tx.send(Message::Binary(payload.to_vec().into()));
    }

    fn close(&self, code: u16, reason: &str) {
        self.detached.store(true, Ordering::SeqCst);
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.tx.send(Message::Close(Some(frame)));
    }
}

/// Split a request path-and-query into `(room_id, participant_id)`.
///
/// The room id is the last path segment; the participant id is the
/// `sessionId` query parameter.
fn parse_connect_uri(path_and_query: &str) -> (String, Option<String>) {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let room_id = path.rsplit('/').next().unwrap_or("").to_string();

    let participant_id = query.and_then(|query| {
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "sessionId" && !value.is_empty()).then(|| value.to_string())
        })
    });

    (room_id, participant_id)
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<RoomRegistry>,
    stats: Arc<AtomicServerStats>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Capture the request URI during the handshake; it carries the room and
    // participant identifiers.
    let mut uri = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        uri = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        Ok(resp)
    })
    .await?;

    stats.total.fetch_add(1, Ordering::Relaxed);
    stats.active.fetch_add(1, Ordering::Relaxed);
    let _active = ActiveGuard(stats.clone());

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (room_id, participant_id) = parse_connect_uri(&uri);

    let participant_id = match participant_id {
        Some(id) => id,
        None => {
            log::warn!("Connection from {addr} carries no sessionId; rejecting");
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            reject(&mut ws_sender, "No sessionId provided").await;
            return Ok(());
        }
    };

    if room_id.is_empty() {
        log::warn!("Connection from {addr} names no room; rejecting");
        stats.rejected.fetch_add(1, Ordering::Relaxed);
        reject(&mut ws_sender, "No room provided").await;
        return Ok(());
    }

    log::info!("Connect from {addr}: room={room_id} participant={participant_id}");

    let session = match registry.get_or_create(&room_id).await {
        Ok(session) => session,
        Err(e) => {
            log::error!("Failed to acquire room {room_id} for {addr}: {e}");
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            reject(&mut ws_sender, "Failed to create/load room").await;
            return Ok(());
        }
    };

    // Writer task: drains the facade channel into the sink. A Close frame is
    // terminal for the connection.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let terminal = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || terminal {
                break;
            }
        }
    });

    let detached = Arc::new(AtomicBool::new(false));
    session.handle_connect(
        &participant_id,
        Box::new(WsParticipantSocket {
            tx: tx.clone(),
            detached: detached.clone(),
        }),
    );

    // Reader loop: every inbound payload goes to the session tagged with this
    // connection's participant id, whatever the frame claims.
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => session.handle_message(&participant_id, &data),
            Ok(Message::Text(text)) => session.handle_message(&participant_id, text.as_bytes()),
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::debug!("Connection closed by {addr}");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("WebSocket error from {addr}: {e}");
                break;
            }
        }
    }

    if !detached.load(Ordering::SeqCst) {
        session.handle_disconnect(&participant_id);
    }
    log::info!("Disconnect from {addr}: room={room_id} participant={participant_id}");

    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// Terminal rejection of a freshly upgraded connection. Best effort — the
/// peer may already be gone.
async fn reject<S>(sender: &mut S, reason: &str)
where
    S: SinkExt<Message> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_string().into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_uri() {
        let (room, participant) = parse_connect_uri("/connect/demo?sessionId=p1");
        assert_eq!(room, "demo");
        assert_eq!(participant.as_deref(), Some("p1"));
    }

    #[test]
    fn test_parse_missing_session_id() {
        let (room, participant) = parse_connect_uri("/connect/demo");
        assert_eq!(room, "demo");
        assert_eq!(participant, None);
    }

    #[test]
    fn test_parse_empty_session_id() {
        let (_, participant) = parse_connect_uri("/connect/demo?sessionId=");
        assert_eq!(participant, None);
    }

    #[test]
    fn test_parse_extra_query_params() {
        let (room, participant) =
            parse_connect_uri("/connect/board-7?token=abc&sessionId=p2&v=1");
        assert_eq!(room, "board-7");
        assert_eq!(participant.as_deref(), Some("p2"));
    }

    #[test]
    fn test_parse_room_is_last_segment() {
        let (room, _) = parse_connect_uri("/api/v2/connect/deep-room?sessionId=x");
        assert_eq!(room, "deep-room");
    }

    #[test]
    fn test_parse_empty_room() {
        let (room, _) = parse_connect_uri("/?sessionId=p1");
        assert_eq!(room, "");
    }
}
