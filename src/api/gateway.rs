//! The streaming gateway: relays a browser WebSocket to the session's
//! bridge port on loopback, byte for byte, in both directions.
//!
//! The relay never interprets the forwarded protocol. An unknown session id
//! rejects the upgrade before any handshake happens; a bridge that cannot be
//! reached closes the already-upgraded socket without a structured error
//! (the stream has no in-band error channel).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::session::validate_session_id;

use super::error::ApiError;
use super::PublicState;

pub(super) async fn session_ws(
    State(state): State<PublicState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if validate_session_id(&id).is_err() {
        return ApiError::InvalidSessionId(id).into_response();
    }
    let info = match state.control.get_session(&id).await {
        Ok(Some(info)) => info,
        Ok(None) => return ApiError::SessionNotFound(id).into_response(),
        Err(e) => return e.into_response(),
    };

    // A streaming connection counts as activity, but only as a liveness
    // hint: the relay proceeds whether or not the touch lands.
    let control = state.control.clone();
    let touch_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = control.touch_activity(&touch_id).await {
            tracing::debug!(session = %touch_id, error = %e, "activity touch failed");
        }
    });

    let ws_port = info.ws_port;
    ws.on_upgrade(move |socket| relay(socket, id, ws_port))
}

/// Splice the WebSocket through to the bridge port until either side closes.
async fn relay(socket: WebSocket, session_id: String, port: u16) {
    let stream = match TcpStream::connect(("127.0.0.1", port)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(session = %session_id, port, error = %e, "bridge connection failed");
            // Drop the socket; the client sees the stream close.
            return;
        }
    };
    tracing::debug!(session = %session_id, port, "streaming relay established");

    let (mut tcp_read, mut tcp_write) = stream.into_split();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut buf = vec![0u8; 8192];

    loop {
        tokio::select! {
            // Bridge -> client
            read = tcp_read.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let frame = Message::Binary(Bytes::copy_from_slice(&buf[..n]));
                        if ws_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
            }

            // Client -> bridge
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if tcp_write.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if tcp_write.write_all(text.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(_)) => break,
                }
            }
        }
    }

    tracing::debug!(session = %session_id, "streaming relay closed");
}
