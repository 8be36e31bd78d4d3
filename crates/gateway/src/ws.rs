use std::{net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use commbridge_protocol::{Envelope, InboundFrame, MAX_PAYLOAD_BYTES, OutboundFrame};

use crate::{channel::ChannelManager, error::BridgeError};

/// Handle a single WebSocket connection through its full lifecycle:
/// message loop → cleanup of every channel it opened.
pub async fn handle_connection(
    socket: WebSocket,
    manager: Arc<ChannelManager>,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let connected_at = Instant::now();
    info!(conn_id = %conn_id, remote_ip = %remote_addr.ip(), "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    // Spawn write loop: forwards frames from the client_tx channel to the WebSocket.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    // ── Message loop ─────────────────────────────────────────────────────

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: payload too large");
            send_error(
                &client_tx,
                None,
                format!(
                    "payload too large ({} bytes, max {MAX_PAYLOAD_BYTES})",
                    text.len()
                ),
            );
            continue;
        }

        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                send_error(&client_tx, None, format!("invalid frame: {e}"));
                continue;
            },
        };

        match frame {
            InboundFrame::CommOpen {
                comm_id,
                target_name,
            } => {
                if let Err(e) = manager
                    .open(&comm_id, &target_name, &conn_id, client_tx.clone())
                    .await
                {
                    send_error(&client_tx, Some(comm_id), e.to_string());
                }
            },
            InboundFrame::CommMsg { comm_id, data } => {
                debug!(
                    conn_id = %conn_id,
                    comm_id = %comm_id,
                    action = %data.action,
                    "ws: received message"
                );
                let envelope = Envelope::new(comm_id.clone(), data.action, data.data);
                if let Err(e) = manager.submit(&conn_id, envelope).await {
                    send_error(&client_tx, Some(comm_id), e.to_string());
                }
            },
            InboundFrame::CommClose { comm_id } => {
                // Closing an unknown id is silent; another connection's is not.
                if !manager.close(&conn_id, &comm_id).await && manager.is_open(&comm_id).await {
                    let err = BridgeError::channel_state(&comm_id);
                    send_error(&client_tx, Some(comm_id), err.to_string());
                }
            },
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    let closed = manager.close_connection(&conn_id).await;
    info!(
        conn_id = %conn_id,
        channels_closed = closed,
        duration_secs = connected_at.elapsed().as_secs(),
        "ws: connection closed"
    );

    drop(client_tx);
    write_handle.abort();
}

fn send_error(tx: &mpsc::UnboundedSender<String>, comm_id: Option<String>, message: String) {
    match serde_json::to_string(&OutboundFrame::error(comm_id, message)) {
        Ok(frame) => {
            let _ = tx.send(frame);
        },
        Err(e) => warn!(error = %e, "ws: failed to serialize error frame"),
    }
}
