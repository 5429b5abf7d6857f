//! WebSocket session lifecycle: one connected peer from upgrade through
//! disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use taskcast_broker::{BrokerRegistry, ClientConnection, ProtocolDispatcher};
use taskcast_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;

/// Run a WebSocket session for a connected peer.
///
/// 1. Wraps the socket in a [`ClientConnection`] whose queue is drained by a
///    writer task that also sends periodic Pings
/// 2. Feeds inbound text (or UTF-8 binary) frames to a [`ProtocolDispatcher`]
///    one at a time, in arrival order
/// 3. Ends on close, transport error, heartbeat timeout or server shutdown,
///    then removes the connection's memberships from the registry
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    registry: Arc<BrokerRegistry>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<str>>(config.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(connection_id.clone(), send_tx));
    let dispatcher = ProtocolDispatcher::new(registry, connection.clone());

    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let outbound_conn = connection.clone();
    let outbound_shutdown = shutdown.clone();
    let ping_every = config.heartbeat_interval();
    let pong_timeout = config.heartbeat_timeout();
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive() && outbound_conn.last_pong_elapsed() > pong_timeout {
                        warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                () = outbound_conn.closed() => break,
                () = outbound_shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        outbound_conn.close();
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = connection.closed() => break,
            () = shutdown.cancelled() => break,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(ref t) => Some(t.as_str().to_owned()),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    Some(s.to_string())
                } else {
                    warn!(len = data.len(), "non-UTF8 binary frame dropped");
                    None
                }
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => None,
        };

        if let Some(text) = text {
            let _ = dispatcher.dispatch(&text).await;
        }
    }

    connection.close();
    let removed = dispatcher.disconnect().await;
    outbound.abort();

    info!(
        consumers = removed.consumers,
        publishers = removed.publishers,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection.connected_at.elapsed().as_secs_f64());
}
