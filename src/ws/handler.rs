//! WebSocket upgrade handler

use std::borrow::Cow;
use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::{headers::UserAgent, TypedHeader};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::ws::broadcast::Outbound;
use crate::ws::connection::{admit, terminate};
use crate::ws::identity::{ConnectionId, Identity};
use crate::ws::protocol::CloseReason;
use crate::ws::router::{handle_message, ConnectionContext, Flow};

/// Frames buffered per connection before broadcasts start dropping
const OUTBOUND_QUEUE: usize = 256;
/// How long the writer gets to flush after the reader stops
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// WebSocket upgrade handler
///
/// The user-agent check runs before the upgrade is attempted.
pub async fn ws_handler(
    user_agent: Option<TypedHeader<UserAgent>>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_agent = match user_agent {
        Some(TypedHeader(agent)) if !agent.as_str().trim().is_empty() => agent.as_str().to_string(),
        _ => {
            warn!("WebSocket upgrade without user agent");
            return (StatusCode::BAD_REQUEST, "User-Agent header is missing").into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state, user_agent)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, user_agent: String) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

    let id = admit(&state, Identity::new(user_agent), outbound_tx);

    let mut writer = tokio::spawn(write_outbound(ws_sink, outbound_rx, id.clone()));
    let ticker = tokio::spawn(state.rate_limiter.clone().run_window_ticks(id.clone()));

    let mut ctx = ConnectionContext::new(id.clone());
    let idle_timeout = state.config.idle_timeout;

    loop {
        let next = match tokio::time::timeout(idle_timeout, ws_stream.next()).await {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(_) => {
                info!(connection_id = %id, "Idle timeout");
                state.hub.close(&id, CloseReason::Idle);
                break;
            }
        };

        let flow = match next {
            Ok(Message::Text(text)) => handle_message(&state, &mut ctx, &text).await,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => handle_message(&state, &mut ctx, &text).await,
                Err(_) => Flow::Close(CloseReason::Malformed),
            },
            // Transport-level ping/pong is answered by the websocket layer
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Flow::Continue,
            Ok(Message::Close(_)) => {
                debug!(connection_id = %id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(connection_id = %id, error = %e, "WebSocket error");
                break;
            }
        };

        if let Flow::Close(reason) = flow {
            info!(connection_id = %id, code = reason.code(), reason = reason.reason(), "Closing connection");
            state.hub.close(&id, reason);
            break;
        }
    }

    terminate(&state, &id).await;
    ticker.abort();

    // Unregistering dropped the last sender; let queued frames and the close
    // frame go out before giving up on the writer
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        debug!(connection_id = %id, "Writer did not drain in time");
        writer.abort();
    }
}

/// Forward queued frames to the socket until the queue closes
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    id: ConnectionId,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.to_string())).await {
                    debug!(connection_id = %id, error = %e, "WebSocket send failed");
                    return;
                }
            }
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: reason.code(),
                    reason: Cow::Borrowed(reason.reason()),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(connection_id = %id, error = %e, "Failed to send close frame");
                }
                return;
            }
        }
    }
    let _ = sink.close().await;
}
