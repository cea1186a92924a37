//! Agent WebSocket transport endpoint (spec.md §4.D, §6).
//!
//! Terminates TLS and the WebSocket upgrade, checks the mTLS peer
//! certificate's CN against the requested agent identity, then hands the
//! session fully over to [`sonde_dispatcher::Dispatcher`] — this module's
//! only job is moving bytes between the socket and the dispatcher's
//! channels, per the dispatcher's own module doc.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use sonde_dispatcher::HubMessage;
use tracing::{info, warn};

use crate::mtls::PeerIdentity;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    agent: String,
}

pub async fn agent_connect(
    ws: WebSocketUpgrade,
    ConnectInfo(identity): ConnectInfo<PeerIdentity>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let agent_name = params.agent;

    let Some(common_name) = identity.common_name else {
        warn!(agent = %agent_name, "websocket upgrade rejected: no client certificate presented");
        return (StatusCode::UNAUTHORIZED, "client certificate required").into_response();
    };
    if common_name != agent_name {
        warn!(agent = %agent_name, cn = %common_name, "websocket upgrade rejected: certificate CN does not match requested agent");
        return (StatusCode::FORBIDDEN, "certificate identity mismatch").into_response();
    }
    match state.store.get_agent_by_name(&agent_name) {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(agent = %agent_name, "websocket upgrade rejected: unknown agent, enroll first");
            return (StatusCode::FORBIDDEN, "unknown agent").into_response();
        }
        Err(err) => {
            warn!(agent = %agent_name, ?err, "store lookup failed during websocket upgrade");
            return (StatusCode::INTERNAL_SERVER_ERROR, "store error").into_response();
        }
    }

    ws.on_upgrade(move |socket| agent_session(socket, agent_name, state))
}

async fn agent_session(socket: WebSocket, agent_name: String, state: AppState) {
    info!(agent = %agent_name, "agent session established");
    let mut outbound = state.dispatcher.register_session(&agent_name);
    let (mut sink, mut stream) = socket.split();

    let writer_agent = agent_name.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(agent = %writer_agent, ?err, "failed to encode outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(agent = %agent_name, ?err, "websocket read error");
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<HubMessage>(&text) {
                Ok(message) => state.dispatcher.handle_inbound(&agent_name, message),
                Err(err) => warn!(agent = %agent_name, ?err, "dropped malformed frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.dispatcher.on_disconnect(&agent_name);
    info!(agent = %agent_name, "agent session closed");
}
