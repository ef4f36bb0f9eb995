use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use super::protocol::{self, Inbound};
use super::{BroadcastHub, Connection, ConnectionState, SEND_ANOMALY};
use crate::auth::Credential;
use crate::context::AppContext;
use crate::error::{AppError, ConnectionError};
use crate::metrics;
use crate::models::AnomalyEvent;
use crate::routes::extractors::bearer_token;

const WEBSOCKET_VERSION: &str = "13";

#[derive(Debug, Default, Deserialize)]
pub struct HubQuery {
    access_token: Option<String>,
}

/// Why a client invocation was refused
#[derive(Debug, Error)]
enum InvocationError {
    #[error("Method '{0}' does not exist on this hub.")]
    UnknownMethod(String),

    #[error("Streaming invocations are not supported.")]
    Streaming,

    #[error("SendAnomaly expects a sender name and an anomaly.")]
    BadArguments,

    #[error("Failed to serialize the anomaly.")]
    Serialization(#[from] serde_json::Error),
}

/// GET <endpoint>/<hub>?access_token=<token>
///
/// Authenticates the credential, then upgrades the request to a WebSocket.
/// Any authentication failure answers 401 and the connection never opens.
pub async fn hub_handler(State(ctx): State<Arc<AppContext>>, mut req: Request) -> Response {
    let mut state = ConnectionState::Connecting;

    // An unparsable query counts as a missing credential
    let query = Query::<HubQuery>::try_from_uri(req.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();

    let token = query
        .access_token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(req.headers()).map(str::to_string));

    let Some(token) = token else {
        tracing::warn!("Hub connection attempted without a credential");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let credential = match ctx.auth_manager.authenticate(&token) {
        Ok(credential) => credential,
        Err(e) => {
            tracing::debug!(state = %state, next = %ConnectionState::Closed, "Hub connection refused");
            return AppError::from(ConnectionError::Unauthorized(e)).into_response();
        }
    };
    advance(&mut state, ConnectionState::Authenticated);

    let accept_key = match websocket_accept_key(req.method(), req.headers()) {
        Ok(key) => key,
        Err(reason) => {
            tracing::debug!(reason = reason, "Rejected non-WebSocket request to hub");
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    let hub = ctx.hub.clone();

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(
                    TokioIo::new(upgraded),
                    Role::Server,
                    None,
                )
                .await;
                run_session(hub, credential, ws, state).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket upgrade failed");
            }
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept_key)
        .body(Body::empty())
        .unwrap_or_else(|e| {
            AppError::internal(format!("Failed to build upgrade response: {}", e)).into_response()
        })
}

fn advance(state: &mut ConnectionState, next: ConnectionState) {
    debug_assert!(state.can_transition_to(next), "{} -> {}", state, next);
    tracing::trace!(from = %state, to = %next, "Hub connection state change");
    *state = next;
}

fn header_contains(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case(token))
}

fn websocket_accept_key(method: &Method, headers: &HeaderMap) -> Result<String, &'static str> {
    if method != Method::GET {
        return Err("WebSocket upgrade requires GET");
    }
    if !header_contains(headers, header::CONNECTION, "upgrade") {
        return Err("Missing 'Connection: upgrade' header");
    }
    if !header_contains(headers, header::UPGRADE, "websocket") {
        return Err("Missing 'Upgrade: websocket' header");
    }
    if headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        != Some(WEBSOCKET_VERSION)
    {
        return Err("Unsupported WebSocket version");
    }
    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or("Missing Sec-WebSocket-Key header")?;

    Ok(derive_accept_key(key.as_bytes()))
}

/// Drive one open connection until the client leaves, goes idle, or fails.
async fn run_session<S>(
    hub: Arc<BroadcastHub>,
    credential: Credential,
    ws: WebSocketStream<S>,
    mut state: ConnectionState,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let config = hub.config().clone();
    let (connection, mut outbound) =
        Connection::channel(credential.subject(), config.channel_capacity);
    let connection = Arc::new(connection);
    let connection_id = connection.id();

    hub.registry().register(connection.clone()).await;
    advance(&mut state, ConnectionState::Open);
    metrics::HUB_CONNECTIONS_TOTAL.inc();
    tracing::info!(
        connection_id = %connection_id,
        subject = %credential.subject(),
        "Hub connection opened"
    );

    let (mut ws_sender, mut ws_receiver) = ws.split();

    let mut keepalive = interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    let idle = sleep(config.client_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = ws_sender.send(WsMessage::Text(frame.to_string())).await {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Failed to write frame");
                    break;
                }
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        idle.as_mut().reset(Instant::now() + config.client_timeout);
                        match msg {
                            WsMessage::Text(text) => {
                                if !handle_inbound(&text, &mut ws_sender, &hub, &connection).await {
                                    break;
                                }
                            }
                            WsMessage::Close(_) => {
                                tracing::debug!(connection_id = %connection_id, "Client closed connection");
                                break;
                            }
                            // Pings are answered by the protocol layer
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket read error");
                        break;
                    }
                    None => break,
                }
            }
            _ = keepalive.tick() => {
                if ws_sender.send(WsMessage::Text(protocol::ping())).await.is_err() {
                    break;
                }
                if ws_sender.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = &mut idle => {
                tracing::info!(
                    connection_id = %connection_id,
                    timeout_secs = config.client_timeout.as_secs(),
                    "Hub connection idle, closing"
                );
                let _ = ws_sender
                    .send(WsMessage::Text(protocol::close(Some("Server timeout elapsed without receiving a message from the client."))))
                    .await;
                break;
            }
            _ = connection.closed() => {
                tracing::debug!(connection_id = %connection_id, "Connection closed by hub");
                break;
            }
        }
    }

    hub.registry().unregister(connection_id).await;
    let _ = ws_sender.close().await;
    advance(&mut state, ConnectionState::Closed);
    tracing::info!(
        connection_id = %connection_id,
        duration_secs = (Utc::now() - connection.opened_at()).num_seconds(),
        "Hub connection closed"
    );
}

/// Returns false when the session should end
async fn handle_inbound<W>(
    text: &str,
    ws_sender: &mut W,
    hub: &BroadcastHub,
    connection: &Connection,
) -> bool
where
    W: futures_util::Sink<WsMessage> + Unpin,
{
    let connection_id = connection.id();

    for record in protocol::parse_inbound(text) {
        let reply = match record {
            Inbound::Handshake { protocol: requested, version } => {
                if requested == protocol::SUPPORTED_PROTOCOL {
                    tracing::debug!(connection_id = %connection_id, version = version, "Hub handshake completed");
                    protocol::handshake_response(None)
                } else {
                    tracing::warn!(
                        connection_id = %connection_id,
                        protocol = %requested,
                        "Unsupported hub protocol requested, closing"
                    );
                    let error = format!("Requested protocol '{}' is not available.", requested);
                    let _ = ws_sender
                        .send(WsMessage::Text(protocol::handshake_response(Some(&error))))
                        .await;
                    return false;
                }
            }
            Inbound::Invocation { invocation_id, target, arguments, streaming } => {
                match invoke(hub, connection, &target, &arguments, streaming).await {
                    Ok(()) => match invocation_id {
                        Some(id) => protocol::completion(&id),
                        None => continue,
                    },
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %connection_id,
                            target = %target,
                            error = %e,
                            "Refused client invocation"
                        );
                        protocol::completion_error(invocation_id.as_deref(), &e.to_string())
                    }
                }
            }
            Inbound::Close => return false,
            Inbound::Ping | Inbound::Other(_) => continue,
            Inbound::Malformed => {
                tracing::debug!(connection_id = %connection_id, "Ignoring malformed hub message");
                continue;
            }
        };

        if ws_sender.send(WsMessage::Text(reply)).await.is_err() {
            return false;
        }
    }
    true
}

/// Run a hub method on behalf of an open connection
async fn invoke(
    hub: &BroadcastHub,
    connection: &Connection,
    target: &str,
    arguments: &[Value],
    streaming: bool,
) -> Result<(), InvocationError> {
    // Method names match case-insensitively
    if !target.eq_ignore_ascii_case(SEND_ANOMALY) {
        return Err(InvocationError::UnknownMethod(target.to_string()));
    }
    if streaming {
        return Err(InvocationError::Streaming);
    }

    let (sender, event) = send_anomaly_arguments(arguments).ok_or(InvocationError::BadArguments)?;
    let report = hub.dispatch(&sender, &event).await?;

    tracing::debug!(
        connection_id = %connection.id(),
        subject = %connection.subject(),
        sender = %sender,
        delivered = report.delivered,
        dropped = report.dropped,
        "Client anomaly dispatched"
    );
    Ok(())
}

/// `(sender, anomaly)`, where the anomaly is an object or its JSON text
fn send_anomaly_arguments(arguments: &[Value]) -> Option<(String, AnomalyEvent)> {
    let [sender, anomaly] = arguments else {
        return None;
    };
    let sender = sender.as_str()?.to_string();
    let event = match anomaly {
        Value::String(raw) => serde_json::from_str(raw).ok()?,
        other => AnomalyEvent::deserialize(other).ok()?,
    };
    Some((sender, event))
}
