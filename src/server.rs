use std::collections::BTreeMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use hyper::service::{make_service_fn, service_fn};
use hyper::upgrade::Upgraded;
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use hyper_tungstenite::WebSocketStream;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::channel::{ClientChannel, Message};
use crate::events::{ClientEvent, ServerEvent};
use crate::handlers;
use crate::state::{CallStatus, PresenceStatus, SharedState};
use crate::{CallId, ConnId, UserId};

// ============================================
// HTTP entry point
// ============================================

pub async fn run(shared: SharedState) -> hyper::Result<()> {
    let port = shared.lock().await.config.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc = make_service_fn(move |_conn| {
        let shared = shared.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let shared = shared.clone();
                handle_request(req, shared)
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!("call signaling server listening on http://{}", addr);
    info!("WebSocket endpoint: ws://{}", addr);
    info!("Health check: http://{}/health", addr);
    server.await
}

async fn handle_request(
    mut req: Request<Body>,
    shared: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    if hyper_tungstenite::is_upgrade_request(&req) {
        match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => handle_connection(ws, shared).await,
                        Err(e) => error!("WebSocket handshake failed: {}", e),
                    }
                });
                return Ok(response);
            }
            Err(e) => {
                error!("WebSocket upgrade error: {}", e);
                return Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Body::from("Invalid WebSocket upgrade request"))
                    .unwrap());
            }
        }
    }

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("Call signaling server is running"))
            .unwrap()),
        (&Method::GET, "/health") => {
            let body = health_snapshot(&shared).await;
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .header("Access-Control-Allow-Origin", "*")
                .body(Body::from(body))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from(
                "Not found. Use /health for a state snapshot or upgrade to WebSocket.",
            ))
            .unwrap()),
    }
}

// ============================================
// Health snapshot
// ============================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthSnapshot {
    status: &'static str,
    started_at: DateTime<Utc>,
    connected_users: Vec<UserId>,
    active_calls: Vec<CallSummary>,
    presence: BTreeMap<UserId, PresenceSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallSummary {
    call_id: CallId,
    participants: Vec<UserId>,
    /// Participants whose cached channel is still live in the directory.
    bound_participants: Vec<UserId>,
    status: CallStatus,
    call_type: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceSummary {
    status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    call_id: Option<CallId>,
}

async fn health_snapshot(shared: &SharedState) -> String {
    let st = shared.lock().await;

    let mut connected_users: Vec<UserId> = st.directory.users().cloned().collect();
    connected_users.sort();

    let mut active_calls: Vec<CallSummary> = st
        .calls
        .iter()
        .map(|(call_id, call)| {
            let mut bound: Vec<UserId> = call
                .participant_channels
                .iter()
                .filter(|(user, channel)| st.directory.is_current(user, &channel.conn_id))
                .map(|(user, _)| user.clone())
                .collect();
            bound.sort();
            CallSummary {
                call_id: call_id.clone(),
                participants: call.participants.clone(),
                bound_participants: bound,
                status: call.status,
                call_type: call.call_type.clone(),
                created_at: call.created_at,
            }
        })
        .collect();
    active_calls.sort_by(|a, b| a.call_id.cmp(&b.call_id));

    let presence: BTreeMap<UserId, PresenceSummary> = st
        .presence
        .iter()
        .map(|(user, entry)| {
            (
                user.clone(),
                PresenceSummary {
                    status: entry.status,
                    call_id: entry.current_call.clone(),
                },
            )
        })
        .collect();

    let snapshot = HealthSnapshot {
        status: "ok",
        started_at: st.started_at,
        connected_users,
        active_calls,
        presence,
    };
    serde_json::to_string(&snapshot).unwrap_or_else(|_| r#"{"status":"ok"}"#.to_string())
}

// ============================================
// WebSocket connection loop
// ============================================

async fn handle_connection(ws: WebSocketStream<Upgraded>, shared: SharedState) {
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let conn_id: ConnId = uuid::Uuid::new_v4().to_string();
    info!("WebSocket connection {} established", conn_id);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let raw_sender = tx.clone();
    let channel = ClientChannel::new(conn_id.clone(), tx);

    // Forward queued frames to the socket; a queued close frame ends the
    // connection after it is flushed.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if let Err(e) = handlers::dispatch(&shared, &channel, event).await {
                                    warn!("handler error on {}: {}", conn_id, e);
                                    channel.send(&ServerEvent::Error {
                                        message: e.to_string(),
                                    });
                                }
                            }
                            Err(e) => {
                                warn!("unparseable frame on {}: {}", conn_id, e);
                                channel.send(&ServerEvent::Error {
                                    message: format!("Invalid message format: {}", e),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("connection {} closed by client", conn_id);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = raw_sender.send(Message::Pong(data));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error on {}: {}", conn_id, e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => break,
        }
    }

    handlers::handle_disconnect(&shared, &conn_id).await;
    send_task.abort();
}
