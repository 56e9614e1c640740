//! WebSocket upgrade handlers for host displays and sensor devices

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{GameModeId, SensorEvent, SessionHandle, SessionInput};
use crate::http::routes::AppError;
use crate::util::time::unix_millis;
use crate::ws::protocol::{HostInbound, SensorPayload, ServerMsg};

/// Query parameters for a host connection
#[derive(Debug, Deserialize)]
pub struct HostQuery {
    /// Mode to open the session in; solo when absent
    #[serde(default)]
    pub mode: Option<String>,
}

/// Query parameters for a sensor connection
#[derive(Debug, Deserialize)]
pub struct SensorQuery {
    pub session: String,
    pub sensor_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Host upgrade: creates a session and streams its snapshots
pub async fn host_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HostQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let mode = match query.mode.as_deref() {
        Some(raw) => raw
            .parse::<GameModeId>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?,
        None => GameModeId::Solo,
    };

    let handle = state
        .sessions
        .create_session(mode)
        .map_err(|e| AppError::Unavailable(e.to_string()))?;

    info!(session = %handle.code, mode = %mode, "Host WebSocket upgrade");
    Ok(ws.on_upgrade(move |socket| handle_host_socket(socket, handle, mode)))
}

async fn handle_host_socket(socket: WebSocket, handle: SessionHandle, mode: GameModeId) {
    let (mut ws_sink, ws_stream) = socket.split();
    let snapshot_rx = handle.snapshot_tx.subscribe();

    let welcome = ServerMsg::Welcome {
        session_code: handle.code.clone(),
        mode,
        server_time: unix_millis(),
    };
    let created = ServerMsg::SessionCreated {
        session_code: handle.code.clone(),
    };
    for msg in [welcome, created] {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            error!(session = %handle.code, error = %e, "Failed to greet host");
            let _ = handle.input_tx.send(SessionInput::Close).await;
            return;
        }
    }

    let _ = handle
        .input_tx
        .send(SessionInput::Transport(SensorEvent::SessionCreated {
            session_code: handle.code.clone(),
        }))
        .await;

    run_host(&handle, ws_sink, ws_stream, snapshot_rx).await;

    // Host gone: the session goes with it
    let _ = handle.input_tx.send(SessionInput::Close).await;
    info!(session = %handle.code, "Host connection closed");
}

/// Pump snapshots out and control/relay messages in until either side stops
async fn run_host(
    handle: &SessionHandle,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut snapshot_rx: broadcast::Receiver<ServerMsg>,
) {
    let code = handle.code.clone();
    let writer_handle = tokio::spawn(async move {
        loop {
            match snapshot_rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(session = %code, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(session = %code, lagged_count = n, "Host lagged, skipping {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(session = %code, "Snapshot channel closed");
                    break;
                }
            }
        }
    });

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !handle.limits.admit_host_frame() {
                    warn!(session = %handle.code, "Rate limited host message");
                    continue;
                }

                let input = match serde_json::from_str::<HostInbound>(&text) {
                    Ok(HostInbound::Control(msg)) => SessionInput::Control(msg),
                    Ok(HostInbound::Transport(event)) => {
                        SessionInput::Transport(event.into_sensor_event(unix_millis()))
                    }
                    Err(e) => {
                        warn!(session = %handle.code, error = %e, "Failed to parse host message");
                        continue;
                    }
                };

                if handle.input_tx.send(input).await.is_err() {
                    debug!(session = %handle.code, "Session input closed");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!(session = %handle.code, "Host initiated close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(session = %handle.code, error = %e, "Host WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Sensor upgrade: joins an existing session by code
pub async fn sensor_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SensorQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let sensor_id = query.sensor_id.trim().to_string();
    if sensor_id.is_empty() {
        return Err(AppError::BadRequest("sensor_id must not be empty".to_string()));
    }

    let handle = state
        .sessions
        .get(&query.session)
        .ok_or_else(|| AppError::NotFound(format!("session {}", query.session)))?;

    info!(session = %handle.code, sensor_id = %sensor_id, "Sensor WebSocket upgrade");
    Ok(ws.on_upgrade(move |socket| handle_sensor_socket(socket, handle, sensor_id, query.name)))
}

async fn handle_sensor_socket(
    socket: WebSocket,
    handle: SessionHandle,
    sensor_id: String,
    name: Option<String>,
) {
    let (_ws_sink, mut ws_stream) = socket.split();

    let connected_count = handle.sensor_attached();
    let joined = SessionInput::Transport(SensorEvent::SensorConnected {
        sensor_id: sensor_id.clone(),
        name,
        connected_count,
    });

    if handle.input_tx.send(joined).await.is_ok() {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !handle.limits.admit_sensor_frame(&sensor_id) {
                        continue;
                    }

                    let payload = match serde_json::from_str::<SensorPayload>(&text) {
                        Ok(payload) => payload,
                        Err(e) => {
                            debug!(sensor_id = %sensor_id, error = %e, "Dropping malformed sensor frame");
                            continue;
                        }
                    };

                    let data = SessionInput::Transport(SensorEvent::SensorData {
                        sensor_id: sensor_id.clone(),
                        sample: payload.sample(),
                        received_at: unix_millis(),
                    });
                    if handle.input_tx.send(data).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(sensor_id = %sensor_id, error = %e, "Sensor WebSocket error");
                    break;
                }
            }
        }
    }

    handle.sensor_detached();
    handle.limits.shrink();
    let _ = handle
        .input_tx
        .send(SessionInput::Transport(SensorEvent::SensorDisconnected {
            sensor_id: sensor_id.clone(),
        }))
        .await;

    info!(session = %handle.code, sensor_id = %sensor_id, "Sensor connection closed");
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
