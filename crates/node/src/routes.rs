// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use switchboard_registry::{ConnectionId, ConnectionManager, Handshake, RegistryError};
use tracing::error;

use crate::ws_connection::{self, EventFrame};

#[derive(Clone)]
pub struct NodeState {
    manager: ConnectionManager,
}

impl NodeState {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

pub fn mk_routes(state: NodeState) -> Router {
    Router::new()
        .route("/ws/{namespace}", get(ws_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/connections/{id}", get(connection_handler))
        .route("/connections/{id}/send", post(send_handler))
        .with_state(state)
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<NodeState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let handshake = Handshake {
        address: addr.ip().to_string(),
        user_agent: header_value(&headers, header::USER_AGENT),
        referer: header_value(&headers, header::REFERER),
    };
    let namespace = format!("/{namespace}");
    ws.on_upgrade(move |socket| ws_connection::run(state.manager, socket, namespace, handshake))
}

pub async fn stats_handler(State(state): State<NodeState>) -> Response {
    match state.manager.get_connection_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!(error = %e, "Unable to gather connection stats");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

pub async fn health_handler(State(state): State<NodeState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "server_id": state.manager.server_id(),
    }))
}

pub async fn connection_handler(
    State(state): State<NodeState>,
    Path(id): Path<String>,
) -> Response {
    let id = ConnectionId::from(id);
    match state.manager.registry().fetch(&id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e @ RegistryError::CorruptRecord { .. }) => {
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
        }
        Err(e) => {
            error!(connection_id = %id, error = %e, "Unable to read connection record");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// Local delivery only: a connection held by another node reports
/// `delivered: false`.
pub async fn send_handler(
    State(state): State<NodeState>,
    Path(id): Path<String>,
    Json(frame): Json<EventFrame>,
) -> impl IntoResponse {
    let id = ConnectionId::from(id);
    let delivered = state
        .manager
        .send_to_connection(&frame.event, frame.data, &id)
        .await;
    Json(json!({ "delivered": delivered }))
}
