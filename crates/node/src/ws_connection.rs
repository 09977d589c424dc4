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

//! A WebSocket client as a registry transport handle.
//!
//! Frames are JSON text `{"event": ..., "data": ...}` in both directions.
//! Outbound frames go through a queue drained by a writer task, so `send`
//! never blocks; a forced disconnect skips whatever is still queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_derive::{Deserialize, Serialize};
use switchboard_registry::{
    ConnectionManager, Handshake, RegistryError, SendError, TransportEvent, TransportHandle,
};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Close code sent when the node is at capacity ("try again later").
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

enum Outbound {
    Frame(String),
    Close,
}

pub struct WebSocketHandle {
    local_id: String,
    handshake: Handshake,
    connected: AtomicBool,
    outbound: mpsc::UnboundedSender<Outbound>,
    force_close: CancellationToken,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl WebSocketHandle {
    fn new(
        handshake: Handshake,
        outbound: mpsc::UnboundedSender<Outbound>,
        force_close: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            local_id: Uuid::new_v4().simple().to_string(),
            handshake,
            connected: AtomicBool::new(true),
            outbound,
            force_close,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Mark the connection closed and report it, once.
    fn close(&self, reason: &str, force: bool) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if force {
            self.force_close.cancel();
        } else {
            let _ = self.outbound.send(Outbound::Close);
        }
        self.emit(TransportEvent::Disconnect(reason.to_string()));
    }
}

impl TransportHandle for WebSocketHandle {
    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn handshake(&self) -> Handshake {
        self.handshake.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, event: &str, payload: serde_json::Value) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::Closed);
        }
        let frame = EventFrame {
            event: event.to_string(),
            data: payload,
        };
        let text = serde_json::to_string(&frame).map_err(|e| SendError::Failed(e.to_string()))?;
        self.outbound
            .send(Outbound::Frame(text))
            .map_err(|_| SendError::Closed)
    }

    fn disconnect(&self, force: bool) {
        self.close("server namespace disconnect", force);
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }
}

/// What an inbound message means for liveness.
#[derive(Debug, PartialEq)]
enum Inbound {
    Events(Vec<TransportEvent>),
    Closed(String),
}

fn classify(message: &Message) -> Inbound {
    match message {
        Message::Text(text) => {
            let is_pong = serde_json::from_str::<EventFrame>(text.as_str())
                .map(|frame| frame.event == "pong")
                .unwrap_or(false);
            if is_pong {
                Inbound::Events(vec![TransportEvent::Activity, TransportEvent::Pong])
            } else {
                Inbound::Events(vec![TransportEvent::Activity])
            }
        }
        Message::Pong(_) => Inbound::Events(vec![TransportEvent::Activity, TransportEvent::Pong]),
        Message::Binary(_) | Message::Ping(_) => Inbound::Events(vec![TransportEvent::Activity]),
        Message::Close(_) => Inbound::Closed("client namespace disconnect".to_string()),
    }
}

/// Serve one upgraded WebSocket until either side closes it.
pub async fn run(
    manager: ConnectionManager,
    socket: WebSocket,
    namespace: String,
    handshake: Handshake,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let force_close = CancellationToken::new();
    let handle = Arc::new(WebSocketHandle::new(
        handshake,
        outbound_tx,
        force_close.clone(),
    ));

    let id = match manager
        .register_connection(handle.clone(), &namespace)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            let code = match e {
                RegistryError::CapacityExceeded { .. } => CLOSE_TRY_AGAIN_LATER,
                _ => CLOSE_INTERNAL_ERROR,
            };
            warn!(%namespace, error = %e, "Rejecting WebSocket connection");
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };
    info!(connection_id = %id, %namespace, "WebSocket connection established");

    let writer = tokio::spawn(async move {
        loop {
            select! {
                biased;
                _ = force_close.cancelled() => break,
                outbound = outbound_rx.recv() => match outbound {
                    Some(Outbound::Frame(text)) => {
                        if ws_sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => break,
                }
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
        let _ = ws_sender.close().await;
    });

    let closed = handle.force_close.clone();
    loop {
        let next = select! {
            _ = closed.cancelled() => break,
            next = ws_receiver.next() => next,
        };
        match next {
            Some(Ok(message)) => match classify(&message) {
                Inbound::Events(events) => {
                    for event in events {
                        handle.emit(event);
                    }
                }
                Inbound::Closed(reason) => {
                    handle.close(&reason, false);
                    break;
                }
            },
            Some(Err(e)) => {
                handle.emit(TransportEvent::Error(e.to_string()));
                handle.close("transport error", false);
                break;
            }
            None => {
                handle.close("transport close", false);
                break;
            }
        }
        if !handle.is_connected() {
            break;
        }
    }

    if let Err(e) = writer.await {
        warn!(connection_id = %id, error = %e, "WebSocket writer task failed");
    }
    debug!(connection_id = %id, "WebSocket connection finished");
}
