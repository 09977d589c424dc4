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

//! The boundary with whatever accepted the client connection.
//!
//! The registry never reads payloads. It needs to push an event, force a
//! close, learn a few handshake facts, and hear about pongs, activity and
//! disconnects.

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("transport write failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub address: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

/// Lifecycle notifications from the transport for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Explicit answer to a ping.
    Pong,
    /// Any inbound traffic at all.
    Activity,
    Disconnect(String),
    Error(String),
}

/// A live connection as seen from the node that accepted it.
pub trait TransportHandle: Send + Sync {
    /// Identifier unique within this node only.
    fn local_id(&self) -> &str;

    fn handshake(&self) -> Handshake;

    fn is_connected(&self) -> bool;

    fn send(&self, event: &str, payload: serde_json::Value) -> Result<(), SendError>;

    /// Close the connection. With `force` the transport should not wait for
    /// buffered output to drain.
    fn disconnect(&self, force: bool);

    /// Hand over the lifecycle event stream. Yields `Some` at most once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}
