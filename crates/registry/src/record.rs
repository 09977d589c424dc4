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

//! Records kept in the shared store, and the identifiers that key them.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Identifies one node (server process) in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// A fresh random id of the form `server_1a2b3c4d`.
    pub fn generate() -> Self {
        let suffix: u32 = rand::rng().random();
        ServerId(format!("server_{suffix:08x}"))
    }

    /// Validate an operator-supplied id. It becomes the prefix of every
    /// connection id, so it may not contain the `:` separator.
    pub fn parse(id: &str) -> Result<Self, RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::InvalidConfig(
                "server id may not be empty".to_string(),
            ));
        }
        if id.contains(':') {
            return Err(RegistryError::InvalidConfig(format!(
                "server id {id:?} may not contain ':'"
            )));
        }
        Ok(ServerId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique connection id: `{server_id}:{socket_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub(crate) fn compose(server_id: &ServerId, socket_id: &str) -> Self {
        ConnectionId(format!("{server_id}:{socket_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        ConnectionId(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        ConnectionId(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Active,
}

/// What the transport told us about the client at handshake time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
}

/// One live connection, as every node sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub namespace: String,
    pub status: ConnectionStatus,
    pub socket_id: String,
    pub client_info: ClientInfo,
    pub server_id: ServerId,
    pub connected_at: f64,
    pub last_seen: f64,
}

impl ConnectionRecord {
    pub fn to_json(&self) -> String {
        // Plain strings and floats only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// A node's self-reported counts, republished on every membership change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub server_id: ServerId,
    pub last_updated: f64,
    pub local_sockets: usize,
    pub local_connections: usize,
}

/// Point-in-time view of the whole cluster from one node's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub server_id: ServerId,
    pub server_stats: Vec<ServerStats>,
    pub total_connections: usize,
    pub local_connections: usize,
    pub local_sockets: usize,
    pub ping_awaiting: usize,
    pub max_connections: usize,
    pub utilization_percent: f64,
}

/// Payload of the `ping` event pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: f64,
}

impl PingMessage {
    pub fn new(timestamp: f64) -> Self {
        Self {
            kind: "ping".to_string(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generated_server_ids_are_well_formed() {
        let id = ServerId::generate();
        assert!(id.as_str().starts_with("server_"));
        assert_eq!(id.as_str().len(), "server_".len() + 8);
        assert!(ServerId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_server_id_rejects_separator() {
        assert!(ServerId::parse("node:1").is_err());
        assert!(ServerId::parse("").is_err());
        assert!(ServerId::parse("node-1").is_ok());
    }

    #[test]
    fn test_record_json_layout() {
        let record = ConnectionRecord {
            namespace: "/chat".to_string(),
            status: ConnectionStatus::Active,
            socket_id: "abc".to_string(),
            client_info: ClientInfo {
                address: "10.0.0.1".to_string(),
                user_agent: Some("curl/8".to_string()),
                referer: None,
            },
            server_id: ServerId::parse("server_1").unwrap(),
            connected_at: 10.5,
            last_seen: 11.0,
        };
        let value: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(value["status"], "active");
        assert_eq!(value["server_id"], "server_1");
        assert_eq!(value["client_info"]["user_agent"], "curl/8");
        assert!(value["client_info"].get("referer").is_none());
        assert_eq!(ConnectionRecord::from_json(&record.to_json()).unwrap(), record);
    }

    #[test]
    fn test_ping_message_shape() {
        let value = serde_json::to_value(PingMessage::new(5.0)).unwrap();
        assert_eq!(value, serde_json::json!({"type": "ping", "timestamp": 5.0}));
    }
}
