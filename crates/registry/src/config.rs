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

//! Registry configuration, built by the host process from its CLI flags and
//! config file. All durations are whole seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::record::ServerId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Fixed identity for this node. Generated at startup when absent.
    pub server_id: Option<String>,
    /// Cluster-wide cap on registered connections.
    pub max_connections: usize,
    /// Prefix for every key this registry writes in the shared store.
    pub key_prefix: String,
    pub ping_interval: u64,
    /// How often the unresponsive sweep runs.
    pub cleanup_check_interval: u64,
    /// How long a ping may go unanswered.
    pub ping_timeout: u64,
    /// How long a connection may stay silent. The stale sweep runs at half
    /// this period.
    pub stale_timeout: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server_id: None,
            max_connections: 1000,
            key_prefix: "switchboard".to_string(),
            ping_interval: 30,
            cleanup_check_interval: 300,
            ping_timeout: 60,
            stale_timeout: 900,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.key_prefix.is_empty() {
            return Err(RegistryError::InvalidConfig(
                "key_prefix must not be empty".to_string(),
            ));
        }
        for (name, value) in [
            ("ping_interval", self.ping_interval),
            ("cleanup_check_interval", self.cleanup_check_interval),
            ("ping_timeout", self.ping_timeout),
        ] {
            if value == 0 {
                return Err(RegistryError::InvalidConfig(format!(
                    "{name} must be at least one second"
                )));
            }
        }
        if self.stale_timeout < 2 {
            return Err(RegistryError::InvalidConfig(
                "stale_timeout must be at least two seconds".to_string(),
            ));
        }
        if let Some(id) = &self.server_id {
            ServerId::parse(id)?;
        }
        Ok(())
    }

    /// The configured id, or a freshly generated one.
    pub fn resolve_server_id(&self) -> Result<ServerId, RegistryError> {
        match &self.server_id {
            Some(id) => ServerId::parse(id),
            None => Ok(ServerId::generate()),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    pub fn cleanup_check_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_check_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout)
    }
}
