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

use crate::record::ServerId;

/// Field under which a node's stats are stored within its stats hash.
pub const STATS_FIELD: &str = "stats";

/// Names of the shared hashes, all under one prefix so several deployments
/// can share a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// connection id -> ConnectionRecord JSON
    pub fn connections(&self) -> String {
        format!("{}:connections", self.prefix)
    }

    /// connection id -> ping-sent timestamp
    pub fn ping_awaiting(&self) -> String {
        format!("{}:ping_awaiting", self.prefix)
    }

    pub fn server_stats(&self, server_id: &ServerId) -> String {
        format!("{}:stats:{}", self.prefix, server_id)
    }

    pub fn server_stats_pattern(&self) -> String {
        format!("{}:stats:*", self.prefix)
    }
}
