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

use std::sync::Arc;

use switchboard_common::Clock;
use tracing::debug;

use crate::keys::{KeySpace, STATS_FIELD};
use crate::liveness::LivenessTracker;
use crate::record::{ConnectionStats, ServerId, ServerStats};
use crate::registry::ConnectionRegistry;
use crate::socket_table::LocalSocketTable;
use crate::store::{SharedStore, StoreError};

/// Per-node counters in the shared store, and the cluster view built from
/// them. Every node's record is whatever it last published; a crashed node's
/// record stays until something deletes it, so read `last_updated`.
pub struct StatsAggregator {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    server_id: ServerId,
    registry: Arc<ConnectionRegistry>,
    sockets: Arc<LocalSocketTable>,
    liveness: Arc<LivenessTracker>,
    clock: Arc<dyn Clock>,
    max_connections: usize,
}

impl StatsAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SharedStore>,
        keys: KeySpace,
        server_id: ServerId,
        registry: Arc<ConnectionRegistry>,
        sockets: Arc<LocalSocketTable>,
        liveness: Arc<LivenessTracker>,
        clock: Arc<dyn Clock>,
        max_connections: usize,
    ) -> Self {
        Self {
            store,
            keys,
            server_id,
            registry,
            sockets,
            liveness,
            clock,
            max_connections,
        }
    }

    /// Overwrite this node's stats record with current counts.
    pub async fn publish_local(&self) -> Result<ServerStats, StoreError> {
        let stats = ServerStats {
            server_id: self.server_id.clone(),
            last_updated: self.clock.now(),
            local_sockets: self.sockets.len(),
            local_connections: self.registry.list_owned_by(&self.server_id).await?.len(),
        };
        let json = serde_json::to_string(&stats).unwrap_or_default();
        self.store
            .hash_set(&self.keys.server_stats(&self.server_id), STATS_FIELD, &json)
            .await?;
        Ok(stats)
    }

    /// Point-in-time snapshot of the cluster. Unreadable stats records are
    /// skipped.
    pub async fn aggregate(&self) -> Result<ConnectionStats, StoreError> {
        let total_connections = self.registry.count().await?;
        let local_connections = self.registry.list_owned_by(&self.server_id).await?.len();

        let mut server_stats = vec![];
        for key in self
            .store
            .keys_matching(&self.keys.server_stats_pattern())
            .await?
        {
            let Some(json) = self.store.hash_get(&key, STATS_FIELD).await? else {
                continue;
            };
            match serde_json::from_str::<ServerStats>(&json) {
                Ok(stats) => server_stats.push(stats),
                Err(e) => debug!(%key, error = %e, "Skipping unreadable server stats"),
            }
        }
        server_stats.sort_by(|a, b| a.server_id.as_str().cmp(b.server_id.as_str()));

        let utilization_percent = if self.max_connections == 0 {
            0.0
        } else {
            total_connections as f64 / self.max_connections as f64 * 100.0
        };

        Ok(ConnectionStats {
            server_id: self.server_id.clone(),
            server_stats,
            total_connections,
            local_connections,
            local_sockets: self.sockets.len(),
            ping_awaiting: self.liveness.outstanding_count().await?,
            max_connections: self.max_connections,
            utilization_percent,
        })
    }

    /// Drop this node's stats record. Used on shutdown.
    pub async fn clear_local(&self) -> Result<(), StoreError> {
        self.store
            .delete(&self.keys.server_stats(&self.server_id))
            .await
    }
}
