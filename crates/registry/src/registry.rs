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

use crate::error::RegistryError;
use crate::keys::KeySpace;
use crate::ownership::OwnedConnectionId;
use crate::record::{ConnectionId, ConnectionRecord, ServerId};
use crate::store::{SharedStore, StoreError};

/// A value found while scanning the connections hash.
#[derive(Debug, Clone, PartialEq)]
pub enum ScannedRecord {
    Valid(ConnectionRecord),
    /// The value did not parse; the payload is the parse error.
    Corrupt(String),
}

/// Which connections exist, and which node holds each one.
///
/// Backed by a single shared hash keyed by connection id. Listing is a full
/// scan of that hash; there is no per-node index, so `list_owned_by` costs
/// O(cluster connections). It is only called from periodic jobs and stats.
pub struct ConnectionRegistry {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace, clock: Arc<dyn Clock>) -> Self {
        Self { store, keys, clock }
    }

    /// Write the record. Capacity is the caller's business.
    pub async fn register(
        &self,
        id: &OwnedConnectionId,
        record: &ConnectionRecord,
    ) -> Result<(), StoreError> {
        self.store
            .hash_set(&self.keys.connections(), id.as_str(), &record.to_json())
            .await
    }

    /// Absent and unparsable both come back as `None`.
    pub async fn lookup(&self, id: &ConnectionId) -> Result<Option<ConnectionRecord>, StoreError> {
        let Some(json) = self
            .store
            .hash_get(&self.keys.connections(), id.as_str())
            .await?
        else {
            return Ok(None);
        };
        match ConnectionRecord::from_json(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                debug!(connection_id = %id, error = %e, "Failed to parse connection record");
                Ok(None)
            }
        }
    }

    /// Like `lookup`, but an unparsable value is an error instead of absent.
    pub async fn fetch(&self, id: &ConnectionId) -> Result<Option<ConnectionRecord>, RegistryError> {
        let key = self.keys.connections();
        let Some(json) = self.store.hash_get(&key, id.as_str()).await? else {
            return Ok(None);
        };
        ConnectionRecord::from_json(&json)
            .map(Some)
            .map_err(|e| RegistryError::CorruptRecord {
                key: format!("{key}/{id}"),
                reason: e.to_string(),
            })
    }

    /// Refresh `last_seen`. Returns false if the record is gone, in which case
    /// nothing is written.
    pub async fn touch(&self, id: &OwnedConnectionId) -> Result<bool, StoreError> {
        let Some(mut record) = self.lookup(id).await? else {
            return Ok(false);
        };
        record.last_seen = self.clock.now();
        self.store
            .hash_set(&self.keys.connections(), id.as_str(), &record.to_json())
            .await?;
        Ok(true)
    }

    /// Idempotent.
    pub async fn remove(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.store
            .hash_delete(&self.keys.connections(), id.as_str())
            .await
    }

    /// Every entry in the connections hash, parsed or flagged corrupt.
    pub async fn scan(&self) -> Result<Vec<(ConnectionId, ScannedRecord)>, StoreError> {
        let all = self.store.hash_get_all(&self.keys.connections()).await?;
        let mut entries: Vec<_> = all
            .into_iter()
            .map(|(id, json)| {
                let scanned = match ConnectionRecord::from_json(&json) {
                    Ok(record) => ScannedRecord::Valid(record),
                    Err(e) => ScannedRecord::Corrupt(e.to_string()),
                };
                (ConnectionId::from(id), scanned)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    pub async fn list_owned_by(&self, server_id: &ServerId) -> Result<Vec<ConnectionId>, StoreError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter_map(|(id, scanned)| match scanned {
                ScannedRecord::Valid(record) if &record.server_id == server_id => Some(id),
                _ => None,
            })
            .collect())
    }

    /// Cluster-wide connection count, used by the capacity gate.
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.hash_length(&self.keys.connections()).await
    }
}
