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

//! Several nodes sharing one in-memory store and one hand-driven clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use switchboard_common::ManualClock;
use switchboard_registry::testing::RecordingHandle;
use switchboard_registry::{
    ConnectionId, ConnectionManager, MemoryStore, RegistryConfig, SharedStore, StoreError,
};

pub const START: f64 = 1_700_000_000.0;

pub struct Cluster {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(START)),
        }
    }

    pub fn node(&self, server_id: &str, max_connections: usize) -> ConnectionManager {
        ConnectionManager::new(
            node_config(server_id, max_connections),
            self.store.clone(),
            self.clock.clone(),
        )
        .expect("valid test config")
    }

    /// A node whose store calls each yield before completing, so concurrent
    /// operations on it interleave the way they do over a network.
    pub fn yielding_node(&self, server_id: &str, max_connections: usize) -> ConnectionManager {
        ConnectionManager::new(
            node_config(server_id, max_connections),
            Arc::new(YieldingStore(self.store.clone())),
            self.clock.clone(),
        )
        .expect("valid test config")
    }
}

fn node_config(server_id: &str, max_connections: usize) -> RegistryConfig {
    RegistryConfig {
        server_id: Some(server_id.to_string()),
        max_connections,
        key_prefix: "test".to_string(),
        ..Default::default()
    }
}

pub struct YieldingStore(Arc<MemoryStore>);

#[async_trait]
impl SharedStore for YieldingStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        tokio::task::yield_now().await;
        self.0.hash_get(key, field).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.hash_set(key, field, value).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.hash_delete(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        tokio::task::yield_now().await;
        self.0.hash_get_all(key).await
    }

    async fn hash_length(&self, key: &str) -> Result<usize, StoreError> {
        tokio::task::yield_now().await;
        self.0.hash_length(key).await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        tokio::task::yield_now().await;
        self.0.keys_matching(pattern).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.delete(key).await
    }
}

/// Register a fresh recording handle on `node`.
pub async fn connect(
    node: &ConnectionManager,
    socket_id: &str,
) -> (ConnectionId, Arc<RecordingHandle>) {
    let handle = RecordingHandle::new(socket_id);
    let id = node
        .register_connection(handle.clone(), "/chat")
        .await
        .expect("registration succeeds");
    (id, handle)
}

/// Let spawned event-routing tasks drain what has been queued for them.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
