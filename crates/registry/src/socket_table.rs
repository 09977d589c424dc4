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

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ownership::OwnedConnectionId;
use crate::record::ConnectionId;
use crate::transport::TransportHandle;

struct Entry {
    id: OwnedConnectionId,
    handle: Arc<dyn TransportHandle>,
}

/// Live transport handles for the connections this node accepted. Never
/// shared with other nodes; the lock is never held across an await.
///
/// Entries are keyed by owned ids only, so anything found here is writable by
/// this node.
#[derive(Default)]
pub struct LocalSocketTable {
    sockets: Mutex<HashMap<ConnectionId, Entry>>,
}

impl LocalSocketTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: OwnedConnectionId, handle: Arc<dyn TransportHandle>) {
        self.sockets
            .lock()
            .unwrap()
            .insert(id.id().clone(), Entry { id, handle });
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<dyn TransportHandle>> {
        self.sockets
            .lock()
            .unwrap()
            .get(id)
            .map(|entry| entry.handle.clone())
    }

    /// The handle together with the write capability for its record.
    pub fn get_owned(
        &self,
        id: &ConnectionId,
    ) -> Option<(OwnedConnectionId, Arc<dyn TransportHandle>)> {
        self.sockets
            .lock()
            .unwrap()
            .get(id)
            .map(|entry| (entry.id.clone(), entry.handle.clone()))
    }

    pub fn delete(&self, id: &ConnectionId) -> Option<Arc<dyn TransportHandle>> {
        self.sockets
            .lock()
            .unwrap()
            .remove(id)
            .map(|entry| entry.handle)
    }

    pub fn len(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.sockets.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}
