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

//! Write capability for connection records.
//!
//! A node may write only the records it owns and may only delete the records
//! of others. The registry's mutating calls take an [`OwnedConnectionId`], and
//! the only way to get one is through this node's [`Owner`], which hands them
//! out for ids it assigned itself or for records that name it as `server_id`.

use std::ops::Deref;

use crate::record::{ConnectionId, ConnectionRecord, ServerId};

#[derive(Debug)]
pub struct Owner {
    server_id: ServerId,
}

/// A connection id this node is allowed to write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnedConnectionId(ConnectionId);

impl Owner {
    pub(crate) fn new(server_id: ServerId) -> Self {
        Self { server_id }
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Mint the id for a connection this node just accepted.
    pub(crate) fn assign(&self, socket_id: &str) -> OwnedConnectionId {
        OwnedConnectionId(ConnectionId::compose(&self.server_id, socket_id))
    }

    /// Take write access to an existing record, if and only if it is ours.
    pub fn claim(&self, id: &ConnectionId, record: &ConnectionRecord) -> Option<OwnedConnectionId> {
        (record.server_id == self.server_id).then(|| OwnedConnectionId(id.clone()))
    }

    pub fn owns(&self, record: &ConnectionRecord) -> bool {
        record.server_id == self.server_id
    }
}

impl OwnedConnectionId {
    pub fn id(&self) -> &ConnectionId {
        &self.0
    }

    pub fn into_id(self) -> ConnectionId {
        self.0
    }
}

impl Deref for OwnedConnectionId {
    type Target = ConnectionId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
