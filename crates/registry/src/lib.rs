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

//! Cluster-wide bookkeeping for realtime client connections.
//!
//! Every node keeps its live transport handles locally and publishes a record
//! per connection into a shared store, so any node can count, list and
//! reclaim connections across the cluster. A node writes only its own
//! records; it may delete anyone's.

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use keys::KeySpace;
pub use liveness::{LivenessState, LivenessTracker, PingRound};
pub use manager::ConnectionManager;
pub use ownership::{OwnedConnectionId, Owner};
pub use record::{
    ClientInfo, ConnectionId, ConnectionRecord, ConnectionStats, ConnectionStatus, PingMessage,
    ServerId, ServerStats,
};
pub use registry::{ConnectionRegistry, ScannedRecord};
pub use services::Job;
pub use socket_table::LocalSocketTable;
pub use stats::StatsAggregator;
pub use store::{MemoryStore, RespStore, SharedStore, StoreConfig, StoreError};
pub use sweeper::{Reclaim, SweepReport, Sweeper};
pub use transport::{Handshake, SendError, TransportEvent, TransportHandle};

mod config;
mod error;
pub mod keys;
pub mod liveness;
mod manager;
mod ownership;
mod record;
mod registry;
pub mod services;
mod socket_table;
mod stats;
pub mod store;
mod sweeper;
pub mod testing;
mod transport;
