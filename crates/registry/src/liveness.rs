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

//! Ping/pong bookkeeping.
//!
//! A ping record in the shared store means "ping sent at t, no pong yet".
//! There is no per-connection timer; the unresponsive sweep compares the
//! stored send time against the clock.

use std::collections::HashMap;
use std::sync::Arc;

use switchboard_common::Clock;
use tracing::{debug, warn};

use crate::keys::KeySpace;
use crate::ownership::OwnedConnectionId;
use crate::record::{ConnectionId, PingMessage};
use crate::registry::ConnectionRegistry;
use crate::socket_table::LocalSocketTable;
use crate::store::{SharedStore, StoreError};

pub const PING_EVENT: &str = "ping";

/// Where a connection sits in the liveness cycle, derived from what the store
/// holds for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LivenessState {
    /// Registered, nothing outstanding.
    Active,
    /// Registered and waiting on a pong for a ping sent at `sent_at`.
    PingOutstanding { sent_at: f64 },
    /// No record; either never registered or already torn down.
    Closed,
}

impl LivenessState {
    /// Seconds a ping has gone unanswered, if one is outstanding.
    pub fn waiting_for(&self, now: f64) -> Option<f64> {
        match self {
            LivenessState::PingOutstanding { sent_at } => Some(now - sent_at),
            _ => None,
        }
    }
}

/// Outcome of one ping round.
#[derive(Debug, Default)]
pub struct PingRound {
    /// Connections that were sent a ping.
    pub pinged: Vec<ConnectionId>,
    /// Connections whose send failed. They are dead and must be unregistered.
    pub failed: Vec<ConnectionId>,
    /// First error recording a ping. The round still visits every connection.
    pub store_error: Option<StoreError>,
}

pub struct LivenessTracker {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    registry: Arc<ConnectionRegistry>,
    sockets: Arc<LocalSocketTable>,
    clock: Arc<dyn Clock>,
}

impl LivenessTracker {
    pub fn new(
        store: Arc<dyn SharedStore>,
        keys: KeySpace,
        registry: Arc<ConnectionRegistry>,
        sockets: Arc<LocalSocketTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            keys,
            registry,
            sockets,
            clock,
        }
    }

    /// Ping every listed connection that has a live local handle. A store
    /// failure while recording a ping does not stop the round, so every dead
    /// connection is still reported.
    pub async fn ping_all(&self, ids: &[ConnectionId]) -> PingRound {
        let now = self.clock.now();
        let payload = serde_json::to_value(PingMessage::new(now)).unwrap_or_default();
        let mut round = PingRound::default();

        for id in ids {
            let Some(handle) = self.sockets.get(id) else {
                continue;
            };
            if !handle.is_connected() {
                continue;
            }
            match handle.send(PING_EVENT, payload.clone()) {
                Ok(()) => {
                    round.pinged.push(id.clone());
                    if let Err(e) = self
                        .store
                        .hash_set(&self.keys.ping_awaiting(), id.as_str(), &now.to_string())
                        .await
                    {
                        warn!(connection_id = %id, error = %e, "Could not record ping");
                        round.store_error.get_or_insert(e);
                    }
                }
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Could not send ping");
                    round.failed.push(id.clone());
                }
            }
        }
        round
    }

    /// A pong clears the outstanding ping and counts as activity.
    pub async fn on_pong(&self, id: &OwnedConnectionId) -> Result<(), StoreError> {
        self.clear(id).await?;
        self.registry.touch(id).await?;
        debug!(connection_id = %id.id(), "Received pong");
        Ok(())
    }

    /// Forget any outstanding ping. Idempotent.
    pub async fn clear(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.store
            .hash_delete(&self.keys.ping_awaiting(), id.as_str())
            .await
    }

    pub async fn ping_sent_at(&self, id: &ConnectionId) -> Result<Option<f64>, StoreError> {
        Ok(self
            .store
            .hash_get(&self.keys.ping_awaiting(), id.as_str())
            .await?
            .and_then(|v| v.parse::<f64>().ok()))
    }

    /// Every outstanding ping. An unparsable timestamp comes back as `None`.
    pub async fn outstanding(&self) -> Result<HashMap<ConnectionId, Option<f64>>, StoreError> {
        Ok(self
            .store
            .hash_get_all(&self.keys.ping_awaiting())
            .await?
            .into_iter()
            .map(|(id, sent)| (ConnectionId::from(id), sent.parse::<f64>().ok()))
            .collect())
    }

    pub async fn outstanding_count(&self) -> Result<usize, StoreError> {
        self.store.hash_length(&self.keys.ping_awaiting()).await
    }

    pub async fn state_of(&self, id: &ConnectionId) -> Result<LivenessState, StoreError> {
        if self.registry.lookup(id).await?.is_none() {
            return Ok(LivenessState::Closed);
        }
        Ok(match self.ping_sent_at(id).await? {
            Some(sent_at) => LivenessState::PingOutstanding { sent_at },
            None => LivenessState::Active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::Owner;
    use crate::record::{ClientInfo, ConnectionRecord, ConnectionStatus, ServerId};
    use crate::store::MemoryStore;
    use crate::testing::RecordingHandle;
    use switchboard_common::ManualClock;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        registry: Arc<ConnectionRegistry>,
        sockets: Arc<LocalSocketTable>,
        tracker: LivenessTracker,
        owner: Owner,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(500.0));
        let keys = KeySpace::new("t");
        let registry = Arc::new(ConnectionRegistry::new(
            store.clone(),
            keys.clone(),
            clock.clone(),
        ));
        let sockets = Arc::new(LocalSocketTable::new());
        let tracker = LivenessTracker::new(
            store.clone(),
            keys,
            registry.clone(),
            sockets.clone(),
            clock.clone(),
        );
        Fixture {
            store,
            clock,
            registry,
            sockets,
            tracker,
            owner: Owner::new(ServerId::parse("a").unwrap()),
        }
    }

    async fn add(f: &Fixture, socket: &str) -> (OwnedConnectionId, Arc<RecordingHandle>) {
        let id = f.owner.assign(socket);
        let handle = RecordingHandle::new(socket);
        f.sockets.put(id.clone(), handle.clone());
        let now = f.clock.now();
        let record = ConnectionRecord {
            namespace: "/".to_string(),
            status: ConnectionStatus::Active,
            socket_id: socket.to_string(),
            client_info: ClientInfo::default(),
            server_id: f.owner.server_id().clone(),
            connected_at: now,
            last_seen: now,
        };
        f.registry.register(&id, &record).await.unwrap();
        (id, handle)
    }

    #[tokio::test]
    async fn test_ping_then_pong_cycles_state() {
        let f = fixture();
        let (id, handle) = add(&f, "s1").await;
        assert_eq!(f.tracker.state_of(&id).await.unwrap(), LivenessState::Active);

        let round = f.tracker.ping_all(&[id.id().clone()]).await;
        assert!(round.failed.is_empty());
        assert!(round.store_error.is_none());
        assert_eq!(round.pinged, vec![id.id().clone()]);
        assert_eq!(handle.sent_events(), vec![PING_EVENT.to_string()]);
        assert_eq!(
            f.tracker.state_of(&id).await.unwrap(),
            LivenessState::PingOutstanding { sent_at: 500.0 }
        );

        f.clock.advance(3.0);
        f.tracker.on_pong(&id).await.unwrap();
        assert_eq!(f.tracker.state_of(&id).await.unwrap(), LivenessState::Active);
        assert_eq!(f.registry.lookup(&id).await.unwrap().unwrap().last_seen, 503.0);
    }

    #[tokio::test]
    async fn test_failed_send_is_reported_and_not_recorded() {
        let f = fixture();
        let (id, handle) = add(&f, "s1").await;
        handle.set_fail_sends(true);

        let round = f.tracker.ping_all(&[id.id().clone()]).await;
        assert_eq!(round.failed, vec![id.id().clone()]);
        assert!(round.pinged.is_empty());
        assert_eq!(f.tracker.outstanding_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_still_reports_every_dead_connection() {
        let f = fixture();
        let (alive, _alive_handle) = add(&f, "s1").await;
        let (dead, dead_handle) = add(&f, "s2").await;
        let (also_dead, also_dead_handle) = add(&f, "s3").await;
        dead_handle.set_fail_sends(true);
        also_dead_handle.set_fail_sends(true);
        f.store.set_available(false);

        let round = f
            .tracker
            .ping_all(&[alive.id().clone(), dead.id().clone(), also_dead.id().clone()])
            .await;
        assert!(matches!(round.store_error, Some(StoreError::Unavailable(_))));
        assert_eq!(round.pinged, vec![alive.id().clone()]);
        assert_eq!(round.failed, vec![dead.id().clone(), also_dead.id().clone()]);
    }

    #[tokio::test]
    async fn test_ids_without_local_handle_are_skipped() {
        let f = fixture();
        let round = f.tracker.ping_all(&[ConnectionId::from("b:elsewhere")]).await;
        assert!(round.pinged.is_empty());
        assert!(round.failed.is_empty());
        assert_eq!(f.tracker.outstanding_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_when_record_missing() {
        let f = fixture();
        assert_eq!(
            f.tracker
                .state_of(&ConnectionId::from("a:none"))
                .await
                .unwrap(),
            LivenessState::Closed
        );
        assert_eq!(LivenessState::Closed.waiting_for(10.0), None);
        assert_eq!(
            LivenessState::PingOutstanding { sent_at: 4.0 }.waiting_for(10.0),
            Some(6.0)
        );
    }
}
