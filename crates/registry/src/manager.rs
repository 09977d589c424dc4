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

//! Per-node connection lifecycle: capacity gate, registration, event routing,
//! local delivery, periodic liveness jobs and shutdown.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use switchboard_common::Clock;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::keys::KeySpace;
use crate::liveness::{LivenessState, LivenessTracker};
use crate::ownership::{OwnedConnectionId, Owner};
use crate::record::{
    ClientInfo, ConnectionId, ConnectionRecord, ConnectionStats, ConnectionStatus, ServerId,
};
use crate::registry::ConnectionRegistry;
use crate::services::{Job, Scheduler};
use crate::socket_table::LocalSocketTable;
use crate::stats::StatsAggregator;
use crate::store::{SharedStore, StoreError};
use crate::sweeper::{Reclaim, SweepReport, Sweeper};
use crate::transport::{TransportEvent, TransportHandle};

/// One per process. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: RegistryConfig,
    owner: Arc<Owner>,
    sockets: Arc<LocalSocketTable>,
    registry: Arc<ConnectionRegistry>,
    liveness: Arc<LivenessTracker>,
    sweeper: Sweeper,
    stats: StatsAggregator,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    /// Held from the capacity check until the record is written.
    admission: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RegistryError> {
        config.validate()?;
        let server_id = config.resolve_server_id()?;
        let keys = KeySpace::new(config.key_prefix.clone());
        let owner = Arc::new(Owner::new(server_id.clone()));
        let sockets = Arc::new(LocalSocketTable::new());
        let registry = Arc::new(ConnectionRegistry::new(
            store.clone(),
            keys.clone(),
            clock.clone(),
        ));
        let liveness = Arc::new(LivenessTracker::new(
            store.clone(),
            keys.clone(),
            registry.clone(),
            sockets.clone(),
            clock.clone(),
        ));
        let sweeper = Sweeper::new(
            registry.clone(),
            liveness.clone(),
            owner.clone(),
            clock.clone(),
        );
        let stats = StatsAggregator::new(
            store,
            keys,
            server_id.clone(),
            registry.clone(),
            sockets.clone(),
            liveness.clone(),
            clock.clone(),
            config.max_connections,
        );

        info!(%server_id, max_connections = config.max_connections, "Connection manager created");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                owner,
                sockets,
                registry,
                liveness,
                sweeper,
                stats,
                scheduler: Scheduler::default(),
                clock,
                admission: Mutex::new(()),
            }),
        })
    }

    pub fn server_id(&self) -> &ServerId {
        self.inner.owner.server_id()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Ids of the connections whose handles this node holds.
    pub fn local_connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.sockets.ids()
    }

    pub async fn connection_state(&self, id: &ConnectionId) -> Result<LivenessState, RegistryError> {
        Ok(self.inner.liveness.state_of(id).await?)
    }

    /// Admit a freshly accepted connection.
    ///
    /// At or over capacity the handle is force-closed and nothing is written.
    /// If the store cannot be read or written the handle is likewise closed and
    /// no local entry is kept. Admissions on one node are serialised, so
    /// concurrent registrations cannot both pass the same capacity check.
    /// Nodes sharing a store can still race each other.
    pub async fn register_connection(
        &self,
        handle: Arc<dyn TransportHandle>,
        namespace: &str,
    ) -> Result<ConnectionId, RegistryError> {
        let inner = &self.inner;
        let max = inner.config.max_connections;
        let admission = inner.admission.lock().await;

        let current = match inner.registry.count().await {
            Ok(current) => current,
            Err(e) => {
                handle.disconnect(true);
                return Err(e.into());
            }
        };
        if current >= max {
            warn!(
                server_id = %self.server_id(),
                current,
                max,
                "Maximum connections exceeded, rejecting connection"
            );
            handle.disconnect(true);
            return Err(RegistryError::CapacityExceeded { current, max });
        }

        let id = inner.owner.assign(handle.local_id());
        inner.sockets.put(id.clone(), handle.clone());

        let handshake = handle.handshake();
        let now = inner.clock.now();
        let record = ConnectionRecord {
            namespace: namespace.to_string(),
            status: ConnectionStatus::Active,
            socket_id: handle.local_id().to_string(),
            client_info: ClientInfo {
                address: handshake.address,
                user_agent: handshake.user_agent,
                referer: handshake.referer,
            },
            server_id: self.server_id().clone(),
            connected_at: now,
            last_seen: now,
        };
        if let Err(e) = inner.registry.register(&id, &record).await {
            inner.sockets.delete(&id);
            handle.disconnect(true);
            return Err(e.into());
        }
        drop(admission);
        inner.publish_stats().await;

        if let Some(events) = handle.take_events() {
            tokio::spawn(route_events(
                Arc::downgrade(&self.inner),
                id.clone(),
                events,
            ));
        }

        info!(connection_id = %id.id(), namespace, "Registered connection");
        Ok(id.into_id())
    }

    /// Drop every trace of a connection. Safe to repeat, and safe on ids this
    /// node never held.
    pub async fn unregister_connection(&self, id: &ConnectionId) -> Result<(), RegistryError> {
        Ok(self.inner.teardown(id).await?)
    }

    /// Deliver an event to a connection held by this node. Returns false when
    /// the connection is not local, not connected, or the write failed; a
    /// failed write unregisters the connection.
    pub async fn send_to_connection(
        &self,
        event: &str,
        payload: serde_json::Value,
        id: &ConnectionId,
    ) -> bool {
        let inner = &self.inner;
        let Some((owned, handle)) = inner.sockets.get_owned(id) else {
            return false;
        };
        if !handle.is_connected() {
            return false;
        }
        match handle.send(event, payload) {
            Ok(()) => {
                if let Err(e) = inner.registry.touch(&owned).await {
                    warn!(connection_id = %id, error = %e, "Could not refresh last_seen after send");
                }
                true
            }
            Err(e) => {
                warn!(connection_id = %id, error = %e, "Send failed, unregistering connection");
                if let Err(e) = inner.teardown(id).await {
                    warn!(connection_id = %id, error = %e, "Could not unregister connection");
                }
                false
            }
        }
    }

    pub async fn get_connection_stats(&self) -> Result<ConnectionStats, RegistryError> {
        Ok(self.inner.stats.aggregate().await?)
    }

    /// Ping this node's connections every `interval`.
    pub fn start_ping_service(&self, interval: Duration) -> Result<(), RegistryError> {
        ensure_nonzero("ping interval", interval)?;
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.start(Job::Ping, interval, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = inner.ping_cycle().await {
                    warn!(error = %e, "Ping cycle failed; retrying next interval");
                }
            }
        });
        info!(?interval, "Ping service started");
        Ok(())
    }

    /// Run the unresponsive sweep every `check_interval` and the stale sweep
    /// every `stale_timeout / 2`.
    pub fn start_cleanup_services(
        &self,
        check_interval: Duration,
        stale_timeout: Duration,
    ) -> Result<(), RegistryError> {
        ensure_nonzero("cleanup check interval", check_interval)?;
        ensure_nonzero("stale timeout", stale_timeout / 2)?;

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .start(Job::UnresponsiveSweep, check_interval, move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = inner.unresponsive_sweep().await {
                        warn!(error = %e, "Unresponsive sweep failed; retrying next interval");
                    }
                }
            });

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .start(Job::StaleSweep, stale_timeout / 2, move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = inner.stale_sweep(stale_timeout).await {
                        warn!(error = %e, "Stale sweep failed; retrying next interval");
                    }
                }
            });

        info!(?check_interval, ?stale_timeout, "Cleanup services started");
        Ok(())
    }

    /// Start every periodic job with the configured intervals.
    pub fn start_services(&self) -> Result<(), RegistryError> {
        let config = &self.inner.config;
        self.start_ping_service(config.ping_interval())?;
        self.start_cleanup_services(config.cleanup_check_interval(), config.stale_timeout())
    }

    pub fn is_service_running(&self, job: Job) -> bool {
        self.inner.scheduler.is_running(job)
    }

    /// One ping round. Returns the connections that were unregistered because
    /// the ping could not be sent.
    pub async fn run_ping_cycle(&self) -> Result<Vec<ConnectionId>, RegistryError> {
        Ok(self.inner.ping_cycle().await?)
    }

    pub async fn run_unresponsive_sweep(&self) -> Result<SweepReport, RegistryError> {
        Ok(self.inner.unresponsive_sweep().await?)
    }

    pub async fn run_stale_sweep(&self, stale_timeout: Duration) -> Result<SweepReport, RegistryError> {
        Ok(self.inner.stale_sweep(stale_timeout).await?)
    }

    /// Stop the periodic jobs, close and unregister every local connection,
    /// and remove this node's stats record.
    ///
    /// Local handles are closed before the store is touched, and every store
    /// cleanup step is attempted even after one fails. The first store error
    /// is returned once everything has been tried.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let inner = &self.inner;
        info!(server_id = %self.server_id(), "Shutting down connection manager");

        for handle in inner.scheduler.stop_all() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Periodic job did not stop cleanly");
            }
        }

        let mut local: BTreeSet<ConnectionId> = inner.sockets.ids().into_iter().collect();
        for id in &local {
            if let Some(handle) = inner.sockets.get(id) {
                handle.disconnect(true);
            }
        }

        let mut first_error: Option<StoreError> = None;
        match inner.registry.list_owned_by(self.server_id()).await {
            Ok(owned) => local.extend(owned),
            Err(e) => {
                warn!(error = %e, "Could not list this node's registry records");
                first_error.get_or_insert(e);
            }
        }

        for id in &local {
            if let Err(e) = inner.teardown(id).await {
                warn!(connection_id = %id, error = %e, "Could not unregister connection");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = inner.stats.clear_local().await {
            warn!(error = %e, "Could not remove server stats");
            first_error.get_or_insert(e);
        }

        info!(
            server_id = %self.server_id(),
            closed = local.len(),
            clean = first_error.is_none(),
            "Connection manager shutdown complete"
        );
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Inner {
    async fn teardown(&self, id: &ConnectionId) -> Result<(), StoreError> {
        let was_local = self.sockets.delete(id).is_some();
        self.liveness.clear(id).await?;
        self.registry.remove(id).await?;
        if was_local {
            self.publish_stats().await;
            info!(connection_id = %id, "Unregistered connection");
        } else {
            debug!(connection_id = %id, "Unregister found no local handle");
        }
        Ok(())
    }

    /// Stats are advisory; a failed publish never fails the caller.
    async fn publish_stats(&self) {
        if let Err(e) = self.stats.publish_local().await {
            warn!(server_id = %self.owner.server_id(), error = %e, "Could not publish server stats");
        }
    }

    /// Dead connections found by the round are unregistered even when
    /// recording pings or a teardown hits a store error.
    async fn ping_cycle(&self) -> Result<Vec<ConnectionId>, StoreError> {
        let local = self.registry.list_owned_by(self.owner.server_id()).await?;
        let round = self.liveness.ping_all(&local).await;
        let mut first_error = round.store_error;
        for id in &round.failed {
            if let Err(e) = self.teardown(id).await {
                warn!(connection_id = %id, error = %e, "Could not unregister connection");
                first_error.get_or_insert(e);
            }
        }
        debug!(
            pinged = round.pinged.len(),
            failed = round.failed.len(),
            "Ping cycle finished"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(round.failed),
        }
    }

    async fn unresponsive_sweep(&self) -> Result<SweepReport, StoreError> {
        let timeout = self.config.ping_timeout().as_secs_f64();
        self.sweeper.sweep_unresponsive(timeout, self).await
    }

    async fn stale_sweep(&self, stale_timeout: Duration) -> Result<SweepReport, StoreError> {
        self.sweeper
            .sweep_stale(stale_timeout.as_secs_f64(), self)
            .await
    }
}

#[async_trait]
impl Reclaim for Inner {
    async fn reclaim(&self, id: OwnedConnectionId) -> Result<(), StoreError> {
        if let Some(handle) = self.sockets.get(&id) {
            handle.disconnect(true);
        }
        self.teardown(&id).await
    }
}

fn ensure_nonzero(what: &str, period: Duration) -> Result<(), RegistryError> {
    if period.is_zero() {
        return Err(RegistryError::InvalidConfig(format!(
            "{what} must be greater than zero"
        )));
    }
    Ok(())
}

/// Apply one connection's transport events until it disconnects. A closed
/// event channel counts as a disconnect.
async fn route_events(
    inner: Weak<Inner>,
    id: OwnedConnectionId,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Pong => {
                if let Err(e) = inner.liveness.on_pong(&id).await {
                    warn!(connection_id = %id.id(), error = %e, "Could not record pong");
                }
            }
            TransportEvent::Activity => {
                if let Err(e) = inner.registry.touch(&id).await {
                    warn!(connection_id = %id.id(), error = %e, "Could not refresh last_seen");
                }
            }
            TransportEvent::Error(reason) => {
                warn!(connection_id = %id.id(), %reason, "Transport error");
            }
            TransportEvent::Disconnect(reason) => {
                info!(connection_id = %id.id(), %reason, "Client disconnected");
                if let Err(e) = inner.teardown(&id).await {
                    warn!(connection_id = %id.id(), error = %e, "Could not unregister connection");
                }
                return;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        if let Err(e) = inner.teardown(&id).await {
            warn!(connection_id = %id.id(), error = %e, "Could not unregister connection");
        }
    }
}
