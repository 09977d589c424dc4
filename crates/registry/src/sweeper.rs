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

//! The two reclamation passes.
//!
//! Both scan cluster-wide state but only ever close connections this node
//! owns. Records owned by another node are counted and left alone, even when
//! they look dead. Unparsable records cannot be attributed to anyone and are
//! deleted by whichever node sees them first.

use std::sync::Arc;

use async_trait::async_trait;
use switchboard_common::Clock;
use tracing::{debug, warn};

use crate::liveness::LivenessTracker;
use crate::ownership::{OwnedConnectionId, Owner};
use crate::registry::{ConnectionRegistry, ScannedRecord};
use crate::store::StoreError;

/// Full teardown of a connection this node owns: force-close the handle, then
/// drop every trace of it.
#[async_trait]
pub trait Reclaim: Send + Sync {
    async fn reclaim(&self, id: OwnedConnectionId) -> Result<(), StoreError>;
}

/// What a single sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Local connections closed and unregistered.
    pub reclaimed: usize,
    /// Ping records with no connection record behind them.
    pub orphans_removed: usize,
    /// Unparsable connection records deleted.
    pub corrupt_removed: usize,
    /// Expired entries left alone because another node owns them.
    pub foreign_skipped: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

pub struct Sweeper {
    registry: Arc<ConnectionRegistry>,
    liveness: Arc<LivenessTracker>,
    owner: Arc<Owner>,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        liveness: Arc<LivenessTracker>,
        owner: Arc<Owner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            liveness,
            owner,
            clock,
        }
    }

    /// Reclaim local connections whose ping has gone unanswered for longer
    /// than `ping_timeout` seconds. A ping timestamp that does not parse counts
    /// as expired.
    pub async fn sweep_unresponsive(
        &self,
        ping_timeout: f64,
        reclaim: &dyn Reclaim,
    ) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let mut outstanding: Vec<_> = self.liveness.outstanding().await?.into_iter().collect();
        outstanding.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, sent_at) in outstanding {
            let expired = match sent_at {
                Some(sent_at) => now - sent_at > ping_timeout,
                None => true,
            };
            if !expired {
                continue;
            }
            let Some(record) = self.registry.lookup(&id).await? else {
                self.liveness.clear(&id).await?;
                report.orphans_removed += 1;
                continue;
            };
            match self.owner.claim(&id, &record) {
                Some(owned) => {
                    warn!(connection_id = %id, "Reclaiming unresponsive connection");
                    reclaim.reclaim(owned).await?;
                    report.reclaimed += 1;
                }
                None => report.foreign_skipped += 1,
            }
        }

        debug!(?report, "Unresponsive sweep finished");
        Ok(report)
    }

    /// Reclaim local connections with no activity for longer than
    /// `stale_timeout` seconds, and delete corrupt records from any node.
    pub async fn sweep_stale(
        &self,
        stale_timeout: f64,
        reclaim: &dyn Reclaim,
    ) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for (id, scanned) in self.registry.scan().await? {
            match scanned {
                ScannedRecord::Corrupt(reason) => {
                    warn!(connection_id = %id, %reason, "Removing corrupt connection record");
                    self.registry.remove(&id).await?;
                    self.liveness.clear(&id).await?;
                    report.corrupt_removed += 1;
                }
                ScannedRecord::Valid(record) => {
                    if now - record.last_seen <= stale_timeout {
                        continue;
                    }
                    match self.owner.claim(&id, &record) {
                        Some(owned) => {
                            warn!(
                                connection_id = %id,
                                idle_seconds = now - record.last_seen,
                                "Reclaiming stale connection"
                            );
                            reclaim.reclaim(owned).await?;
                            report.reclaimed += 1;
                        }
                        None => report.foreign_skipped += 1,
                    }
                }
            }
        }

        debug!(?report, "Stale sweep finished");
        Ok(report)
    }
}
