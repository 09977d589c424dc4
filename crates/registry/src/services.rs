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

//! Periodic background jobs.
//!
//! Each job is a tokio task ticking on `tokio::time::interval`, so a paused
//! runtime clock drives them deterministically in tests. Every job owns a
//! child of one root cancellation token.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    Ping,
    UnresponsiveSweep,
    StaleSweep,
}

struct RunningJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    root: CancellationToken,
    jobs: Mutex<HashMap<Job, RunningJob>>,
}

impl Scheduler {
    /// Run `work` every `period`, starting one period from now. Starting a
    /// job that is already running replaces it.
    pub(crate) fn start<F, Fut>(&self, job: Job, period: Duration, mut work: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.root.child_token();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => work().await,
                }
            }
            debug!(?job, "Periodic job stopped");
        });

        let previous = self
            .jobs
            .lock()
            .unwrap()
            .insert(job, RunningJob { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        debug!(?job, ?period, "Periodic job started");
    }

    pub(crate) fn is_running(&self, job: Job) -> bool {
        self.jobs
            .lock()
            .unwrap()
            .get(&job)
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Cancel every job. The returned handles finish once any in-flight run
    /// completes.
    pub(crate) fn stop_all(&self) -> Vec<JoinHandle<()>> {
        self.jobs
            .lock()
            .unwrap()
            .drain()
            .map(|(_, running)| {
                running.cancel.cancel();
                running.handle
            })
            .collect()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
