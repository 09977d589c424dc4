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

mod common;

use std::time::Duration;

use common::{Cluster, START, connect, settle};
use pretty_assertions::assert_eq;
use serde_json::json;
use switchboard_registry::{
    ConnectionId, LivenessState, RegistryError, SharedStore, SweepReport, TransportEvent,
};

const STALE: Duration = Duration::from_secs(900);

#[tokio::test]
async fn test_ping_pong_round_trip() {
    let cluster = Cluster::new();
    let a = cluster.node("a", 10);
    let (id, handle) = connect(&a, "s1").await;

    let failed = a.run_ping_cycle().await.unwrap();
    assert!(failed.is_empty());
    assert_eq!(
        handle.sent(),
        vec![(
            "ping".to_string(),
            json!({"type": "ping", "timestamp": START})
        )]
    );
    assert_eq!(
        a.connection_state(&id).await.unwrap(),
        LivenessState::PingOutstanding { sent_at: START }
    );

    cluster.clock.advance(2.5);
    handle.emit(TransportEvent::Pong);
    settle().await;

    assert_eq!(a.connection_state(&id).await.unwrap(), LivenessState::Active);
    assert_eq!(
        cluster
            .store
            .hash_get("test:ping_awaiting", id.as_str())
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        a.registry().lookup(&id).await.unwrap().unwrap().last_seen,
        START + 2.5
    );
}

#[tokio::test]
async fn test_ping_send_failure_unregisters() {
    let cluster = Cluster::new();
    let a = cluster.node("a", 10);
    let (dead, dead_handle) = connect(&a, "dead").await;
    let (alive, _alive_handle) = connect(&a, "alive").await;
    dead_handle.set_fail_sends(true);

    let failed = a.run_ping_cycle().await.unwrap();
    assert_eq!(failed, vec![dead.clone()]);
    assert_eq!(a.local_connection_ids(), vec![alive]);
    assert!(a.registry().lookup(&dead).await.unwrap().is_none());
}

#[tokio::test]
async fn test_ping_cycle_only_pings_local_connections() {
    let cluster = Cluster::new();
    let a = cluster.node("a", 10);
    let b = cluster.node("b", 10);
    let (_, a_handle) = connect(&a, "s1").await;
    let (_, b_handle) = connect(&b, "s1").await;

    a.run_ping_cycle().await.unwrap();
    assert_eq!(a_handle.sent_events(), vec!["ping".to_string()]);
    assert!(b_handle.sent_events().is_empty());
}

#[tokio::test]
async fn test_unresponsive_reclamation() {
    let cluster = Cluster::new();
    let a = cluster.node("a", 10);
    let (id, handle) = connect(&a, "s1").await;
    a.run_ping_cycle().await.unwrap();

    cluster.clock.advance(30.0);
    assert!(a.run_unresponsive_sweep().await.unwrap().is_empty());

    cluster.clock.advance(31.0);
    let report = a.run_unresponsive_sweep().await.unwrap();
    assert_eq!(report.reclaimed, 1);
    assert!(handle.was_force_closed());
    assert!(a.local_connection_ids().is_empty());
    assert!(a.registry().lookup(&id).await.unwrap().is_none());
    assert_eq!(a.connection_state(&id).await.unwrap(), LivenessState::Closed);

    // The transport's own disconnect event arrives afterwards and is harmless.
    settle().await;
    assert_eq!(a.registry().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_stale_reclamation_without_ping() {
    let cluster = Cluster::new();
    let a = cluster.node("a", 10);
    let (quiet, quiet_handle) = connect(&a, "quiet").await;
    let (chatty, chatty_handle) = connect(&a, "chatty").await;

    cluster.clock.advance(600.0);
    chatty_handle.emit(TransportEvent::Activity);
    settle().await;
    cluster.clock.advance(301.0);

    let report = a.run_stale_sweep(STALE).await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            reclaimed: 1,
            ..Default::default()
        }
    );
    assert!(quiet_handle.was_force_closed());
    assert!(!chatty_handle.was_force_closed());
    assert!(a.registry().lookup(&quiet).await.unwrap().is_none());
    assert!(a.registry().lookup(&chatty).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sweeps_never_touch_foreign_records() {
    let cluster = Cluster::new();
    let a = cluster.node("a", 10);
    let b = cluster.node("b", 10);
    let (b_id, b_handle) = connect(&b, "s1").await;
    b.run_ping_cycle().await.unwrap();

    cluster.clock.advance(10_000.0);
    let unresponsive = a.run_unresponsive_sweep().await.unwrap();
    let stale = a.run_stale_sweep(STALE).await.unwrap();

    assert_eq!(unresponsive.foreign_skipped, 1);
    assert_eq!(stale.foreign_skipped, 1);
    assert_eq!(unresponsive.reclaimed + stale.reclaimed, 0);
    assert!(b_handle.disconnect_calls().is_empty());
    assert!(b.registry().lookup(&b_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_crashed_peer_records_are_left_in_place() {
    let cluster = Cluster::new();
    let b = cluster.node("b", 10);
    let a_id = {
        let a = cluster.node("a", 10);
        let (id, _handle) = connect(&a, "a1").await;
        id
        // `a` is dropped here without shutdown.
    };

    cluster.clock.advance(STALE.as_secs_f64() + 1.0);
    let report = b.run_stale_sweep(STALE).await.unwrap();
    assert_eq!(report.foreign_skipped, 1);
    assert!(b.registry().lookup(&a_id).await.unwrap().is_some());
    assert!(
        cluster
            .store
            .hash_get("test:stats:a", "stats")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_orphan_ping_records_are_removed_by_any_node() {
    let cluster = Cluster::new();
    let b = cluster.node("b", 10);
    cluster
        .store
        .hash_set("test:ping_awaiting", "a:gone", &(START - 120.0).to_string())
        .await
        .unwrap();

    let report = b.run_unresponsive_sweep().await.unwrap();
    assert_eq!(report.orphans_removed, 1);
    assert_eq!(
        cluster.store.hash_length("test:ping_awaiting").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_corrupt_records_deleted_regardless_of_owner() {
    let cluster = Cluster::new();
    let b = cluster.node("b", 10);
    let (mine, _handle) = connect(&b, "s1").await;
    cluster
        .store
        .hash_set("test:connections", "a:broken", "not json at all")
        .await
        .unwrap();

    let report = b.run_stale_sweep(STALE).await.unwrap();
    assert_eq!(report.corrupt_removed, 1);
    assert!(
        b.registry()
            .lookup(&ConnectionId::from("a:broken"))
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(b.registry().count().await.unwrap(), 1);
    assert!(b.registry().lookup(&mine).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sweeps_surface_store_failure() {
    let cluster = Cluster::new();
    let a = cluster.node("a", 10);
    connect(&a, "s1").await;
    cluster.store.set_available(false);

    assert!(matches!(
        a.run_stale_sweep(STALE).await,
        Err(RegistryError::StoreUnavailable(_))
    ));
    assert!(matches!(
        a.run_unresponsive_sweep().await,
        Err(RegistryError::StoreUnavailable(_))
    ));
    assert!(matches!(
        a.run_ping_cycle().await,
        Err(RegistryError::StoreUnavailable(_))
    ));
}
