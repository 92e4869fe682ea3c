//! Leader election across several registries sharing one store.

mod common;

use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use common::Seen;
use common::marker_path;
use common::node;
use common::record;
use common::settle;
use proptest::prelude::*;
use rollcall::NodeMode;
use rollcall::NodeState;
use rollcall::Registry;
use rollcall::core::CoordinationStore;
use rollcall::core::CreateMode;
use rollcall::core::StoreConnector;
use rollcall::core::WatchedEvent;
use rollcall::core::ensure_persistent_path;
use rollcall::testing::InMemoryEnsemble;

fn masters(registries: &[Registry]) -> usize {
    registries.iter().filter(|r| r.state().is_master()).count()
}

/// `size` unstarted echo-server registries contending in `zone`.
fn contenders(ensemble: &InMemoryEnsemble, size: usize, zone: i32) -> Vec<Registry> {
    (0..size).map(|_| node(ensemble, "echo-server", zone, NodeMode::MasterSlave)).collect()
}

#[test]
fn test_first_registrant_becomes_master() {
    let ensemble = InMemoryEnsemble::new();
    let mut a = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let mut b = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let a_seen = record(&mut a);
    let b_seen = record(&mut b);

    a.start().unwrap();
    b.start().unwrap();
    settle(&ensemble, &mut [&mut a, &mut b]);

    assert_eq!(a.state(), NodeState::Master);
    assert_eq!(b.state(), NodeState::Slave);
    let marker = ensemble.node_data(&marker_path("echo-server", 0)).unwrap();
    assert_eq!(marker, a.server_id().unwrap().as_str().as_bytes());

    // Initial registration is not reported as a change.
    assert!(a_seen.take_states().is_empty());
    assert!(b_seen.take_states().is_empty());
}

#[test]
fn test_exactly_one_master_per_group() {
    let ensemble = InMemoryEnsemble::new();
    let mut group: Vec<Registry> = contenders(&ensemble, 5, 3);
    for registry in &mut group {
        registry.start().unwrap();
    }
    let mut refs: Vec<&mut Registry> = group.iter_mut().collect();
    settle(&ensemble, &mut refs);

    assert_eq!(masters(&group), 1);
    let master = group.iter().find(|r| r.state().is_master()).unwrap();
    let marker = ensemble.node_data(&marker_path("echo-server", 3)).unwrap();
    assert_eq!(marker, master.server_id().unwrap().as_str().as_bytes());
}

#[test]
fn test_concurrent_registration_elects_one_master() {
    const CONTENDERS: usize = 6;
    let ensemble = InMemoryEnsemble::new();
    let barrier = Arc::new(Barrier::new(CONTENDERS));
    let handles: Vec<_> = contenders(&ensemble, CONTENDERS, 3)
        .into_iter()
        .map(|mut registry| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.start().unwrap();
                registry
            })
        })
        .collect();
    let mut group: Vec<Registry> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    let mut refs: Vec<&mut Registry> = group.iter_mut().collect();
    settle(&ensemble, &mut refs);

    assert_eq!(masters(&group), 1);
    let master = group.iter().find(|r| r.state().is_master()).unwrap();
    let marker = marker_path("echo-server", 3);
    assert_eq!(ensemble.node_data(&marker).unwrap(), master.server_id().unwrap().as_str().as_bytes());
    // Every contender, winner included, keeps a watch on the marker.
    assert_eq!(ensemble.watch_count(&marker), CONTENDERS);
}

#[test]
fn test_groups_elect_independently() {
    let ensemble = InMemoryEnsemble::new();
    let mut zone0 = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let mut zone1 = node(&ensemble, "echo-server", 1, NodeMode::MasterSlave);
    let mut other = node(&ensemble, "cache-server", 0, NodeMode::MasterSlave);
    zone0.start().unwrap();
    zone1.start().unwrap();
    other.start().unwrap();

    assert_eq!(zone0.state(), NodeState::Master);
    assert_eq!(zone1.state(), NodeState::Master);
    assert_eq!(other.state(), NodeState::Master);
}

#[test]
fn test_failover_after_master_session_loss() {
    let ensemble = InMemoryEnsemble::new();
    let mut a = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let mut b = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let a_seen = record(&mut a);
    let b_seen = record(&mut b);
    a.start().unwrap();
    b.start().unwrap();
    settle(&ensemble, &mut [&mut a, &mut b]);
    assert_eq!(b.state(), NodeState::Slave);

    let a_session = ensemble.ephemeral_owner(&marker_path("echo-server", 0)).unwrap();
    ensemble.expire(a_session);
    settle(&ensemble, &mut [&mut a, &mut b]);

    assert_eq!(b.state(), NodeState::Master);
    assert_eq!(b_seen.take(), vec![Seen::State(NodeState::Master)]);
    let marker = ensemble.node_data(&marker_path("echo-server", 0)).unwrap();
    assert_eq!(marker, b.server_id().unwrap().as_str().as_bytes());

    assert!(a.is_session_lost());
    assert_eq!(a.state(), NodeState::Slave);
    assert_eq!(a_seen.take_states(), vec![NodeState::Slave]);
}

#[test]
fn test_failover_after_master_stops() {
    let ensemble = InMemoryEnsemble::new();
    let mut group: Vec<Registry> = contenders(&ensemble, 3, 0);
    for registry in &mut group {
        registry.start().unwrap();
    }
    let first = group.iter().position(|r| r.state().is_master()).unwrap();
    let old_master = group.remove(first);
    drop(old_master);

    let mut refs: Vec<&mut Registry> = group.iter_mut().collect();
    settle(&ensemble, &mut refs);
    assert_eq!(masters(&group), 1);
}

/// Stop the master while the next `failures` store calls fail.
fn failover_with_store_errors(failures: u32) {
    let ensemble = InMemoryEnsemble::new();
    let mut a = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let mut b = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let b_seen = record(&mut b);
    a.start().unwrap();
    b.start().unwrap();
    settle(&ensemble, &mut [&mut a, &mut b]);

    ensemble.fail_next(failures);
    a.stop();
    settle(&ensemble, &mut [&mut b]);

    assert_eq!(b.state(), NodeState::Master);
    assert_eq!(b_seen.take_states(), vec![NodeState::Master]);
    let marker = marker_path("echo-server", 0);
    assert_eq!(ensemble.node_data(&marker).unwrap(), b.server_id().unwrap().as_str().as_bytes());
    assert_eq!(ensemble.watch_count(&marker), 1);
}

#[test]
fn test_failover_when_marker_create_fails() {
    failover_with_store_errors(1);
}

#[test]
fn test_failover_when_marker_create_and_read_fail() {
    failover_with_store_errors(2);
}

#[test]
fn test_foreign_marker_blocks_until_released() {
    let ensemble = InMemoryEnsemble::new();
    let intruder = ensemble.connect("mem", Duration::from_secs(5), Arc::new(|_: WatchedEvent| {})).unwrap();
    ensure_persistent_path(&*intruder, "/master/echo-server", b"master").unwrap();
    intruder
        .create(&marker_path("echo-server", 0), b"echo-server:0:intruder", CreateMode::Ephemeral)
        .unwrap();

    let mut a = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let seen = record(&mut a);
    a.start().unwrap();
    assert_eq!(a.state(), NodeState::Slave);

    intruder.close();
    settle(&ensemble, &mut [&mut a]);
    assert_eq!(a.state(), NodeState::Master);
    assert_eq!(seen.take_states(), vec![NodeState::Master]);
}

#[test]
fn test_disconnected_master_steps_down_and_recovers() {
    let ensemble = InMemoryEnsemble::new();
    let mut a = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let mut b = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let a_seen = record(&mut a);
    let b_seen = record(&mut b);
    a.start().unwrap();
    b.start().unwrap();
    settle(&ensemble, &mut [&mut a, &mut b]);

    let a_session = ensemble.ephemeral_owner(&marker_path("echo-server", 0)).unwrap();
    ensemble.disconnect(a_session);
    settle(&ensemble, &mut [&mut a, &mut b]);
    assert_eq!(a.state(), NodeState::Slave);
    assert_eq!(b.state(), NodeState::Slave);

    // The marker survived the disconnect, so A reclaims it.
    ensemble.reconnect(a_session);
    settle(&ensemble, &mut [&mut a, &mut b]);
    assert_eq!(a.state(), NodeState::Master);
    assert_eq!(a_seen.take_states(), vec![NodeState::Slave, NodeState::Master]);
    assert!(b_seen.take_states().is_empty());
}

#[test]
fn test_master_master_never_contests() {
    let ensemble = InMemoryEnsemble::new();
    let mut a = node(&ensemble, "echo-server", 0, NodeMode::MasterMaster);
    let mut b = node(&ensemble, "echo-server", 0, NodeMode::MasterMaster);
    let a_seen = record(&mut a);
    a.start().unwrap();
    b.start().unwrap();
    settle(&ensemble, &mut [&mut a, &mut b]);

    assert_eq!(a.state(), NodeState::Master);
    assert_eq!(b.state(), NodeState::Master);
    assert!(!ensemble.exists(&marker_path("echo-server", 0)));

    let a_session = ensemble.ephemeral_owner(&common::instance_path(a.server_id().unwrap())).unwrap();
    ensemble.disconnect(a_session);
    settle(&ensemble, &mut [&mut a, &mut b]);
    assert_eq!(a.state(), NodeState::Master);
    assert!(a_seen.take_states().is_empty());
}

#[test]
fn test_state_channel_follows_transitions() {
    let ensemble = InMemoryEnsemble::new();
    let mut a = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let mut b = node(&ensemble, "echo-server", 0, NodeMode::MasterSlave);
    let b_state = b.subscribe_state();
    assert_eq!(*b_state.borrow(), NodeState::Init);

    a.start().unwrap();
    b.start().unwrap();
    assert_eq!(*b_state.borrow(), NodeState::Slave);

    a.stop();
    settle(&ensemble, &mut [&mut b]);
    assert_eq!(*b_state.borrow(), NodeState::Master);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_one_master_survives_any_stop_order(
        size in 2usize..6,
        kills in proptest::collection::vec(0usize..6, 0..5)
    ) {
        let ensemble = InMemoryEnsemble::new();
        let mut group: Vec<Registry> = contenders(&ensemble, size, 0);
        for registry in &mut group {
            registry.start().unwrap();
        }

        for kill in kills {
            if group.len() <= 1 {
                break;
            }
            let index = kill % group.len();
            group.remove(index);
            let mut refs: Vec<&mut Registry> = group.iter_mut().collect();
            settle(&ensemble, &mut refs);
            prop_assert_eq!(masters(&group), 1);
        }
    }
}
