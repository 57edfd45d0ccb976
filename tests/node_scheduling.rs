//! Integration tests for node scheduling
//!
//! Looped chains, suspension, unscheduling, failure policy and the worker
//! pool, all observed tick by tick.

use std::thread;
use std::time::Duration;

use chainrt::core_registry;
use chainrt::runtime::error::ChainError;
use chainrt::runtime::{ChainBuilder, ChainState, Node, NodeConfig, RuntimeError, Value};

fn node_with(worker_threads: usize, unschedule_on_failure: bool) -> Node {
    Node::with_config(NodeConfig {
        name: "test".to_string(),
        worker_threads,
        strict_variables: false,
        unschedule_on_failure,
    })
    .unwrap()
}

#[test]
fn test_looped_chain_runs_once_per_tick() {
    let registry = core_registry();
    let chain = ChainBuilder::new("loop")
        .looped(true)
        .let_value(1i64)
        .block("Math.Add", vec![Value::Int(1)])
        .build(&registry)
        .unwrap();

    let mut node = node_with(0, true);
    node.schedule(&chain).unwrap();
    // warmed up, nothing ran yet
    assert_eq!(chain.iteration_count(), 0);

    assert!(node.tick());
    assert_eq!(chain.iteration_count(), 1);
    assert!(node.tick());
    assert_eq!(chain.iteration_count(), 2);
    assert_eq!(chain.finished_output(), Value::Int(2));
    assert!(node.is_scheduled(&chain));
}

#[test]
fn test_schedule_twice_is_rejected() {
    let registry = core_registry();
    let chain = ChainBuilder::new("twice")
        .looped(true)
        .let_value(1i64)
        .build(&registry)
        .unwrap();

    let mut node = node_with(0, true);
    node.schedule(&chain).unwrap();
    let again = node.schedule(&chain);
    assert!(matches!(again, Err(RuntimeError::Chain(ChainError::AlreadyScheduled(_)))));
    assert_eq!(node.scheduled_count(), 1);
}

#[test]
fn test_chains_resume_in_scheduling_order() {
    let registry = core_registry();
    let writer = ChainBuilder::new("writer")
        .looped(true)
        .let_value(7i64)
        .block("Set", vec![Value::string("shared"), Value::string(""), Value::Bool(true)])
        .build(&registry)
        .unwrap();

    let mut node = node_with(0, true);
    node.schedule(&writer).unwrap();
    node.tick();

    let reader = ChainBuilder::new("reader")
        .block("Get", vec![Value::string("shared"), Value::string(""), Value::Bool(true)])
        .block("Math.Add", vec![Value::Int(1)])
        .build(&registry)
        .unwrap();
    node.schedule(&reader).unwrap();
    assert_eq!(node.scheduled_chains().len(), 2);
    assert!(node.scheduled_chains()[0].ptr_eq(&writer));

    node.tick();
    assert_eq!(reader.finished_output(), Value::Int(8));
    assert!(!node.is_scheduled(&reader));
    assert!(node.is_scheduled(&writer));
}

#[test]
fn test_unschedule_runs_cleanup() {
    let registry = core_registry();
    let chain = ChainBuilder::new("stoppable")
        .looped(true)
        .let_value(3i64)
        .block("Set", vec![Value::string("g"), Value::string(""), Value::Bool(true)])
        .build(&registry)
        .unwrap();

    let mut node = node_with(0, true);
    node.schedule(&chain).unwrap();
    node.tick();
    node.tick();
    assert_eq!(chain.iteration_count(), 2);
    assert_eq!(node.global_variable("g").unwrap().get(), Value::Int(3));

    node.unschedule(&chain).unwrap();
    assert!(node.is_empty());
    assert!(chain.node().is_none());
    assert_eq!(chain.state(), ChainState::Ended);
    // the only reference was released by cleanup
    let g = node.global_variable("g").unwrap();
    assert_eq!(g.refcount(), 0);
    assert!(g.get().is_none());

    assert!(matches!(
        node.unschedule(&chain),
        Err(RuntimeError::Chain(ChainError::NotScheduled(_)))
    ));
    chain.destroy().unwrap();
}

#[test]
fn test_sleep_suspends_until_deadline() {
    let registry = core_registry();
    let chain = ChainBuilder::new("sleepy")
        .input(4i64)
        .block("Sleep", vec![Value::Float(0.05)])
        .build(&registry)
        .unwrap();

    let mut node = node_with(0, true);
    node.schedule(&chain).unwrap();

    node.tick();
    assert!(node.is_scheduled(&chain));
    node.tick();
    assert!(node.is_scheduled(&chain), "woke before the deadline");

    thread::sleep(Duration::from_millis(80));
    node.tick();
    assert!(!node.is_scheduled(&chain));
    assert_eq!(chain.finished_output(), Value::Int(4));
}

#[test]
fn test_checksum_on_worker_pool() {
    let registry = core_registry();
    let chain = ChainBuilder::new("digest")
        .input("abc")
        .block("Checksum", vec![])
        .build(&registry)
        .unwrap();

    let mut node = node_with(1, true);
    node.schedule(&chain).unwrap();
    node.run(None);

    let hash = blake3::hash(b"abc");
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    assert_eq!(chain.finished_output(), Value::Int(i64::from_le_bytes(head)));
    assert_eq!(chain.state(), ChainState::Ended);
}

#[test]
fn test_failed_chain_is_dropped_by_default() {
    let registry = core_registry();
    let chain = ChainBuilder::new("doomed")
        .looped(true)
        .block("Fail", vec![])
        .build(&registry)
        .unwrap();

    let mut node = node_with(0, true);
    node.schedule(&chain).unwrap();
    assert!(!node.tick());
    assert_eq!(chain.state(), ChainState::Failed);
    assert_eq!(chain.finished_error().as_deref(), Some("Fail block reached"));
}

#[test]
fn test_failed_chain_restarts_when_configured() {
    let registry = core_registry();
    let chain = ChainBuilder::new("phoenix")
        .block("Fail", vec![])
        .build(&registry)
        .unwrap();

    let mut node = node_with(0, false);
    node.schedule(&chain).unwrap();
    node.run(Some(3));

    assert!(node.is_scheduled(&chain));
    assert_eq!(chain.state(), ChainState::Failed);

    node.stop_all();
    assert!(node.is_empty());
    chain.destroy().unwrap();
}

#[test]
fn test_destroy_refuses_scheduled_chain() {
    let registry = core_registry();
    let chain = ChainBuilder::new("busy")
        .looped(true)
        .let_value(1i64)
        .build(&registry)
        .unwrap();

    let mut node = node_with(0, true);
    node.schedule(&chain).unwrap();
    assert!(chain.destroy().is_err());

    drop(node);
    assert!(chain.node().is_none());
    chain.destroy().unwrap();
}
