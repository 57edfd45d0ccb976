//! Integration tests for chain execution
//!
//! Chains are assembled from the core registry and driven either directly
//! with `run_blocks` or through a node.

use chainrt::core_registry;
use chainrt::runtime::{
    ActivationError, ChainBuilder, ChainState, Context, FlowOutcome, Node, NodeConfig, Value, run_blocks,
};

fn quiet_node() -> Node {
    Node::with_config(NodeConfig {
        worker_threads: 0,
        ..NodeConfig::default()
    })
    .unwrap()
}

#[test]
fn test_const_then_add() {
    let registry = core_registry();
    let chain = ChainBuilder::new("sum")
        .let_value(5i64)
        .block("Math.Add", vec![Value::Int(3)])
        .build(&registry)
        .unwrap();

    let mut node = quiet_node();
    node.schedule(&chain).unwrap();
    let ticks = node.run(None);

    assert_eq!(ticks, 1);
    assert_eq!(chain.finished_output(), Value::Int(8));
    assert_eq!(chain.iteration_count(), 1);
    assert_eq!(chain.state(), ChainState::Ended);
    assert!(chain.node().is_none());
}

#[test]
fn test_run_blocks_without_node() {
    let registry = core_registry();
    let chain = ChainBuilder::new("detached")
        .let_value(2i64)
        .block("Math.Multiply", vec![Value::Int(21)])
        .build(&registry)
        .unwrap();

    let mut ctx = Context::detached();
    let (flow, out) = run_blocks(&chain.blocks(), &mut ctx, &Value::None).unwrap();
    assert_eq!(flow, FlowOutcome::Continued);
    assert_eq!(out, Value::Int(42));
}

#[test]
fn test_stop_ends_looped_chain() {
    let registry = core_registry();
    let chain = ChainBuilder::new("stopper")
        .looped(true)
        .let_value(5i64)
        .block("Stop", vec![])
        .build(&registry)
        .unwrap();

    let mut node = quiet_node();
    node.schedule(&chain).unwrap();
    node.run(Some(10));

    assert!(node.is_empty());
    assert_eq!(chain.iteration_count(), 1);
    assert_eq!(chain.finished_output(), Value::Int(5));
    assert_eq!(chain.state(), ChainState::Ended);
}

#[test]
fn test_return_skips_remaining_blocks() {
    let registry = core_registry();
    let chain = ChainBuilder::new("early")
        .let_value(1i64)
        .block("Math.Add", vec![Value::Int(1)])
        .block("Return", vec![])
        .block("Math.Add", vec![Value::Int(100)])
        .build(&registry)
        .unwrap();

    let mut node = quiet_node();
    node.schedule(&chain).unwrap();
    node.run(None);

    assert_eq!(chain.finished_output(), Value::Int(2));
    assert_eq!(chain.state(), ChainState::Ended);
}

#[test]
fn test_fail_marks_chain_failed() {
    let registry = core_registry();
    let chain = ChainBuilder::new("broken")
        .let_value(1i64)
        .block("Fail", vec![Value::string("out of coffee")])
        .build(&registry)
        .unwrap();

    let mut node = quiet_node();
    node.schedule(&chain).unwrap();
    node.run(None);

    assert_eq!(chain.state(), ChainState::Failed);
    let error = chain.finished_error().unwrap();
    assert!(error.contains("out of coffee"), "unexpected error: {}", error);
    assert!(!node.is_scheduled(&chain));
}

#[test]
fn test_activation_error_fails_run_blocks() {
    let registry = core_registry();
    let chain = ChainBuilder::new("bad-take")
        .let_value(Value::Seq(vec![Value::Int(1)]))
        .block("Take", vec![Value::Int(4)])
        .build(&registry)
        .unwrap();

    let mut ctx = Context::detached();
    let err = run_blocks(&chain.blocks(), &mut ctx, &Value::None).unwrap_err();
    assert!(matches!(err, ActivationError::Failed(_) | ActivationError::InvalidInput { .. }));
    assert!(ctx.is_failed());
    assert!(ctx.failure_message().unwrap().contains("Take out of range"));
}

#[test]
fn test_logic_gates_chain() {
    let registry = core_registry();
    let chain = ChainBuilder::new("gate")
        .input(10i64)
        .let_value(3i64)
        .block("Is", vec![Value::Int(3)])
        .block("And", vec![])
        .block("Math.Add", vec![Value::Int(1)])
        .build(&registry)
        .unwrap();

    // And rebases onto the chain input on success
    let mut ctx = Context::detached();
    let (_, out) = run_blocks(&chain.blocks(), &mut ctx, &chain.root_input()).unwrap();
    assert_eq!(out, Value::Int(11));
}

#[test]
fn test_repeat_with_nested_blocks() {
    let registry = core_registry();
    let counter = registry.create("Push").unwrap();
    chainrt::runtime::loader::apply_param(&counter, 0, &Value::string("hits")).unwrap();

    let chain = ChainBuilder::new("repeat")
        .let_value(1i64)
        .block("Repeat", vec![Value::Block(counter), Value::Int(4)])
        .block("Count", vec![Value::string("hits")])
        .build(&registry)
        .unwrap();

    let mut node = quiet_node();
    node.schedule(&chain).unwrap();
    node.run(None);
    assert_eq!(chain.finished_output(), Value::Int(4));
}

#[test]
fn test_unknown_operator_block_is_rejected() {
    let registry = core_registry();
    let result = ChainBuilder::new("nope").block("Math.Divide", vec![]).build(&registry);
    assert!(result.is_err());
}

#[test]
fn test_stack_blocks_in_scheduled_chain() {
    let registry = core_registry();
    let chain = ChainBuilder::new("stack")
        .let_value(4i64)
        .block("Push", vec![])
        .let_value(10i64)
        .block("Math.Add", vec![Value::Int(1)])
        .block("Push", vec![])
        .block("Swap", vec![])
        .block("Pop", vec![])
        .block("Pop", vec![])
        .block("Math.Multiply", vec![Value::Int(2)])
        .build(&registry)
        .unwrap();

    let mut node = quiet_node();
    node.schedule(&chain).unwrap();
    node.run(None);

    assert_eq!(chain.state(), ChainState::Ended);
    assert_eq!(chain.finished_output(), Value::Int(22));
}

#[test]
fn test_stack_underflow_is_refused_at_schedule() {
    let registry = core_registry();
    let chain = ChainBuilder::new("underflow")
        .let_value(1i64)
        .block("Drop", vec![])
        .build(&registry)
        .unwrap();

    let mut node = quiet_node();
    assert!(node.schedule(&chain).is_err());
    assert!(node.is_empty());
}
