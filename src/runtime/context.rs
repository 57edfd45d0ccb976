//! Execution contexts and the block interpreter loop
//!
//! Each scheduled chain runs as one cooperative task. The task owns a
//! [`Context`]: the stack of chains currently executing (for variable
//! lookup), the sticky flow signal blocks raise, the value stack the
//! unnamed Push/Pop/Drop/Swap forms work on, and the handle the node
//! uses to decide when to resume the task.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use super::block::BlockRef;
use super::chain::{ChainRef, ChainState};
use super::error::{ActivationError, ActivationResult};
use super::node::NodeShared;
use super::value::Value;
use super::variables::{
    Variable, VariableMap, reference_global_variable, reference_variable, release_variable,
};
use super::workers::WorkerTask;

/// Non-local control signal raised by a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    /// Keep going
    #[default]
    Continue,
    /// Leave the current block list, yielding the returning block's input
    Return,
    /// Restart the chain from its input
    Restart,
    /// Stop the chain
    Stop,
    /// Feed the original input to the next block
    Rebase,
}

/// How a block list finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Every block ran
    Continued,
    /// A block returned
    Returned,
    /// A block stopped the chain
    Stopped,
    /// A block restarted the chain
    Restarted,
}

/// State shared between a chain task and the node driving it
#[derive(Debug, Default)]
pub(crate) struct TaskShared {
    wake_at: Cell<Option<Instant>>,
    abort: Cell<bool>,
}

impl TaskShared {
    pub(crate) fn is_ready(&self, now: Instant) -> bool {
        self.wake_at.get().is_none_or(|at| at <= now)
    }

    pub(crate) fn request_abort(&self) {
        self.abort.set(true);
        self.wake_at.set(None);
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.abort.get()
    }
}

/// Live execution state of one running chain
pub struct Context {
    chain_stack: Vec<ChainRef>,
    node: Option<Rc<NodeShared>>,
    flow: FlowState,
    flow_storage: Value,
    failure: Option<String>,
    task: Option<Rc<TaskShared>>,
    orphan_variables: VariableMap,
    stack: Vec<Value>,
}

impl Context {
    /// A context with no coroutine and no node, for driving blocks
    /// directly. Suspending inside it is an error.
    pub fn detached() -> Self {
        Self {
            chain_stack: Vec::new(),
            node: None,
            flow: FlowState::Continue,
            flow_storage: Value::None,
            failure: None,
            task: None,
            orphan_variables: VariableMap::new(),
            stack: Vec::new(),
        }
    }

    pub(crate) fn for_task(node: Rc<NodeShared>, task: Rc<TaskShared>) -> Self {
        Self {
            node: Some(node),
            task: Some(task),
            ..Self::detached()
        }
    }

    pub(crate) fn with_node(node: Rc<NodeShared>) -> Self {
        Self {
            node: Some(node),
            ..Self::detached()
        }
    }

    /// Chains currently executing, outermost first
    pub fn chain_stack(&self) -> &[ChainRef] {
        &self.chain_stack
    }

    /// Innermost executing chain
    pub fn current_chain(&self) -> Option<&ChainRef> {
        self.chain_stack.last()
    }

    /// Enter a chain's scope
    pub fn push_chain(&mut self, chain: ChainRef) {
        self.chain_stack.push(chain);
    }

    /// Leave the innermost chain's scope
    pub fn pop_chain(&mut self) -> Option<ChainRef> {
        self.chain_stack.pop()
    }

    pub(crate) fn node(&self) -> Option<&Rc<NodeShared>> {
        self.node.as_ref()
    }

    pub(crate) fn orphan_variables_mut(&mut self) -> &mut VariableMap {
        &mut self.orphan_variables
    }

    /// Push onto the value stack
    pub fn stack_push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop the top of the value stack
    pub fn stack_pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    /// Top of the value stack
    pub fn stack_top(&self) -> Option<&Value> {
        self.stack.last()
    }

    /// Exchange the two topmost values; false when fewer than two exist
    pub fn stack_swap(&mut self) -> bool {
        let len = self.stack.len();
        if len < 2 {
            return false;
        }
        self.stack.swap(len - 1, len - 2);
        true
    }

    /// Number of values on the stack
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Current flow signal
    pub fn flow(&self) -> FlowState {
        self.flow
    }

    /// Value stored alongside the last Stop/Restart signal
    pub fn flow_storage(&self) -> &Value {
        &self.flow_storage
    }

    /// Clear the flow signal
    pub fn continue_flow(&mut self) {
        self.flow = FlowState::Continue;
    }

    /// Stop the running chain after this block
    pub fn stop_flow(&mut self, output: &Value) {
        self.flow = FlowState::Stop;
        self.flow_storage.clone_from(output);
    }

    /// Restart the running chain after this block; `seed` becomes the
    /// next iteration's input unless it is `None`
    pub fn restart_flow(&mut self, seed: &Value) {
        self.flow = FlowState::Restart;
        self.flow_storage.clone_from(seed);
    }

    /// Leave the current block list after this block
    pub fn return_flow(&mut self) {
        self.flow = FlowState::Return;
    }

    /// Feed the original input to the next block
    pub fn rebase_flow(&mut self) {
        self.flow = FlowState::Rebase;
    }

    /// Mark the context failed; the first message wins
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(message.into());
        }
    }

    /// Whether a block failed in this context
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// The failure message, if any
    pub fn failure_message(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Whether the context owns a coroutine it can suspend
    pub fn is_coroutine(&self) -> bool {
        self.task.is_some()
    }

    /// Whether the running chain should keep going
    pub fn should_continue(&self) -> bool {
        self.flow == FlowState::Continue
            && self.task.as_ref().is_none_or(|task| !task.abort_requested())
    }

    /// Resolve and reference a variable through this context's scopes
    pub fn reference_variable(&mut self, name: &str) -> Variable {
        reference_variable(self, name)
    }

    /// Reference a node-global variable
    pub fn reference_global_variable(&mut self, name: &str) -> Variable {
        reference_global_variable(self, name)
    }

    /// Release a variable reference
    pub fn release_variable(&mut self, var: &Variable) {
        release_variable(var);
    }

    /// Yield to the node for at least `seconds` (zero or negative yields
    /// until the next tick). Returns `StopChain` if the chain was stopped
    /// while suspended.
    pub async fn suspend(&mut self, seconds: f64) -> ActivationResult<()> {
        let Some(task) = self.task.clone() else {
            return Err(ActivationError::Suspend(
                "context has no coroutine".into(),
            ));
        };
        if !self.should_continue() {
            return Err(ActivationError::Suspend(
                "context is terminating".into(),
            ));
        }

        let wake = Duration::try_from_secs_f64(seconds)
            .ok()
            .filter(|delay| !delay.is_zero())
            .map(|delay| Instant::now() + delay);
        task.wake_at.set(wake);
        futures::pending!();
        task.wake_at.set(None);

        if task.abort_requested() {
            return Err(ActivationError::StopChain);
        }
        Ok(())
    }

    async fn pause(&mut self) {
        if let Some(task) = &self.task {
            task.wake_at.set(None);
            futures::pending!();
        }
    }

    fn abort_requested(&self) -> bool {
        self.task.as_ref().is_some_and(|task| task.abort_requested())
    }

    /// Whether a worker pool is reachable from this context
    pub fn has_workers(&self) -> bool {
        self.node.as_ref().is_some_and(|node| node.workers.is_some())
    }

    /// Hand a closure to the node's worker pool
    pub fn spawn_worker<F, T>(&self, work: F) -> ActivationResult<WorkerTask<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let pool = self
            .node
            .as_ref()
            .and_then(|node| node.workers.as_ref())
            .ok_or_else(|| ActivationError::Worker("no worker pool available".into()))?;
        Ok(pool.spawn(work))
    }

    /// Wait for a worker result, suspending the chain between checks.
    /// Without a coroutine the calling thread waits for the worker.
    pub async fn await_worker<T>(&mut self, mut task: WorkerTask<T>) -> ActivationResult<T> {
        if self.task.is_none() {
            return task.wait().await.map_err(ActivationError::Worker);
        }
        loop {
            match task.try_take() {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => self.suspend(0.0).await?,
                Err(err) => return Err(ActivationError::Worker(err)),
            }
        }
    }
}

/// Activate `blocks` in order, feeding each block the previous output.
///
/// `handles_return` makes this call the owner of Return signals: the
/// signal is consumed instead of left for the caller. Stop/Restart
/// signals and errors end the list early; errors mark the context failed.
/// However the list ends, the value stack is cut back to the depth it had
/// on entry.
pub async fn activate_blocks(
    blocks: &[BlockRef],
    ctx: &mut Context,
    input: &Value,
    handles_return: bool,
) -> ActivationResult<(FlowOutcome, Value)> {
    let depth = ctx.stack.len();
    let result = activate_in_order(blocks, ctx, input, handles_return).await;
    ctx.stack.truncate(depth);
    result
}

async fn activate_in_order(
    blocks: &[BlockRef],
    ctx: &mut Context,
    input: &Value,
    handles_return: bool,
) -> ActivationResult<(FlowOutcome, Value)> {
    let mut current = input.clone();
    for block in blocks {
        let output = match block.activate(ctx, &current).await {
            Ok(output) => output,
            Err(ActivationError::StopChain) => return Ok((FlowOutcome::Stopped, Value::None)),
            Err(ActivationError::RestartChain) => {
                return Ok((FlowOutcome::Restarted, Value::None));
            }
            Err(err) => {
                ctx.fail(format!("{}: {}", block.name(), err));
                return Err(err);
            }
        };

        match ctx.flow {
            FlowState::Continue => current = output,
            FlowState::Return => {
                if handles_return {
                    ctx.continue_flow();
                }
                return Ok((FlowOutcome::Returned, current));
            }
            FlowState::Stop => {
                if let Some(message) = &ctx.failure {
                    return Err(ActivationError::Failed(message.clone()));
                }
                return Ok((FlowOutcome::Stopped, output));
            }
            FlowState::Restart => return Ok((FlowOutcome::Restarted, output)),
            FlowState::Rebase => {
                ctx.continue_flow();
                current.clone_from(input);
            }
        }
    }
    Ok((FlowOutcome::Continued, current))
}

/// One pass of a chain's blocks over `input`
pub async fn run_chain(
    chain: &ChainRef,
    ctx: &mut Context,
    input: &Value,
) -> ActivationResult<(FlowOutcome, Value)> {
    chain.set_state(ChainState::Iterating);
    let blocks = chain.blocks();
    let result = activate_blocks(&blocks, ctx, input, true).await;
    if result.is_ok() {
        chain.set_state(ChainState::IterationEnded);
    }
    result
}

/// Drive `blocks` to completion on the calling thread.
///
/// The blocks cannot suspend: any attempt fails with a suspend error.
pub fn run_blocks(blocks: &[BlockRef], ctx: &mut Context, input: &Value) -> ActivationResult<(FlowOutcome, Value)> {
    let task = ctx.task.take();
    let result = futures::executor::block_on(activate_blocks(blocks, ctx, input, false));
    ctx.task = task;
    result
}

/// Body of a scheduled chain's task
pub(crate) async fn drive_chain(chain: ChainRef, mut ctx: Context) {
    chain.begin_run();
    if chain.warmup(&mut ctx).is_err() {
        chain.cleanup(true);
        return;
    }
    ctx.push_chain(chain.clone());

    // preroll: warmed up, the first iteration starts on the next tick
    ctx.pause().await;

    let root = chain.root_input();
    let mut input = root.clone();
    let mut failure = None;
    while !ctx.abort_requested() {
        let looped = chain.looped();
        ctx.continue_flow();
        chain.next_frame(&mut ctx);

        match run_chain(&chain, &mut ctx, &input).await {
            Ok((outcome, output)) => {
                chain.record_iteration(&output);
                match outcome {
                    FlowOutcome::Stopped => break,
                    FlowOutcome::Restarted if !ctx.flow_storage.is_none() => {
                        input = std::mem::take(&mut ctx.flow_storage);
                    }
                    _ => input.clone_from(&root),
                }
            }
            Err(err) => {
                failure = Some(
                    ctx.failure
                        .clone()
                        .unwrap_or_else(|| err.to_string()),
                );
                break;
            }
        }

        if !looped {
            break;
        }
        if !chain.unsafe_mode() {
            ctx.pause().await;
        }
    }
    ctx.pop_chain();

    match failure {
        Some(message) => {
            error!(chain = %chain.name(), error = %message, "chain failed");
            chain.record_failure(message);
        }
        None => {
            chain.set_state(ChainState::Ended);
            debug!(chain = %chain.name(), iterations = chain.iteration_count(), "chain ended");
        }
    }
    chain.cleanup(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block::Block;
    use crate::runtime::types::TypeInfo;
    use async_trait::async_trait;

    struct Signal(FlowState);

    #[async_trait(?Send)]
    impl Block for Signal {
        fn name(&self) -> &str {
            "Signal"
        }
        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
            match self.0 {
                FlowState::Return => ctx.return_flow(),
                FlowState::Stop => ctx.stop_flow(input),
                FlowState::Restart => ctx.restart_flow(&Value::None),
                FlowState::Rebase => ctx.rebase_flow(),
                FlowState::Continue => {}
            }
            Ok(Value::None)
        }
    }

    struct AddOne;

    #[async_trait(?Send)]
    impl Block for AddOne {
        fn name(&self) -> &str {
            "AddOne"
        }
        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Int]
        }
        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Int]
        }
        async fn activate(&mut self, _ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
            match input {
                Value::Int(v) => Ok(Value::Int(v + 1)),
                other => Err(ActivationError::InvalidInput {
                    block: "AddOne".into(),
                    detail: format!("expected Int, got {}", other.basic_type()),
                }),
            }
        }
    }

    #[test]
    fn test_blocks_chain_outputs() {
        let blocks = vec![BlockRef::new(AddOne), BlockRef::new(AddOne)];
        let mut ctx = Context::detached();
        let (flow, out) = run_blocks(&blocks, &mut ctx, &Value::Int(1)).unwrap();
        assert_eq!(flow, FlowOutcome::Continued);
        assert_eq!(out, Value::Int(3));
    }

    #[test]
    fn test_return_yields_block_input() {
        let blocks = vec![
            BlockRef::new(AddOne),
            BlockRef::new(Signal(FlowState::Return)),
            BlockRef::new(AddOne),
        ];
        let mut ctx = Context::detached();
        let (flow, out) = run_blocks(&blocks, &mut ctx, &Value::Int(1)).unwrap();
        assert_eq!(flow, FlowOutcome::Returned);
        assert_eq!(out, Value::Int(2));
        // not the owner: the signal stays for the caller
        assert_eq!(ctx.flow(), FlowState::Return);
    }

    #[test]
    fn test_owner_consumes_return() {
        let blocks = vec![BlockRef::new(Signal(FlowState::Return))];
        let mut ctx = Context::detached();
        let (flow, _) =
            futures::executor::block_on(activate_blocks(&blocks, &mut ctx, &Value::Int(1), true)).unwrap();
        assert_eq!(flow, FlowOutcome::Returned);
        assert_eq!(ctx.flow(), FlowState::Continue);
    }

    #[test]
    fn test_rebase_restores_input() {
        let blocks = vec![
            BlockRef::new(AddOne),
            BlockRef::new(Signal(FlowState::Rebase)),
            BlockRef::new(AddOne),
        ];
        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::Int(10)).unwrap();
        assert_eq!(out, Value::Int(11));
    }

    #[test]
    fn test_stop_and_restart_end_the_list() {
        let blocks = vec![BlockRef::new(Signal(FlowState::Stop)), BlockRef::new(AddOne)];
        let mut ctx = Context::detached();
        let (flow, _) = run_blocks(&blocks, &mut ctx, &Value::Int(0)).unwrap();
        assert_eq!(flow, FlowOutcome::Stopped);
        assert_eq!(ctx.flow_storage(), &Value::Int(0));

        let blocks = vec![BlockRef::new(Signal(FlowState::Restart)), BlockRef::new(AddOne)];
        let mut ctx = Context::detached();
        let (flow, _) = run_blocks(&blocks, &mut ctx, &Value::Int(0)).unwrap();
        assert_eq!(flow, FlowOutcome::Restarted);
    }

    #[test]
    fn test_error_marks_context_failed() {
        let blocks = vec![BlockRef::new(AddOne)];
        let mut ctx = Context::detached();
        let err = run_blocks(&blocks, &mut ctx, &Value::string("x")).unwrap_err();
        assert!(matches!(err, ActivationError::InvalidInput { .. }));
        assert!(ctx.is_failed());
        assert!(ctx.failure_message().unwrap_or_default().contains("AddOne"));
    }

    struct Stash;

    #[async_trait(?Send)]
    impl Block for Stash {
        fn name(&self) -> &str {
            "Stash"
        }
        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
            ctx.stack_push(input.clone());
            Ok(input.clone())
        }
    }

    #[test]
    fn test_block_list_restores_stack_depth() {
        let mut ctx = Context::detached();
        ctx.stack_push(Value::Int(-1));

        let blocks = vec![BlockRef::new(Stash), BlockRef::new(AddOne), BlockRef::new(Stash)];
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::Int(1)).unwrap();
        assert_eq!(out, Value::Int(2));
        assert_eq!(ctx.stack_len(), 1);

        // early exits restore it too
        let blocks = vec![BlockRef::new(Stash), BlockRef::new(Signal(FlowState::Stop))];
        run_blocks(&blocks, &mut ctx, &Value::Int(5)).unwrap();
        assert_eq!(ctx.stack_len(), 1);

        let blocks = vec![BlockRef::new(Stash), BlockRef::new(AddOne)];
        assert!(run_blocks(&blocks, &mut ctx, &Value::string("x")).is_err());
        assert_eq!(ctx.stack_pop(), Some(Value::Int(-1)));
        assert_eq!(ctx.stack_len(), 0);
    }

    #[test]
    fn test_stack_swap_needs_two_values() {
        let mut ctx = Context::detached();
        ctx.stack_push(Value::Int(1));
        assert!(!ctx.stack_swap());
        ctx.stack_push(Value::Int(2));
        assert!(ctx.stack_swap());
        assert_eq!(ctx.stack_top(), Some(&Value::Int(1)));
    }

    #[test]
    fn test_suspend_without_coroutine_fails() {
        let mut ctx = Context::detached();
        let err = futures::executor::block_on(ctx.suspend(0.0)).unwrap_err();
        assert!(matches!(err, ActivationError::Suspend(_)));
    }
}
