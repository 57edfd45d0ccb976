//! Chains: ordered, composed block lists with a lifecycle
//!
//! A [`ChainRef`] is a shared handle to a [`Chain`]. Handles are cheap to
//! clone and can be stored inside values, so a chain may end up
//! referencing itself; [`ChainRef::destroy`] clears the block list, which
//! breaks such cycles.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::block::BlockRef;
use super::compose::{ComposeDiagnostic, ComposeOutcome, DiagnosticAction, compose_blocks};
use super::context::Context;
use super::error::{ActivationError, ActivationResult, ChainError, ChainResult, ComposeResult};
use super::node::NodeId;
use super::types::{ExposedTypeInfo, TypeInfo};
use super::value::{Table, Value};
use super::variables::{Variable, VariableMap, dangling};

/// Chain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub Uuid);

impl ChainId {
    /// Create a new random ChainId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainState {
    /// Built, or warmed up and waiting for its first iteration
    Prepared,
    /// Running an iteration
    Iterating,
    /// Between iterations
    IterationEnded,
    /// Finished normally
    Ended,
    /// Finished with an error
    Failed,
}

/// An ordered list of blocks plus its composed contract and run state
pub struct Chain {
    id: ChainId,
    name: String,
    looped: bool,
    unsafe_mode: bool,
    blocks: Vec<BlockRef>,
    input_type: TypeInfo,
    output_type: TypeInfo,
    exposed: Vec<ExposedTypeInfo>,
    required: Vec<ExposedTypeInfo>,
    composed: bool,
    state: ChainState,
    variables: VariableMap,
    node: Option<NodeId>,
    root_input: Value,
    finished_output: Value,
    finished_error: Option<String>,
    users: usize,
    iterations: u64,
}

impl Chain {
    /// Create an empty, non-looped chain
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ChainId::new(),
            name: name.into(),
            looped: false,
            unsafe_mode: false,
            blocks: Vec::new(),
            input_type: TypeInfo::None,
            output_type: TypeInfo::None,
            exposed: Vec::new(),
            required: Vec::new(),
            composed: false,
            state: ChainState::Prepared,
            variables: VariableMap::new(),
            node: None,
            root_input: Value::None,
            finished_output: Value::None,
            finished_error: None,
            users: 0,
            iterations: 0,
        }
    }
}

/// Shared handle to a chain
#[derive(Clone)]
pub struct ChainRef(Rc<RefCell<Chain>>);

impl ChainRef {
    /// Create an empty chain
    pub fn new(name: impl Into<String>) -> Self {
        Self(Rc::new(RefCell::new(Chain::new(name))))
    }

    fn get(&self) -> Ref<'_, Chain> {
        self.0.borrow()
    }

    fn get_mut(&self) -> RefMut<'_, Chain> {
        self.0.borrow_mut()
    }

    /// Whether both handles refer to the same chain
    pub fn ptr_eq(&self, other: &ChainRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Chain id
    pub fn id(&self) -> ChainId {
        self.get().id
    }

    /// Chain name
    pub fn name(&self) -> String {
        self.get().name.clone()
    }

    /// Whether the chain repeats until stopped
    pub fn looped(&self) -> bool {
        self.get().looped
    }

    /// Set the looped flag
    pub fn set_looped(&self, looped: bool) {
        self.get_mut().looped = looped;
    }

    /// Whether the fairness yield between iterations is skipped
    pub fn unsafe_mode(&self) -> bool {
        self.get().unsafe_mode
    }

    /// Set the unsafe flag
    pub fn set_unsafe(&self, unsafe_mode: bool) {
        self.get_mut().unsafe_mode = unsafe_mode;
    }

    /// Append a block, taking ownership of it
    pub fn add_block(&self, block: BlockRef) -> ChainResult<()> {
        if block.is_owned() {
            return Err(ChainError::BlockAlreadyOwned(block.name().to_string()));
        }
        let mut chain = self.get_mut();
        if chain.state == ChainState::Iterating {
            return Err(ChainError::Running(chain.name.clone()));
        }
        block.set_owned(true);
        chain.blocks.push(block);
        chain.composed = false;
        Ok(())
    }

    /// Remove and return the block at `index`, releasing ownership
    pub fn remove_block(&self, index: usize) -> ChainResult<BlockRef> {
        let mut chain = self.get_mut();
        if chain.state == ChainState::Iterating {
            return Err(ChainError::Running(chain.name.clone()));
        }
        let len = chain.blocks.len();
        if index >= len {
            return Err(ChainError::BlockIndexOutOfRange { index, len });
        }
        let block = chain.blocks.remove(index);
        block.set_owned(false);
        chain.composed = false;
        Ok(block)
    }

    /// Snapshot of the block list
    pub fn blocks(&self) -> Vec<BlockRef> {
        self.get().blocks.clone()
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.get().blocks.len()
    }

    /// Whether the chain has no blocks
    pub fn is_empty(&self) -> bool {
        self.get().blocks.is_empty()
    }

    /// Declared input type
    pub fn input_type(&self) -> TypeInfo {
        self.get().input_type.clone()
    }

    /// Declare the input type used when composing
    pub fn set_input_type(&self, ty: TypeInfo) {
        let mut chain = self.get_mut();
        chain.input_type = ty;
        chain.composed = false;
    }

    /// Output type computed by the last composition
    pub fn output_type(&self) -> TypeInfo {
        self.get().output_type.clone()
    }

    /// Variables exposed by the last composition
    pub fn exposed_variables(&self) -> Vec<ExposedTypeInfo> {
        self.get().exposed.clone()
    }

    /// Variables required from enclosing scopes by the last composition
    pub fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        self.get().required.clone()
    }

    /// Whether the chain composed since it last changed
    pub fn is_composed(&self) -> bool {
        self.get().composed
    }

    /// Compose the chain against its declared input type
    pub fn compose<F>(&self, callback: F, inherited: &[ExposedTypeInfo]) -> ComposeResult<ComposeOutcome>
    where
        F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
    {
        let input_type = self.input_type();
        self.compose_with(callback, &input_type, inherited)
    }

    /// Compose the chain against an explicit input type, recording the
    /// outcome and notifying every block
    pub fn compose_with<F>(
        &self,
        callback: F,
        input_type: &TypeInfo,
        inherited: &[ExposedTypeInfo],
    ) -> ComposeResult<ComposeOutcome>
    where
        F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
    {
        let blocks = self.blocks();
        let outcome = compose_blocks(&blocks, callback, input_type, inherited)?;
        {
            let mut chain = self.get_mut();
            chain.input_type = input_type.clone();
            chain.output_type = outcome.output_type.clone();
            chain.exposed = outcome.exposed_info.clone();
            chain.required = outcome.required_info.clone();
            chain.composed = true;
        }
        for block in &blocks {
            block.with_mut(|b| b.composed(&outcome));
        }
        debug!(chain = %self.name(), output = %outcome.output_type, "composed");
        Ok(outcome)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChainState {
        self.get().state
    }

    pub(crate) fn set_state(&self, state: ChainState) {
        self.get_mut().state = state;
    }

    /// Output of the last finished iteration
    pub fn finished_output(&self) -> Value {
        self.get().finished_output.clone()
    }

    /// Error message of the last failed run
    pub fn finished_error(&self) -> Option<String> {
        self.get().finished_error.clone()
    }

    /// Iterations completed by the current or last run
    pub fn iteration_count(&self) -> u64 {
        self.get().iterations
    }

    /// Input fed to every iteration
    pub fn root_input(&self) -> Value {
        self.get().root_input.clone()
    }

    /// Set the input fed to every iteration
    pub fn set_root_input(&self, input: Value) {
        self.get_mut().root_input = input;
    }

    /// Node the chain is scheduled on
    pub fn node(&self) -> Option<NodeId> {
        self.get().node
    }

    pub(crate) fn set_node(&self, node: Option<NodeId>) {
        self.get_mut().node = node;
    }

    /// Look up a chain-local variable without referencing it
    pub fn find_variable(&self, name: &str) -> Option<Variable> {
        self.get().variables.get(name).cloned()
    }

    /// Insert a chain-local variable
    pub fn insert_variable(&self, name: &str, var: Variable) {
        self.get_mut().variables.insert(name.to_string(), var);
    }

    /// Register a nested user of this chain
    pub fn acquire_user(&self) {
        self.get_mut().users += 1;
    }

    /// Drop a nested user of this chain
    pub fn release_user(&self) {
        let mut chain = self.get_mut();
        chain.users = chain.users.saturating_sub(1);
    }

    pub(crate) fn begin_run(&self) {
        let mut chain = self.get_mut();
        chain.state = ChainState::Prepared;
        chain.finished_output.destroy();
        chain.finished_error = None;
        chain.iterations = 0;
    }

    pub(crate) fn record_iteration(&self, output: &Value) {
        let mut chain = self.get_mut();
        chain.finished_output.clone_from(output);
        chain.iterations += 1;
        chain.state = ChainState::IterationEnded;
    }

    pub(crate) fn record_failure(&self, message: String) {
        let mut chain = self.get_mut();
        chain.finished_error = Some(message);
        chain.state = ChainState::Failed;
    }

    /// Warm up every block in order. The chain is on the context's chain
    /// stack for the duration, so variables resolve through it.
    pub fn warmup(&self, ctx: &mut Context) -> ActivationResult<()> {
        debug!(chain = %self.name(), "warmup");
        ctx.push_chain(self.clone());
        let result = self.warmup_blocks(ctx);
        ctx.pop_chain();
        if let Err(err) = &result {
            error!(chain = %self.name(), error = %err, "block warmup failed");
            self.record_failure(err.to_string());
        }
        result
    }

    fn warmup_blocks(&self, ctx: &mut Context) -> ActivationResult<()> {
        for block in self.blocks() {
            block
                .with_mut(|b| b.warmup(ctx))
                .unwrap_or_else(|| Err(ActivationError::Reentrant(block.name().to_string())))?;
        }
        Ok(())
    }

    /// Run every block's cleanup in reverse order, then clear the local
    /// variables. Skipped while nested users remain unless `force` is set.
    pub fn cleanup(&self, force: bool) {
        if self.get().users > 0 && !force {
            return;
        }

        for block in self.blocks().iter().rev() {
            match block.with_mut(|b| b.cleanup()) {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    warn!(chain = %self.name(), block = block.name(), error = %err, "block cleanup failed");
                }
                None => {
                    warn!(chain = %self.name(), block = block.name(), "block still active during cleanup");
                }
            }
        }

        let variables = std::mem::take(&mut self.get_mut().variables);
        for (name, count) in dangling(&variables) {
            error!(
                chain = %self.name(),
                variable = %name,
                refcount = count,
                "variable still referenced after cleanup"
            );
        }
        drop(variables);

        self.get_mut().node = None;
        debug!(chain = %self.name(), "cleaned up");
    }

    /// Tear the chain down: cleanup, then every block's `destroy` in
    /// reverse order. The block list is emptied.
    pub fn destroy(&self) -> ChainResult<()> {
        if self.node().is_some() {
            return Err(ChainError::AlreadyScheduled(self.name()));
        }
        self.cleanup(true);
        let blocks = std::mem::take(&mut self.get_mut().blocks);
        for block in blocks.iter().rev() {
            block.with_mut(|b| b.destroy());
            block.set_owned(false);
        }
        let mut chain = self.get_mut();
        chain.composed = false;
        chain.finished_output.destroy();
        Ok(())
    }

    /// Reset the internal state of every block
    pub fn reset_state(&self) {
        for block in self.blocks() {
            block.with_mut(|b| b.reset_state());
        }
    }

    /// Perturb every block
    pub fn mutate(&self, options: &Table) {
        for block in self.blocks() {
            block.with_mut(|b| b.mutate(options));
        }
    }

    /// Combine two parent chains of the same shape into this one, block
    /// by block
    pub fn crossover(&self, parent0: &ChainRef, parent1: &ChainRef) {
        let blocks = self.blocks();
        let (a, b) = (parent0.blocks(), parent1.blocks());
        for ((block, a), b) in blocks.iter().zip(&a).zip(&b) {
            let (Some(state0), Some(state1)) = (a.with(|x| x.get_state()), b.with(|x| x.get_state())) else {
                continue;
            };
            block.with_mut(|x| x.crossover(&state0, &state1));
        }
    }

    /// Call `next_frame` on every top-level block
    pub(crate) fn next_frame(&self, ctx: &mut Context) {
        for block in self.blocks() {
            block.with_mut(|b| b.next_frame(ctx));
        }
    }

    #[allow(clippy::type_complexity)]
    pub(crate) fn hash_parts(&self) -> Option<(String, bool, bool, Vec<BlockRef>, Vec<(String, Value)>)> {
        let chain = self.0.try_borrow().ok()?;
        let variables = chain
            .variables
            .iter()
            .map(|(name, var)| (name.clone(), var.get()))
            .collect();
        Some((
            chain.name.clone(),
            chain.looped,
            chain.unsafe_mode,
            chain.blocks.clone(),
            variables,
        ))
    }
}

impl fmt::Debug for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(chain) => f
                .debug_struct("ChainRef")
                .field("name", &chain.name)
                .field("looped", &chain.looped)
                .field("blocks", &chain.blocks.len())
                .field("state", &chain.state)
                .finish(),
            Err(_) => f.write_str("ChainRef(<borrowed>)"),
        }
    }
}
