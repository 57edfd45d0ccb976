//! The block capability set and shared block handles
//!
//! Every runtime unit implements [`Block`]. Only `input_types`,
//! `output_types` and `activate` are mandatory; the remaining hooks have
//! no-op defaults so a block opts into exactly the capabilities it needs.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;

use super::compose::{ComposeOutcome, InstanceData};
use super::context::Context;
use super::error::{ActivationError, ActivationResult, ComposeResult};
use super::types::{ExposedTypeInfo, ParameterInfo, TypeInfo};
use super::value::{Table, Value};

/// Fast-path selector chosen at compose time for indexing blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InlineDispatch {
    /// No specialization
    #[default]
    Generic,
    /// Index into a sequence
    Seq,
    /// Index into an integer vector
    Ints,
    /// Index into a float vector
    Floats,
    /// Index into a color
    Color,
    /// Index into a byte buffer
    Bytes,
    /// Index into a string
    String,
}

/// A single pipeline stage
#[async_trait(?Send)]
pub trait Block: 'static {
    /// Registered name of the block
    fn name(&self) -> &str;

    /// Stable hash of the block type
    fn hash(&self) -> u32 {
        0
    }

    /// Help text
    fn help(&self) -> &str {
        ""
    }

    /// Called once after construction
    fn setup(&mut self) {}

    /// Called once before the block is dropped by its chain
    fn destroy(&mut self) {}

    /// Accepted input types; `[None]` accepts anything
    fn input_types(&self) -> Vec<TypeInfo>;

    /// Produced output types
    fn output_types(&self) -> Vec<TypeInfo>;

    /// Parameter descriptions
    fn parameters(&self) -> Vec<ParameterInfo> {
        Vec::new()
    }

    /// Set a parameter by index
    fn set_param(&mut self, index: usize, _value: &Value) -> anyhow::Result<()> {
        anyhow::bail!("{} has no parameter {}", self.name(), index)
    }

    /// Read a parameter by index
    fn get_param(&self, _index: usize) -> Value {
        Value::None
    }

    /// Prepare for running; variables are referenced here
    fn warmup(&mut self, _ctx: &mut Context) -> ActivationResult<()> {
        Ok(())
    }

    /// Release whatever warmup acquired
    fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Compose hook. `Ok(None)` means the block has no hook and the
    /// composer falls back to its declared output types.
    fn compose(&mut self, _data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        Ok(None)
    }

    /// Notification after the whole chain composed
    fn composed(&mut self, _outcome: &ComposeOutcome) {}

    /// Variables this block introduces into scope
    fn exposed_variables(&self) -> Vec<ExposedTypeInfo> {
        Vec::new()
    }

    /// Variables this block needs from scope
    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        Vec::new()
    }

    /// Compose-time fast-path selection
    fn set_inline(&mut self, _dispatch: InlineDispatch) {}

    /// Process one input
    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value>;

    /// Called at the start of every iteration of the owning chain
    fn next_frame(&mut self, _ctx: &mut Context) {}

    /// Randomly perturb internal parameters
    fn mutate(&mut self, _options: &Table) {}

    /// Combine the states of two parents into this block
    fn crossover(&mut self, _state0: &Value, _state1: &Value) {}

    /// Persisted internal state
    fn get_state(&self) -> Value {
        Value::None
    }

    /// Restore persisted internal state
    fn set_state(&mut self, _state: &Value) {}

    /// Reset internal state
    fn reset_state(&mut self) {}
}

/// Storage for one block instance
struct BlockSlot {
    name: String,
    block: RefCell<Option<Box<dyn Block>>>,
    owned: Cell<bool>,
}

/// Shared handle to a block instance
///
/// The block itself lives in a slot that is vacated while it is being
/// activated, so re-entrant activation is reported instead of aliasing.
#[derive(Clone)]
pub struct BlockRef(Rc<BlockSlot>);

/// Returns the block to its slot when the activation finishes, even if
/// the activation future is dropped early.
struct Checkout<'a> {
    slot: &'a BlockSlot,
    block: Option<Box<dyn Block>>,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            *self.slot.block.borrow_mut() = Some(block);
        }
    }
}

impl BlockRef {
    /// Wrap a block, running its `setup` hook
    pub fn new(block: impl Block) -> Self {
        Self::from_box(Box::new(block))
    }

    /// Wrap a boxed block, running its `setup` hook
    pub fn from_box(mut block: Box<dyn Block>) -> Self {
        block.setup();
        Self(Rc::new(BlockSlot {
            name: block.name().to_string(),
            block: RefCell::new(Some(block)),
            owned: Cell::new(false),
        }))
    }

    /// Block name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether both handles refer to the same instance
    pub fn ptr_eq(&self, other: &BlockRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Whether a chain (or a parent block) owns this instance
    pub fn is_owned(&self) -> bool {
        self.0.owned.get()
    }

    pub(crate) fn set_owned(&self, owned: bool) {
        self.0.owned.set(owned);
    }

    /// Whether the block is currently being activated
    pub fn is_active(&self) -> bool {
        self.0.block.try_borrow().map(|b| b.is_none()).unwrap_or(true)
    }

    /// Run a closure against the block; `None` while it is being activated
    pub fn with<R>(&self, f: impl FnOnce(&dyn Block) -> R) -> Option<R> {
        let slot = self.0.block.try_borrow().ok()?;
        slot.as_deref().map(f)
    }

    /// Run a closure against the block mutably; `None` while it is being
    /// activated
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut dyn Block) -> R) -> Option<R> {
        let mut slot = self.0.block.try_borrow_mut().ok()?;
        slot.as_deref_mut().map(f)
    }

    /// Activate the block
    pub async fn activate(&self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let taken = self
            .0
            .block
            .try_borrow_mut()
            .ok()
            .and_then(|mut slot| slot.take());
        let mut checkout = Checkout {
            slot: &self.0,
            block: taken,
        };
        match checkout.block.as_deref_mut() {
            Some(block) => block.activate(ctx, input).await,
            None => Err(ActivationError::Reentrant(self.name().to_string())),
        }
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRef")
            .field("name", &self.0.name)
            .field("owned", &self.0.owned.get())
            .finish()
    }
}

/// Parameter values of a block, in parameter order
pub fn block_params(block: &BlockRef) -> Vec<Value> {
    block
        .with(|b| (0..b.parameters().len()).map(|idx| b.get_param(idx)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait(?Send)]
    impl Block for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }

        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }

        async fn activate(&mut self, _ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
            Ok(input.clone())
        }
    }

    #[test]
    fn test_default_hooks() {
        let block = BlockRef::new(Echo);
        assert_eq!(block.name(), "Echo");
        assert!(block.with(|b| b.parameters().is_empty()).unwrap_or(false));
        assert!(block.with_mut(|b| b.set_param(0, &Value::Int(1)).is_err()).unwrap_or(false));
        assert_eq!(block.with(|b| b.get_state()), Some(Value::None));
        assert!(!block.is_active());
    }

    #[test]
    fn test_activate_returns_block_to_slot() {
        let block = BlockRef::new(Echo);
        let mut ctx = Context::detached();
        let out = futures::executor::block_on(block.activate(&mut ctx, &Value::Int(4)));
        assert_eq!(out.unwrap(), Value::Int(4));
        assert!(!block.is_active());
        assert!(block.with(|b| b.name().to_string()).is_some());
    }
}
