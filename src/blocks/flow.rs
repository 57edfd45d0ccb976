//! Flow control: boolean gates, exits and nested block lists

use async_trait::async_trait;
use tracing::warn;

use crate::runtime::block::{Block, BlockRef};
use crate::runtime::compose::{ComposeOutcome, InstanceData};
use crate::runtime::context::{Context, FlowOutcome, FlowState, activate_blocks};
use crate::runtime::error::{ActivationError, ActivationResult, ComposeResult};
use crate::runtime::types::{ExposedTypeInfo, ParameterInfo, TypeInfo};
use crate::runtime::value::Value;

use super::bad_param;
use super::core::expect_bool;

/// Which way a [`Logic`] gate short-circuits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    /// Continue with the original input on `true`, leave the list on `false`
    And,
    /// Leave the list on `true`, continue with the original input on `false`
    Or,
}

/// Short-circuiting boolean gate inside a block list
#[derive(Debug)]
pub struct Logic {
    op: LogicOp,
}

impl Logic {
    /// A gate of the given kind
    pub fn new(op: LogicOp) -> Self {
        Self { op }
    }
}

#[async_trait(?Send)]
impl Block for Logic {
    fn name(&self) -> &str {
        match self.op {
            LogicOp::And => "And",
            LogicOp::Or => "Or",
        }
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Bool]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Bool]
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let value = expect_bool(self.name(), input)?;
        match (self.op, value) {
            (LogicOp::And, true) | (LogicOp::Or, false) => ctx.rebase_flow(),
            (LogicOp::And, false) | (LogicOp::Or, true) => ctx.return_flow(),
        }
        Ok(input.clone())
    }
}

/// Boolean negation
#[derive(Debug, Default)]
pub struct Not;

#[async_trait(?Send)]
impl Block for Not {
    fn name(&self) -> &str {
        "Not"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Bool]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Bool]
    }

    async fn activate(&mut self, _ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        Ok(Value::Bool(!expect_bool("Not", input)?))
    }
}

/// Which flow signal an [`Exit`] raises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// End the chain with the input as its output
    Stop,
    /// Start the next iteration of a looped chain
    Restart,
    /// Leave the enclosing block list
    Return,
}

/// Raises a flow signal and passes its input on
#[derive(Debug)]
pub struct Exit {
    kind: ExitKind,
}

impl Exit {
    /// An exit raising `kind`
    pub fn new(kind: ExitKind) -> Self {
        Self { kind }
    }
}

#[async_trait(?Send)]
impl Block for Exit {
    fn name(&self) -> &str {
        match self.kind {
            ExitKind::Stop => "Stop",
            ExitKind::Restart => "Restart",
            ExitKind::Return => "Return",
        }
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        match self.kind {
            ExitKind::Stop => ctx.stop_flow(input),
            ExitKind::Restart => ctx.restart_flow(&Value::None),
            ExitKind::Return => ctx.return_flow(),
        }
        Ok(input.clone())
    }
}

/// Fails the running chain with a message
#[derive(Debug)]
pub struct Fail {
    message: String,
}

impl Default for Fail {
    fn default() -> Self {
        Self {
            message: "Fail block reached".into(),
        }
    }
}

#[async_trait(?Send)]
impl Block for Fail {
    fn name(&self) -> &str {
        "Fail"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Message",
            "The failure message.",
            vec![TypeInfo::String],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        self.message = value
            .as_str()
            .ok_or_else(|| bad_param("Fail", index, value))?
            .to_string();
        Ok(())
    }

    fn get_param(&self, _index: usize) -> Value {
        Value::string(self.message.as_str())
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        ctx.fail(self.message.as_str());
        ctx.stop_flow(input);
        Ok(input.clone())
    }
}

/// A block-owned list of nested blocks
#[derive(Debug, Default)]
struct BlockList {
    blocks: Vec<BlockRef>,
    outcome: Option<ComposeOutcome>,
}

impl BlockList {
    fn param_types() -> Vec<TypeInfo> {
        vec![
            TypeInfo::seq_of(vec![TypeInfo::Block]),
            TypeInfo::Block,
            TypeInfo::None,
        ]
    }

    fn set(&mut self, block: &str, index: usize, value: &Value) -> anyhow::Result<()> {
        let blocks = match value {
            Value::None => Vec::new(),
            Value::Block(block) => vec![block.clone()],
            Value::Seq(items) => items
                .iter()
                .map(|item| item.as_block().cloned().ok_or_else(|| bad_param(block, index, item)))
                .collect::<anyhow::Result<Vec<_>>>()?,
            other => return Err(bad_param(block, index, other)),
        };
        if let Some(taken) = blocks.iter().find(|b| b.is_owned() && !self.contains(b)) {
            anyhow::bail!("{}: block {} is already owned", block, taken.name());
        }

        for old in &self.blocks {
            old.set_owned(false);
        }
        for new in &blocks {
            new.set_owned(true);
        }
        self.blocks = blocks;
        self.outcome = None;
        Ok(())
    }

    fn contains(&self, block: &BlockRef) -> bool {
        self.blocks.iter().any(|b| b.ptr_eq(block))
    }

    fn get(&self) -> Value {
        if self.blocks.is_empty() {
            return Value::None;
        }
        Value::Seq(self.blocks.iter().cloned().map(Value::Block).collect())
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<TypeInfo> {
        let input_type = data.input_type.clone();
        let outcome = data.compose_nested(&self.blocks, &input_type)?;
        for block in &self.blocks {
            block.with_mut(|b| b.composed(&outcome));
        }
        let output_type = outcome.output_type.clone();
        self.outcome = Some(outcome);
        Ok(output_type)
    }

    fn exposed(&self) -> Vec<ExposedTypeInfo> {
        self.outcome
            .as_ref()
            .map(|outcome| outcome.exposed_info.clone())
            .unwrap_or_default()
    }

    fn required(&self) -> Vec<ExposedTypeInfo> {
        self.outcome
            .as_ref()
            .map(|outcome| outcome.required_info.clone())
            .unwrap_or_default()
    }

    fn warmup(&mut self, ctx: &mut Context) -> ActivationResult<()> {
        for block in &self.blocks {
            block
                .with_mut(|b| b.warmup(ctx))
                .unwrap_or_else(|| Err(ActivationError::Reentrant(block.name().to_string())))?;
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        for block in self.blocks.iter().rev() {
            if let Some(Err(err)) = block.with_mut(|b| b.cleanup()) {
                warn!(block = block.name(), error = %err, "nested block cleanup failed");
            }
        }
    }

    fn destroy(&mut self) {
        for block in self.blocks.iter().rev() {
            block.with_mut(|b| b.destroy());
            block.set_owned(false);
        }
        self.blocks.clear();
    }

    /// Run the list once. Stop/Restart raised by a nested error rather
    /// than a flow signal are re-raised so the enclosing list sees them.
    async fn run(&self, ctx: &mut Context, input: &Value) -> ActivationResult<(FlowOutcome, Value)> {
        let (outcome, output) = activate_blocks(&self.blocks, ctx, input, true).await?;
        match outcome {
            FlowOutcome::Stopped if ctx.flow() == FlowState::Continue => Err(ActivationError::StopChain),
            FlowOutcome::Restarted if ctx.flow() == FlowState::Continue => {
                Err(ActivationError::RestartChain)
            }
            _ => Ok((outcome, output)),
        }
    }
}

/// Runs a nested block list and outputs its result
#[derive(Debug, Default)]
pub struct Do {
    list: BlockList,
}

#[async_trait(?Send)]
impl Block for Do {
    fn name(&self) -> &str {
        "Do"
    }

    fn help(&self) -> &str {
        "Activates a list of blocks on the input and outputs the result."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Blocks",
            "The blocks to activate.",
            BlockList::param_types(),
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        self.list.set("Do", index, value)
    }

    fn get_param(&self, _index: usize) -> Value {
        self.list.get()
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        self.list.compose(data).map(Some)
    }

    fn exposed_variables(&self) -> Vec<ExposedTypeInfo> {
        self.list.exposed()
    }

    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        self.list.required()
    }

    fn warmup(&mut self, ctx: &mut Context) -> ActivationResult<()> {
        self.list.warmup(ctx)
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        self.list.cleanup();
        Ok(())
    }

    fn destroy(&mut self) {
        self.list.destroy();
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let (_, output) = self.list.run(ctx, input).await?;
        Ok(output)
    }
}

/// Runs a nested block list a number of times on the same input
#[derive(Debug)]
pub struct Repeat {
    list: BlockList,
    times: i64,
    forever: bool,
}

impl Default for Repeat {
    fn default() -> Self {
        Self {
            list: BlockList::default(),
            times: 0,
            forever: false,
        }
    }
}

#[async_trait(?Send)]
impl Block for Repeat {
    fn name(&self) -> &str {
        "Repeat"
    }

    fn help(&self) -> &str {
        "Repeats the Action blocks; a Return inside ends the repetition."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![
            ParameterInfo::new("Action", "The blocks to repeat.", BlockList::param_types()),
            ParameterInfo::new("Times", "How many times to repeat.", vec![TypeInfo::Int]),
            ParameterInfo::new(
                "Forever",
                "Repeat until a Return, Stop or Restart.",
                vec![TypeInfo::Bool],
            ),
        ]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        match index {
            0 => self.list.set("Repeat", index, value)?,
            1 => self.times = value.as_int().ok_or_else(|| bad_param("Repeat", index, value))?,
            2 => self.forever = value.as_bool().ok_or_else(|| bad_param("Repeat", index, value))?,
            _ => anyhow::bail!("Repeat has no parameter {}", index),
        }
        Ok(())
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => self.list.get(),
            1 => Value::Int(self.times),
            2 => Value::Bool(self.forever),
            _ => Value::None,
        }
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        self.list.compose(data)?;
        Ok(Some(data.input_type.clone()))
    }

    fn exposed_variables(&self) -> Vec<ExposedTypeInfo> {
        self.list.exposed()
    }

    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        self.list.required()
    }

    fn warmup(&mut self, ctx: &mut Context) -> ActivationResult<()> {
        self.list.warmup(ctx)
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        self.list.cleanup();
        Ok(())
    }

    fn destroy(&mut self) {
        self.list.destroy();
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let mut done = 0;
        while self.forever || done < self.times {
            let (outcome, _) = self.list.run(ctx, input).await?;
            match outcome {
                FlowOutcome::Continued => {}
                FlowOutcome::Returned => break,
                FlowOutcome::Stopped | FlowOutcome::Restarted => return Ok(input.clone()),
            }
            done += 1;
            if self.forever && ctx.is_coroutine() {
                ctx.suspend(0.0).await?;
            }
        }
        Ok(input.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::blocks::core::Const;
    use crate::blocks::math::{Arithmetic, MathOp};
    use crate::runtime::compose::{compose_blocks, log_diagnostics};
    use crate::runtime::context::run_blocks;

    fn add(n: i64) -> BlockRef {
        let mut block = Arithmetic::new(MathOp::Add);
        block.set_param(0, &Value::Int(n)).unwrap();
        BlockRef::new(block)
    }

    struct Tally(Rc<Cell<u32>>);

    #[async_trait(?Send)]
    impl Block for Tally {
        fn name(&self) -> &str {
            "Tally"
        }

        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }

        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }

        async fn activate(&mut self, _ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
            self.0.set(self.0.get() + 1);
            Ok(input.clone())
        }
    }

    /// Records the output type it is told the list composed to
    struct Notified(Rc<RefCell<Option<TypeInfo>>>);

    #[async_trait(?Send)]
    impl Block for Notified {
        fn name(&self) -> &str {
            "Notified"
        }

        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }

        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }

        fn composed(&mut self, outcome: &ComposeOutcome) {
            *self.0.borrow_mut() = Some(outcome.output_type.clone());
        }

        async fn activate(&mut self, _ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
            Ok(input.clone())
        }
    }

    fn nested(blocks: Vec<BlockRef>) -> Value {
        Value::Seq(blocks.into_iter().map(Value::Block).collect())
    }

    #[test]
    fn test_and_short_circuits_on_false() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Bool(false))),
            BlockRef::new(Logic::new(LogicOp::And)),
            BlockRef::new(Const::new(Value::Int(1))),
        ];
        let mut ctx = Context::detached();
        let (outcome, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(outcome, FlowOutcome::Returned);
        assert_eq!(out, Value::Bool(false));
    }

    #[test]
    fn test_or_continues_with_original_input_on_false() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Bool(false))),
            BlockRef::new(Logic::new(LogicOp::Or)),
        ];
        let mut ctx = Context::detached();
        let (outcome, out) = run_blocks(&blocks, &mut ctx, &Value::Int(7)).unwrap();
        assert_eq!(outcome, FlowOutcome::Continued);
        assert_eq!(out, Value::Int(7));
    }

    #[test]
    fn test_not_rejects_non_bool() {
        let blocks = vec![BlockRef::new(Not)];
        let mut ctx = Context::detached();
        assert!(matches!(
            run_blocks(&blocks, &mut ctx, &Value::Int(1)),
            Err(ActivationError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_stop_outputs_its_input() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(3))),
            BlockRef::new(Exit::new(ExitKind::Stop)),
            BlockRef::new(Const::new(Value::Int(4))),
        ];
        let mut ctx = Context::detached();
        let (outcome, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(outcome, FlowOutcome::Stopped);
        assert_eq!(out, Value::Int(3));
    }

    #[test]
    fn test_fail_reports_message() {
        let mut fail = Fail::default();
        fail.set_param(0, &Value::string("boom")).unwrap();
        let blocks = vec![BlockRef::new(fail)];
        let mut ctx = Context::detached();
        let err = run_blocks(&blocks, &mut ctx, &Value::None).unwrap_err();
        assert!(matches!(err, ActivationError::Failed(ref message) if message == "boom"));
    }

    #[test]
    fn test_do_consumes_nested_return() {
        let mut body = Do::default();
        body.set_param(
            0,
            &nested(vec![
                add(1),
                BlockRef::new(Exit::new(ExitKind::Return)),
                add(100),
            ]),
        )
        .unwrap();
        let blocks = vec![BlockRef::new(body), add(10)];
        let mut ctx = Context::detached();
        let (outcome, out) = run_blocks(&blocks, &mut ctx, &Value::Int(1)).unwrap();
        assert_eq!(outcome, FlowOutcome::Continued);
        assert_eq!(out, Value::Int(12));
    }

    #[test]
    fn test_do_marks_nested_blocks_owned() {
        let inner = add(1);
        let mut body = Do::default();
        body.set_param(0, &nested(vec![inner.clone()])).unwrap();
        assert!(inner.is_owned());

        let mut other = Do::default();
        assert!(other.set_param(0, &nested(vec![inner.clone()])).is_err());

        body.set_param(0, &Value::None).unwrap();
        assert!(!inner.is_owned());
    }

    #[test]
    fn test_do_composes_to_nested_output() {
        let mut body = Do::default();
        body.set_param(0, &nested(vec![BlockRef::new(Const::new(Value::string("x")))]))
            .unwrap();
        let blocks = vec![BlockRef::new(body)];
        let outcome = compose_blocks(&blocks, log_diagnostics, &TypeInfo::Int, &[]).unwrap();
        assert_eq!(outcome.output_type, TypeInfo::String);
    }

    #[test]
    fn test_do_notifies_nested_blocks_after_compose() {
        let seen = Rc::new(RefCell::new(None));
        let mut body = Do::default();
        body.set_param(
            0,
            &nested(vec![
                BlockRef::new(Notified(seen.clone())),
                BlockRef::new(Const::new(Value::Float(1.5))),
            ]),
        )
        .unwrap();
        let blocks = vec![BlockRef::new(body)];
        compose_blocks(&blocks, log_diagnostics, &TypeInfo::Int, &[]).unwrap();
        assert_eq!(*seen.borrow(), Some(TypeInfo::Float));
    }

    #[test]
    fn test_repeat_runs_times_and_outputs_input() {
        let hits = Rc::new(Cell::new(0));
        let mut repeat = Repeat::default();
        repeat
            .set_param(0, &nested(vec![BlockRef::new(Tally(hits.clone())), add(1)]))
            .unwrap();
        repeat.set_param(1, &Value::Int(3)).unwrap();
        let blocks = vec![BlockRef::new(repeat)];
        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::Int(5)).unwrap();
        assert_eq!(out, Value::Int(5));
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn test_repeat_forever_ends_on_return() {
        let mut repeat = Repeat::default();
        repeat
            .set_param(0, &nested(vec![BlockRef::new(Exit::new(ExitKind::Return))]))
            .unwrap();
        repeat.set_param(2, &Value::Bool(true)).unwrap();
        let blocks = vec![BlockRef::new(repeat)];
        let mut ctx = Context::detached();
        let (outcome, out) = run_blocks(&blocks, &mut ctx, &Value::Int(2)).unwrap();
        assert_eq!(outcome, FlowOutcome::Continued);
        assert_eq!(out, Value::Int(2));
    }
}
