//! Constants and pass-through blocks

use async_trait::async_trait;
use tracing::info;

use crate::runtime::block::Block;
use crate::runtime::compose::InstanceData;
use crate::runtime::context::Context;
use crate::runtime::error::{ActivationResult, ComposeResult};
use crate::runtime::types::{ParameterInfo, TypeInfo, derive_type_info};
use crate::runtime::value::Value;

use super::{bad_param, invalid_input};

/// Outputs a constant value, ignoring its input
#[derive(Debug, Default)]
pub struct Const {
    value: Value,
}

impl Const {
    /// A `Const` producing `value`
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait(?Send)]
impl Block for Const {
    fn name(&self) -> &str {
        "Const"
    }

    fn help(&self) -> &str {
        "Outputs a constant value."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::None]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![derive_type_info(&self.value)]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Value",
            "The constant value to insert in the chain.",
            vec![TypeInfo::Any],
        )]
    }

    fn set_param(&mut self, _index: usize, value: &Value) -> anyhow::Result<()> {
        self.value.clone_from(value);
        Ok(())
    }

    fn get_param(&self, _index: usize) -> Value {
        self.value.clone()
    }

    fn compose(&mut self, _data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        Ok(Some(derive_type_info(&self.value)))
    }

    async fn activate(&mut self, _ctx: &mut Context, _input: &Value) -> ActivationResult<Value> {
        Ok(self.value.clone())
    }
}

/// Feeds the input of the enclosing block list to the next block
#[derive(Debug, Default)]
pub struct Input;

#[async_trait(?Send)]
impl Block for Input {
    fn name(&self) -> &str {
        "Input"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    async fn activate(&mut self, ctx: &mut Context, _input: &Value) -> ActivationResult<Value> {
        ctx.rebase_flow();
        Ok(Value::None)
    }
}

/// Outputs its input unchanged
#[derive(Debug, Default)]
pub struct Pass;

#[async_trait(?Send)]
impl Block for Pass {
    fn name(&self) -> &str {
        "Pass"
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

/// Suspends the chain for a number of seconds, then passes its input on
#[derive(Debug, Default)]
pub struct Sleep {
    seconds: f64,
}

#[async_trait(?Send)]
impl Block for Sleep {
    fn name(&self) -> &str {
        "Sleep"
    }

    fn help(&self) -> &str {
        "Pauses the chain; zero waits for the next tick."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Time",
            "The amount of time in seconds to pause this chain.",
            vec![TypeInfo::Float, TypeInfo::Int],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        self.seconds = match value {
            Value::Float(v) => *v,
            Value::Int(v) => *v as f64,
            other => return Err(bad_param(self.name(), index, other)),
        };
        Ok(())
    }

    fn get_param(&self, _index: usize) -> Value {
        Value::Float(self.seconds)
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        ctx.suspend(self.seconds).await?;
        Ok(input.clone())
    }
}

/// Logs its input and passes it on
#[derive(Debug, Default)]
pub struct Log {
    prefix: String,
}

#[async_trait(?Send)]
impl Block for Log {
    fn name(&self) -> &str {
        "Log"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Prefix",
            "Text printed before the value.",
            vec![TypeInfo::String],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        self.prefix = value
            .as_str()
            .ok_or_else(|| bad_param("Log", index, value))?
            .to_string();
        Ok(())
    }

    fn get_param(&self, _index: usize) -> Value {
        Value::string(self.prefix.as_str())
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let chain = ctx.current_chain().map(|chain| chain.name()).unwrap_or_default();
        if self.prefix.is_empty() {
            info!(chain = %chain, "{}", input);
        } else {
            info!(chain = %chain, "{}: {}", self.prefix, input);
        }
        Ok(input.clone())
    }
}

/// Fails activation unless the input is a bool; shared by flow blocks
pub(crate) fn expect_bool(block: &str, input: &Value) -> ActivationResult<bool> {
    input.as_bool().ok_or_else(|| invalid_input(block, "Bool", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block::BlockRef;
    use crate::runtime::context::{FlowOutcome, run_blocks};

    #[test]
    fn test_const_ignores_input() {
        let blocks = vec![BlockRef::new(Const::new(Value::Int(5)))];
        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::string("ignored")).unwrap();
        assert_eq!(out, Value::Int(5));
    }

    #[test]
    fn test_input_restores_list_input() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(5))),
            BlockRef::new(Input),
        ];
        let mut ctx = Context::detached();
        let (flow, out) = run_blocks(&blocks, &mut ctx, &Value::Int(1)).unwrap();
        assert_eq!(flow, FlowOutcome::Continued);
        assert_eq!(out, Value::Int(1));
    }

    #[test]
    fn test_sleep_needs_a_coroutine() {
        let blocks = vec![BlockRef::new(Sleep { seconds: 0.0 })];
        let mut ctx = Context::detached();
        assert!(run_blocks(&blocks, &mut ctx, &Value::None).is_err());
        assert!(ctx.is_failed());
    }

    #[test]
    fn test_sleep_accepts_int_seconds() {
        let mut sleep = Sleep::default();
        sleep.set_param(0, &Value::Int(2)).unwrap();
        assert_eq!(sleep.get_param(0), Value::Float(2.0));
        assert!(sleep.set_param(0, &Value::string("2")).is_err());
    }
}
