//! Pop, Drop and Swap
//!
//! Named, they work on sequence variables (Pop, Drop) or exchange two
//! variables (Swap). Without names they work on the context's value
//! stack; the composer types those forms itself and never calls their
//! compose hooks.

use async_trait::async_trait;

use crate::runtime::block::Block;
use crate::runtime::compose::InstanceData;
use crate::runtime::context::Context;
use crate::runtime::error::{ActivationError, ActivationResult, ComposeError, ComposeResult};
use crate::runtime::types::{ExposedTypeInfo, ParameterInfo, TypeInfo};
use crate::runtime::value::Value;
use crate::runtime::variables::Variable;

use super::variables::VariableParams;

/// Which end-of-sequence removal a [`Pop`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopMode {
    /// Output the removed element
    Pop,
    /// Discard the removed element and pass the input on
    Drop,
}

/// Removes the last element of a sequence variable, or the top of the
/// value stack
#[derive(Debug)]
pub struct Pop {
    mode: PopMode,
    var: VariableParams,
}

impl Pop {
    /// A remover of the given kind
    pub fn new(mode: PopMode) -> Self {
        Self {
            mode,
            var: VariableParams::default(),
        }
    }

    /// Type of the addressed sequence, if it is in scope
    fn seq_type(&self, data: &InstanceData) -> ComposeResult<Option<(TypeInfo, bool)>> {
        for info in data.shared_named(self.var.name()) {
            let ty = match (&info.exposed_type, self.var.is_table()) {
                (TypeInfo::Table { keys, types }, true) => keys
                    .iter()
                    .position(|key| key == self.var.key())
                    .and_then(|idx| types.get(idx)),
                (ty, false) => Some(ty),
                _ => None,
            };
            match ty {
                Some(seq @ TypeInfo::Seq { .. }) => return Ok(Some((seq.clone(), info.is_mutable))),
                Some(other) => {
                    return Err(ComposeError::Block {
                        block: self.name().to_string(),
                        message: format!("{} is not a sequence but {}", self.var.name(), other),
                    });
                }
                None => {}
            }
        }
        Ok(None)
    }

    fn take_last(&self, target: &Variable) -> ActivationResult<Value> {
        let mut value = target.borrow_mut();
        let slot = if self.var.is_table() {
            match &mut *value {
                Value::Table(table) => table.get_mut(self.var.key()),
                _ => None,
            }
        } else {
            Some(&mut *value)
        };
        match slot {
            Some(Value::Seq(items)) => items.pop().ok_or_else(|| {
                ActivationError::Variable(format!("{}: {} is empty", self.name(), self.var.name()))
            }),
            _ => Err(ActivationError::Variable(format!(
                "{}: {} is not a sequence",
                self.name(),
                self.var.name()
            ))),
        }
    }
}

#[async_trait(?Send)]
impl Block for Pop {
    fn name(&self) -> &str {
        match self.mode {
            PopMode::Pop => "Pop",
            PopMode::Drop => "Drop",
        }
    }

    fn help(&self) -> &str {
        match self.mode {
            PopMode::Pop => "Removes and outputs the last element of a sequence variable, or the top of the stack.",
            PopMode::Drop => "Removes the last element of a sequence variable, or the top of the stack.",
        }
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        VariableParams::infos()
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        let name = self.name().to_string();
        self.var.set(&name, index, value)
    }

    fn get_param(&self, index: usize) -> Value {
        self.var.get(index)
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        self.var.validate(self.name())?;
        let found = self.seq_type(data)?;
        if let Some((_, false)) = found {
            return Err(ComposeError::Block {
                block: self.name().to_string(),
                message: format!("{} is immutable", self.var.name()),
            });
        }
        match self.mode {
            PopMode::Drop => Ok(Some(data.input_type.clone())),
            PopMode::Pop => Ok(Some(match found {
                Some((TypeInfo::Seq { types, .. }, _)) if types.len() == 1 => types[0].clone(),
                _ => TypeInfo::Any,
            })),
        }
    }

    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        vec![self.var.consumed()]
    }

    fn warmup(&mut self, ctx: &mut Context) -> ActivationResult<()> {
        if !self.var.is_unnamed() {
            self.var.acquire(ctx);
        }
        Ok(())
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        self.var.release();
        Ok(())
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let removed = if self.var.is_unnamed() {
            ctx.stack_pop()
                .ok_or_else(|| ActivationError::Stack(format!("{} on an empty stack", self.name())))?
        } else {
            let target = self.var.acquire(ctx);
            self.take_last(&target)?
        };
        match self.mode {
            PopMode::Pop => Ok(removed),
            PopMode::Drop => Ok(input.clone()),
        }
    }
}

/// Exchanges the values of two variables, or the two topmost stack values
#[derive(Debug, Default)]
pub struct Swap {
    a: VariableParams,
    b: VariableParams,
}

impl Swap {
    fn is_stack(&self) -> bool {
        self.a.is_unnamed() && self.b.is_unnamed()
    }
}

#[async_trait(?Send)]
impl Block for Swap {
    fn name(&self) -> &str {
        "Swap"
    }

    fn help(&self) -> &str {
        "Exchanges the values of two variables, or the two topmost stack values when no names are given."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![
            ParameterInfo::new("NameA", "The name of the first variable.", vec![TypeInfo::String]),
            ParameterInfo::new("NameB", "The name of the second variable.", vec![TypeInfo::String]),
        ]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        match index {
            0 => self.a.set("Swap", 0, value),
            1 => self.b.set("Swap", 0, value),
            _ => anyhow::bail!("Swap has no parameter {}", index),
        }
    }

    fn get_param(&self, index: usize) -> Value {
        match index {
            0 => self.a.get(0),
            1 => self.b.get(0),
            _ => Value::None,
        }
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        self.a.validate("Swap")?;
        self.b.validate("Swap")?;
        let a = data.shared_named(self.a.name()).next();
        let b = data.shared_named(self.b.name()).next();
        for info in a.iter().chain(b.iter()) {
            if !info.is_mutable {
                return Err(ComposeError::Block {
                    block: "Swap".into(),
                    message: format!("{} is immutable", info.name),
                });
            }
        }
        if let (Some(a), Some(b)) = (a, b) {
            if a.exposed_type != b.exposed_type {
                return Err(ComposeError::Block {
                    block: "Swap".into(),
                    message: format!(
                        "cannot swap {} ({}) with {} ({})",
                        a.name, a.exposed_type, b.name, b.exposed_type
                    ),
                });
            }
        }
        Ok(Some(data.input_type.clone()))
    }

    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        if self.is_stack() {
            return Vec::new();
        }
        vec![self.a.consumed(), self.b.consumed()]
    }

    fn warmup(&mut self, ctx: &mut Context) -> ActivationResult<()> {
        if !self.is_stack() {
            self.a.acquire(ctx);
            self.b.acquire(ctx);
        }
        Ok(())
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        self.a.release();
        self.b.release();
        Ok(())
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        if self.is_stack() {
            if !ctx.stack_swap() {
                return Err(ActivationError::Stack("Swap needs two values on the stack".into()));
            }
            return Ok(ctx.stack_top().cloned().unwrap_or_default());
        }
        let a = self.a.acquire(ctx);
        let b = self.b.acquire(ctx);
        if !a.ptr_eq(&b) {
            std::mem::swap(&mut *a.borrow_mut(), &mut *b.borrow_mut());
        }
        Ok(input.clone())
    }
}
