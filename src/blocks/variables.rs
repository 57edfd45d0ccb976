//! Variable blocks: Set, Update, Ref, Get and Push
//!
//! All of them address a variable by name, optionally a key inside a
//! table variable, in either the chain scopes or the node-global map.
//! The variable is referenced at warmup (or on first activation when the
//! block runs outside a scheduled chain) and released at cleanup. A Push
//! without a name pushes onto the context's value stack instead.

use async_trait::async_trait;

use crate::runtime::block::Block;
use crate::runtime::compose::InstanceData;
use crate::runtime::context::Context;
use crate::runtime::error::{ActivationError, ActivationResult, ComposeError, ComposeResult};
use crate::runtime::types::{ExposedTypeInfo, ParameterInfo, TypeInfo, derive_type_info};
use crate::runtime::value::{Table, Value};
use crate::runtime::variables::{Variable, release_variable};

use super::bad_param;

/// Name/Key/Global parameters and the referenced variable
#[derive(Debug, Default)]
pub(crate) struct VariableParams {
    name: String,
    key: String,
    global: bool,
    target: Option<Variable>,
}

impl VariableParams {
    pub(crate) const COUNT: usize = 3;

    pub(crate) fn infos() -> Vec<ParameterInfo> {
        vec![
            ParameterInfo::new("Name", "The name of the variable.", vec![TypeInfo::String]),
            ParameterInfo::new(
                "Key",
                "The key of the value to read/write from/in the table (this variable will become a table).",
                vec![TypeInfo::String],
            ),
            ParameterInfo::new(
                "Global",
                "If the variable should be shared between chains in the same node.",
                vec![TypeInfo::Bool],
            ),
        ]
    }

    pub(crate) fn set(&mut self, block: &str, index: usize, value: &Value) -> anyhow::Result<()> {
        match index {
            0 => self.name = value.as_str().ok_or_else(|| bad_param(block, index, value))?.to_string(),
            1 => self.key = value.as_str().ok_or_else(|| bad_param(block, index, value))?.to_string(),
            2 => self.global = value.as_bool().ok_or_else(|| bad_param(block, index, value))?,
            _ => anyhow::bail!("{} has no parameter {}", block, index),
        }
        Ok(())
    }

    pub(crate) fn get(&self, index: usize) -> Value {
        match index {
            0 => Value::string(self.name.as_str()),
            1 => Value::string(self.key.as_str()),
            2 => Value::Bool(self.global),
            _ => Value::None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn is_table(&self) -> bool {
        !self.key.is_empty()
    }

    /// No name: the block works on the value stack
    pub(crate) fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }

    /// Spaces join variable names and table keys, so names cannot hold them
    pub(crate) fn validate(&self, block: &str) -> ComposeResult<()> {
        if self.name.is_empty() || self.name.contains(' ') {
            return Err(ComposeError::Block {
                block: block.to_string(),
                message: format!("invalid variable name: {:?}", self.name),
            });
        }
        Ok(())
    }

    /// What a reader of this variable requires from scope
    pub(crate) fn consumed(&self) -> ExposedTypeInfo {
        let ty = if self.is_table() {
            TypeInfo::table_of(Vec::new())
        } else {
            TypeInfo::Any
        };
        ExposedTypeInfo::new(self.name.as_str(), ty).global(self.global)
    }

    pub(crate) fn acquire(&mut self, ctx: &mut Context) -> Variable {
        if let Some(target) = &self.target {
            return target.clone();
        }
        let var = if self.global {
            ctx.reference_global_variable(&self.name)
        } else {
            ctx.reference_variable(&self.name)
        };
        self.target = Some(var.clone());
        var
    }

    pub(crate) fn target(&self) -> Option<&Variable> {
        self.target.as_ref()
    }

    pub(crate) fn release(&mut self) {
        if let Some(target) = self.target.take() {
            release_variable(&target);
        }
    }
}

/// Which of the writing blocks a [`Set`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Introduce or overwrite a mutable variable
    Set,
    /// Write an existing variable without changing its type
    Update,
    /// Introduce an immutable variable
    Ref,
}

/// Writes its input into a variable and passes it on
#[derive(Debug)]
pub struct Set {
    mode: SetMode,
    var: VariableParams,
    info: Option<ExposedTypeInfo>,
}

impl Set {
    /// A writer of the given kind
    pub fn new(mode: SetMode) -> Self {
        Self {
            mode,
            var: VariableParams::default(),
            info: None,
        }
    }

    fn check_update(&self, data: &InstanceData) -> ComposeResult<()> {
        for info in data.shared_named(self.var.name()) {
            let current = match (&info.exposed_type, self.var.is_table()) {
                (TypeInfo::Table { keys, types }, true) => keys
                    .iter()
                    .position(|key| key == self.var.key())
                    .and_then(|idx| types.get(idx)),
                (ty, false) => Some(ty),
                _ => None,
            };
            if current.is_some_and(|ty| *ty != data.input_type) {
                return Err(ComposeError::Block {
                    block: self.name().to_string(),
                    message: "update is changing the variable type".into(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl Block for Set {
    fn name(&self) -> &str {
        match self.mode {
            SetMode::Set => "Set",
            SetMode::Update => "Update",
            SetMode::Ref => "Ref",
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
        if let Some(info) = data.shared_named(self.var.name()).find(|info| info.is_protected) {
            return Err(ComposeError::Block {
                block: self.name().to_string(),
                message: format!("attempted to write the protected variable {}", info.name),
            });
        }

        match self.mode {
            SetMode::Update => self.check_update(data)?,
            SetMode::Set if !self.var.is_table() && data.shared_named(self.var.name()).next().is_some() => {
                data.warn(format!(
                    "setting an already exposed variable, use Update to avoid this warning, variable: {}",
                    self.var.name()
                ));
            }
            _ => {}
        }

        let input = data.input_type.clone();
        let info = if self.var.is_table() {
            ExposedTypeInfo::new(
                self.var.name(),
                TypeInfo::table_with_keys(vec![(self.var.key().to_string(), input.clone())]),
            )
            .table_entry(true)
        } else {
            ExposedTypeInfo::new(self.var.name(), input.clone())
        };
        let info = match self.mode {
            // a table update only needs some table to be in scope
            SetMode::Update if self.var.is_table() => {
                ExposedTypeInfo::new(self.var.name(), TypeInfo::table_of(Vec::new()))
            }
            _ => info,
        };
        self.info = Some(
            info.mutable(self.mode != SetMode::Ref)
                .global(self.var.global),
        );
        Ok(Some(input))
    }

    fn exposed_variables(&self) -> Vec<ExposedTypeInfo> {
        match self.mode {
            SetMode::Update => Vec::new(),
            _ => self.info.iter().cloned().collect(),
        }
    }

    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        match self.mode {
            SetMode::Update => self.info.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn warmup(&mut self, ctx: &mut Context) -> ActivationResult<()> {
        self.var.acquire(ctx);
        Ok(())
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        if let Some(target) = self.var.target() {
            if self.var.is_table() {
                let mut value = target.borrow_mut();
                if let Value::Table(table) = &mut *value {
                    table.remove(self.var.key());
                    if table.is_empty() {
                        value.destroy();
                    }
                }
            }
        }
        self.var.release();
        Ok(())
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let target = self.var.acquire(ctx);
        if self.var.is_table() {
            let mut value = target.borrow_mut();
            if !matches!(*value, Value::Table(_)) {
                *value = Value::Table(Table::new());
            }
            if let Value::Table(table) = &mut *value {
                table.insert(self.var.key(), input.clone());
            }
        } else {
            target.set(input);
        }
        Ok(input.clone())
    }
}

/// Outputs the value of a variable
#[derive(Debug, Default)]
pub struct Get {
    var: VariableParams,
    default: Value,
}

impl Get {
    fn fallback(&self) -> ActivationResult<Value> {
        if self.default.is_none() {
            // nothing to output yet, try again on the next iteration
            Err(ActivationError::RestartChain)
        } else {
            Ok(self.default.clone())
        }
    }

    fn checked(&self, value: &Value) -> Value {
        if !self.default.is_none() && value.basic_type() != self.default.basic_type() {
            self.default.clone()
        } else {
            value.clone()
        }
    }
}

#[async_trait(?Send)]
impl Block for Get {
    fn name(&self) -> &str {
        "Get"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::None]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        let mut params = VariableParams::infos();
        params.push(ParameterInfo::new(
            "Default",
            "The value to output if the variable is not set, the key is missing or the type does not match.",
            vec![TypeInfo::Any],
        ));
        params
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        if index < VariableParams::COUNT {
            return self.var.set("Get", index, value);
        }
        if index > VariableParams::COUNT {
            anyhow::bail!("Get has no parameter {}", index);
        }
        self.default.clone_from(value);
        Ok(())
    }

    fn get_param(&self, index: usize) -> Value {
        if index < VariableParams::COUNT {
            self.var.get(index)
        } else if index == VariableParams::COUNT {
            self.default.clone()
        } else {
            Value::None
        }
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        self.var.validate("Get")?;
        for info in data.shared_named(self.var.name()) {
            if !self.var.is_table() {
                return Ok(Some(info.exposed_type.clone()));
            }
            if let TypeInfo::Table { keys, types } = &info.exposed_type {
                let entry = keys
                    .iter()
                    .position(|key| key == self.var.key())
                    .and_then(|idx| types.get(idx));
                if let Some(ty) = entry {
                    return Ok(Some(ty.clone()));
                }
            }
        }
        if self.default.is_none() {
            Ok(Some(TypeInfo::Any))
        } else {
            Ok(Some(derive_type_info(&self.default)))
        }
    }

    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        if self.default.is_none() {
            vec![self.var.consumed()]
        } else {
            Vec::new()
        }
    }

    fn warmup(&mut self, ctx: &mut Context) -> ActivationResult<()> {
        self.var.acquire(ctx);
        Ok(())
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        self.var.release();
        Ok(())
    }

    async fn activate(&mut self, ctx: &mut Context, _input: &Value) -> ActivationResult<Value> {
        let target = self.var.acquire(ctx);
        let value = target.borrow();
        if !self.var.is_table() {
            return Ok(self.checked(&value));
        }
        match value.as_table().and_then(|table| table.get(self.var.key())) {
            Some(entry) => Ok(self.checked(entry)),
            None => self.fallback(),
        }
    }
}

/// Appends its input to a sequence variable and passes it on
#[derive(Debug)]
pub struct Push {
    var: VariableParams,
    clear: bool,
    first_pusher: bool,
    pending_clear: bool,
    info: Option<ExposedTypeInfo>,
}

impl Default for Push {
    fn default() -> Self {
        Self {
            var: VariableParams::default(),
            clear: true,
            first_pusher: false,
            pending_clear: false,
            info: None,
        }
    }
}

impl Push {
    fn existing_seq(&self, data: &InstanceData) -> bool {
        data.shared_named(self.var.name()).any(|info| match &info.exposed_type {
            TypeInfo::Table { keys, types } if self.var.is_table() => keys
                .iter()
                .zip(types)
                .any(|(key, ty)| key == self.var.key() && matches!(ty, TypeInfo::Seq { .. })),
            TypeInfo::Seq { .. } => !self.var.is_table(),
            _ => false,
        })
    }
}

#[async_trait(?Send)]
impl Block for Push {
    fn name(&self) -> &str {
        "Push"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        let mut params = VariableParams::infos();
        params.push(ParameterInfo::new(
            "Clear",
            "If we should clear this sequence at every chain iteration; works only if this is the first push.",
            vec![TypeInfo::Bool],
        ));
        params
    }

    fn help(&self) -> &str {
        "Appends the input to a sequence variable, or pushes it onto the stack when no name is given."
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        if index < VariableParams::COUNT {
            return self.var.set("Push", index, value);
        }
        if index > VariableParams::COUNT {
            anyhow::bail!("Push has no parameter {}", index);
        }
        self.clear = value.as_bool().ok_or_else(|| bad_param("Push", index, value))?;
        Ok(())
    }

    fn get_param(&self, index: usize) -> Value {
        if index < VariableParams::COUNT {
            self.var.get(index)
        } else if index == VariableParams::COUNT {
            Value::Bool(self.clear)
        } else {
            Value::None
        }
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        self.var.validate("Push")?;
        let input = data.input_type.clone();
        self.first_pusher = !self.existing_seq(data);
        self.info = None;
        if self.first_pusher {
            let seq = TypeInfo::seq_of(vec![input.clone()]);
            let info = if self.var.is_table() {
                ExposedTypeInfo::new(
                    self.var.name(),
                    TypeInfo::table_with_keys(vec![(self.var.key().to_string(), seq)]),
                )
                .table_entry(true)
            } else {
                ExposedTypeInfo::new(self.var.name(), seq)
            };
            self.info = Some(info.mutable(true).global(self.var.global));
        }
        Ok(Some(input))
    }

    fn exposed_variables(&self) -> Vec<ExposedTypeInfo> {
        self.info.iter().cloned().collect()
    }

    fn warmup(&mut self, ctx: &mut Context) -> ActivationResult<()> {
        if !self.var.is_unnamed() {
            self.var.acquire(ctx);
        }
        Ok(())
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        if let (true, Some(target)) = (self.first_pusher, self.var.target()) {
            let mut value = target.borrow_mut();
            match &mut *value {
                Value::Table(table) if self.var.is_table() => {
                    table.remove(self.var.key());
                }
                Value::Seq(items) if !self.var.is_table() => items.clear(),
                _ => {}
            }
        }
        self.var.release();
        Ok(())
    }

    fn next_frame(&mut self, _ctx: &mut Context) {
        self.pending_clear = self.first_pusher && self.clear;
    }

    async fn activate(&mut self, ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        if self.var.is_unnamed() {
            ctx.stack_push(input.clone());
            return Ok(input.clone());
        }
        let target = self.var.acquire(ctx);
        let mut value = target.borrow_mut();
        let slot = if self.var.is_table() {
            if !matches!(*value, Value::Table(_)) {
                *value = Value::Table(Table::new());
            }
            match &mut *value {
                Value::Table(table) => {
                    if !table.contains_key(self.var.key()) {
                        table.insert(self.var.key(), Value::Seq(Vec::new()));
                    }
                    table.get_mut(self.var.key())
                }
                _ => None,
            }
        } else {
            Some(&mut *value)
        };
        let Some(slot) = slot else {
            return Err(ActivationError::Variable(format!(
                "Push: cannot address {}",
                self.var.name()
            )));
        };

        if !matches!(slot, Value::Seq(_)) {
            *slot = Value::Seq(Vec::new());
        }
        if let Value::Seq(items) = slot {
            if std::mem::take(&mut self.pending_clear) {
                items.clear();
            }
            items.push(input.clone());
        }
        Ok(input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::core::Const;
    use crate::runtime::block::BlockRef;
    use crate::runtime::compose::{ComposeDiagnostic, DiagnosticAction, compose_blocks, log_diagnostics};
    use crate::runtime::context::run_blocks;

    fn set(mode: SetMode, name: &str) -> Set {
        let mut block = Set::new(mode);
        block.set_param(0, &Value::string(name)).unwrap();
        block
    }

    fn get(name: &str) -> Get {
        let mut block = Get::default();
        block.set_param(0, &Value::string(name)).unwrap();
        block
    }

    fn push(name: &str) -> Push {
        let mut block = Push::default();
        block.set_param(0, &Value::string(name)).unwrap();
        block
    }

    fn warnings(blocks: &[BlockRef], input: TypeInfo) -> (ComposeResult<TypeInfo>, Vec<String>) {
        let mut messages = Vec::new();
        let result = compose_blocks(
            blocks,
            |diag: &ComposeDiagnostic| {
                if !diag.fatal {
                    messages.push(diag.message.clone());
                }
                DiagnosticAction::Continue
            },
            &input,
            &[],
        )
        .map(|outcome| outcome.output_type);
        (result, messages)
    }

    #[test]
    fn test_set_then_get_round_trips_value() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(9))),
            BlockRef::new(set(SetMode::Set, "x")),
            BlockRef::new(Const::new(Value::string("other"))),
            BlockRef::new(get("x")),
        ];
        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(out, Value::Int(9));
    }

    #[test]
    fn test_get_infers_type_from_set() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(1))),
            BlockRef::new(set(SetMode::Set, "x")),
            BlockRef::new(get("x")),
        ];
        let (ty, messages) = warnings(&blocks, TypeInfo::None);
        assert_eq!(ty.unwrap(), TypeInfo::Int);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_lone_get_warns_and_outputs_any() {
        let blocks = vec![BlockRef::new(get("x"))];
        let (ty, messages) = warnings(&blocks, TypeInfo::None);
        assert_eq!(ty.unwrap(), TypeInfo::Any);
        assert_eq!(messages, vec!["Required variable not found: x".to_string()]);
    }

    #[test]
    fn test_get_with_default_requires_nothing() {
        let mut block = get("x");
        block.set_param(3, &Value::Float(1.5)).unwrap();
        let blocks = vec![BlockRef::new(block)];
        let (ty, messages) = warnings(&blocks, TypeInfo::None);
        assert_eq!(ty.unwrap(), TypeInfo::Float);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_get_default_replaces_mismatched_value() {
        let mut block = get("x");
        block.set_param(3, &Value::Int(-1)).unwrap();
        let blocks = vec![
            BlockRef::new(Const::new(Value::string("text"))),
            BlockRef::new(set(SetMode::Set, "x")),
            BlockRef::new(block),
        ];
        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(out, Value::Int(-1));
    }

    #[test]
    fn test_set_twice_warns() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(1))),
            BlockRef::new(set(SetMode::Set, "x")),
            BlockRef::new(set(SetMode::Set, "x")),
        ];
        let (ty, messages) = warnings(&blocks, TypeInfo::None);
        assert!(ty.is_ok());
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("use Update"));
    }

    #[test]
    fn test_update_cannot_change_type() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(1))),
            BlockRef::new(set(SetMode::Set, "x")),
            BlockRef::new(Const::new(Value::string("s"))),
            BlockRef::new(set(SetMode::Update, "x")),
        ];
        let result = compose_blocks(&blocks, log_diagnostics, &TypeInfo::None, &[]);
        assert!(matches!(result, Err(ComposeError::Block { ref block, .. }) if block == "Update"));
    }

    #[test]
    fn test_ref_after_set_conflicts() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(1))),
            BlockRef::new(set(SetMode::Set, "x")),
            BlockRef::new(set(SetMode::Ref, "x")),
        ];
        let result = compose_blocks(&blocks, log_diagnostics, &TypeInfo::None, &[]);
        assert!(matches!(result, Err(ComposeError::VariableConflict { .. })));
    }

    #[test]
    fn test_invalid_variable_name() {
        let blocks = vec![BlockRef::new(set(SetMode::Set, "two words"))];
        let result = compose_blocks(&blocks, log_diagnostics, &TypeInfo::Int, &[]);
        assert!(matches!(result, Err(ComposeError::Block { .. })));
    }

    #[test]
    fn test_table_key_write_and_read() {
        let mut writer = set(SetMode::Set, "t");
        writer.set_param(1, &Value::string("a")).unwrap();
        let mut reader = get("t");
        reader.set_param(1, &Value::string("a")).unwrap();
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(4))),
            BlockRef::new(writer),
            BlockRef::new(reader),
        ];
        let (ty, _) = warnings(&blocks, TypeInfo::None);
        assert_eq!(ty.unwrap(), TypeInfo::Int);

        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(out, Value::Int(4));
    }

    #[test]
    fn test_missing_table_key_restarts() {
        let mut reader = get("t");
        reader.set_param(1, &Value::string("missing")).unwrap();
        let blocks = vec![BlockRef::new(reader)];
        let mut ctx = Context::detached();
        let (outcome, _) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(outcome, crate::runtime::context::FlowOutcome::Restarted);
    }

    #[test]
    fn test_push_exposes_seq_and_accumulates() {
        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(2))),
            BlockRef::new(push("xs")),
            BlockRef::new(push("xs")),
            BlockRef::new(get("xs")),
        ];
        let (ty, messages) = warnings(&blocks, TypeInfo::None);
        assert_eq!(ty.unwrap(), TypeInfo::seq_of(vec![TypeInfo::Int]));
        assert!(messages.is_empty());

        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(out, Value::Seq(vec![Value::Int(2), Value::Int(2)]));
    }

    #[test]
    fn test_push_clears_on_next_frame() {
        let mut block = push("xs");
        let mut data = InstanceData::new(TypeInfo::Int, Vec::new());
        block.compose(&mut data).unwrap();
        assert!(block.first_pusher);

        let pusher = BlockRef::new(block);
        let blocks = vec![pusher.clone()];
        let mut ctx = Context::detached();
        run_blocks(&blocks, &mut ctx, &Value::Int(1)).unwrap();
        run_blocks(&blocks, &mut ctx, &Value::Int(2)).unwrap();
        pusher.with_mut(|b| b.next_frame(&mut ctx));
        run_blocks(&blocks, &mut ctx, &Value::Int(3)).unwrap();

        let var = ctx.reference_variable("xs");
        assert_eq!(var.get(), Value::Seq(vec![Value::Int(3)]));
    }

    #[test]
    fn test_cleanup_releases_reference() {
        let mut block = set(SetMode::Set, "x");
        let mut ctx = Context::detached();
        block.warmup(&mut ctx).unwrap();
        let var = ctx.reference_variable("x");
        assert_eq!(var.refcount(), 2);
        block.cleanup().unwrap();
        assert_eq!(var.refcount(), 1);
    }
}
