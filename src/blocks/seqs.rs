//! Sequence access: Take and Count

use async_trait::async_trait;

use crate::runtime::block::{Block, InlineDispatch};
use crate::runtime::compose::InstanceData;
use crate::runtime::context::Context;
use crate::runtime::error::{ActivationError, ActivationResult, ComposeError, ComposeResult};
use crate::runtime::types::{ExposedTypeInfo, ParameterInfo, TypeInfo};
use crate::runtime::value::Value;

use super::variables::VariableParams;
use super::{bad_param, invalid_input};

/// Picks one or several elements out of an indexable input
#[derive(Debug)]
pub struct Take {
    indices: Value,
    dispatch: InlineDispatch,
}

impl Default for Take {
    fn default() -> Self {
        Self {
            indices: Value::Int(0),
            dispatch: InlineDispatch::Generic,
        }
    }
}

fn dispatch_of(input: &Value) -> InlineDispatch {
    match input {
        Value::Seq(_) => InlineDispatch::Seq,
        Value::Int2(_) | Value::Int3(_) | Value::Int4(_) | Value::Int8(_) | Value::Int16(_) => {
            InlineDispatch::Ints
        }
        Value::Float2(_) | Value::Float3(_) | Value::Float4(_) => InlineDispatch::Floats,
        Value::Color(_) => InlineDispatch::Color,
        Value::Bytes(_) => InlineDispatch::Bytes,
        Value::String(_) => InlineDispatch::String,
        _ => InlineDispatch::Generic,
    }
}

fn lane<T: Copy>(lanes: &[T], idx: usize) -> Option<T> {
    lanes.get(idx).copied()
}

impl Take {
    fn wanted(&self) -> Vec<i64> {
        match &self.indices {
            Value::Int(idx) => vec![*idx],
            Value::Seq(items) => items.iter().filter_map(Value::as_int).collect(),
            _ => Vec::new(),
        }
    }

    fn is_multi(&self) -> bool {
        matches!(self.indices, Value::Seq(_))
    }

    fn element(dispatch: InlineDispatch, input: &Value, idx: usize) -> Option<Value> {
        match (dispatch, input) {
            (InlineDispatch::Seq, Value::Seq(items)) => items.get(idx).cloned(),
            (InlineDispatch::Ints, Value::Int2(v)) => lane(v, idx).map(Value::Int),
            (InlineDispatch::Ints, Value::Int3(v)) => lane(v, idx).map(|x| Value::Int(x.into())),
            (InlineDispatch::Ints, Value::Int4(v)) => lane(v, idx).map(|x| Value::Int(x.into())),
            (InlineDispatch::Ints, Value::Int8(v)) => lane(v, idx).map(|x| Value::Int(x.into())),
            (InlineDispatch::Ints, Value::Int16(v)) => lane(v, idx).map(|x| Value::Int(x.into())),
            (InlineDispatch::Floats, Value::Float2(v)) => lane(v, idx).map(Value::Float),
            (InlineDispatch::Floats, Value::Float3(v)) => lane(v, idx).map(|x| Value::Float(x.into())),
            (InlineDispatch::Floats, Value::Float4(v)) => lane(v, idx).map(|x| Value::Float(x.into())),
            (InlineDispatch::Color, Value::Color(c)) => {
                lane(&[c.r, c.g, c.b, c.a], idx).map(|x| Value::Int(x.into()))
            }
            (InlineDispatch::Bytes, Value::Bytes(bytes)) => lane(bytes.as_slice(), idx).map(|x| Value::Int(x.into())),
            (InlineDispatch::String, Value::String(text)) => {
                text.chars().nth(idx).map(|ch| Value::String(ch.to_string()))
            }
            _ => None,
        }
    }

    fn len_of(input: &Value) -> usize {
        match input {
            Value::Seq(items) => items.len(),
            Value::Int2(_) | Value::Float2(_) => 2,
            Value::Int3(_) | Value::Float3(_) => 3,
            Value::Int4(_) | Value::Float4(_) | Value::Color(_) => 4,
            Value::Int8(_) => 8,
            Value::Int16(_) => 16,
            Value::Bytes(bytes) => bytes.len(),
            Value::String(text) => text.chars().count(),
            _ => 0,
        }
    }

    fn take_one(&self, dispatch: InlineDispatch, input: &Value, idx: i64) -> ActivationResult<Value> {
        usize::try_from(idx)
            .ok()
            .and_then(|idx| Self::element(dispatch, input, idx))
            .ok_or_else(|| {
                ActivationError::Failed(format!(
                    "Take out of range! len: {} wanted index: {}",
                    Self::len_of(input),
                    idx
                ))
            })
    }

    /// Join picked elements back into the input's own shape where it has one
    fn gather(input: &Value, picked: Vec<Value>) -> Value {
        match input {
            Value::Bytes(_) => Value::Bytes(
                picked
                    .iter()
                    .filter_map(Value::as_int)
                    .filter_map(|x| u8::try_from(x).ok())
                    .collect(),
            ),
            Value::String(_) => Value::String(picked.iter().filter_map(Value::as_str).collect()),
            _ => Value::Seq(picked),
        }
    }
}

#[async_trait(?Send)]
impl Block for Take {
    fn name(&self) -> &str {
        "Take"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![
            TypeInfo::any_seq(),
            TypeInfo::Int2,
            TypeInfo::Int3,
            TypeInfo::Int4,
            TypeInfo::Int8,
            TypeInfo::Int16,
            TypeInfo::Float2,
            TypeInfo::Float3,
            TypeInfo::Float4,
            TypeInfo::Color,
            TypeInfo::Bytes,
            TypeInfo::String,
        ]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Indices",
            "One or multiple indices to filter from the input.",
            vec![TypeInfo::Int, TypeInfo::seq_of(vec![TypeInfo::Int])],
        )]
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        let valid = match value {
            Value::Int(_) => true,
            Value::Seq(items) => items.iter().all(|item| item.as_int().is_some()),
            _ => false,
        };
        if !valid {
            return Err(bad_param("Take", index, value));
        }
        self.indices.clone_from(value);
        Ok(())
    }

    fn get_param(&self, _index: usize) -> Value {
        self.indices.clone()
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        let input = &data.input_type;
        let single = match input {
            TypeInfo::Seq { types, .. } => match types.as_slice() {
                [only] => only.clone(),
                _ => TypeInfo::Any,
            },
            TypeInfo::Int2 | TypeInfo::Int3 | TypeInfo::Int4 | TypeInfo::Int8 | TypeInfo::Int16 => TypeInfo::Int,
            TypeInfo::Float2 | TypeInfo::Float3 | TypeInfo::Float4 => TypeInfo::Float,
            TypeInfo::Color | TypeInfo::Bytes => TypeInfo::Int,
            TypeInfo::String => TypeInfo::String,
            TypeInfo::Any => TypeInfo::Any,
            other => {
                return Err(ComposeError::Block {
                    block: "Take".into(),
                    message: format!("Take expected an indexable input, got {}", other),
                });
            }
        };

        if !self.is_multi() {
            return Ok(Some(single));
        }
        Ok(Some(match input {
            TypeInfo::Seq { .. } => input.clone(),
            TypeInfo::Bytes | TypeInfo::String => input.clone(),
            TypeInfo::Any => TypeInfo::Any,
            _ => TypeInfo::seq_of(vec![single]),
        }))
    }

    fn set_inline(&mut self, dispatch: InlineDispatch) {
        self.dispatch = dispatch;
    }

    async fn activate(&mut self, _ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let dispatch = match self.dispatch {
            InlineDispatch::Generic => dispatch_of(input),
            chosen => chosen,
        };
        if dispatch == InlineDispatch::Generic {
            return Err(invalid_input("Take", "an indexable value", input));
        }

        if !self.is_multi() {
            let idx = self.wanted().first().copied().unwrap_or(0);
            return self.take_one(dispatch, input, idx);
        }
        let picked = self
            .wanted()
            .into_iter()
            .map(|idx| self.take_one(dispatch, input, idx))
            .collect::<ActivationResult<Vec<_>>>()?;
        Ok(Self::gather(input, picked))
    }
}

/// Length of a sequence variable
#[derive(Debug, Default)]
pub struct Count {
    var: VariableParams,
}

#[async_trait(?Send)]
impl Block for Count {
    fn name(&self) -> &str {
        "Count"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::None]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Int]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        VariableParams::infos()
    }

    fn set_param(&mut self, index: usize, value: &Value) -> anyhow::Result<()> {
        self.var.set("Count", index, value)
    }

    fn get_param(&self, index: usize) -> Value {
        self.var.get(index)
    }

    fn compose(&mut self, _data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        self.var.validate("Count")?;
        Ok(Some(TypeInfo::Int))
    }

    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        vec![self.var.consumed()]
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
        let seq = if self.var.is_table() {
            let table = value.as_table().ok_or_else(|| {
                ActivationError::Variable(format!("{} is not a table, failed to Count", self.var.name()))
            })?;
            table.get(self.var.key()).and_then(Value::as_seq)
        } else {
            value.as_seq()
        };
        let len = seq.map_or(0, <[Value]>::len);
        Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::core::Const;
    use crate::blocks::variables::Push;
    use crate::runtime::block::BlockRef;
    use crate::runtime::compose::{compose_blocks, log_diagnostics};
    use crate::runtime::context::run_blocks;
    use crate::runtime::value::Color;

    fn take(indices: Value) -> Take {
        let mut block = Take::default();
        block.set_param(0, &indices).unwrap();
        block
    }

    fn run(block: Take, input: Value) -> ActivationResult<Value> {
        let blocks = vec![BlockRef::new(block)];
        let mut ctx = Context::detached();
        run_blocks(&blocks, &mut ctx, &input).map(|(_, out)| out)
    }

    #[test]
    fn test_take_single_from_seq() {
        let input = Value::Seq(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(run(take(Value::Int(1)), input).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_take_many_from_seq() {
        let input = Value::Seq(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        let indices = Value::Seq(vec![Value::Int(2), Value::Int(0)]);
        assert_eq!(
            run(take(indices), input).unwrap(),
            Value::Seq(vec![Value::Int(30), Value::Int(10)])
        );
    }

    #[test]
    fn test_take_out_of_range() {
        let input = Value::Seq(vec![Value::Int(10)]);
        let err = run(take(Value::Int(3)), input).unwrap_err();
        assert!(
            matches!(err, ActivationError::Failed(ref msg) if msg == "Take out of range! len: 1 wanted index: 3")
        );
    }

    #[test]
    fn test_take_from_vectors_and_color() {
        assert_eq!(run(take(Value::Int(2)), Value::Int3([1, 2, 3])).unwrap(), Value::Int(3));
        assert_eq!(
            run(take(Value::Int(1)), Value::Float2([0.5, 1.5])).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            run(take(Value::Int(3)), Value::Color(Color::new(1, 2, 3, 4))).unwrap(),
            Value::Int(4)
        );
        assert_eq!(
            run(take(Value::Seq(vec![Value::Int(0), Value::Int(2)])), Value::string("abc")).unwrap(),
            Value::string("ac")
        );
    }

    #[test]
    fn test_take_compose_selects_dispatch_and_type() {
        let block = BlockRef::new(take(Value::Int(0)));
        let blocks = vec![BlockRef::new(Const::new(Value::Float3([1.0, 2.0, 3.0]))), block.clone()];
        let outcome = compose_blocks(&blocks, log_diagnostics, &TypeInfo::None, &[]).unwrap();
        assert_eq!(outcome.output_type, TypeInfo::Float);

        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(out, Value::Float(1.0));
    }

    #[test]
    fn test_take_rejects_non_int_indices() {
        let mut block = Take::default();
        assert!(block.set_param(0, &Value::string("0")).is_err());
        assert!(block.set_param(0, &Value::Seq(vec![Value::Float(1.0)])).is_err());
    }

    #[test]
    fn test_count_pushed_items() {
        let mut pusher = Push::default();
        pusher.set_param(0, &Value::string("xs")).unwrap();
        let mut count = Count::default();
        count.set_param(0, &Value::string("xs")).unwrap();

        let blocks = vec![
            BlockRef::new(Const::new(Value::Int(1))),
            BlockRef::new(pusher),
            BlockRef::new(count),
        ];
        let outcome = compose_blocks(&blocks, log_diagnostics, &TypeInfo::None, &[]).unwrap();
        assert_eq!(outcome.output_type, TypeInfo::Int);

        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(out, Value::Int(1));
    }

    #[test]
    fn test_count_of_unset_variable_is_zero() {
        let mut count = Count::default();
        count.set_param(0, &Value::string("nothing")).unwrap();
        let blocks = vec![BlockRef::new(count)];
        let mut ctx = Context::detached();
        let (_, out) = run_blocks(&blocks, &mut ctx, &Value::None).unwrap();
        assert_eq!(out, Value::Int(0));
    }
}
