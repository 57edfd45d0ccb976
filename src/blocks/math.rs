//! Arithmetic and comparisons
//!
//! Arithmetic works lane by lane on vectors and element by element on
//! sequences. Integer lanes wrap on overflow and color lanes saturate.

use async_trait::async_trait;

use crate::runtime::block::Block;
use crate::runtime::compose::InstanceData;
use crate::runtime::context::Context;
use crate::runtime::error::{ActivationError, ActivationResult, ComposeError, ComposeResult};
use crate::runtime::types::{ParameterInfo, TypeInfo, derive_type_info};
use crate::runtime::value::{Color, Value};

/// Binary arithmetic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    /// `input + operand`
    Add,
    /// `input - operand`
    Subtract,
    /// `input * operand`
    Multiply,
}

impl MathOp {
    /// Every operation, in registration order
    pub const ALL: [MathOp; 3] = [MathOp::Add, MathOp::Subtract, MathOp::Multiply];

    /// Registered block name
    pub fn block_name(self) -> &'static str {
        match self {
            MathOp::Add => "Math.Add",
            MathOp::Subtract => "Math.Subtract",
            MathOp::Multiply => "Math.Multiply",
        }
    }
}

trait Lane: Copy {
    fn apply(self, op: MathOp, rhs: Self) -> Self;
}

macro_rules! wrapping_lane {
    ($($ty:ty),*) => {
        $(impl Lane for $ty {
            fn apply(self, op: MathOp, rhs: Self) -> Self {
                match op {
                    MathOp::Add => self.wrapping_add(rhs),
                    MathOp::Subtract => self.wrapping_sub(rhs),
                    MathOp::Multiply => self.wrapping_mul(rhs),
                }
            }
        })*
    };
}

macro_rules! float_lane {
    ($($ty:ty),*) => {
        $(impl Lane for $ty {
            fn apply(self, op: MathOp, rhs: Self) -> Self {
                match op {
                    MathOp::Add => self + rhs,
                    MathOp::Subtract => self - rhs,
                    MathOp::Multiply => self * rhs,
                }
            }
        })*
    };
}

wrapping_lane!(i64, i32, i16, i8);
float_lane!(f64, f32);

impl Lane for u8 {
    fn apply(self, op: MathOp, rhs: Self) -> Self {
        match op {
            MathOp::Add => self.saturating_add(rhs),
            MathOp::Subtract => self.saturating_sub(rhs),
            MathOp::Multiply => self.saturating_mul(rhs),
        }
    }
}

fn lanes<T: Lane, const N: usize>(op: MathOp, a: &[T; N], b: &[T; N]) -> [T; N] {
    std::array::from_fn(|idx| a[idx].apply(op, b[idx]))
}

fn apply(op: MathOp, lhs: &Value, rhs: &Value) -> ActivationResult<Value> {
    Ok(match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.apply(op, *b)),
        (Value::Int2(a), Value::Int2(b)) => Value::Int2(lanes(op, a, b)),
        (Value::Int3(a), Value::Int3(b)) => Value::Int3(lanes(op, a, b)),
        (Value::Int4(a), Value::Int4(b)) => Value::Int4(lanes(op, a, b)),
        (Value::Int8(a), Value::Int8(b)) => Value::Int8(lanes(op, a, b)),
        (Value::Int16(a), Value::Int16(b)) => Value::Int16(lanes(op, a, b)),
        (Value::Float(a), Value::Float(b)) => Value::Float(a.apply(op, *b)),
        (Value::Float2(a), Value::Float2(b)) => Value::Float2(lanes(op, a, b)),
        (Value::Float3(a), Value::Float3(b)) => Value::Float3(lanes(op, a, b)),
        (Value::Float4(a), Value::Float4(b)) => Value::Float4(lanes(op, a, b)),
        (Value::Color(a), Value::Color(b)) => {
            let [red, green, blue, alpha] = lanes(op, &[a.r, a.g, a.b, a.a], &[b.r, b.g, b.b, b.a]);
            Value::Color(Color::new(red, green, blue, alpha))
        }
        (Value::Seq(items), Value::Seq(operands)) => {
            if operands.is_empty() {
                return Err(mismatch(op, lhs, rhs));
            }
            // shorter operand sequences repeat
            Value::Seq(
                items
                    .iter()
                    .zip(operands.iter().cycle())
                    .map(|(item, operand)| apply(op, item, operand))
                    .collect::<ActivationResult<_>>()?,
            )
        }
        (Value::Seq(items), scalar) => Value::Seq(
            items
                .iter()
                .map(|item| apply(op, item, scalar))
                .collect::<ActivationResult<_>>()?,
        ),
        _ => return Err(mismatch(op, lhs, rhs)),
    })
}

fn mismatch(op: MathOp, lhs: &Value, rhs: &Value) -> ActivationError {
    ActivationError::InvalidInput {
        block: op.block_name().to_string(),
        detail: format!("cannot combine {} with {}", lhs.basic_type(), rhs.basic_type()),
    }
}

fn numeric_types() -> Vec<TypeInfo> {
    vec![
        TypeInfo::Int,
        TypeInfo::Int2,
        TypeInfo::Int3,
        TypeInfo::Int4,
        TypeInfo::Int8,
        TypeInfo::Int16,
        TypeInfo::Float,
        TypeInfo::Float2,
        TypeInfo::Float3,
        TypeInfo::Float4,
        TypeInfo::Color,
        TypeInfo::any_seq(),
    ]
}

/// Applies a [`MathOp`] between its input and an operand
#[derive(Debug)]
pub struct Arithmetic {
    op: MathOp,
    operand: Value,
}

impl Arithmetic {
    /// An arithmetic block with a zero operand
    pub fn new(op: MathOp) -> Self {
        Self {
            op,
            operand: Value::Int(0),
        }
    }
}

#[async_trait(?Send)]
impl Block for Arithmetic {
    fn name(&self) -> &str {
        self.op.block_name()
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        numeric_types()
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        numeric_types()
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Operand",
            "The right-hand side of the operation.",
            numeric_types(),
        )]
    }

    fn set_param(&mut self, _index: usize, value: &Value) -> anyhow::Result<()> {
        self.operand.clone_from(value);
        Ok(())
    }

    fn get_param(&self, _index: usize) -> Value {
        self.operand.clone()
    }

    fn compose(&mut self, data: &mut InstanceData) -> ComposeResult<Option<TypeInfo>> {
        let operand = derive_type_info(&self.operand);
        let input = &data.input_type;
        let compatible = matches!(input, TypeInfo::Seq { .. }) || operand.basic_type() == input.basic_type();
        if !compatible {
            return Err(ComposeError::Block {
                block: self.name().to_string(),
                message: format!("operand {} does not match input {}", operand, input),
            });
        }
        Ok(Some(input.clone()))
    }

    async fn activate(&mut self, _ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        apply(self.op, input, &self.operand)
    }
}

/// Comparison between the input and an operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal
    Is,
    /// Not equal
    IsNot,
    /// Strictly greater
    IsMore,
    /// Strictly less
    IsLess,
}

impl CompareOp {
    /// Every comparison, in registration order
    pub const ALL: [CompareOp; 4] = [CompareOp::Is, CompareOp::IsNot, CompareOp::IsMore, CompareOp::IsLess];

    /// Registered block name
    pub fn block_name(self) -> &'static str {
        match self {
            CompareOp::Is => "Is",
            CompareOp::IsNot => "IsNot",
            CompareOp::IsMore => "IsMore",
            CompareOp::IsLess => "IsLess",
        }
    }
}

/// Outputs whether its input compares to an operand
#[derive(Debug)]
pub struct Compare {
    op: CompareOp,
    operand: Value,
}

impl Compare {
    /// A comparison block against `None`
    pub fn new(op: CompareOp) -> Self {
        Self {
            op,
            operand: Value::None,
        }
    }
}

#[async_trait(?Send)]
impl Block for Compare {
    fn name(&self) -> &str {
        self.op.block_name()
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Bool]
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Value",
            "The value to compare the input with.",
            vec![TypeInfo::Any],
        )]
    }

    fn set_param(&mut self, _index: usize, value: &Value) -> anyhow::Result<()> {
        self.operand.clone_from(value);
        Ok(())
    }

    fn get_param(&self, _index: usize) -> Value {
        self.operand.clone()
    }

    async fn activate(&mut self, _ctx: &mut Context, input: &Value) -> ActivationResult<Value> {
        let result = match self.op {
            CompareOp::Is => *input == self.operand,
            CompareOp::IsNot => *input != self.operand,
            CompareOp::IsMore => input.greater(&self.operand)?,
            CompareOp::IsLess => input.less(&self.operand)?,
        };
        Ok(Value::Bool(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block::BlockRef;
    use crate::runtime::compose::{compose_blocks, log_diagnostics};
    use crate::runtime::context::run_blocks;

    fn eval(block: impl Block, input: Value) -> ActivationResult<Value> {
        let blocks = vec![BlockRef::new(block)];
        let mut ctx = Context::detached();
        run_blocks(&blocks, &mut ctx, &input).map(|(_, out)| out)
    }

    fn math(op: MathOp, operand: Value) -> Arithmetic {
        let mut block = Arithmetic::new(op);
        block.set_param(0, &operand).unwrap();
        block
    }

    fn compare(op: CompareOp, operand: Value) -> Compare {
        let mut block = Compare::new(op);
        block.set_param(0, &operand).unwrap();
        block
    }

    #[test]
    fn test_int_arithmetic_wraps() {
        assert_eq!(eval(math(MathOp::Add, Value::Int(3)), Value::Int(5)).unwrap(), Value::Int(8));
        assert_eq!(
            eval(math(MathOp::Add, Value::Int(1)), Value::Int(i64::MAX)).unwrap(),
            Value::Int(i64::MIN)
        );
        assert_eq!(
            eval(math(MathOp::Multiply, Value::Int2([2, 3])), Value::Int2([4, 5])).unwrap(),
            Value::Int2([8, 15])
        );
    }

    #[test]
    fn test_color_saturates() {
        let out = eval(
            math(MathOp::Add, Value::Color(Color::new(200, 0, 0, 0))),
            Value::Color(Color::new(100, 1, 2, 3)),
        )
        .unwrap();
        assert_eq!(out, Value::Color(Color::new(255, 1, 2, 3)));
    }

    #[test]
    fn test_seq_with_scalar_and_cycled_operand() {
        let input = Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(
            eval(math(MathOp::Subtract, Value::Int(1)), input.clone()).unwrap(),
            Value::Seq(vec![Value::Int(0), Value::Int(1), Value::Int(2)])
        );
        let operand = Value::Seq(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(
            eval(math(MathOp::Add, operand), input).unwrap(),
            Value::Seq(vec![Value::Int(11), Value::Int(22), Value::Int(13)])
        );
    }

    #[test]
    fn test_mismatched_operand_fails_compose() {
        let blocks = vec![BlockRef::new(math(MathOp::Add, Value::Float(1.0)))];
        let result = compose_blocks(&blocks, log_diagnostics, &TypeInfo::Int, &[]);
        assert!(matches!(result, Err(ComposeError::Block { .. })));
    }

    #[test]
    fn test_mismatched_operand_fails_activation() {
        let err = eval(math(MathOp::Add, Value::Float(1.0)), Value::Int(1)).unwrap_err();
        assert!(matches!(err, ActivationError::InvalidInput { .. }));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval(compare(CompareOp::Is, Value::Int(2)), Value::Int(2)).unwrap(), Value::Bool(true));
        assert_eq!(
            eval(compare(CompareOp::IsNot, Value::Int(2)), Value::string("2")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(eval(compare(CompareOp::IsMore, Value::Int(2)), Value::Int(3)).unwrap(), Value::Bool(true));
        assert_eq!(
            eval(compare(CompareOp::IsLess, Value::Float(2.0)), Value::Float(3.0)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_ordering_across_types_is_an_error() {
        let err = eval(compare(CompareOp::IsLess, Value::Int(2)), Value::string("a")).unwrap_err();
        assert!(matches!(err, ActivationError::Value(_)));
    }
}
