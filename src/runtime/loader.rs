//! Building chains from descriptors and builders
//!
//! Chains are assembled against a [`BlockRegistry`] snapshot, either from
//! a JSON [`ChainDescriptor`] or fluently with a [`ChainBuilder`]. Every
//! parameter goes through [`validate_set_param`] before it reaches a
//! block.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::block::{BlockRef, block_params};
use super::chain::ChainRef;
use super::compose::ComposeDiagnostic;
use super::error::{RegistryError, Result, SerializeResult};
use super::registry::BlockRegistry;
use super::serialize::{WireValue, value_from_json};
use super::types::{TypeInfo, derive_type_info, match_types};
use super::value::Value;

/// Check `value` against the declared types of parameter `index`.
///
/// A sequence is also accepted when one of its elements is. Problems are
/// reported through `callback` as fatal diagnostics and yield `false`.
pub fn validate_set_param<F>(block: &BlockRef, index: usize, value: &Value, mut callback: F) -> bool
where
    F: FnMut(&ComposeDiagnostic),
{
    let Some(params) = block.with(|b| b.parameters()) else {
        callback(&diagnostic(block, "block is active and cannot take parameters"));
        return false;
    };
    let Some(param) = params.get(index) else {
        callback(&diagnostic(block, format!("Parameter index out of range: {}", index)));
        return false;
    };

    let accepts = |candidate: &TypeInfo| {
        param
            .value_types
            .iter()
            .any(|target| match_types(candidate, target, true, true))
    };
    if accepts(&derive_type_info(value)) {
        return true;
    }
    if let Value::Seq(items) = value {
        if items.iter().any(|item| accepts(&derive_type_info(item))) {
            return true;
        }
    }

    callback(&diagnostic(
        block,
        format!(
            "Parameter {} not accepting this kind of variable: {}",
            param.name,
            value.basic_type()
        ),
    ));
    false
}

fn diagnostic(block: &BlockRef, message: impl Into<String>) -> ComposeDiagnostic {
    ComposeDiagnostic {
        block: block.name().to_string(),
        message: message.into(),
        fatal: true,
    }
}

/// Validate and apply one parameter
pub fn apply_param(block: &BlockRef, index: usize, value: &Value) -> Result<()> {
    let mut problem = None;
    let invalid = |detail: String| RegistryError::InvalidParameter {
        block: block.name().to_string(),
        index,
        detail,
    };
    if !validate_set_param(block, index, value, |diag| problem = Some(diag.message.clone())) {
        return Err(invalid(problem.unwrap_or_default()).into());
    }
    block
        .with_mut(|b| b.set_param(index, value))
        .unwrap_or_else(|| Err(anyhow::anyhow!("block is active")))
        .map_err(|err| invalid(err.to_string()))?;
    Ok(())
}

/// A parameter as written in a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamDescriptor {
    /// A nested block list
    Blocks {
        /// Blocks in order
        blocks: Vec<BlockDescriptor>,
    },
    /// A value in its tagged wire form
    Typed(WireValue),
    /// Plain JSON (integers, floats, strings, arrays, objects)
    Plain(serde_json::Value),
}

/// A block as written in a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    /// Registered block name
    pub name: String,
    /// Positional parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamDescriptor>,
}

/// A chain as written in a descriptor file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    /// Chain name
    pub name: String,
    /// Whether the chain repeats until stopped
    #[serde(default)]
    pub looped: bool,
    /// Skip the fairness yield between iterations
    #[serde(default, rename = "unsafe")]
    pub unsafe_mode: bool,
    /// Blocks in order
    #[serde(default)]
    pub blocks: Vec<BlockDescriptor>,
}

impl ChainDescriptor {
    /// Parse a descriptor from JSON
    pub fn from_json(json: &str) -> SerializeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a descriptor from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> SerializeResult<Self> {
        let data = fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Render the descriptor as pretty JSON
    pub fn to_json(&self) -> SerializeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Describe an existing chain. Parameters holding objects or chains
    /// cannot be described.
    pub fn from_chain(chain: &ChainRef) -> SerializeResult<Self> {
        Ok(Self {
            name: chain.name(),
            looped: chain.looped(),
            unsafe_mode: chain.unsafe_mode(),
            blocks: chain
                .blocks()
                .iter()
                .map(describe_block)
                .collect::<SerializeResult<_>>()?,
        })
    }

    /// Instantiate the chain against a registry
    pub fn build(&self, registry: &BlockRegistry) -> Result<ChainRef> {
        let chain = ChainRef::new(self.name.clone());
        chain.set_looped(self.looped);
        chain.set_unsafe(self.unsafe_mode);
        for desc in &self.blocks {
            chain.add_block(build_block(registry, desc)?)?;
        }
        debug!(chain = %self.name, blocks = self.blocks.len(), "chain loaded");
        Ok(chain)
    }
}

fn describe_block(block: &BlockRef) -> SerializeResult<BlockDescriptor> {
    let params = block_params(block)
        .iter()
        .map(describe_param)
        .collect::<SerializeResult<_>>()?;
    Ok(BlockDescriptor {
        name: block.name().to_string(),
        params,
    })
}

fn describe_param(value: &Value) -> SerializeResult<ParamDescriptor> {
    let blocks = match value {
        Value::Block(block) => Some(vec![describe_block(block)?]),
        Value::Seq(items) if !items.is_empty() && items.iter().all(|v| v.as_block().is_some()) => Some(
            items
                .iter()
                .filter_map(Value::as_block)
                .map(describe_block)
                .collect::<SerializeResult<_>>()?,
        ),
        _ => None,
    };
    match blocks {
        Some(blocks) => Ok(ParamDescriptor::Blocks { blocks }),
        None => WireValue::from_value(value).map(ParamDescriptor::Typed),
    }
}

fn build_block(registry: &BlockRegistry, desc: &BlockDescriptor) -> Result<BlockRef> {
    let block = registry.create(&desc.name)?;
    for (index, param) in desc.params.iter().enumerate() {
        let value = param_value(registry, param)?;
        apply_param(&block, index, &value)?;
    }
    Ok(block)
}

fn param_value(registry: &BlockRegistry, param: &ParamDescriptor) -> Result<Value> {
    Ok(match param {
        ParamDescriptor::Blocks { blocks } => Value::Seq(
            blocks
                .iter()
                .map(|desc| build_block(registry, desc).map(Value::Block))
                .collect::<Result<_>>()?,
        ),
        ParamDescriptor::Typed(wire) => wire.clone().into_value()?,
        ParamDescriptor::Plain(json) => value_from_json(json),
    })
}

enum PendingBlock {
    Named { name: String, params: Vec<Value> },
    Ready(BlockRef),
}

/// Fluent chain construction
///
/// ```
/// use chainrt::blocks::core_registry;
/// use chainrt::runtime::{ChainBuilder, Value};
///
/// let registry = core_registry();
/// let chain = ChainBuilder::new("sum")
///     .let_value(5i64)
///     .block("Math.Add", vec![Value::Int(3)])
///     .build(&registry)
///     .unwrap();
/// assert_eq!(chain.len(), 2);
/// ```
pub struct ChainBuilder {
    name: String,
    looped: bool,
    unsafe_mode: bool,
    input: Value,
    input_type: TypeInfo,
    blocks: Vec<PendingBlock>,
}

impl ChainBuilder {
    /// Start a chain
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            looped: false,
            unsafe_mode: false,
            input: Value::None,
            input_type: TypeInfo::None,
            blocks: Vec::new(),
        }
    }

    /// Repeat the chain until stopped
    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    /// Skip the fairness yield between iterations
    pub fn unsafe_mode(mut self, unsafe_mode: bool) -> Self {
        self.unsafe_mode = unsafe_mode;
        self
    }

    /// Input fed to every iteration; also sets the declared input type
    pub fn input(mut self, input: impl Into<Value>) -> Self {
        self.input = input.into();
        self.input_type = derive_type_info(&self.input);
        self
    }

    /// Append a `Const` producing `value`
    pub fn let_value(self, value: impl Into<Value>) -> Self {
        self.block("Const", vec![value.into()])
    }

    /// Append a registered block with positional parameters
    pub fn block(mut self, name: &str, params: Vec<Value>) -> Self {
        self.blocks.push(PendingBlock::Named {
            name: name.to_string(),
            params,
        });
        self
    }

    /// Append an already constructed block
    pub fn block_ref(mut self, block: BlockRef) -> Self {
        self.blocks.push(PendingBlock::Ready(block));
        self
    }

    /// Instantiate every block and assemble the chain
    pub fn build(self, registry: &BlockRegistry) -> Result<ChainRef> {
        let chain = ChainRef::new(self.name);
        chain.set_looped(self.looped);
        chain.set_unsafe(self.unsafe_mode);
        chain.set_root_input(self.input);
        chain.set_input_type(self.input_type);
        for pending in self.blocks {
            let block = match pending {
                PendingBlock::Named { name, params } => {
                    let block = registry.create(&name)?;
                    for (index, value) in params.iter().enumerate() {
                        apply_param(&block, index, value)?;
                    }
                    block
                }
                PendingBlock::Ready(block) => block,
            };
            chain.add_block(block)?;
        }
        Ok(chain)
    }
}
