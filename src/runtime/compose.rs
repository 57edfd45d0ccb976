//! Static composition
//!
//! Composition walks a block list once, before it may run. It propagates
//! the running output type from block to block, checks each connection,
//! lets blocks re-type their output through their `compose` hook, and
//! computes which variables the list exposes and which it needs from the
//! enclosing scopes. The unnamed Push/Pop/Drop/Swap forms are typed here
//! against a compile-time image of the value stack.

use std::collections::HashSet;

use tracing::warn;

use super::block::{BlockRef, InlineDispatch};
use super::chain::ChainRef;
use super::error::{ComposeError, ComposeResult};
use super::types::{ExposedTypeInfo, TypeInfo, format_types, match_types};
use super::value::Value;

/// Blocks that re-anchor the running type to the original input
const REBASING_BLOCKS: &[&str] = &["Input", "And", "Or"];

/// Blocks that unconditionally leave the current flow
const FLOW_STOPPERS: &[&str] = &["Return", "Restart", "Stop", "Fail"];

/// Value stack operation of an unnamed Push/Pop/Drop/Swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackOp {
    Push,
    Pop,
    Drop,
    Swap,
}

impl StackOp {
    /// The stack form of `block`, if it names no variable
    fn of(block: &BlockRef) -> Option<Self> {
        let (op, names) = match block.name() {
            "Push" => (StackOp::Push, 1),
            "Pop" => (StackOp::Pop, 1),
            "Drop" => (StackOp::Drop, 1),
            "Swap" => (StackOp::Swap, 2),
            _ => return None,
        };
        let unnamed = |value: &Value| value.is_none() || value.as_str() == Some("");
        block
            .with(|b| (0..names).all(|idx| unnamed(&b.get_param(idx))))
            .unwrap_or(false)
            .then_some(op)
    }
}

/// A problem found during composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeDiagnostic {
    /// Block being composed
    pub block: String,
    /// Description
    pub message: String,
    /// Fatal diagnostics always abort composition
    pub fatal: bool,
}

/// What the embedder wants to do after a non-fatal diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticAction {
    /// Keep composing
    Continue,
    /// Treat the warning as fatal
    Abort,
}

/// Result of a successful composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOutcome {
    /// Type produced by the last block
    pub output_type: TypeInfo,
    /// Variables introduced by the blocks
    pub exposed_info: Vec<ExposedTypeInfo>,
    /// Variables the blocks take from enclosing scopes
    pub required_info: Vec<ExposedTypeInfo>,
    /// Whether the last block always leaves the flow
    pub flow_stopper: bool,
}

/// Data handed to a block's compose hook
#[derive(Debug, Clone)]
pub struct InstanceData {
    /// Name of the block being composed
    pub block_name: String,
    /// Type flowing into the block
    pub input_type: TypeInfo,
    /// Input types accepted by the next block, if any
    pub output_types: Vec<TypeInfo>,
    /// Every variable visible at this point
    pub shared: Vec<ExposedTypeInfo>,
    /// Types on the value stack, bottom first
    pub stack: Vec<TypeInfo>,
    warnings: Vec<String>,
}

impl InstanceData {
    /// Instance data for composing outside of a block list
    pub fn new(input_type: TypeInfo, shared: Vec<ExposedTypeInfo>) -> Self {
        Self {
            block_name: String::new(),
            input_type,
            output_types: Vec::new(),
            shared,
            stack: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Report a non-fatal problem; the embedder decides whether it aborts
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Visible variables with the given name
    pub fn shared_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ExposedTypeInfo> + 'a {
        self.shared.iter().filter(move |info| info.name == name)
    }

    /// Compose a nested chain against the variables visible here. Its
    /// warnings are forwarded as warnings of the composing block.
    pub fn compose_chain(&mut self, chain: &ChainRef, input_type: &TypeInfo) -> ComposeResult<ComposeOutcome> {
        let mut warnings = Vec::new();
        let outcome = chain.compose_with(
            |diag: &ComposeDiagnostic| {
                if !diag.fatal {
                    warnings.push(format!("{}: {}", diag.block, diag.message));
                }
                DiagnosticAction::Continue
            },
            input_type,
            &self.shared,
        );
        self.warnings.extend(warnings);
        outcome
    }

    /// Compose a nested block list against the variables and stack
    /// visible here
    pub fn compose_nested(&mut self, blocks: &[BlockRef], input_type: &TypeInfo) -> ComposeResult<ComposeOutcome> {
        let mut warnings = Vec::new();
        let outcome = compose_on_stack(
            blocks,
            |diag: &ComposeDiagnostic| {
                if !diag.fatal {
                    warnings.push(format!("{}: {}", diag.block, diag.message));
                }
                DiagnosticAction::Continue
            },
            input_type,
            &self.shared,
            &self.stack,
        );
        self.warnings.extend(warnings);
        outcome
    }

    fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

/// Compose a block list
///
/// `input_type` seeds the running type; `inherited` lists the variables
/// visible from enclosing scopes. Fatal problems are reported through the
/// callback and returned as errors; warnings are reported and composition
/// continues unless the callback answers [`DiagnosticAction::Abort`].
pub fn compose_blocks<F>(
    blocks: &[BlockRef],
    callback: F,
    input_type: &TypeInfo,
    inherited: &[ExposedTypeInfo],
) -> ComposeResult<ComposeOutcome>
where
    F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
{
    compose_on_stack(blocks, callback, input_type, inherited, &[])
}

fn compose_on_stack<F>(
    blocks: &[BlockRef],
    mut callback: F,
    input_type: &TypeInfo,
    inherited: &[ExposedTypeInfo],
    stack: &[TypeInfo],
) -> ComposeResult<ComposeOutcome>
where
    F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
{
    let mut validation = ValidationContext::new(input_type, inherited, stack);
    for (idx, block) in blocks.iter().enumerate() {
        let next_inputs = blocks
            .get(idx + 1)
            .and_then(|next| next.with(|b| b.input_types()))
            .unwrap_or_default();
        validation.validate(block, next_inputs, &mut callback)?;
    }

    let flow_stopper = blocks
        .last()
        .is_some_and(|block| FLOW_STOPPERS.contains(&block.name()));

    Ok(ComposeOutcome {
        output_type: validation.previous_output,
        exposed_info: validation.exposed,
        required_info: validation.required,
        flow_stopper,
    })
}

/// Callback that logs diagnostics and never escalates warnings
pub fn log_diagnostics(diag: &ComposeDiagnostic) -> DiagnosticAction {
    if !diag.fatal {
        warn!(block = %diag.block, "{}", diag.message);
    }
    DiagnosticAction::Continue
}

/// Callback that escalates every warning
pub fn strict_diagnostics(_diag: &ComposeDiagnostic) -> DiagnosticAction {
    DiagnosticAction::Abort
}

struct ValidationContext<'a> {
    previous_output: TypeInfo,
    original_input: TypeInfo,
    exposed: Vec<ExposedTypeInfo>,
    inherited: &'a [ExposedTypeInfo],
    variables: HashSet<String>,
    references: HashSet<String>,
    required: Vec<ExposedTypeInfo>,
    stack_types: Vec<TypeInfo>,
}

impl<'a> ValidationContext<'a> {
    fn new(input_type: &TypeInfo, inherited: &'a [ExposedTypeInfo], stack: &[TypeInfo]) -> Self {
        Self {
            previous_output: input_type.clone(),
            original_input: input_type.clone(),
            exposed: Vec::new(),
            inherited,
            variables: HashSet::new(),
            references: HashSet::new(),
            required: Vec::new(),
            stack_types: stack.to_vec(),
        }
    }

    fn validate<F>(&mut self, block: &BlockRef, next_inputs: Vec<TypeInfo>, callback: &mut F) -> ComposeResult<()>
    where
        F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
    {
        let name = block.name().to_string();
        if REBASING_BLOCKS.contains(&name.as_str()) {
            // the next block sees the list's original input
            self.previous_output = self.original_input.clone();
            return Ok(());
        }
        if let Some(op) = StackOp::of(block) {
            return self.apply_stack_op(&name, op, callback);
        }

        let (inputs, outputs) = block
            .with(|b| (b.input_types(), b.output_types()))
            .ok_or_else(|| ComposeError::Block {
                block: name.clone(),
                message: "block is being activated and cannot be composed".into(),
            })?;

        let input_type = self.previous_output.clone();
        let accepts_anything = inputs.len() == 1 && matches!(inputs[0], TypeInfo::None);
        if !accepts_anything && !inputs.iter().any(|ty| match_types(&input_type, ty, false, true)) {
            return Err(fatal(
                callback,
                ComposeError::TypeMismatch {
                    block: name,
                    expected: format_types(&inputs),
                    found: input_type.to_string(),
                },
            ));
        }

        let mut data = InstanceData {
            block_name: name.clone(),
            input_type: input_type.clone(),
            output_types: next_inputs,
            shared: self.visible(),
            stack: self.stack_types.clone(),
            warnings: Vec::new(),
        };
        let hook = block
            .with_mut(|b| b.compose(&mut data))
            .unwrap_or(Ok(None));
        for message in data.take_warnings() {
            warning(callback, &name, message)?;
        }
        match hook {
            Err(err) => return Err(fatal(callback, err)),
            Ok(Some(ty)) => self.previous_output = ty,
            Ok(None) => {
                if outputs.len() == 1 && !outputs[0].is_any() {
                    self.previous_output = outputs[0].clone();
                } else if cfg!(debug_assertions)
                    && inputs.len() == 1
                    && !matches!(inputs[0], TypeInfo::Any | TypeInfo::None)
                    && outputs.len() == 1
                {
                    return Err(fatal(
                        callback,
                        ComposeError::Block {
                            block: name,
                            message: "a block narrowing its input to a single type cannot \
                                      declare an Any output without a compose hook"
                                .into(),
                        },
                    ));
                }
            }
        }

        let exposed = block.with(|b| b.exposed_variables()).unwrap_or_default();
        for info in exposed {
            self.check_ownership(&name, &info.name, callback)?;
            if !self.exposed.contains(&info) {
                self.exposed.push(info);
            }
        }

        if name == "Take" {
            let dispatch = inline_dispatch(&input_type);
            block.with_mut(|b| b.set_inline(dispatch));
        }

        let required = block.with(|b| b.required_variables()).unwrap_or_default();
        if name == "Update" {
            // Update writes through a variable it requires rather than exposes
            for info in &required {
                let var = info.name.split(' ').next().unwrap_or(info.name.as_str());
                self.check_ownership(&name, var, callback)?;
            }
        }
        self.check_required(&name, required, callback)
    }

    /// Stack forms keep no variables; they only move types between the
    /// running output and the stack image
    fn apply_stack_op<F>(&mut self, block: &str, op: StackOp, callback: &mut F) -> ComposeResult<()>
    where
        F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
    {
        let needed = match op {
            StackOp::Push => 0,
            StackOp::Pop | StackOp::Drop => 1,
            StackOp::Swap => 2,
        };
        if self.stack_types.len() < needed {
            return Err(fatal(
                callback,
                ComposeError::Block {
                    block: block.to_string(),
                    message: format!(
                        "stack {} needs {} value(s) but the stack holds {}",
                        block,
                        needed,
                        self.stack_types.len()
                    ),
                },
            ));
        }

        match op {
            StackOp::Push => self.stack_types.push(self.previous_output.clone()),
            StackOp::Pop => {
                if let Some(ty) = self.stack_types.pop() {
                    self.previous_output = ty;
                }
            }
            StackOp::Drop => {
                self.stack_types.pop();
            }
            StackOp::Swap => {
                let len = self.stack_types.len();
                self.stack_types.swap(len - 1, len - 2);
                self.previous_output = self.stack_types[len - 1].clone();
            }
        }
        Ok(())
    }

    fn visible(&self) -> Vec<ExposedTypeInfo> {
        let mut shared = self.exposed.clone();
        shared.extend(self.inherited.iter().cloned());
        shared
    }

    fn check_ownership<F>(&mut self, block: &str, var: &str, callback: &mut F) -> ComposeResult<()>
    where
        F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
    {
        let conflict = match block {
            "Ref" => {
                let used = self.variables.contains(var);
                self.references.insert(var.to_string());
                used.then_some(
                    "Ref variable name already used as Set. Overwriting a previously Set \
                     variable with Ref is not allowed",
                )
            }
            "Set" | "Push" => {
                let used = self.references.contains(var);
                self.variables.insert(var.to_string());
                used.then_some(if block == "Set" {
                    "Set variable name already used as Ref. Overwriting a previously Ref \
                     variable with Set is not allowed"
                } else {
                    "Push variable name already used as Ref. Overwriting a previously Ref \
                     variable with Push is not allowed"
                })
            }
            "Update" => self.references.contains(var).then_some(
                "Update variable name already used as Ref. Overwriting a previously Ref \
                 variable with Update is not allowed",
            ),
            _ => None,
        };

        match conflict {
            Some(detail) => Err(fatal(
                callback,
                ComposeError::VariableConflict {
                    block: block.to_string(),
                    name: var.to_string(),
                    detail: detail.to_string(),
                },
            )),
            None => Ok(()),
        }
    }

    fn check_required<F>(&mut self, block: &str, required: Vec<ExposedTypeInfo>, callback: &mut F) -> ComposeResult<()>
    where
        F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
    {
        // group candidates by name, keeping first-seen order
        let mut groups: Vec<(String, Vec<ExposedTypeInfo>)> = Vec::new();
        for info in required {
            match groups.iter_mut().find(|(name, _)| *name == info.name) {
                Some((_, group)) => group.push(info),
                None => groups.push((info.name.clone(), vec![info])),
            }
        }

        for (group_name, candidates) in groups {
            let mut found_any = false;
            let mut matched = false;

            for candidate in &candidates {
                // "name key" addresses a table entry; only the variable matters here
                let name = candidate
                    .name
                    .split(' ')
                    .next()
                    .unwrap_or(candidate.name.as_str());

                let local = self.exposed.iter().filter(|info| info.name == name);
                let mut local_found = false;
                for info in local {
                    local_found = true;
                    if match_types(&info.exposed_type, &candidate.exposed_type, false, true) {
                        matched = true;
                        break;
                    }
                }
                found_any |= local_found;
                if matched {
                    break;
                }

                let inherited = self.inherited.iter().filter(|info| info.name == name);
                for info in inherited {
                    found_any = true;
                    if match_types(&info.exposed_type, &candidate.exposed_type, false, true) {
                        matched = true;
                        let mut record = candidate.clone();
                        record.name = name.to_string();
                        record.global = info.global;
                        if !self.required.contains(&record) {
                            self.required.push(record);
                        }
                        break;
                    }
                }
                if matched {
                    break;
                }
            }

            if matched {
                continue;
            }
            if !found_any {
                warning(
                    callback,
                    block,
                    format!("Required variable not found: {}", group_name),
                )?;
            } else {
                return Err(fatal(
                    callback,
                    ComposeError::RequiredTypeMismatch {
                        block: block.to_string(),
                        name: group_name,
                    },
                ));
            }
        }
        Ok(())
    }
}

fn inline_dispatch(input: &TypeInfo) -> InlineDispatch {
    let basic = input.basic_type();
    match input {
        TypeInfo::Seq { .. } => InlineDispatch::Seq,
        TypeInfo::Color => InlineDispatch::Color,
        TypeInfo::Bytes => InlineDispatch::Bytes,
        TypeInfo::String => InlineDispatch::String,
        _ if basic.is_int_vector() => InlineDispatch::Ints,
        _ if basic.is_float_vector() => InlineDispatch::Floats,
        _ => InlineDispatch::Generic,
    }
}

fn fatal<F>(callback: &mut F, err: ComposeError) -> ComposeError
where
    F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
{
    let block = match &err {
        ComposeError::TypeMismatch { block, .. }
        | ComposeError::VariableConflict { block, .. }
        | ComposeError::RequiredTypeMismatch { block, .. }
        | ComposeError::Block { block, .. }
        | ComposeError::Aborted { block, .. } => block.clone(),
    };
    callback(&ComposeDiagnostic {
        block,
        message: err.to_string(),
        fatal: true,
    });
    err
}

fn warning<F>(callback: &mut F, block: &str, message: String) -> ComposeResult<()>
where
    F: FnMut(&ComposeDiagnostic) -> DiagnosticAction,
{
    let diag = ComposeDiagnostic {
        block: block.to_string(),
        message,
        fatal: false,
    };
    match callback(&diag) {
        DiagnosticAction::Continue => Ok(()),
        DiagnosticAction::Abort => Err(ComposeError::Aborted {
            block: diag.block,
            message: diag.message,
        }),
    }
}
