//! Standard blocks
//!
//! A small library of blocks built on the runtime's public block
//! contract: constants and pass-throughs, flow control, variables and
//! the value stack, sequence access, arithmetic and comparisons, and one
//! block that runs on the worker pool.

use crate::runtime::error::ActivationError;
use crate::runtime::registry::{BlockCatalog, BlockRegistry};
use crate::runtime::value::Value;

pub mod core;
pub mod flow;
pub mod math;
pub mod seqs;
pub mod stack;
pub mod variables;
pub mod workers;

/// Register every standard block with `catalog`
pub fn register_core_blocks(catalog: &BlockCatalog) {
    catalog.register_default::<self::core::Const>("Const");
    catalog.register_default::<self::core::Input>("Input");
    catalog.register_default::<self::core::Pass>("Pass");
    catalog.register_default::<self::core::Sleep>("Sleep");
    catalog.register_default::<self::core::Log>("Log");

    catalog.register("And", || Box::new(flow::Logic::new(flow::LogicOp::And)));
    catalog.register("Or", || Box::new(flow::Logic::new(flow::LogicOp::Or)));
    catalog.register_default::<flow::Not>("Not");
    catalog.register("Stop", || Box::new(flow::Exit::new(flow::ExitKind::Stop)));
    catalog.register("Restart", || Box::new(flow::Exit::new(flow::ExitKind::Restart)));
    catalog.register("Return", || Box::new(flow::Exit::new(flow::ExitKind::Return)));
    catalog.register_default::<flow::Fail>("Fail");
    catalog.register_default::<flow::Do>("Do");
    catalog.register_default::<flow::Repeat>("Repeat");

    catalog.register("Set", || Box::new(variables::Set::new(variables::SetMode::Set)));
    catalog.register("Update", || Box::new(variables::Set::new(variables::SetMode::Update)));
    catalog.register("Ref", || Box::new(variables::Set::new(variables::SetMode::Ref)));
    catalog.register_default::<variables::Get>("Get");
    catalog.register_default::<variables::Push>("Push");
    catalog.register("Pop", || Box::new(stack::Pop::new(stack::PopMode::Pop)));
    catalog.register("Drop", || Box::new(stack::Pop::new(stack::PopMode::Drop)));
    catalog.register_default::<stack::Swap>("Swap");

    catalog.register_default::<seqs::Take>("Take");
    catalog.register_default::<seqs::Count>("Count");

    for op in math::MathOp::ALL {
        catalog.register(op.block_name(), move || Box::new(math::Arithmetic::new(op)));
    }
    for op in math::CompareOp::ALL {
        catalog.register(op.block_name(), move || Box::new(math::Compare::new(op)));
    }

    catalog.register_default::<workers::Checksum>("Checksum");
}

/// A registry snapshot holding the standard blocks
pub fn core_registry() -> BlockRegistry {
    let catalog = BlockCatalog::new();
    register_core_blocks(&catalog);
    catalog.snapshot()
}

pub(crate) fn invalid_input(block: &str, expected: &str, found: &Value) -> ActivationError {
    ActivationError::InvalidInput {
        block: block.to_string(),
        detail: format!("expected {}, got {}", expected, found.basic_type()),
    }
}

pub(crate) fn bad_param(block: &str, index: usize, value: &Value) -> anyhow::Error {
    anyhow::anyhow!(
        "{}: parameter {} cannot take a value of type {}",
        block,
        index,
        value.basic_type()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_registry_lists_blocks_in_order() {
        let registry = core_registry();
        let names = registry.list_types();
        assert_eq!(names.first().map(String::as_str), Some("Const"));
        for name in ["Math.Add", "IsLess", "Take", "Do", "Pop", "Swap", "Checksum"] {
            assert!(registry.has_type(name), "{} missing", name);
        }
    }

    #[test]
    fn test_created_block_names_match_registration() {
        let registry = core_registry();
        for name in registry.list_types() {
            let block = registry.create(&name).unwrap();
            assert_eq!(block.name(), name);
        }
    }
}
