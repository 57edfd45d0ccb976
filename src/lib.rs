//! chainrt – an embeddable block/chain scripting runtime
//!
//! Programs are chains: ordered lists of blocks, each transforming the
//! output of the previous one. This crate provides:
//! - A tagged value model with structural hashing and ordering
//! - Static composition that checks block connections and variable scopes
//!   before anything runs
//! - Cooperative execution: every scheduled chain is a coroutine that a
//!   node resumes tick by tick, with a worker pool for blocking work
//! - A block registry, JSON chain descriptors and a fluent chain builder
//! - A small library of standard blocks

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Runtime core: values, types, composition, chains and nodes
pub mod runtime;

/// Standard blocks
pub mod blocks;

// Re-export key types for convenience
pub use blocks::{core_registry, register_core_blocks};
pub use runtime::{Node, NodeConfig};

/// Current version of the runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
