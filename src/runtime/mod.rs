//! Runtime core and public embedding API
//!
//! The core is layered leaves first: values and their type descriptions,
//! the block contract, static composition, variables, chains, and the
//! cooperative execution engine that nodes drive tick by tick.

use serde::{Deserialize, Serialize};

// Submodules
pub mod block;
pub mod chain;
pub mod compose;
pub mod context;
pub mod error;
pub mod hash;
pub mod loader;
pub mod node;
pub mod registry;
pub(crate) mod scheduler;
pub mod serialize;
pub mod types;
pub mod value;
pub mod variables;
pub mod workers;

/// Configuration for a [`Node`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name used in logs (default: "node")
    pub name: String,

    /// Threads in the worker pool; 0 disables the pool
    pub worker_threads: usize,

    /// Treat "required variable not found" warnings as fatal when a chain
    /// is composed at schedule time
    pub strict_variables: bool,

    /// Drop failed chains from the schedule; when false they restart from
    /// their root input on the next tick
    pub unschedule_on_failure: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            worker_threads: 2,
            strict_variables: false,
            unschedule_on_failure: true,
        }
    }
}

impl NodeConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| RuntimeError::Config(err.to_string()))
    }
}

// Re-export commonly used types
pub use block::{Block, BlockRef};
pub use chain::{ChainId, ChainRef, ChainState};
pub use compose::{ComposeDiagnostic, ComposeOutcome, DiagnosticAction, InstanceData};
pub use context::{Context, FlowOutcome, FlowState, activate_blocks, run_blocks};
pub use error::{ActivationError, ActivationResult, ComposeError, Result, RuntimeError};
pub use loader::{ChainBuilder, ChainDescriptor};
pub use node::{Node, NodeId};
pub use registry::{BlockCatalog, BlockRegistry};
pub use types::{ExposedTypeInfo, ParameterInfo, TypeInfo};
pub use value::Value;
pub use variables::Variable;
