//! Error types for the chain runtime
//!
//! Domain errors use thiserror, one enum per subsystem, with conversions
//! into the top-level [`RuntimeError`] at the embedding boundary.

use std::io;
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Composition (static validation) errors
    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    /// Block activation errors
    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),

    /// Chain ownership/lifecycle errors
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Block registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Value serialization errors
    #[error("Serialization error: {0}")]
    Serialize(#[from] SerializeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised by value comparison operators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// Ordering between values of different tags
    #[error("Comparison between two different value types: {left} and {right}")]
    ComparisonTypeMismatch {
        /// Tag of the left operand
        left: String,
        /// Tag of the right operand
        right: String,
    },

    /// Ordering requested for a tag that has none
    #[error("Comparison operator not supported for the given type: {0}")]
    UnsupportedComparison(String),

    /// Ordering between enums of different vendor/type
    #[error("Comparison between two different kind of enums (vendor/type)")]
    EnumKindMismatch,
}

/// Convenience result alias for value operations
pub type ValueResult<T> = std::result::Result<T, ValueError>;

/// Static composition errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// No declared input type accepts the running output type
    #[error("Could not find a matching input type, block: {block}, expected: {expected}, found: {found}")]
    TypeMismatch {
        /// Offending block
        block: String,
        /// Declared input types
        expected: String,
        /// Type produced upstream
        found: String,
    },

    /// Set/Ref/Update/Push ownership conflict on a variable
    #[error("{block}: {detail}, name: {name}")]
    VariableConflict {
        /// Offending block
        block: String,
        /// Variable name
        name: String,
        /// Description of the conflict
        detail: String,
    },

    /// A required variable exists but with an incompatible type
    #[error("Required types do not match currently exposed ones, block: {block}, variable: {name}")]
    RequiredTypeMismatch {
        /// Offending block
        block: String,
        /// Variable name
        name: String,
    },

    /// Fatal error reported by a block's compose hook
    #[error("{block}: {message}")]
    Block {
        /// Offending block
        block: String,
        /// Error message
        message: String,
    },

    /// The embedder callback escalated a warning
    #[error("Composition aborted at block {block}: {message}")]
    Aborted {
        /// Block being composed when aborted
        block: String,
        /// The escalated warning
        message: String,
    },
}

/// Convenience result alias for compose operations
pub type ComposeResult<T> = std::result::Result<T, ComposeError>;

/// Errors raised while activating blocks
///
/// `StopChain` and `RestartChain` are engine control signals, not failures:
/// the engine converts them into flow states and never marks the context
/// failed because of them.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// Stop the current chain cleanly
    #[error("chain stop requested")]
    StopChain,

    /// Restart the current chain from its root input
    #[error("chain restart requested")]
    RestartChain,

    /// Generic failure with a message
    #[error("{0}")]
    Failed(String),

    /// The input value had an unexpected shape
    #[error("Invalid input for block {block}: {detail}")]
    InvalidInput {
        /// Block receiving the input
        block: String,
        /// What was wrong
        detail: String,
    },

    /// Variable lookup or lifetime problem
    #[error("Variable error: {0}")]
    Variable(String),

    /// Value stack underflow
    #[error("Stack error: {0}")]
    Stack(String),

    /// Comparison failure inside a block
    #[error(transparent)]
    Value(#[from] ValueError),

    /// A block or chain was activated while already active
    #[error("{0} is already active (re-entrant activation)")]
    Reentrant(String),

    /// Suspension requested where no coroutine exists
    #[error("Cannot suspend: {0}")]
    Suspend(String),

    /// The worker pool dropped or failed a task
    #[error("Worker task failed: {0}")]
    Worker(String),

    /// Anything raised by block code through anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActivationError {
    /// True for the engine-internal Stop/Restart signals
    pub fn is_control(&self) -> bool {
        matches!(self, ActivationError::StopChain | ActivationError::RestartChain)
    }
}

/// Convenience result alias for activation
pub type ActivationResult<T> = std::result::Result<T, ActivationError>;

/// Chain ownership and lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Block already belongs to another chain slot
    #[error("Block {0} is already owned by a chain")]
    BlockAlreadyOwned(String),

    /// Block index out of range
    #[error("Block index {index} out of range (chain has {len} blocks)")]
    BlockIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Chain length
        len: usize,
    },

    /// Chain is scheduled on a node already
    #[error("Chain '{0}' is already scheduled")]
    AlreadyScheduled(String),

    /// Chain is not scheduled on this node
    #[error("Chain '{0}' is not scheduled on this node")]
    NotScheduled(String),

    /// Chain is currently running and cannot be mutated
    #[error("Chain '{0}' is running")]
    Running(String),
}

/// Convenience result alias for chain operations
pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Block registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No factory registered under this name
    #[error("Unknown block type: {0}")]
    UnknownBlock(String),

    /// Parameter rejected during construction
    #[error("Invalid parameter {index} for block {block}: {detail}")]
    InvalidParameter {
        /// Block name
        block: String,
        /// Parameter index
        index: usize,
        /// Why it was rejected
        detail: String,
    },
}

/// Convenience result alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Value serialization errors
#[derive(Debug, Error)]
pub enum SerializeError {
    /// The value kind has no wire representation
    #[error("Value of type {0} cannot be serialized")]
    Unsupported(String),

    /// Malformed wire data
    #[error("Invalid wire data: {0}")]
    Invalid(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience result alias for serialization
pub type SerializeResult<T> = std::result::Result<T, SerializeError>;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
