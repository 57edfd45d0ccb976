//! Nodes: owners and cooperative drivers of top-level chains
//!
//! A [`Node`] is single-threaded. It owns the node-global variables, the
//! externally injected variables, an optional worker pool, and one task
//! per scheduled chain. [`Node::tick`] resumes each ready task once.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::NodeConfig;
use super::chain::{ChainRef, ChainState};
use super::compose::{ComposeDiagnostic, DiagnosticAction, log_diagnostics};
use super::context::{Context, TaskShared, drive_chain};
use super::error::{ActivationError, ChainError, Result, RuntimeError};
use super::scheduler::{ScheduledChain, Scheduler};
use super::types::{ExposedTypeInfo, derive_type_info};
use super::variables::{Variable, VariableMap};
use super::workers::WorkerPool;

/// Node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State every task on a node can reach through its context
pub(crate) struct NodeShared {
    pub(crate) id: NodeId,
    pub(crate) variables: RefCell<VariableMap>,
    pub(crate) external: RefCell<VariableMap>,
    pub(crate) workers: Option<WorkerPool>,
    pub(crate) config: NodeConfig,
}

/// Owner and scheduler of top-level chains
pub struct Node {
    shared: Rc<NodeShared>,
    scheduler: Scheduler,
}

impl Node {
    /// Create a node with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(NodeConfig::default())
    }

    /// Create a node with the given configuration
    pub fn with_config(config: NodeConfig) -> Result<Self> {
        let workers = match config.worker_threads {
            0 => None,
            threads => Some(
                WorkerPool::new(threads)
                    .map_err(|err| RuntimeError::Config(format!("worker pool: {}", err)))?,
            ),
        };
        let id = NodeId::new();
        info!(node = %config.name, id = %id, "node created");
        Ok(Self {
            shared: Rc::new(NodeShared {
                id,
                variables: RefCell::new(VariableMap::new()),
                external: RefCell::new(VariableMap::new()),
                workers,
                config,
            }),
            scheduler: Scheduler::new(),
        })
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    /// Active configuration
    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    /// Variables visible to chains composed on this node
    pub fn shared_types(&self) -> Vec<ExposedTypeInfo> {
        let describe = |map: &VariableMap, out: &mut Vec<ExposedTypeInfo>| {
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                if let Some(var) = map.get(name) {
                    let ty = derive_type_info(&var.borrow());
                    out.push(ExposedTypeInfo::new(name.clone(), ty).global(true).mutable(true));
                }
            }
        };
        let mut out = Vec::new();
        describe(&self.shared.variables.borrow(), &mut out);
        describe(&self.shared.external.borrow(), &mut out);
        out
    }

    /// Schedule a chain. It is composed first if needed, then warmed up;
    /// its first iteration runs on the next tick.
    pub fn schedule(&mut self, chain: &ChainRef) -> Result<()> {
        if chain.node().is_some() || self.scheduler.contains(chain) {
            return Err(ChainError::AlreadyScheduled(chain.name()).into());
        }

        if !chain.is_composed() {
            let inherited = self.shared_types();
            let strict = self.shared.config.strict_variables;
            chain.compose(
                |diag: &ComposeDiagnostic| {
                    if strict && !diag.fatal {
                        DiagnosticAction::Abort
                    } else {
                        log_diagnostics(diag)
                    }
                },
                &inherited,
            )?;
        }

        chain.set_node(Some(self.shared.id));
        let mut task = self.spawn_task(chain);
        if task.resume() {
            // the task finished during warmup
            chain.set_node(None);
            let message = chain
                .finished_error()
                .unwrap_or_else(|| "chain ended during warmup".to_string());
            return Err(ActivationError::Failed(message).into());
        }
        self.scheduler.push(task);
        debug!(chain = %chain.name(), node = %self.shared.config.name, "scheduled");
        Ok(())
    }

    fn spawn_task(&self, chain: &ChainRef) -> ScheduledChain {
        let shared = Rc::new(TaskShared::default());
        let ctx = Context::for_task(self.shared.clone(), shared.clone());
        let future = drive_chain(chain.clone(), ctx).boxed_local();
        ScheduledChain::new(chain.clone(), future, shared)
    }

    /// Stop a scheduled chain, running its cleanup before returning
    pub fn unschedule(&mut self, chain: &ChainRef) -> Result<()> {
        let mut task = self
            .scheduler
            .remove(chain)
            .ok_or_else(|| ChainError::NotScheduled(chain.name()))?;
        task.stop();
        chain.set_node(None);
        debug!(chain = %chain.name(), "unscheduled");
        Ok(())
    }

    /// Resume every ready chain once. Returns whether any chain is still
    /// scheduled.
    pub fn tick(&mut self) -> bool {
        let finished = self.scheduler.tick(Instant::now());
        for task in finished {
            let chain = task.chain;
            chain.set_node(None);
            if chain.state() == ChainState::Failed && !self.shared.config.unschedule_on_failure {
                warn!(chain = %chain.name(), "restarting failed chain");
                chain.set_node(Some(self.shared.id));
                let restarted = self.spawn_task(&chain);
                self.scheduler.push(restarted);
            }
        }
        !self.scheduler.is_empty()
    }

    /// Tick until no chain is scheduled or `max_ticks` is reached.
    /// Returns the number of ticks performed.
    pub fn run(&mut self, max_ticks: Option<u64>) -> u64 {
        let mut ticks = 0;
        while !self.scheduler.is_empty() {
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            self.tick();
            ticks += 1;
        }
        ticks
    }

    /// Whether no chain is scheduled
    pub fn is_empty(&self) -> bool {
        self.scheduler.is_empty()
    }

    /// Number of scheduled chains
    pub fn scheduled_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Scheduled chains in scheduling order
    pub fn scheduled_chains(&self) -> Vec<ChainRef> {
        self.scheduler.chains()
    }

    /// Whether the chain is scheduled on this node
    pub fn is_scheduled(&self, chain: &ChainRef) -> bool {
        self.scheduler.contains(chain)
    }

    /// Inject a variable owned outside the node
    pub fn set_external_variable(&self, name: impl Into<String>, var: Variable) {
        self.shared.external.borrow_mut().insert(name.into(), var);
    }

    /// Remove an injected variable
    pub fn remove_external_variable(&self, name: &str) -> Option<Variable> {
        self.shared.external.borrow_mut().remove(name)
    }

    /// Look up a node-global variable without referencing it
    pub fn global_variable(&self, name: &str) -> Option<Variable> {
        self.shared.variables.borrow().get(name).cloned()
    }

    /// A context bound to this node, without a coroutine
    pub fn detached_context(&self) -> Context {
        Context::with_node(self.shared.clone())
    }

    /// Stop every scheduled chain
    pub fn stop_all(&mut self) {
        for mut task in self.scheduler.drain() {
            task.stop();
            task.chain.set_node(None);
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop_all();
        debug!(node = %self.shared.config.name, "node dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Value;

    #[test]
    fn test_empty_node_tick() {
        let mut node = Node::new().unwrap();
        assert!(!node.tick());
        assert!(node.is_empty());
    }

    #[test]
    fn test_unschedule_unknown_chain() {
        let mut node = Node::with_config(NodeConfig {
            worker_threads: 0,
            ..NodeConfig::default()
        })
        .unwrap();
        let chain = ChainRef::new("ghost");
        let err = node.unschedule(&chain).unwrap_err();
        assert!(matches!(err, RuntimeError::Chain(ChainError::NotScheduled(_))));
    }

    #[test]
    fn test_shared_types_include_externals() {
        let node = Node::with_config(NodeConfig {
            worker_threads: 0,
            ..NodeConfig::default()
        })
        .unwrap();
        node.set_external_variable("speed", Variable::new(Value::Float(1.5)));
        let types = node.shared_types();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name, "speed");
        assert!(types[0].global);
    }
}
