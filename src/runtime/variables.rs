//! Reference-counted named variables
//!
//! A [`Variable`] is a value cell shared by every block that referenced
//! it. Lookup walks the context's chain stack innermost first, then the
//! node's globals, then variables injected by the embedder, and finally
//! creates the variable in the innermost chain. The explicit refcount is
//! independent of the `Rc` count: it tracks block-level references, and
//! the value is destroyed in place when it drops to zero.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::context::Context;
use super::value::Value;

/// Name to variable map used by chains and nodes
pub type VariableMap = HashMap<String, Variable>;

struct VariableCell {
    value: Value,
    refcount: u32,
    ref_counted: bool,
}

/// A shared, reference-counted value cell
#[derive(Clone)]
pub struct Variable(Rc<RefCell<VariableCell>>);

impl Variable {
    /// Create an unreferenced cell
    pub fn new(value: Value) -> Self {
        Self(Rc::new(RefCell::new(VariableCell {
            value,
            refcount: 0,
            ref_counted: false,
        })))
    }

    /// Copy of the current value
    pub fn get(&self) -> Value {
        self.0.borrow().value.clone()
    }

    /// Borrow the current value
    pub fn borrow(&self) -> Ref<'_, Value> {
        Ref::map(self.0.borrow(), |cell| &cell.value)
    }

    /// Borrow the current value mutably
    pub fn borrow_mut(&self) -> RefMut<'_, Value> {
        RefMut::map(self.0.borrow_mut(), |cell| &mut cell.value)
    }

    /// Deep-copy `value` into the cell, reusing its capacity
    pub fn set(&self, value: &Value) {
        self.0.borrow_mut().value.clone_from(value);
    }

    /// Current block-level reference count
    pub fn refcount(&self) -> u32 {
        self.0.borrow().refcount
    }

    /// Whether the cell was ever handed out by a lookup
    pub fn is_ref_counted(&self) -> bool {
        self.0.borrow().ref_counted
    }

    /// Whether both handles refer to the same cell
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn acquire(&self) {
        let mut cell = self.0.borrow_mut();
        cell.refcount += 1;
        cell.ref_counted = true;
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(cell) => f
                .debug_struct("Variable")
                .field("value", &cell.value)
                .field("refcount", &cell.refcount)
                .finish(),
            Err(_) => f.write_str("Variable(<borrowed>)"),
        }
    }
}

/// Resolve `name` through the context's scopes and take a reference to it.
pub fn reference_variable(ctx: &mut Context, name: &str) -> Variable {
    for chain in ctx.chain_stack().iter().rev() {
        if let Some(var) = chain.find_variable(name) {
            var.acquire();
            return var;
        }
    }

    if let Some(node) = ctx.node() {
        let found = node
            .variables
            .borrow()
            .get(name)
            .cloned()
            .or_else(|| node.external.borrow().get(name).cloned());
        if let Some(var) = found {
            var.acquire();
            return var;
        }
    }

    match ctx.chain_stack().last().cloned() {
        Some(chain) => {
            trace!(chain = %chain.name(), variable = name, "creating chain variable");
            let var = Variable::new(Value::None);
            var.acquire();
            chain.insert_variable(name, var.clone());
            var
        }
        None => {
            // no chain to own it, the context keeps it
            let var = ctx
                .orphan_variables_mut()
                .entry(name.to_string())
                .or_insert_with(|| Variable::new(Value::None))
                .clone();
            var.acquire();
            var
        }
    }
}

/// Take a reference to a node-global variable, creating it on the node.
///
/// Without a node this behaves like [`reference_variable`].
pub fn reference_global_variable(ctx: &mut Context, name: &str) -> Variable {
    let Some(node) = ctx.node().cloned() else {
        return reference_variable(ctx, name);
    };
    let var = node
        .variables
        .borrow_mut()
        .entry(name.to_string())
        .or_insert_with(|| Variable::new(Value::None))
        .clone();
    var.acquire();
    var
}

/// Drop one reference; the value is destroyed when the last reference
/// goes. Releasing an unreferenced variable does nothing.
pub fn release_variable(var: &Variable) {
    let mut cell = var.0.borrow_mut();
    if cell.refcount == 0 {
        return;
    }
    cell.refcount -= 1;
    if cell.refcount == 0 {
        cell.value.destroy();
    }
}

/// Names of variables in `map` that are still referenced
pub fn dangling(map: &VariableMap) -> Vec<(String, u32)> {
    let mut out: Vec<(String, u32)> = map
        .iter()
        .filter_map(|(name, var)| {
            let count = var.refcount();
            (count > 0).then(|| (name.clone(), count))
        })
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::chain::ChainRef;

    #[test]
    fn test_release_destroys_only_at_zero() {
        let mut ctx = Context::detached();
        let chain = ChainRef::new("vars");
        ctx.push_chain(chain.clone());

        let a = reference_variable(&mut ctx, "x");
        let b = reference_variable(&mut ctx, "x");
        assert!(a.ptr_eq(&b));
        assert_eq!(a.refcount(), 2);

        a.set(&Value::string("kept"));
        release_variable(&a);
        assert_eq!(b.get(), Value::string("kept"));
        release_variable(&b);
        assert_eq!(b.get(), Value::None);
        assert_eq!(b.refcount(), 0);
    }

    #[test]
    fn test_release_without_reference_keeps_value() {
        let var = Variable::new(Value::Int(5));
        assert_eq!(var.refcount(), 0);
        release_variable(&var);
        assert_eq!(var.get(), Value::Int(5));
        assert_eq!(var.refcount(), 0);

        // a surplus release after the last one is ignored too
        var.acquire();
        release_variable(&var);
        assert_eq!(var.get(), Value::None);
        var.set(&Value::Int(6));
        release_variable(&var);
        assert_eq!(var.get(), Value::Int(6));
    }

    #[test]
    fn test_innermost_chain_wins() {
        let mut ctx = Context::detached();
        let outer = ChainRef::new("outer");
        let inner = ChainRef::new("inner");
        outer.insert_variable("x", Variable::new(Value::Int(1)));
        inner.insert_variable("x", Variable::new(Value::Int(2)));

        ctx.push_chain(outer.clone());
        ctx.push_chain(inner.clone());
        let var = reference_variable(&mut ctx, "x");
        assert_eq!(var.get(), Value::Int(2));
        release_variable(&var);

        ctx.pop_chain();
        let var = reference_variable(&mut ctx, "x");
        assert_eq!(var.get(), Value::Int(1));
    }

    #[test]
    fn test_missing_variable_created_in_innermost_chain() {
        let mut ctx = Context::detached();
        let outer = ChainRef::new("outer");
        let inner = ChainRef::new("inner");
        ctx.push_chain(outer.clone());
        ctx.push_chain(inner.clone());

        let _var = reference_variable(&mut ctx, "fresh");
        assert!(inner.find_variable("fresh").is_some());
        assert!(outer.find_variable("fresh").is_none());
    }

    #[test]
    fn test_chainless_context_shares_by_name() {
        let mut ctx = Context::detached();
        let a = reference_variable(&mut ctx, "x");
        let b = reference_variable(&mut ctx, "x");
        assert!(a.ptr_eq(&b));
        assert_eq!(b.refcount(), 2);
    }

    #[test]
    fn test_dangling_report() {
        let mut map = VariableMap::new();
        let held = Variable::new(Value::Int(1));
        held.acquire();
        map.insert("held".into(), held);
        map.insert("free".into(), Variable::new(Value::Int(2)));
        assert_eq!(dangling(&map), vec![("held".to_string(), 1)]);
    }
}
