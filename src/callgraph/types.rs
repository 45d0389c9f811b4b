//! Call graph and call target types.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::program::SymbolId;

/// Resolved target(s) of one call site.
///
/// Virtual dispatch never models a runtime lookup: an ambiguous receiver
/// resolves to the full override set and the caller joins the outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// Static or direct call with exactly one callee.
    Single(SymbolId),
    /// Virtual call: every override reachable from the receiver's static
    /// type. Always non-empty.
    Virtual(Vec<SymbolId>),
}

impl CallTarget {
    /// All candidate symbols, uniformly.
    pub fn symbols(&self) -> &[SymbolId] {
        match self {
            CallTarget::Single(id) => std::slice::from_ref(id),
            CallTarget::Virtual(ids) => ids,
        }
    }

    /// Normalize a candidate list into a target; `None` when empty.
    pub fn from_candidates(mut ids: Vec<SymbolId>) -> Option<CallTarget> {
        ids.sort_unstable();
        ids.dedup();
        match ids.len() {
            0 => None,
            1 => Some(CallTarget::Single(ids[0])),
            _ => Some(CallTarget::Virtual(ids)),
        }
    }
}

/// Outcome of resolving one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Call binds to these candidates.
    Target(CallTarget),
    /// No concrete callee anywhere in the hierarchy (abstract with no
    /// override, unknown name, unknowable receiver). Non-fatal: the caller
    /// treats the result as `Unknown` carrying the unresolved soundness
    /// label.
    Unresolved,
}

/// Whole-program call graph over symbols with bodies.
///
/// Edges are name-conservative: a method call contributes an edge to every
/// same-named method in the program. That over-approximation is only used to
/// schedule SCCs bottom-up; per-site dispatch during solving is precise.
#[derive(Debug, Default, Clone)]
pub struct CallGraph {
    nodes: Vec<SymbolId>,
    edges: FxHashMap<SymbolId, FxHashSet<SymbolId>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: SymbolId) {
        if !self.nodes.contains(&id) {
            self.nodes.push(id);
        }
    }

    pub fn add_edge(&mut self, caller: SymbolId, callee: SymbolId) {
        self.edges.entry(caller).or_default().insert(callee);
    }

    pub fn nodes(&self) -> &[SymbolId] {
        &self.nodes
    }

    pub fn callees(&self, caller: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.edges.get(&caller).into_iter().flatten().copied()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(FxHashSet::len).sum()
    }
}
