//! SCC condensation and bottom-up scheduling of the call graph.
//!
//! Mutually recursive symbols are condensed into one strongly-connected
//! component and solved together. The condensation is layered into levels:
//! a component's level is one past the deepest component it calls into, so
//! components sharing a level have no dependency path between them and may be
//! evaluated in parallel.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::algo::tarjan_scc;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::types::CallGraph;
use crate::program::SymbolId;

/// One strongly-connected component of the call graph.
#[derive(Debug, Clone)]
pub struct Scc {
    /// Members in deterministic order.
    pub members: Vec<SymbolId>,
}

impl Scc {
    /// Whether the component must be iterated (mutual or self recursion).
    pub fn is_cyclic(&self, graph: &CallGraph) -> bool {
        self.members.len() > 1
            || self
                .members
                .first()
                .map(|&m| graph.callees(m).any(|c| c == m))
                .unwrap_or(false)
    }
}

/// Bottom-up evaluation plan: `levels[0]` holds the leaf components.
#[derive(Debug, Default)]
pub struct SccPlan {
    pub levels: Vec<Vec<Scc>>,
}

impl SccPlan {
    pub fn component_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// Condense `graph` into SCCs and lay them out in dependency levels.
pub fn plan(graph: &CallGraph) -> SccPlan {
    let mut pg: DiGraph<SymbolId, ()> = DiGraph::new();
    let mut index_of: FxHashMap<SymbolId, NodeIndex> = FxHashMap::default();
    for &id in graph.nodes() {
        index_of.insert(id, pg.add_node(id));
    }
    for &caller in graph.nodes() {
        for callee in graph.callees(caller) {
            if let (Some(&a), Some(&b)) = (index_of.get(&caller), index_of.get(&callee)) {
                if a != b {
                    pg.add_edge(a, b, ());
                }
            }
        }
    }

    // Tarjan emits components in reverse topological order: callees first,
    // which is exactly the bottom-up direction.
    let components = tarjan_scc(&pg);

    let mut scc_of: FxHashMap<NodeIndex, usize> = FxHashMap::default();
    for (i, component) in components.iter().enumerate() {
        for &node in component {
            scc_of.insert(node, i);
        }
    }

    // level(scc) = 1 + max(level of called sccs); callees are already
    // levelled when their caller is visited.
    let mut level_of = vec![0usize; components.len()];
    for (i, component) in components.iter().enumerate() {
        let mut level = 0;
        for &node in component {
            for neighbor in pg.neighbors(node) {
                let dep = scc_of[&neighbor];
                if dep != i {
                    level = level.max(level_of[dep] + 1);
                }
            }
        }
        level_of[i] = level;
    }

    let depth = level_of.iter().copied().max().map_or(0, |d| d + 1);
    let mut levels: Vec<Vec<Scc>> = (0..depth).map(|_| Vec::new()).collect();
    for (i, component) in components.into_iter().enumerate() {
        let mut members: Vec<SymbolId> = component.into_iter().map(|n| pg[n]).collect();
        members.sort_unstable();
        levels[level_of[i]].push(Scc { members });
    }
    for level in &mut levels {
        level.sort_by_key(|scc| scc.members.first().copied());
    }

    debug!(
        components = level_of.len(),
        levels = levels.len(),
        "call graph condensed"
    );
    SccPlan { levels }
}
