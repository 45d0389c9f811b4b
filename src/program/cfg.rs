//! Per-body control-flow graphs.
//!
//! Each function or method body lowers to a graph of basic blocks. Branches
//! carry their condition on the block; edges record which way the condition
//! went, which is what lets the solver refine types on the taken edge. Loops
//! produce a header block with an explicit back edge from the body tail.
//!
//! Suspension points (`await`) deliberately do NOT produce blocks or edges:
//! they are ordinary sequential statements with a single successor. The graph
//! only counts them for reporting.

use once_cell::sync::OnceCell;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::ast::Expr;
use super::types::Pos;
use crate::error::{FlowError, Result};

/// Unique identifier of a basic block within one CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Role of a block in the control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Entry,
    #[default]
    Body,
    /// Ends in a two-way conditional branch.
    Branch,
    /// Loop condition evaluation; target of the back edge.
    LoopHeader,
    Exit,
}

/// A single flattened statement inside a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instr {
    pub kind: InstrKind,
    pub pos: Pos,
}

/// Flattened statement forms; structured control flow became edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InstrKind {
    Assign { local: String, value: Expr },
    FieldSet { obj: Expr, field: String, value: Expr },
    Eval(Expr),
    Return(Option<Expr>),
}

/// A basic block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub instrs: Vec<Instr>,
    /// Condition evaluated at the end of a `Branch`/`LoopHeader` block.
    pub branch: Option<Expr>,
    /// Position of the branch condition, when present.
    pub branch_pos: Option<Pos>,
}

/// Control-flow semantics of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Unconditional fallthrough.
    Seq,
    /// Condition held.
    True,
    /// Condition failed.
    False,
    /// Loop back edge to the header.
    Back,
    /// Return statement to the exit block.
    Return,
}

/// A directed edge between blocks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// Cached adjacency lists, built lazily on first use.
#[derive(Debug)]
struct Adjacency {
    successors: Vec<Vec<(BlockId, EdgeKind)>>,
    predecessors: Vec<Vec<(BlockId, EdgeKind)>>,
}

/// Control-flow graph of one function or method body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Cfg {
    pub blocks: Vec<Block>,
    pub edges: Vec<CfgEdge>,
    pub entry: BlockId,
    pub exit: BlockId,
    /// Whether the body belongs to an async symbol.
    pub is_async: bool,
    /// Number of `await` suspension points in the body.
    pub await_points: usize,
    #[serde(skip)]
    adjacency: OnceCell<Adjacency>,
}

impl Clone for Cfg {
    fn clone(&self) -> Self {
        Self {
            blocks: self.blocks.clone(),
            edges: self.edges.clone(),
            entry: self.entry,
            exit: self.exit,
            is_async: self.is_async,
            await_points: self.await_points,
            // Rebuilt lazily on the clone.
            adjacency: OnceCell::new(),
        }
    }
}

impl Cfg {
    pub fn new(
        blocks: Vec<Block>,
        edges: Vec<CfgEdge>,
        entry: BlockId,
        exit: BlockId,
        is_async: bool,
        await_points: usize,
    ) -> Self {
        Self {
            blocks,
            edges,
            entry,
            exit,
            is_async,
            await_points,
            adjacency: OnceCell::new(),
        }
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.blocks.get(id.0 as usize).ok_or_else(|| {
            FlowError::InvariantViolation(format!("block {:?} not in its cfg", id))
        })
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn adjacency(&self) -> &Adjacency {
        self.adjacency.get_or_init(|| {
            let n = self.blocks.len();
            let mut successors = vec![Vec::new(); n];
            let mut predecessors = vec![Vec::new(); n];
            for edge in &self.edges {
                successors[edge.from.0 as usize].push((edge.to, edge.kind));
                predecessors[edge.to.0 as usize].push((edge.from, edge.kind));
            }
            Adjacency {
                successors,
                predecessors,
            }
        })
    }

    /// Outgoing edges of a block.
    pub fn successors(&self, id: BlockId) -> &[(BlockId, EdgeKind)] {
        &self.adjacency().successors[id.0 as usize]
    }

    /// Incoming edges of a block.
    pub fn predecessors(&self, id: BlockId) -> &[(BlockId, EdgeKind)] {
        &self.adjacency().predecessors[id.0 as usize]
    }

    /// Back edges (loop re-entries), found by DFS from the entry.
    pub fn back_edges(&self) -> FxHashSet<(BlockId, BlockId)> {
        let mut back = FxHashSet::default();
        let mut visited = FxHashSet::default();
        let mut stack = FxHashSet::default();
        self.back_edge_dfs(self.entry, &mut visited, &mut stack, &mut back);
        back
    }

    fn back_edge_dfs(
        &self,
        node: BlockId,
        visited: &mut FxHashSet<BlockId>,
        stack: &mut FxHashSet<BlockId>,
        back: &mut FxHashSet<(BlockId, BlockId)>,
    ) {
        visited.insert(node);
        stack.insert(node);
        for &(succ, _) in self.successors(node) {
            if !visited.contains(&succ) {
                self.back_edge_dfs(succ, visited, stack, back);
            } else if stack.contains(&succ) {
                back.insert((node, succ));
            }
        }
        stack.remove(&node);
    }

    /// Whether the body contains a loop.
    pub fn has_loop(&self) -> bool {
        !self.back_edges().is_empty()
    }

    /// Topological order of blocks ignoring back edges (Kahn's algorithm).
    ///
    /// Used to seed the solver worklist so most blocks see their
    /// predecessors' states before their first visit.
    pub fn topological_order(&self) -> Vec<BlockId> {
        let back = self.back_edges();
        let n = self.blocks.len();
        let mut in_degree = vec![0usize; n];
        for edge in &self.edges {
            if !back.contains(&(edge.from, edge.to)) {
                in_degree[edge.to.0 as usize] += 1;
            }
        }

        let mut queue: VecDeque<BlockId> = VecDeque::new();
        // Entry first, then any other root (unreachable code after returns).
        queue.push_back(self.entry);
        for (i, &deg) in in_degree.iter().enumerate() {
            let id = BlockId(i as u32);
            if deg == 0 && id != self.entry {
                queue.push_back(id);
            }
        }

        let mut order = Vec::with_capacity(n);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &(succ, _) in self.successors(id) {
                if back.contains(&(id, succ)) {
                    continue;
                }
                let deg = &mut in_degree[succ.0 as usize];
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    queue.push_back(succ);
                }
            }
        }
        order
    }

    /// Structural validation: entry/exit and all edge endpoints must exist.
    pub fn validate(&self) -> Result<()> {
        let check = |id: BlockId| -> Result<()> {
            if (id.0 as usize) < self.blocks.len() {
                Ok(())
            } else {
                Err(FlowError::InvariantViolation(format!(
                    "cfg references missing block {:?}",
                    id
                )))
            }
        };
        check(self.entry)?;
        check(self.exit)?;
        for edge in &self.edges {
            check(edge.from)?;
            check(edge.to)?;
        }
        Ok(())
    }
}
