//! Program graph: normalized symbols, classes, and per-body CFGs.
//!
//! The graph is built once from the front end's tree and is read-only for the
//! rest of the run. Analyses never see the input tree directly — they walk
//! CFG blocks and resolve members through the hierarchy indexes here.

pub mod ast;
pub mod builder;
pub mod cfg;
pub mod types;

pub use cfg::{Block, BlockId, BlockKind, Cfg, CfgEdge, EdgeKind, Instr, InstrKind};
pub use types::{
    BuildIssue, ClassId, ClassInfo, FieldInfo, FieldKey, Hierarchy, ParamInfo, Pos, ProgramGraph,
    Symbol, SymbolId,
};
