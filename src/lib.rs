//! flowcheck — whole-program type inference and taint-flow analysis.
//!
//! The engine analyzes an object-oriented, asynchronous scripting language
//! with parametric collections. An external front end parses source and
//! hands over a [`program::ast::Program`]; this crate normalizes it into a
//! [`program::ProgramGraph`] (symbols, class hierarchy, per-body CFGs) and
//! runs two intertwined analyses over it:
//!
//! - flow-sensitive **type inference** per function and method, to a fixed
//!   point over each body's CFG, scheduled bottom-up over call-graph SCCs;
//! - interprocedural **taint propagation** on the same machinery, tracking
//!   values from untrusted sources through assignments, fields, calls,
//!   inheritance (constructor forwarding included), and control-flow joins
//!   down to configured sinks.
//!
//! Output is an ordered stream of [`report::Finding`]s plus a read-only map
//! of per-symbol [`analysis::Summary`]s for downstream tooling.
//!
//! # Example
//!
//! ```
//! use flowcheck::analysis::Analyzer;
//! use flowcheck::program::ast::{Expr, FunctionDecl, Program, Stmt};
//! use flowcheck::program::ProgramGraph;
//! use flowcheck::report::FindingKind;
//! use flowcheck::taint::RoleTable;
//!
//! let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
//!     Stmt::assign(1, "data", Expr::Superglobal("_REQUEST".into())),
//!     Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("data")])),
//! ]));
//!
//! let graph = ProgramGraph::build(&program).unwrap();
//! let roles = RoleTable::new().with_sink("emit_output");
//! let result = Analyzer::new(&graph, &roles).run().unwrap();
//!
//! assert_eq!(result.findings_of_kind(FindingKind::TaintedSink).len(), 1);
//! ```

pub mod analysis;
pub mod callgraph;
pub mod error;
pub mod program;
pub mod report;
pub mod taint;
pub mod ttype;

pub use analysis::{AnalysisResult, Analyzer, AnalyzerConfig, CancelToken};
pub use error::{FlowError, Result};
pub use program::ProgramGraph;
pub use report::{Finding, FindingKind, Severity};
pub use taint::{RoleTable, TaintKind, TaintSet};
pub use ttype::{Prim, Ty};
