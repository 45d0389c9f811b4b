//! Call resolution, the call graph, and its SCC condensation.
//!
//! - [`resolver`] — conservative scheduling edges plus precise per-site
//!   dispatch against inferred receiver types
//! - [`scc`] — Tarjan condensation into a bottom-up, levelled plan
//! - [`types`] — [`CallGraph`], [`CallTarget`], [`Dispatch`]

pub mod resolver;
pub mod scc;
pub mod types;

pub use resolver::{build_call_graph, resolve_constructor, resolve_method};
pub use scc::{plan, Scc, SccPlan};
pub use types::{CallGraph, CallTarget, Dispatch};
