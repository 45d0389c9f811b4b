//! Call resolution: conservative graph construction and precise dispatch.
//!
//! Two layers with different precision/availability trade-offs:
//!
//! 1. [`build_call_graph`] runs before any inference and therefore cannot see
//!    receiver types. It records a name-conservative edge set, good enough to
//!    condense the program into SCCs and schedule them bottom-up.
//! 2. [`resolve_method`] runs inside the solver with the receiver's inferred
//!    type in hand and returns the exact override set the caller must join
//!    over.

use tracing::trace;

use super::types::{CallGraph, CallTarget, Dispatch};
use crate::program::ast::{Callee, Expr};
use crate::program::{Cfg, ClassId, InstrKind, ProgramGraph, SymbolId};
use crate::ttype::Ty;

/// Build the scheduling call graph over all symbols with bodies.
pub fn build_call_graph(program: &ProgramGraph) -> CallGraph {
    let mut graph = CallGraph::new();
    for symbol in program.symbols() {
        let Some(cfg) = program.cfg_of(symbol.id) else {
            continue;
        };
        graph.add_node(symbol.id);
        collect_edges(program, symbol.id, cfg, &mut graph);
    }
    trace!(
        nodes = graph.nodes().len(),
        edges = graph.edge_count(),
        "call graph built"
    );
    graph
}

fn collect_edges(program: &ProgramGraph, caller: SymbolId, cfg: &Cfg, graph: &mut CallGraph) {
    let mut visit = |expr: &Expr| visit_expr(program, caller, expr, graph);
    for block in &cfg.blocks {
        for instr in &block.instrs {
            match &instr.kind {
                InstrKind::Assign { value, .. } => visit(value),
                InstrKind::FieldSet { obj, value, .. } => {
                    visit(obj);
                    visit(value);
                }
                InstrKind::Eval(expr) => visit(expr),
                InstrKind::Return(value) => {
                    if let Some(v) = value {
                        visit(v);
                    }
                }
            }
        }
        if let Some(cond) = &block.branch {
            visit(cond);
        }
    }
}

fn add_edge_if_has_cfg(program: &ProgramGraph, graph: &mut CallGraph, caller: SymbolId, callee: SymbolId) {
    if program.cfg_of(callee).is_some() {
        graph.add_edge(caller, callee);
    }
}

fn visit_expr(program: &ProgramGraph, caller: SymbolId, expr: &Expr, graph: &mut CallGraph) {
    match expr {
        Expr::Call { callee, args } => {
            match callee {
                Callee::Function(name) => {
                    if let Some(id) = program.function(name) {
                        add_edge_if_has_cfg(program, graph, caller, id);
                    }
                }
                Callee::Method { recv, name } => {
                    visit_expr(program, caller, recv, graph);
                    // Receiver types are not known yet: connect to every
                    // same-named method so scheduling over-approximates.
                    for class in program.classes() {
                        if let Some(&id) = class.methods.get(name) {
                            add_edge_if_has_cfg(program, graph, caller, id);
                        }
                    }
                }
                Callee::Static { class, name } => {
                    if let Some(cid) = program.class_by_name(class) {
                        if let Some(id) = program.lookup_method(cid, name) {
                            add_edge_if_has_cfg(program, graph, caller, id);
                        }
                    }
                }
                Callee::ParentConstructor => {
                    if let Ok(symbol) = program.symbol(caller) {
                        if let Some(parent) = symbol.class.and_then(|c| program.class(c).parent) {
                            if let Some(id) = program.lookup_constructor(parent) {
                                add_edge_if_has_cfg(program, graph, caller, id);
                            }
                        }
                    }
                }
            }
            for arg in args {
                visit_expr(program, caller, arg, graph);
            }
        }
        Expr::New { class, args } => {
            if let Some(cid) = program.class_by_name(class) {
                if let Some(id) = program.lookup_constructor(cid) {
                    add_edge_if_has_cfg(program, graph, caller, id);
                }
            }
            for arg in args {
                visit_expr(program, caller, arg, graph);
            }
        }
        Expr::CollectionMap { recv, callback } => {
            visit_expr(program, caller, recv, graph);
            if let Some(id) = program.function(callback) {
                add_edge_if_has_cfg(program, graph, caller, id);
            }
        }
        Expr::FieldGet { obj, .. } => visit_expr(program, caller, obj, graph),
        Expr::Await(inner) => visit_expr(program, caller, inner, graph),
        Expr::CollectionLit(elems) => {
            for elem in elems {
                visit_expr(program, caller, elem, graph);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            visit_expr(program, caller, lhs, graph);
            visit_expr(program, caller, rhs, graph);
        }
        Expr::Unary { expr, .. } => visit_expr(program, caller, expr, graph),
        Expr::This | Expr::Local(_) | Expr::Literal(_) | Expr::Superglobal(_) => {}
    }
}

// =============================================================================
// Precise dispatch
// =============================================================================

/// Resolve a method call against the receiver's inferred type.
///
/// For an `Instance(C)` receiver the candidates are the nearest declaration
/// of `name` walking up from `C`, plus every override declared in a subclass
/// of `C`. Abstract declarations are dropped from the candidate list; if
/// nothing concrete remains anywhere in the hierarchy the call is
/// [`Dispatch::Unresolved`].
pub fn resolve_method(program: &ProgramGraph, recv_ty: &Ty, name: &str) -> Dispatch {
    let mut candidates = Vec::new();
    if !collect_method_candidates(program, recv_ty, name, &mut candidates) {
        return Dispatch::Unresolved;
    }
    match CallTarget::from_candidates(candidates) {
        Some(target) => Dispatch::Target(target),
        None => Dispatch::Unresolved,
    }
}

/// Returns false when the receiver type cannot be dispatched on at all.
fn collect_method_candidates(
    program: &ProgramGraph,
    recv_ty: &Ty,
    name: &str,
    out: &mut Vec<SymbolId>,
) -> bool {
    match recv_ty {
        Ty::Instance(cid) => {
            collect_class_candidates(program, *cid, name, out);
            true
        }
        Ty::Nullable(inner) => collect_method_candidates(program, inner, name, out),
        Ty::Union(members) => {
            let mut any = false;
            for member in members {
                any |= collect_method_candidates(program, member, name, out);
            }
            any
        }
        // Bottom receivers come from unreachable code; nothing to dispatch.
        _ => false,
    }
}

fn collect_class_candidates(
    program: &ProgramGraph,
    class: ClassId,
    name: &str,
    out: &mut Vec<SymbolId>,
) {
    let concrete = |id: SymbolId| -> Option<SymbolId> {
        program.cfg_of(id).is_some().then_some(id)
    };
    // Nearest declaration visible from the static receiver type.
    if let Some(id) = program.lookup_method(class, name) {
        out.extend(concrete(id));
    }
    // Every override below the static receiver type.
    for sub in program.descendants(class) {
        if sub == class {
            continue;
        }
        if let Some(id) = program.method_in_class(sub, name) {
            out.extend(concrete(id));
        }
    }
}

/// Resolve the constructor that runs for `new class(..)`.
pub fn resolve_constructor(program: &ProgramGraph, class: ClassId) -> Dispatch {
    match program.lookup_constructor(class).and_then(|id| {
        program.cfg_of(id).is_some().then_some(id)
    }) {
        Some(id) => Dispatch::Target(CallTarget::Single(id)),
        None => Dispatch::Unresolved,
    }
}
