//! Type transfer rules: operators, branch refinement, builtin collection
//! methods, and declared-hint checking.
//!
//! These are the inference-specific pieces the shared solver calls into;
//! the worklist itself lives in [`super::solver`].

use super::state::AnalysisState;
use crate::program::ast::{BinOp, Expr, UnOp};
use crate::program::cfg::EdgeKind;
use crate::ttype::{Prim, Ty};

/// Result type of a binary operator.
pub fn binary_ty(op: BinOp, lhs: &Ty, rhs: &Ty) -> Ty {
    if lhs.is_bottom() || rhs.is_bottom() {
        return Ty::Bottom;
    }
    match op {
        BinOp::Add => match (lhs, rhs) {
            (Ty::Prim(Prim::Int), Ty::Prim(Prim::Int)) => Ty::Prim(Prim::Int),
            (Ty::Prim(Prim::Float), Ty::Prim(Prim::Int | Prim::Float))
            | (Ty::Prim(Prim::Int), Ty::Prim(Prim::Float)) => Ty::Prim(Prim::Float),
            _ => Ty::Unknown,
        },
        BinOp::Concat => Ty::Prim(Prim::Str),
        BinOp::Eq
        | BinOp::Ne
        | BinOp::Lt
        | BinOp::Le
        | BinOp::Gt
        | BinOp::Ge
        | BinOp::And
        | BinOp::Or => Ty::Prim(Prim::Bool),
    }
}

/// Result type of a unary operator.
pub fn unary_ty(op: UnOp, operand: &Ty) -> Ty {
    if operand.is_bottom() {
        return Ty::Bottom;
    }
    match op {
        UnOp::Not => Ty::Prim(Prim::Bool),
        UnOp::Neg => match operand {
            Ty::Prim(Prim::Int) => Ty::Prim(Prim::Int),
            Ty::Prim(Prim::Float) => Ty::Prim(Prim::Float),
            _ => Ty::Unknown,
        },
    }
}

/// A recognizable null test in a branch condition: `(local, expects_non_null
/// on the true edge)`.
fn null_check(cond: &Expr) -> Option<(&str, bool)> {
    match cond {
        Expr::Binary { op, lhs, rhs } => {
            let local = match (&**lhs, &**rhs) {
                (Expr::Local(name), Expr::Literal(Prim::Null))
                | (Expr::Literal(Prim::Null), Expr::Local(name)) => name,
                _ => return None,
            };
            match op {
                BinOp::Ne => Some((local, true)),
                BinOp::Eq => Some((local, false)),
                _ => None,
            }
        }
        Expr::Unary {
            op: UnOp::Not,
            expr,
        } => null_check(expr).map(|(name, non_null)| (name, !non_null)),
        _ => None,
    }
}

/// Refine a predecessor's exit state along a conditional edge.
///
/// Only null tests refine today; every other condition passes the state
/// through unchanged. Refinement is monotone in its input: the infeasible
/// combination (a never-null local on the null edge) refines to `Bottom`.
pub fn refine_on_edge(state: &AnalysisState, cond: Option<&Expr>, edge: EdgeKind) -> AnalysisState {
    let taken = match edge {
        EdgeKind::True => true,
        EdgeKind::False => false,
        _ => return state.clone(),
    };
    let Some((local, non_null_on_true)) = cond.and_then(null_check) else {
        return state.clone();
    };
    let Some(value) = state.local(local) else {
        return state.clone();
    };

    let mut refined = state.clone();
    let mut value = value.clone();
    value.ty = if non_null_on_true == taken {
        // This edge proves the local is non-null.
        value.ty.strip_null()
    } else if value.ty.admits_null() {
        // This edge proves the local is null.
        Ty::Prim(Prim::Null)
    } else {
        // The guard can never take this edge.
        Ty::Bottom
    };
    refined.set(super::state::Place::Local(local.to_string()), value);
    refined
}

/// Builtin operations on the parametric collection type. Only what the
/// analyzed programs exercise is modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionBuiltin {
    /// `isEmpty()` — fresh bool, no taint.
    IsEmpty,
    /// `count()` — fresh int, no taint.
    Count,
    /// `removeFirst()` and friends — yields an element, draining the
    /// collection. The drain itself is invisible to the abstraction; only
    /// the element value flow matters.
    TakeElement,
    /// `add(x)` / `push(x)` — widens the element type and joins taint onto
    /// the collection.
    PushElement,
}

pub fn collection_builtin(name: &str) -> Option<CollectionBuiltin> {
    match name {
        "isEmpty" => Some(CollectionBuiltin::IsEmpty),
        "count" => Some(CollectionBuiltin::Count),
        "removeFirst" | "removeLast" | "first" | "last" | "pop" | "dequeue" => {
            Some(CollectionBuiltin::TakeElement)
        }
        "add" | "push" | "enqueue" => Some(CollectionBuiltin::PushElement),
        _ => None,
    }
}
