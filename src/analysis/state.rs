//! Abstract state carried through a single body's fixed point.
//!
//! A state maps places (locals and abstract fields) to [`Value`]s: a type, a
//! taint label set, and — while a symbol is being summarized — *symbolic*
//! dependencies on its own parameters and on fields it read before any local
//! write. The symbolic parts are what make a published summary a function of
//! taint-in instead of a baked-in constant.
//!
//! States are exclusively owned by the solve that created them; nothing here
//! is shared or locked.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{FlowError, Result};
use crate::program::FieldKey;
use crate::taint::{TaintSet, TraceStep, MAX_TRACE_LEN};
use crate::ttype::Ty;

/// A storage location the analysis tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Place {
    /// A local variable of the body being solved.
    Local(String),
    /// A field, abstracted over all instances of its declaring class.
    Field(FieldKey),
}

/// Abstract value: inferred type, concrete taint, and symbolic flows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Value {
    pub ty: Ty,
    /// Taint known to be on the value regardless of the caller.
    pub taint: TaintSet,
    /// Parameters of the enclosing symbol whose taint flows into this value.
    pub param_deps: BTreeSet<usize>,
    /// Fields (read before being written here) whose taint flows into this
    /// value.
    pub field_deps: BTreeSet<FieldKey>,
    /// Provenance of the concrete taint, for findings. Not part of the
    /// lattice order: it never drives convergence.
    pub trace: Vec<TraceStep>,
}

impl Value {
    /// The unreachable value.
    pub fn bottom() -> Self {
        Self {
            ty: Ty::Bottom,
            ..Self::default()
        }
    }

    /// `Unknown` type, no taint.
    pub fn unknown() -> Self {
        Self {
            ty: Ty::Unknown,
            ..Self::default()
        }
    }

    pub fn of_ty(ty: Ty) -> Self {
        Self {
            ty,
            ..Self::default()
        }
    }

    pub fn with_taint(mut self, taint: TaintSet) -> Self {
        self.taint = taint;
        self
    }

    pub fn with_trace(mut self, trace: Vec<TraceStep>) -> Self {
        self.trace = trace;
        self
    }

    /// Whether the value carries anything the taint engine cares about.
    pub fn carries_taint(&self) -> bool {
        !self.taint.is_empty() || !self.param_deps.is_empty() || !self.field_deps.is_empty()
    }

    /// Full lattice join (type and taint); returns true when `self` grew.
    pub fn join(&mut self, other: &Value) -> bool {
        let joined_ty = self.ty.join(&other.ty);
        let ty_changed = joined_ty != self.ty;
        self.ty = joined_ty;
        let taint_changed = self.join_flows(other);
        ty_changed || taint_changed
    }

    /// Join only the taint-relevant parts (labels, deps, trace), leaving the
    /// type alone. Used when composing a callee summary: the summary's return
    /// type is already final, only taint is a function of the arguments.
    pub fn join_flows(&mut self, other: &Value) -> bool {
        let mut changed = self.taint.join(&other.taint);
        let before_params = self.param_deps.len();
        self.param_deps.extend(other.param_deps.iter().copied());
        changed |= self.param_deps.len() != before_params;
        let before_fields = self.field_deps.len();
        self.field_deps
            .extend(other.field_deps.iter().cloned());
        changed |= self.field_deps.len() != before_fields;
        if changed {
            merge_traces(&mut self.trace, &other.trace);
        }
        changed
    }

    /// Equality on the lattice-ordered parts only (traces excluded).
    pub fn lattice_eq(&self, other: &Value) -> bool {
        self.ty == other.ty
            && self.taint == other.taint
            && self.param_deps == other.param_deps
            && self.field_deps == other.field_deps
    }

    /// Whether `self` is lattice-wise at or above `other`.
    pub fn is_at_least(&self, other: &Value) -> bool {
        self.ty.join(&other.ty) == self.ty
            && self.taint.is_superset(&other.taint)
            && self.param_deps.is_superset(&other.param_deps)
            && self.field_deps.is_superset(&other.field_deps)
    }
}

/// Append `extra` onto `trace`, deduplicating and respecting the cap.
pub fn merge_traces(trace: &mut Vec<TraceStep>, extra: &[TraceStep]) {
    for step in extra {
        if trace.len() >= MAX_TRACE_LEN {
            return;
        }
        if !trace.contains(step) {
            trace.push(step.clone());
        }
    }
}

/// Abstract state at one program point.
#[derive(Debug, Clone, Default)]
pub struct AnalysisState {
    values: rustc_hash::FxHashMap<Place, Value>,
    /// Fields written on some path through this state.
    dirty_fields: FxHashSet<FieldKey>,
    /// Whether any path from the entry reaches this point. Unreachable
    /// states swallow all effects — that is the `Bottom` marker at work.
    pub reachable: bool,
}

impl AnalysisState {
    /// The state at a body's entry.
    pub fn entry() -> Self {
        Self {
            reachable: true,
            ..Self::default()
        }
    }

    /// The state of a block no path reaches.
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn get(&self, place: &Place) -> Option<&Value> {
        self.values.get(place)
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.values.get(&Place::Local(name.to_string()))
    }

    /// Strong update: prior contents of the place are gone.
    pub fn set(&mut self, place: Place, value: Value) {
        if let Place::Field(key) = &place {
            self.dirty_fields.insert(key.clone());
        }
        self.values.insert(place, value);
    }

    /// Weak update: join `value` into whatever the place already holds.
    pub fn join_place(&mut self, place: Place, value: &Value) {
        if let Place::Field(key) = &place {
            self.dirty_fields.insert(key.clone());
        }
        match self.values.get_mut(&place) {
            Some(existing) => {
                existing.join(value);
            }
            None => {
                self.values.insert(place, value.clone());
            }
        }
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = &FieldKey> {
        self.dirty_fields.iter()
    }

    pub fn places(&self) -> impl Iterator<Item = (&Place, &Value)> {
        self.values.iter()
    }

    /// Join `other` into `self` (control-flow merge); returns true when
    /// `self` grew. A place present on only one incoming path keeps its
    /// value — a value tainted on one branch stays tainted after the merge.
    pub fn join_with(&mut self, other: &AnalysisState) -> bool {
        if !other.reachable {
            return false;
        }
        let mut changed = false;
        if !self.reachable {
            self.reachable = true;
            changed = true;
        }
        for (place, value) in &other.values {
            match self.values.get_mut(place) {
                Some(existing) => changed |= existing.join(value),
                None => {
                    self.values.insert(place.clone(), value.clone());
                    changed = true;
                }
            }
        }
        let before = self.dirty_fields.len();
        self.dirty_fields
            .extend(other.dirty_fields.iter().cloned());
        changed |= self.dirty_fields.len() != before;
        changed
    }

    /// Widen every tracked type to `Unknown`, keeping taint. Applied when the
    /// iteration cap trips.
    pub fn widen(&mut self) {
        for value in self.values.values_mut() {
            value.ty = Ty::Unknown;
        }
    }

    /// Verify the no-regression contract against a previous iteration of the
    /// same pass. A violation is a bug in the engine, not a finding.
    pub fn assert_monotone_over(&self, old: &AnalysisState, context: &str) -> Result<()> {
        if old.reachable && !self.reachable {
            return Err(FlowError::InvariantViolation(format!(
                "{context}: state regressed from reachable to unreachable"
            )));
        }
        for (place, old_value) in &old.values {
            match self.values.get(place) {
                Some(new_value) if new_value.is_at_least(old_value) => {}
                _ => {
                    return Err(FlowError::InvariantViolation(format!(
                        "{context}: lattice value regressed at {place:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Lattice equality against another state (traces excluded).
    pub fn lattice_eq(&self, other: &AnalysisState) -> bool {
        self.reachable == other.reachable
            && self.dirty_fields == other.dirty_fields
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .all(|(place, value)| other.values.get(place).is_some_and(|v| v.lattice_eq(value)))
    }
}
