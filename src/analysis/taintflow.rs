//! Taint transfer rules: sources, sinks, sanitizers, and the global field
//! store.
//!
//! Everything here operates on the same [`Value`]s the type rules do; the
//! shared solver calls both sides per statement. Sink checking is
//! deliberately split: a *concrete* tainted argument becomes a finding on
//! the spot, while a *symbolic* one (parameter- or field-dependent) is
//! recorded on the summary so the flow is judged where it becomes concrete.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::state::{merge_traces, Value};
use super::summary::{SinkRecord, Summary};
use crate::program::{FieldKey, Pos};
use crate::report::Reporter;
use crate::taint::{push_trace, TaintKind, TaintSet, TraceStep};
use crate::ttype::Ty;

/// Value produced by reading an external-input superglobal.
pub fn superglobal_value(name: &str, symbol: &str, pos: Pos) -> Value {
    let mut value = Value::unknown().with_taint(TaintSet::singleton(TaintKind::ExternalInput));
    push_trace(
        &mut value.trace,
        TraceStep::new(symbol, pos, format!("superglobal `{name}` read")),
    );
    value
}

/// Value produced by a call to a role-table source.
pub fn source_value(kinds: &[TaintKind], ty: Ty, name: &str, symbol: &str, pos: Pos) -> Value {
    let mut value = Value::of_ty(ty).with_taint(kinds.iter().cloned().collect());
    push_trace(
        &mut value.trace,
        TraceStep::new(symbol, pos, format!("tainted by source `{name}`")),
    );
    value
}

/// Value produced by a call that resolved to nothing concrete. `Unknown`
/// type for soundness; the taint marker is excluded from sink checks so the
/// reference alone never manufactures a violation.
pub fn unresolved_value() -> Value {
    Value::unknown().with_taint(TaintSet::singleton(TaintKind::Unresolved))
}

/// Judge one argument arriving at a sink.
///
/// Concrete taint is reported immediately; symbolic flows are recorded on
/// `summary` for the caller (parameters) or the end-of-run field check
/// (fields).
#[allow(clippy::too_many_arguments)]
pub fn record_sink_arg(
    summary: &mut Summary,
    reporter: &mut Reporter,
    reporting: bool,
    enclosing: &str,
    sink_name: &str,
    pos: Pos,
    arg: &Value,
) {
    if !arg.carries_taint() {
        return;
    }

    if arg.taint.has_security_taint() && reporting {
        let mut trace = arg.trace.clone();
        push_trace(
            &mut trace,
            TraceStep::new(enclosing, pos, format!("passed to sink `{sink_name}`")),
        );
        reporter.tainted_sink(enclosing, pos, sink_name, &arg.taint, trace);
    }

    if arg.param_deps.is_empty() && arg.field_deps.is_empty() {
        return;
    }
    let mut trace = arg.trace.clone();
    push_trace(
        &mut trace,
        TraceStep::new(enclosing, pos, format!("passed to sink `{sink_name}`")),
    );
    let record = SinkRecord {
        symbol: enclosing.to_string(),
        sink: sink_name.to_string(),
        pos,
        trace,
    };
    for &param in &arg.param_deps {
        summary.add_param_sink(param, record.clone());
    }
    for key in &arg.field_deps {
        summary.add_field_sink(key.clone(), record.clone());
    }
}

/// Re-record a callee's internal sink against the flows feeding an argument
/// at this call site: concrete taint fires now, symbolic flows climb another
/// level.
pub fn propagate_callee_sinks(
    summary: &mut Summary,
    reporter: &mut Reporter,
    reporting: bool,
    records: &[SinkRecord],
    arg: &Value,
) {
    if !arg.carries_taint() {
        return;
    }
    for record in records {
        if arg.taint.has_security_taint() && reporting {
            let mut trace = arg.trace.clone();
            merge_traces(&mut trace, &record.trace);
            reporter.tainted_sink(&record.symbol, record.pos, &record.sink, &arg.taint, trace);
        }
        let lifted = || {
            let mut trace = arg.trace.clone();
            merge_traces(&mut trace, &record.trace);
            SinkRecord {
                trace,
                ..record.clone()
            }
        };
        for &param in &arg.param_deps {
            summary.add_param_sink(param, lifted());
        }
        for key in &arg.field_deps {
            summary.add_field_sink(key.clone(), lifted());
        }
    }
}

/// Taint observed flowing into one abstract field, program-wide.
#[derive(Debug, Clone, Default)]
pub struct StoredTaint {
    pub taint: TaintSet,
    pub trace: Vec<TraceStep>,
}

/// Global monotone map of concrete taint written into abstract fields.
///
/// Shared across SCC solves; joins only ever add labels, so late readers see
/// a superset of what early readers saw and the end-of-run field/sink check
/// sees everything.
#[derive(Debug, Default)]
pub struct FieldStore {
    inner: RwLock<FxHashMap<FieldKey, StoredTaint>>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join concrete taint into a field's stored set.
    pub fn join(&self, key: &FieldKey, taint: &TaintSet, trace: &[TraceStep]) {
        if taint.is_empty() {
            return;
        }
        let mut map = self.inner.write();
        let entry = map.entry(key.clone()).or_default();
        if entry.taint.join(taint) {
            trace!(field = ?key, taint = %entry.taint, "field store grew");
            merge_traces(&mut entry.trace, trace);
        }
    }

    pub fn get(&self, key: &FieldKey) -> Option<StoredTaint> {
        self.inner.read().get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
