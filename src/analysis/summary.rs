//! Published per-symbol summaries and the publish-once map.
//!
//! A summary is the read-only contract of a symbol once its SCC stabilized:
//! the inferred return value (with taint expressed as a function of the
//! parameters and of fields), the symbol's net effect on abstract fields,
//! and which parameters end up in a sink inside it. Callers compose
//! summaries instead of re-analyzing callees per call site.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::state::Value;
use crate::error::{FlowError, Result};
use crate::program::{FieldKey, Pos, SymbolId};
use crate::taint::TraceStep;

/// A sink reached inside a callee, recorded against the flow that feeds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    /// Symbol the sink call is located in.
    pub symbol: String,
    /// Name of the sink.
    pub sink: String,
    pub pos: Pos,
    /// Path from the flow's entry into the callee down to the sink.
    pub trace: Vec<TraceStep>,
}

/// Published abstraction of one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    /// Return type plus return taint as a function of taint-in: intrinsic
    /// labels, contributing parameter indices, contributing fields.
    pub ret: Value,
    /// Net effect on abstract fields, keyed by declaring class. Values may
    /// be symbolic in the symbol's own parameters.
    pub field_writes: BTreeMap<FieldKey, Value>,
    /// Parameters whose taint reaches a sink inside this symbol
    /// (transitively through callees).
    pub param_sinks: BTreeMap<usize, Vec<SinkRecord>>,
    /// Fields whose stored taint reaches a sink inside this symbol. Checked
    /// against the global field store once all SCCs stabilized.
    pub field_sinks: BTreeMap<FieldKey, Vec<SinkRecord>>,
}

impl Summary {
    /// The placeholder summary for a callee whose SCC has not stabilized:
    /// bottom return, no effects. Callers picking this up are re-solved when
    /// the real summary lands.
    pub fn bottom() -> Self {
        Self {
            ret: Value::bottom(),
            ..Self::default()
        }
    }

    /// Record a sink fed by parameter `index`, deduplicating by site.
    pub fn add_param_sink(&mut self, index: usize, record: SinkRecord) {
        let records = self.param_sinks.entry(index).or_default();
        if !records.iter().any(|r| r.sink == record.sink && r.pos == record.pos) {
            records.push(record);
        }
    }

    /// Record a sink fed by field `key`, deduplicating by site.
    pub fn add_field_sink(&mut self, key: FieldKey, record: SinkRecord) {
        let records = self.field_sinks.entry(key).or_default();
        if !records.iter().any(|r| r.sink == record.sink && r.pos == record.pos) {
            records.push(record);
        }
    }

    /// Equality on the lattice-ordered parts (sink traces excluded).
    pub fn lattice_eq(&self, other: &Summary) -> bool {
        self.ret.lattice_eq(&other.ret)
            && self.field_writes.len() == other.field_writes.len()
            && self.field_writes.iter().all(|(k, v)| {
                other.field_writes.get(k).is_some_and(|o| o.lattice_eq(v))
            })
            && sink_sites(&self.param_sinks) == sink_sites(&other.param_sinks)
            && sink_sites(&self.field_sinks) == sink_sites(&other.field_sinks)
    }

    /// Whether `self` is at or above `other` — summaries must only grow
    /// while an SCC iterates.
    pub fn is_at_least(&self, other: &Summary) -> bool {
        self.ret.is_at_least(&other.ret)
            && other.field_writes.iter().all(|(k, v)| {
                self.field_writes.get(k).is_some_and(|s| s.is_at_least(v))
            })
            && sink_sites(&other.param_sinks).is_subset(&sink_sites(&self.param_sinks))
            && sink_sites(&other.field_sinks).is_subset(&sink_sites(&self.field_sinks))
    }
}

fn sink_sites<K: Clone + Ord>(
    map: &BTreeMap<K, Vec<SinkRecord>>,
) -> std::collections::BTreeSet<(K, String, Pos)> {
    map.iter()
        .flat_map(|(k, records)| {
            records
                .iter()
                .map(move |r| (k.clone(), r.sink.clone(), r.pos))
        })
        .collect()
}

/// Shared map of published summaries.
///
/// Publish-once discipline: a summary is written exactly once, when its SCC
/// stabilizes, and is read-only thereafter. Readers clone an `Arc` and never
/// block each other.
#[derive(Debug, Default)]
pub struct SummaryMap {
    inner: RwLock<FxHashMap<SymbolId, Arc<Summary>>>,
}

impl SummaryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SymbolId) -> Option<Arc<Summary>> {
        self.inner.read().get(&id).cloned()
    }

    /// Publish the final summary for `id`. Double publication is a
    /// programming-contract failure.
    pub fn publish(&self, id: SymbolId, fq_name: &str, summary: Summary) -> Result<()> {
        let mut map = self.inner.write();
        if map.contains_key(&id) {
            return Err(FlowError::DuplicateSummary(fq_name.to_string()));
        }
        map.insert(id, Arc::new(summary));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot for the analysis result.
    pub fn snapshot(&self) -> FxHashMap<SymbolId, Arc<Summary>> {
        self.inner.read().clone()
    }
}
