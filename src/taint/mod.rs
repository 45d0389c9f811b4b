//! Taint labels, the label-set lattice, and the source/sink role table.
//!
//! A taint label marks a value as derived, possibly transitively, from
//! untrusted input. Labels form a join-semilattice under set union; the empty
//! set means untainted. Each tracked value additionally carries a bounded
//! provenance trace (the ordered program points taint travelled through),
//! which is what ends up in a finding's source-to-sink path.
//!
//! Which symbols produce, consume, or neutralize taint is not hardcoded: the
//! engine reads a [`RoleTable`] supplied by the caller. Loading that table
//! from configuration is an external concern; here it is plain data.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::program::types::Pos;

/// Upper bound on stored provenance steps per value. Traces only grow when
/// the label set grows, so this is a reporting bound, not a soundness one.
pub const MAX_TRACE_LEN: usize = 48;

// =============================================================================
// Taint kinds
// =============================================================================

/// A named category of taint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintKind {
    /// Value derived from external input (request data, superglobal reads).
    ExternalInput,
    /// Soundness marker for values produced by calls the resolver could not
    /// bind to any concrete symbol. Propagated like any other label but
    /// excluded from sink violations, so unresolved references never produce
    /// spurious findings on their own.
    Unresolved,
    /// Project-specific taint category from the role table.
    Custom(String),
}

impl TaintKind {
    /// Whether this kind counts toward a sink violation.
    #[inline]
    pub fn is_security_relevant(&self) -> bool {
        !matches!(self, TaintKind::Unresolved)
    }
}

impl fmt::Display for TaintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaintKind::ExternalInput => write!(f, "external-input"),
            TaintKind::Unresolved => write!(f, "unresolved"),
            TaintKind::Custom(name) => write!(f, "{name}"),
        }
    }
}

// =============================================================================
// Label-set lattice
// =============================================================================

/// A set of taint labels attached to one value.
///
/// Join is set union; the ordering is set inclusion. A `BTreeSet` keeps
/// iteration and serialization deterministic, which the reporter relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintSet(BTreeSet<TaintKind>);

impl TaintSet {
    /// The empty (untainted) set.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A set holding exactly one kind.
    pub fn singleton(kind: TaintKind) -> Self {
        let mut set = BTreeSet::new();
        set.insert(kind);
        Self(set)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn contains(&self, kind: &TaintKind) -> bool {
        self.0.contains(kind)
    }

    /// Whether any label here should trip a sink.
    pub fn has_security_taint(&self) -> bool {
        self.0.iter().any(TaintKind::is_security_relevant)
    }

    /// Union `other` into `self`; returns true when the set grew.
    pub fn join(&mut self, other: &TaintSet) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().cloned());
        self.0.len() != before
    }

    /// Insert a single kind; returns true when the set grew.
    pub fn insert(&mut self, kind: TaintKind) -> bool {
        self.0.insert(kind)
    }

    /// Set-inclusion check, used by the solver's monotonicity assertion.
    pub fn is_superset(&self, other: &TaintSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaintKind> {
        self.0.iter()
    }
}

impl fmt::Display for TaintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "untainted");
        }
        for (i, kind) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{kind}")?;
        }
        Ok(())
    }
}

impl FromIterator<TaintKind> for TaintSet {
    fn from_iter<I: IntoIterator<Item = TaintKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// Provenance traces
// =============================================================================

/// One hop in a taint provenance trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Fully-qualified name of the symbol the step occurred in.
    pub symbol: String,
    /// Program point of the step.
    pub pos: Pos,
    /// What happened at this step ("external input read", "stored to field
    /// `Account::token`", ...).
    pub note: String,
}

impl TraceStep {
    pub fn new(symbol: impl Into<String>, pos: Pos, note: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            pos,
            note: note.into(),
        }
    }
}

impl fmt::Display for TraceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.note, self.symbol, self.pos)
    }
}

/// Append `step` to `trace`, respecting the length cap.
pub fn push_trace(trace: &mut Vec<TraceStep>, step: TraceStep) {
    if trace.len() < MAX_TRACE_LEN && trace.last() != Some(&step) {
        trace.push(step);
    }
}

// =============================================================================
// Role table
// =============================================================================

/// Security role of an external or project symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Calls return a value tainted with the given kinds.
    Source { kinds: Vec<TaintKind> },
    /// Passing a tainted argument is a security finding.
    Sink,
    /// The return value is clean regardless of argument taint.
    Sanitizer,
}

/// Read-only mapping from fully-qualified symbol name to its security role.
///
/// Built by an external configuration loader; the engine only ever looks
/// names up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleTable {
    roles: FxHashMap<String, Role>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source producing `external-input` taint.
    pub fn with_source(mut self, name: impl Into<String>) -> Self {
        self.roles.insert(
            name.into(),
            Role::Source {
                kinds: vec![TaintKind::ExternalInput],
            },
        );
        self
    }

    /// Register a source producing specific taint kinds.
    pub fn with_source_kinds(mut self, name: impl Into<String>, kinds: Vec<TaintKind>) -> Self {
        self.roles.insert(name.into(), Role::Source { kinds });
        self
    }

    pub fn with_sink(mut self, name: impl Into<String>) -> Self {
        self.roles.insert(name.into(), Role::Sink);
        self
    }

    pub fn with_sanitizer(mut self, name: impl Into<String>) -> Self {
        self.roles.insert(name.into(), Role::Sanitizer);
        self
    }

    /// Look up the role of a fully-qualified symbol name.
    #[inline]
    pub fn role_of(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
