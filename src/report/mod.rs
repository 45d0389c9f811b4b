//! Structured findings.
//!
//! The reporter performs no analysis: engine components hand it terminal
//! facts (a tainted sink argument, a call that resolved nowhere, a loop that
//! hit the iteration cap) and it produces uniformly shaped, ordered records
//! for whatever renders them downstream. Everything here is serde-friendly;
//! wire format is the caller's business.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::program::Pos;
use crate::taint::{TaintSet, TraceStep};
use crate::ttype::Ty;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What kind of fact a finding reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Tainted value reached a sink argument.
    TaintedSink,
    /// Call site with no concrete target anywhere in the hierarchy.
    UnresolvedCall,
    /// A fixed point was not reached within the iteration cap; the affected
    /// state was widened to `Unknown`.
    NonConvergence,
    /// Dangling reference in the input, recovered as `Unknown`.
    MalformedProgram,
    /// Inferred return type incompatible with the declared hint.
    TypeMismatch,
    /// Local assigned but never read.
    UnusedAssignment,
}

impl FindingKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            FindingKind::TaintedSink => Severity::High,
            FindingKind::UnresolvedCall => Severity::Medium,
            FindingKind::NonConvergence => Severity::Medium,
            FindingKind::MalformedProgram => Severity::Low,
            FindingKind::TypeMismatch => Severity::Medium,
            FindingKind::UnusedAssignment => Severity::Info,
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingKind::TaintedSink => write!(f, "tainted_sink"),
            FindingKind::UnresolvedCall => write!(f, "unresolved_call"),
            FindingKind::NonConvergence => write!(f, "non_convergence"),
            FindingKind::MalformedProgram => write!(f, "malformed_program"),
            FindingKind::TypeMismatch => write!(f, "type_mismatch"),
            FindingKind::UnusedAssignment => write!(f, "unused_assignment"),
        }
    }
}

/// One structured finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    /// Fully-qualified name of the symbol the finding is located in (or the
    /// declaration context for build-time findings).
    pub symbol: String,
    pub pos: Pos,
    pub message: String,
    /// Source-to-sink path for taint findings; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceStep>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} at {}:{} — {}",
            self.severity, self.kind, self.symbol, self.pos, self.message
        )
    }
}

/// Collects findings during a single solve or build phase.
///
/// Formatting lives here so every engine component produces identically
/// shaped records; the engine merges per-solve reporters at the end.
#[derive(Debug, Default)]
pub struct Reporter {
    findings: Vec<Finding>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: FindingKind, symbol: &str, pos: Pos, message: String, trace: Vec<TraceStep>) {
        self.findings.push(Finding {
            kind,
            severity: kind.default_severity(),
            symbol: symbol.to_string(),
            pos,
            message,
            trace,
        });
    }

    pub fn tainted_sink(
        &mut self,
        symbol: &str,
        pos: Pos,
        sink_name: &str,
        taint: &TaintSet,
        trace: Vec<TraceStep>,
    ) {
        self.push(
            FindingKind::TaintedSink,
            symbol,
            pos,
            format!("{taint} value reaches sink `{sink_name}`"),
            trace,
        );
    }

    pub fn unresolved_call(&mut self, symbol: &str, pos: Pos, name: &str) {
        self.push(
            FindingKind::UnresolvedCall,
            symbol,
            pos,
            format!("call to `{name}` has no concrete target"),
            Vec::new(),
        );
    }

    pub fn non_convergence(&mut self, symbol: &str, pos: Pos, cap: usize) {
        self.push(
            FindingKind::NonConvergence,
            symbol,
            pos,
            format!("fixed point not reached within {cap} block visits; state widened"),
            Vec::new(),
        );
    }

    pub fn malformed(&mut self, context: &str, pos: Pos, message: &str) {
        self.push(
            FindingKind::MalformedProgram,
            context,
            pos,
            message.to_string(),
            Vec::new(),
        );
    }

    pub fn type_mismatch(&mut self, symbol: &str, pos: Pos, inferred: &Ty, declared: &Ty) {
        self.push(
            FindingKind::TypeMismatch,
            symbol,
            pos,
            format!("inferred return type `{inferred}` does not satisfy declared `{declared}`"),
            Vec::new(),
        );
    }

    pub fn unused_assignment(&mut self, symbol: &str, pos: Pos, local: &str) {
        self.push(
            FindingKind::UnusedAssignment,
            symbol,
            pos,
            format!("`{local}` is assigned but never read"),
            Vec::new(),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }
}

/// Final ordering and deduplication of the merged finding stream.
pub fn finalize(mut findings: Vec<Finding>) -> Vec<Finding> {
    findings.sort_by(|a, b| {
        (&a.symbol, a.pos, a.kind, &a.message).cmp(&(&b.symbol, b.pos, b.kind, &b.message))
    });
    findings.dedup_by(|a, b| {
        a.kind == b.kind && a.symbol == b.symbol && a.pos == b.pos && a.message == b.message
    });
    findings
}
