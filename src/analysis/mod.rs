//! The analysis engine: scheduling, fixed points, summaries, findings.
//!
//! One [`Analyzer`] run is a single logical pass per SCC of the call graph,
//! bottom-up. Components inside one dependency level have no path between
//! them and are evaluated in parallel, each solve owning its private worklist
//! and states. The only shared data are publish-once [`Summary`] values and
//! the monotone [`FieldStore`]; neither is ever written twice with
//! conflicting content, so readers never block writers in any meaningful
//! way.
//!
//! Cancellation is checked between levels: aborting a run keeps every
//! already-published summary valid.

pub mod infer;
pub mod solver;
pub mod state;
pub mod summary;
pub mod taintflow;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::callgraph::{self, CallGraph, Scc};
use crate::error::Result;
use crate::program::{ProgramGraph, SymbolId};
use crate::report::{self, Finding, Reporter};
use crate::taint::RoleTable;
use crate::ttype::Ty;

use self::solver::SolveCtx;
use self::state::merge_traces;

pub use self::solver::SolveStats;
pub use self::state::{AnalysisState, Place, Value};
pub use self::summary::{SinkRecord, Summary, SummaryMap};
pub use self::taintflow::{FieldStore, StoredTaint};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Per-body block-visit budget before widening to `Unknown`.
    pub max_block_visits: usize,
    /// Iteration budget for one SCC before its summaries widen.
    pub max_scc_passes: usize,
    /// Evaluate independent SCCs of a level in parallel.
    pub parallel: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_block_visits: 1000,
            max_scc_passes: 64,
            parallel: true,
        }
    }
}

/// Handle for aborting a running analysis between SCC levels.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Final output of a run.
#[derive(Debug)]
pub struct AnalysisResult {
    /// Ordered, deduplicated findings.
    pub findings: Vec<Finding>,
    /// Published summary per analyzed symbol, for downstream tooling.
    pub summaries: FxHashMap<SymbolId, Arc<Summary>>,
    /// Solver statistics per analyzed symbol.
    pub stats: FxHashMap<SymbolId, SolveStats>,
    /// True when the run was aborted; published summaries remain valid.
    pub cancelled: bool,
}

impl AnalysisResult {
    pub fn summary_of(&self, id: SymbolId) -> Option<&Summary> {
        self.summaries.get(&id).map(Arc::as_ref)
    }

    pub fn findings_of_kind(&self, kind: crate::report::FindingKind) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.kind == kind).collect()
    }
}

/// Whole-program analyzer over a built [`ProgramGraph`] and a role table.
pub struct Analyzer<'p> {
    program: &'p ProgramGraph,
    roles: &'p RoleTable,
    config: AnalyzerConfig,
    cancel: Arc<AtomicBool>,
}

/// Per-SCC solve output, merged on the scheduling thread.
struct SccOutcome {
    summaries: Vec<(SymbolId, String, Summary)>,
    findings: Vec<Finding>,
    stats: Vec<(SymbolId, SolveStats)>,
}

impl<'p> Analyzer<'p> {
    pub fn new(program: &'p ProgramGraph, roles: &'p RoleTable) -> Self {
        Self::with_config(program, roles, AnalyzerConfig::default())
    }

    pub fn with_config(
        program: &'p ProgramGraph,
        roles: &'p RoleTable,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            program,
            roles,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token for aborting this run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(Arc::clone(&self.cancel))
    }

    /// Run both engines to completion (or cancellation).
    pub fn run(&self) -> Result<AnalysisResult> {
        let mut findings: Vec<Finding> = Vec::new();

        // Problems recovered while the graph was built are low-severity
        // findings, not errors.
        let mut build_reporter = Reporter::new();
        for issue in &self.program.issues {
            build_reporter.malformed(&issue.context, issue.pos, &issue.message);
        }
        findings.extend(build_reporter.into_findings());

        let call_graph = callgraph::build_call_graph(self.program);
        let plan = callgraph::plan(&call_graph);
        info!(
            symbols = self.program.symbol_count(),
            components = plan.component_count(),
            levels = plan.levels.len(),
            "analysis scheduled"
        );

        let summaries = SummaryMap::new();
        let field_store = FieldStore::new();
        let mut stats: FxHashMap<SymbolId, SolveStats> = FxHashMap::default();
        let mut cancelled = false;

        for (depth, level) in plan.levels.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
            debug!(depth, components = level.len(), "solving level");
            let outcomes: Result<Vec<SccOutcome>> = if self.config.parallel {
                level
                    .par_iter()
                    .map(|scc| self.solve_scc(scc, &call_graph, &summaries, &field_store))
                    .collect()
            } else {
                level
                    .iter()
                    .map(|scc| self.solve_scc(scc, &call_graph, &summaries, &field_store))
                    .collect()
            };
            for outcome in outcomes? {
                for (id, fq_name, summary) in outcome.summaries {
                    summaries.publish(id, &fq_name, summary)?;
                }
                findings.extend(outcome.findings);
                stats.extend(outcome.stats);
            }
        }

        // Field-mediated sinks: now that every write has landed in the
        // store, judge the sinks that depend on stored field taint.
        let snapshot = summaries.snapshot();
        let mut field_reporter = Reporter::new();
        for summary in snapshot.values() {
            for (key, records) in &summary.field_sinks {
                let Some(stored) = field_store.get(key) else {
                    continue;
                };
                if !stored.taint.has_security_taint() {
                    continue;
                }
                for record in records {
                    let mut trace = stored.trace.clone();
                    merge_traces(&mut trace, &record.trace);
                    field_reporter.tainted_sink(
                        &record.symbol,
                        record.pos,
                        &record.sink,
                        &stored.taint,
                        trace,
                    );
                }
            }
        }
        findings.extend(field_reporter.into_findings());

        Ok(AnalysisResult {
            findings: report::finalize(findings),
            summaries: snapshot,
            stats,
            cancelled,
        })
    }

    /// Solve one SCC: iterate members to a stable set of summaries, then one
    /// reporting pass per member with the final summaries in scope.
    fn solve_scc(
        &self,
        scc: &Scc,
        call_graph: &CallGraph,
        summaries: &SummaryMap,
        field_store: &FieldStore,
    ) -> Result<SccOutcome> {
        let mut local: FxHashMap<SymbolId, Summary> = scc
            .members
            .iter()
            .map(|&id| (id, Summary::bottom()))
            .collect();
        let mut outcome = SccOutcome {
            summaries: Vec::new(),
            findings: Vec::new(),
            stats: Vec::new(),
        };

        if scc.is_cyclic(call_graph) {
            let mut passes = 0;
            loop {
                passes += 1;
                let mut changed = false;
                for &member in &scc.members {
                    let ctx = SolveCtx {
                        program: self.program,
                        roles: self.roles,
                        published: summaries,
                        local: &local,
                        field_store,
                        config: &self.config,
                    };
                    let solved = solver::solve(&ctx, member, false)?;
                    let prev = &local[&member];
                    if !solved.summary.is_at_least(prev) {
                        return Err(crate::error::FlowError::InvariantViolation(format!(
                            "summary of `{}` regressed during SCC iteration",
                            self.program.symbol(member)?.fq_name
                        )));
                    }
                    if !solved.summary.lattice_eq(prev) {
                        local.insert(member, solved.summary);
                        changed = true;
                    }
                }
                if !changed {
                    debug!(passes, members = scc.members.len(), "scc stabilized");
                    break;
                }
                if passes >= self.config.max_scc_passes {
                    // Recursion did not settle: widen return types to top
                    // and report, mirroring the per-body cap.
                    let mut reporter = Reporter::new();
                    for (&member, summary) in local.iter_mut() {
                        summary.ret.ty = Ty::Unknown;
                        let symbol = self.program.symbol(member)?;
                        reporter.non_convergence(
                            &symbol.fq_name,
                            symbol.pos,
                            self.config.max_scc_passes,
                        );
                    }
                    outcome.findings.extend(reporter.into_findings());
                    break;
                }
            }
        }

        // Reporting pass with stable summaries in scope.
        for &member in &scc.members {
            let ctx = SolveCtx {
                program: self.program,
                roles: self.roles,
                published: summaries,
                local: &local,
                field_store,
                config: &self.config,
            };
            let solved = solver::solve(&ctx, member, true)?;
            let fq_name = self.program.symbol(member)?.fq_name.clone();
            outcome.findings.extend(solved.findings);
            outcome.stats.push((member, solved.stats));
            outcome.summaries.push((member, fq_name, solved.summary));
        }
        Ok(outcome)
    }
}
