//! The shared worklist fixed-point solver.
//!
//! One solver drives both engines: each block transfer updates types and
//! taint in the same [`AnalysisState`], merge points join states, and the
//! whole body iterates until nothing grows. The per-body iteration cap
//! guards against lattice chains the width bounds miss; tripping it widens
//! incoming states to `Unknown` and reports non-convergence instead of
//! spinning.
//!
//! Solves run in two modes. While an SCC iterates, findings are suppressed —
//! only the summary matters. Once the component stabilizes, one reporting
//! solve re-runs with final callee summaries and emits findings, statistics,
//! unused-assignment checks, and the declared-hint comparison.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::infer::{self, CollectionBuiltin};
use super::state::{AnalysisState, Place, Value};
use super::summary::Summary;
use super::taintflow::{self, FieldStore};
use super::AnalyzerConfig;
use crate::callgraph::{resolve_constructor, resolve_method, Dispatch};
use crate::error::Result;
use crate::program::ast::{Callee, Expr};
use crate::program::{
    Block, BlockId, Cfg, EdgeKind, InstrKind, Pos, ProgramGraph, Symbol, SymbolId,
};
use crate::report::{Finding, Reporter};
use crate::taint::{push_trace, Role, RoleTable, TraceStep};
use crate::ttype::{Prim, Ty};

/// Statistics of one body solve.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SolveStats {
    /// Total block visits, including re-iterations.
    pub visits: usize,
    /// Whether any reachable instruction changed the abstract state.
    pub has_changes: bool,
    /// False when the iteration cap tripped and the state was widened.
    pub converged: bool,
}

/// Everything a body solve reads from its surroundings.
pub(crate) struct SolveCtx<'a> {
    pub program: &'a ProgramGraph,
    pub roles: &'a RoleTable,
    pub published: &'a super::summary::SummaryMap,
    /// In-progress summaries of the SCC being iterated.
    pub local: &'a FxHashMap<SymbolId, Summary>,
    pub field_store: &'a FieldStore,
    pub config: &'a AnalyzerConfig,
}

/// Result of one body solve.
pub(crate) struct SolveOutcome {
    pub summary: Summary,
    pub stats: SolveStats,
    pub findings: Vec<Finding>,
}

/// Solve one symbol's body to a fixed point.
pub(crate) fn solve(ctx: &SolveCtx<'_>, id: SymbolId, reporting: bool) -> Result<SolveOutcome> {
    let symbol = ctx.program.symbol(id)?;
    let cfg = ctx
        .program
        .cfg_of(id)
        .ok_or(crate::error::FlowError::UnknownSymbol(id))?;
    let mut solver = BodySolver {
        ctx,
        symbol,
        cfg,
        summary: Summary::bottom(),
        reporter: Reporter::new(),
        reporting,
        stats: SolveStats::default(),
        mutations: 0,
        defs: FxHashSet::default(),
        uses: FxHashSet::default(),
    };
    solver.run()?;
    Ok(SolveOutcome {
        summary: solver.summary,
        stats: solver.stats,
        findings: solver.reporter.into_findings(),
    })
}

struct BodySolver<'a> {
    ctx: &'a SolveCtx<'a>,
    symbol: &'a Symbol,
    cfg: &'a Cfg,
    summary: Summary,
    reporter: Reporter,
    reporting: bool,
    stats: SolveStats,
    /// Reachable state-changing instructions seen.
    mutations: usize,
    /// Local assignments, for the unused-assignment check.
    defs: FxHashSet<(String, Pos)>,
    /// Locals read anywhere in the body.
    uses: FxHashSet<String>,
}

impl<'a> BodySolver<'a> {
    fn fq(&self) -> &str {
        &self.symbol.fq_name
    }

    // -------------------------------------------------------------------------
    // Fixed point
    // -------------------------------------------------------------------------

    fn run(&mut self) -> Result<()> {
        let order = self.cfg.topological_order();
        let mut worklist: VecDeque<BlockId> = order.iter().copied().collect();
        let mut queued: FxHashSet<BlockId> = order.iter().copied().collect();
        let mut block_out: FxHashMap<BlockId, AnalysisState> = FxHashMap::default();

        let cap = self.ctx.config.max_block_visits;
        let hard_stop = cap.saturating_mul(4);
        let mut widened = false;

        while let Some(id) = worklist.pop_front() {
            queued.remove(&id);
            self.stats.visits += 1;

            if !widened && self.stats.visits > cap {
                widened = true;
                warn!(symbol = %self.fq(), cap, "iteration cap hit, widening to Unknown");
                if self.reporting {
                    self.reporter
                        .non_convergence(&self.symbol.fq_name.clone(), self.symbol.pos, cap);
                }
            }
            if self.stats.visits > hard_stop {
                break;
            }

            let mut in_state = self.flow_in(id, &block_out);
            if widened {
                in_state.widen();
            }
            let block = self.cfg.block(id)?.clone();
            let out = self.transfer(&block, in_state)?;

            let changed = match block_out.get(&id) {
                Some(prev) if out.lattice_eq(prev) => false,
                Some(prev) => {
                    out.assert_monotone_over(prev, &self.symbol.fq_name)?;
                    true
                }
                None => true,
            };
            if !changed {
                continue;
            }
            block_out.insert(id, out);
            for &(succ, _) in self.cfg.successors(id) {
                if queued.insert(succ) {
                    worklist.push_back(succ);
                }
            }
        }

        self.stats.converged = !widened;
        self.stats.has_changes = self.mutations > 0;
        debug!(
            symbol = %self.fq(),
            visits = self.stats.visits,
            converged = self.stats.converged,
            "body solved"
        );

        self.finish(&block_out)
    }

    /// Join (and refine) predecessor exit states into a block's entry state.
    fn flow_in(&self, id: BlockId, block_out: &FxHashMap<BlockId, AnalysisState>) -> AnalysisState {
        if id == self.cfg.entry {
            return self.entry_state();
        }
        let mut state = AnalysisState::unreachable();
        for &(pred, kind) in self.cfg.predecessors(id) {
            let Some(out) = block_out.get(&pred) else {
                continue;
            };
            let cond = self
                .cfg
                .block(pred)
                .ok()
                .and_then(|b| b.branch.clone());
            let contribution = infer::refine_on_edge(out, cond.as_ref(), kind);
            state.join_with(&contribution);
        }
        state
    }

    /// Parameters seeded with their hints and a symbolic dependency on
    /// themselves — summaries are functions of taint-in.
    fn entry_state(&self) -> AnalysisState {
        let mut state = AnalysisState::entry();
        for (index, param) in self.symbol.params.iter().enumerate() {
            let mut value = Value::of_ty(param.ty.clone());
            value.param_deps.insert(index);
            state.set(Place::Local(param.name.clone()), value);
        }
        state
    }

    // -------------------------------------------------------------------------
    // Transfer
    // -------------------------------------------------------------------------

    fn transfer(&mut self, block: &Block, mut state: AnalysisState) -> Result<AnalysisState> {
        if !state.reachable {
            // Bottom swallows everything: unreachable code has no effects.
            return Ok(state);
        }
        for instr in &block.instrs {
            match &instr.kind {
                InstrKind::Assign { local, value } => {
                    let v = self.eval(&mut state, value, instr.pos)?;
                    state.set(Place::Local(local.clone()), v);
                    self.mutations += 1;
                    if self.reporting {
                        self.defs.insert((local.clone(), instr.pos));
                    }
                }
                InstrKind::FieldSet { obj, field, value } => {
                    let obj_v = self.eval(&mut state, obj, instr.pos)?;
                    let val = self.eval(&mut state, value, instr.pos)?;
                    self.store_field(&mut state, &obj_v, field, val, instr.pos);
                    self.mutations += 1;
                }
                InstrKind::Eval(expr) => {
                    self.eval(&mut state, expr, instr.pos)?;
                }
                InstrKind::Return(value) => {
                    let v = match value {
                        Some(expr) => self.eval(&mut state, expr, instr.pos)?,
                        None => Value::of_ty(Ty::Prim(Prim::Null)),
                    };
                    self.summary.ret.join(&v);
                }
            }
        }
        if let Some(cond) = &block.branch {
            let pos = block.branch_pos.unwrap_or(self.symbol.pos);
            self.eval(&mut state, cond, pos)?;
        }
        Ok(state)
    }

    /// Write a value through an object into the field abstraction. Single
    /// known class: strong update (re-assignment drops prior taint).
    /// Ambiguous receiver: weak join per candidate.
    fn store_field(
        &mut self,
        state: &mut AnalysisState,
        obj: &Value,
        field: &str,
        mut value: Value,
        pos: Pos,
    ) {
        let classes = instance_classes(&obj.ty);
        if classes.is_empty() {
            // Writes through unknowable receivers have nowhere to land.
            return;
        }
        // A value stored through a tainted object keeps that context.
        value.join_flows(obj);
        for (i, class) in classes.iter().enumerate() {
            match self.ctx.program.resolve_field(*class, field) {
                Some(key) => {
                    let mut stored = value.clone();
                    push_trace(
                        &mut stored.trace,
                        TraceStep::new(
                            self.fq(),
                            pos,
                            format!(
                                "stored to field `{}::{}`",
                                self.ctx.program.class(key.class).name,
                                field
                            ),
                        ),
                    );
                    if classes.len() == 1 && i == 0 {
                        state.set(Place::Field(key), stored);
                    } else {
                        state.join_place(Place::Field(key), &stored);
                    }
                }
                None => {
                    if self.reporting {
                        let class_name = &self.ctx.program.class(*class).name;
                        self.reporter.malformed(
                            &self.symbol.fq_name.clone(),
                            pos,
                            &format!("unknown field `{field}` on class `{class_name}`"),
                        );
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Expression evaluation
    // -------------------------------------------------------------------------

    fn eval(&mut self, state: &mut AnalysisState, expr: &Expr, pos: Pos) -> Result<Value> {
        match expr {
            Expr::This => Ok(match self.symbol.class {
                Some(class) => Value::of_ty(Ty::Instance(class)),
                None => Value::unknown(),
            }),
            Expr::Local(name) => {
                if self.reporting {
                    self.uses.insert(name.clone());
                }
                Ok(state.local(name).cloned().unwrap_or_else(Value::unknown))
            }
            Expr::Literal(prim) => Ok(Value::of_ty(Ty::Prim(*prim))),
            Expr::Superglobal(name) => {
                Ok(taintflow::superglobal_value(name, self.fq(), pos))
            }
            Expr::FieldGet { obj, field } => {
                let obj_v = self.eval(state, obj, pos)?;
                Ok(self.load_field(state, &obj_v, field, pos))
            }
            Expr::Call { callee, args } => self.eval_call(state, callee, args, pos),
            Expr::New { class, args } => self.eval_new(state, class, args, pos),
            Expr::Await(inner) => {
                let mut v = self.eval(state, inner, pos)?;
                // A suspension point is an ordinary sequential statement;
                // only the value unwraps.
                v.ty = v.ty.unwrap_awaited();
                Ok(v)
            }
            Expr::CollectionLit(elems) => {
                let mut elem_ty = Ty::Bottom;
                let mut result = Value::default();
                for elem in elems {
                    let v = self.eval(state, elem, pos)?;
                    elem_ty = elem_ty.join(&v.ty);
                    result.join_flows(&v);
                }
                result.ty = Ty::collection(elem_ty);
                Ok(result)
            }
            Expr::CollectionMap { recv, callback } => {
                self.eval_collection_map(state, recv, callback, pos)
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(state, lhs, pos)?;
                let r = self.eval(state, rhs, pos)?;
                let mut result = Value::of_ty(infer::binary_ty(*op, &l.ty, &r.ty));
                if !op.is_comparison() {
                    // Arithmetic/concatenation merges operand taint;
                    // comparisons yield a fresh, clean boolean.
                    result.join_flows(&l);
                    result.join_flows(&r);
                }
                Ok(result)
            }
            Expr::Unary { op, expr } => {
                let v = self.eval(state, expr, pos)?;
                let mut result = Value::of_ty(infer::unary_ty(*op, &v.ty));
                if matches!(op, crate::program::ast::UnOp::Neg) {
                    result.join_flows(&v);
                }
                Ok(result)
            }
        }
    }

    /// Field load: tracked state wins, otherwise the read is symbolic in the
    /// field abstraction so the summary stays a function of stored taint.
    fn load_field(
        &mut self,
        state: &AnalysisState,
        obj: &Value,
        field: &str,
        pos: Pos,
    ) -> Value {
        let classes = instance_classes(&obj.ty);
        if classes.is_empty() {
            // Unknowable receiver: unknown value, and no taint invented.
            let mut v = Value::unknown();
            v.join_flows(obj);
            return v;
        }
        let mut result = Value::bottom();
        for class in classes {
            match self.ctx.program.resolve_field(class, field) {
                Some(key) => match state.get(&Place::Field(key.clone())) {
                    Some(tracked) => {
                        result.join(tracked);
                    }
                    None => {
                        let declared = self
                            .ctx
                            .program
                            .class(key.class)
                            .fields
                            .get(field)
                            .map(|f| f.declared_ty.clone())
                            .unwrap_or(Ty::Unknown);
                        let mut symbolic = Value::of_ty(declared);
                        symbolic.field_deps.insert(key);
                        result.join(&symbolic);
                    }
                },
                None => {
                    if self.reporting {
                        let class_name = &self.ctx.program.class(class).name;
                        self.reporter.malformed(
                            &self.symbol.fq_name.clone(),
                            pos,
                            &format!("unknown field `{field}` on class `{class_name}`"),
                        );
                    }
                    result.join(&Value::unknown());
                }
            }
        }
        result.join_flows(obj);
        result
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    fn eval_call(
        &mut self,
        state: &mut AnalysisState,
        callee: &Callee,
        args: &[Expr],
        pos: Pos,
    ) -> Result<Value> {
        match callee {
            Callee::Function(name) => {
                let args = self.eval_args(state, args, pos)?;
                if let Some(id) = self.ctx.program.function(name) {
                    return self.apply_call(state, &[id], &args, pos, false);
                }
                // External name: the role table decides what it means.
                match self.ctx.roles.role_of(name).cloned() {
                    Some(role) => Ok(self.apply_external_role(name, &role, &args, pos)),
                    None => {
                        if self.reporting {
                            self.reporter.malformed(
                                &self.symbol.fq_name.clone(),
                                pos,
                                &format!("call to undefined function `{name}`"),
                            );
                        }
                        Ok(taintflow::unresolved_value())
                    }
                }
            }
            Callee::Method { recv, name } => {
                let recv_v = self.eval(state, recv, pos)?;
                // Builtin collection operations come before dispatch.
                let base = recv_v.ty.strip_null();
                if matches!(base, Ty::Collection(_)) {
                    if let Some(builtin) = infer::collection_builtin(name) {
                        return self.eval_collection_builtin(
                            state, recv, &recv_v, builtin, args, pos,
                        );
                    }
                    // Unknown operation on a collection: result unknown,
                    // container taint propagates through the return.
                    let _args = self.eval_args(state, args, pos)?;
                    let mut v = Value::unknown();
                    v.join_flows(&recv_v);
                    return Ok(v);
                }
                let args = self.eval_args(state, args, pos)?;
                match resolve_method(self.ctx.program, &recv_v.ty, name) {
                    Dispatch::Target(target) => {
                        let mut result =
                            self.apply_call(state, target.symbols(), &args, pos, false)?;
                        // Dispatch through a tainted receiver keeps its
                        // context on the result.
                        result.join_flows(&recv_v);
                        Ok(result)
                    }
                    Dispatch::Unresolved => {
                        if self.reporting && ty_has_instance(&recv_v.ty) {
                            self.reporter
                                .unresolved_call(&self.symbol.fq_name.clone(), pos, name);
                        }
                        Ok(taintflow::unresolved_value())
                    }
                }
            }
            Callee::Static { class, name } => {
                let args = self.eval_args(state, args, pos)?;
                match self.ctx.program.class_by_name(class) {
                    Some(cid) => match self.ctx.program.lookup_method(cid, name) {
                        Some(id) if self.ctx.program.cfg_of(id).is_some() => {
                            self.apply_call(state, &[id], &args, pos, false)
                        }
                        _ => {
                            if self.reporting {
                                self.reporter.unresolved_call(
                                    &self.symbol.fq_name.clone(),
                                    pos,
                                    &format!("{class}::{name}"),
                                );
                            }
                            Ok(taintflow::unresolved_value())
                        }
                    },
                    None => {
                        // A static call on an undefined class is recovered:
                        // unknown result, no invented taint violation.
                        if self.reporting {
                            self.reporter.malformed(
                                &self.symbol.fq_name.clone(),
                                pos,
                                &format!("unknown class `{class}` in static call"),
                            );
                        }
                        Ok(taintflow::unresolved_value())
                    }
                }
            }
            Callee::ParentConstructor => {
                let args = self.eval_args(state, args, pos)?;
                self.eval_parent_ctor(state, &args, pos)
            }
        }
    }

    fn eval_args(
        &mut self,
        state: &mut AnalysisState,
        args: &[Expr],
        pos: Pos,
    ) -> Result<Vec<Value>> {
        args.iter().map(|a| self.eval(state, a, pos)).collect()
    }

    /// Apply a role for a symbol the program does not define.
    fn apply_external_role(&mut self, name: &str, role: &Role, args: &[Value], pos: Pos) -> Value {
        match role {
            Role::Source { kinds } => {
                taintflow::source_value(kinds, Ty::Unknown, name, &self.symbol.fq_name.clone(), pos)
            }
            Role::Sink => {
                let fq = self.symbol.fq_name.clone();
                for arg in args {
                    taintflow::record_sink_arg(
                        &mut self.summary,
                        &mut self.reporter,
                        self.reporting,
                        &fq,
                        name,
                        pos,
                        arg,
                    );
                }
                Value::of_ty(Ty::Prim(Prim::Null))
            }
            Role::Sanitizer => Value::unknown(),
        }
    }

    /// Explicit forwarding to the parent constructor. This is the ONLY way
    /// constructor arguments reach parent-initialized fields; without it the
    /// dataflow edge simply does not exist.
    fn eval_parent_ctor(
        &mut self,
        state: &mut AnalysisState,
        args: &[Value],
        pos: Pos,
    ) -> Result<Value> {
        let parent = self
            .symbol
            .class
            .and_then(|c| self.ctx.program.class(c).parent);
        let Some(parent) = parent else {
            if self.reporting {
                self.reporter.malformed(
                    &self.symbol.fq_name.clone(),
                    pos,
                    "parent constructor call without a parent class",
                );
            }
            return Ok(Value::of_ty(Ty::Prim(Prim::Null)));
        };
        match resolve_constructor(self.ctx.program, parent) {
            Dispatch::Target(target) => {
                self.apply_call(state, target.symbols(), args, pos, true)?;
            }
            Dispatch::Unresolved => {
                // Parent has no constructor; forwarding is a no-op.
            }
        }
        Ok(Value::of_ty(Ty::Prim(Prim::Null)))
    }

    fn eval_new(
        &mut self,
        state: &mut AnalysisState,
        class: &str,
        args: &[Expr],
        pos: Pos,
    ) -> Result<Value> {
        let args = self.eval_args(state, args, pos)?;
        let Some(cid) = self.ctx.program.class_by_name(class) else {
            if self.reporting {
                self.reporter.malformed(
                    &self.symbol.fq_name.clone(),
                    pos,
                    &format!("unknown class `{class}` in object creation"),
                );
            }
            return Ok(taintflow::unresolved_value());
        };

        // Fresh object: every reachable field starts at its declared,
        // untainted default. Shared per-class abstraction makes this a
        // deliberate strong reset.
        for (key, info) in self.ctx.program.all_fields(cid) {
            state.set(Place::Field(key), Value::of_ty(info.declared_ty.clone()));
        }
        match resolve_constructor(self.ctx.program, cid) {
            Dispatch::Target(target) => {
                self.apply_call(state, target.symbols(), &args, pos, true)?;
            }
            Dispatch::Unresolved => {
                // No constructor anywhere in the hierarchy: fields keep
                // their defaults and the arguments flow nowhere.
            }
        }
        Ok(Value::of_ty(Ty::Instance(cid)))
    }

    fn eval_collection_builtin(
        &mut self,
        state: &mut AnalysisState,
        recv_expr: &Expr,
        recv: &Value,
        builtin: CollectionBuiltin,
        args: &[Expr],
        pos: Pos,
    ) -> Result<Value> {
        let args = self.eval_args(state, args, pos)?;
        match builtin {
            CollectionBuiltin::IsEmpty => Ok(Value::of_ty(Ty::Prim(Prim::Bool))),
            CollectionBuiltin::Count => Ok(Value::of_ty(Ty::Prim(Prim::Int))),
            CollectionBuiltin::TakeElement => {
                let mut v = Value::of_ty(recv.ty.strip_null().element());
                v.join_flows(recv);
                Ok(v)
            }
            CollectionBuiltin::PushElement => {
                if let Expr::Local(name) = recv_expr {
                    let mut grown = recv.clone();
                    let mut elem_ty = recv.ty.strip_null().element();
                    for arg in &args {
                        elem_ty = elem_ty.join(&arg.ty);
                        grown.join_flows(arg);
                    }
                    grown.ty = Ty::collection(elem_ty);
                    state.set(Place::Local(name.clone()), grown);
                    self.mutations += 1;
                }
                Ok(Value::of_ty(Ty::Prim(Prim::Null)))
            }
        }
    }

    fn eval_collection_map(
        &mut self,
        state: &mut AnalysisState,
        recv: &Expr,
        callback: &str,
        pos: Pos,
    ) -> Result<Value> {
        let recv_v = self.eval(state, recv, pos)?;
        let Some(id) = self.ctx.program.function(callback) else {
            if self.reporting {
                self.reporter.malformed(
                    &self.symbol.fq_name.clone(),
                    pos,
                    &format!("unknown callback `{callback}` in collection map"),
                );
            }
            return Ok(taintflow::unresolved_value());
        };
        let callee = self.ctx.program.symbol(id)?;
        let summary = self.lookup_summary(id);

        // The value flowing into the callback per element.
        let mut elem_in = Value::of_ty(recv_v.ty.strip_null().element());
        elem_in.join_flows(&recv_v);

        // The callback's summary maps element taint to result-element taint.
        let mut elem_out = Value::of_ty(if callee.is_async {
            Ty::awaitable(summary.ret.ty.clone())
        } else {
            summary.ret.ty.clone()
        });
        elem_out.taint = summary.ret.taint.clone();
        elem_out.trace = summary.ret.trace.clone();
        if summary.ret.param_deps.contains(&0) {
            elem_out.join_flows(&elem_in);
        }
        for key in &summary.ret.field_deps {
            match state.get(&Place::Field(key.clone())) {
                Some(tracked) => {
                    elem_out.join_flows(tracked);
                }
                None => {
                    elem_out.field_deps.insert(key.clone());
                }
            }
        }
        // Elements feeding a sink inside the callback.
        if let Some(records) = summary.param_sinks.get(&0) {
            taintflow::propagate_callee_sinks(
                &mut self.summary,
                &mut self.reporter,
                self.reporting,
                records,
                &elem_in,
            );
        }

        let mut result = Value::of_ty(Ty::collection(elem_out.ty.clone()));
        result.join_flows(&recv_v);
        result.join_flows(&elem_out);
        Ok(result)
    }

    /// Compose callee summaries into the caller's state: return value, field
    /// effects, and sinks fed by the arguments. Multiple targets (virtual
    /// dispatch) join their outcomes.
    fn apply_call(
        &mut self,
        state: &mut AnalysisState,
        targets: &[SymbolId],
        args: &[Value],
        pos: Pos,
        strong_fields: bool,
    ) -> Result<Value> {
        if targets.is_empty() {
            return Ok(taintflow::unresolved_value());
        }
        let strong = strong_fields && targets.len() == 1;
        let mut result = Value::bottom();

        for &target in targets {
            let callee = self.ctx.program.symbol(target)?;
            // Role table entries apply to project symbols too.
            if let Some(role) = self.ctx.roles.role_of(&callee.fq_name).cloned() {
                let fq_name = callee.fq_name.clone();
                result.join(&self.apply_external_role(&fq_name, &role, args, pos));
                continue;
            }
            let summary = self.lookup_summary(target);

            // Return value: the type is the callee's own; taint composes
            // from intrinsic labels, argument flows, and field state.
            let mut ret = Value::of_ty(if callee.is_async {
                Ty::awaitable(summary.ret.ty.clone())
            } else {
                summary.ret.ty.clone()
            });
            ret.taint = summary.ret.taint.clone();
            ret.trace = summary.ret.trace.clone();
            for &i in &summary.ret.param_deps {
                if let Some(arg) = args.get(i) {
                    ret.join_flows(arg);
                }
            }
            for key in &summary.ret.field_deps {
                match state.get(&Place::Field(key.clone())) {
                    Some(tracked) => {
                        // The callee reads the field as of this call site.
                        ret.join_flows(tracked);
                    }
                    None => {
                        ret.field_deps.insert(key.clone());
                    }
                }
            }

            // Field effects, resolved against the actual arguments.
            for (key, flow) in &summary.field_writes {
                let resolved = self.resolve_flow(state, flow, args);
                if !resolved.taint.is_empty() {
                    self.ctx
                        .field_store
                        .join(key, &resolved.taint, &resolved.trace);
                }
                if strong {
                    state.set(Place::Field(key.clone()), resolved);
                } else {
                    state.join_place(Place::Field(key.clone()), &resolved);
                }
            }

            // Sinks inside the callee fed by our arguments.
            for (&i, records) in &summary.param_sinks {
                if let Some(arg) = args.get(i) {
                    taintflow::propagate_callee_sinks(
                        &mut self.summary,
                        &mut self.reporter,
                        self.reporting,
                        records,
                        arg,
                    );
                }
            }

            result.join(&ret);
        }
        Ok(result)
    }

    /// Materialize a summary flow (possibly symbolic in the callee's params
    /// and fields) against this call site's arguments and field state.
    fn resolve_flow(&self, state: &AnalysisState, flow: &Value, args: &[Value]) -> Value {
        let mut resolved = Value::of_ty(flow.ty.clone());
        resolved.taint = flow.taint.clone();
        resolved.trace = flow.trace.clone();
        for &i in &flow.param_deps {
            if let Some(arg) = args.get(i) {
                resolved.join_flows(arg);
            }
        }
        for key in &flow.field_deps {
            match state.get(&Place::Field(key.clone())) {
                Some(tracked) => {
                    resolved.join_flows(tracked);
                }
                None => {
                    resolved.field_deps.insert(key.clone());
                }
            }
        }
        resolved
    }

    fn lookup_summary(&self, id: SymbolId) -> Summary {
        if let Some(local) = self.ctx.local.get(&id) {
            return local.clone();
        }
        if let Some(published) = self.ctx.published.get(id) {
            return (*published).clone();
        }
        // Callee's SCC has not stabilized: bottom placeholder; the SCC loop
        // re-solves this caller once the callee's summary grows.
        Summary::bottom()
    }

    // -------------------------------------------------------------------------
    // Summary assembly and end-of-solve checks
    // -------------------------------------------------------------------------

    fn finish(&mut self, block_out: &FxHashMap<BlockId, AnalysisState>) -> Result<()> {
        // Implicit `return null` on any fallthrough path into the exit.
        for &(pred, kind) in self.cfg.predecessors(self.cfg.exit) {
            if kind == EdgeKind::Seq
                && block_out.get(&pred).is_some_and(|s| s.reachable)
            {
                self.summary.ret.join(&Value::of_ty(Ty::Prim(Prim::Null)));
                break;
            }
        }

        // Net field effect: the exit join of everything written on some path.
        if let Some(exit_state) = block_out.get(&self.cfg.exit) {
            if exit_state.reachable {
                for key in exit_state.dirty_fields() {
                    if let Some(value) = exit_state.get(&Place::Field(key.clone())) {
                        self.summary
                            .field_writes
                            .entry(key.clone())
                            .or_insert_with(Value::bottom)
                            .join(value);
                    }
                }
            }
        }

        if self.reporting {
            self.report_return_hint();
            self.report_unused_assignments();
        }
        Ok(())
    }

    fn report_return_hint(&mut self) {
        let Some(hint) = &self.symbol.ret_hint else {
            return;
        };
        let program = self.ctx.program;
        let subclass = |a, b| program.is_subclass_of(a, b);
        if !self.summary.ret.ty.compatible_with(hint, &subclass) {
            let inferred = self.summary.ret.ty.clone();
            self.reporter.type_mismatch(
                &self.symbol.fq_name.clone(),
                self.symbol.pos,
                &inferred,
                hint,
            );
        }
    }

    fn report_unused_assignments(&mut self) {
        let defs: Vec<_> = self.defs.iter().cloned().collect();
        let mut sorted = defs;
        sorted.sort();
        for (name, pos) in sorted {
            if name.starts_with('_') || self.uses.contains(&name) {
                continue;
            }
            self.reporter
                .unused_assignment(&self.symbol.fq_name.clone(), pos, &name);
        }
    }
}

/// Class atoms a value could be an instance of.
fn instance_classes(ty: &Ty) -> Vec<crate::program::ClassId> {
    let mut out = Vec::new();
    collect_instances(ty, &mut out);
    out
}

fn collect_instances(ty: &Ty, out: &mut Vec<crate::program::ClassId>) {
    match ty {
        Ty::Instance(cid) => out.push(*cid),
        Ty::Nullable(inner) => collect_instances(inner, out),
        Ty::Union(members) => {
            for member in members {
                collect_instances(member, out);
            }
        }
        _ => {}
    }
}

fn ty_has_instance(ty: &Ty) -> bool {
    !instance_classes(ty).is_empty()
}
