//! Taint propagation integration tests.
//!
//! Fixtures are built with the front-end tree builders and run through the
//! whole pipeline: graph normalization, call resolution, both engines,
//! findings. Each test checks one propagation rule end to end.

use flowcheck::analysis::{AnalysisResult, Analyzer};
use flowcheck::program::ast::{BinOp, ClassDecl, Expr, FieldDecl, FunctionDecl, Program, Stmt};
use flowcheck::program::ProgramGraph;
use flowcheck::report::FindingKind;
use flowcheck::taint::RoleTable;
use flowcheck::ttype::{Prim, Ty};

fn roles() -> RoleTable {
    RoleTable::new()
        .with_source("request_input")
        .with_sink("emit_output")
        .with_sanitizer("escape_html")
}

fn run(program: &Program) -> AnalysisResult {
    let graph = ProgramGraph::build(program).expect("graph should build");
    let roles = roles();
    Analyzer::new(&graph, &roles).run().expect("analysis should run")
}

fn sink_count(result: &AnalysisResult) -> usize {
    result.findings_of_kind(FindingKind::TaintedSink).len()
}

/// `!name.isEmpty()`
fn not_empty(name: &str) -> Expr {
    Expr::not(Expr::method(Expr::local(name), "isEmpty", vec![]))
}

// =============================================================================
// Sources, sinks, sanitizers
// =============================================================================

#[test]
fn test_superglobal_read_reaches_sink() {
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "data", Expr::Superglobal("_REQUEST".into())),
        Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("data")])),
    ]));
    let result = run(&program);
    let sinks = result.findings_of_kind(FindingKind::TaintedSink);
    assert_eq!(sinks.len(), 1);
    // The finding carries the ordered source-to-sink path.
    assert!(sinks[0].trace.iter().any(|s| s.note.contains("_REQUEST")));
    assert!(sinks[0].trace.iter().any(|s| s.note.contains("emit_output")));
}

#[test]
fn test_source_role_reaches_sink() {
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "data", Expr::call("request_input", vec![])),
        Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("data")])),
    ]));
    assert_eq!(sink_count(&run(&program)), 1);
}

#[test]
fn test_sanitizer_clears_taint() {
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "data", Expr::call("request_input", vec![])),
        Stmt::assign(2, "clean", Expr::call("escape_html", vec![Expr::local("data")])),
        Stmt::expr(3, Expr::call("emit_output", vec![Expr::local("clean")])),
    ]));
    assert_eq!(sink_count(&run(&program)), 0);
}

#[test]
fn test_untainted_value_is_not_flagged() {
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "msg", Expr::Literal(Prim::Str)),
        Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("msg")])),
    ]));
    assert_eq!(sink_count(&run(&program)), 0);
}

// =============================================================================
// Join at control-flow merges
// =============================================================================

/// A value tainted on only one branch of `if (guard)` must stay tainted
/// after the merge, whatever the guard's boolean shape.
fn branch_program(guard: Expr) -> Program {
    Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "a", Expr::CollectionLit(vec![Expr::Literal(Prim::Int)])),
        Stmt::assign(2, "b", Expr::CollectionLit(vec![Expr::Literal(Prim::Int)])),
        Stmt::assign(3, "x", Expr::Literal(Prim::Str)),
        Stmt::if_else(
            4,
            guard,
            vec![Stmt::assign(5, "x", Expr::Superglobal("_GET".into()))],
            vec![],
        ),
        Stmt::expr(6, Expr::call("emit_output", vec![Expr::local("x")])),
    ]))
}

#[test]
fn test_one_sided_taint_survives_or_guard() {
    let guard = Expr::binary(BinOp::Or, not_empty("a"), not_empty("b"));
    assert_eq!(sink_count(&run(&branch_program(guard))), 1);
}

#[test]
fn test_one_sided_taint_survives_and_guard() {
    let guard = Expr::binary(BinOp::And, not_empty("a"), not_empty("b"));
    assert_eq!(sink_count(&run(&branch_program(guard))), 1);
}

#[test]
fn test_one_sided_taint_survives_mixed_guard() {
    let guard = Expr::binary(
        BinOp::Or,
        Expr::binary(BinOp::And, not_empty("a"), not_empty("b")),
        not_empty("b"),
    );
    assert_eq!(sink_count(&run(&branch_program(guard))), 1);
}

/// Drain loop: collections emptied each iteration, element landing in `x`.
/// The guard shape must not change what flows out of the loop.
fn drain_program(guard: Expr) -> Program {
    Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "a", Expr::CollectionLit(vec![Expr::Superglobal("_REQUEST".into())])),
        Stmt::assign(2, "b", Expr::CollectionLit(vec![Expr::Literal(Prim::Int)])),
        Stmt::assign(3, "c", Expr::CollectionLit(vec![Expr::Literal(Prim::Int)])),
        Stmt::assign(4, "x", Expr::Literal(Prim::Str)),
        Stmt::while_loop(
            5,
            guard,
            vec![
                Stmt::assign(6, "x", Expr::method(Expr::local("a"), "removeFirst", vec![])),
                Stmt::expr(7, Expr::method(Expr::local("b"), "removeFirst", vec![])),
                Stmt::expr(8, Expr::method(Expr::local("c"), "removeFirst", vec![])),
            ],
        ),
        Stmt::expr(9, Expr::call("emit_output", vec![Expr::local("x")])),
        Stmt::ret(10, None),
    ]))
}

#[test]
fn test_loop_exit_join_with_or_guard() {
    let guard = Expr::binary(
        BinOp::Or,
        Expr::binary(BinOp::Or, not_empty("a"), not_empty("b")),
        not_empty("c"),
    );
    assert_eq!(sink_count(&run(&drain_program(guard))), 1);
}

#[test]
fn test_loop_exit_join_with_and_guard() {
    let guard = Expr::binary(
        BinOp::And,
        Expr::binary(BinOp::And, not_empty("a"), not_empty("b")),
        not_empty("c"),
    );
    assert_eq!(sink_count(&run(&drain_program(guard))), 1);
}

#[test]
fn test_loop_exit_join_with_mixed_guard() {
    let guard = Expr::binary(
        BinOp::Or,
        Expr::binary(BinOp::And, not_empty("a"), not_empty("b")),
        not_empty("c"),
    );
    assert_eq!(sink_count(&run(&drain_program(guard))), 1);
}

// =============================================================================
// Constructor forwarding
// =============================================================================

fn base_class() -> ClassDecl {
    ClassDecl::new("Base")
        .with_field(FieldDecl::typed("token", Ty::Prim(Prim::Str)))
        .with_method(
            FunctionDecl::new("__construct")
                .constructor()
                .param("t")
                .with_body(vec![Stmt::field_set(2, Expr::This, "token", Expr::local("t"))]),
        )
}

#[test]
fn test_missing_forwarding_severs_constructor_dataflow() {
    // Quiet declares its own constructor and never calls the parent's:
    // the argument has no path into the inherited field.
    let program = Program::new()
        .with_class(base_class())
        .with_class(
            ClassDecl::new("Quiet").extends("Base").with_method(
                FunctionDecl::new("__construct").constructor().param("t").with_body(vec![]),
            ),
        )
        .with_function(FunctionDecl::new("main").with_body(vec![
            Stmt::assign(1, "h", Expr::new_instance("Quiet", vec![Expr::Superglobal("_REQUEST".into())])),
            Stmt::expr(2, Expr::call("emit_output", vec![Expr::field(Expr::local("h"), "token")])),
        ]));
    assert_eq!(sink_count(&run(&program)), 0);
}

#[test]
fn test_explicit_forwarding_reestablishes_dataflow() {
    let program = Program::new()
        .with_class(base_class())
        .with_class(
            ClassDecl::new("Loud").extends("Base").with_method(
                FunctionDecl::new("__construct")
                    .constructor()
                    .param("t")
                    .with_body(vec![Stmt::expr(1, Expr::parent_ctor(vec![Expr::local("t")]))]),
            ),
        )
        .with_function(FunctionDecl::new("main").with_body(vec![
            Stmt::assign(1, "h", Expr::new_instance("Loud", vec![Expr::Superglobal("_REQUEST".into())])),
            Stmt::expr(2, Expr::call("emit_output", vec![Expr::field(Expr::local("h"), "token")])),
        ]));
    let result = run(&program);
    let sinks = result.findings_of_kind(FindingKind::TaintedSink);
    assert_eq!(sinks.len(), 1);
    assert!(sinks[0].trace.iter().any(|s| s.note.contains("_REQUEST")));
}

// =============================================================================
// Shadowing: a re-assigned value loses prior taint
// =============================================================================

#[test]
fn test_swap_reports_previous_value_not_current_argument() {
    // swap returns the previously stored value before overwriting it. The
    // call made with the tainted argument must NOT be flagged; the next
    // call, made with a clean argument, must be.
    let program = Program::new()
        .with_class(
            ClassDecl::new("Holder")
                .with_field(FieldDecl::new("stored"))
                .with_method(FunctionDecl::new("swap").param("v").with_body(vec![
                    Stmt::assign(1, "old", Expr::field(Expr::This, "stored")),
                    Stmt::field_set(2, Expr::This, "stored", Expr::local("v")),
                    Stmt::ret(3, Some(Expr::local("old"))),
                ])),
        )
        .with_function(FunctionDecl::new("main").with_body(vec![
            Stmt::assign(1, "h", Expr::new_instance("Holder", vec![])),
            Stmt::assign(2, "r1", Expr::method(Expr::local("h"), "swap", vec![Expr::Literal(Prim::Str)])),
            Stmt::expr(3, Expr::call("emit_output", vec![Expr::local("r1")])),
            Stmt::assign(4, "r2", Expr::method(Expr::local("h"), "swap", vec![Expr::Superglobal("_REQUEST".into())])),
            Stmt::expr(5, Expr::call("emit_output", vec![Expr::local("r2")])),
            Stmt::assign(6, "r3", Expr::method(Expr::local("h"), "swap", vec![Expr::Literal(Prim::Str)])),
            Stmt::expr(7, Expr::call("emit_output", vec![Expr::local("r3")])),
        ]));
    let result = run(&program);
    let sinks = result.findings_of_kind(FindingKind::TaintedSink);
    // Only the third read observes the tainted stored value.
    assert_eq!(sinks.len(), 1);
    assert_eq!(sinks[0].pos.line, 7);
}

#[test]
fn test_reassignment_kills_local_taint() {
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "x", Expr::Superglobal("_REQUEST".into())),
        Stmt::assign(2, "x", Expr::Literal(Prim::Str)),
        Stmt::expr(3, Expr::call("emit_output", vec![Expr::local("x")])),
    ]));
    assert_eq!(sink_count(&run(&program)), 0);
}

// =============================================================================
// Interprocedural flows
// =============================================================================

#[test]
fn test_taint_through_callee_return() {
    let program = Program::new()
        .with_function(FunctionDecl::new("fetch").with_body(vec![Stmt::ret(
            1,
            Some(Expr::Superglobal("_REQUEST".into())),
        )]))
        .with_function(FunctionDecl::new("main").with_body(vec![
            Stmt::assign(1, "d", Expr::call("fetch", vec![])),
            Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("d")])),
        ]));
    assert_eq!(sink_count(&run(&program)), 1);
}

#[test]
fn test_summary_maps_argument_taint_to_return() {
    // wrap is clean in itself; it only becomes dangerous when handed a
    // tainted argument. The clean call site stays silent.
    let program = Program::new()
        .with_function(
            FunctionDecl::new("wrap")
                .param("v")
                .with_body(vec![Stmt::ret(1, Some(Expr::local("v")))]),
        )
        .with_function(FunctionDecl::new("clean_use").with_body(vec![
            Stmt::assign(1, "r", Expr::call("wrap", vec![Expr::Literal(Prim::Str)])),
            Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("r")])),
        ]))
        .with_function(FunctionDecl::new("dirty_use").with_body(vec![
            Stmt::assign(1, "r", Expr::call("wrap", vec![Expr::Superglobal("_POST".into())])),
            Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("r")])),
        ]));
    let result = run(&program);
    let sinks = result.findings_of_kind(FindingKind::TaintedSink);
    assert_eq!(sinks.len(), 1);
    assert_eq!(sinks[0].symbol, "dirty_use");
}

#[test]
fn test_sink_inside_callee_fed_by_caller_argument() {
    let program = Program::new()
        .with_function(
            FunctionDecl::new("log_it")
                .param("m")
                .with_body(vec![Stmt::expr(1, Expr::call("emit_output", vec![Expr::local("m")]))]),
        )
        .with_function(FunctionDecl::new("main").with_body(vec![Stmt::expr(
            1,
            Expr::call("log_it", vec![Expr::Superglobal("_REQUEST".into())]),
        )]));
    let result = run(&program);
    let sinks = result.findings_of_kind(FindingKind::TaintedSink);
    assert_eq!(sinks.len(), 1);
    // Reported at the sink call inside the callee.
    assert_eq!(sinks[0].symbol, "log_it");
}

#[test]
fn test_field_flow_across_method_calls() {
    // Taint enters a field in one method and leaves through a sink in
    // another; the flow is judged against the program-wide field store.
    let program = Program::new()
        .with_class(
            ClassDecl::new("Session")
                .with_field(FieldDecl::new("token"))
                .with_method(
                    FunctionDecl::new("store")
                        .param("v")
                        .with_body(vec![Stmt::field_set(1, Expr::This, "token", Expr::local("v"))]),
                )
                .with_method(FunctionDecl::new("leak").with_body(vec![Stmt::expr(
                    2,
                    Expr::call("emit_output", vec![Expr::field(Expr::This, "token")]),
                )])),
        )
        .with_function(FunctionDecl::new("main").with_body(vec![
            Stmt::assign(1, "s", Expr::new_instance("Session", vec![])),
            Stmt::expr(2, Expr::method(Expr::local("s"), "store", vec![Expr::call("request_input", vec![])])),
            Stmt::expr(3, Expr::method(Expr::local("s"), "leak", vec![])),
        ]));
    let result = run(&program);
    let sinks = result.findings_of_kind(FindingKind::TaintedSink);
    assert_eq!(sinks.len(), 1);
    assert_eq!(sinks[0].symbol, "Session::leak");
}

#[test]
fn test_virtual_dispatch_joins_sink_outcomes() {
    // The receiver is a union of two classes; one override discards its
    // argument, the other emits it. The join must keep the dangerous one.
    let program = Program::new()
        .with_class(
            ClassDecl::new("Writer")
                .abstract_class()
                .with_method(FunctionDecl::new("write").param("m").abstract_method()),
        )
        .with_class(ClassDecl::new("Console").extends("Writer").with_method(
            FunctionDecl::new("write").param("m").with_body(vec![Stmt::expr(
                1,
                Expr::call("emit_output", vec![Expr::local("m")]),
            )]),
        ))
        .with_class(ClassDecl::new("Devnull").extends("Writer").with_method(
            FunctionDecl::new("write").param("m").with_body(vec![]),
        ))
        .with_function(FunctionDecl::new("main").param("flag").with_body(vec![
            Stmt::if_else(
                1,
                Expr::binary(BinOp::Eq, Expr::local("flag"), Expr::null()),
                vec![Stmt::assign(2, "w", Expr::new_instance("Console", vec![]))],
                vec![Stmt::assign(3, "w", Expr::new_instance("Devnull", vec![]))],
            ),
            Stmt::expr(4, Expr::method(Expr::local("w"), "write", vec![Expr::Superglobal("_REQUEST".into())])),
        ]));
    assert_eq!(sink_count(&run(&program)), 1);
}

#[test]
fn test_collection_map_propagates_element_taint() {
    let program = Program::new()
        .with_function(
            FunctionDecl::new("identity")
                .param("x")
                .with_body(vec![Stmt::ret(1, Some(Expr::local("x")))]),
        )
        .with_function(FunctionDecl::new("main").with_body(vec![
            Stmt::assign(1, "src", Expr::CollectionLit(vec![Expr::call("request_input", vec![])])),
            Stmt::assign(2, "out", Expr::map_collection(Expr::local("src"), "identity")),
            Stmt::assign(3, "item", Expr::method(Expr::local("out"), "removeFirst", vec![])),
            Stmt::expr(4, Expr::call("emit_output", vec![Expr::local("item")])),
        ]));
    assert_eq!(sink_count(&run(&program)), 1);
}

#[test]
fn test_taint_survives_await() {
    let program = Program::new()
        .with_function(
            FunctionDecl::new("fetch")
                .asynchronous()
                .with_body(vec![Stmt::ret(1, Some(Expr::call("request_input", vec![])))]),
        )
        .with_function(FunctionDecl::new("main").asynchronous().with_body(vec![
            Stmt::assign(1, "d", Expr::awaited(Expr::call("fetch", vec![]))),
            Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("d")])),
        ]));
    assert_eq!(sink_count(&run(&program)), 1);
}

// =============================================================================
// Unresolved references
// =============================================================================

#[test]
fn test_unresolved_references_do_not_invent_taint() {
    // A static call on an undefined class and a call to an undefined
    // function, both used only for control flow: no crash, no sink finding.
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "p", Expr::static_call("Config", "path", vec![])),
        Stmt::if_else(
            2,
            Expr::binary(BinOp::Ne, Expr::local("p"), Expr::null()),
            vec![Stmt::assign(3, "x", Expr::call("undefined_helper", vec![]))],
            vec![Stmt::assign(4, "x", Expr::Literal(Prim::Str))],
        ),
        Stmt::expr(5, Expr::call("emit_output", vec![Expr::local("x")])),
    ]));
    let result = run(&program);
    assert_eq!(sink_count(&result), 0);
    assert!(!result.findings_of_kind(FindingKind::MalformedProgram).is_empty());
}

#[test]
fn test_abstract_call_without_override_is_unresolved_not_tainted() {
    let program = Program::new()
        .with_class(
            ClassDecl::new("Abs")
                .abstract_class()
                .with_method(FunctionDecl::new("run").abstract_method()),
        )
        .with_function(FunctionDecl::new("main").with_body(vec![
            Stmt::assign(1, "a", Expr::new_instance("Abs", vec![])),
            Stmt::assign(2, "y", Expr::method(Expr::local("a"), "run", vec![])),
            Stmt::expr(3, Expr::call("emit_output", vec![Expr::local("y")])),
        ]));
    let result = run(&program);
    assert_eq!(result.findings_of_kind(FindingKind::UnresolvedCall).len(), 1);
    assert_eq!(sink_count(&result), 0);
}
