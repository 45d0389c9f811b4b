//! Engine-level integration tests: scheduling, fixed points, convergence,
//! cancellation, and the shape of the final result.

use flowcheck::analysis::{AnalysisResult, Analyzer, AnalyzerConfig};
use flowcheck::program::ast::{BinOp, Expr, FunctionDecl, Program, Stmt};
use flowcheck::program::ProgramGraph;
use flowcheck::report::FindingKind;
use flowcheck::taint::RoleTable;
use flowcheck::ttype::{Prim, Ty};

fn analyze(program: &Program) -> (ProgramGraph, AnalysisResult) {
    let graph = ProgramGraph::build(program).expect("graph should build");
    let roles = RoleTable::new().with_sink("emit_output");
    let result = Analyzer::new(&graph, &roles).run().expect("analysis should run");
    (graph, result)
}

/// `!name.isEmpty()`
fn not_empty(name: &str) -> Expr {
    Expr::not(Expr::method(Expr::local(name), "isEmpty", vec![]))
}

/// A loop draining two collections until both are empty.
fn drain_program() -> Program {
    Program::new().with_function(FunctionDecl::new("drain").with_body(vec![
        Stmt::assign(1, "a", Expr::CollectionLit(vec![Expr::Literal(Prim::Int)])),
        Stmt::assign(2, "b", Expr::CollectionLit(vec![Expr::Literal(Prim::Str)])),
        Stmt::while_loop(
            3,
            Expr::binary(BinOp::Or, not_empty("a"), not_empty("b")),
            vec![
                Stmt::expr(4, Expr::method(Expr::local("a"), "removeFirst", vec![])),
                Stmt::expr(5, Expr::method(Expr::local("b"), "removeFirst", vec![])),
            ],
        ),
        Stmt::ret(6, None),
    ]))
}

// =============================================================================
// Recursion and SCC scheduling
// =============================================================================

#[test]
fn test_mutual_recursion_converges_to_stable_summaries() {
    let program = Program::new()
        .with_function(FunctionDecl::new("is_even").param("n").with_body(vec![
            Stmt::if_else(
                1,
                Expr::binary(BinOp::Eq, Expr::local("n"), Expr::null()),
                vec![Stmt::ret(2, Some(Expr::Literal(Prim::Bool)))],
                vec![],
            ),
            Stmt::ret(3, Some(Expr::call("is_odd", vec![Expr::local("n")]))),
        ]))
        .with_function(FunctionDecl::new("is_odd").param("n").with_body(vec![Stmt::ret(
            1,
            Some(Expr::not(Expr::call("is_even", vec![Expr::local("n")]))),
        )]));
    let (graph, result) = analyze(&program);

    for name in ["is_even", "is_odd"] {
        let id = graph.function(name).unwrap();
        assert_eq!(result.summary_of(id).unwrap().ret.ty, Ty::Prim(Prim::Bool));
        assert!(result.stats[&id].converged, "{name} should converge");
    }
    assert!(result.findings_of_kind(FindingKind::NonConvergence).is_empty());
}

#[test]
fn test_self_recursion_converges() {
    let program = Program::new().with_function(FunctionDecl::new("countdown").param("n").with_body(vec![
        Stmt::if_else(
            1,
            Expr::binary(BinOp::Eq, Expr::local("n"), Expr::null()),
            vec![Stmt::ret(2, Some(Expr::Literal(Prim::Int)))],
            vec![],
        ),
        Stmt::ret(3, Some(Expr::call("countdown", vec![Expr::local("n")]))),
    ]));
    let (graph, result) = analyze(&program);
    let id = graph.function("countdown").unwrap();
    assert_eq!(result.summary_of(id).unwrap().ret.ty, Ty::Prim(Prim::Int));
    assert!(result.stats[&id].converged);
}

// =============================================================================
// Termination and the iteration cap
// =============================================================================

#[test]
fn test_drain_loop_fixed_point_within_cap() {
    let (graph, result) = analyze(&drain_program());
    let id = graph.function("drain").unwrap();
    let stats = result.stats[&id];
    assert!(stats.converged);
    // The loop body ran at least once from the solver's point of view.
    assert!(stats.has_changes);
    assert!(result.findings_of_kind(FindingKind::NonConvergence).is_empty());
}

#[test]
fn test_effect_free_body_reports_no_changes() {
    let program =
        Program::new().with_function(FunctionDecl::new("noop").with_body(vec![Stmt::ret(1, None)]));
    let (graph, result) = analyze(&program);
    assert!(!result.stats[&graph.function("noop").unwrap()].has_changes);
}

#[test]
fn test_iteration_cap_widens_and_reports() {
    let graph = ProgramGraph::build(&drain_program()).unwrap();
    let roles = RoleTable::new();
    let config = AnalyzerConfig {
        max_block_visits: 2,
        ..AnalyzerConfig::default()
    };
    let result = Analyzer::with_config(&graph, &roles, config).run().unwrap();

    let id = graph.function("drain").unwrap();
    assert!(!result.stats[&id].converged);
    // Widening is a finding, never an error: the run completes.
    assert_eq!(result.findings_of_kind(FindingKind::NonConvergence).len(), 1);
}

#[test]
fn test_no_regression_on_loop_and_branch_heavy_program() {
    // The solver asserts monotonicity internally; a lattice regression
    // anywhere in this fixture would surface as an error, not a finding.
    let program = Program::new()
        .with_function(FunctionDecl::new("helper").param("v").with_body(vec![Stmt::ret(
            1,
            Some(Expr::local("v")),
        )]))
        .with_function(FunctionDecl::new("main").param("flag").with_body(vec![
            Stmt::assign(1, "xs", Expr::CollectionLit(vec![Expr::Literal(Prim::Int)])),
            Stmt::assign(2, "acc", Expr::Literal(Prim::Str)),
            Stmt::while_loop(
                3,
                not_empty("xs"),
                vec![
                    Stmt::assign(4, "item", Expr::method(Expr::local("xs"), "removeFirst", vec![])),
                    Stmt::if_else(
                        5,
                        Expr::binary(BinOp::Eq, Expr::local("flag"), Expr::null()),
                        vec![Stmt::assign(6, "acc", Expr::call("helper", vec![Expr::local("item")]))],
                        vec![],
                    ),
                ],
            ),
            Stmt::ret(7, Some(Expr::local("acc"))),
        ]));
    let (graph, result) = analyze(&program);
    assert!(result.stats[&graph.function("main").unwrap()].converged);
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancelled_run_stops_between_levels() {
    let graph = ProgramGraph::build(&drain_program()).unwrap();
    let roles = RoleTable::new();
    let analyzer = Analyzer::new(&graph, &roles);
    analyzer.cancel_token().cancel();

    let result = analyzer.run().unwrap();
    assert!(result.cancelled);
    assert!(result.summaries.is_empty());
}

#[test]
fn test_sequential_mode_produces_identical_findings() {
    let program = Program::new()
        .with_function(FunctionDecl::new("alpha").with_body(vec![
            Stmt::assign(1, "x", Expr::call("missing_one", vec![])),
            Stmt::ret(2, Some(Expr::local("x"))),
        ]))
        .with_function(FunctionDecl::new("zeta").with_body(vec![
            Stmt::assign(1, "y", Expr::call("missing_two", vec![])),
            Stmt::ret(2, Some(Expr::local("y"))),
        ]));
    let graph = ProgramGraph::build(&program).unwrap();
    let roles = RoleTable::new();

    let parallel = Analyzer::new(&graph, &roles).run().unwrap();
    let config = AnalyzerConfig {
        parallel: false,
        ..AnalyzerConfig::default()
    };
    let sequential = Analyzer::with_config(&graph, &roles, config).run().unwrap();
    assert_eq!(parallel.findings, sequential.findings);
}

// =============================================================================
// Findings and result shape
// =============================================================================

#[test]
fn test_unused_assignment_detection() {
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "x", Expr::Literal(Prim::Int)),
        Stmt::assign(2, "dead", Expr::Literal(Prim::Str)),
        Stmt::assign(3, "_scratch", Expr::Literal(Prim::Str)),
        Stmt::ret(4, Some(Expr::local("x"))),
    ]));
    let (_, result) = analyze(&program);
    let unused = result.findings_of_kind(FindingKind::UnusedAssignment);
    assert_eq!(unused.len(), 1);
    assert!(unused[0].message.contains("`dead`"));
}

#[test]
fn test_findings_are_ordered_by_symbol_and_position() {
    let program = Program::new()
        .with_function(FunctionDecl::new("zeta").with_body(vec![Stmt::expr(
            9,
            Expr::call("missing", vec![]),
        )]))
        .with_function(FunctionDecl::new("alpha").with_body(vec![
            Stmt::expr(3, Expr::call("missing", vec![])),
            Stmt::expr(7, Expr::call("missing", vec![])),
        ]));
    let (_, result) = analyze(&program);
    let malformed = result.findings_of_kind(FindingKind::MalformedProgram);
    assert_eq!(malformed.len(), 3);
    assert_eq!(malformed[0].symbol, "alpha");
    assert_eq!(malformed[0].pos.line, 3);
    assert_eq!(malformed[1].pos.line, 7);
    assert_eq!(malformed[2].symbol, "zeta");
}

#[test]
fn test_summary_published_for_every_body() {
    let program = Program::new()
        .with_function(FunctionDecl::new("one").with_body(vec![Stmt::ret(1, None)]))
        .with_function(FunctionDecl::new("two").with_body(vec![Stmt::ret(1, None)]));
    let (graph, result) = analyze(&program);
    assert_eq!(result.summaries.len(), 2);
    for name in ["one", "two"] {
        assert!(result.summary_of(graph.function(name).unwrap()).is_some());
    }
}

#[test]
fn test_findings_round_trip_through_serde() {
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "data", Expr::Superglobal("_REQUEST".into())),
        Stmt::expr(2, Expr::call("emit_output", vec![Expr::local("data")])),
    ]));
    let (_, result) = analyze(&program);
    let json = serde_json::to_string(&result.findings).unwrap();
    assert!(json.contains("tainted_sink"));
    let back: Vec<flowcheck::report::Finding> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result.findings);
}
