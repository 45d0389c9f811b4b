//! Type inference integration tests.
//!
//! Each fixture runs the full analyzer and inspects the published summaries:
//! the inferred return type is where every intraprocedural rule becomes
//! observable.

use flowcheck::analysis::{AnalysisResult, Analyzer};
use flowcheck::program::ast::{BinOp, ClassDecl, Expr, FunctionDecl, Program, Stmt};
use flowcheck::program::ProgramGraph;
use flowcheck::report::FindingKind;
use flowcheck::taint::RoleTable;
use flowcheck::ttype::{Prim, Ty};

fn analyze(program: &Program) -> (ProgramGraph, AnalysisResult) {
    let graph = ProgramGraph::build(program).expect("graph should build");
    let roles = RoleTable::new();
    let result = Analyzer::new(&graph, &roles).run().expect("analysis should run");
    (graph, result)
}

fn return_ty(graph: &ProgramGraph, result: &AnalysisResult, name: &str) -> Ty {
    let id = graph.function(name).expect("function exists");
    result.summary_of(id).expect("summary published").ret.ty.clone()
}

fn assert_union_of(ty: &Ty, expected: &[Ty]) {
    match ty {
        Ty::Union(members) => {
            assert_eq!(members.len(), expected.len(), "union width of {ty}");
            for want in expected {
                assert!(members.contains(want), "{ty} should contain {want}");
            }
        }
        other => panic!("expected a union of {} members, got {other}", expected.len()),
    }
}

// =============================================================================
// Statements and parameters
// =============================================================================

#[test]
fn test_declared_parameter_type_flows_to_return() {
    let program = Program::new().with_function(
        FunctionDecl::new("echo")
            .param_typed("x", Ty::Prim(Prim::Int))
            .with_body(vec![Stmt::ret(1, Some(Expr::local("x")))]),
    );
    let (graph, result) = analyze(&program);
    assert_eq!(return_ty(&graph, &result, "echo"), Ty::Prim(Prim::Int));
}

#[test]
fn test_fallthrough_returns_null() {
    let program = Program::new().with_function(
        FunctionDecl::new("noop").with_body(vec![Stmt::expr(1, Expr::Literal(Prim::Int))]),
    );
    let (graph, result) = analyze(&program);
    assert_eq!(return_ty(&graph, &result, "noop"), Ty::Prim(Prim::Null));
}

#[test]
fn test_both_branches_join_into_union() {
    // The analyzer treats every branch as statically reachable; the result
    // is the join of both outcomes, not a sampled one.
    let program = Program::new()
        .with_function(
            FunctionDecl::new("coin").with_body(vec![Stmt::ret(1, Some(Expr::Literal(Prim::Bool)))]),
        )
        .with_function(FunctionDecl::new("pick").with_body(vec![Stmt::if_else(
            1,
            Expr::call("coin", vec![]),
            vec![Stmt::ret(2, Some(Expr::Literal(Prim::Int)))],
            vec![Stmt::ret(3, Some(Expr::Literal(Prim::Str)))],
        )]));
    let (graph, result) = analyze(&program);
    let ty = return_ty(&graph, &result, "pick");
    assert_union_of(&ty, &[Ty::Prim(Prim::Int), Ty::Prim(Prim::Str)]);
}

#[test]
fn test_null_check_refines_both_edges() {
    // `x != null` proves Int on the true edge; the false edge still returns
    // a plain Int, so the nullability is gone from the final type.
    let program = Program::new().with_function(
        FunctionDecl::new("narrow")
            .param_typed("x", Ty::nullable(Ty::Prim(Prim::Int)))
            .with_body(vec![Stmt::if_else(
                1,
                Expr::binary(BinOp::Ne, Expr::local("x"), Expr::null()),
                vec![Stmt::ret(2, Some(Expr::local("x")))],
                vec![Stmt::ret(3, Some(Expr::Literal(Prim::Int)))],
            )]),
    );
    let (graph, result) = analyze(&program);
    assert_eq!(return_ty(&graph, &result, "narrow"), Ty::Prim(Prim::Int));
}

// =============================================================================
// Asynchronous suspension
// =============================================================================

#[test]
fn test_async_call_wraps_and_await_unwraps() {
    let program = Program::new()
        .with_function(
            FunctionDecl::new("compute")
                .asynchronous()
                .with_body(vec![Stmt::ret(1, Some(Expr::Literal(Prim::Int)))]),
        )
        .with_function(FunctionDecl::new("sync_use").with_body(vec![
            Stmt::assign(1, "x", Expr::call("compute", vec![])),
            Stmt::ret(2, Some(Expr::local("x"))),
        ]))
        .with_function(FunctionDecl::new("async_use").asynchronous().with_body(vec![
            Stmt::assign(1, "y", Expr::awaited(Expr::call("compute", vec![]))),
            Stmt::ret(2, Some(Expr::local("y"))),
        ]));
    let (graph, result) = analyze(&program);
    assert_eq!(return_ty(&graph, &result, "compute"), Ty::Prim(Prim::Int));
    assert_eq!(
        return_ty(&graph, &result, "sync_use"),
        Ty::awaitable(Ty::Prim(Prim::Int))
    );
    assert_eq!(return_ty(&graph, &result, "async_use"), Ty::Prim(Prim::Int));
}

// =============================================================================
// Collections
// =============================================================================

#[test]
fn test_collection_map_yields_callback_return_type() {
    let program = Program::new()
        .with_function(
            FunctionDecl::new("to_int")
                .param("x")
                .with_body(vec![Stmt::ret(1, Some(Expr::Literal(Prim::Int)))]),
        )
        .with_function(FunctionDecl::new("convert").with_body(vec![
            Stmt::assign(1, "xs", Expr::CollectionLit(vec![Expr::Literal(Prim::Str)])),
            Stmt::ret(2, Some(Expr::map_collection(Expr::local("xs"), "to_int"))),
        ]));
    let (graph, result) = analyze(&program);
    assert_eq!(
        return_ty(&graph, &result, "convert"),
        Ty::collection(Ty::Prim(Prim::Int))
    );
}

#[test]
fn test_push_widens_element_type() {
    let program = Program::new().with_function(FunctionDecl::new("grow").with_body(vec![
        Stmt::assign(1, "xs", Expr::CollectionLit(vec![Expr::Literal(Prim::Int)])),
        Stmt::expr(2, Expr::method(Expr::local("xs"), "add", vec![Expr::Literal(Prim::Str)])),
        Stmt::ret(3, Some(Expr::local("xs"))),
    ]));
    let (graph, result) = analyze(&program);
    let ty = return_ty(&graph, &result, "grow");
    assert_union_of(&ty.element(), &[Ty::Prim(Prim::Int), Ty::Prim(Prim::Str)]);
}

#[test]
fn test_take_element_yields_element_type() {
    let program = Program::new().with_function(FunctionDecl::new("take").with_body(vec![
        Stmt::assign(1, "xs", Expr::CollectionLit(vec![Expr::Literal(Prim::Float)])),
        Stmt::ret(2, Some(Expr::method(Expr::local("xs"), "removeFirst", vec![]))),
    ]));
    let (graph, result) = analyze(&program);
    assert_eq!(return_ty(&graph, &result, "take"), Ty::Prim(Prim::Float));
}

// =============================================================================
// Dispatch
// =============================================================================

#[test]
fn test_virtual_dispatch_joins_return_types() {
    let program = Program::new()
        .with_class(
            ClassDecl::new("Shape")
                .abstract_class()
                .with_method(FunctionDecl::new("describe").abstract_method()),
        )
        .with_class(ClassDecl::new("Circle").extends("Shape").with_method(
            FunctionDecl::new("describe").with_body(vec![Stmt::ret(1, Some(Expr::Literal(Prim::Str)))]),
        ))
        .with_class(ClassDecl::new("Square").extends("Shape").with_method(
            FunctionDecl::new("describe").with_body(vec![Stmt::ret(1, Some(Expr::Literal(Prim::Int)))]),
        ))
        .with_function(FunctionDecl::new("use_shape").param("flag").with_body(vec![
            Stmt::if_else(
                1,
                Expr::binary(BinOp::Eq, Expr::local("flag"), Expr::null()),
                vec![Stmt::assign(2, "s", Expr::new_instance("Circle", vec![]))],
                vec![Stmt::assign(3, "s", Expr::new_instance("Square", vec![]))],
            ),
            Stmt::ret(4, Some(Expr::method(Expr::local("s"), "describe", vec![]))),
        ]));
    let (graph, result) = analyze(&program);
    let ty = return_ty(&graph, &result, "use_shape");
    assert_union_of(&ty, &[Ty::Prim(Prim::Str), Ty::Prim(Prim::Int)]);
}

#[test]
fn test_unknown_callee_yields_unknown() {
    let program = Program::new().with_function(FunctionDecl::new("main").with_body(vec![
        Stmt::assign(1, "x", Expr::call("mystery", vec![])),
        Stmt::ret(2, Some(Expr::local("x"))),
    ]));
    let (graph, result) = analyze(&program);
    assert_eq!(return_ty(&graph, &result, "main"), Ty::Unknown);
    assert_eq!(result.findings_of_kind(FindingKind::MalformedProgram).len(), 1);
}

// =============================================================================
// Declared hints
// =============================================================================

#[test]
fn test_incompatible_return_hint_is_reported() {
    let program = Program::new()
        .with_function(
            FunctionDecl::new("bad")
                .returns(Ty::Prim(Prim::Int))
                .with_body(vec![Stmt::ret(1, Some(Expr::Literal(Prim::Str)))]),
        )
        .with_function(
            FunctionDecl::new("good")
                .returns(Ty::Prim(Prim::Int))
                .with_body(vec![Stmt::ret(1, Some(Expr::Literal(Prim::Int)))]),
        );
    let (_, result) = analyze(&program);
    let mismatches = result.findings_of_kind(FindingKind::TypeMismatch);
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].symbol, "bad");
}

#[test]
fn test_implicit_null_fallthrough_violates_non_null_hint() {
    let program = Program::new().with_function(
        FunctionDecl::new("forgot_return").returns(Ty::Prim(Prim::Int)).with_body(vec![]),
    );
    let (_, result) = analyze(&program);
    assert_eq!(result.findings_of_kind(FindingKind::TypeMismatch).len(), 1);
}

#[test]
fn test_nullable_hint_accepts_refined_value() {
    let program = Program::new().with_function(
        FunctionDecl::new("maybe")
            .returns(Ty::nullable(Ty::Prim(Prim::Int)))
            .with_body(vec![Stmt::ret(1, Some(Expr::Literal(Prim::Int)))]),
    );
    let (_, result) = analyze(&program);
    assert!(result.findings_of_kind(FindingKind::TypeMismatch).is_empty());
}
