use fox_ast::{AstContext, BinOp, DeclId, DeclKind, ExprId, ExprKind, TypeKind};
use fox_common::{BufferConsumer, DiagId, DiagnosticEngine, SourceManager};
use fox_lex::Lexer;
use fox_parse::Parser;

fn check(src: &str) -> (AstContext, DeclId, Vec<DiagId>) {
    let mut sm = SourceManager::new();
    let file = sm.load_string("test.fox", src);
    let (consumer, store) = BufferConsumer::new();
    let mut diags = DiagnosticEngine::new(&sm, Box::new(consumer));
    let mut ctx = AstContext::new();
    let tokens = Lexer::new(&mut ctx, &mut diags, file, sm.content(file)).lex();
    let name = ctx.ident("test");
    let unit =
        Parser::new(&mut ctx, &mut diags, file, sm.content(file), &tokens).parse_unit(name);
    fox_sema::check_unit(&mut ctx, &mut diags, unit);
    let ids = store.borrow().iter().map(|d| d.id).collect();
    (ctx, unit, ids)
}

fn diag_ids(src: &str) -> Vec<DiagId> {
    check(src).2
}

fn global_init(ctx: &AstContext, unit: DeclId, index: usize) -> ExprId {
    let DeclKind::Unit { decls, .. } = &ctx.decl(unit).kind else {
        panic!("expected a unit");
    };
    match &ctx.decl(decls[index]).kind {
        DeclKind::Var { init: Some(init), .. } => *init,
        other => panic!("expected an initialized variable, got {other:?}"),
    }
}

#[test]
fn self_referential_global_initializer() {
    // Not an undeclared identifier: the lookup finds the in-progress decl.
    let diags = diag_ids("let x : int = x;");
    assert_eq!(diags, vec![DiagId::VarInitSelfRef]);
}

#[test]
fn parameter_shadows_the_variable_being_declared() {
    let diags = diag_ids("func f(x : int) { var x : int = x; }");
    assert!(diags.is_empty(), "got: {diags:?}");
}

#[test]
fn local_self_reference_is_caught_too() {
    let diags = diag_ids("func f() { let x : int = x; }");
    assert_eq!(diags, vec![DiagId::VarInitSelfRef]);
}

#[test]
fn local_binding_shadows_parameter() {
    // If the local 'x' (bool) did not win over the parameter (int), the
    // return statement would check fine and no diagnostic would fire.
    let diags = diag_ids("func f(x : int) : int { let x : bool = true; return x; }");
    assert_eq!(diags, vec![DiagId::ReturnTypeMismatch]);
}

#[test]
fn redundant_cast_warns_exactly_once() {
    let diags = diag_ids("let y : int = (3 as int);");
    assert_eq!(diags, vec![DiagId::UselessRedundantCast]);
}

#[test]
fn numeric_casts_are_not_redundant() {
    let diags = diag_ids("let y : double = (3 as double);");
    assert!(diags.is_empty(), "got: {diags:?}");
}

#[test]
fn invalid_cast_is_reported() {
    let diags = diag_ids(r#"let y : int = ("s" as int);"#);
    assert_eq!(diags, vec![DiagId::InvalidExplicitCast]);
}

#[test]
fn condition_must_be_numeric_or_bool() {
    let diags = diag_ids(r#"func f() { if "x" { } }"#);
    assert_eq!(diags, vec![DiagId::InvalidCondType]);
}

#[test]
fn global_redeclaration_is_pruned_from_lookups() {
    let (_, _, diags) = check(
        "let x : int = 0;\n\
         let x : int = 1;\n\
         func f() : int { return x; }",
    );
    // Two diagnostics about the redeclaration, and no ambiguity on the use.
    assert_eq!(diags, vec![DiagId::InvalidRedecl, DiagId::FirstDeclaredHere]);
}

#[test]
fn string_plus_char_becomes_concat() {
    let (ctx, unit, diags) = check(r#"let s : string = "hi " + c(); func c() : char { return 'a'; }"#);
    assert!(diags.is_empty(), "got: {diags:?}");
    let init = global_init(&ctx, unit, 0);
    let ExprKind::Binary { op, .. } = &ctx.expr(init).kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinOp::Concat);
    assert!(matches!(
        ctx.type_kind(ctx.expr(init).ty.unwrap()),
        TypeKind::String
    ));
}

#[test]
fn empty_array_literal_infers_from_declared_type() {
    let (ctx, unit, diags) = check("let xs : [int] = [];");
    assert!(diags.is_empty(), "got: {diags:?}");
    let init = global_init(&ctx, unit, 0);
    let ty = ctx.expr(init).ty.unwrap();
    let TypeKind::Array(elem) = ctx.type_kind(ty) else {
        panic!("expected an array type");
    };
    assert!(matches!(ctx.type_kind(*elem), TypeKind::Int));
}

#[test]
fn unconstrained_empty_array_fails_inference() {
    let diags = diag_ids("func f() { []; }");
    assert_eq!(diags, vec![DiagId::ExprFailedInfer]);
}

#[test]
fn heterogeneous_array_literal_is_diagnosed_per_element() {
    let diags = diag_ids(r#"let xs : [int] = [1, "two", 3];"#);
    assert_eq!(diags, vec![DiagId::UnexpectedElemOfTypeInArrLit]);
}

#[test]
fn undeclared_identifier() {
    let diags = diag_ids("func f() { y; }");
    assert_eq!(diags, vec![DiagId::UndeclaredId]);
}

#[test]
fn call_argument_count_is_checked() {
    let diags = diag_ids("func g(a : int) { } func f() { g(); }");
    assert_eq!(
        diags,
        vec![DiagId::CannotCallWithNoArgs, DiagId::DeclaredHereWithType]
    );

    let diags = diag_ids("func g(a : int) { } func f() { g(1, 2); }");
    assert_eq!(
        diags,
        vec![DiagId::TooManyArgsInFuncCall, DiagId::DeclaredHereWithType]
    );
}

#[test]
fn call_argument_types_are_checked() {
    let diags = diag_ids(r#"func g(a : int) { } func f() { g("x"); }"#);
    assert_eq!(
        diags,
        vec![DiagId::CannotCallFuncWithArgs, DiagId::DeclaredHereWithType]
    );
}

#[test]
fn builtins_resolve_by_name() {
    let diags = diag_ids("let s : string = intToString(3);");
    assert!(diags.is_empty(), "got: {diags:?}");
}

#[test]
fn calling_a_non_function_is_diagnosed() {
    let diags = diag_ids("let x : int = 0; func f() { x(); }");
    assert_eq!(diags, vec![DiagId::ExprIsntFunc]);
}

#[test]
fn let_bindings_are_not_assignable() {
    let diags = diag_ids("func f() { let a : int = 1; a = 2; }");
    assert_eq!(diags, vec![DiagId::UnassignableExpr]);

    let diags = diag_ids("func f() { var a : int = 1; a = 2; }");
    assert!(diags.is_empty(), "got: {diags:?}");
}

#[test]
fn assignment_type_mismatch() {
    let diags = diag_ids(r#"func f() { var a : int = 1; a = "s"; }"#);
    assert_eq!(diags, vec![DiagId::InvalidAssignment]);
}

#[test]
fn subscripting_arrays_and_strings() {
    let diags = diag_ids("func f(xs : [int]) : int { return xs[0]; }");
    assert!(diags.is_empty(), "got: {diags:?}");

    let diags = diag_ids(r#"func f(s : string) : char { return s[1]; }"#);
    assert!(diags.is_empty(), "got: {diags:?}");

    let diags = diag_ids(r#"func f(xs : [int]) : int { return xs["a"]; }"#);
    assert_eq!(diags, vec![DiagId::ArrSubInvalidTypes]);

    let diags = diag_ids("func f(x : int) : int { return x[0]; }");
    assert_eq!(diags, vec![DiagId::ArrSubInvalidTypes]);
}

#[test]
fn array_members_resolve_against_the_element_type() {
    let diags = diag_ids("func f(xs : mut [int]) { xs.append(1); xs.pop(); }");
    assert!(diags.is_empty(), "got: {diags:?}");

    let diags = diag_ids(r#"func f(xs : mut [int]) { xs.append("s"); }"#);
    assert_eq!(
        diags,
        vec![DiagId::CannotCallFuncWithArgs]
    );

    let diags = diag_ids("func f(xs : [int]) { xs.foo(); }");
    assert_eq!(diags, vec![DiagId::UnknownBuiltinMember]);
}

#[test]
fn string_members() {
    let diags = diag_ids("func f(s : string) : int { return s.length(); }");
    assert!(diags.is_empty(), "got: {diags:?}");
}

#[test]
fn builtin_member_must_be_called() {
    let diags = diag_ids("func f(xs : [int]) { xs.size; }");
    assert_eq!(diags, vec![DiagId::BuiltinMemberNotCalled]);
}

#[test]
fn return_statement_checks() {
    let diags = diag_ids("func f() : int { return; }");
    assert_eq!(diags, vec![DiagId::ReturnWithNoExpr]);

    let diags = diag_ids("func f() { return 3; }");
    assert_eq!(diags, vec![DiagId::UnexpectedReturnValue]);

    let diags = diag_ids(r#"func f() : int { return "s"; }"#);
    assert_eq!(diags, vec![DiagId::ReturnTypeMismatch]);
}

#[test]
fn arithmetic_requires_matching_numeric_operands() {
    let diags = diag_ids("let x : int = 1 + 2.0;");
    assert_eq!(diags, vec![DiagId::BinExprInvalidOperands]);

    let diags = diag_ids(r#"let x : bool = true && 1;"#);
    assert_eq!(diags, vec![DiagId::BinExprInvalidOperands]);
}

#[test]
fn ranking_comparisons_reject_bools_and_strings() {
    let diags = diag_ids("let x : bool = true < false;");
    assert_eq!(diags, vec![DiagId::BinExprInvalidOperands]);

    let diags = diag_ids(r#"let x : bool = "a" < "b";"#);
    assert_eq!(diags, vec![DiagId::BinExprInvalidOperands]);

    let diags = diag_ids("let x : bool = 'a' < 'b';");
    assert!(diags.is_empty(), "got: {diags:?}");
}

#[test]
fn equality_rejects_reference_types_too() {
    // No instruction compares strings or arrays, so the checker rejects
    // these outright instead of passing them on to code generation.
    let diags = diag_ids(r#"let x : bool = "a" == "b";"#);
    assert_eq!(diags, vec![DiagId::BinExprInvalidOperands]);

    let diags = diag_ids("let x : bool = [1] == [1];");
    assert_eq!(diags, vec![DiagId::BinExprInvalidOperands]);
}

#[test]
fn errors_do_not_cascade_into_parents() {
    // The undeclared identifier poisons the subtraction; only one report.
    let diags = diag_ids("func f() { let x : int = y - 1; }");
    assert_eq!(diags, vec![DiagId::UndeclaredId]);
}

#[test]
fn unary_operators() {
    let diags = diag_ids("let x : int = -3; let y : bool = !false; let z : int = +3;");
    assert!(diags.is_empty(), "got: {diags:?}");

    let diags = diag_ids(r#"let x : bool = !"s";"#);
    assert_eq!(diags, vec![DiagId::UnaryOpBadChildType]);
}

#[test]
fn finalized_types_contain_no_type_variables() {
    let (ctx, unit, diags) = check("let xs : [[int]] = [[], [1]];");
    assert!(diags.is_empty(), "got: {diags:?}");
    let init = global_init(&ctx, unit, 0);
    fn assert_concrete(ctx: &AstContext, e: ExprId) {
        let ty = ctx.expr(e).ty.expect("unset type after sema");
        assert!(!ctx.has_type_variable(ty), "type variable survived");
        for child in fox_ast::expr_children(ctx, e) {
            assert_concrete(ctx, child);
        }
    }
    assert_concrete(&ctx, init);
}
