#![forbid(unsafe_code)]

mod exprs;
mod lookup;
mod unify;

use std::collections::HashMap;

use fox_ast::{
    AstContext, AstNode, CheckState, DeclId, DeclKind, ExprId, Ident, StmtId, StmtKind, TypeId,
};
use fox_common::{DiagId, DiagnosticEngine, SourceRange};

use lookup::Scope;

/// Semantic analysis: name resolution, type checking through unification,
/// and finalization. Mutates the AST in place (resolves references, fills
/// type fields, rewrites `+` into concat, flags useless casts).
pub struct Sema<'a, 's> {
    ctx: &'a mut AstContext,
    diags: &'a mut DiagnosticEngine<'s>,
    /// Current binding of each type variable, indexed by the variable's id.
    type_vars: Vec<Option<TypeId>>,
    /// Top-level declarations of the unit under check.
    unit_scope: HashMap<Ident, Vec<DeclId>>,
    /// Innermost-last stack of local scopes.
    scopes: Vec<Scope>,
    /// Return type of the function whose body is being checked.
    fn_ret: Option<TypeId>,
    /// Set while the finalizer is muting diagnostics for an errored subtree.
    muted: bool,
}

/// Checks a whole unit. Diagnostics go through `diags`; the AST under `ctx`
/// is resolved and typed afterwards (or poisoned with error markers).
pub fn check_unit(ctx: &mut AstContext, diags: &mut DiagnosticEngine<'_>, unit: DeclId) {
    Sema {
        ctx,
        diags,
        type_vars: Vec::new(),
        unit_scope: HashMap::new(),
        scopes: Vec::new(),
        fn_ret: None,
        muted: false,
    }
    .run(unit);
}

impl Sema<'_, '_> {
    fn run(&mut self, unit: DeclId) {
        let decls = match &self.ctx.decl(unit).kind {
            DeclKind::Unit { decls, .. } => decls.clone(),
            _ => unreachable!("check_unit called on a non-unit declaration"),
        };

        self.build_unit_scope(&decls);
        for decl in decls {
            self.check_decl(decl);
        }
    }

    /// Registers every top-level declaration, diagnosing redeclarations.
    /// All globals are visible from every function body, whatever the order.
    fn build_unit_scope(&mut self, decls: &[DeclId]) {
        for &decl in decls {
            let Some(name) = self.ctx.decl(decl).name() else {
                continue;
            };
            let previous = self.unit_scope.get(&name).and_then(|v| v.first()).copied();
            if let Some(first) = previous {
                self.ctx.decl_mut(decl).illegal_redecl = true;
                self.report_redecl(name, decl, first);
            }
            self.unit_scope.entry(name).or_default().push(decl);
        }
    }

    fn report_redecl(&mut self, name: Ident, decl: DeclId, first: DeclId) {
        let name = self.ctx.ident_str(name).to_string();
        let range = self
            .ctx
            .decl(decl)
            .name_range()
            .unwrap_or(self.ctx.decl(decl).range);
        self.diags
            .report(
                DiagId::InvalidRedecl,
                range,
                format!("illegal redeclaration of '{name}'"),
            )
            .emit();
        if let Some(first_range) = self.ctx.decl(first).name_range() {
            self.diags
                .report(
                    DiagId::FirstDeclaredHere,
                    first_range,
                    format!("'{name}' is first declared here"),
                )
                .emit();
        }
    }

    fn check_decl(&mut self, decl: DeclId) {
        match self.ctx.decl(decl).kind {
            DeclKind::Var { .. } => self.check_var_decl(decl),
            DeclKind::Func { .. } => self.check_func_decl(decl),
            _ => unreachable!("unexpected top-level declaration kind"),
        }
    }

    /// The value type a reference to this declaration denotes, before any
    /// lvalue wrapping.
    pub(crate) fn value_type(&mut self, decl: DeclId) -> TypeId {
        match self.ctx.decl(decl).kind.clone() {
            DeclKind::Var { type_loc, .. } | DeclKind::Param { type_loc, .. } => type_loc.ty,
            DeclKind::Func { params, ret, .. } => {
                let ret_ty = ret.map(|t| t.ty).unwrap_or_else(|| self.ctx.void_type());
                let param_tys = params
                    .iter()
                    .map(|&p| match &self.ctx.decl(p).kind {
                        DeclKind::Param { type_loc, .. } => type_loc.ty,
                        _ => unreachable!("function parameter is not a ParamDecl"),
                    })
                    .collect();
                self.ctx.function_type(param_tys, ret_ty)
            }
            DeclKind::BuiltinFunc { .. } => self
                .ctx
                .builtin_decl_type(decl)
                .expect("builtin without a registered type"),
            DeclKind::Unit { .. } => unreachable!("units have no value type"),
        }
    }

    /// Marks the declaration `Checking`, checks its initializer against the
    /// declared type, then marks it `Checked`. The `Checking` window is what
    /// self-referential initializer detection keys on.
    fn check_var_decl(&mut self, decl: DeclId) {
        let (type_loc, init) = match &self.ctx.decl(decl).kind {
            DeclKind::Var { type_loc, init, .. } => (*type_loc, *init),
            _ => unreachable!(),
        };

        self.ctx.decl_mut(decl).check_state = CheckState::Checking;
        if let Some(init) = init {
            self.check_expr(init);
            let init_ty = self.expr_ty(init);
            if !self.unify(type_loc.ty, init_ty) && self.well_formed(&[type_loc.ty, init_ty]) {
                let init_range = self.ctx.expr(init).range;
                let found = self.type_str(init_ty);
                let wanted = self.type_str(type_loc.ty);
                self.diags
                    .report(
                        DiagId::InvalidVarInitType,
                        init_range,
                        format!(
                            "cannot use an expression of type '{found}' to initialize a \
                             variable of type '{wanted}'"
                        ),
                    )
                    .extra_range(type_loc.range)
                    .emit();
            }
            self.finalize_root(init);
        }
        self.ctx.decl_mut(decl).check_state = CheckState::Checked;
    }

    fn check_func_decl(&mut self, decl: DeclId) {
        let (params, ret, body) = match &self.ctx.decl(decl).kind {
            DeclKind::Func {
                params, ret, body, ..
            } => (params.clone(), *ret, *body),
            _ => unreachable!(),
        };
        self.ctx.decl_mut(decl).check_state = CheckState::Checked;

        // Parameter scope. Duplicate parameters are illegal redeclarations,
        // pruned from later lookups like duplicate globals are.
        self.push_scope();
        for &param in &params {
            let name = self.ctx.decl(param).name().expect("unnamed parameter");
            let first = self.scopes.last().and_then(|s| s.decls.get(&name)).and_then(|v| v.first()).copied();
            if let Some(first) = first {
                self.ctx.decl_mut(param).illegal_redecl = true;
                self.report_redecl(name, param, first);
            }
            self.ctx.decl_mut(param).check_state = CheckState::Checked;
            self.add_to_scope(name, param);
        }

        self.fn_ret = Some(ret.map(|t| t.ty).unwrap_or_else(|| self.ctx.void_type()));
        self.check_stmt(body);
        self.fn_ret = None;
        self.pop_scope();
    }

    /// Local variables register into the innermost scope before their
    /// initializer is checked, so lookups from inside the initializer see
    /// the declaration in its `Checking` state.
    fn check_local_var(&mut self, decl: DeclId) {
        let name = self.ctx.decl(decl).name().expect("unnamed variable");
        self.ctx.decl_mut(decl).check_state = CheckState::Checking;
        self.add_to_scope(name, decl);
        self.check_var_decl(decl);
    }

    fn check_stmt(&mut self, stmt: StmtId) {
        match self.ctx.stmt(stmt).kind.clone() {
            StmtKind::Null => {}
            StmtKind::Compound(nodes) => {
                self.push_scope();
                for node in nodes {
                    match node {
                        AstNode::Decl(decl) => self.check_local_var(decl),
                        AstNode::Stmt(inner) => self.check_stmt(inner),
                        AstNode::Expr(expr) => {
                            // Value in statement position: checked, discarded.
                            self.check_expr(expr);
                            self.finalize_root(expr);
                        }
                    }
                }
                self.pop_scope();
            }
            StmtKind::Condition {
                cond,
                then_body,
                else_body,
            } => {
                self.check_condition(cond);
                self.check_stmt(then_body);
                if let Some(else_body) = else_body {
                    self.check_stmt(else_body);
                }
            }
            StmtKind::While { cond, body } => {
                self.check_condition(cond);
                self.check_stmt(body);
            }
            StmtKind::Return(expr) => self.check_return(stmt, expr),
        }
    }

    /// Conditions must be numeric or boolean once fully checked.
    fn check_condition(&mut self, cond: ExprId) {
        self.check_expr(cond);
        self.finalize_root(cond);
        let ty = self.expr_ty(cond);
        if self.ctx.has_error(ty) {
            return;
        }
        if !self.ctx.is_numeric_or_bool(ty) {
            let range = self.ctx.expr(cond).range;
            let found = self.type_str(ty);
            self.diags
                .report(
                    DiagId::InvalidCondType,
                    range,
                    format!("condition must be numeric or boolean, found '{found}'"),
                )
                .emit();
        }
    }

    fn check_return(&mut self, stmt: StmtId, expr: Option<ExprId>) {
        let ret_ty = self.fn_ret.expect("return statement outside of a function");
        let is_void = ret_ty == self.ctx.void_type();
        match expr {
            Some(expr) => {
                self.check_expr(expr);
                let expr_ty = self.expr_ty(expr);
                if !self.unify(ret_ty, expr_ty) && self.well_formed(&[ret_ty, expr_ty]) {
                    let range = self.ctx.expr(expr).range;
                    if is_void {
                        self.diags
                            .report(
                                DiagId::UnexpectedReturnValue,
                                range,
                                "cannot return a value from a void function",
                            )
                            .emit();
                    } else {
                        let found = self.type_str(expr_ty);
                        let wanted = self.type_str(ret_ty);
                        self.diags
                            .report(
                                DiagId::ReturnTypeMismatch,
                                range,
                                format!(
                                    "cannot return a value of type '{found}' from a function \
                                     returning '{wanted}'"
                                ),
                            )
                            .emit();
                    }
                }
                self.finalize_root(expr);
            }
            None => {
                if !is_void {
                    let range = self.ctx.stmt(stmt).range;
                    let wanted = self.type_str(ret_ty);
                    self.diags
                        .report(
                            DiagId::ReturnWithNoExpr,
                            range,
                            format!("non-void function must return a value of type '{wanted}'"),
                        )
                        .emit();
                }
            }
        }
    }

    // ---- small helpers shared by the checking modules ----

    pub(crate) fn expr_ty(&self, expr: ExprId) -> TypeId {
        self.ctx
            .expr(expr)
            .ty
            .expect("expression checked out of order")
    }

    /// Diagnostics are skipped when an involved type is already poisoned.
    pub(crate) fn well_formed(&self, types: &[TypeId]) -> bool {
        types.iter().all(|&t| !self.ctx.has_error(t))
    }

    pub(crate) fn expr_range(&self, expr: ExprId) -> SourceRange {
        self.ctx.expr(expr).range
    }
}
