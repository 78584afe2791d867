use fox_ast::{
    expr_children, BinOp, BuiltinMember, CheckState, ExprId, ExprKind, Ident, TypeId, TypeKind,
    TypeLoc, UnOp,
};
use fox_common::{DiagId, SourceRange};

use crate::Sema;

impl Sema<'_, '_> {
    /// Post-order check: children first, then the node itself. A node whose
    /// rule fails is left untyped here and poisoned with the error type
    /// below, which is what suppresses diagnostics in its ancestors.
    pub(crate) fn check_expr(&mut self, expr: ExprId) {
        for child in expr_children(self.ctx, expr) {
            self.check_expr(child);
        }
        self.check_expr_node(expr);
        if self.ctx.expr(expr).ty.is_none() {
            let error = self.ctx.error_type();
            self.ctx.expr_mut(expr).ty = Some(error);
        }
    }

    fn set_ty(&mut self, expr: ExprId, ty: TypeId) {
        self.ctx.expr_mut(expr).ty = Some(ty);
    }

    /// Replaces a node that failed to resolve. Error expressions absorb
    /// every later check silently.
    fn error_expr(&mut self, expr: ExprId) {
        let error = self.ctx.error_type();
        let node = self.ctx.expr_mut(expr);
        node.kind = ExprKind::Error;
        node.ty = Some(error);
    }

    fn check_expr_node(&mut self, expr: ExprId) {
        match self.ctx.expr(expr).kind.clone() {
            ExprKind::IntLit(_) => self.set_ty(expr, self.ctx.int_type()),
            ExprKind::DoubleLit(_) => self.set_ty(expr, self.ctx.double_type()),
            ExprKind::BoolLit(_) => self.set_ty(expr, self.ctx.bool_type()),
            ExprKind::CharLit(_) => self.set_ty(expr, self.ctx.char_type()),
            ExprKind::StringLit(_) => self.set_ty(expr, self.ctx.string_type()),
            ExprKind::ArrayLit(elems) => self.check_array_lit(expr, &elems),
            ExprKind::UnresolvedDeclRef(name) => self.resolve_decl_ref(expr, name),
            ExprKind::DeclRef(_) => unreachable!("expression checked twice"),
            ExprKind::UnresolvedMemberRef {
                base,
                member,
                member_range,
            } => self.resolve_member_ref(expr, base, member, member_range),
            ExprKind::BuiltinMemberRef { .. } => unreachable!("expression checked twice"),
            ExprKind::Binary {
                op,
                op_range,
                lhs,
                rhs,
            } => self.check_binary(expr, op, op_range, lhs, rhs),
            ExprKind::Unary {
                op,
                op_range,
                child,
            } => self.check_unary(expr, op, op_range, child),
            ExprKind::Cast { child, target, .. } => self.check_cast(expr, child, target),
            ExprKind::Subscript { base, index } => self.check_subscript(expr, base, index),
            ExprKind::Call {
                callee,
                args,
                paren_range,
            } => self.check_call(expr, callee, &args, paren_range),
            ExprKind::Error => {}
        }
    }

    // ---- name resolution ----

    fn resolve_decl_ref(&mut self, expr: ExprId, name: Ident) {
        let range = self.expr_range(expr);
        let mut results = self.unqualified_lookup(name);

        if results.is_empty() {
            let text = self.ctx.ident_str(name).to_string();
            self.diags
                .report(
                    DiagId::UndeclaredId,
                    range,
                    format!("undeclared identifier '{text}'"),
                )
                .emit();
            self.error_expr(expr);
            return;
        }

        if results.len() > 1 {
            let candidates = results.clone();
            if !self.prune_illegal_redecls(&mut results) {
                let text = self.ctx.ident_str(name).to_string();
                self.diags
                    .report(
                        DiagId::AmbiguousRef,
                        range,
                        format!("reference to '{text}' is ambiguous"),
                    )
                    .emit();
                for candidate in candidates {
                    if let Some(name_range) = self.ctx.decl(candidate).name_range() {
                        self.diags
                            .report(
                                DiagId::PotentialCandidateHere,
                                name_range,
                                "potential candidate found here",
                            )
                            .emit();
                    }
                }
                self.error_expr(expr);
                return;
            }
        }

        let decl = results[0];
        if self.ctx.decl(decl).check_state == CheckState::Checking
            && (self.ctx.decl(decl).is_global_var() || self.ctx.decl(decl).is_local_var())
        {
            let text = self.ctx.ident_str(name).to_string();
            let decl_range = self.ctx.decl(decl).name_range();
            let mut report = self.diags.report(
                DiagId::VarInitSelfRef,
                range,
                format!("variable '{text}' used inside its own initial value"),
            );
            if let Some(decl_range) = decl_range {
                report = report.extra_range(decl_range);
            }
            report.emit();
            self.error_expr(expr);
            return;
        }

        let mut ty = self.value_type(decl);
        if !self.ctx.decl(decl).is_const() {
            ty = self.ctx.lvalue_type(ty);
        }
        self.ctx.expr_mut(expr).kind = ExprKind::DeclRef(decl);
        self.set_ty(expr, ty);
    }

    fn resolve_member_ref(
        &mut self,
        expr: ExprId,
        base: ExprId,
        member: Ident,
        member_range: SourceRange,
    ) {
        let base_ty = self.expr_ty(base);
        if self.ctx.has_error(base_ty) {
            self.error_expr(expr);
            return;
        }
        let base_rv = self.resolved_rvalue(base_ty);

        let (members, array_elem): (&[BuiltinMember], Option<TypeId>) =
            match self.ctx.type_kind(base_rv) {
                TypeKind::String => (&BuiltinMember::STRING_MEMBERS, None),
                TypeKind::Array(elem) => (&BuiltinMember::ARRAY_MEMBERS, Some(*elem)),
                _ => (&[], None),
            };

        let member_text = self.ctx.ident_str(member).to_string();
        let Some(found) = members
            .iter()
            .copied()
            .find(|m| m.member_name() == member_text)
        else {
            let base_str = self.type_str(base_ty);
            let base_range = self.expr_range(base);
            self.diags
                .report(
                    DiagId::UnknownBuiltinMember,
                    member_range,
                    format!("'{member_text}' is not a member of type '{base_str}'"),
                )
                .extra_range(base_range)
                .emit();
            self.error_expr(expr);
            return;
        };

        let int = self.ctx.int_type();
        let void = self.ctx.void_type();
        let ty = match found {
            BuiltinMember::StrLength | BuiltinMember::StrNumBytes => {
                self.ctx.function_type(vec![], int)
            }
            BuiltinMember::ArrSize => self.ctx.function_type(vec![], int),
            BuiltinMember::ArrPop | BuiltinMember::ArrReset => self.ctx.function_type(vec![], void),
            BuiltinMember::ArrAppend => {
                let elem = array_elem.expect("array member on a non-array");
                self.ctx.function_type(vec![elem], void)
            }
            BuiltinMember::ArrFront | BuiltinMember::ArrBack => {
                let elem = array_elem.expect("array member on a non-array");
                self.ctx.function_type(vec![], elem)
            }
        };
        self.ctx.expr_mut(expr).kind = ExprKind::BuiltinMemberRef {
            base,
            member: found,
        };
        self.set_ty(expr, ty);
    }

    // ---- literals ----

    fn check_array_lit(&mut self, expr: ExprId, elems: &[ExprId]) {
        if elems.is_empty() {
            let var = self.fresh_type_variable();
            let ty = self.ctx.array_type(var);
            self.set_ty(expr, ty);
            return;
        }

        let whole_range = self.expr_range(expr);
        let mut proposed: Option<TypeId> = None;
        let mut valid = true;
        for &elem in elems {
            let elem_ty = self.expr_ty(elem);
            let elem_rv = self.resolved_rvalue(elem_ty);

            // Functions are not first-class values yet.
            if matches!(self.ctx.type_kind(elem_rv), TypeKind::Function { .. }) {
                let elem_range = self.expr_range(elem);
                self.diags
                    .report(
                        DiagId::FuncTypeInArrLit,
                        elem_range,
                        "function values cannot appear inside an array literal",
                    )
                    .extra_range(whole_range)
                    .emit();
                valid = false;
                continue;
            }
            if self.ctx.has_error(elem_rv) {
                valid = false;
                continue;
            }

            match proposed {
                None => proposed = Some(elem_rv),
                Some(p) => {
                    if !self.unify(p, elem_rv) {
                        let found = self.type_str(elem_rv);
                        let wanted = self.type_str(p);
                        let elem_range = self.expr_range(elem);
                        self.diags
                            .report(
                                DiagId::UnexpectedElemOfTypeInArrLit,
                                elem_range,
                                format!(
                                    "unexpected element of type '{found}' in an array literal \
                                     of '{wanted}'"
                                ),
                            )
                            .extra_range(whole_range)
                            .emit();
                    }
                }
            }
        }

        if valid {
            let elem_ty = proposed.expect("non-empty literal with no proposed type");
            let ty = self.ctx.array_type(elem_ty);
            self.set_ty(expr, ty);
        }
    }

    // ---- operators ----

    fn check_binary(
        &mut self,
        expr: ExprId,
        op: BinOp,
        op_range: SourceRange,
        lhs: ExprId,
        rhs: ExprId,
    ) {
        if op.is_assignment() {
            self.check_assignment(expr, op_range, lhs, rhs);
            return;
        }

        let lhs_ty = self.expr_ty(lhs);
        let rhs_ty = self.expr_ty(rhs);
        if !self.well_formed(&[lhs_ty, rhs_ty]) {
            return;
        }

        match op {
            BinOp::Add if self.can_concat(lhs_ty, rhs_ty) => {
                // `+` on strings and chars is concatenation.
                if let ExprKind::Binary { op, .. } = &mut self.ctx.expr_mut(expr).kind {
                    *op = BinOp::Concat;
                }
                self.set_ty(expr, self.ctx.string_type());
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                if self.unify(lhs_ty, rhs_ty)
                    && self.is_numeric_resolved(lhs_ty)
                    && self.is_numeric_resolved(rhs_ty)
                {
                    let ty = self.resolved_rvalue(lhs_ty);
                    self.set_ty(expr, ty);
                } else {
                    self.diag_invalid_operands(op, op_range, expr, lhs, rhs);
                }
            }
            BinOp::Eq | BinOp::NEq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if !self.unify(lhs_ty, rhs_ty) {
                    self.diag_invalid_operands(op, op_range, expr, lhs, rhs);
                    return;
                }
                // Comparisons operate on value primitives; ranking ones
                // additionally exclude booleans. Strings and arrays are
                // rejected even for equality: the instruction set only
                // compares the int and double domains.
                let ok = [lhs_ty, rhs_ty].iter().all(|&t| {
                    let kind = self.ctx.type_kind(self.resolved_rvalue(t));
                    match kind {
                        TypeKind::Int | TypeKind::Double | TypeKind::Char => true,
                        TypeKind::Bool => !op.is_ranking(),
                        _ => false,
                    }
                });
                if ok {
                    self.set_ty(expr, self.ctx.bool_type());
                } else {
                    self.diag_invalid_operands(op, op_range, expr, lhs, rhs);
                }
            }
            BinOp::LAnd | BinOp::LOr => {
                let bool_ty = self.ctx.bool_type();
                let lhs_ok = self.resolved_rvalue(lhs_ty) == bool_ty;
                let rhs_ok = self.resolved_rvalue(rhs_ty) == bool_ty;
                if lhs_ok && rhs_ok {
                    self.set_ty(expr, bool_ty);
                } else {
                    self.diag_invalid_operands(op, op_range, expr, lhs, rhs);
                }
            }
            BinOp::Concat | BinOp::Assign => unreachable!("handled above"),
        }
    }

    fn is_numeric_resolved(&self, ty: TypeId) -> bool {
        self.ctx.is_numeric(self.resolved_rvalue(ty))
    }

    fn can_concat(&self, lhs_ty: TypeId, rhs_ty: TypeId) -> bool {
        let char_or_string = |ty: TypeId| {
            matches!(
                self.ctx.type_kind(self.resolved_rvalue(ty)),
                TypeKind::Char | TypeKind::String
            )
        };
        char_or_string(lhs_ty) && char_or_string(rhs_ty)
    }

    fn diag_invalid_operands(
        &mut self,
        op: BinOp,
        op_range: SourceRange,
        expr: ExprId,
        lhs: ExprId,
        rhs: ExprId,
    ) {
        let lhs_str = {
            let t = self.expr_ty(lhs);
            self.type_str(t)
        };
        let rhs_str = {
            let t = self.expr_ty(rhs);
            self.type_str(t)
        };
        let expr_range = self.expr_range(expr);
        self.diags
            .report(
                DiagId::BinExprInvalidOperands,
                op_range,
                format!(
                    "cannot apply operator '{}' to operands of type '{lhs_str}' and '{rhs_str}'",
                    op.sign()
                ),
            )
            .extra_range(expr_range)
            .emit();
    }

    fn check_assignment(&mut self, expr: ExprId, op_range: SourceRange, lhs: ExprId, rhs: ExprId) {
        let lhs_ty = self.expr_ty(lhs);
        let rhs_ty = self.expr_ty(rhs);
        if !self.well_formed(&[lhs_ty, rhs_ty]) {
            return;
        }

        let lhs_range = self.expr_range(lhs);
        if !self.ctx.is_assignable(self.resolve(lhs_ty)) {
            self.diags
                .report(
                    DiagId::UnassignableExpr,
                    lhs_range,
                    "this expression cannot be assigned to",
                )
                .extra_range(op_range)
                .emit();
            return;
        }

        if !self.unify(lhs_ty, rhs_ty) {
            let found = self.type_str(rhs_ty);
            let wanted = self.type_str(lhs_ty);
            let rhs_range = self.expr_range(rhs);
            self.diags
                .report(
                    DiagId::InvalidAssignment,
                    rhs_range,
                    format!("cannot assign a value of type '{found}' to type '{wanted}'"),
                )
                .extra_range(lhs_range)
                .emit();
            return;
        }

        let ty = self.resolved_rvalue(lhs_ty);
        self.set_ty(expr, ty);
    }

    fn check_unary(&mut self, expr: ExprId, op: UnOp, op_range: SourceRange, child: ExprId) {
        let child_ty = self.expr_ty(child);
        if !self.well_formed(&[child_ty]) {
            return;
        }

        let ok = match op {
            UnOp::Not => self.resolved_rvalue(child_ty) == self.ctx.bool_type(),
            UnOp::Minus | UnOp::Plus => self.is_numeric_resolved(child_ty),
        };
        if !ok {
            let found = self.type_str(child_ty);
            let child_range = self.expr_range(child);
            self.diags
                .report(
                    DiagId::UnaryOpBadChildType,
                    op_range,
                    format!(
                        "cannot apply unary operator '{}' to an expression of type '{found}'",
                        op.sign()
                    ),
                )
                .extra_range(child_range)
                .emit();
            return;
        }

        let ty = match op {
            UnOp::Not => self.ctx.bool_type(),
            UnOp::Minus | UnOp::Plus => self.resolved_rvalue(child_ty),
        };
        self.set_ty(expr, ty);
    }

    fn check_cast(&mut self, expr: ExprId, child: ExprId, target: TypeLoc) {
        let child_ty = self.expr_ty(child);
        if !self.well_formed(&[child_ty]) {
            return;
        }
        let goal = target.ty;

        let child_simplified = {
            let rv = self.resolved_rvalue(child_ty);
            self.try_simplify(rv)
        };
        let child_range = self.expr_range(child);
        if child_simplified == goal {
            // Identity cast: kept, but flagged.
            if let ExprKind::Cast { useless, .. } = &mut self.ctx.expr_mut(expr).kind {
                *useless = true;
            }
            let goal_str = self.type_str(goal);
            self.diags
                .report(
                    DiagId::UselessRedundantCast,
                    target.range,
                    format!("useless cast: the expression is already of type '{goal_str}'"),
                )
                .extra_range(child_range)
                .emit();
            self.set_ty(expr, goal);
            return;
        }

        if self.cast_unify(child_ty, goal) {
            self.set_ty(expr, goal);
        } else {
            let child_str = self.type_str(child_ty);
            let goal_str = self.type_str(goal);
            self.diags
                .report(
                    DiagId::InvalidExplicitCast,
                    target.range,
                    format!("cannot cast an expression of type '{child_str}' to '{goal_str}'"),
                )
                .extra_range(child_range)
                .emit();
        }
    }

    fn check_subscript(&mut self, expr: ExprId, base: ExprId, index: ExprId) {
        let base_ty = self.expr_ty(base);
        let index_ty = self.expr_ty(index);
        if !self.well_formed(&[base_ty, index_ty]) {
            return;
        }

        let base_rv = self.resolved_rvalue(base_ty);
        let elem = match self.ctx.type_kind(base_rv) {
            TypeKind::Array(elem) => *elem,
            TypeKind::String => self.ctx.char_type(),
            _ => {
                self.diag_invalid_subscript(base, index, /*base_at_fault=*/ true);
                return;
            }
        };

        if self.resolved_rvalue(index_ty) != self.ctx.int_type() {
            self.diag_invalid_subscript(base, index, /*base_at_fault=*/ false);
            return;
        }

        // Subscripting an assignable base yields an assignable element.
        let ty = if self.ctx.is_assignable(self.resolve(base_ty)) {
            self.ctx.lvalue_type(elem)
        } else {
            elem
        };
        self.set_ty(expr, ty);
    }

    fn diag_invalid_subscript(&mut self, base: ExprId, index: ExprId, base_at_fault: bool) {
        let base_str = {
            let t = self.expr_ty(base);
            self.type_str(t)
        };
        let index_str = {
            let t = self.expr_ty(index);
            self.type_str(t)
        };
        let (primary, extra) = if base_at_fault {
            (self.expr_range(base), self.expr_range(index))
        } else {
            (self.expr_range(index), self.expr_range(base))
        };
        self.diags
            .report(
                DiagId::ArrSubInvalidTypes,
                primary,
                format!("invalid subscript: base has type '{base_str}', index has type '{index_str}'"),
            )
            .extra_range(extra)
            .emit();
    }

    // ---- calls ----

    fn check_call(&mut self, expr: ExprId, callee: ExprId, args: &[ExprId], paren_range: SourceRange) {
        let callee_ty = self.expr_ty(callee);
        if !self.well_formed(&[callee_ty]) {
            return;
        }

        let callee_rv = self.resolved_rvalue(callee_ty);
        let TypeKind::Function { params, ret } = self.ctx.type_kind(callee_rv).clone() else {
            let found = self.type_str(callee_ty);
            let callee_range = self.expr_range(callee);
            self.diags
                .report(
                    DiagId::ExprIsntFunc,
                    callee_range,
                    format!("expression of type '{found}' is not a function"),
                )
                .emit();
            return;
        };

        if args.len() != params.len() {
            self.diag_argc_mismatch(callee, args.len(), params.len());
            return;
        }

        let mut ok = true;
        for (&param, &arg) in params.iter().zip(args) {
            let arg_ty = self.expr_ty(arg);
            if !self.unify(param, arg_ty) {
                ok = false;
            }
        }
        if !ok {
            let name = self.callee_name(callee);
            let args_str = args
                .iter()
                .map(|&a| {
                    let t = self.expr_ty(a);
                    self.type_str(t)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let callee_range = self.expr_range(callee);
            self.diags
                .report(
                    DiagId::CannotCallFuncWithArgs,
                    callee_range,
                    format!("cannot call '{name}' with arguments of type ({args_str})"),
                )
                .extra_range(paren_range)
                .emit();
            self.note_declared_here(callee);
            return;
        }

        self.set_ty(expr, ret);
    }

    fn diag_argc_mismatch(&mut self, callee: ExprId, provided: usize, expected: usize) {
        let name = self.callee_name(callee);
        let (id, message) = if provided == 0 {
            (
                DiagId::CannotCallWithNoArgs,
                format!("'{name}' cannot be called with no arguments"),
            )
        } else if provided < expected {
            (
                DiagId::NotEnoughArgsInFuncCall,
                format!("too few arguments in call to '{name}'"),
            )
        } else {
            (
                DiagId::TooManyArgsInFuncCall,
                format!("too many arguments in call to '{name}'"),
            )
        };
        let callee_range = self.expr_range(callee);
        self.diags.report(id, callee_range, message).emit();
        self.note_declared_here(callee);
    }

    fn callee_name(&self, callee: ExprId) -> String {
        match &self.ctx.expr(callee).kind {
            ExprKind::DeclRef(decl) => match self.ctx.decl(*decl).name() {
                Some(name) => self.ctx.ident_str(name).to_string(),
                None => match &self.ctx.decl(*decl).kind {
                    fox_ast::DeclKind::BuiltinFunc { kind } => kind.name().to_string(),
                    _ => "<anonymous>".to_string(),
                },
            },
            ExprKind::BuiltinMemberRef { member, .. } => member.member_name().to_string(),
            _ => "<expression>".to_string(),
        }
    }

    fn note_declared_here(&mut self, callee: ExprId) {
        let ExprKind::DeclRef(decl) = self.ctx.expr(callee).kind else {
            return;
        };
        let Some(name_range) = self.ctx.decl(decl).name_range() else {
            return;
        };
        let name = self.callee_name(callee);
        let ty = self.value_type(decl);
        let ty_str = self.type_str(ty);
        self.diags
            .report(
                DiagId::DeclaredHereWithType,
                name_range,
                format!("'{name}' declared here with type '{ty_str}'"),
            )
            .emit();
    }

    // ---- finalization ----

    /// Simplifies every type in the tree, diagnosing inference failures.
    /// Bindings do not outlive the tree they were created for.
    pub(crate) fn finalize_root(&mut self, expr: ExprId) {
        self.demote_uncalled_member_ref(expr);
        self.finalize_expr(expr);
        self.reset_type_variables();
    }

    fn finalize_expr(&mut self, expr: ExprId) {
        let ty = self.expr_ty(expr);
        let needs_mute;
        match self.simplify(ty) {
            Some(simplified) => {
                self.set_ty(expr, simplified);
                needs_mute = self.ctx.has_error(simplified);
            }
            None => {
                // A free type variable survived unification.
                let range = self.expr_range(expr);
                self.diags
                    .report(
                        DiagId::ExprFailedInfer,
                        range,
                        "failed to infer the type of this expression",
                    )
                    .emit();
                let error = self.ctx.error_type();
                self.set_ty(expr, error);
                needs_mute = true;
            }
        }

        // The first expression that fails mutes diagnostics for its whole
        // subtree, and unmutes when the walk leaves it.
        let became_muter = needs_mute && !self.muted;
        if became_muter {
            self.muted = true;
            self.diags.set_ignore_all(true);
        }

        let callee = match &self.ctx.expr(expr).kind {
            ExprKind::Call { callee, .. } => Some(*callee),
            _ => None,
        };
        for child in expr_children(self.ctx, expr) {
            if Some(child) != callee {
                self.demote_uncalled_member_ref(child);
            }
            self.finalize_expr(child);
        }

        if became_muter {
            self.muted = false;
            self.diags.set_ignore_all(false);
        }
    }

    /// Builtin members are not first-class: a reference that is not the
    /// callee of a call is demoted to an error expression.
    fn demote_uncalled_member_ref(&mut self, expr: ExprId) {
        if !matches!(self.ctx.expr(expr).kind, ExprKind::BuiltinMemberRef { .. }) {
            return;
        }
        let range = self.expr_range(expr);
        self.diags
            .report(
                DiagId::BuiltinMemberNotCalled,
                range,
                "builtin members must be called immediately",
            )
            .emit();
        self.error_expr(expr);
    }
}
