use fox_ast::{TypeId, TypeKind};

use crate::Sema;

impl Sema<'_, '_> {
    /// A fresh unification variable backed by this checker's binding table.
    pub(crate) fn fresh_type_variable(&mut self) -> TypeId {
        let index = self.type_vars.len() as u32;
        self.type_vars.push(None);
        self.ctx.type_variable(index)
    }

    /// Clears every binding. Called after each expression tree is finalized
    /// so variable indices stay small.
    pub(crate) fn reset_type_variables(&mut self) {
        self.type_vars.clear();
    }

    /// Follows variable bindings at the outermost level.
    pub(crate) fn resolve(&self, ty: TypeId) -> TypeId {
        let mut current = ty;
        loop {
            match self.ctx.type_kind(current) {
                TypeKind::Variable(index) => match self.type_vars[*index as usize] {
                    Some(bound) => current = bound,
                    None => return current,
                },
                _ => return current,
            }
        }
    }

    /// Bindings followed, then a single lvalue wrapper stripped. The form
    /// most checking rules care about.
    pub(crate) fn resolved_rvalue(&self, ty: TypeId) -> TypeId {
        let ty = self.resolve(ty);
        self.resolve(self.ctx.rvalue(ty))
    }

    /// Structural unification: succeeds iff the two types can be made equal
    /// by binding type variables. Lvalue wrappers are transparent, array and
    /// function constructors unify pointwise, and errors absorb silently.
    pub(crate) fn unify(&mut self, a: TypeId, b: TypeId) -> bool {
        self.unify_inner(a, b, false)
    }

    /// Unification under the cast comparator, which additionally treats any
    /// two of int, double, bool and char as equal.
    pub(crate) fn cast_unify(&mut self, a: TypeId, b: TypeId) -> bool {
        self.unify_inner(a, b, true)
    }

    fn unify_inner(&mut self, a: TypeId, b: TypeId, numeric_cast: bool) -> bool {
        let a = self.resolved_rvalue(a);
        let b = self.resolved_rvalue(b);
        if a == b {
            return true;
        }

        // Clones keep the borrow of the context short.
        let (ka, kb) = (self.ctx.type_kind(a).clone(), self.ctx.type_kind(b).clone());
        match (ka, kb) {
            (TypeKind::Variable(i), TypeKind::Variable(j)) if i == j => true,
            (TypeKind::Variable(i), _) => {
                self.type_vars[i as usize] = Some(b);
                true
            }
            (_, TypeKind::Variable(j)) => {
                self.type_vars[j as usize] = Some(a);
                true
            }
            (TypeKind::Error, _) | (_, TypeKind::Error) => true,
            (TypeKind::Array(ea), TypeKind::Array(eb)) => self.unify_inner(ea, eb, numeric_cast),
            (
                TypeKind::Function {
                    params: pa,
                    ret: ra,
                },
                TypeKind::Function {
                    params: pb,
                    ret: rb,
                },
            ) => {
                pa.len() == pb.len()
                    && pa
                        .iter()
                        .zip(&pb)
                        .all(|(&x, &y)| self.unify_inner(x, y, numeric_cast))
                    && self.unify_inner(ra, rb, numeric_cast)
            }
            (ka, kb) => {
                numeric_cast && is_castable_primitive(&ka) && is_castable_primitive(&kb)
            }
        }
    }

    /// Substitutes every bound variable; `None` if an unbound variable
    /// remains anywhere in the type.
    pub(crate) fn simplify(&mut self, ty: TypeId) -> Option<TypeId> {
        let resolved = self.resolve(ty);
        match self.ctx.type_kind(resolved).clone() {
            TypeKind::Variable(_) => None,
            TypeKind::Array(elem) => {
                let elem = self.simplify(elem)?;
                Some(self.ctx.array_type(elem))
            }
            TypeKind::LValue(inner) => {
                let inner = self.simplify(inner)?;
                Some(self.ctx.lvalue_type(inner))
            }
            TypeKind::Function { params, ret } => {
                let params = params
                    .into_iter()
                    .map(|p| self.simplify(p))
                    .collect::<Option<Vec<_>>>()?;
                let ret = self.simplify(ret)?;
                Some(self.ctx.function_type(params, ret))
            }
            _ => Some(resolved),
        }
    }

    /// Best-effort simplification for diagnostics: falls back to the input
    /// when an unbound variable remains.
    pub(crate) fn try_simplify(&mut self, ty: TypeId) -> TypeId {
        self.simplify(ty).unwrap_or(ty)
    }

    pub(crate) fn type_str(&mut self, ty: TypeId) -> String {
        let ty = self.try_simplify(ty);
        self.ctx.type_to_string(ty)
    }
}

fn is_castable_primitive(kind: &TypeKind) -> bool {
    matches!(
        kind,
        TypeKind::Int | TypeKind::Double | TypeKind::Bool | TypeKind::Char
    )
}

#[cfg(test)]
mod tests {
    use crate::Sema;
    use fox_ast::AstContext;
    use fox_common::{BufferConsumer, DiagnosticEngine, SourceManager};

    fn with_sema(run: impl FnOnce(&mut Sema<'_, '_>)) {
        let sm = SourceManager::new();
        let (consumer, _) = BufferConsumer::new();
        let mut diags = DiagnosticEngine::new(&sm, Box::new(consumer));
        let mut ctx = AstContext::new();
        let mut sema = Sema {
            ctx: &mut ctx,
            diags: &mut diags,
            type_vars: Vec::new(),
            unit_scope: std::collections::HashMap::new(),
            scopes: Vec::new(),
            fn_ret: None,
            muted: false,
        };
        run(&mut sema);
    }

    #[test]
    fn unification_binds_variables_through_constructors() {
        with_sema(|sema| {
            let int = sema.ctx.int_type();
            let var = sema.fresh_type_variable();
            let var_arr = sema.ctx.array_type(var);
            let int_arr = sema.ctx.array_type(int);

            assert!(sema.unify(var_arr, int_arr));
            assert_eq!(sema.simplify(var_arr), Some(int_arr));
        });
    }

    #[test]
    fn unification_looks_through_lvalues() {
        with_sema(|sema| {
            let int = sema.ctx.int_type();
            let lv = sema.ctx.lvalue_type(int);
            assert!(sema.unify(lv, int));
            assert!(!sema.unify(lv, sema.ctx.string_type()));
        });
    }

    #[test]
    fn cast_comparator_admits_value_primitives_only() {
        with_sema(|sema| {
            let int = sema.ctx.int_type();
            let boolean = sema.ctx.bool_type();
            let string = sema.ctx.string_type();
            assert!(sema.cast_unify(int, boolean));
            assert!(sema.cast_unify(sema.ctx.char_type(), sema.ctx.double_type()));
            assert!(!sema.cast_unify(string, int));
            assert!(!sema.unify(int, boolean));
        });
    }

    #[test]
    fn simplification_is_idempotent() {
        with_sema(|sema| {
            let int = sema.ctx.int_type();
            let var = sema.fresh_type_variable();
            let unbound = sema.fresh_type_variable();
            assert!(sema.unify(var, int));

            let lv_int = sema.ctx.lvalue_type(int);
            let arr_var = sema.ctx.array_type(var);
            let func = sema.ctx.function_type(vec![var, int], int);
            let arr_unbound = sema.ctx.array_type(unbound);

            for ty in [int, lv_int, arr_var, func, var] {
                let once = sema.simplify(ty).expect("bound type simplifies");
                assert_eq!(sema.simplify(once), Some(once));
            }
            // Free variables stay unsimplifiable however often you try.
            assert_eq!(sema.simplify(arr_unbound), None);
            assert_eq!(sema.simplify(arr_unbound), None);
        });
    }
}
