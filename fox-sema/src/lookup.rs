use std::collections::HashMap;

use fox_ast::{CheckState, DeclId, Ident};

use crate::Sema;

/// One local scope: the body of a function (parameters) or a compound
/// statement. Declarations are entered as checking reaches them, so a name
/// only resolves to bindings introduced before the reference.
#[derive(Default)]
pub(crate) struct Scope {
    pub(crate) decls: HashMap<Ident, Vec<DeclId>>,
}

impl Sema<'_, '_> {
    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Enters a declaration into the innermost scope. A second declaration
    /// with the same identifier is marked as an illegal redeclaration and
    /// diagnosed by the caller.
    pub(crate) fn add_to_scope(&mut self, name: Ident, decl: DeclId) {
        self.scopes
            .last_mut()
            .expect("no active scope")
            .decls
            .entry(name)
            .or_default()
            .push(decl);
    }

    /// Unqualified lookup over the scope chain: innermost compound scopes,
    /// then the function's parameters, then the unit's globals, then the
    /// builtin table.
    ///
    /// A declaration in the `Checking` state is skipped but remembered; it is
    /// returned only when nothing else matched, which is what lets
    /// `func f(x: int) { var x : int = x; }` bind to the parameter while
    /// `let x : int = x;` is still caught as a self-referential initializer.
    pub(crate) fn unqualified_lookup(&self, name: Ident) -> Vec<DeclId> {
        let mut results: Vec<DeclId> = Vec::new();
        let mut checking_var: Option<DeclId> = None;

        let mut note = |decl: DeclId, results: &mut Vec<DeclId>| {
            if self.ctx.decl(decl).check_state == CheckState::Checking {
                checking_var.get_or_insert(decl);
            } else {
                results.push(decl);
            }
        };

        for scope in self.scopes.iter().rev() {
            if let Some(candidates) = scope.decls.get(&name) {
                for &decl in candidates {
                    note(decl, &mut results);
                }
                // Results found in a local scope win over everything outside.
                if !results.is_empty() {
                    break;
                }
            }
        }

        if results.is_empty() {
            if let Some(candidates) = self.unit_scope.get(&name) {
                for &decl in candidates {
                    note(decl, &mut results);
                }
            }
        }

        drop(note);

        if results.is_empty() {
            if let Some(decl) = checking_var {
                results.push(decl);
            }
        }

        if let Some(builtin) = self.ctx.lookup_builtin(name) {
            results.push(builtin);
        }

        if results.len() > 1 {
            self.remove_shadowed(&mut results);
        }
        results
    }

    /// Keeps only the highest-priority shadowing class: local non-parameter
    /// bindings beat parameters, which beat globals and builtins.
    fn remove_shadowed(&self, results: &mut Vec<DeclId>) {
        let locals: Vec<DeclId> = results
            .iter()
            .copied()
            .filter(|&d| self.ctx.decl(d).is_local_var())
            .collect();
        if !locals.is_empty() {
            *results = locals;
            return;
        }
        let params: Vec<DeclId> = results
            .iter()
            .copied()
            .filter(|&d| self.ctx.decl(d).is_param())
            .collect();
        if !params.is_empty() {
            *results = params;
        }
    }

    /// Drops candidates marked as illegal redeclarations; returns true if a
    /// single legal candidate remains.
    pub(crate) fn prune_illegal_redecls(&self, results: &mut Vec<DeclId>) -> bool {
        results.retain(|&d| !self.ctx.decl(d).illegal_redecl);
        results.len() == 1
    }
}
