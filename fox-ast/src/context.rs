use std::collections::HashMap;

use fox_common::SourceRange;
use string_interner::DefaultStringInterner;

use crate::ast::{
    CheckState, Decl, DeclId, DeclKind, Expr, ExprId, ExprKind, Stmt, StmtId, StmtKind,
};
use crate::builtins::BuiltinKind;
use crate::types::{TypeId, TypeKind};

/// An interned identifier. Two identifiers are equal iff their symbols are.
pub type Ident = string_interner::DefaultSymbol;

struct BuiltinEntry {
    name: Ident,
    decl: DeclId,
    ty: TypeId,
}

/// Centerpiece of one compilation: owns the node arenas, the deduplicated
/// types, the identifier interner and the builtin table.
///
/// Nodes and types are addressed by id; `reset` invalidates every id handed
/// out before it.
pub struct AstContext {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    decls: Vec<Decl>,

    types: Vec<TypeKind>,
    array_types: HashMap<TypeId, TypeId>,
    lvalue_types: HashMap<TypeId, TypeId>,
    function_types: HashMap<(Vec<TypeId>, TypeId), TypeId>,

    interner: DefaultStringInterner,
    builtins: Vec<BuiltinEntry>,
    unit: Option<DeclId>,
}

impl AstContext {
    pub fn new() -> Self {
        let mut ctx = Self {
            exprs: Vec::new(),
            stmts: Vec::new(),
            decls: Vec::new(),
            types: Vec::new(),
            array_types: HashMap::new(),
            lvalue_types: HashMap::new(),
            function_types: HashMap::new(),
            interner: DefaultStringInterner::new(),
            builtins: Vec::new(),
            unit: None,
        };
        ctx.seed();
        ctx
    }

    /// Frees the whole AST. Every id obtained before the call is invalidated.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn seed(&mut self) {
        self.types = vec![
            TypeKind::Int,
            TypeKind::Double,
            TypeKind::Bool,
            TypeKind::Char,
            TypeKind::String,
            TypeKind::Void,
            TypeKind::Error,
        ];
        debug_assert_eq!(self.types.len(), TypeId::NUM_SEEDED);
        self.register_builtins();
    }

    // ---- identifiers ----

    pub fn ident(&mut self, text: &str) -> Ident {
        self.interner.get_or_intern(text)
    }

    pub fn ident_str(&self, ident: Ident) -> &str {
        self.interner
            .resolve(ident)
            .expect("identifier from another context")
    }

    // ---- node arenas ----

    pub fn alloc_expr(&mut self, kind: ExprKind, range: SourceRange) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expr { kind, range, ty: None });
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn alloc_stmt(&mut self, kind: StmtKind, range: SourceRange) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Stmt { kind, range });
        id
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.0 as usize]
    }

    pub fn alloc_decl(&mut self, kind: DeclKind, range: SourceRange) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.decls.push(Decl {
            kind,
            range,
            check_state: CheckState::Unchecked,
            illegal_redecl: false,
        });
        id
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.0 as usize]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.0 as usize]
    }

    pub fn set_unit(&mut self, unit: DeclId) {
        debug_assert!(matches!(self.decl(unit).kind, DeclKind::Unit { .. }));
        self.unit = Some(unit);
    }

    pub fn unit(&self) -> Option<DeclId> {
        self.unit
    }

    // ---- types ----

    pub fn type_kind(&self, ty: TypeId) -> &TypeKind {
        &self.types[ty.0 as usize]
    }

    pub fn int_type(&self) -> TypeId {
        TypeId::INT
    }

    pub fn double_type(&self) -> TypeId {
        TypeId::DOUBLE
    }

    pub fn bool_type(&self) -> TypeId {
        TypeId::BOOL
    }

    pub fn char_type(&self) -> TypeId {
        TypeId::CHAR
    }

    pub fn string_type(&self) -> TypeId {
        TypeId::STRING
    }

    pub fn void_type(&self) -> TypeId {
        TypeId::VOID
    }

    pub fn error_type(&self) -> TypeId {
        TypeId::ERROR
    }

    /// `[elem]`, deduplicated by element type.
    pub fn array_type(&mut self, elem: TypeId) -> TypeId {
        if let Some(&existing) = self.array_types.get(&elem) {
            return existing;
        }
        let id = self.push_type(TypeKind::Array(elem));
        self.array_types.insert(elem, id);
        id
    }

    /// Wraps `inner` to mark it assignable. `inner` must not be an lvalue
    /// itself; lvalues never nest.
    pub fn lvalue_type(&mut self, inner: TypeId) -> TypeId {
        debug_assert!(
            !matches!(self.type_kind(inner), TypeKind::LValue(_)),
            "lvalues cannot nest"
        );
        if let Some(&existing) = self.lvalue_types.get(&inner) {
            return existing;
        }
        let id = self.push_type(TypeKind::LValue(inner));
        self.lvalue_types.insert(inner, id);
        id
    }

    pub fn function_type(&mut self, params: Vec<TypeId>, ret: TypeId) -> TypeId {
        let key = (params, ret);
        if let Some(&existing) = self.function_types.get(&key) {
            return existing;
        }
        let (params, ret) = key;
        let id = self.push_type(TypeKind::Function {
            params: params.clone(),
            ret,
        });
        self.function_types.insert((params, ret), id);
        id
    }

    /// A fresh unification variable. Not deduplicated; Sema owns the binding
    /// table that gives the index meaning.
    pub fn type_variable(&mut self, index: u32) -> TypeId {
        self.push_type(TypeKind::Variable(index))
    }

    fn push_type(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(kind);
        id
    }

    // ---- type predicates and accessors ----

    /// Int or Double, looking through an lvalue wrapper.
    pub fn is_numeric(&self, ty: TypeId) -> bool {
        matches!(
            self.type_kind(self.rvalue(ty)),
            TypeKind::Int | TypeKind::Double
        )
    }

    pub fn is_numeric_or_bool(&self, ty: TypeId) -> bool {
        matches!(
            self.type_kind(self.rvalue(ty)),
            TypeKind::Int | TypeKind::Double | TypeKind::Bool
        )
    }

    /// True iff the outermost constructor is an lvalue.
    pub fn is_assignable(&self, ty: TypeId) -> bool {
        matches!(self.type_kind(ty), TypeKind::LValue(_))
    }

    /// Strips a single lvalue wrapper, if present.
    pub fn rvalue(&self, ty: TypeId) -> TypeId {
        match self.type_kind(ty) {
            TypeKind::LValue(inner) => *inner,
            _ => ty,
        }
    }

    /// True iff the type contains an error anywhere.
    pub fn has_error(&self, ty: TypeId) -> bool {
        match self.type_kind(ty) {
            TypeKind::Error => true,
            TypeKind::Array(elem) | TypeKind::LValue(elem) => self.has_error(*elem),
            TypeKind::Function { params, ret } => {
                params.iter().any(|&p| self.has_error(p)) || self.has_error(*ret)
            }
            _ => false,
        }
    }

    pub fn has_type_variable(&self, ty: TypeId) -> bool {
        match self.type_kind(ty) {
            TypeKind::Variable(_) => true,
            TypeKind::Array(elem) | TypeKind::LValue(elem) => self.has_type_variable(*elem),
            TypeKind::Function { params, ret } => {
                params.iter().any(|&p| self.has_type_variable(p)) || self.has_type_variable(*ret)
            }
            _ => false,
        }
    }

    /// Whether values of the type live on the heap; decides between the
    /// value-array and ref-array allocation instructions.
    pub fn is_reference_type(&self, ty: TypeId) -> bool {
        matches!(
            self.type_kind(self.rvalue(ty)),
            TypeKind::String | TypeKind::Array(_) | TypeKind::Function { .. }
        )
    }

    /// User-facing rendering used by diagnostics.
    pub fn type_to_string(&self, ty: TypeId) -> String {
        match self.type_kind(ty) {
            TypeKind::Int => "int".to_string(),
            TypeKind::Double => "double".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Char => "char".to_string(),
            TypeKind::String => "string".to_string(),
            TypeKind::Void => "void".to_string(),
            TypeKind::Array(elem) => format!("[{}]", self.type_to_string(*elem)),
            TypeKind::LValue(inner) => self.type_to_string(*inner),
            TypeKind::Function { params, ret } => {
                let params = params
                    .iter()
                    .map(|&p| self.type_to_string(p))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({}) -> {}", params, self.type_to_string(*ret))
            }
            TypeKind::Variable(index) => format!("$T{index}"),
            TypeKind::Error => "<error>".to_string(),
        }
    }

    // ---- builtins ----

    /// The signature of a name-resolvable builtin. Array builtins are generic
    /// and only reachable through member syntax, so they have no entry here.
    fn builtin_signature(&mut self, kind: BuiltinKind) -> Option<(Vec<TypeId>, TypeId)> {
        let int = self.int_type();
        let double = self.double_type();
        let boolean = self.bool_type();
        let ch = self.char_type();
        let string = self.string_type();
        Some(match kind {
            BuiltinKind::IntToString => (vec![int], string),
            BuiltinKind::DoubleToString => (vec![double], string),
            BuiltinKind::BoolToString => (vec![boolean], string),
            BuiltinKind::CharToString => (vec![ch], string),
            BuiltinKind::StrConcat => (vec![string, string], string),
            BuiltinKind::CharConcat => (vec![ch, ch], string),
            BuiltinKind::GetChar => (vec![string, int], ch),
            BuiltinKind::StrNumBytes => (vec![string], int),
            BuiltinKind::StrLength => (vec![string], int),
            BuiltinKind::ArrAppend
            | BuiltinKind::ArrPop
            | BuiltinKind::ArrSize
            | BuiltinKind::ArrGet
            | BuiltinKind::ArrSet
            | BuiltinKind::ArrFront
            | BuiltinKind::ArrBack
            | BuiltinKind::ArrReset => return None,
        })
    }

    fn register_builtins(&mut self) {
        for kind in BuiltinKind::ALL {
            let Some((params, ret)) = self.builtin_signature(kind) else {
                continue;
            };
            let ty = self.function_type(params, ret);
            let name = self.ident(kind.name());
            let decl = self.alloc_decl(DeclKind::BuiltinFunc { kind }, SourceRange::invalid());
            self.decl_mut(decl).check_state = CheckState::Checked;
            self.builtins.push(BuiltinEntry { name, decl, ty });
        }
    }

    pub fn lookup_builtin(&self, name: Ident) -> Option<DeclId> {
        self.builtins
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.decl)
    }

    /// Type of a name-resolvable builtin's declaration.
    pub fn builtin_decl_type(&self, decl: DeclId) -> Option<TypeId> {
        self.builtins
            .iter()
            .find(|entry| entry.decl == decl)
            .map(|entry| entry.ty)
    }
}

impl Default for AstContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The direct child expressions of an expression, in source order.
pub fn expr_children(ctx: &AstContext, id: crate::ExprId) -> Vec<crate::ExprId> {
    match &ctx.expr(id).kind {
        ExprKind::ArrayLit(elems) => elems.clone(),
        ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        ExprKind::Unary { child, .. } => vec![*child],
        ExprKind::Cast { child, .. } => vec![*child],
        ExprKind::Subscript { base, index } => vec![*base, *index],
        ExprKind::Call { callee, args, .. } => {
            let mut out = vec![*callee];
            out.extend(args.iter().copied());
            out
        }
        ExprKind::UnresolvedMemberRef { base, .. } | ExprKind::BuiltinMemberRef { base, .. } => {
            vec![*base]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_types_are_deduplicated() {
        let mut ctx = AstContext::new();
        let a = ctx.array_type(ctx.int_type());
        let b = ctx.array_type(ctx.int_type());
        assert_eq!(a, b);
        let c = ctx.array_type(ctx.double_type());
        assert_ne!(a, c);

        let lv1 = ctx.lvalue_type(ctx.int_type());
        let lv2 = ctx.lvalue_type(ctx.int_type());
        assert_eq!(lv1, lv2);

        let int = ctx.int_type();
        let f1 = ctx.function_type(vec![int], int);
        let f2 = ctx.function_type(vec![int], int);
        assert_eq!(f1, f2);
    }

    #[test]
    fn type_predicates() {
        let mut ctx = AstContext::new();
        assert!(ctx.is_numeric(ctx.int_type()));
        assert!(ctx.is_numeric(ctx.double_type()));
        assert!(!ctx.is_numeric(ctx.bool_type()));
        assert!(ctx.is_numeric_or_bool(ctx.bool_type()));

        let lv = ctx.lvalue_type(ctx.int_type());
        assert!(ctx.is_assignable(lv));
        assert!(ctx.is_numeric(lv));
        assert_eq!(ctx.rvalue(lv), ctx.int_type());

        let err_arr = ctx.array_type(ctx.error_type());
        assert!(ctx.has_error(err_arr));
    }

    #[test]
    fn builtin_lookup_covers_public_surface() {
        let mut ctx = AstContext::new();
        let concat = ctx.ident("strConcat");
        let decl = ctx.lookup_builtin(concat).expect("strConcat is public");
        let ty = ctx.builtin_decl_type(decl).unwrap();
        assert!(matches!(ctx.type_kind(ty), TypeKind::Function { .. }));

        // Generic array builtins are member-only.
        let append = ctx.ident("arrAppend");
        assert!(ctx.lookup_builtin(append).is_none());
    }

    #[test]
    fn reset_reseeds_the_context() {
        let mut ctx = AstContext::new();
        let before = ctx.array_type(ctx.int_type());
        ctx.reset();
        let after = ctx.array_type(ctx.int_type());
        assert_eq!(before, after);
        assert!(ctx.unit().is_none());
    }
}
