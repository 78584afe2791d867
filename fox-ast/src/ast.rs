use fox_common::{FileId, SourceLoc, SourceRange};

use crate::builtins::{BuiltinKind, BuiltinMember};
use crate::context::Ident;
use crate::types::TypeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExprId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StmtId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeclId(pub(crate) u32);

/// Any node that can appear in statement position inside a compound body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AstNode {
    Decl(DeclId),
    Stmt(StmtId),
    Expr(ExprId),
}

/// A parsed type annotation: the resolved type plus where it was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeLoc {
    pub ty: TypeId,
    pub range: SourceRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    /// `+` rewritten by Sema when both operands are strings or chars.
    Concat,
    Eq,
    NEq,
    Lt,
    Le,
    Gt,
    Ge,
    LAnd,
    LOr,
    Assign,
}

impl BinOp {
    pub fn sign(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Concat => "+",
            BinOp::Eq => "==",
            BinOp::NEq => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::LAnd => "&&",
            BinOp::LOr => "||",
            BinOp::Assign => "=",
        }
    }

    pub fn is_assignment(self) -> bool {
        matches!(self, BinOp::Assign)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NEq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// `<`, `<=`, `>`, `>=`: comparisons that order their operands.
    pub fn is_ranking(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::LAnd | BinOp::LOr)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Minus,
    Plus,
}

impl UnOp {
    pub fn sign(self) -> &'static str {
        match self {
            UnOp::Not => "!",
            UnOp::Minus => "-",
            UnOp::Plus => "+",
        }
    }
}

/// An expression node. `ty` is unset until Sema checks the node; after
/// finalization it never contains a type variable.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: SourceRange,
    pub ty: Option<TypeId>,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    IntLit(i64),
    DoubleLit(f64),
    BoolLit(bool),
    CharLit(char),
    StringLit(String),
    ArrayLit(Vec<ExprId>),
    Binary {
        op: BinOp,
        op_range: SourceRange,
        lhs: ExprId,
        rhs: ExprId,
    },
    Unary {
        op: UnOp,
        op_range: SourceRange,
        child: ExprId,
    },
    Cast {
        child: ExprId,
        target: TypeLoc,
        /// Set by Sema when the cast target equals the child's type exactly.
        useless: bool,
    },
    Subscript {
        base: ExprId,
        index: ExprId,
    },
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
        /// Covers the parenthesized argument list.
        paren_range: SourceRange,
    },
    /// A bare identifier; must not survive Sema.
    UnresolvedDeclRef(Ident),
    /// A resolved reference to a declaration.
    DeclRef(DeclId),
    /// `base.member` before Sema resolves the member name.
    UnresolvedMemberRef {
        base: ExprId,
        member: Ident,
        member_range: SourceRange,
    },
    /// `base.member` resolved to a builtin member of arrays or strings.
    BuiltinMemberRef {
        base: ExprId,
        member: BuiltinMember,
    },
    /// Replaces a node that failed to resolve or check.
    Error,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub range: SourceRange,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Null,
    Return(Option<ExprId>),
    Condition {
        cond: ExprId,
        then_body: StmtId,
        else_body: Option<StmtId>,
    },
    Compound(Vec<AstNode>),
    While {
        cond: ExprId,
        body: StmtId,
    },
}

/// Progress marker used to catch self-referential initializers: a lookup that
/// finds a declaration in the `Checking` state knows it is inside that
/// declaration's own initializer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckState {
    Unchecked,
    Checking,
    Checked,
}

#[derive(Clone, Debug)]
pub struct Decl {
    pub kind: DeclKind,
    pub range: SourceRange,
    pub check_state: CheckState,
    /// Marked on every decl after the first one sharing an identifier in the
    /// same scope; lookups prune marked decls before reporting ambiguity.
    pub illegal_redecl: bool,
}

#[derive(Clone, Debug)]
pub enum DeclKind {
    /// Root of one source file; owns the ordered top-level declarations.
    Unit {
        name: Ident,
        file: FileId,
        decls: Vec<DeclId>,
    },
    Func {
        name: Ident,
        name_range: SourceRange,
        params: Vec<DeclId>,
        ret: Option<TypeLoc>,
        body: StmtId,
        /// End of the signature, before the body's `{`.
        header_end: SourceLoc,
    },
    Param {
        name: Ident,
        name_range: SourceRange,
        type_loc: TypeLoc,
        mutable: bool,
    },
    Var {
        name: Ident,
        name_range: SourceRange,
        type_loc: TypeLoc,
        init: Option<ExprId>,
        /// `let` introduces a constant binding, `var` a mutable one.
        is_const: bool,
        global: bool,
    },
    /// Synthetic declaration backing one entry of the builtin table.
    BuiltinFunc { kind: BuiltinKind },
}

impl Decl {
    pub fn name(&self) -> Option<Ident> {
        match &self.kind {
            DeclKind::Unit { name, .. }
            | DeclKind::Func { name, .. }
            | DeclKind::Param { name, .. }
            | DeclKind::Var { name, .. } => Some(*name),
            DeclKind::BuiltinFunc { .. } => None,
        }
    }

    pub fn name_range(&self) -> Option<SourceRange> {
        match &self.kind {
            DeclKind::Func { name_range, .. }
            | DeclKind::Param { name_range, .. }
            | DeclKind::Var { name_range, .. } => Some(*name_range),
            _ => None,
        }
    }

    /// Whether a reference to this declaration denotes a mutable location.
    pub fn is_const(&self) -> bool {
        match &self.kind {
            DeclKind::Var { is_const, .. } => *is_const,
            DeclKind::Param { mutable, .. } => !*mutable,
            _ => true,
        }
    }

    pub fn is_local_var(&self) -> bool {
        matches!(self.kind, DeclKind::Var { global: false, .. })
    }

    pub fn is_global_var(&self) -> bool {
        matches!(self.kind, DeclKind::Var { global: true, .. })
    }

    pub fn is_param(&self) -> bool {
        matches!(self.kind, DeclKind::Param { .. })
    }
}
