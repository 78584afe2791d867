#![forbid(unsafe_code)]

mod ast;
mod builtins;
mod context;
mod types;

pub use ast::{
    AstNode, BinOp, CheckState, Decl, DeclId, DeclKind, Expr, ExprId, ExprKind, Stmt, StmtId,
    StmtKind, TypeLoc, UnOp,
};
pub use builtins::{BuiltinKind, BuiltinMember};
pub use context::{expr_children, AstContext, Ident};
pub use types::{TypeId, TypeKind};
