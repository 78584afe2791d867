use std::mem;

use fox_ast::{
    AstContext, AstNode, DeclId, DeclKind, Ident, StmtId, StmtKind, TypeLoc,
};
use fox_common::{DiagId, DiagnosticEngine, FileId, SourceLoc, SourceRange};
use fox_lex::{Token, TokenKind};

/// Outcome of one parse rule.
///
/// `NotFound` means the rule did not apply and no input was consumed, so the
/// caller is free to try another rule. `Error` means input was consumed and
/// diagnostics were already reported; the caller must recover or give up.
#[derive(Debug)]
pub enum ParseResult<T> {
    Ok(T),
    NotFound,
    Error,
}

impl<T> ParseResult<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            ParseResult::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ParseResult::Error)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ParseResult::NotFound)
    }
}

/// Propagates `NotFound` and `Error` out of the enclosing function.
macro_rules! require {
    ($e:expr) => {
        match $e {
            ParseResult::Ok(value) => value,
            ParseResult::NotFound => return ParseResult::NotFound,
            ParseResult::Error => return ParseResult::Error,
        }
    };
}
pub(crate) use require;

/// One-token-lookahead recursive descent parser producing the unresolved AST.
pub struct Parser<'a, 's> {
    pub(crate) ctx: &'a mut AstContext,
    pub(crate) diags: &'a mut DiagnosticEngine<'s>,
    pub(crate) src: &'a str,
    file: FileId,
    tokens: &'a [Token],
    idx: usize,
    /// Delayed declaration registration: declarations parsed while a scope's
    /// node is still under construction accumulate here and are committed
    /// when the node is created.
    pending_decls: Vec<Vec<DeclId>>,
}

impl<'a, 's> Parser<'a, 's> {
    pub fn new(
        ctx: &'a mut AstContext,
        diags: &'a mut DiagnosticEngine<'s>,
        file: FileId,
        src: &'a str,
        tokens: &'a [Token],
    ) -> Self {
        Self {
            ctx,
            diags,
            src,
            file,
            tokens,
            idx: 0,
            pending_decls: Vec::new(),
        }
    }

    // ---- token cursor ----

    pub(crate) fn peek(&self) -> Option<Token> {
        self.tokens.get(self.idx).copied()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.idx >= self.tokens.len()
    }

    pub(crate) fn next(&mut self) -> Option<Token> {
        let tok = self.peek();
        if tok.is_some() {
            self.idx += 1;
        }
        tok
    }

    /// Kind test ignoring any payload (an `Ident` matches any identifier).
    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.peek()
            .is_some_and(|t| mem::discriminant(&t.kind) == mem::discriminant(&kind))
    }

    pub(crate) fn try_consume(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) {
            self.next()
        } else {
            None
        }
    }

    pub(crate) fn token_text(&self, token: Token) -> &'a str {
        let begin = token.range.begin.offset as usize;
        &self.src[begin..begin + token.range.len as usize]
    }

    /// Range of the current token, or a point at end of file.
    pub(crate) fn current_range(&self) -> SourceRange {
        match self.peek() {
            Some(tok) => tok.range,
            None => SourceLoc::new(self.file, self.src.len() as u32).with_len(0),
        }
    }

    pub(crate) fn report_expected(&mut self, id: DiagId, what: &str) {
        let range = self.current_range();
        let found = match self.peek() {
            Some(tok) => tok.kind.describe(),
            None => "end of file",
        };
        self.diags
            .report(id, range, format!("expected {what}, found {found}"))
            .emit();
    }

    // ---- recovery ----

    /// Statement-level synchronization: skips to just after the next `;`, or
    /// just before an unmatched `}` or a statement-starting keyword. Bracket
    /// nesting is balanced so recovery does not walk out of the enclosing
    /// construct. Returns false if end of input was reached instead.
    pub(crate) fn skip_until_stmt(&mut self) -> bool {
        let mut parens = 0u32;
        let mut brackets = 0u32;
        let mut braces = 0u32;
        while let Some(tok) = self.peek() {
            let balanced = parens == 0 && brackets == 0 && braces == 0;
            match tok.kind {
                TokenKind::Semi if balanced => {
                    self.next();
                    return true;
                }
                TokenKind::KwIf
                | TokenKind::KwWhile
                | TokenKind::KwLet
                | TokenKind::KwVar
                | TokenKind::KwReturn
                    if balanced =>
                {
                    return true;
                }
                TokenKind::LParen => parens += 1,
                TokenKind::RParen => parens = parens.saturating_sub(1),
                TokenKind::LBracket => brackets += 1,
                TokenKind::RBracket => brackets = brackets.saturating_sub(1),
                TokenKind::LBrace => braces += 1,
                TokenKind::RBrace => {
                    if braces == 0 {
                        return true;
                    }
                    braces -= 1;
                }
                _ => {}
            }
            self.next();
        }
        false
    }

    /// Expression-level synchronization: stops before the first `;`, `)` or
    /// `]` that does not close a bracket opened during the skip.
    pub(crate) fn skip_until_expr_delim(&mut self) -> bool {
        let mut parens = 0u32;
        let mut brackets = 0u32;
        while let Some(tok) = self.peek() {
            match tok.kind {
                TokenKind::Semi if parens == 0 && brackets == 0 => return true,
                TokenKind::LParen => parens += 1,
                TokenKind::RParen => {
                    if parens == 0 {
                        return true;
                    }
                    parens -= 1;
                }
                TokenKind::LBracket => brackets += 1,
                TokenKind::RBracket => {
                    if brackets == 0 {
                        return true;
                    }
                    brackets -= 1;
                }
                TokenKind::LBrace | TokenKind::RBrace => return true,
                _ => {}
            }
            self.next();
        }
        false
    }

    /// Skips to the next plausible top-level declaration start. The caller
    /// passes `force_progress` when nothing was consumed yet, so the loop
    /// cannot spin on the offending token.
    fn skip_until_decl(&mut self, force_progress: bool) -> bool {
        if force_progress {
            self.next();
        }
        let mut braces = 0u32;
        while let Some(tok) = self.peek() {
            match tok.kind {
                TokenKind::KwFunc | TokenKind::KwLet | TokenKind::KwVar if braces == 0 => {
                    return true;
                }
                TokenKind::LBrace => braces += 1,
                TokenKind::RBrace => braces = braces.saturating_sub(1),
                _ => {}
            }
            self.next();
        }
        false
    }

    // ---- declarations ----

    fn record_decl(&mut self, decl: DeclId) {
        if let Some(frame) = self.pending_decls.last_mut() {
            frame.push(decl);
        }
    }

    /// Parses the whole token stream into a `UnitDecl` and installs it as the
    /// context's root.
    pub fn parse_unit(&mut self, name: Ident) -> DeclId {
        self.pending_decls.push(Vec::new());
        while !self.is_done() {
            match self.parse_decl() {
                ParseResult::Ok(decl) => self.record_decl(decl),
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedDecl, "a declaration");
                    if !self.skip_until_decl(true) {
                        break;
                    }
                }
                ParseResult::Error => {
                    if !self.skip_until_decl(false) {
                        break;
                    }
                }
            }
        }
        let decls = self.pending_decls.pop().unwrap_or_default();
        let range = SourceLoc::new(self.file, 0).with_len(self.src.len() as u32);
        let unit = self.ctx.alloc_decl(
            DeclKind::Unit {
                name,
                file: self.file,
                decls,
            },
            range,
        );
        self.ctx.set_unit(unit);
        unit
    }

    fn parse_decl(&mut self) -> ParseResult<DeclId> {
        if self.at(TokenKind::KwFunc) {
            return self.parse_func_decl();
        }
        self.parse_var_decl(true)
    }

    /// `('let' | 'var') <id> ':' <type> ['=' <expr>] ';'`
    pub(crate) fn parse_var_decl(&mut self, global: bool) -> ParseResult<DeclId> {
        let (kw, is_const) = if let Some(kw) = self.try_consume(TokenKind::KwLet) {
            (kw, true)
        } else if let Some(kw) = self.try_consume(TokenKind::KwVar) {
            (kw, false)
        } else {
            return ParseResult::NotFound;
        };

        let Some((name, name_range)) = self.consume_ident() else {
            self.report_expected(DiagId::ExpectedIdent, "a variable name");
            return ParseResult::Error;
        };

        if self.try_consume(TokenKind::Colon).is_none() {
            self.report_expected(DiagId::ExpectedColon, "':' before the variable's type");
            return ParseResult::Error;
        }

        let type_loc = match self.parse_type() {
            ParseResult::Ok(ty) => ty,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedType, "a type");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };

        let init = if self.try_consume(TokenKind::Eq).is_some() {
            match self.parse_expr() {
                ParseResult::Ok(expr) => Some(expr),
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedExpr, "an initializer expression");
                    return ParseResult::Error;
                }
                ParseResult::Error => return ParseResult::Error,
            }
        } else {
            None
        };

        let Some(semi) = self.try_consume(TokenKind::Semi) else {
            self.report_expected(DiagId::ExpectedSemi, "';' after the variable declaration");
            return ParseResult::Error;
        };

        // Registration into the enclosing scope's frame is the caller's job:
        // `parse_unit`'s loop records top-level declarations exactly once,
        // and locals live in their compound's node list.
        let decl = self.ctx.alloc_decl(
            DeclKind::Var {
                name,
                name_range,
                type_loc,
                init,
                is_const,
                global,
            },
            kw.range.to(semi.range),
        );
        ParseResult::Ok(decl)
    }

    /// `'func' <id> '(' [<param> {',' <param>}] ')' [':' <type>] <compound>`
    fn parse_func_decl(&mut self) -> ParseResult<DeclId> {
        let Some(kw) = self.try_consume(TokenKind::KwFunc) else {
            return ParseResult::NotFound;
        };

        let Some((name, name_range)) = self.consume_ident() else {
            self.report_expected(DiagId::ExpectedIdent, "a function name");
            return ParseResult::Error;
        };

        if self.try_consume(TokenKind::LParen).is_none() {
            self.report_expected(DiagId::ExpectedLParen, "'(' after the function name");
            return ParseResult::Error;
        }

        let mut params = Vec::new();
        let rparen = loop {
            if let Some(rparen) = self.try_consume(TokenKind::RParen) {
                break rparen;
            }
            if !params.is_empty() && self.try_consume(TokenKind::Comma).is_none() {
                self.report_expected(DiagId::ExpectedRParen, "')' or ',' in the parameter list");
                return ParseResult::Error;
            }
            match self.parse_param_decl() {
                ParseResult::Ok(param) => params.push(param),
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedIdent, "a parameter declaration");
                    return ParseResult::Error;
                }
                ParseResult::Error => return ParseResult::Error,
            }
        };

        let mut header_end = rparen.range.end();
        let ret = if self.try_consume(TokenKind::Colon).is_some() {
            match self.parse_type() {
                ParseResult::Ok(ty) => {
                    header_end = ty.range.end();
                    Some(ty)
                }
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedType, "a return type");
                    return ParseResult::Error;
                }
                ParseResult::Error => return ParseResult::Error,
            }
        } else {
            None
        };

        let body = match self.parse_compound_stmt() {
            ParseResult::Ok(body) => body,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedLBrace, "the function body");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };

        let range = kw.range.to(self.ctx.stmt(body).range);
        let decl = self.ctx.alloc_decl(
            DeclKind::Func {
                name,
                name_range,
                params,
                ret,
                body,
                header_end,
            },
            range,
        );
        ParseResult::Ok(decl)
    }

    /// `<id> ':' ['mut'] <type>`
    fn parse_param_decl(&mut self) -> ParseResult<DeclId> {
        let Some((name, name_range)) = self.consume_ident() else {
            return ParseResult::NotFound;
        };
        if self.try_consume(TokenKind::Colon).is_none() {
            self.report_expected(DiagId::ExpectedColon, "':' before the parameter's type");
            return ParseResult::Error;
        }
        let mutable = self.try_consume(TokenKind::KwMut).is_some();
        let type_loc = match self.parse_type() {
            ParseResult::Ok(ty) => ty,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedType, "the parameter's type");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };
        let decl = self.ctx.alloc_decl(
            DeclKind::Param {
                name,
                name_range,
                type_loc,
                mutable,
            },
            name_range.to(type_loc.range),
        );
        ParseResult::Ok(decl)
    }

    fn consume_ident(&mut self) -> Option<(Ident, SourceRange)> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Ident(sym),
                range,
            }) => {
                self.next();
                Some((sym, range))
            }
            _ => None,
        }
    }

    // ---- types ----

    /// `<type> = 'int' | 'double' | 'bool' | 'string' | 'char' | '[' <type> ']'`
    pub(crate) fn parse_type(&mut self) -> ParseResult<TypeLoc> {
        let prim = match self.peek().map(|t| t.kind) {
            Some(TokenKind::KwInt) => Some(self.ctx.int_type()),
            Some(TokenKind::KwDouble) => Some(self.ctx.double_type()),
            Some(TokenKind::KwBool) => Some(self.ctx.bool_type()),
            Some(TokenKind::KwString) => Some(self.ctx.string_type()),
            Some(TokenKind::KwChar) => Some(self.ctx.char_type()),
            _ => None,
        };
        if let Some(ty) = prim {
            let tok = self.next().unwrap();
            return ParseResult::Ok(TypeLoc {
                ty,
                range: tok.range,
            });
        }

        let Some(lbracket) = self.try_consume(TokenKind::LBracket) else {
            return ParseResult::NotFound;
        };
        let elem = match self.parse_type() {
            ParseResult::Ok(elem) => elem,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedType, "an element type");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };
        let Some(rbracket) = self.try_consume(TokenKind::RBracket) else {
            self.report_expected(DiagId::ExpectedRBracket, "']' to close the array type");
            return ParseResult::Error;
        };
        let ty = self.ctx.array_type(elem.ty);
        ParseResult::Ok(TypeLoc {
            ty,
            range: lbracket.range.to(rbracket.range),
        })
    }

    // ---- statements ----

    /// `'{' {<stmt>} '}'`
    pub(crate) fn parse_compound_stmt(&mut self) -> ParseResult<StmtId> {
        let Some(lbrace) = self.try_consume(TokenKind::LBrace) else {
            return ParseResult::NotFound;
        };
        self.pending_decls.push(Vec::new());

        let mut nodes: Vec<AstNode> = Vec::new();
        let rbrace = loop {
            if let Some(rbrace) = self.try_consume(TokenKind::RBrace) {
                break rbrace;
            }
            if self.is_done() {
                self.report_expected(DiagId::ExpectedRBrace, "'}'");
                self.diags
                    .report(DiagId::ToMatchThisBrace, lbrace.range, "to match this '{'")
                    .emit();
                self.pending_decls.pop();
                return ParseResult::Error;
            }
            match self.parse_stmt() {
                ParseResult::Ok(node) => nodes.push(node),
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedStmt, "a statement");
                    if !self.skip_until_stmt() {
                        self.pending_decls.pop();
                        return ParseResult::Error;
                    }
                }
                ParseResult::Error => {
                    if !self.skip_until_stmt() {
                        self.pending_decls.pop();
                        return ParseResult::Error;
                    }
                }
            }
        };

        // Commit the delayed registration now that the scope's node exists.
        // Local declarations live in the node list itself.
        self.pending_decls.pop();

        let stmt = self.ctx.alloc_stmt(
            StmtKind::Compound(nodes),
            lbrace.range.to(rbrace.range),
        );
        ParseResult::Ok(stmt)
    }

    /// `<stmt> = ';' | <var_decl> | <expr_stmt> | <condition> | <while> | <return>`
    fn parse_stmt(&mut self) -> ParseResult<AstNode> {
        if let Some(semi) = self.try_consume(TokenKind::Semi) {
            let stmt = self.ctx.alloc_stmt(StmtKind::Null, semi.range);
            return ParseResult::Ok(AstNode::Stmt(stmt));
        }

        match self.parse_var_decl(false) {
            ParseResult::Ok(decl) => return ParseResult::Ok(AstNode::Decl(decl)),
            ParseResult::Error => return ParseResult::Error,
            ParseResult::NotFound => {}
        }

        match self.parse_condition() {
            ParseResult::Ok(stmt) => return ParseResult::Ok(AstNode::Stmt(stmt)),
            ParseResult::Error => return ParseResult::Error,
            ParseResult::NotFound => {}
        }

        match self.parse_while_stmt() {
            ParseResult::Ok(stmt) => return ParseResult::Ok(AstNode::Stmt(stmt)),
            ParseResult::Error => return ParseResult::Error,
            ParseResult::NotFound => {}
        }

        match self.parse_return_stmt() {
            ParseResult::Ok(stmt) => return ParseResult::Ok(AstNode::Stmt(stmt)),
            ParseResult::Error => return ParseResult::Error,
            ParseResult::NotFound => {}
        }

        self.parse_expr_stmt()
    }

    /// `<expr> ';'`
    fn parse_expr_stmt(&mut self) -> ParseResult<AstNode> {
        let expr = require!(self.parse_expr());
        if self.try_consume(TokenKind::Semi).is_none() {
            self.report_expected(DiagId::ExpectedSemi, "';' after the expression");
            return ParseResult::Error;
        }
        ParseResult::Ok(AstNode::Expr(expr))
    }

    /// `'if' <expr> <compound> ['else' (<compound> | <condition>)]`
    fn parse_condition(&mut self) -> ParseResult<StmtId> {
        let Some(if_kw) = self.try_consume(TokenKind::KwIf) else {
            // An 'else' with no 'if' in sight is diagnosed here rather than
            // producing a confusing "expected statement".
            if let Some(else_kw) = self.try_consume(TokenKind::KwElse) {
                self.diags
                    .report(
                        DiagId::ElseWithoutIf,
                        else_kw.range,
                        "'else' without a preceding 'if'",
                    )
                    .emit();
                return ParseResult::Error;
            }
            return ParseResult::NotFound;
        };

        let cond = match self.parse_expr() {
            ParseResult::Ok(cond) => cond,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedExpr, "a condition");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };

        let then_body = match self.parse_compound_stmt() {
            ParseResult::Ok(body) => body,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedLBrace, "a '{' to open the 'if' body");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };

        let mut end_range = self.ctx.stmt(then_body).range;
        let else_body = if self.try_consume(TokenKind::KwElse).is_some() {
            let body = if self.at(TokenKind::KwIf) {
                self.parse_condition()
            } else {
                self.parse_compound_stmt()
            };
            match body {
                ParseResult::Ok(stmt) => {
                    end_range = self.ctx.stmt(stmt).range;
                    Some(stmt)
                }
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedLBrace, "a '{' to open the 'else' body");
                    return ParseResult::Error;
                }
                ParseResult::Error => return ParseResult::Error,
            }
        } else {
            None
        };

        let stmt = self.ctx.alloc_stmt(
            StmtKind::Condition {
                cond,
                then_body,
                else_body,
            },
            if_kw.range.to(end_range),
        );
        ParseResult::Ok(stmt)
    }

    /// `'while' <expr> <compound>`
    fn parse_while_stmt(&mut self) -> ParseResult<StmtId> {
        let Some(kw) = self.try_consume(TokenKind::KwWhile) else {
            return ParseResult::NotFound;
        };
        let cond = match self.parse_expr() {
            ParseResult::Ok(cond) => cond,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedExpr, "a loop condition");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };
        let body = match self.parse_compound_stmt() {
            ParseResult::Ok(body) => body,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedLBrace, "a '{' to open the loop body");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };
        let range = kw.range.to(self.ctx.stmt(body).range);
        let stmt = self.ctx.alloc_stmt(StmtKind::While { cond, body }, range);
        ParseResult::Ok(stmt)
    }

    /// `'return' [<expr>] ';'`
    fn parse_return_stmt(&mut self) -> ParseResult<StmtId> {
        let Some(kw) = self.try_consume(TokenKind::KwReturn) else {
            return ParseResult::NotFound;
        };
        let expr = match self.parse_expr() {
            ParseResult::Ok(expr) => Some(expr),
            ParseResult::NotFound => None,
            ParseResult::Error => return ParseResult::Error,
        };
        let Some(semi) = self.try_consume(TokenKind::Semi) else {
            self.report_expected(DiagId::ExpectedSemi, "';' after the return statement");
            return ParseResult::Error;
        };
        let stmt = self
            .ctx
            .alloc_stmt(StmtKind::Return(expr), kw.range.to(semi.range));
        ParseResult::Ok(stmt)
    }
}
