use fox_ast::{BinOp, ExprId, ExprKind, UnOp};
use fox_common::{DiagId, SourceRange};
use fox_lex::{Token, TokenKind};

use crate::parser::{require, ParseResult, Parser};

/// Binary precedence levels, loosest first. Assignment sits above all of
/// these and is handled by `parse_expr` itself (right-associative); `**`
/// sits below all of them and is right-associative too.
const BINARY_LEVELS: u8 = 6;

fn binop_at_level(kind: TokenKind, level: u8) -> Option<BinOp> {
    match (level, kind) {
        (6, TokenKind::OrOr) => Some(BinOp::LOr),
        (5, TokenKind::AndAnd) => Some(BinOp::LAnd),
        (4, TokenKind::EqEq) => Some(BinOp::Eq),
        (4, TokenKind::Neq) => Some(BinOp::NEq),
        (3, TokenKind::Lt) => Some(BinOp::Lt),
        (3, TokenKind::Le) => Some(BinOp::Le),
        (3, TokenKind::Gt) => Some(BinOp::Gt),
        (3, TokenKind::Ge) => Some(BinOp::Ge),
        (2, TokenKind::Plus) => Some(BinOp::Add),
        (2, TokenKind::Minus) => Some(BinOp::Sub),
        (1, TokenKind::Star) => Some(BinOp::Mul),
        (1, TokenKind::Slash) => Some(BinOp::Div),
        (1, TokenKind::Percent) => Some(BinOp::Mod),
        _ => None,
    }
}

impl<'a, 's> Parser<'a, 's> {
    /// `<expr> = <binary_expr> ['=' <expr>]` — assignment is right-associative.
    pub(crate) fn parse_expr(&mut self) -> ParseResult<ExprId> {
        let lhs = require!(self.parse_binary_expr(BINARY_LEVELS));
        let Some(eq) = self.try_consume(TokenKind::Eq) else {
            return ParseResult::Ok(lhs);
        };
        let rhs = match self.parse_expr() {
            ParseResult::Ok(rhs) => rhs,
            ParseResult::NotFound => {
                self.report_expected(DiagId::ExpectedExpr, "an expression after '='");
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };
        ParseResult::Ok(self.make_binary(BinOp::Assign, eq.range, lhs, rhs))
    }

    fn make_binary(&mut self, op: BinOp, op_range: SourceRange, lhs: ExprId, rhs: ExprId) -> ExprId {
        let range = self.ctx.expr(lhs).range.to(self.ctx.expr(rhs).range);
        self.ctx.alloc_expr(
            ExprKind::Binary {
                op,
                op_range,
                lhs,
                rhs,
            },
            range,
        )
    }

    /// Precedence climbing over the left-associative levels; level 0 is the
    /// right-associative exponent.
    fn parse_binary_expr(&mut self, level: u8) -> ParseResult<ExprId> {
        if level == 0 {
            let lhs = require!(self.parse_cast_expr());
            let Some(op) = self.try_consume(TokenKind::StarStar) else {
                return ParseResult::Ok(lhs);
            };
            let rhs = match self.parse_binary_expr(0) {
                ParseResult::Ok(rhs) => rhs,
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedExpr, "an expression after '**'");
                    return ParseResult::Error;
                }
                ParseResult::Error => return ParseResult::Error,
            };
            return ParseResult::Ok(self.make_binary(BinOp::Pow, op.range, lhs, rhs));
        }

        let mut lhs = require!(self.parse_binary_expr(level - 1));
        loop {
            let Some(op) = self.peek().and_then(|t| binop_at_level(t.kind, level)) else {
                return ParseResult::Ok(lhs);
            };
            let op_range = self.next().unwrap().range;
            let rhs = match self.parse_binary_expr(level - 1) {
                ParseResult::Ok(rhs) => rhs,
                ParseResult::NotFound => {
                    self.report_expected(
                        DiagId::ExpectedExpr,
                        &format!("an expression after '{}'", op.sign()),
                    );
                    return ParseResult::Error;
                }
                ParseResult::Error => return ParseResult::Error,
            };
            lhs = self.make_binary(op, op_range, lhs, rhs);
        }
    }

    /// `<cast_expr> = <prefix_expr> {'as' <type>}` — the cast applies to the
    /// whole prefix expression, so `-x as int` is `(-x) as int`.
    fn parse_cast_expr(&mut self) -> ParseResult<ExprId> {
        let mut expr = require!(self.parse_prefix_expr());
        while self.try_consume(TokenKind::KwAs).is_some() {
            let target = match self.parse_type() {
                ParseResult::Ok(ty) => ty,
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedType, "a type after 'as'");
                    return ParseResult::Error;
                }
                ParseResult::Error => return ParseResult::Error,
            };
            let range = self.ctx.expr(expr).range.to(target.range);
            expr = self.ctx.alloc_expr(
                ExprKind::Cast {
                    child: expr,
                    target,
                    useless: false,
                },
                range,
            );
        }
        ParseResult::Ok(expr)
    }

    /// `<prefix_expr> = ('!' | '-' | '+') <prefix_expr> | <postfix_expr>`
    fn parse_prefix_expr(&mut self) -> ParseResult<ExprId> {
        let op = match self.peek().map(|t| t.kind) {
            Some(TokenKind::Bang) => Some(UnOp::Not),
            Some(TokenKind::Minus) => Some(UnOp::Minus),
            Some(TokenKind::Plus) => Some(UnOp::Plus),
            _ => None,
        };
        let Some(op) = op else {
            return self.parse_postfix_expr();
        };
        let op_range = self.next().unwrap().range;
        let child = match self.parse_prefix_expr() {
            ParseResult::Ok(child) => child,
            ParseResult::NotFound => {
                self.report_expected(
                    DiagId::ExpectedExpr,
                    &format!("an expression after '{}'", op.sign()),
                );
                return ParseResult::Error;
            }
            ParseResult::Error => return ParseResult::Error,
        };
        let range = op_range.to(self.ctx.expr(child).range);
        ParseResult::Ok(self.ctx.alloc_expr(
            ExprKind::Unary {
                op,
                op_range,
                child,
            },
            range,
        ))
    }

    /// `<postfix_expr> = <atom> {'(' args ')' | '[' <expr> ']' | '.' <id>}`
    fn parse_postfix_expr(&mut self) -> ParseResult<ExprId> {
        let mut expr = require!(self.parse_atom());
        loop {
            if let Some(lparen) = self.try_consume(TokenKind::LParen) {
                expr = match self.parse_call_suffix(expr, lparen) {
                    ParseResult::Ok(expr) => expr,
                    _ => return ParseResult::Error,
                };
            } else if self.try_consume(TokenKind::LBracket).is_some() {
                let index = match self.parse_expr() {
                    ParseResult::Ok(index) => index,
                    ParseResult::NotFound => {
                        self.report_expected(DiagId::ExpectedExpr, "an index expression");
                        return ParseResult::Error;
                    }
                    ParseResult::Error => return ParseResult::Error,
                };
                let Some(rbracket) = self.try_consume(TokenKind::RBracket) else {
                    self.report_expected(DiagId::ExpectedRBracket, "']' to close the subscript");
                    return ParseResult::Error;
                };
                let range = self.ctx.expr(expr).range.to(rbracket.range);
                expr = self
                    .ctx
                    .alloc_expr(ExprKind::Subscript { base: expr, index }, range);
            } else if self.try_consume(TokenKind::Dot).is_some() {
                let Some(tok) = self.peek() else {
                    self.report_expected(DiagId::ExpectedIdent, "a member name after '.'");
                    return ParseResult::Error;
                };
                let TokenKind::Ident(member) = tok.kind else {
                    self.report_expected(DiagId::ExpectedIdent, "a member name after '.'");
                    return ParseResult::Error;
                };
                self.next();
                let range = self.ctx.expr(expr).range.to(tok.range);
                expr = self.ctx.alloc_expr(
                    ExprKind::UnresolvedMemberRef {
                        base: expr,
                        member,
                        member_range: tok.range,
                    },
                    range,
                );
            } else {
                return ParseResult::Ok(expr);
            }
        }
    }

    fn parse_call_suffix(&mut self, callee: ExprId, lparen: Token) -> ParseResult<ExprId> {
        let mut args = Vec::new();
        let rparen = loop {
            if let Some(rparen) = self.try_consume(TokenKind::RParen) {
                break rparen;
            }
            if !args.is_empty() && self.try_consume(TokenKind::Comma).is_none() {
                self.report_expected(DiagId::ExpectedRParen, "')' or ',' in the argument list");
                return ParseResult::Error;
            }
            match self.parse_expr() {
                ParseResult::Ok(arg) => args.push(arg),
                ParseResult::NotFound => {
                    self.report_expected(DiagId::ExpectedExpr, "an argument");
                    return ParseResult::Error;
                }
                ParseResult::Error => return ParseResult::Error,
            }
        };
        let paren_range = lparen.range.to(rparen.range);
        let range = self.ctx.expr(callee).range.to(rparen.range);
        ParseResult::Ok(self.ctx.alloc_expr(
            ExprKind::Call {
                callee,
                args,
                paren_range,
            },
            range,
        ))
    }

    /// Literals, identifiers, parenthesized expressions and array literals.
    fn parse_atom(&mut self) -> ParseResult<ExprId> {
        let Some(tok) = self.peek() else {
            return ParseResult::NotFound;
        };

        match tok.kind {
            TokenKind::IntLit => {
                self.next();
                let text = self.token_text(tok);
                match text.parse::<i64>() {
                    Ok(value) => {
                        ParseResult::Ok(self.ctx.alloc_expr(ExprKind::IntLit(value), tok.range))
                    }
                    Err(_) => {
                        self.diags
                            .report(
                                DiagId::IntLitTooLarge,
                                tok.range,
                                format!("integer literal '{text}' is too large"),
                            )
                            .emit();
                        ParseResult::Ok(self.ctx.alloc_expr(ExprKind::Error, tok.range))
                    }
                }
            }
            TokenKind::DoubleLit => {
                self.next();
                let value = self.token_text(tok).parse::<f64>().unwrap_or(f64::INFINITY);
                ParseResult::Ok(self.ctx.alloc_expr(ExprKind::DoubleLit(value), tok.range))
            }
            TokenKind::BoolLit => {
                self.next();
                let value = self.token_text(tok) == "true";
                ParseResult::Ok(self.ctx.alloc_expr(ExprKind::BoolLit(value), tok.range))
            }
            TokenKind::CharLit => {
                self.next();
                self.parse_char_lit(tok)
            }
            TokenKind::StringLit => {
                self.next();
                let text = self.token_text(tok);
                let body = &text[1..text.len() - 1];
                let value = self.decode_literal_body(body, tok.range);
                ParseResult::Ok(self.ctx.alloc_expr(ExprKind::StringLit(value), tok.range))
            }
            TokenKind::Ident(sym) => {
                self.next();
                ParseResult::Ok(
                    self.ctx
                        .alloc_expr(ExprKind::UnresolvedDeclRef(sym), tok.range),
                )
            }
            TokenKind::LParen => {
                self.next();
                let inner = match self.parse_expr() {
                    ParseResult::Ok(inner) => inner,
                    ParseResult::NotFound => {
                        self.report_expected(DiagId::ExpectedExpr, "an expression after '('");
                        return ParseResult::Error;
                    }
                    ParseResult::Error => return ParseResult::Error,
                };
                let Some(rparen) = self.try_consume(TokenKind::RParen) else {
                    self.report_expected(DiagId::ExpectedRParen, "')'");
                    return ParseResult::Error;
                };
                self.ctx.expr_mut(inner).range = tok.range.to(rparen.range);
                ParseResult::Ok(inner)
            }
            TokenKind::LBracket => {
                self.next();
                let mut elems = Vec::new();
                let rbracket = loop {
                    if let Some(rbracket) = self.try_consume(TokenKind::RBracket) {
                        break rbracket;
                    }
                    if !elems.is_empty() && self.try_consume(TokenKind::Comma).is_none() {
                        self.report_expected(
                            DiagId::ExpectedRBracket,
                            "']' or ',' in the array literal",
                        );
                        return ParseResult::Error;
                    }
                    match self.parse_expr() {
                        ParseResult::Ok(elem) => elems.push(elem),
                        ParseResult::NotFound => {
                            self.report_expected(DiagId::ExpectedExpr, "an array element");
                            return ParseResult::Error;
                        }
                        ParseResult::Error => return ParseResult::Error,
                    }
                };
                let range = tok.range.to(rbracket.range);
                ParseResult::Ok(self.ctx.alloc_expr(ExprKind::ArrayLit(elems), range))
            }
            TokenKind::Invalid => {
                self.next();
                self.diags
                    .report(
                        DiagId::InvalidToken,
                        tok.range,
                        format!("unexpected character(s) '{}'", self.token_text(tok)),
                    )
                    .emit();
                ParseResult::Error
            }
            _ => ParseResult::NotFound,
        }
    }

    fn parse_char_lit(&mut self, tok: Token) -> ParseResult<ExprId> {
        let text = self.token_text(tok);
        let body = &text[1..text.len() - 1];
        let value = self.decode_literal_body(body, tok.range);
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => ParseResult::Ok(self.ctx.alloc_expr(ExprKind::CharLit(c), tok.range)),
            _ => {
                self.diags
                    .report(
                        DiagId::InvalidCharLitSize,
                        tok.range,
                        format!(
                            "char literal must contain exactly one codepoint, found {}",
                            value.chars().count()
                        ),
                    )
                    .emit();
                ParseResult::Ok(self.ctx.alloc_expr(ExprKind::Error, tok.range))
            }
        }
    }

    /// Decodes the escape sequences of a char or string literal body.
    fn decode_literal_body(&mut self, body: &str, range: SourceRange) -> String {
        let mut out = String::with_capacity(body.len());
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some(other) => {
                    self.diags
                        .report(
                            DiagId::InvalidEscapeSeq,
                            range,
                            format!("unknown escape sequence '\\{other}'"),
                        )
                        .emit();
                    out.push(other);
                }
                None => {}
            }
        }
        out
    }
}
