use fox_ast::AstContext;
use fox_common::{DiagId, DiagnosticEngine, FileId, SourceLoc};
use logos::Logos;

use crate::token::{Token, TokenKind};

/// Raw token layer. The wrapper below maps these to [`TokenKind`], attaches
/// absolute source ranges and reports recoverable errors.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n\x0B\x0C\x00]+")]
#[logos(skip r"//[^\n]*")]
enum RawToken {
    #[token("int")]
    KwInt,
    #[token("double")]
    KwDouble,
    #[token("bool")]
    KwBool,
    #[token("string")]
    KwString,
    #[token("char")]
    KwChar,
    #[token("mut")]
    KwMut,
    #[token("as")]
    KwAs,
    #[token("let")]
    KwLet,
    #[token("var")]
    KwVar,
    #[token("func")]
    KwFunc,
    #[token("if")]
    KwIf,
    #[token("else")]
    KwElse,
    #[token("while")]
    KwWhile,
    #[token("return")]
    KwReturn,

    #[token("true")]
    True,
    #[token("false")]
    False,

    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("**")]
    StarStar,

    #[token("=")]
    Eq,
    #[token("!")]
    Bang,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // '&' and '|' exist only as halves of '&&' and '||'.
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,

    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // A '.' only starts a fractional part when a digit follows, which the
    // longest-match rule gives us for free.
    #[regex(r"[0-9]+")]
    Int,
    #[regex(r"[0-9]+\.[0-9]+")]
    Double,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    /// Payload is true when the closing `*/` was found before EOF.
    #[token("/*", lex_block_comment)]
    BlockComment(bool),

    /// Payload is true when the closing delimiter was found on the same line.
    #[token("'", |lex| lex_quoted(lex, '\''))]
    CharLit(bool),
    #[token("\"", |lex| lex_quoted(lex, '"'))]
    StrLit(bool),
}

fn lex_block_comment(lex: &mut logos::Lexer<RawToken>) -> bool {
    let rest = lex.remainder();
    match rest.find("*/") {
        Some(idx) => {
            lex.bump(idx + 2);
            true
        }
        None => {
            lex.bump(rest.len());
            false
        }
    }
}

/// Consumes a char or string literal body. A backslash makes the next
/// character part of the literal unconditionally; decoding the escape is the
/// parser's job. Stops short of a newline so lexing resumes after it.
fn lex_quoted(lex: &mut logos::Lexer<RawToken>, delim: char) -> bool {
    let rest = lex.remainder();
    let mut escaped = false;
    for (idx, c) in rest.char_indices() {
        if c == '\n' || c == '\r' {
            lex.bump(idx);
            return false;
        }
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == delim {
            lex.bump(idx + c.len_utf8());
            return true;
        }
    }
    lex.bump(rest.len());
    false
}

/// Tokenizes one file. Lexing never aborts: unrecognized input becomes
/// [`TokenKind::Invalid`] tokens, and unterminated literals or comments are
/// reported through the diagnostic engine before lexing resumes.
pub struct Lexer<'a, 's> {
    ctx: &'a mut AstContext,
    diags: &'a mut DiagnosticEngine<'s>,
    file: FileId,
    src: &'a str,
}

impl<'a, 's> Lexer<'a, 's> {
    pub fn new(
        ctx: &'a mut AstContext,
        diags: &'a mut DiagnosticEngine<'s>,
        file: FileId,
        src: &'a str,
    ) -> Self {
        Self { ctx, diags, file, src }
    }

    pub fn lex(self) -> Vec<Token> {
        let Self { ctx, diags, file, src } = self;
        let mut tokens = Vec::new();

        for (result, span) in RawToken::lexer(src).spanned() {
            let begin = SourceLoc::new(file, span.start as u32);
            let range = begin.with_len((span.end - span.start) as u32);

            let kind = match result {
                Err(()) => TokenKind::Invalid,
                Ok(raw) => match raw {
                    RawToken::BlockComment(terminated) => {
                        if !terminated {
                            diags
                                .report(
                                    DiagId::UnterminatedBlockComment,
                                    begin.with_len(2),
                                    "unterminated block comment",
                                )
                                .emit();
                        }
                        continue;
                    }
                    RawToken::CharLit(false) => {
                        diags
                            .report(
                                DiagId::UnterminatedCharLit,
                                begin.with_len(1),
                                "unterminated char literal",
                            )
                            .emit();
                        continue;
                    }
                    RawToken::StrLit(false) => {
                        diags
                            .report(
                                DiagId::UnterminatedStrLit,
                                begin.with_len(1),
                                "unterminated string literal",
                            )
                            .emit();
                        continue;
                    }
                    RawToken::CharLit(true) => TokenKind::CharLit,
                    RawToken::StrLit(true) => TokenKind::StringLit,
                    RawToken::Ident => TokenKind::Ident(ctx.ident(&src[span.clone()])),
                    RawToken::KwInt => TokenKind::KwInt,
                    RawToken::KwDouble => TokenKind::KwDouble,
                    RawToken::KwBool => TokenKind::KwBool,
                    RawToken::KwString => TokenKind::KwString,
                    RawToken::KwChar => TokenKind::KwChar,
                    RawToken::KwMut => TokenKind::KwMut,
                    RawToken::KwAs => TokenKind::KwAs,
                    RawToken::KwLet => TokenKind::KwLet,
                    RawToken::KwVar => TokenKind::KwVar,
                    RawToken::KwFunc => TokenKind::KwFunc,
                    RawToken::KwIf => TokenKind::KwIf,
                    RawToken::KwElse => TokenKind::KwElse,
                    RawToken::KwWhile => TokenKind::KwWhile,
                    RawToken::KwReturn => TokenKind::KwReturn,
                    RawToken::True | RawToken::False => TokenKind::BoolLit,
                    RawToken::Int => TokenKind::IntLit,
                    RawToken::Double => TokenKind::DoubleLit,
                    RawToken::EqEq => TokenKind::EqEq,
                    RawToken::Neq => TokenKind::Neq,
                    RawToken::Le => TokenKind::Le,
                    RawToken::Ge => TokenKind::Ge,
                    RawToken::Lt => TokenKind::Lt,
                    RawToken::Gt => TokenKind::Gt,
                    RawToken::AndAnd => TokenKind::AndAnd,
                    RawToken::OrOr => TokenKind::OrOr,
                    RawToken::StarStar => TokenKind::StarStar,
                    RawToken::Eq => TokenKind::Eq,
                    RawToken::Bang => TokenKind::Bang,
                    RawToken::Plus => TokenKind::Plus,
                    RawToken::Minus => TokenKind::Minus,
                    RawToken::Star => TokenKind::Star,
                    RawToken::Slash => TokenKind::Slash,
                    RawToken::Percent => TokenKind::Percent,
                    RawToken::Amp | RawToken::Pipe => TokenKind::Invalid,
                    RawToken::Dot => TokenKind::Dot,
                    RawToken::Colon => TokenKind::Colon,
                    RawToken::Semi => TokenKind::Semi,
                    RawToken::Comma => TokenKind::Comma,
                    RawToken::LParen => TokenKind::LParen,
                    RawToken::RParen => TokenKind::RParen,
                    RawToken::LBrace => TokenKind::LBrace,
                    RawToken::RBrace => TokenKind::RBrace,
                    RawToken::LBracket => TokenKind::LBracket,
                    RawToken::RBracket => TokenKind::RBracket,
                },
            };

            tokens.push(Token { kind, range });
        }

        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fox_common::{BufferConsumer, SourceManager};

    fn lex(src: &str) -> (Vec<TokenKind>, Vec<DiagId>) {
        let mut sm = SourceManager::new();
        let file = sm.load_string("t.fox", src);
        let (consumer, diags) = BufferConsumer::new();
        let mut engine = DiagnosticEngine::new(&sm, Box::new(consumer));
        let mut ctx = AstContext::new();
        let tokens = Lexer::new(&mut ctx, &mut engine, file, sm.content(file)).lex();
        let kinds = tokens.iter().map(|t| t.kind).collect();
        let ids = diags.borrow().iter().map(|d| d.id).collect();
        (kinds, ids)
    }

    #[test]
    fn keywords_and_identifiers() {
        let (kinds, diags) = lex("func main hello while0");
        assert!(diags.is_empty());
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[0], TokenKind::KwFunc);
        assert!(matches!(kinds[1], TokenKind::Ident(_)));
        assert!(matches!(kinds[2], TokenKind::Ident(_)));
        // 'while0' is one identifier, not the 'while' keyword.
        assert!(matches!(kinds[3], TokenKind::Ident(_)));
    }

    #[test]
    fn true_false_lex_as_bool_literals() {
        let (kinds, _) = lex("true false");
        assert_eq!(kinds, vec![TokenKind::BoolLit, TokenKind::BoolLit]);
    }

    #[test]
    fn two_char_operators_match_greedily() {
        let (kinds, diags) = lex("== != <= >= && || ** < > = !");
        assert!(diags.is_empty());
        assert_eq!(
            kinds,
            vec![
                TokenKind::EqEq,
                TokenKind::Neq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::StarStar,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Eq,
                TokenKind::Bang,
            ]
        );
    }

    #[test]
    fn lone_amp_and_pipe_are_invalid_but_lexing_continues() {
        let (kinds, diags) = lex("a & b | c");
        assert!(diags.is_empty(), "invalid tokens are diagnosed at parse time");
        assert_eq!(kinds.len(), 5);
        assert_eq!(kinds[1], TokenKind::Invalid);
        assert_eq!(kinds[3], TokenKind::Invalid);
    }

    #[test]
    fn numeric_literals() {
        let (kinds, _) = lex("12 3.25 1.x 7.");
        assert_eq!(kinds.len(), 7);
        assert_eq!(kinds[0], TokenKind::IntLit);
        assert_eq!(kinds[1], TokenKind::DoubleLit);
        // '.' not followed by a digit does not start a fraction
        assert_eq!(kinds[2], TokenKind::IntLit);
        assert_eq!(kinds[3], TokenKind::Dot);
        assert!(matches!(kinds[4], TokenKind::Ident(_)));
        assert_eq!(kinds[5], TokenKind::IntLit);
        assert_eq!(kinds[6], TokenKind::Dot);
    }

    #[test]
    fn comments_are_skipped() {
        let (kinds, diags) = lex("a // rest of line\nb /* block\n comment */ c");
        assert!(diags.is_empty());
        assert_eq!(kinds.len(), 3);
    }

    #[test]
    fn unterminated_block_comment_is_reported_at_opener() {
        let (kinds, diags) = lex("a /* never closed");
        assert_eq!(kinds.len(), 1);
        assert_eq!(diags, vec![DiagId::UnterminatedBlockComment]);
    }

    #[test]
    fn string_and_char_literals() {
        let (kinds, diags) = lex(r#" "hi \" there" 'a' '\n' "#);
        assert!(diags.is_empty());
        assert_eq!(
            kinds,
            vec![TokenKind::StringLit, TokenKind::CharLit, TokenKind::CharLit]
        );
    }

    #[test]
    fn unterminated_string_recovers_after_newline() {
        let (kinds, diags) = lex("let s : string = \"hello\nlet t");
        assert_eq!(diags, vec![DiagId::UnterminatedStrLit]);
        // lexing resumed on the next line: a second 'let' and its identifier
        assert_eq!(kinds.iter().filter(|k| **k == TokenKind::KwLet).count(), 2);
        assert!(matches!(kinds.last(), Some(TokenKind::Ident(_))));
    }

    #[test]
    fn token_ranges_are_absolute() {
        let mut sm = SourceManager::new();
        let file = sm.load_string("t.fox", "ab\ncd");
        let (consumer, _) = BufferConsumer::new();
        let mut engine = DiagnosticEngine::new(&sm, Box::new(consumer));
        let mut ctx = AstContext::new();
        let tokens = Lexer::new(&mut ctx, &mut engine, file, sm.content(file)).lex();
        assert_eq!(tokens[1].range.begin.offset, 3);
        assert_eq!(tokens[1].range.len, 2);
    }
}
