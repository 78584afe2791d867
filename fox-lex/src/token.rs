use fox_ast::Ident;
use fox_common::SourceRange;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: SourceRange,
}

/// Token kinds. Literal tokens carry no value; the parser reconstructs it
/// from the token's range. Only identifiers are interned eagerly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TokenKind {
    Ident(Ident),

    // Keywords
    KwInt,
    KwDouble,
    KwBool,
    KwString,
    KwChar,
    KwMut,
    KwAs,
    KwLet,
    KwVar,
    KwFunc,
    KwIf,
    KwElse,
    KwWhile,
    KwReturn,

    // Literals
    IntLit,
    DoubleLit,
    CharLit,
    StringLit,
    BoolLit,

    // Operators and punctuation
    Eq,
    EqEq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    Dot,
    Colon,
    Semi,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    /// A byte sequence no rule matched; reported by the parser, not here.
    Invalid,
}

impl TokenKind {
    /// Spelling used in "expected ..." diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Ident(_) => "identifier",
            TokenKind::KwInt => "'int'",
            TokenKind::KwDouble => "'double'",
            TokenKind::KwBool => "'bool'",
            TokenKind::KwString => "'string'",
            TokenKind::KwChar => "'char'",
            TokenKind::KwMut => "'mut'",
            TokenKind::KwAs => "'as'",
            TokenKind::KwLet => "'let'",
            TokenKind::KwVar => "'var'",
            TokenKind::KwFunc => "'func'",
            TokenKind::KwIf => "'if'",
            TokenKind::KwElse => "'else'",
            TokenKind::KwWhile => "'while'",
            TokenKind::KwReturn => "'return'",
            TokenKind::IntLit => "integer literal",
            TokenKind::DoubleLit => "double literal",
            TokenKind::CharLit => "char literal",
            TokenKind::StringLit => "string literal",
            TokenKind::BoolLit => "bool literal",
            TokenKind::Eq => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::Neq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Gt => "'>'",
            TokenKind::Le => "'<='",
            TokenKind::Ge => "'>='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::StarStar => "'**'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Bang => "'!'",
            TokenKind::AndAnd => "'&&'",
            TokenKind::OrOr => "'||'",
            TokenKind::Dot => "'.'",
            TokenKind::Colon => "':'",
            TokenKind::Semi => "';'",
            TokenKind::Comma => "','",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Invalid => "invalid token",
        }
    }
}
