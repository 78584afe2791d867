use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::source::{SourceManager, SourceRange};

/// Severity of a diagnostic, in increasing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagSeverity {
    Ignored,
    Note,
    Warning,
    Error,
    Fatal,
}

impl DiagSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagSeverity::Ignored => "Ignored",
            DiagSeverity::Note => "Note",
            DiagSeverity::Warning => "Warning",
            DiagSeverity::Error => "Error",
            DiagSeverity::Fatal => "Fatal",
        }
    }
}

/// Stable identifier of a diagnostic kind.
///
/// The message text is produced at the report site; the id exists so that
/// tests and tools can match on the kind without parsing messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagId {
    // Lexer
    UnterminatedBlockComment,
    UnterminatedCharLit,
    UnterminatedStrLit,

    // Parser
    ExpectedSemi,
    ExpectedLBrace,
    ExpectedRBrace,
    ExpectedExpr,
    ExpectedStmt,
    ExpectedDecl,
    ExpectedType,
    ExpectedIdent,
    ExpectedColon,
    ExpectedLParen,
    ExpectedRParen,
    ExpectedRBracket,
    ToMatchThisBrace,
    ElseWithoutIf,
    InvalidToken,
    IntLitTooLarge,
    InvalidCharLitSize,
    InvalidEscapeSeq,

    // Sema
    UndeclaredId,
    AmbiguousRef,
    PotentialCandidateHere,
    VarInitSelfRef,
    DeclaredHereWithType,
    InvalidRedecl,
    FirstDeclaredHere,
    InvalidExplicitCast,
    UselessRedundantCast,
    UnexpectedElemOfTypeInArrLit,
    FuncTypeInArrLit,
    UnaryOpBadChildType,
    BinExprInvalidOperands,
    ArrSubInvalidTypes,
    UnassignableExpr,
    InvalidAssignment,
    ExprIsntFunc,
    CannotCallWithNoArgs,
    CannotCallFuncWithArgs,
    NotEnoughArgsInFuncCall,
    TooManyArgsInFuncCall,
    ExprFailedInfer,
    UnknownBuiltinMember,
    BuiltinMemberNotCalled,
    InvalidCondType,
    ReturnTypeMismatch,
    ReturnWithNoExpr,
    UnexpectedReturnValue,
    InvalidVarInitType,

    // BCGen
    JumpOffsetTooLarge,
    TooManyConstants,
    TooManyRegisters,
}

impl DiagId {
    pub fn severity(self) -> DiagSeverity {
        use DiagId::*;
        match self {
            ToMatchThisBrace | PotentialCandidateHere | DeclaredHereWithType
            | FirstDeclaredHere => DiagSeverity::Note,
            UselessRedundantCast => DiagSeverity::Warning,
            _ => DiagSeverity::Error,
        }
    }
}

/// One reported diagnostic: a kind, a formatted message, a primary range and
/// an optional secondary range rendered with `~`.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub id: DiagId,
    pub severity: DiagSeverity,
    pub message: String,
    pub range: SourceRange,
    pub extra_range: Option<SourceRange>,
}

pub trait DiagnosticConsumer {
    fn consume(&mut self, src: &SourceManager, diag: &Diagnostic);
}

/// Accumulates diagnostics and forwards them to a consumer, keeping a count
/// per severity at `Error` and above.
pub struct DiagnosticEngine<'s> {
    src: &'s SourceManager,
    consumer: Box<dyn DiagnosticConsumer>,
    error_count: usize,
    warning_count: usize,
    ignore_all: bool,
    warnings_are_errors: bool,
}

impl<'s> DiagnosticEngine<'s> {
    pub fn new(src: &'s SourceManager, consumer: Box<dyn DiagnosticConsumer>) -> Self {
        Self {
            src,
            consumer,
            error_count: 0,
            warning_count: 0,
            ignore_all: false,
            warnings_are_errors: false,
        }
    }

    /// Starts a diagnostic. The returned builder delivers it when dropped.
    pub fn report(
        &mut self,
        id: DiagId,
        range: SourceRange,
        message: impl Into<String>,
    ) -> DiagBuilder<'_, 's> {
        let diag = (!self.ignore_all).then(|| Diagnostic {
            id,
            severity: id.severity(),
            message: message.into(),
            range,
            extra_range: None,
        });
        DiagBuilder { engine: self, diag }
    }

    /// When set, every subsequent report is discarded without being counted.
    /// Used by Sema's finalizer to mute the subtree of a failed inference.
    pub fn set_ignore_all(&mut self, ignore: bool) {
        self.ignore_all = ignore;
    }

    pub fn set_warnings_are_errors(&mut self, enable: bool) {
        self.warnings_are_errors = enable;
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn had_errors(&self) -> bool {
        self.error_count != 0
    }

    fn deliver(&mut self, mut diag: Diagnostic) {
        if self.warnings_are_errors && diag.severity == DiagSeverity::Warning {
            diag.severity = DiagSeverity::Error;
        }
        match diag.severity {
            DiagSeverity::Error | DiagSeverity::Fatal => self.error_count += 1,
            DiagSeverity::Warning => self.warning_count += 1,
            _ => {}
        }
        self.consumer.consume(self.src, &diag);
    }
}

/// In-flight diagnostic; delivered to the consumer on drop.
pub struct DiagBuilder<'e, 's> {
    engine: &'e mut DiagnosticEngine<'s>,
    diag: Option<Diagnostic>,
}

impl DiagBuilder<'_, '_> {
    /// Attaches a secondary range, underlined with `~` in the extract.
    pub fn extra_range(mut self, range: SourceRange) -> Self {
        if let Some(diag) = &mut self.diag {
            diag.extra_range = Some(range);
        }
        self
    }

    pub fn emit(self) {}
}

impl Drop for DiagBuilder<'_, '_> {
    fn drop(&mut self) {
        if let Some(diag) = self.diag.take() {
            self.engine.deliver(diag);
        }
    }
}

/// Renders diagnostics to a stream as
/// `file:line:col[-col] - Severity - message` followed by the source line and
/// a caret/tilde underline, both measured in codepoints.
pub struct StreamConsumer<W: Write> {
    out: W,
}

impl<W: Write> StreamConsumer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> DiagnosticConsumer for StreamConsumer<W> {
    fn consume(&mut self, src: &SourceManager, diag: &Diagnostic) {
        let _ = writeln!(
            self.out,
            "{} - {} - {}",
            loc_info(src, diag.range),
            diag.severity.as_str(),
            diag.message
        );
        if diag.range.is_valid() {
            for line in extract_lines(src, diag) {
                let _ = writeln!(self.out, "\t{line}");
            }
        }
    }
}

fn loc_info(src: &SourceManager, range: SourceRange) -> String {
    if !range.is_valid() {
        return "<unknown>".to_string();
    }
    let begin = src.complete_loc(range.begin);
    if range.len <= 1 {
        return begin.to_string();
    }
    let end = src.complete_loc(range.end());
    // The end column points at the last covered codepoint.
    format!("{}-{}", begin, end.column.saturating_sub(1).max(begin.column))
}

/// Builds the two extract lines: the (indent-trimmed) source line and the
/// underline below it.
fn extract_lines(src: &SourceManager, diag: &Diagnostic) -> Vec<String> {
    let (line, line_start) = src.line_at(diag.range.begin);
    let trimmed = line.trim_start_matches([' ', '\t']);
    let indent_bytes = (line.len() - trimmed.len()) as u32;
    let line_start = line_start + indent_bytes;
    let trimmed = trimmed.trim_end_matches([' ', '\t']);

    let mut underline = caret_line('^', trimmed, line_start, diag.range);
    if let Some(extra) = diag.extra_range {
        if extra.file() == diag.range.file() {
            let tildes = caret_line('~', trimmed, line_start, extra);
            underline = embed(&underline, &tildes);
        }
    }
    vec![trimmed.to_string(), underline]
}

/// An underline of `mark`s covering `range` within `line`, measured in
/// codepoints. Offsets outside of the line are clamped to its bounds.
fn caret_line(mark: char, line: &str, line_start: u32, range: SourceRange) -> String {
    let clamp = |offset: u32| -> usize {
        (offset.saturating_sub(line_start) as usize).min(line.len())
    };
    let begin = clamp(range.begin.offset);
    let end = clamp(range.end().offset);
    let pad = line[..begin].chars().count();
    let width = line[begin..end].chars().count().max(1);
    let mut out = " ".repeat(pad);
    out.extend(std::iter::repeat(mark).take(width));
    out
}

/// Overlays `b` onto the blanks of `a`: `embed("  ^  ", " ~~~ ")` is `" ~^~ "`.
fn embed(a: &str, b: &str) -> String {
    let mut out = String::new();
    let mut b_chars = b.chars();
    for ca in a.chars() {
        match b_chars.next() {
            Some(cb) if ca == ' ' => out.push(cb),
            _ => out.push(ca),
        }
    }
    out.extend(b_chars);
    out
}

/// Collects diagnostics into a shared buffer; the test-suite consumer.
pub struct BufferConsumer {
    store: Rc<RefCell<Vec<Diagnostic>>>,
}

impl BufferConsumer {
    pub fn new() -> (Self, Rc<RefCell<Vec<Diagnostic>>>) {
        let store = Rc::new(RefCell::new(Vec::new()));
        (Self { store: Rc::clone(&store) }, store)
    }
}

impl DiagnosticConsumer for BufferConsumer {
    fn consume(&mut self, _src: &SourceManager, diag: &Diagnostic) {
        self.store.borrow_mut().push(diag.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceLoc;

    fn render(src: &str, range: (u32, u32), extra: Option<(u32, u32)>) -> String {
        let mut sm = SourceManager::new();
        let file = sm.load_string("t.fox", src);
        let diag = Diagnostic {
            id: DiagId::ExpectedSemi,
            severity: DiagSeverity::Error,
            message: "expected a ';'".to_string(),
            range: SourceLoc::new(file, range.0).with_len(range.1),
            extra_range: extra.map(|(o, l)| SourceLoc::new(file, o).with_len(l)),
        };
        let mut out = Vec::new();
        StreamConsumer::new(&mut out).consume(&sm, &diag);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn renders_location_severity_and_carets() {
        let rendered = render("let x = 3", (4, 1), None);
        let mut lines = rendered.lines();
        assert_eq!(lines.next(), Some("t.fox:1:5 - Error - expected a ';'"));
        assert_eq!(lines.next(), Some("\tlet x = 3"));
        assert_eq!(lines.next(), Some("\t    ^"));
    }

    #[test]
    fn trims_indent_before_underlining() {
        let rendered = render("    let x = 3", (8, 1), None);
        assert!(rendered.contains("\tlet x = 3"));
        assert!(rendered.contains("\t    ^"));
    }

    #[test]
    fn merges_primary_and_extra_underlines() {
        // primary on 'x', extra over 'let'
        let rendered = render("let x = 3", (4, 1), Some((0, 3)));
        assert!(rendered.contains("\t~~~ ^"), "got: {rendered}");
    }

    #[test]
    fn carets_count_codepoints_not_bytes() {
        // 'é' is 2 bytes: a caret on the following 'x' must be at column 3.
        let rendered = render("é x = 3", (3, 1), None);
        assert!(rendered.contains("\t  ^"), "got: {rendered}");
    }

    #[test]
    fn multi_column_spans_print_an_end_column() {
        let rendered = render("let x = 3", (0, 3), None);
        assert!(rendered.starts_with("t.fox:1:1-3"), "got: {rendered}");
    }

    #[test]
    fn engine_counts_errors_and_mutes() {
        let mut sm = SourceManager::new();
        let file = sm.load_string("t.fox", "x");
        let range = SourceLoc::new(file, 0).with_len(1);
        let (consumer, diags) = BufferConsumer::new();
        let mut engine = DiagnosticEngine::new(&sm, Box::new(consumer));

        engine.report(DiagId::UndeclaredId, range, "undeclared").emit();
        assert_eq!(engine.error_count(), 1);

        engine.set_ignore_all(true);
        engine.report(DiagId::UndeclaredId, range, "muted").emit();
        engine.set_ignore_all(false);
        assert_eq!(engine.error_count(), 1);
        assert_eq!(diags.borrow().len(), 1);

        engine.report(DiagId::UselessRedundantCast, range, "useless").emit();
        assert_eq!(engine.warning_count(), 1);
        assert!(engine.had_errors());
    }
}
