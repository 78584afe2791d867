use std::cell::OnceCell;
use std::fmt;
use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

/// Opaque handle to a file loaded in a [`SourceManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId(u32);

impl FileId {
    const INVALID: FileId = FileId(u32::MAX);
}

/// A position inside a loaded file, as a byte offset.
///
/// The default value is an invalid sentinel, used for synthetic nodes that
/// have no source (e.g. builtin function declarations).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: FileId,
    pub offset: u32,
}

impl SourceLoc {
    pub fn new(file: FileId, offset: u32) -> Self {
        Self { file, offset }
    }

    pub fn invalid() -> Self {
        Self { file: FileId::INVALID, offset: 0 }
    }

    pub fn is_valid(self) -> bool {
        self.file != FileId::INVALID
    }

    /// Range starting here with the given byte length.
    pub fn with_len(self, len: u32) -> SourceRange {
        SourceRange::new(self, len)
    }
}

/// A half-open byte range `[begin, begin + len)` inside a single file.
///
/// A length of zero denotes a single point (an insertion position such as
/// end-of-file); renderers still draw one caret for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRange {
    pub begin: SourceLoc,
    pub len: u32,
}

impl SourceRange {
    pub fn new(begin: SourceLoc, len: u32) -> Self {
        Self { begin, len }
    }

    pub fn invalid() -> Self {
        Self { begin: SourceLoc::invalid(), len: 0 }
    }

    pub fn is_valid(self) -> bool {
        self.begin.is_valid()
    }

    pub fn file(self) -> FileId {
        self.begin.file
    }

    /// Exclusive end position.
    pub fn end(self) -> SourceLoc {
        SourceLoc::new(self.begin.file, self.begin.offset + self.len)
    }

    /// The smallest range covering both `self` and `other`.
    pub fn to(self, other: SourceRange) -> SourceRange {
        debug_assert_eq!(self.file(), other.file(), "ranges from different files");
        let begin = self.begin.offset.min(other.begin.offset);
        let end = self.end().offset.max(other.end().offset);
        SourceRange::new(SourceLoc::new(self.file(), begin), end - begin)
    }

    pub fn contains(self, other: SourceRange) -> bool {
        self.file() == other.file()
            && self.begin.offset <= other.begin.offset
            && other.end().offset <= self.end().offset
    }
}

/// A human-readable location, derived on demand from a [`SourceLoc`].
/// Line and column are 1-based; the column counts codepoints, not bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompleteLoc {
    pub file_name: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for CompleteLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_name, self.line, self.column)
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("could not load '{path}': {source}")]
#[diagnostic(code(fox::source))]
pub struct FileLoadError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}

struct SourceFile {
    name: String,
    content: String,
    // Byte offsets of line starts, computed on first location query.
    line_starts: OnceCell<Vec<u32>>,
}

/// Owns the content of every loaded file and answers location queries.
#[derive(Default)]
pub struct SourceManager {
    files: Vec<SourceFile>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file(&mut self, path: &Path) -> Result<FileId, FileLoadError> {
        let bytes = std::fs::read(path).map_err(|source| FileLoadError {
            path: path.display().to_string(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(self.load_string(path.display().to_string(), text))
    }

    pub fn load_string(&mut self, name: impl Into<String>, text: impl Into<String>) -> FileId {
        let mut content = text.into();
        // A leading UTF-8 BOM is not part of the source.
        if let Some(stripped) = content.strip_prefix('\u{feff}') {
            content = stripped.to_string();
        }
        let id = FileId(self.files.len() as u32);
        self.files.push(SourceFile {
            name: name.into(),
            content,
            line_starts: OnceCell::new(),
        });
        id
    }

    pub fn file_name(&self, file: FileId) -> &str {
        &self.file(file).name
    }

    pub fn content(&self, file: FileId) -> &str {
        &self.file(file).content
    }

    /// Resolves a location to `(file, line, column)`, with the column measured
    /// in codepoints from the line start.
    pub fn complete_loc(&self, loc: SourceLoc) -> CompleteLoc {
        let file = self.file(loc.file);
        let starts = self.line_starts(loc.file);
        let line_idx = match starts.binary_search(&loc.offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let line_start = starts[line_idx] as usize;
        let column = file.content[line_start..loc.offset as usize].chars().count() as u32 + 1;
        CompleteLoc {
            file_name: file.name.clone(),
            line: line_idx as u32 + 1,
            column,
        }
    }

    /// The full line containing `loc` (without its terminator) and the byte
    /// offset of the line's start.
    pub fn line_at(&self, loc: SourceLoc) -> (&str, u32) {
        let content = self.content(loc.file);
        let starts = self.line_starts(loc.file);
        let line_idx = match starts.binary_search(&loc.offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = starts[line_idx] as usize;
        let rest = &content[start..];
        let end = rest.find('\n').unwrap_or(rest.len());
        let line = rest[..end].strip_suffix('\r').unwrap_or(&rest[..end]);
        (line, start as u32)
    }

    fn file(&self, file: FileId) -> &SourceFile {
        &self.files[file.0 as usize]
    }

    fn line_starts(&self, file: FileId) -> &[u32] {
        let file = self.file(file);
        file.line_starts.get_or_init(|| {
            let mut starts = vec![0u32];
            for (idx, byte) in file.content.bytes().enumerate() {
                if byte == b'\n' {
                    starts.push(idx as u32 + 1);
                }
            }
            starts
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_is_stripped() {
        let mut sm = SourceManager::new();
        let file = sm.load_string("t.fox", "\u{feff}let x;");
        assert_eq!(sm.content(file), "let x;");
    }

    #[test]
    fn complete_loc_counts_codepoints() {
        let mut sm = SourceManager::new();
        // 'é' is two bytes; the column after it must still be 3.
        let file = sm.load_string("t.fox", "é x\nsecond");
        let loc = SourceLoc::new(file, 3);
        let complete = sm.complete_loc(loc);
        assert_eq!((complete.line, complete.column), (1, 3));

        let second = sm.complete_loc(SourceLoc::new(file, 5));
        assert_eq!((second.line, second.column), (2, 1));
    }

    #[test]
    fn columns_round_trip_over_utf8() {
        let mut sm = SourceManager::new();
        let src = "aé中b\nx";
        let file = sm.load_string("t.fox", src);
        for (offset, _) in src.char_indices() {
            let loc = SourceLoc::new(file, offset as u32);
            let complete = sm.complete_loc(loc);
            let (line, line_start) = sm.line_at(loc);
            let prefix = &line[..(offset as u32 - line_start) as usize];
            assert_eq!(complete.column as usize, prefix.chars().count() + 1);
        }
    }

    #[test]
    fn line_at_trims_crlf() {
        let mut sm = SourceManager::new();
        let file = sm.load_string("t.fox", "first\r\nsecond");
        let (line, start) = sm.line_at(SourceLoc::new(file, 2));
        assert_eq!((line, start), ("first", 0));
        let (line, start) = sm.line_at(SourceLoc::new(file, 8));
        assert_eq!((line, start), ("second", 7));
    }

    #[test]
    fn range_join_and_containment() {
        let mut sm = SourceManager::new();
        let file = sm.load_string("t.fox", "abcdef");
        let a = SourceLoc::new(file, 0).with_len(2);
        let b = SourceLoc::new(file, 4).with_len(2);
        let joined = a.to(b);
        assert_eq!((joined.begin.offset, joined.len), (0, 6));
        assert!(joined.contains(b));
        assert!(!a.contains(b));
    }
}
