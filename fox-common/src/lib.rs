#![forbid(unsafe_code)]

mod diagnostics;
mod source;

pub use diagnostics::{
    BufferConsumer, DiagBuilder, DiagId, DiagSeverity, Diagnostic, DiagnosticConsumer,
    DiagnosticEngine, StreamConsumer,
};
pub use source::{CompleteLoc, FileId, FileLoadError, SourceLoc, SourceManager, SourceRange};
