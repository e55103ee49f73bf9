use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised by the registry transform
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("function id collision: {id} is claimed by {existing} and {incoming}")]
    IdCollision {
        id: String,
        existing: String,
        incoming: String,
    },
}

/// A located compiler diagnostic
///
/// Renders like:
///
/// ```text
/// error: Unexpected token
///   --> routes/index.tsx:3:9
///    |
///  3 | const = 1;
///    |       ^
///    = help: Try inserting an identifier
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CompileError {
    pub file: PathBuf,
    /// 1-based line
    pub line: usize,
    /// 1-based column, in characters
    pub column: usize,
    /// Underlined length, in characters (at least 1)
    pub length: usize,
    pub message: String,
    pub suggestion: Option<String>,
    /// Text of the offending line
    pub line_text: String,
}

impl CompileError {
    /// Locates a byte span inside `source`
    pub fn at_offset(
        file: &Path,
        source: &str,
        offset: usize,
        len: usize,
        message: impl Into<String>,
        suggestion: Option<String>,
    ) -> Self {
        let offset = floor_char_boundary(source, offset.min(source.len()));
        let before = &source[..offset];
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let line_end = source[offset..]
            .find('\n')
            .map_or(source.len(), |i| offset + i);
        let line_text = source[line_start..line_end].trim_end_matches('\r');

        let end = floor_char_boundary(source, (offset + len).min(line_end));
        let length = source[offset..end].chars().count().max(1);

        CompileError {
            file: file.to_path_buf(),
            line: before.matches('\n').count() + 1,
            column: source[line_start..offset].chars().count() + 1,
            length,
            message: message.into(),
            suggestion,
            line_text: line_text.to_string(),
        }
    }

    /// Error without a meaningful location (first line, first column)
    pub fn whole_file(file: &Path, message: impl Into<String>) -> Self {
        CompileError {
            file: file.to_path_buf(),
            line: 1,
            column: 1,
            length: 1,
            message: message.into(),
            suggestion: None,
            line_text: String::new(),
        }
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gutter = self.line.to_string().len();
        writeln!(f, "error: {}", self.message)?;
        writeln!(
            f,
            "{:gutter$}--> {}:{}:{}",
            "",
            self.file.display(),
            self.line,
            self.column
        )?;
        writeln!(f, "{:gutter$} |", "")?;
        writeln!(f, "{} | {}", self.line, self.line_text)?;
        write!(
            f,
            "{:gutter$} | {}{}",
            "",
            " ".repeat(self.column.saturating_sub(1)),
            "^".repeat(self.length)
        )?;
        if let Some(help) = &self.suggestion {
            write!(f, "\n{:gutter$} = help: {}", "", help)?;
        }
        Ok(())
    }
}

/// Severity of a non-fatal transform diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
}

/// Non-fatal finding, e.g. a hook call whose argument could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "warning: {} ({}:{}:{})",
            self.message,
            self.file.display(),
            self.line,
            self.column
        )
    }
}
