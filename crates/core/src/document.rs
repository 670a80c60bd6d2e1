//! Document accessor
//!
//! Responsibilities:
//! - Line-addressed read/write abstraction the scanner and writer depend on
//! - In-memory `TextBuffer` implementation
//! - `DocumentHandle`: shared document with a single-writer lease

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Document access errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("Line {line} out of range (document has {line_count} lines)")]
    LineOutOfRange { line: usize, line_count: usize },

    #[error("Column {ch} out of range on line {line} (length {len})")]
    ColumnOutOfRange { line: usize, ch: usize, len: usize },

    #[error("No active document")]
    NoActiveDocument,

    #[error("A writer currently holds the document")]
    WriterActive,
}

/// 0-based line / byte column address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Position {
    pub line: usize,
    pub ch: usize,
}

impl Position {
    pub fn new(line: usize, ch: usize) -> Self {
        Self { line, ch }
    }

    /// Position reached after writing `text` starting here
    pub fn advance(self, text: &str) -> Self {
        match text.rfind('\n') {
            Some(idx) => Self {
                line: self.line + text.matches('\n').count(),
                ch: text.len() - idx - 1,
            },
            None => Self {
                line: self.line,
                ch: self.ch + text.len(),
            },
        }
    }
}

/// Line-indexed access to a mutable text buffer
pub trait Document: Send {
    /// Text of line `index`, without its line break
    fn line(&self, index: usize) -> Option<&str>;

    /// Number of lines; an empty document still has one empty line
    fn line_count(&self) -> usize;

    /// Line the editing cursor sits on, if the host has one
    fn cursor_line(&self) -> Option<usize>;

    /// Insert `text` at `at`. Newlines in `text` split lines.
    fn replace_range(&mut self, text: &str, at: Position) -> Result<(), DocumentError>;

    /// Index of the last line
    fn last_line(&self) -> usize {
        self.line_count().saturating_sub(1)
    }
}

/// In-memory line buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBuffer {
    lines: Vec<String>,
    cursor: Option<usize>,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self {
            lines: vec![String::new()],
            cursor: None,
        }
    }
}

impl TextBuffer {
    /// Split `text` into lines on `\n` (a trailing `\r` is dropped)
    pub fn from_text(text: &str) -> Self {
        let lines = text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();
        Self {
            lines,
            cursor: None,
        }
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        Self {
            lines,
            cursor: None,
        }
    }

    pub fn with_cursor(mut self, line: usize) -> Self {
        self.set_cursor_line(line);
        self
    }

    pub fn set_cursor_line(&mut self, line: usize) {
        self.cursor = Some(line.min(self.last_line()));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Full text, lines joined by `\n`
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

impl Document for TextBuffer {
    fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn cursor_line(&self) -> Option<usize> {
        self.cursor
    }

    fn replace_range(&mut self, text: &str, at: Position) -> Result<(), DocumentError> {
        let line_count = self.lines.len();
        let current = self
            .lines
            .get_mut(at.line)
            .ok_or(DocumentError::LineOutOfRange {
                line: at.line,
                line_count,
            })?;
        if at.ch > current.len() || !current.is_char_boundary(at.ch) {
            return Err(DocumentError::ColumnOutOfRange {
                line: at.line,
                ch: at.ch,
                len: current.len(),
            });
        }
        if text.is_empty() {
            return Ok(());
        }

        let tail = current.split_off(at.ch);
        let mut pieces = text.split('\n');
        if let Some(first) = pieces.next() {
            current.push_str(first);
        }
        let mut inserted: Vec<String> = pieces.map(str::to_string).collect();
        match inserted.last_mut() {
            Some(last) => last.push_str(&tail),
            None => current.push_str(&tail),
        }

        let added = inserted.len();
        let insert_at = at.line + 1;
        self.lines.splice(insert_at..insert_at, inserted);

        // keep the editing cursor on the same logical line
        if let Some(cursor) = self.cursor.as_mut()
            && *cursor > at.line
        {
            *cursor += added;
        }
        Ok(())
    }
}

/// Shared document plus its single-writer lease
pub struct DocumentHandle<D: Document> {
    document: Arc<Mutex<D>>,
    writer_active: Arc<AtomicBool>,
}

impl<D: Document> Clone for DocumentHandle<D> {
    fn clone(&self) -> Self {
        Self {
            document: Arc::clone(&self.document),
            writer_active: Arc::clone(&self.writer_active),
        }
    }
}

impl<D: Document> std::fmt::Debug for DocumentHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("writer_active", &self.is_writer_active())
            .finish_non_exhaustive()
    }
}

impl<D: Document> DocumentHandle<D> {
    pub fn new(document: D) -> Self {
        Self {
            document: Arc::new(Mutex::new(document)),
            writer_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Lock the document for synchronous reads or writes
    pub fn lock(&self) -> MutexGuard<'_, D> {
        // a poisoned lock still holds a consistent line vector
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_writer_active(&self) -> bool {
        self.writer_active.load(Ordering::Acquire)
    }

    /// Take the writer lease; `None` when another writer holds it
    pub(crate) fn acquire_writer(&self) -> Option<WriterLease> {
        self.writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| WriterLease {
                flag: Arc::clone(&self.writer_active),
            })
    }

    /// Consume the handle and return the document, if no other handle remains
    pub fn into_inner(self) -> Result<D, Self> {
        let writer_active = self.writer_active;
        match Arc::try_unwrap(self.document) {
            Ok(mutex) => Ok(mutex
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner())),
            Err(document) => Err(Self {
                document,
                writer_active,
            }),
        }
    }
}

/// Proof of exclusive write access; released on drop
#[derive(Debug)]
pub(crate) struct WriterLease {
    flag: Arc<AtomicBool>,
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
