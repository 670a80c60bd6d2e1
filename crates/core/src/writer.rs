//! Streaming insertion writer
//!
//! Writes one assistant block into a document as generated text arrives:
//! opens the block with a separator, appends each chunk right after the
//! last byte it wrote itself, and closes the block with `= =`.
//!
//! State machine: `Idle -> Open -> Closed`. Only one writer may hold a
//! document at a time; the lease is released on finalize or drop.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

use crate::document::{Document, DocumentError, DocumentHandle, Position, WriterLease};
use crate::protocol::{ASSISTANT_TOKEN, MarkerSet};

static THOUGHT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(/?)(think(?:ing)?)>").expect("valid thought tag pattern"));

const THOUGHT_TAGS: [&str; 4] = ["<think>", "</think>", "<thinking>", "</thinking>"];

/// Writer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Open,
    Closed,
}

impl std::fmt::Display for WriterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterState::Idle => write!(f, "idle"),
            WriterState::Open => write!(f, "open"),
            WriterState::Closed => write!(f, "closed"),
        }
    }
}

/// Writer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriterError {
    #[error("Cannot {operation} while writer is {state}")]
    InvalidState {
        operation: &'static str,
        state: WriterState,
    },

    #[error("Writer already has an open insertion cursor")]
    AlreadyOpen,

    #[error("Another writer is streaming into this document")]
    DocumentBusy,

    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Next write position of an open block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionCursor {
    /// Line where streamed content starts
    pub line: usize,
    /// Column where streamed content starts
    pub column: usize,
    /// Bytes written since `open`
    pub bytes_written: usize,
}

/// Rewrites `<think>`-style tags into `[think]` so they never read as markup.
/// Holds back a trailing partial tag until the next chunk completes it.
#[derive(Debug, Default)]
struct ThoughtTagFilter {
    pending: String,
}

impl ThoughtTagFilter {
    fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let split = self
            .pending
            .rfind('<')
            .filter(|&idx| {
                let tail = &self.pending[idx..];
                THOUGHT_TAGS
                    .iter()
                    .any(|tag| tag.len() > tail.len() && tag.starts_with(tail))
            })
            .unwrap_or(self.pending.len());
        let ready: String = self.pending.drain(..split).collect();
        rewrite_thought_tags(&ready)
    }

    fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        rewrite_thought_tags(&rest)
    }
}

fn rewrite_thought_tags(text: &str) -> String {
    THOUGHT_TAG_RE.replace_all(text, "[$1$2]").into_owned()
}

/// Streams one assistant block into a shared document
pub struct StreamWriter<D: Document> {
    handle: DocumentHandle<D>,
    markers: MarkerSet,
    timestamp: bool,
    state: WriterState,
    origin: Position,
    head: Position,
    bytes_written: usize,
    lease: Option<WriterLease>,
    filter: ThoughtTagFilter,
}

impl<D: Document> std::fmt::Debug for StreamWriter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("state", &self.state)
            .field("origin", &self.origin)
            .field("head", &self.head)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl<D: Document> StreamWriter<D> {
    pub fn new(handle: DocumentHandle<D>, markers: MarkerSet) -> Self {
        Self {
            handle,
            markers,
            timestamp: false,
            state: WriterState::Idle,
            origin: Position::default(),
            head: Position::default(),
            bytes_written: 0,
            lease: None,
            filter: ThoughtTagFilter::default(),
        }
    }

    /// Append a timestamp comment line after the closing boundary
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.timestamp = enabled;
        self
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Current cursor, only while open
    pub fn cursor(&self) -> Option<InsertionCursor> {
        (self.state == WriterState::Open).then(|| self.insertion_cursor())
    }

    /// Position right after the last byte this writer wrote
    pub fn head(&self) -> Position {
        self.head
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    fn insertion_cursor(&self) -> InsertionCursor {
        InsertionCursor {
            line: self.origin.line,
            column: self.origin.ch,
            bytes_written: self.bytes_written,
        }
    }

    /// Open a block below `after_line`: a separator line, then an empty
    /// line that receives the streamed content.
    pub fn open(&mut self, after_line: usize) -> Result<InsertionCursor, WriterError> {
        match self.state {
            WriterState::Idle => {}
            WriterState::Open => return Err(WriterError::AlreadyOpen),
            WriterState::Closed => {
                return Err(WriterError::InvalidState {
                    operation: "open",
                    state: self.state,
                });
            }
        }

        let lease = self
            .handle
            .acquire_writer()
            .ok_or(WriterError::DocumentBusy)?;

        {
            let mut doc = self.handle.lock();
            let line_count = doc.line_count();
            let end = doc
                .line(after_line)
                .map(str::len)
                .ok_or(DocumentError::LineOutOfRange {
                    line: after_line,
                    line_count,
                })?;
            let opening = format!("\n{}\n", self.markers.separator());
            doc.replace_range(&opening, Position::new(after_line, end))?;
        }

        self.origin = Position::new(after_line + 2, 0);
        self.head = self.origin;
        self.bytes_written = 0;
        self.lease = Some(lease);
        self.state = WriterState::Open;
        debug!(line = self.origin.line, "insertion cursor opened");
        Ok(self.insertion_cursor())
    }

    /// Write a chunk after the last byte written by this writer
    pub fn append(&mut self, chunk: &str) -> Result<InsertionCursor, WriterError> {
        self.ensure_open("append")?;
        let text = self.filter.push(chunk);
        self.write_at_head(&text)?;
        Ok(self.insertion_cursor())
    }

    /// Close the block. `normal = false` marks it as interrupted.
    pub fn finalize(&mut self, normal: bool) -> Result<InsertionCursor, WriterError> {
        self.ensure_open("finalize")?;

        let result = self.write_closing(normal);
        let cursor = self.insertion_cursor();

        // closed even when the closing write failed, never left dangling
        self.state = WriterState::Closed;
        self.lease = None;
        debug!(normal, bytes_written = self.bytes_written, "insertion cursor closed");

        result.map(|_| cursor)
    }

    /// Interrupt the block: `finalize(false)`
    pub fn cancel(&mut self) -> Result<InsertionCursor, WriterError> {
        self.finalize(false)
    }

    fn write_closing(&mut self, normal: bool) -> Result<(), WriterError> {
        let rest = self.filter.flush();
        self.write_at_head(&rest)?;

        let mut closing = String::from("\n");
        if !normal {
            closing.push_str(&self.markers.interruption_tag);
            closing.push('\n');
        }
        closing.push_str(ASSISTANT_TOKEN);
        if self.timestamp {
            closing.push_str(&format!(
                "\n<!-- {} -->",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            ));
        }
        self.write_at_head(&closing)
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), WriterError> {
        if self.state == WriterState::Open {
            Ok(())
        } else {
            Err(WriterError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn write_at_head(&mut self, text: &str) -> Result<(), WriterError> {
        if text.is_empty() {
            return Ok(());
        }
        self.handle.lock().replace_range(text, self.head)?;
        self.head = self.head.advance(text);
        self.bytes_written += text.len();
        Ok(())
    }
}
