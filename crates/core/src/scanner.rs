//! Reverse context scanner
//!
//! Walks a document upward from a start line and rebuilds the dialogue
//! transcript above it. Traversal is bounded by a turn-pair budget and
//! stops unconditionally at a hard terminator. Never fails on malformed
//! input: broken marker sequences only lose or ignore content.

use std::collections::VecDeque;
use tracing::{debug, trace};

use crate::document::{Document, DocumentError, DocumentHandle};
use crate::protocol::{ClassifiedLine, MarkerSet, Role, ScanMode, Transcript, Turn};

/// Why a scan stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Budget was zero, nothing was read
    EmptyBudget,
    /// A hard terminator was reached
    Terminated,
    /// `2 * budget` turns were collected
    BudgetReached,
    /// Line 0 was processed
    StartOfDocument,
}

/// Transcript plus traversal diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub transcript: Transcript,
    pub lines_visited: usize,
    pub stop: StopReason,
}

/// Per-invocation scan state, never shared
struct ScanState<'a> {
    mode: ScanMode,
    /// collected lines, bottom-most first
    buffer: Vec<&'a str>,
    turns: VecDeque<Turn>,
    cap: usize,
}

impl<'a> ScanState<'a> {
    fn new(cap: usize) -> Self {
        Self {
            mode: ScanMode::None,
            buffer: Vec::new(),
            turns: VecDeque::new(),
            cap,
        }
    }

    fn is_full(&self) -> bool {
        self.turns.len() >= self.cap
    }

    /// Prepend a turn; turns beyond the budget are older and get dropped
    fn emit(&mut self, role: Role, content: &str) {
        if self.is_full() {
            return;
        }
        if let Some(turn) = Turn::new(role, content) {
            self.turns.push_front(turn);
        }
    }

    fn flush(&mut self) {
        if let Some(role) = self.mode.role()
            && !self.buffer.is_empty()
        {
            let content = self
                .buffer
                .iter()
                .rev()
                .copied()
                .collect::<Vec<_>>()
                .join("\n");
            self.emit(role, &content);
        }
        self.buffer.clear();
    }

    fn open(&mut self, role: Role) {
        self.flush();
        self.mode = ScanMode::collecting(role);
    }

    fn inline(&mut self, role: Role, payload: &str) {
        self.flush();
        self.emit(role, payload);
        self.mode = ScanMode::None;
    }

    fn discard(&mut self) {
        self.buffer.clear();
        self.mode = ScanMode::None;
    }
}

/// Rebuilds transcripts from marker-form documents
#[derive(Debug, Clone, Default)]
pub struct ContextScanner {
    markers: MarkerSet,
}

impl ContextScanner {
    pub fn new(markers: MarkerSet) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Scan upward from `start_line` (inclusive), collecting at most
    /// `2 * budget` turns. `start_line = -1` starts at the last line.
    pub fn scan<D: Document + ?Sized>(&self, doc: &D, start_line: isize, budget: usize) -> Transcript {
        self.scan_report(doc, start_line, budget).transcript
    }

    /// Like [`scan`](Self::scan), with traversal diagnostics
    pub fn scan_report<D: Document + ?Sized>(
        &self,
        doc: &D,
        start_line: isize,
        budget: usize,
    ) -> ScanReport {
        if budget == 0 || doc.line_count() == 0 {
            return ScanReport {
                transcript: Vec::new(),
                lines_visited: 0,
                stop: StopReason::EmptyBudget,
            };
        }

        let last = doc.last_line();
        let start = usize::try_from(start_line).map_or(last, |line| line.min(last));

        let mut state = ScanState::new(budget.saturating_mul(2));
        let mut lines_visited = 0;
        let mut terminated = false;

        for index in (0..=start).rev() {
            if state.is_full() {
                break;
            }
            lines_visited += 1;
            let line = doc.line(index).unwrap_or_default();
            let classified = self.markers.classify(line);
            trace!(line = index, kind = classified.kind(), "classified");

            match classified {
                ClassifiedLine::Terminate => {
                    state.discard();
                    terminated = true;
                    break;
                }
                ClassifiedLine::SeparatorBoundary => {
                    state.flush();
                    state.mode = ScanMode::None;
                }
                ClassifiedLine::UserBlockBoundary => state.open(Role::User),
                ClassifiedLine::AssistantBlockBoundary => state.open(Role::Assistant),
                ClassifiedLine::UserInline(payload) => state.inline(Role::User, &payload),
                ClassifiedLine::AssistantInline(payload) => {
                    state.inline(Role::Assistant, &payload)
                }
                ClassifiedLine::PlainContent(_) => {
                    if state.mode != ScanMode::None {
                        state.buffer.push(line);
                    }
                }
            }
        }

        if !terminated {
            state.flush();
        }

        let stop = if terminated {
            StopReason::Terminated
        } else if state.is_full() {
            StopReason::BudgetReached
        } else {
            StopReason::StartOfDocument
        };

        let transcript: Transcript = state.turns.into();
        debug!(
            start,
            lines_visited,
            turns = transcript.len(),
            ?stop,
            "context scan finished"
        );

        ScanReport {
            transcript,
            lines_visited,
            stop,
        }
    }

    /// Scan a shared document. `start_line = None` uses the document's
    /// cursor line. Refuses to read while a writer holds the document.
    pub fn scan_handle<D: Document>(
        &self,
        handle: &DocumentHandle<D>,
        start_line: Option<isize>,
        budget: usize,
    ) -> Result<Transcript, DocumentError> {
        if handle.is_writer_active() {
            return Err(DocumentError::WriterActive);
        }
        let doc = handle.lock();
        let start = match start_line {
            Some(line) => line,
            None => doc
                .cursor_line()
                .and_then(|line| isize::try_from(line).ok())
                .ok_or(DocumentError::NoActiveDocument)?,
        };
        Ok(self.scan(&*doc, start, budget))
    }
}
