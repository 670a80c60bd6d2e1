//! Reply session
//!
//! Responsibilities:
//! - Own one assistant-turn write for one document
//! - Consume transport chunks in order and stream them into the writer
//! - Observe cancellation between chunks and close the block exactly once
//!
//! A session is single-use: one `ReplySession` per generated turn. Several
//! sessions on different documents are independent values.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::SmartMarkConfig;
use crate::document::{Document, DocumentHandle};
use crate::error::Result;
use crate::protocol::{MarkerSet, Transcript, Turn};
use crate::scanner::ContextScanner;
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::writer::{StreamWriter, WriterError};

/// How a reply ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl From<TransportError> for ReplyOutcome {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled => ReplyOutcome::Cancelled,
            TransportError::Failed(message) => ReplyOutcome::Failed(message),
        }
    }
}

/// Summary of a finished reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyReport {
    pub session_id: Ulid,
    pub outcome: ReplyOutcome,
    pub chunks: usize,
    pub bytes_written: usize,
}

enum Step<T> {
    Cancelled,
    Ready(T),
}

/// One in-flight assistant turn bound to one document
pub struct ReplySession<D: Document> {
    id: Ulid,
    handle: DocumentHandle<D>,
    scanner: ContextScanner,
    writer: StreamWriter<D>,
    cancel: CancellationToken,
    system_prompt: String,
    depth: usize,
}

impl<D: Document> std::fmt::Debug for ReplySession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySession")
            .field("id", &self.id)
            .field("writer", &self.writer)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl<D: Document> ReplySession<D> {
    pub fn new(handle: DocumentHandle<D>, config: &SmartMarkConfig) -> Self {
        let markers = MarkerSet::from(&config.markers);
        let writer = StreamWriter::new(handle.clone(), markers.clone())
            .with_timestamp(config.markers.timestamp);
        Self {
            id: Ulid::new(),
            handle,
            scanner: ContextScanner::new(markers),
            writer,
            cancel: CancellationToken::new(),
            system_prompt: config.system_prompt.clone(),
            depth: config.context.depth,
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn writer(&self) -> &StreamWriter<D> {
        &self.writer
    }

    /// Token that interrupts the reply when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Transcript above `start_line` (or the cursor), bounded by the
    /// configured depth
    pub fn transcript(&self, start_line: Option<isize>) -> Result<Transcript> {
        Ok(self.scanner.scan_handle(&self.handle, start_line, self.depth)?)
    }

    /// Stream a reply below `after_line`
    pub async fn stream_reply<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        transcript: &[Turn],
        after_line: usize,
    ) -> Result<ReplyReport> {
        self.writer.open(after_line)?;
        info!(session = %self.id, after_line, turns = transcript.len(), "reply started");

        let cancel = self.cancel.clone();
        let system_prompt = self.system_prompt.clone();

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            result = transport.stream(&system_prompt, transcript) => Step::Ready(result),
        };
        let mut stream = match started {
            Step::Cancelled => return self.finish(ReplyOutcome::Cancelled, 0),
            Step::Ready(Err(e)) => return self.finish(e.into(), 0),
            Step::Ready(Ok(stream)) => stream,
        };

        let mut chunks = 0;
        let outcome = loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                event = stream.next() => Step::Ready(event),
            };
            match step {
                Step::Cancelled => break ReplyOutcome::Cancelled,
                Step::Ready(Some(TransportEvent::Chunk(text))) => {
                    if let Err(e) = self.writer.append(&text) {
                        // close the block before surfacing the write error
                        self.abort_block(&e);
                        return Err(e.into());
                    }
                    chunks += 1;
                }
                Step::Ready(Some(TransportEvent::Done)) | Step::Ready(None) => {
                    break ReplyOutcome::Completed;
                }
                Step::Ready(Some(TransportEvent::Error(e))) => break e.into(),
            }
        };
        drop(stream);

        self.finish(outcome, chunks)
    }

    /// Request a whole reply at once and write it below `after_line`
    pub async fn complete_reply<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        transcript: &[Turn],
        after_line: usize,
    ) -> Result<ReplyReport> {
        self.writer.open(after_line)?;
        info!(session = %self.id, after_line, turns = transcript.len(), "reply started");

        let cancel = self.cancel.clone();
        let system_prompt = self.system_prompt.clone();

        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            result = transport.complete(&system_prompt, transcript) => Step::Ready(result),
        };
        match step {
            Step::Cancelled => self.finish(ReplyOutcome::Cancelled, 0),
            Step::Ready(Err(e)) => self.finish(e.into(), 0),
            Step::Ready(Ok(text)) => {
                if let Err(e) = self.writer.append(&text) {
                    self.abort_block(&e);
                    return Err(e.into());
                }
                self.finish(ReplyOutcome::Completed, 1)
            }
        }
    }

    /// Close the block after a failed append, keeping the append error primary
    fn abort_block(&mut self, cause: &WriterError) {
        if let Err(e) = self.writer.finalize(false) {
            warn!(session = %self.id, %cause, "closing interrupted block failed: {}", e);
        }
    }

    fn finish(&mut self, outcome: ReplyOutcome, chunks: usize) -> Result<ReplyReport> {
        let normal = outcome == ReplyOutcome::Completed;
        self.writer.finalize(normal)?;

        let bytes_written = self.writer.bytes_written();
        match &outcome {
            ReplyOutcome::Completed => {
                info!(session = %self.id, chunks, bytes_written, "reply completed")
            }
            ReplyOutcome::Cancelled => {
                info!(session = %self.id, chunks, bytes_written, "reply cancelled")
            }
            ReplyOutcome::Failed(message) => {
                warn!(session = %self.id, chunks, "reply failed: {}", message)
            }
        }

        Ok(ReplyReport {
            session_id: self.id,
            outcome,
            chunks,
            bytes_written,
        })
    }
}
