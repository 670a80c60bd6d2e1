// SmartMark Core
//!
//! Plain-text dialogue protocol for ordinary documents.
//!
//! Contents:
//! - protocol: marker literals, turns, classifier
//! - scanner: backward context reconstruction
//! - writer: streaming insertion of assistant output
//! - session: chunk consumption with cooperative cancellation
//! - transport / llm: model output producers

pub mod config;
pub mod document;
pub mod error;
pub mod llm;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod transport;
pub mod writer;

pub use config::{ConfigError, SmartMarkConfig, SmartMarkConfigLoader};
pub use document::{Document, DocumentError, DocumentHandle, Position, TextBuffer};
pub use error::{Result, SmartMarkError};
pub use protocol::{
    ClassifiedLine, MarkerSet, Role, ScanMode, Transcript, Turn, classify, render_transcript,
};
pub use scanner::{ContextScanner, ScanReport, StopReason};
pub use session::{ReplyOutcome, ReplyReport, ReplySession};
pub use transport::{EventStream, ProviderTransport, Transport, TransportError, TransportEvent};
pub use writer::{InsertionCursor, StreamWriter, WriterError, WriterState};
