//! Crate-level error type

use thiserror::Error;

use crate::config::ConfigError;
use crate::document::DocumentError;
use crate::llm::provider::ProviderError;
use crate::transport::TransportError;
use crate::writer::WriterError;

/// Errors surfaced to callers of the core
#[derive(Debug, Error)]
pub enum SmartMarkError {
    #[error("No active document")]
    NoActiveDocument,

    #[error(transparent)]
    Document(DocumentError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("Transport cancelled")]
    TransportCancelled,

    #[error("Transport failed: {0}")]
    TransportFailed(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<DocumentError> for SmartMarkError {
    fn from(error: DocumentError) -> Self {
        match error {
            DocumentError::NoActiveDocument => SmartMarkError::NoActiveDocument,
            other => SmartMarkError::Document(other),
        }
    }
}

impl From<TransportError> for SmartMarkError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled => SmartMarkError::TransportCancelled,
            TransportError::Failed(message) => SmartMarkError::TransportFailed(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, SmartMarkError>;
