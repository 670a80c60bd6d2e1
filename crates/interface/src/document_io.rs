//! File-backed documents
//!
//! Loads a text file into a [`TextBuffer`] and writes it back.

use anyhow::Context;
use std::path::Path;

use smartmark_core::{Document, TextBuffer};

/// Read `path` into a buffer, cursor on `line` or on the last line
pub(crate) async fn load_document(path: &Path, line: Option<usize>) -> anyhow::Result<TextBuffer> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut buffer = TextBuffer::from_text(&text);
    let cursor = line.unwrap_or_else(|| buffer.last_line());
    buffer.set_cursor_line(cursor);
    Ok(buffer)
}

/// Write the buffer back, through a sibling temp file so a crash never
/// leaves a truncated document behind
pub(crate) async fn save_document(path: &Path, buffer: &TextBuffer) -> anyhow::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp = path.with_file_name(format!(".{}.smartmark.tmp", file_name));

    tokio::fs::write(&tmp, buffer.text())
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
