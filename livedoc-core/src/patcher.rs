//! Writing chunk output back into the document.
//!
//! Output lives in a delimited block right after its chunk. The file is
//! re-read on every patch since it may have been edited since the last scan,
//! and it is only written when the block actually changes.

use crate::scan::source_spans;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const OUTPUT_START: &str = "<!-- code_chunk_output -->";
pub const OUTPUT_END: &str = "<!-- /code_chunk_output -->";

/// Lines after a chunk searched for an existing output block
const LOOKAHEAD: usize = 3;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Inserted,
    Replaced,
    /// The block already held this output
    Unchanged,
    /// The document no longer has a construct at the offset
    NotFound,
}

impl PatchOutcome {
    pub fn wrote(self) -> bool {
        matches!(self, PatchOutcome::Inserted | PatchOutcome::Replaced)
    }
}

/// Patches one document file
///
/// Clones share a lock, so concurrent patches of the same file apply one
/// after another instead of overwriting each other.
#[derive(Debug, Clone)]
pub struct SourcePatcher {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl SourcePatcher {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Put `result` in the output block of the construct at `offset`
    pub async fn apply(&self, offset: usize, result: &str) -> Result<PatchOutcome, PatchError> {
        // Held from the read to the write
        let _patching = self.lock.lock().await;

        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| PatchError::Read {
                path: self.path.clone(),
                source,
            })?;

        let (patched, outcome) = patch_text(&text, offset, result);
        match patched {
            Some(patched) => {
                tokio::fs::write(&self.path, patched)
                    .await
                    .map_err(|source| PatchError::Write {
                        path: self.path.clone(),
                        source,
                    })?;
                debug!(path = %self.path.display(), offset, ?outcome, "patched document");
            }
            None if outcome == PatchOutcome::NotFound => {
                warn!(path = %self.path.display(), offset, "no chunk at offset, document left alone");
            }
            None => {}
        }
        Ok(outcome)
    }
}

/// Pure form of [`SourcePatcher::apply`]; `None` means nothing to write
///
/// The document's line ending (LF or CRLF) is kept, including inside the
/// inserted block.
pub fn patch_text(text: &str, offset: usize, result: &str) -> (Option<String>, PatchOutcome) {
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let result = result.replace("\r\n", "\n");
    let native = if newline == "\n" {
        result.clone()
    } else {
        result.replace('\n', newline)
    };

    let mut lines: Vec<&str> = text.lines().collect();
    let Some(span) = source_spans(&lines).get(offset).copied() else {
        return (None, PatchOutcome::NotFound);
    };

    let after = span.end + 1;
    let mut window = after..(after + LOOKAHEAD).min(lines.len());
    let existing = window
        .find(|&i| lines[i].trim() == OUTPUT_START)
        .and_then(|start| {
            lines[start + 1..]
                .iter()
                .position(|l| l.trim() == OUTPUT_END)
                .map(|rel| (start, start + 1 + rel))
        });

    let outcome = match existing {
        Some((start, end)) => {
            let inner = lines[start + 1..end].join("\n");
            if inner.trim_matches('\n') == result.trim_matches('\n') {
                return (None, PatchOutcome::Unchanged);
            }
            lines.splice(start + 1..end, ["", native.as_str(), ""]);
            PatchOutcome::Replaced
        }
        None => {
            let at = after.min(lines.len());
            lines.splice(at..at, ["", OUTPUT_START, "", native.as_str(), "", OUTPUT_END]);
            PatchOutcome::Inserted
        }
    };

    let mut patched = lines.join(newline);
    if text.ends_with('\n') || (outcome == PatchOutcome::Inserted && after >= text.lines().count()) {
        patched.push_str(newline);
    }
    (Some(patched), outcome)
}
