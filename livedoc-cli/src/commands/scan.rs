//! Scan command implementation
use crate::report::envelope;
use anyhow::{Context, Result};
use livedoc_core::scan_document;
use std::path::Path;

/// Print what the scanner finds in `document` as JSON
pub async fn scan_chunks(document: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(document)
        .await
        .with_context(|| format!("Failed to read {}", document.display()))?;
    let scan = scan_document(&text).context("Failed to scan document")?;

    tracing::debug!(
        chunks = scan.chunks.len(),
        diagrams = scan.diagrams.len(),
        "scanned {}",
        document.display()
    );

    let json = serde_json::to_string_pretty(&envelope("scan.result", scan))?;
    println!("{json}");
    Ok(())
}
