//! Run command implementation
use super::open_document;
use crate::report::{envelope, ChunkReport, RunData};
use anyhow::{bail, Result};
use livedoc_types::ChunkId;
use std::path::Path;

/// Run one chunk, or every chunk, and report the results
pub async fn run_chunks(
    config_path: &Path,
    document: &Path,
    id: Option<&str>,
    json: bool,
) -> Result<()> {
    let doc = open_document(config_path, document).await?;

    let results = match id {
        Some(id) => {
            let id = ChunkId::new(id);
            if doc.executor().record(&id).is_none() {
                bail!("No chunk with id `{id}` in {}", document.display());
            }
            let result = doc.run(&id).await;
            vec![(id, result)]
        }
        None => doc.run_all().await,
    };

    let reports: Vec<ChunkReport> = results
        .into_iter()
        .map(|(id, result)| {
            let record = doc.executor().record(&id);
            let summary = record.as_ref().and_then(|r| r.last_run.clone());
            ChunkReport {
                id: id.to_string(),
                ran: result.is_some(),
                success: summary.as_ref().is_some_and(|s| s.success),
                exit_code: summary.as_ref().and_then(|s| s.exit_code),
                duration_ms: summary.as_ref().map(|s| s.duration.as_millis()),
                result: result.unwrap_or_default(),
                plain_result: record.map(|r| r.plain_result).unwrap_or_default(),
            }
        })
        .collect();
    doc.close().await;

    let failed = reports.iter().filter(|r| r.ran && !r.success).count();

    if json {
        let payload = envelope(
            "run.results",
            RunData {
                document: document.display().to_string(),
                total: reports.len(),
                failed,
                chunks: reports,
            },
        );
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        if reports.is_empty() {
            println!("No code chunks in {}", document.display());
        }
        for report in &reports {
            let mark = if report.success { "✓" } else { "✗" };
            println!("{mark} {}", report.id);
            if !report.plain_result.is_empty() {
                println!("{}", report.plain_result.trim_end());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} chunk(s) failed");
    }
    Ok(())
}
