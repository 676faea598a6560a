//! Diagrams command implementation
use super::open_document;
use crate::report::{envelope, DiagramData};
use anyhow::{bail, Result};
use std::path::Path;

/// Render every diagram block of `document`
pub async fn render_diagrams(config_path: &Path, document: &Path, json: bool) -> Result<()> {
    let doc = open_document(config_path, document).await?;
    let rendered = doc.render_diagrams().await?;
    doc.close().await;

    let failed = rendered.iter().filter(|d| d.error.is_some()).count();
    let cached = rendered.iter().filter(|d| d.cached).count();

    if json {
        let payload = envelope(
            "diagrams.results",
            DiagramData {
                document: document.display().to_string(),
                rendered: rendered.len() - failed,
                cached,
                diagrams: &rendered,
            },
        );
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for diagram in &rendered {
            let line = diagram.line + 1;
            match &diagram.error {
                Some(err) => println!("✗ {} (line {line}): {err}", diagram.kind),
                None if diagram.cached => println!("✓ {} (line {line}, cached)", diagram.kind),
                None => println!("✓ {} (line {line})", diagram.kind),
            }
        }
        println!(
            "\n{} diagram(s), {} from cache, {} failed",
            rendered.len(),
            cached,
            failed
        );
    }

    if failed > 0 {
        bail!("{failed} diagram(s) failed to render");
    }
    Ok(())
}
