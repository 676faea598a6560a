//! CLI command implementations.

pub mod diagrams;
pub mod run;
pub mod scan;

pub use diagrams::render_diagrams;
pub use run::run_chunks;
pub use scan::scan_chunks;

use anyhow::{Context, Result};
use livedoc_core::{Config, LiveDocument};
use std::path::Path;
use std::sync::Arc;

/// Load the configuration and open `document`
pub(crate) async fn open_document(config_path: &Path, document: &Path) -> Result<LiveDocument> {
    let config = Config::load_or_default(config_path).context("Failed to load configuration")?;
    LiveDocument::open(document, Arc::new(config))
        .await
        .with_context(|| format!("Failed to open {}", document.display()))
}
