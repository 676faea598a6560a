//! One document and everything needed to process it.

use crate::attributes::AttributeError;
use crate::config::Config;
use crate::diagrams::{DiagramRenderer, RenderedDiagram};
use crate::executor::Executor;
use crate::registry::{ChunkRecord, RegistryError};
use crate::scan::{scan_document, DiagramBlock};
use livedoc_cache::ResultCache;
use livedoc_session::RenderSessionManager;
use livedoc_types::ChunkId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad chunk attributes: {0}")]
    Attributes(#[from] AttributeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to write diagram {path}: {source}")]
    WriteDiagram {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Processing context for a single markdown document
///
/// Owns the chunk executor, the result cache and the render sessions, so
/// nothing is shared between documents.
pub struct LiveDocument {
    path: PathBuf,
    config: Arc<Config>,
    executor: Executor,
    sessions: Arc<RenderSessionManager>,
    diagrams: DiagramRenderer,
    blocks: Mutex<Vec<DiagramBlock>>,
}

impl LiveDocument {
    /// Open and scan `path`
    pub async fn open(path: impl Into<PathBuf>, config: Arc<Config>) -> Result<Self, DocumentError> {
        let path = path.into();
        let mut sessions = RenderSessionManager::new(config.plantuml_command());
        if let Some(timeout) = config.execution.timeout() {
            sessions = sessions.with_timeout(timeout);
        }
        let sessions = Arc::new(sessions);
        let diagrams = DiagramRenderer::from_config(
            Arc::new(ResultCache::new()),
            Arc::clone(&sessions),
            &config,
        );

        let document = Self {
            executor: Executor::new(&path, Arc::clone(&config)),
            path,
            config,
            sessions,
            diagrams,
            blocks: Mutex::new(Vec::new()),
        };
        document.rescan().await?;
        Ok(document)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn sessions(&self) -> &Arc<RenderSessionManager> {
        &self.sessions
    }

    pub fn diagram_renderer(&self) -> &DiagramRenderer {
        &self.diagrams
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Re-read the document and re-register its chunks
    ///
    /// Returns the ids in document order.
    pub async fn rescan(&self) -> Result<Vec<ChunkId>, DocumentError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| DocumentError::Read {
                path: self.path.clone(),
                source,
            })?;
        let scan = scan_document(&text)?;

        // Reject before touching the registry so a bad edit keeps the last good chain
        let mut seen = HashSet::new();
        if let Some(dup) = scan.chunks.iter().find(|chunk| !seen.insert(&chunk.id)) {
            warn!(path = %self.path.display(), chunk = %dup.id, "duplicate chunk id, keeping previous scan");
            return Err(RegistryError::DuplicateId(dup.id.clone()).into());
        }

        let ids = self.executor.with_registry(|registry| {
            registry.begin_scan();
            let mut preceding: Option<ChunkId> = None;
            for chunk in scan.chunks {
                let mut record = ChunkRecord::new(chunk.id, chunk.code, chunk.attributes)
                    .with_lang(chunk.lang);
                if let Some(offset) = chunk.source_offset {
                    record = record.with_source_offset(offset);
                }
                let id = record.id.clone();
                registry.register(record, preceding.as_ref())?;
                preceding = Some(id);
            }
            Ok::<_, RegistryError>(registry.ids().to_vec())
        })?;

        self.executor.set_headings(scan.headings);
        *self.blocks.lock() = scan.diagrams;
        debug!(path = %self.path.display(), chunks = ids.len(), "scanned document");
        Ok(ids)
    }

    pub async fn run(&self, id: &ChunkId) -> Option<String> {
        self.executor.run(id).await
    }

    pub async fn run_all(&self) -> Vec<(ChunkId, Option<String>)> {
        self.executor.run_all().await
    }

    /// Run the chunks marked `run_on_save`
    pub async fn run_on_save(&self) -> Vec<(ChunkId, Option<String>)> {
        let ids: Vec<ChunkId> = self.executor.with_registry(|registry| {
            registry
                .records()
                .filter(|r| r.attributes.run_on_save)
                .map(|r| r.id.clone())
                .collect()
        });
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.executor.run(&id).await;
            results.push((id, result));
        }
        results
    }

    /// Render the diagram blocks of the last scan
    ///
    /// Blocks with a `filename` are also written into the image directory.
    pub async fn render_diagrams(&self) -> Result<Vec<RenderedDiagram>, DocumentError> {
        let blocks = self.blocks.lock().clone();
        let dir = self.dir();
        let rendered = self.diagrams.render_all(&dir, &blocks).await;

        let image_dir = self.config.image_dir_for(&dir);
        for diagram in &rendered {
            let Some(name) = &diagram.filename else { continue };
            if diagram.error.is_some() {
                continue;
            }
            let path = image_dir.join(name);
            let write = async {
                tokio::fs::create_dir_all(&image_dir).await?;
                tokio::fs::write(&path, &diagram.artifact).await
            };
            write
                .await
                .map_err(|source| DocumentError::WriteDiagram { path: path.clone(), source })?;
            info!(path = %path.display(), "wrote diagram");
        }
        Ok(rendered)
    }

    pub fn clear_caches(&self) {
        self.diagrams.cache().clear();
    }

    /// Stop every render session
    pub async fn close(&self) {
        if self.sessions.pending(&self.dir()) > 0 {
            warn!(path = %self.path.display(), "closing with diagram requests still pending");
        }
        self.sessions.shutdown().await;
    }
}
