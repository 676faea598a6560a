//! Diagram blocks rendered to SVG.
//!
//! PlantUML goes through a long-lived renderer per directory, Graphviz through
//! one `dot` process per diagram. Both sit behind [`DiagramBackend`] and share
//! the document's [`ResultCache`], so a definition repeated within a render
//! pass is rendered once.

use crate::config::Config;
use crate::scan::DiagramBlock;
use async_trait::async_trait;
use livedoc_cache::{CacheKey, ResultCache};
use livedoc_session::{RenderSessionManager, SessionError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramKind {
    PlantUml,
    Graphviz,
}

impl DiagramKind {
    /// Diagram kind for a fence language, if it is one
    pub fn from_lang(lang: &str) -> Option<Self> {
        match lang.to_ascii_lowercase().as_str() {
            "puml" | "plantuml" => Some(DiagramKind::PlantUml),
            "dot" | "graphviz" | "viz" => Some(DiagramKind::Graphviz),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramKind::PlantUml => "plantuml",
            DiagramKind::Graphviz => "graphviz",
        }
    }
}

impl fmt::Display for DiagramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DiagramError {
    #[error("no renderer configured for {0} diagrams")]
    NoBackend(DiagramKind),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {status:?}: {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("diagram renderer timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that turns one diagram definition into SVG
#[async_trait]
pub trait DiagramBackend: Send + Sync {
    async fn render(&self, dir: &Path, code: &str) -> Result<String, DiagramError>;
}

/// PlantUML through the per-directory render sessions
pub struct PlantUmlBackend {
    sessions: Arc<RenderSessionManager>,
}

impl PlantUmlBackend {
    pub fn new(sessions: Arc<RenderSessionManager>) -> Self {
        Self { sessions }
    }
}

/// Wrap a bare definition in `@startuml`/`@enduml` unless it already has them
fn plantuml_request(code: &str) -> String {
    let body = code.trim();
    if body.starts_with("@start") {
        body.to_string()
    } else {
        format!("@startuml\n{body}\n@enduml")
    }
}

#[async_trait]
impl DiagramBackend for PlantUmlBackend {
    async fn render(&self, dir: &Path, code: &str) -> Result<String, DiagramError> {
        Ok(self.sessions.render(dir, &plantuml_request(code)).await?)
    }
}

/// Graphviz through a one-shot `dot -Tsvg`
pub struct GraphvizBackend {
    program: String,
    timeout: Option<Duration>,
}

impl GraphvizBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl DiagramBackend for GraphvizBackend {
    async fn render(&self, dir: &Path, code: &str) -> Result<String, DiagramError> {
        let mut child = Command::new(&self.program)
            .arg("-Tsvg")
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DiagramError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let code = code.to_string();
            tokio::spawn(async move {
                if let Err(err) = stdin.write_all(code.as_bytes()).await {
                    warn!(%err, "failed writing diagram to dot");
                }
            });
        }

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| DiagramError::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            return Err(DiagramError::Failed {
                program: self.program.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedDiagram {
    pub kind: DiagramKind,
    pub line: usize,
    pub filename: Option<String>,
    /// SVG text, empty when rendering failed
    pub artifact: String,
    pub cached: bool,
    pub error: Option<String>,
}

/// Renders a document's diagram blocks through the shared result cache
pub struct DiagramRenderer {
    cache: Arc<ResultCache>,
    backends: HashMap<DiagramKind, Arc<dyn DiagramBackend>>,
}

impl DiagramRenderer {
    pub fn new(cache: Arc<ResultCache>) -> Self {
        Self {
            cache,
            backends: HashMap::new(),
        }
    }

    /// PlantUML and Graphviz backends as configured
    pub fn from_config(
        cache: Arc<ResultCache>,
        sessions: Arc<RenderSessionManager>,
        config: &Config,
    ) -> Self {
        Self::new(cache)
            .with_backend(DiagramKind::PlantUml, Arc::new(PlantUmlBackend::new(sessions)))
            .with_backend(
                DiagramKind::Graphviz,
                Arc::new(
                    GraphvizBackend::new(&config.graphviz.program)
                        .with_timeout(config.execution.timeout()),
                ),
            )
    }

    pub fn with_backend(mut self, kind: DiagramKind, backend: Arc<dyn DiagramBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Render every block as one cache pass
    ///
    /// Blocks are rendered in order, so a repeated definition is a cache hit.
    /// Entries not reconfirmed by this pass are evicted when it commits.
    pub async fn render_all(&self, dir: &Path, blocks: &[DiagramBlock]) -> Vec<RenderedDiagram> {
        let pass = self.cache.begin_pass();
        let mut rendered = Vec::with_capacity(blocks.len());

        for block in blocks {
            let options = format!("{}:{}", block.kind, block.options);
            let key = CacheKey::for_render(&options, &block.code, block.filename.as_deref());

            let mut diagram = RenderedDiagram {
                kind: block.kind,
                line: block.line,
                filename: block.filename.clone(),
                artifact: String::new(),
                cached: false,
                error: None,
            };

            if let Some(hit) = pass.get(&key) {
                debug!(kind = %block.kind, line = block.line, "diagram cache hit");
                diagram.artifact = hit;
                diagram.cached = true;
                rendered.push(diagram);
                continue;
            }

            let result = match self.backends.get(&block.kind) {
                Some(backend) => backend.render(dir, &block.code).await,
                None => Err(DiagramError::NoBackend(block.kind)),
            };
            match result {
                Ok(svg) => {
                    pass.put(key, svg.clone());
                    diagram.artifact = svg;
                }
                Err(err) => {
                    warn!(kind = %block.kind, line = block.line, %err, "diagram failed to render");
                    diagram.error = Some(err.to_string());
                }
            }
            rendered.push(diagram);
        }

        let evicted = pass.commit();
        if evicted > 0 {
            info!(evicted, "dropped diagrams no longer in the document");
        }
        rendered
    }
}
