//! Running code chunks.
//!
//! [`Executor::run`] never fails: every error ends up as an error block in
//! the chunk's result. At most one run per chunk id is in flight; a second
//! call while the first is running returns `None` immediately and is not
//! queued.

pub mod builtins;
pub mod command;
pub mod output;

use crate::attributes::CommandSpec;
use crate::config::Config;
use crate::patcher::{PatchError, SourcePatcher};
use crate::registry::{ChunkRecord, ChunkRegistry, RunSummary};
use builtins::{DitaaRun, TocOptions};
use command::{CommandOutput, CommandRun};
use futures::future::join_all;
use livedoc_types::{ChunkId, Heading, OutputFormat};
use output::{error_block, render_output, source_output, MarkdownRenderer, PulldownMarkdown};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("code chunk execution is disabled")]
    Disabled,

    #[error("chunk has no command to run")]
    NoCommand,

    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with status {}\n{output}", .exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    Failed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    #[error("failed to write output into the document: {0}")]
    Patch(#[from] PatchError),
}

/// What a run produced before post-processing
#[derive(Debug)]
struct Execution {
    raw: Vec<u8>,
    output: OutputFormat,
    exit_code: Option<i32>,
}

/// Snapshot of a record taken when its run starts
#[derive(Debug)]
struct Prepared {
    id: ChunkId,
    lang: String,
    code: String,
    attributes: crate::attributes::ChunkAttributes,
    source_offset: Option<usize>,
}

/// Clears `running` however the run ends
struct RunningGuard<'a> {
    registry: &'a Mutex<ChunkRegistry>,
    id: ChunkId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.registry.lock().get_mut(&self.id) {
            record.running = false;
        }
    }
}

/// Runs the chunks of one document
pub struct Executor {
    registry: Mutex<ChunkRegistry>,
    headings: Mutex<Vec<Heading>>,
    document: PathBuf,
    config: Arc<Config>,
    markdown: Arc<dyn MarkdownRenderer>,
    patcher: SourcePatcher,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("document", &self.document)
            .field("chunks", &self.registry.lock().len())
            .finish()
    }
}

impl Executor {
    pub fn new(document: impl Into<PathBuf>, config: Arc<Config>) -> Self {
        let document = document.into();
        Self {
            registry: Mutex::new(ChunkRegistry::new()),
            headings: Mutex::new(Vec::new()),
            patcher: SourcePatcher::new(&document),
            document,
            config,
            markdown: Arc::new(PulldownMarkdown::new()),
        }
    }

    pub fn with_markdown_renderer(mut self, renderer: Arc<dyn MarkdownRenderer>) -> Self {
        self.markdown = renderer;
        self
    }

    pub fn document(&self) -> &Path {
        &self.document
    }

    fn document_dir(&self) -> PathBuf {
        match self.document.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Access the registry; the lock must not be held across an await
    pub fn with_registry<R>(&self, f: impl FnOnce(&mut ChunkRegistry) -> R) -> R {
        f(&mut self.registry.lock())
    }

    /// Upsert a chunk, linking it after `preceding`
    pub fn register(
        &self,
        record: ChunkRecord,
        preceding: Option<&ChunkId>,
    ) -> Result<(), crate::registry::RegistryError> {
        self.registry.lock().register(record, preceding)
    }

    /// Headings used by the `toc` command
    pub fn set_headings(&self, headings: Vec<Heading>) {
        *self.headings.lock() = headings;
    }

    pub fn record(&self, id: &ChunkId) -> Option<ChunkRecord> {
        self.registry.lock().get(id).cloned()
    }

    /// Run one chunk and return its visible result
    ///
    /// Returns `None` if the chunk is unknown or already running.
    #[instrument(skip(self), fields(chunk = %id))]
    pub async fn run(&self, id: &ChunkId) -> Option<String> {
        let prepared = {
            let mut registry = self.registry.lock();
            let code = match registry.get(id) {
                None => {
                    debug!("no such chunk");
                    return None;
                }
                Some(record) if record.running => {
                    debug!("chunk already running");
                    return None;
                }
                Some(_) => registry.compose_code(id)?,
            };
            let record = registry.get_mut(id)?;
            record.running = true;
            Prepared {
                id: id.clone(),
                lang: record.lang.clone(),
                code,
                attributes: record.attributes.clone(),
                source_offset: record.source_offset,
            }
        };
        let _running = RunningGuard {
            registry: &self.registry,
            id: id.clone(),
        };

        let started = Instant::now();
        let executed = self.execute(&prepared).await;
        let duration = started.elapsed();

        let (result, plain_result, summary) = match executed {
            Ok(execution) => {
                let plain = String::from_utf8_lossy(&execution.raw).into_owned();
                let summary = RunSummary {
                    success: true,
                    exit_code: execution.exit_code,
                    duration,
                };
                match self.finish(&prepared, &execution, &plain).await {
                    Ok(result) => (result, plain, summary),
                    Err(err) => {
                        error!(%err, "could not write chunk output into the document");
                        (error_block(&err.to_string()), plain, RunSummary { success: false, ..summary })
                    }
                }
            }
            Err(err) => {
                warn!(%err, "chunk run failed");
                let exit_code = match &err {
                    ExecError::Failed { exit_code, .. } => *exit_code,
                    _ => None,
                };
                let plain = match &err {
                    ExecError::Failed { output, .. } => output.clone(),
                    _ => String::new(),
                };
                let summary = RunSummary {
                    success: false,
                    exit_code,
                    duration,
                };
                (error_block(&err.to_string()), plain, summary)
            }
        };

        info!(success = summary.success, ?duration, "chunk finished");
        if let Some(record) = self.registry.lock().get_mut(id) {
            record.result = result.clone();
            record.plain_result = plain_result;
            record.last_run = Some(summary);
        }
        Some(result)
    }

    /// Run every chunk of the last scan concurrently
    ///
    /// A `continue` chunk composes its ancestors' code as registered; it does
    /// not wait for their runs.
    pub async fn run_all(&self) -> Vec<(ChunkId, Option<String>)> {
        let ids: Vec<ChunkId> = self.registry.lock().ids().to_vec();
        let results = join_all(ids.iter().map(|id| self.run(id))).await;
        ids.into_iter().zip(results).collect()
    }

    async fn execute(&self, prepared: &Prepared) -> Result<Execution, ExecError> {
        let attrs = &prepared.attributes;
        let program = match &attrs.cmd {
            None => return Err(ExecError::NoCommand),
            Some(CommandSpec::Language) => prepared.lang.as_str(),
            Some(CommandSpec::Program(program)) => program.as_str(),
        };

        match program {
            "toc" => {
                let headings = self.headings.lock().clone();
                let markdown = builtins::toc(&headings, &TocOptions::from_attributes(attrs));
                return Ok(Execution {
                    raw: markdown.into_bytes(),
                    output: OutputFormat::Markdown,
                    exit_code: None,
                });
            }
            "" => return Err(ExecError::NoCommand),
            _ => {}
        }

        if !self.config.execution.enabled {
            return Err(ExecError::Disabled);
        }

        let doc_dir = self.document_dir();
        let timeout = self.config.execution.timeout();

        if program == "ditaa" {
            let jar = self.config.ditaa_jar();
            let image_dir = self.config.image_dir_for(&doc_dir);
            let markdown = builtins::ditaa(DitaaRun {
                code: &prepared.code,
                config: &self.config.ditaa,
                jar: &jar,
                image_dir: &image_dir,
                doc_dir: &doc_dir,
                filename: attrs.filename.as_deref(),
                timeout,
            })
            .await?;
            return Ok(Execution {
                raw: markdown.into_bytes(),
                output: OutputFormat::Markdown,
                exit_code: Some(0),
            });
        }

        let CommandOutput { raw, exit_code } = command::run_command(CommandRun {
            program,
            args: &attrs.args,
            code: &prepared.code,
            lang: &prepared.lang,
            use_stdin: attrs.stdin,
            cwd: &doc_dir,
            timeout,
        })
        .await?;

        Ok(Execution {
            raw,
            output: attrs.output,
            exit_code,
        })
    }

    /// Post-process, or hand the output to the source patcher
    async fn finish(
        &self,
        prepared: &Prepared,
        execution: &Execution,
        plain: &str,
    ) -> Result<String, ExecError> {
        match (prepared.attributes.modify_source, prepared.source_offset) {
            (true, Some(offset)) => {
                let content = source_output(execution.output, plain, &execution.raw);
                let outcome = self.patcher.apply(offset, &content).await?;
                debug!(?outcome, offset, "chunk output written into the document");
                // The output now lives in the document itself
                Ok(String::new())
            }
            _ => Ok(render_output(
                execution.output,
                plain,
                &execution.raw,
                self.markdown.as_ref(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{ChunkAttributes, Continuation};

    fn executor(dir: &Path) -> Executor {
        Executor::new(dir.join("doc.md"), Arc::new(Config::default()))
    }

    fn sh() -> ChunkAttributes {
        ChunkAttributes {
            cmd: Some(CommandSpec::Program("sh".into())),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generic_command_default_output() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        exec.register(ChunkRecord::new("c1", "echo 1", sh()), None)
            .unwrap();

        let result = exec.run(&ChunkId::new("c1")).await.unwrap();

        assert_eq!(result, "<pre class=\"language-text\">1\n</pre>");
        let record = exec.record(&ChunkId::new("c1")).unwrap();
        assert_eq!(record.plain_result, "1\n");
        assert!(!record.running);
        assert!(record.last_run.unwrap().success);
    }

    #[tokio::test]
    async fn test_missing_chunk_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert!(executor(dir.path()).run(&ChunkId::new("nope")).await.is_none());
    }

    #[tokio::test]
    async fn test_running_chunk_is_not_reentered() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        exec.register(ChunkRecord::new("c", "touch ran", sh()), None)
            .unwrap();
        exec.with_registry(|r| r.get_mut(&ChunkId::new("c")).unwrap().running = true);

        assert!(exec.run(&ChunkId::new("c")).await.is_none());
        assert!(!dir.path().join("ran").exists());
        assert!(exec.record(&ChunkId::new("c")).unwrap().running);
    }

    #[tokio::test]
    async fn test_failure_becomes_error_block() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        exec.register(ChunkRecord::new("bad", "echo oops >&2; exit 4", sh()), None)
            .unwrap();

        let result = exec.run(&ChunkId::new("bad")).await.unwrap();

        assert!(result.starts_with("<pre class=\"language-text error\">"));
        assert!(result.contains("status 4"));
        assert!(result.contains("oops"));
        let record = exec.record(&ChunkId::new("bad")).unwrap();
        assert!(!record.running);
        assert_eq!(record.last_run.unwrap().exit_code, Some(4));
    }

    #[tokio::test]
    async fn test_unknown_program_becomes_error_block() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let attrs = ChunkAttributes {
            cmd: Some(CommandSpec::Program("livedoc-missing-program".into())),
            ..Default::default()
        };
        exec.register(ChunkRecord::new("x", "", attrs), None).unwrap();

        let result = exec.run(&ChunkId::new("x")).await.unwrap();
        assert!(result.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_stdin_mode_pipes_code() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let attrs = ChunkAttributes {
            cmd: Some(CommandSpec::Program("cat".into())),
            stdin: true,
            output: OutputFormat::Html,
            ..Default::default()
        };
        exec.register(ChunkRecord::new("c", "<b>piped</b>", attrs), None)
            .unwrap();

        assert_eq!(exec.run(&ChunkId::new("c")).await.unwrap(), "<b>piped</b>");
    }

    #[tokio::test]
    async fn test_cmd_true_uses_language() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let attrs = ChunkAttributes {
            cmd: Some(CommandSpec::Language),
            output: OutputFormat::None,
            ..Default::default()
        };
        exec.register(ChunkRecord::new("c", "echo hidden", attrs).with_lang("sh"), None)
            .unwrap();

        assert_eq!(exec.run(&ChunkId::new("c")).await.unwrap(), "");
        assert_eq!(exec.record(&ChunkId::new("c")).unwrap().plain_result, "hidden\n");
    }

    #[tokio::test]
    async fn test_continuation_runs_composed_code() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let cont = |attrs: ChunkAttributes| ChunkAttributes {
            continue_from: Some(Continuation::Previous),
            ..attrs
        };
        exec.register(ChunkRecord::new("a", "x=1\n", sh()), None).unwrap();
        exec.register(ChunkRecord::new("b", "y=2\n", cont(sh())), Some(&ChunkId::new("a")))
            .unwrap();
        exec.register(
            ChunkRecord::new("c", "echo $x$y\n", cont(sh())),
            Some(&ChunkId::new("b")),
        )
        .unwrap();

        exec.run(&ChunkId::new("c")).await.unwrap();
        assert_eq!(exec.record(&ChunkId::new("c")).unwrap().plain_result, "12\n");
    }

    #[tokio::test]
    async fn test_toc_renders_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        exec.set_headings(vec![Heading::new(1, "Intro", "intro")]);
        let attrs = ChunkAttributes {
            cmd: Some(CommandSpec::Program("toc".into())),
            ..Default::default()
        };
        exec.register(ChunkRecord::new("toc", "", attrs), None).unwrap();

        let result = exec.run(&ChunkId::new("toc")).await.unwrap();
        assert!(result.contains(r##"<a href="#intro">Intro</a>"##));
        assert_eq!(
            exec.record(&ChunkId::new("toc")).unwrap().plain_result,
            "- [Intro](#intro)"
        );
    }

    #[tokio::test]
    async fn test_disabled_execution() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.execution.enabled = false;
        let exec = Executor::new(dir.path().join("doc.md"), Arc::new(config));
        exec.register(ChunkRecord::new("c", "touch ran", sh()), None)
            .unwrap();

        let result = exec.run(&ChunkId::new("c")).await.unwrap();
        assert!(result.contains("disabled"));
        assert!(!dir.path().join("ran").exists());
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.execution.timeout_secs = Some(1);
        let exec = Executor::new(dir.path().join("doc.md"), Arc::new(config));
        exec.register(ChunkRecord::new("slow", "sleep 5", sh()), None)
            .unwrap();

        let result = exec.run(&ChunkId::new("slow")).await.unwrap();
        assert!(result.contains("timed out"));
        assert!(!exec.record(&ChunkId::new("slow")).unwrap().running);
    }

    #[tokio::test]
    async fn test_run_all_runs_every_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        exec.register(ChunkRecord::new("a", "echo a", sh()), None).unwrap();
        exec.register(ChunkRecord::new("b", "echo b", sh()), Some(&ChunkId::new("a")))
            .unwrap();

        let results = exec.run_all().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, ChunkId::new("a"));
        assert!(results.iter().all(|(_, r)| r.is_some()));
        assert_eq!(exec.record(&ChunkId::new("b")).unwrap().plain_result, "b\n");
    }
}
