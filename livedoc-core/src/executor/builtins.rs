//! Commands handled without a generic subprocess: `toc` and `ditaa`.

use super::command::write_input_file;
use super::ExecError;
use crate::attributes::ChunkAttributes;
use crate::config::DitaaConfig;
use livedoc_cache::CacheKey;
use livedoc_types::Heading;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Table of contents options read from a chunk's extra attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocOptions {
    pub ordered: bool,
    pub depth_from: u8,
    pub depth_to: u8,
    pub ignore_link: bool,
}

impl Default for TocOptions {
    fn default() -> Self {
        Self {
            ordered: false,
            depth_from: 1,
            depth_to: 6,
            ignore_link: false,
        }
    }
}

impl TocOptions {
    pub fn from_attributes(attrs: &ChunkAttributes) -> Self {
        let defaults = Self::default();
        let depth = |key: &str, fallback: u8| {
            attrs
                .extra_u64(key)
                .map(|d| d.clamp(1, 6) as u8)
                .unwrap_or(fallback)
        };
        Self {
            ordered: attrs.extra_bool("orderedList").unwrap_or(defaults.ordered),
            depth_from: depth("depthFrom", defaults.depth_from),
            depth_to: depth("depthTo", defaults.depth_to),
            ignore_link: attrs.extra_bool("ignoreLink").unwrap_or(defaults.ignore_link),
        }
    }
}

/// Markdown list of the headings within the configured depth range
pub fn toc(headings: &[Heading], options: &TocOptions) -> String {
    let bullet = if options.ordered { "1." } else { "-" };
    headings
        .iter()
        .filter(|h| h.level >= options.depth_from && h.level <= options.depth_to)
        .map(|h| {
            let indent = "  ".repeat(usize::from(h.level - options.depth_from));
            if options.ignore_link {
                format!("{indent}{bullet} {}", h.title)
            } else {
                format!("{indent}{bullet} [{}](#{})", h.title, h.id)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Inputs for one ditaa run
#[derive(Debug)]
pub(crate) struct DitaaRun<'a> {
    pub code: &'a str,
    pub config: &'a DitaaConfig,
    pub jar: &'a Path,
    pub image_dir: &'a Path,
    pub doc_dir: &'a Path,
    pub filename: Option<&'a str>,
    pub timeout: Option<Duration>,
}

/// Render an ASCII diagram to PNG and return a markdown image reference
pub(crate) async fn ditaa(run: DitaaRun<'_>) -> Result<String, ExecError> {
    tokio::fs::create_dir_all(run.image_dir)
        .await
        .map_err(ExecError::Io)?;

    let input = write_input_file(run.code, "ditaa")?;
    let name = match run.filename {
        Some(name) if name.ends_with(".png") => name.to_string(),
        Some(name) => format!("{name}.png"),
        None => {
            let hash = CacheKey::from_bytes(run.code.as_bytes()).to_hex();
            format!("ditaa_{}.png", &hash[..16])
        }
    };
    let png = run.image_dir.join(&name);

    debug!(png = %png.display(), "running ditaa");
    let child = Command::new(&run.config.java)
        .arg("-jar")
        .arg(run.jar)
        .arg(input.path())
        .arg(&png)
        .arg("-o")
        .args(&run.config.args)
        .current_dir(run.doc_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: run.config.java.clone(),
            source,
        })?;

    let output = match run.timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout(limit))?,
        None => child.wait_with_output().await,
    }
    .map_err(ExecError::Io)?;

    if !output.status.success() {
        let mut log = output.stdout;
        log.extend_from_slice(&output.stderr);
        return Err(ExecError::Failed {
            exit_code: output.status.code(),
            output: String::from_utf8_lossy(&log).into_owned(),
        });
    }

    Ok(format!("![]({})", link_path(&png, run.doc_dir)))
}

/// Path to `target` as written in a link from a document in `doc_dir`
fn link_path(target: &Path, doc_dir: &Path) -> String {
    let relative: PathBuf = match target.strip_prefix(doc_dir) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => target.to_path_buf(),
    };
    relative
        .components()
        .filter_map(|c| match c {
            Component::RootDir => Some(String::new()),
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            Component::CurDir | Component::Prefix(_) => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
