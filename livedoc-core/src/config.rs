//! Configuration parsing and management.

use livedoc_session::RenderCommand;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Main configuration struct matching the livedoc.yml schema
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where generated images go, relative to the document's directory
    pub image_dir: PathBuf,

    pub plantuml: PlantUmlConfig,

    pub ditaa: DitaaConfig,

    pub graphviz: GraphvizConfig,

    pub execution: ExecutionConfig,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("assets"),
            plantuml: PlantUmlConfig::default(),
            ditaa: DitaaConfig::default(),
            graphviz: GraphvizConfig::default(),
            execution: ExecutionConfig::default(),
            config_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantUmlConfig {
    pub java: String,
    pub jar: PathBuf,
    pub args: Vec<String>,
}

impl Default for PlantUmlConfig {
    fn default() -> Self {
        Self {
            java: default_java(),
            jar: PathBuf::from("plantuml.jar"),
            args: ["-pipe", "-tsvg", "-charset", "UTF-8"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DitaaConfig {
    pub java: String,
    pub jar: PathBuf,
    pub args: Vec<String>,
}

impl Default for DitaaConfig {
    fn default() -> Self {
        Self {
            java: default_java(),
            jar: PathBuf::from("ditaa.jar"),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphvizConfig {
    pub program: String,
}

impl Default for GraphvizConfig {
    fn default() -> Self {
        Self {
            program: String::from("dot"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Whether code chunks may spawn processes at all
    pub enabled: bool,

    /// Deadline for a single chunk or render; unbounded when unset
    pub timeout_secs: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: None,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_java() -> String {
    String::from("java")
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = if contents.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&contents)?
        };

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!("No config at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Image directory for a document living in `doc_dir`
    pub fn image_dir_for(&self, doc_dir: &Path) -> PathBuf {
        if self.image_dir.is_absolute() {
            self.image_dir.clone()
        } else {
            doc_dir.join(&self.image_dir)
        }
    }

    /// Command that starts a long-lived PlantUML renderer
    pub fn plantuml_command(&self) -> RenderCommand {
        let jar = self.resolve_path(&self.plantuml.jar);
        RenderCommand::new(&self.plantuml.java)
            .with_args([
                "-Djava.awt.headless=true".to_string(),
                "-jar".to_string(),
                jar.to_string_lossy().into_owned(),
            ])
            .with_args(self.plantuml.args.iter().cloned())
    }

    /// Path to the ditaa jar
    pub fn ditaa_jar(&self) -> PathBuf {
        self.resolve_path(&self.ditaa.jar)
    }

    /// Resolve an arbitrary path relative to the config file location
    pub fn resolve_relative(&self, path: &Path) -> PathBuf {
        self.resolve_path(path)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(parent) = self.config_path.as_ref().and_then(|p| p.parent()) {
            parent.join(path)
        } else {
            path.to_path_buf()
        }
    }
}
