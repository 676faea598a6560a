//! Shared types for livedoc
//!
//! This crate provides common types used across the livedoc crates,
//! including chunk identifiers, document headings, and output formats.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chunk identifier, unique within one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(id: &str) -> Self {
        ChunkId(id.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(id: String) -> Self {
        ChunkId(id)
    }
}

/// A document heading, as discovered by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// ATX level, 1 through 6
    pub level: u8,
    pub title: String,
    /// Anchor id the heading renders with
    pub id: String,
}

impl Heading {
    pub fn new(level: u8, title: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            id: id.into(),
        }
    }
}

/// How a chunk's raw output is turned into its displayable result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Wrapped in a preformatted block
    #[default]
    Text,
    /// Passed through untouched
    Html,
    /// Base64-encoded into an `<img>` tag
    Png,
    /// Rendered to HTML as markdown
    Markdown,
    /// Discarded
    None,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Html => "html",
            OutputFormat::Png => "png",
            OutputFormat::Markdown => "markdown",
            OutputFormat::None => "none",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
