//! # livedoc-core
//!
//! Live code chunks for markdown documents.
//!
//! This crate scans a document for executable chunks and diagram blocks,
//! runs chunks on demand, caches rendered diagrams, and writes chunk output
//! back into the source file.

pub mod attributes;
pub mod config;
pub mod diagrams;
pub mod document;
pub mod executor;
pub mod patcher;
pub mod registry;
pub mod scan;
pub mod slug;

pub use attributes::{ChunkAttributes, CommandSpec, Continuation};
pub use config::Config;
pub use diagrams::{DiagramKind, DiagramRenderer, RenderedDiagram};
pub use document::{DocumentError, LiveDocument};
pub use executor::{ExecError, Executor};
pub use patcher::{PatchOutcome, SourcePatcher};
pub use registry::{ChunkRecord, ChunkRegistry, RunSummary};
pub use scan::{scan_document, ScanResult};
pub use slug::slugify;
