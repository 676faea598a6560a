//! JSON shapes printed by `--json` commands.

use livedoc_core::RenderedDiagram;
use serde::Serialize;

pub const SCHEMA_VERSION: &str = "2025-10-livedoc-v1";

#[derive(Serialize)]
pub struct Envelope<T> {
    pub schema_version: &'static str,
    pub kind: &'static str,
    pub data: T,
}

pub fn envelope<T>(kind: &'static str, data: T) -> Envelope<T> {
    Envelope {
        schema_version: SCHEMA_VERSION,
        kind,
        data,
    }
}

#[derive(Serialize)]
pub struct ChunkReport {
    pub id: String,
    /// False when the chunk was skipped because it was already running
    pub ran: bool,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u128>,
    pub result: String,
    pub plain_result: String,
}

#[derive(Serialize)]
pub struct RunData {
    pub document: String,
    pub total: usize,
    pub failed: usize,
    pub chunks: Vec<ChunkReport>,
}

#[derive(Serialize)]
pub struct DiagramData<'a> {
    pub document: String,
    pub rendered: usize,
    pub cached: usize,
    pub diagrams: &'a [RenderedDiagram],
}
