//! Line-based document scanner.
//!
//! Finds code chunks, diagram blocks, `@import` lines and ATX headings. The
//! source patcher relocates chunks with [`source_spans`], which applies the
//! same eligibility rule as [`scan_document`] so offsets agree between the
//! two.

use crate::attributes::{parse_attribute_list, AttributeError, ChunkAttributes};
use crate::diagrams::DiagramKind;
use crate::slug::AnchorAllocator;
use livedoc_types::{ChunkId, Heading};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize)]
pub struct ScannedChunk {
    pub id: ChunkId,
    pub lang: String,
    pub code: String,
    pub attributes: ChunkAttributes,
    pub source_offset: Option<usize>,
    /// Zero-based line of the opening fence
    pub line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagramBlock {
    pub kind: DiagramKind,
    pub code: String,
    /// Normalized attribute list, part of the cache key
    pub options: String,
    pub filename: Option<String>,
    pub line: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanResult {
    pub chunks: Vec<ScannedChunk>,
    pub diagrams: Vec<DiagramBlock>,
    pub headings: Vec<Heading>,
}

/// Lines occupied by one source-eligible construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug)]
struct Fence<'a> {
    start: usize,
    end: usize,
    info: &'a str,
    body: Vec<&'a str>,
}

#[derive(Debug)]
enum Construct<'a> {
    Fence(Fence<'a>),
    Import(usize),
    Heading { level: u8, title: &'a str },
}

fn fence_marker(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    let ch = trimmed.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|&c| c == ch).count();
    (len >= 3).then_some((ch, len))
}

fn closes(line: &str, marker: (char, usize)) -> bool {
    let trimmed = line.trim();
    let len = trimmed.chars().take_while(|&c| c == marker.0).count();
    len >= marker.1 && len == trimmed.chars().count()
}

fn heading(line: &str) -> Option<(u8, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim_end();
    (!title.is_empty()).then_some((level as u8, title))
}

fn constructs<'a>(lines: &[&'a str]) -> Vec<Construct<'a>> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(marker) = fence_marker(line) {
            let info = line.trim_start()[marker.1 * marker.0.len_utf8()..].trim();
            let mut end = i + 1;
            while end < lines.len() && !closes(lines[end], marker) {
                end += 1;
            }
            let body_end = end.min(lines.len());
            found.push(Construct::Fence(Fence {
                start: i,
                end: body_end.min(lines.len() - 1),
                info,
                body: lines[i + 1..body_end].to_vec(),
            }));
            i = body_end + 1;
            continue;
        }
        if line.trim_start().starts_with("@import") {
            found.push(Construct::Import(i));
        } else if let Some((level, title)) = heading(line) {
            found.push(Construct::Heading { level, title });
        }
        i += 1;
    }
    found
}

/// Split a fence info string into its language and `{...}` attribute text
fn split_info(info: &str) -> (&str, Option<&str>) {
    match (info.find('{'), info.rfind('}')) {
        (Some(open), Some(close)) if open < close => {
            (info[..open].trim(), Some(&info[open + 1..close]))
        }
        _ => (info.split_whitespace().next().unwrap_or(""), None),
    }
}

fn has_command(attrs: &Map<String, Value>) -> bool {
    match attrs.get("cmd") {
        None | Some(Value::Bool(false)) | Some(Value::Null) => false,
        Some(Value::String(program)) => !program.trim().is_empty(),
        Some(_) => true,
    }
}

impl Fence<'_> {
    fn parsed_attributes(&self) -> Result<Option<Map<String, Value>>, AttributeError> {
        match split_info(self.info).1 {
            Some(src) => parse_attribute_list(src).map(Some),
            None => Ok(None),
        }
    }

    fn is_source(&self) -> bool {
        matches!(self.parsed_attributes(), Ok(Some(attrs)) if has_command(&attrs))
    }

    fn code(&self) -> String {
        if self.body.is_empty() {
            return String::new();
        }
        let mut code = self.body.join("\n");
        code.push('\n');
        code
    }
}

/// Spans of source-eligible constructs in document order
pub(crate) fn source_spans(lines: &[&str]) -> Vec<SourceSpan> {
    constructs(lines)
        .into_iter()
        .filter_map(|c| match c {
            Construct::Fence(fence) if fence.is_source() => Some(SourceSpan {
                start: fence.start,
                end: fence.end,
            }),
            Construct::Import(line) => Some(SourceSpan {
                start: line,
                end: line,
            }),
            _ => None,
        })
        .collect()
}

/// Scan a markdown document for chunks, diagrams and headings
pub fn scan_document(text: &str) -> Result<ScanResult, AttributeError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut result = ScanResult::default();
    let mut anchors = AnchorAllocator::new();
    let mut offset = 0usize;

    for construct in constructs(&lines) {
        match construct {
            Construct::Heading { level, title } => {
                let id = anchors.allocate(title);
                result.headings.push(Heading::new(level, title, id));
            }
            Construct::Import(_) => offset += 1,
            Construct::Fence(fence) => {
                let (lang, _) = split_info(fence.info);
                let map = fence.parsed_attributes()?;
                let runnable = map.as_ref().is_some_and(has_command);

                if !runnable {
                    if let Some(kind) = DiagramKind::from_lang(lang) {
                        let map = map.unwrap_or_default();
                        let filename = map
                            .get("filename")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        result.diagrams.push(DiagramBlock {
                            kind,
                            code: fence.code(),
                            options: Value::Object(map).to_string(),
                            filename,
                            line: fence.start,
                        });
                        continue;
                    }
                }

                let Some(map) = map else { continue };
                let attributes = ChunkAttributes::from_map(map)?;
                let id = match &attributes.id {
                    Some(id) => ChunkId::new(id.clone()),
                    None => ChunkId::new(format!("chunk-{}", result.chunks.len())),
                };
                let source_offset = runnable.then(|| {
                    offset += 1;
                    offset - 1
                });
                result.chunks.push(ScannedChunk {
                    id,
                    lang: lang.to_string(),
                    code: fence.code(),
                    attributes,
                    source_offset,
                    line: fence.start,
                });
            }
        }
    }

    Ok(result)
}
