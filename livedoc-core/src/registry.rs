//! Chunk records and their document order.
//!
//! Records live in a map keyed by id; document order lives in a separate
//! vector rebuilt on every scan. `prev`/`next` are answered from that vector,
//! so removing a record can never leave a dangling link behind.

use crate::attributes::{ChunkAttributes, Continuation};
use livedoc_types::ChunkId;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("chunk id `{0}` appears more than once in the document")]
    DuplicateId(ChunkId),
}

/// Outcome of the most recent run of a chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    /// Fence language, used when `cmd=true`
    pub lang: String,
    pub code: String,
    pub attributes: ChunkAttributes,
    /// Displayable result, possibly post-processed
    pub result: String,
    /// Raw captured output
    pub plain_result: String,
    pub running: bool,
    /// Position among source-eligible constructs in the last scan
    pub source_offset: Option<usize>,
    pub last_run: Option<RunSummary>,
}

impl ChunkRecord {
    pub fn new(id: impl Into<ChunkId>, code: impl Into<String>, attributes: ChunkAttributes) -> Self {
        Self {
            id: id.into(),
            lang: String::new(),
            code: code.into(),
            attributes,
            result: String::new(),
            plain_result: String::new(),
            running: false,
            source_offset: None,
            last_run: None,
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_source_offset(mut self, offset: usize) -> Self {
        self.source_offset = Some(offset);
        self
    }
}

/// Ordered collection of chunk records for one document
#[derive(Debug, Default)]
pub struct ChunkRegistry {
    records: HashMap<ChunkId, ChunkRecord>,
    order: Vec<ChunkId>,
    index: HashMap<ChunkId, usize>,
}

impl ChunkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous document order before re-registering a scan
    ///
    /// Records themselves are kept so results survive when ids match.
    pub fn begin_scan(&mut self) {
        self.order.clear();
        self.index.clear();
    }

    /// Upsert `record` and link it directly after `preceding`
    ///
    /// An existing record with the same id keeps its results and running
    /// state; its code, language, attributes and offset are replaced.
    pub fn register(
        &mut self,
        record: ChunkRecord,
        preceding: Option<&ChunkId>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id));
        }

        let position = match preceding {
            None => 0,
            Some(prev) => match self.index.get(prev) {
                Some(&i) => i + 1,
                None => {
                    warn!(chunk = %record.id, preceding = %prev, "preceding chunk is not registered");
                    self.order.len()
                }
            },
        };

        let id = record.id.clone();
        match self.records.get_mut(&id) {
            Some(existing) => {
                existing.code = record.code;
                existing.lang = record.lang;
                existing.attributes = record.attributes;
                existing.source_offset = record.source_offset;
            }
            None => {
                self.records.insert(id.clone(), record);
            }
        }

        self.order.insert(position, id);
        self.reindex_from(position);
        Ok(())
    }

    fn reindex_from(&mut self, start: usize) {
        for (i, id) in self.order.iter().enumerate().skip(start) {
            self.index.insert(id.clone(), i);
        }
    }

    pub fn get(&self, id: &ChunkId) -> Option<&ChunkRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &ChunkId) -> Option<&mut ChunkRecord> {
        self.records.get_mut(id)
    }

    /// Chunk before `id` in the last scan
    pub fn prev(&self, id: &ChunkId) -> Option<&ChunkId> {
        let i = *self.index.get(id)?;
        i.checked_sub(1).and_then(|p| self.order.get(p))
    }

    /// Chunk after `id` in the last scan
    pub fn next(&self, id: &ChunkId) -> Option<&ChunkId> {
        let i = *self.index.get(id)?;
        self.order.get(i + 1)
    }

    /// Ids in document order, as of the last scan
    pub fn ids(&self) -> &[ChunkId] {
        &self.order
    }

    /// Records in document order, as of the last scan
    pub fn records(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Stored records, including ones missing from the last scan
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn remove(&mut self, id: &ChunkId) -> Option<ChunkRecord> {
        if let Some(i) = self.index.remove(id) {
            self.order.remove(i);
            self.reindex_from(i);
        }
        self.records.remove(id)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.begin_scan();
    }

    /// Code for `id` with its continuation ancestors prepended
    ///
    /// Walks back through `continue` links, stopping at the first ancestor
    /// that does not continue, at a missing ancestor, or on a cycle.
    pub fn compose_code(&self, id: &ChunkId) -> Option<String> {
        let record = self.records.get(id)?;
        let mut parts = vec![record.code.as_str()];
        let mut visited = HashSet::from([id.clone()]);
        let mut current = record;

        while let Some(continuation) = &current.attributes.continue_from {
            let ancestor_id = match continuation {
                Continuation::Previous => match self.prev(&current.id) {
                    Some(prev) => prev.clone(),
                    None => break,
                },
                Continuation::Chunk(target) => target.clone(),
            };

            if !visited.insert(ancestor_id.clone()) {
                warn!(chunk = %id, ancestor = %ancestor_id, "continuation cycle, stopping");
                break;
            }

            let Some(ancestor) = self.records.get(&ancestor_id) else {
                break;
            };
            parts.push(ancestor.code.as_str());
            current = ancestor;
        }

        let mut code = String::new();
        for part in parts.into_iter().rev() {
            if !code.is_empty() && !code.ends_with('\n') {
                code.push('\n');
            }
            code.push_str(part);
        }
        Some(code)
    }
}
