//! Tantivy index backend.
//!
//! This module is only available with the `fts-tantivy` feature.
//!
//! # Schema
//!
//! | Field | Options | Purpose |
//! |-------|---------|---------|
//! | `_id` | STRING \| STORED | `type/document id`, unique per document |
//! | `_type` | STRING \| STORED | root type |
//! | `_routing` | STRING \| STORED | routing key, for purges |
//! | `_version` | STORED | write version |
//! | `_source` | STORED | the document as JSON |
//! | `body` | TEXT | concatenated text of every field |
//!
//! Writes are staged in the index writer; `flush` commits them and
//! `refresh` reloads the reader, after which `get` and `document_count`
//! see them. Every write goes through the single writer lock, so
//! concurrent writes to one document are serialized. A write older than the
//! document's last version, staged or committed, fails with
//! [`Error::Conflict`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use indexsync_core::{DocumentKey, Error, IndexDocument, Result};
use tantivy::collector::DocSetCollector;
use tantivy::query::TermQuery;
use tantivy::schema::{Field, IndexRecordOption, STORED, STRING, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::backend::{Capabilities, DocumentAction, DocumentWork, IndexBackend};

/// Index writer buffer size (50MB).
const WRITER_BUFFER_SIZE: usize = 50_000_000;

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    type_name: Field,
    routing: Field,
    version: Field,
    source: Field,
    body: Field,
}

impl Fields {
    fn schema() -> (Schema, Self) {
        let mut builder = Schema::builder();
        let fields = Self {
            id: builder.add_text_field("_id", STRING | STORED),
            type_name: builder.add_text_field("_type", STRING | STORED),
            routing: builder.add_text_field("_routing", STRING | STORED),
            version: builder.add_u64_field("_version", STORED),
            source: builder.add_text_field("_source", STORED),
            body: builder.add_text_field("body", TEXT),
        };
        (builder.build(), fields)
    }
}

fn composite_id(key: &DocumentKey) -> String {
    format!("{}/{}", key.type_name, key.document_id)
}

fn tantivy_error(context: &str, e: tantivy::TantivyError) -> Error {
    Error::backend_with_source(format!("{context}: {e}"), e)
}

/// Index backend storing documents in a Tantivy index.
pub struct TantivyBackend {
    name: String,
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: Fields,
    /// Last version written per `_id` since opening, deletes included.
    versions: Mutex<HashMap<String, u64>>,
}

impl TantivyBackend {
    /// Creates or opens an index in a directory.
    pub fn open(name: impl Into<String>, index_path: &Path) -> Result<Self> {
        if !index_path.exists() {
            std::fs::create_dir_all(index_path).map_err(|e| Error::io_with_path(e, index_path))?;
        }
        let (schema, fields) = Fields::schema();
        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(index_path)
                .map_err(|e| tantivy_error("Failed to open index", e))?
        } else {
            Index::create_in_dir(index_path, schema)
                .map_err(|e| tantivy_error("Failed to create index", e))?
        };
        Self::from_index(name.into(), index, fields)
    }

    /// Creates an index in memory.
    pub fn in_memory(name: impl Into<String>) -> Result<Self> {
        let (schema, fields) = Fields::schema();
        Self::from_index(name.into(), Index::create_in_ram(schema), fields)
    }

    fn from_index(name: String, index: Index, fields: Fields) -> Result<Self> {
        let writer = index
            .writer(WRITER_BUFFER_SIZE)
            .map_err(|e| tantivy_error("Failed to create index writer", e))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| tantivy_error("Failed to create index reader", e))?;
        Ok(Self {
            name,
            index,
            writer: Mutex::new(writer),
            reader,
            fields,
            versions: Mutex::new(HashMap::new()),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| Error::backend(format!("index writer of '{}' poisoned", self.name)))
    }

    fn versions(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, u64>>> {
        self.versions
            .lock()
            .map_err(|_| Error::backend(format!("version table of '{}' poisoned", self.name)))
    }

    /// Version stored in the last reloaded reader.
    fn indexed_version(&self, id: &str) -> Result<Option<u64>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.id, id),
            IndexRecordOption::Basic,
        );
        let hits = searcher
            .search(&query, &DocSetCollector)
            .map_err(|e| tantivy_error("Search failed", e))?;
        let Some(address) = hits.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher
            .doc(address)
            .map_err(|e| tantivy_error("Failed to load document", e))?;
        Ok(doc.get_first(self.fields.version).and_then(|v| v.as_u64()))
    }

    fn to_tantivy(
        &self,
        key: &DocumentKey,
        document: &IndexDocument,
        version: u64,
    ) -> Result<TantivyDocument> {
        let f = self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.id, composite_id(key));
        doc.add_text(f.type_name, key.type_name.as_str());
        if let Some(ref routing) = key.routing_key {
            doc.add_text(f.routing, routing);
        }
        doc.add_u64(f.version, version);
        doc.add_text(f.source, serde_json::to_string(document)?);
        doc.add_text(f.body, document.full_text());
        Ok(doc)
    }
}

impl std::fmt::Debug for TantivyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyBackend")
            .field("name", &self.name)
            .field("index", &"<tantivy::Index>")
            .finish()
    }
}

#[async_trait]
impl IndexBackend for TantivyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn apply(&self, work: DocumentWork) -> Result<()> {
        let id = composite_id(&work.key);
        let doc = match work.action {
            DocumentAction::Upsert(ref document) => {
                Some(self.to_tantivy(&work.key, document, work.version)?)
            }
            DocumentAction::Delete => None,
        };

        let writer = self.writer()?;
        let staged = self.versions()?.get(&id).copied();
        let stored = match staged {
            Some(version) => Some(version),
            None => self.indexed_version(&id)?,
        };
        if let Some(stored) = stored
            && stored > work.version
        {
            return Err(Error::Conflict {
                document: work.key.to_string(),
                stored,
                attempted: work.version,
            });
        }

        writer.delete_term(Term::from_field_text(self.fields.id, &id));
        if let Some(doc) = doc {
            writer
                .add_document(doc)
                .map_err(|e| tantivy_error("Failed to add document", e))?;
        }
        self.versions()?.insert(id, work.version);
        Ok(())
    }

    async fn get(&self, key: &DocumentKey) -> Result<Option<IndexDocument>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.id, &composite_id(key)),
            IndexRecordOption::Basic,
        );
        let hits = searcher
            .search(&query, &DocSetCollector)
            .map_err(|e| tantivy_error("Search failed", e))?;
        let Some(address) = hits.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher
            .doc(address)
            .map_err(|e| tantivy_error("Failed to load document", e))?;
        let source = doc
            .get_first(self.fields.source)
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::backend(format!("document {key} has no stored source")))?;
        Ok(Some(serde_json::from_str(source)?))
    }

    async fn document_count(&self) -> Result<usize> {
        Ok(usize::try_from(self.reader.searcher().num_docs()).unwrap_or(usize::MAX))
    }

    async fn merge_segments(&self) -> Result<()> {
        let segments = self
            .index
            .searchable_segment_ids()
            .map_err(|e| tantivy_error("Failed to list segments", e))?;
        if segments.len() < 2 {
            return Ok(());
        }
        let merge = self.writer()?.merge(&segments);
        merge
            .await
            .map_err(|e| tantivy_error("Segment merge failed", e))?;
        log::debug!("Merged {} segments of '{}'", segments.len(), self.name);
        Ok(())
    }

    async fn purge(&self, routing_keys: &[String]) -> Result<()> {
        let writer = self.writer()?;
        if routing_keys.is_empty() {
            writer
                .delete_all_documents()
                .map_err(|e| tantivy_error("Failed to purge index", e))?;
        } else {
            for routing in routing_keys {
                writer.delete_term(Term::from_field_text(self.fields.routing, routing));
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.writer()?
            .commit()
            .map_err(|e| tantivy_error("Failed to commit index", e))?;
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        self.reader
            .reload()
            .map_err(|e| tantivy_error("Failed to reload reader", e))
    }
}

// ============================================================================
// Tests
// ============================================================================
