//! Index backend trait and the in-memory backend.
//!
//! This module defines the `IndexBackend` trait every index implementation
//! satisfies: per-document writes with a version, plus four maintenance
//! operations that a backend may or may not support. Unsupported
//! maintenance operations report [`Error::Unsupported`]; the workspace layer
//! turns that into the caller's chosen policy.
//!
//! # Backends
//!
//! - `MemoryBackend`: documents in a map, optimistic versioning, no segment merge
//! - `TantivyBackend`: Tantivy index (requires `fts-tantivy` feature)

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use indexsync_core::{DocumentKey, Error, IndexDocument, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Document work
// ============================================================================

/// What to do with one document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentAction {
    /// Write the document, replacing any previous version.
    Upsert(IndexDocument),
    /// Remove the document.
    Delete,
}

impl DocumentAction {
    /// Returns the action name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::Delete => "delete",
        }
    }
}

/// One document write, ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWork {
    /// Target document.
    pub key: DocumentKey,
    /// Write to perform.
    pub action: DocumentAction,
    /// Logical version; backends with optimistic concurrency reject writes
    /// older than what they hold.
    pub version: u64,
}

// ============================================================================
// Capabilities
// ============================================================================

/// Workspace maintenance operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceKind {
    /// Merge index segments.
    MergeSegments,
    /// Remove documents by routing key.
    Purge,
    /// Persist pending writes.
    Flush,
    /// Make persisted writes visible to readers.
    Refresh,
}

impl MaintenanceKind {
    /// Returns the operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MergeSegments => "merge_segments",
            Self::Purge => "purge",
            Self::Flush => "flush",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maintenance operations a backend supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supports segment merging.
    pub merge_segments: bool,
    /// Supports purging.
    pub purge: bool,
    /// Supports flushing.
    pub flush: bool,
    /// Supports refreshing.
    pub refresh: bool,
}

impl Capabilities {
    /// Every operation supported.
    pub fn all() -> Self {
        Self {
            merge_segments: true,
            purge: true,
            flush: true,
            refresh: true,
        }
    }

    /// No operation supported.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if the operation is supported.
    pub fn supports(&self, kind: MaintenanceKind) -> bool {
        match kind {
            MaintenanceKind::MergeSegments => self.merge_segments,
            MaintenanceKind::Purge => self.purge,
            MaintenanceKind::Flush => self.flush,
            MaintenanceKind::Refresh => self.refresh,
        }
    }
}

// ============================================================================
// IndexBackend trait
// ============================================================================

/// A physical index.
///
/// Maintenance methods default to [`Error::Unsupported`], so a backend only
/// implements what its [`Capabilities`] advertise.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Backend name for logs and errors.
    fn name(&self) -> &str;

    /// Supported maintenance operations.
    fn capabilities(&self) -> Capabilities;

    /// Applies one document write.
    async fn apply(&self, work: DocumentWork) -> Result<()>;

    /// Reads a document back, as currently visible to readers.
    async fn get(&self, key: &DocumentKey) -> Result<Option<IndexDocument>>;

    /// Number of documents visible to readers.
    async fn document_count(&self) -> Result<usize>;

    /// Merges index segments.
    async fn merge_segments(&self) -> Result<()> {
        Err(Error::unsupported(MaintenanceKind::MergeSegments.name(), self.name()))
    }

    /// Removes documents with the given routing keys; every document when
    /// `routing_keys` is empty.
    async fn purge(&self, routing_keys: &[String]) -> Result<()> {
        let _ = routing_keys;
        Err(Error::unsupported(MaintenanceKind::Purge.name(), self.name()))
    }

    /// Persists pending writes.
    async fn flush(&self) -> Result<()> {
        Err(Error::unsupported(MaintenanceKind::Flush.name(), self.name()))
    }

    /// Makes persisted writes visible to readers.
    async fn refresh(&self) -> Result<()> {
        Err(Error::unsupported(MaintenanceKind::Refresh.name(), self.name()))
    }
}

// ============================================================================
// MemoryBackend
// ============================================================================

/// Counters of a [`MemoryBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBackendStats {
    /// Documents stored.
    pub documents: usize,
    /// Writes applied since the last flush.
    pub pending_writes: usize,
    /// Completed flushes.
    pub flushes: usize,
    /// Completed refreshes.
    pub refreshes: usize,
    /// Completed purges.
    pub purges: usize,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    document: IndexDocument,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: BTreeMap<DocumentKey, StoredDocument>,
    tombstones: HashMap<DocumentKey, u64>,
    rejected: HashMap<String, String>,
    stats: MemoryBackendStats,
}

impl MemoryState {
    fn stored_version(&self, key: &DocumentKey) -> Option<u64> {
        self.documents
            .get(key)
            .map(|d| d.version)
            .or_else(|| self.tombstones.get(key).copied())
    }
}

/// Index held in memory.
///
/// Writes are checked against the stored version: a write older than the
/// stored document (or its deletion) fails with [`Error::Conflict`], so
/// concurrent units of work never silently overwrite newer state.
/// Segment merging is not supported.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    capabilities: Capabilities,
    state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryBackend {
    /// Creates an empty backend supporting purge, flush and refresh.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities {
                merge_segments: false,
                purge: true,
                flush: true,
                refresh: true,
            },
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Restricts or extends the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Makes every write to `document_id` fail with a backend error.
    pub fn reject_document(&self, document_id: impl Into<String>, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.rejected.insert(document_id.into(), reason.into());
        }
    }

    /// Current counters.
    pub fn stats(&self) -> MemoryBackendStats {
        self.state.lock().map(|s| s.stats).unwrap_or_default()
    }

    /// Stored version of a document or its deletion.
    pub fn version_of(&self, key: &DocumentKey) -> Option<u64> {
        self.state.lock().ok().and_then(|s| s.stored_version(key))
    }

    /// Keys of all stored documents, in key order.
    pub fn keys(&self) -> Vec<DocumentKey> {
        self.state
            .lock()
            .map(|s| s.documents.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::backend(format!("memory backend '{}' lock poisoned", self.name)))
    }

    fn require(&self, kind: MaintenanceKind) -> Result<()> {
        if self.capabilities.supports(kind) {
            Ok(())
        } else {
            Err(Error::unsupported(kind.name(), &self.name))
        }
    }
}

#[async_trait]
impl IndexBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn apply(&self, work: DocumentWork) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(reason) = state.rejected.get(&work.key.document_id) {
            return Err(Error::backend(format!(
                "document {} rejected: {reason}",
                work.key
            )));
        }
        if let Some(stored) = state.stored_version(&work.key)
            && stored > work.version
        {
            return Err(Error::Conflict {
                document: work.key.to_string(),
                stored,
                attempted: work.version,
            });
        }

        match work.action {
            DocumentAction::Upsert(document) => {
                state.tombstones.remove(&work.key);
                state.documents.insert(
                    work.key,
                    StoredDocument {
                        document,
                        version: work.version,
                    },
                );
            }
            DocumentAction::Delete => {
                state.documents.remove(&work.key);
                state.tombstones.insert(work.key, work.version);
            }
        }
        state.stats.pending_writes += 1;
        state.stats.documents = state.documents.len();
        Ok(())
    }

    async fn get(&self, key: &DocumentKey) -> Result<Option<IndexDocument>> {
        Ok(self.lock()?.documents.get(key).map(|d| d.document.clone()))
    }

    async fn document_count(&self) -> Result<usize> {
        Ok(self.lock()?.documents.len())
    }

    async fn purge(&self, routing_keys: &[String]) -> Result<()> {
        self.require(MaintenanceKind::Purge)?;
        let mut state = self.lock()?;
        if routing_keys.is_empty() {
            state.documents.clear();
        } else {
            let purged: HashSet<&String> = routing_keys.iter().collect();
            state.documents.retain(|key, _| {
                key.routing_key
                    .as_ref()
                    .is_none_or(|routing| !purged.contains(routing))
            });
        }
        state.stats.purges += 1;
        state.stats.documents = state.documents.len();
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.require(MaintenanceKind::Flush)?;
        let mut state = self.lock()?;
        state.stats.pending_writes = 0;
        state.stats.flushes += 1;
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        self.require(MaintenanceKind::Refresh)?;
        self.lock()?.stats.refreshes += 1;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
