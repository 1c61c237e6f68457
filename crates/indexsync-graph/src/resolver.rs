//! Reindexing resolution: from a change event to the affected documents.
//!
//! The resolver walks the [`DependencyGraph`] backwards, from the changed
//! type to the types embedding it, breadth first:
//!
//! - `NONE` edges are skipped.
//! - `SHALLOW` edges are followed one hop, and only if the dirty properties
//!   overlap the edge's projected properties.
//! - `FULL` edges are followed transitively.
//! - An edge is not traversed past its `max_depth`.
//! - A `(type, id)` pair reached again is only expanded again for the dirty
//!   paths it had not seen yet.
//!
//! Concrete containing instances come from a [`ContainingEntityLookup`];
//! document ids come from the [`IdentifierMappings`] registry, and a type
//! without a mapping fails the resolution immediately.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use indexsync_core::identity::EntityProperties;
use indexsync_core::{
    ChangeEvent, DirtyProperties, DocumentKey, EntityId, Error, IdentifierMappings, OperationKind,
    Result, TypeName,
};

use crate::{DependencyGraph, Embedding, ReindexPolicy};

// ============================================================================
// Collaborator traits
// ============================================================================

/// Finds the instances containing an embedded instance.
#[async_trait]
pub trait ContainingEntityLookup: Send + Sync {
    /// Returns the ids of `embedding.owner` instances whose `embedding.path`
    /// holds the instance `embedded_id` of type `embedded_type`.
    async fn containing(
        &self,
        embedding: &Embedding,
        embedded_type: &TypeName,
        embedded_id: &EntityId,
    ) -> Result<Vec<EntityId>>;
}

/// Computes the routing key of a root document.
pub trait RoutingKeyProvider: Send + Sync {
    /// Routing key for the document of `id`, or `None` if unrouted.
    fn routing_key(&self, type_name: &TypeName, id: &EntityId) -> Option<String>;
}

/// In-memory containment table, keyed by `(owner, path, embedded id)`.
///
/// Useful when containment is known up front and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticContainment {
    entries: HashMap<(TypeName, String, EntityId), Vec<EntityId>>,
}

impl StaticContainment {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `owner_id` of type `owner` holds `embedded_id` in `path`.
    pub fn insert(
        &mut self,
        owner: impl Into<TypeName>,
        owner_id: impl Into<EntityId>,
        path: impl Into<String>,
        embedded_id: impl Into<EntityId>,
    ) -> &mut Self {
        let owners = self
            .entries
            .entry((owner.into(), path.into(), embedded_id.into()))
            .or_default();
        let owner_id = owner_id.into();
        if !owners.contains(&owner_id) {
            owners.push(owner_id);
        }
        self
    }
}

#[async_trait]
impl ContainingEntityLookup for StaticContainment {
    async fn containing(
        &self,
        embedding: &Embedding,
        _embedded_type: &TypeName,
        embedded_id: &EntityId,
    ) -> Result<Vec<EntityId>> {
        let key = (
            embedding.owner.clone(),
            embedding.path.clone(),
            embedded_id.clone(),
        );
        Ok(self.entries.get(&key).cloned().unwrap_or_default())
    }
}

// ============================================================================
// Resolution output
// ============================================================================

/// Why a document was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTrigger {
    /// The root object itself changed.
    Changed(OperationKind),
    /// Something embedded in the root object changed.
    Contained,
}

impl DocumentTrigger {
    /// The document operation this trigger calls for: the root's own
    /// operation, or an update for containers.
    pub fn operation(&self) -> OperationKind {
        match self {
            Self::Changed(kind) => *kind,
            Self::Contained => OperationKind::Update,
        }
    }
}

/// Deduplicated documents affected by one change event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedDocuments {
    documents: BTreeMap<DocumentKey, DocumentTrigger>,
    /// Edges not traversed because of their depth bound.
    pub truncated: usize,
    /// `(type, id)` pairs expanded.
    pub expanded: usize,
}

impl ResolvedDocuments {
    /// Returns the number of affected documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns `true` if no document is affected.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Returns the trigger for a key, if affected.
    pub fn get(&self, key: &DocumentKey) -> Option<DocumentTrigger> {
        self.documents.get(key).copied()
    }

    /// Returns `true` if a document of this type and entity id is affected.
    pub fn contains(&self, type_name: &str, id: &EntityId) -> bool {
        self.documents
            .keys()
            .any(|k| k.type_name.as_str() == type_name && k.entity_id == *id)
    }

    /// Iterates affected documents in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DocumentKey, DocumentTrigger)> {
        self.documents.iter().map(|(k, t)| (k, *t))
    }

    /// Affected document keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &DocumentKey> {
        self.documents.keys()
    }

    fn record(&mut self, key: DocumentKey, trigger: DocumentTrigger) {
        // A root's own change outranks being reached as a container.
        match self.documents.get(&key) {
            Some(DocumentTrigger::Changed(_)) => {}
            _ => {
                self.documents.insert(key, trigger);
            }
        }
    }
}

impl IntoIterator for ResolvedDocuments {
    type Item = (DocumentKey, DocumentTrigger);
    type IntoIter = std::collections::btree_map::IntoIter<DocumentKey, DocumentTrigger>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

// ============================================================================
// ReindexingResolver
// ============================================================================

struct Frame {
    type_name: TypeName,
    id: EntityId,
    dirty: DirtyProperties,
    depth: usize,
}

/// Resolves change events to affected documents.
///
/// Cheap to clone; the graph, mappings and collaborators are shared.
#[derive(Clone)]
pub struct ReindexingResolver {
    graph: Arc<DependencyGraph>,
    mappings: Arc<IdentifierMappings>,
    lookup: Arc<dyn ContainingEntityLookup>,
    routing: Option<Arc<dyn RoutingKeyProvider>>,
}

impl std::fmt::Debug for ReindexingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReindexingResolver")
            .field("types", &self.graph.type_count())
            .field("embeddings", &self.graph.embedding_count())
            .field("mappings", &self.mappings.len())
            .field("routed", &self.routing.is_some())
            .finish()
    }
}

impl ReindexingResolver {
    /// Creates a resolver.
    pub fn new(
        graph: Arc<DependencyGraph>,
        mappings: Arc<IdentifierMappings>,
        lookup: Arc<dyn ContainingEntityLookup>,
    ) -> Self {
        Self {
            graph,
            mappings,
            lookup,
            routing: None,
        }
    }

    /// Sets the routing key provider.
    pub fn with_routing(mut self, routing: Arc<dyn RoutingKeyProvider>) -> Self {
        self.routing = Some(routing);
        self
    }

    /// The dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The identifier mappings.
    pub fn mappings(&self) -> &IdentifierMappings {
        &self.mappings
    }

    /// Checks that every type of the graph has an identifier mapping.
    pub fn validate(&self) -> Result<()> {
        let mut unmapped: Vec<&str> = self
            .graph
            .iter_types()
            .filter(|t| !self.mappings.contains(&t.name))
            .map(|t| t.name.as_str())
            .collect();
        unmapped.sort_unstable();
        match unmapped.first() {
            None => Ok(()),
            Some(first) if unmapped.len() == 1 => Err(Error::unmapped_type(*first)),
            Some(_) => Err(Error::config(format!(
                "no identifier mapping configured for types: {}",
                unmapped.join(", ")
            ))),
        }
    }

    /// Builds the document key of a root instance.
    pub fn document_key(&self, type_name: &TypeName, id: &EntityId) -> Result<DocumentKey> {
        let mapping = self.mappings.mapping_for(type_name)?;
        let document_id = mapping.document_id_of(id)?;
        let routing_key = self
            .routing
            .as_ref()
            .and_then(|r| r.routing_key(type_name, id));
        Ok(DocumentKey::new(type_name.clone(), id.clone(), document_id)
            .with_optional_routing_key(routing_key))
    }

    /// Resolves one change event.
    pub async fn resolve(&self, event: &ChangeEvent) -> Result<ResolvedDocuments> {
        let origin_type = event.object_type().clone();
        if !self.graph.contains_type(&origin_type) {
            return Err(Error::config(format!(
                "type '{origin_type}' is not part of the dependency graph"
            )));
        }
        let origin_id = self.normalize_id(&origin_type, event.id())?;

        let mut resolved = ResolvedDocuments::default();
        if self.graph.is_root(&origin_type) {
            let key = self.document_key(&origin_type, &origin_id)?;
            resolved.record(key, DocumentTrigger::Changed(event.kind()));
        }

        // Dirty paths seen so far per instance; a set only grows.
        let mut seen: HashMap<(TypeName, EntityId), DirtyProperties> = HashMap::new();
        let mut queue = VecDeque::from([Frame {
            type_name: origin_type.clone(),
            id: origin_id.clone(),
            dirty: event.dirty_properties(),
            depth: 0,
        }]);

        while let Some(frame) = queue.pop_front() {
            resolved.expanded += 1;
            // Every expanded type must be mapped, root or not.
            self.mappings.mapping_for(&frame.type_name)?;

            let next_depth = frame.depth + 1;
            for (_, embedding) in self.graph.embeddings_into(&frame.type_name) {
                match embedding.policy {
                    ReindexPolicy::None => continue,
                    ReindexPolicy::Shallow if !frame.dirty.touches_any(&embedding.projected) => {
                        continue;
                    }
                    ReindexPolicy::Shallow | ReindexPolicy::Full => {}
                }
                if !embedding.allows_depth(next_depth) {
                    log::debug!(
                        "Depth bound {:?} of '{}' reached at {}#{}",
                        embedding.max_depth,
                        embedding.label(),
                        frame.type_name,
                        frame.id
                    );
                    resolved.truncated += 1;
                    continue;
                }

                let owners = self
                    .lookup
                    .containing(embedding, &frame.type_name, &frame.id)
                    .await?;
                for owner_id in owners {
                    let pair = (embedding.owner.clone(), owner_id);
                    if pair.0 == origin_type && pair.1 == origin_id {
                        continue;
                    }
                    if self.graph.is_root(&pair.0) {
                        let key = self.document_key(&pair.0, &pair.1)?;
                        resolved.record(key, DocumentTrigger::Contained);
                    }
                    if !embedding.policy.propagates() {
                        continue;
                    }
                    let dirty = frame.dirty.through_path(&embedding.path);
                    let added = match seen.entry(pair.clone()) {
                        Entry::Vacant(slot) => Some(slot.insert(dirty).clone()),
                        Entry::Occupied(mut slot) => slot.get_mut().absorb(&dirty),
                    };
                    if let Some(dirty) = added {
                        queue.push_back(Frame {
                            type_name: pair.0,
                            id: pair.1,
                            dirty,
                            depth: next_depth,
                        });
                    }
                }
            }
        }

        log::debug!(
            "Resolved {}#{} ({}) to {} documents ({} expanded, {} truncated)",
            origin_type,
            origin_id,
            event.kind().name(),
            resolved.len(),
            resolved.expanded,
            resolved.truncated
        );
        Ok(resolved)
    }

    /// Resolves events in order, one result per event.
    pub async fn resolve_all(&self, events: &[ChangeEvent]) -> Result<Vec<ResolvedDocuments>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.resolve(event).await?);
        }
        Ok(results)
    }

    fn normalize_id(&self, type_name: &TypeName, id: &EntityId) -> Result<EntityId> {
        let mapping = self.mappings.mapping_for(type_name)?;
        mapping.identifier_of(Some(id), &mut || -> Result<EntityProperties> {
            Err(Error::config(format!(
                "no entity available to read the identifier of '{type_name}'"
            )))
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
