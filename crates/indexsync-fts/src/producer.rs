//! Document producers: build the body of an index document at execution time.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use indexsync_core::{DocumentKey, EntityId, Error, IndexDocument, Result, TypeName};

/// Builds index documents from the current state of root entities.
#[async_trait]
pub trait DocumentProducer: Send + Sync {
    /// Builds the document for `key`, or `None` if the entity no longer
    /// exists (the pending add or update then becomes a delete).
    async fn produce(&self, key: &DocumentKey) -> Result<Option<IndexDocument>>;
}

/// Producer backed by a map of prepared documents.
///
/// Stands in for the persistence layer in embedded setups and tests.
#[derive(Debug, Default)]
pub struct InMemoryDocuments {
    documents: RwLock<HashMap<(TypeName, EntityId), IndexDocument>>,
}

impl InMemoryDocuments {
    /// Creates an empty producer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the current document of an entity.
    pub fn put(
        &self,
        type_name: impl Into<TypeName>,
        id: impl Into<EntityId>,
        document: IndexDocument,
    ) {
        if let Ok(mut documents) = self.documents.write() {
            documents.insert((type_name.into(), id.into()), document);
        }
    }

    /// Forgets an entity, as if it was deleted.
    pub fn remove(&self, type_name: impl Into<TypeName>, id: impl Into<EntityId>) {
        if let Ok(mut documents) = self.documents.write() {
            documents.remove(&(type_name.into(), id.into()));
        }
    }
}

#[async_trait]
impl DocumentProducer for InMemoryDocuments {
    async fn produce(&self, key: &DocumentKey) -> Result<Option<IndexDocument>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| Error::backend("document map lock poisoned"))?;
        Ok(documents
            .get(&(key.type_name.clone(), key.entity_id.clone()))
            .cloned())
    }
}
