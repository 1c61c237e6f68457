//! Index document keys and bodies.
//!
//! A [`DocumentKey`] identifies one document of one root type: it is the
//! output of dependency resolution (an "affected document") and the key of
//! every indexing plan entry. An [`IndexDocument`] is the body produced for a
//! key at execution time.
//!
//! ```rust
//! use indexsync_core::{DocumentKey, IndexDocument};
//!
//! let key = DocumentKey::new("Customer", 7, "7").with_routing_key("eu");
//! assert_eq!(key.to_string(), "Customer/7@eu");
//!
//! let doc = IndexDocument::builder()
//!     .field("name", "Ada")
//!     .field("order_count", 3)
//!     .build();
//! assert_eq!(doc.get("name"), Some(&serde_json::json!("Ada")));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{EntityId, TypeName};

/// Key of one index document: (root type, document id, routing key).
///
/// The entity id is carried along so the document body can be rebuilt;
/// it is always derivable from the document id through the type's
/// identifier mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Root type owning the document.
    pub type_name: TypeName,
    /// Document identifier in the index.
    pub document_id: String,
    /// Routing key locating the document's shard, if routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    /// Business identifier of the root entity.
    pub entity_id: EntityId,
}

/// A document whose index entry must be rebuilt.
pub type AffectedDocument = DocumentKey;

impl DocumentKey {
    /// Creates an unrouted key.
    pub fn new(
        type_name: impl Into<TypeName>,
        entity_id: impl Into<EntityId>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            document_id: document_id.into(),
            routing_key: None,
            entity_id: entity_id.into(),
        }
    }

    /// Sets the routing key.
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    /// Sets an optional routing key.
    pub fn with_optional_routing_key(mut self, routing_key: Option<String>) -> Self {
        self.routing_key = routing_key;
        self
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_name, self.document_id)?;
        if let Some(ref routing) = self.routing_key {
            write!(f, "@{routing}")?;
        }
        Ok(())
    }
}

/// Body of an index document: a flat map of field name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexDocument {
    fields: Map<String, Value>,
}

impl IndexDocument {
    /// Create a new document builder.
    pub fn builder() -> IndexDocumentBuilder {
        IndexDocumentBuilder::default()
    }

    /// Gets a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns all fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Concatenates every string field, for full-text indexing.
    pub fn full_text(&self) -> String {
        let mut parts = Vec::new();
        collect_text(&Value::Object(self.fields.clone()), &mut parts);
        parts.join(" ")
    }
}

fn collect_text(value: &Value, parts: &mut Vec<String>) {
    match value {
        Value::String(s) => parts.push(s.clone()),
        Value::Number(n) => parts.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, parts)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, parts)),
        Value::Bool(_) | Value::Null => {}
    }
}

/// Builder for [`IndexDocument`].
#[derive(Debug, Default)]
pub struct IndexDocumentBuilder {
    fields: Map<String, Value>,
}

impl IndexDocumentBuilder {
    /// Sets a field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build the document.
    pub fn build(self) -> IndexDocument {
        IndexDocument {
            fields: self.fields,
        }
    }
}
