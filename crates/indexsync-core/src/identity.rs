//! Identifier mapping between business identifiers and document identifiers.
//!
//! Each object type is registered with an [`IdentifierMapping`]. Types without
//! a concrete mapping get an [`UnconfiguredIdentifierMapping`], whose every
//! operation fails with a configuration error naming the type: guessing an
//! identifier format is never safe.
//!
//! ```rust
//! use indexsync_core::identity::{IdentifierMapping, IdentifierMappings, ScalarIdentifierMapping};
//! use indexsync_core::EntityId;
//!
//! let mut mappings = IdentifierMappings::new();
//! mappings.register("Order", ScalarIdentifierMapping::integer("Order"));
//!
//! let mapping = mappings.mapping_for(&"Order".into()).unwrap();
//! assert_eq!(mapping.document_id_of(&EntityId::Int(42)).unwrap(), "42");
//! assert!(mappings.mapping_for(&"Invoice".into()).is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::{EntityId, TypeName};

/// Loaded property values of one entity, as handed over by the persistence layer.
pub type EntityProperties = Map<String, Value>;

/// Lazy accessor for the entity whose identifier is being computed.
pub type EntitySupplier<'a> = &'a mut dyn FnMut() -> Result<EntityProperties>;

/// Converts identifiers for one object type.
pub trait IdentifierMapping: Send + Sync + fmt::Debug {
    /// Returns the identifier of an entity.
    ///
    /// Prefers `provided`; the entity supplier is only invoked when no
    /// identifier was provided.
    fn identifier_of(
        &self,
        provided: Option<&EntityId>,
        entity: EntitySupplier<'_>,
    ) -> Result<EntityId>;

    /// Converts an identifier to its document identifier.
    fn document_id_of(&self, id: &EntityId) -> Result<String>;

    /// Converts a document identifier back to the business identifier.
    fn identifier_from_document_id(&self, document_id: &str) -> Result<EntityId>;
}

/// Representation of a scalar identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// 64-bit integer identifiers.
    Integer,
    /// String identifiers.
    Text,
}

/// Maps scalar identifiers read from a single entity property.
#[derive(Debug, Clone)]
pub struct ScalarIdentifierMapping {
    type_name: TypeName,
    kind: IdentifierKind,
    property: String,
}

impl ScalarIdentifierMapping {
    /// Integer identifiers stored in the `id` property.
    pub fn integer(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: IdentifierKind::Integer,
            property: "id".to_string(),
        }
    }

    /// Text identifiers stored in the `id` property.
    pub fn text(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: IdentifierKind::Text,
            property: "id".to_string(),
        }
    }

    /// Reads the identifier from a different property.
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = property.into();
        self
    }

    /// Identifier representation handled by this mapping.
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    fn check(&self, id: &EntityId) -> Result<EntityId> {
        match (self.kind, id) {
            (IdentifierKind::Integer, EntityId::Int(_)) | (IdentifierKind::Text, EntityId::Text(_)) => {
                Ok(id.clone())
            }
            _ => Err(Error::config(format!(
                "identifier '{id}' does not match the {:?} identifier mapping of type '{}'",
                self.kind, self.type_name
            ))),
        }
    }

    fn from_value(&self, value: &Value) -> Result<EntityId> {
        let id = match (self.kind, value) {
            (IdentifierKind::Integer, Value::Number(n)) => n.as_i64().map(EntityId::Int),
            (IdentifierKind::Text, Value::String(s)) => Some(EntityId::Text(s.clone())),
            (IdentifierKind::Text, Value::Number(n)) => Some(EntityId::Text(n.to_string())),
            _ => None,
        };
        id.ok_or_else(|| {
            Error::config(format!(
                "property '{}' of type '{}' does not hold a {:?} identifier",
                self.property, self.type_name, self.kind
            ))
        })
    }
}

impl IdentifierMapping for ScalarIdentifierMapping {
    fn identifier_of(
        &self,
        provided: Option<&EntityId>,
        entity: EntitySupplier<'_>,
    ) -> Result<EntityId> {
        if let Some(id) = provided {
            return self.check(id);
        }
        let properties = entity()?;
        let value = properties.get(&self.property).ok_or_else(|| {
            Error::config(format!(
                "entity of type '{}' has no identifier property '{}'",
                self.type_name, self.property
            ))
        })?;
        self.from_value(value)
    }

    fn document_id_of(&self, id: &EntityId) -> Result<String> {
        Ok(self.check(id)?.to_string())
    }

    fn identifier_from_document_id(&self, document_id: &str) -> Result<EntityId> {
        match self.kind {
            IdentifierKind::Integer => document_id.parse::<i64>().map(EntityId::Int).map_err(|e| {
                Error::config(format!(
                    "document id '{document_id}' of type '{}' is not an integer: {e}",
                    self.type_name
                ))
            }),
            IdentifierKind::Text => Ok(EntityId::Text(document_id.to_string())),
        }
    }
}

/// Placeholder mapping for types nobody configured.
#[derive(Debug, Clone)]
pub struct UnconfiguredIdentifierMapping {
    type_name: TypeName,
}

impl UnconfiguredIdentifierMapping {
    /// Creates the placeholder for a type.
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl IdentifierMapping for UnconfiguredIdentifierMapping {
    fn identifier_of(&self, _: Option<&EntityId>, _: EntitySupplier<'_>) -> Result<EntityId> {
        Err(Error::unmapped_type(self.type_name.as_str()))
    }

    fn document_id_of(&self, _: &EntityId) -> Result<String> {
        Err(Error::unmapped_type(self.type_name.as_str()))
    }

    fn identifier_from_document_id(&self, _: &str) -> Result<EntityId> {
        Err(Error::unmapped_type(self.type_name.as_str()))
    }
}

/// Registry of identifier mappings by type.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMappings {
    mappings: HashMap<TypeName, Arc<dyn IdentifierMapping>>,
}

impl IdentifierMappings {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the mapping for a type, replacing any previous one.
    pub fn register(
        &mut self,
        type_name: impl Into<TypeName>,
        mapping: impl IdentifierMapping + 'static,
    ) -> &mut Self {
        self.mappings.insert(type_name.into(), Arc::new(mapping));
        self
    }

    /// Registers a shared mapping for a type.
    pub fn register_shared(
        &mut self,
        type_name: impl Into<TypeName>,
        mapping: Arc<dyn IdentifierMapping>,
    ) -> &mut Self {
        self.mappings.insert(type_name.into(), mapping);
        self
    }

    /// Returns the mapping for a type, or a configuration error if none is registered.
    pub fn mapping_for(&self, type_name: &TypeName) -> Result<Arc<dyn IdentifierMapping>> {
        self.mappings
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::unmapped_type(type_name.as_str()))
    }

    /// Returns `true` if a mapping is registered for the type.
    pub fn contains(&self, type_name: &TypeName) -> bool {
        self.mappings.contains_key(type_name)
    }

    /// Number of registered mappings.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns `true` if no mapping is registered.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
