//! Change events emitted by the persistence layer and their log records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ids::{EntityId, TypeName};

/// Kind of mutation that produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// The object was created.
    Insert,
    /// Some properties of the object changed.
    Update,
    /// The object was removed.
    Delete,
}

impl OperationKind {
    /// Returns the operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// "This object changed, these properties changed."
///
/// Immutable once created. Inserts and deletes dirty every property, so
/// [`ChangeEvent::dirty_properties`] only prunes for updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    object_type: TypeName,
    id: EntityId,
    changed_properties: BTreeSet<String>,
    kind: OperationKind,
}

impl ChangeEvent {
    /// Creates a change event.
    pub fn new<I, P>(
        object_type: impl Into<TypeName>,
        id: impl Into<EntityId>,
        kind: OperationKind,
        changed_properties: I,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            object_type: object_type.into(),
            id: id.into(),
            changed_properties: changed_properties.into_iter().map(Into::into).collect(),
            kind,
        }
    }

    /// Creates an insert event.
    pub fn insert(object_type: impl Into<TypeName>, id: impl Into<EntityId>) -> Self {
        Self::new(object_type, id, OperationKind::Insert, Vec::<String>::new())
    }

    /// Creates an update event for the given changed properties.
    pub fn update<I, P>(
        object_type: impl Into<TypeName>,
        id: impl Into<EntityId>,
        changed_properties: I,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self::new(object_type, id, OperationKind::Update, changed_properties)
    }

    /// Creates a delete event.
    pub fn delete(object_type: impl Into<TypeName>, id: impl Into<EntityId>) -> Self {
        Self::new(object_type, id, OperationKind::Delete, Vec::<String>::new())
    }

    /// Type of the changed object.
    pub fn object_type(&self) -> &TypeName {
        &self.object_type
    }

    /// Identifier of the changed object.
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Names of the properties that changed.
    pub fn changed_properties(&self) -> &BTreeSet<String> {
        &self.changed_properties
    }

    /// Kind of mutation.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Properties dirtied by this change.
    ///
    /// Inserts and deletes dirty everything; updates dirty exactly the
    /// changed properties.
    pub fn dirty_properties(&self) -> DirtyProperties {
        match self.kind {
            OperationKind::Insert | OperationKind::Delete => DirtyProperties::Everything,
            OperationKind::Update => DirtyProperties::Properties(self.changed_properties.clone()),
        }
    }
}

/// Set of dirty property paths of one object.
///
/// Paths are dotted (`orders.total`). A path matches another when they are
/// equal or when one is a dotted prefix of the other: projecting `orders`
/// is affected by a change to `orders.total`, and projecting `orders.total`
/// is affected when the whole `orders` association changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyProperties {
    /// Every property is dirty.
    Everything,
    /// Only these property paths are dirty.
    Properties(BTreeSet<String>),
}

impl DirtyProperties {
    /// Returns `true` if any of the given paths is affected.
    pub fn touches_any<'a, I>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        match self {
            Self::Everything => true,
            Self::Properties(dirty) => paths
                .into_iter()
                .any(|path| dirty.iter().any(|d| paths_overlap(d, path))),
        }
    }

    /// Dirty paths of an object embedding this one through `path`.
    ///
    /// `{total}` seen through `orders` becomes `{orders.total}`; everything
    /// seen through `orders` becomes `{orders}`.
    pub fn through_path(&self, path: &str) -> DirtyProperties {
        match self {
            Self::Everything => Self::Properties(BTreeSet::from([path.to_string()])),
            Self::Properties(dirty) => Self::Properties(
                dirty.iter().map(|d| format!("{path}.{d}")).collect(),
            ),
        }
    }

    /// Adds `other` to this set and returns the part that was not dirty yet,
    /// or `None` if nothing was added.
    pub fn absorb(&mut self, other: &DirtyProperties) -> Option<DirtyProperties> {
        match (&mut *self, other) {
            (Self::Everything, _) => None,
            (Self::Properties(_), Self::Everything) => {
                *self = Self::Everything;
                Some(Self::Everything)
            }
            (Self::Properties(dirty), Self::Properties(more)) => {
                let added: BTreeSet<String> = more.difference(dirty).cloned().collect();
                if added.is_empty() {
                    return None;
                }
                dirty.extend(added.iter().cloned());
                Some(Self::Properties(added))
            }
        }
    }

    /// Returns `true` if nothing is dirty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Properties(dirty) if dirty.is_empty())
    }
}

fn paths_overlap(a: &str, b: &str) -> bool {
    fn is_prefix(prefix: &str, path: &str) -> bool {
        path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.'
    }
    a == b || is_prefix(a, b) || is_prefix(b, a)
}

/// Serialized form of a change event in an external event log.
///
/// Carries everything a remote consumer needs to rebuild an indexing plan
/// independently: the changed object, its own routing key, the dirty
/// properties, the mutation kind, and a logical timestamp used as the
/// document version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Type of the changed object.
    pub object_type: TypeName,
    /// Identifier of the changed object.
    pub id: EntityId,
    /// Routing key of the changed object, if it is routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    /// Names of the properties that changed.
    #[serde(default)]
    pub changed_properties: BTreeSet<String>,
    /// Kind of mutation.
    pub kind: OperationKind,
    /// Logical timestamp assigned by the producer.
    pub timestamp: u64,
    /// Unit of work the record was published in. The records of one unit
    /// are contiguous in the log and share this value.
    #[serde(default)]
    pub unit: u64,
}

impl ChangeRecord {
    /// Creates a record from an event.
    pub fn from_event(event: &ChangeEvent, routing_key: Option<String>, timestamp: u64) -> Self {
        Self {
            object_type: event.object_type.clone(),
            id: event.id.clone(),
            routing_key,
            changed_properties: event.changed_properties.clone(),
            kind: event.kind,
            timestamp,
            unit: 0,
        }
    }

    /// Assigns the record to a unit of work.
    pub fn in_unit(mut self, unit: u64) -> Self {
        self.unit = unit;
        self
    }

    /// Rebuilds the change event described by this record.
    pub fn to_event(&self) -> ChangeEvent {
        ChangeEvent {
            object_type: self.object_type.clone(),
            id: self.id.clone(),
            changed_properties: self.changed_properties.clone(),
            kind: self.kind,
        }
    }
}
