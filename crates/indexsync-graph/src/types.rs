//! Dependency graph types.
//!
//! An [`ObjectType`] is a node; an [`Embedding`] is an edge `A → B` meaning
//! "instances of `A` embed instances of `B` through property `path`". The
//! built [`DependencyGraph`] is an arena of petgraph nodes and edges indexed
//! by integers, so cyclic type graphs never form ownership cycles.

use std::collections::{BTreeSet, HashMap};

use indexsync_core::TypeName;
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

// ============================================================================
// ReindexPolicy
// ============================================================================

/// Whether a change to an embedded object triggers reindexing of its
/// container.
///
/// ```rust
/// use indexsync_graph::ReindexPolicy;
///
/// assert!(ReindexPolicy::Full.propagates());
/// assert!(!ReindexPolicy::None.propagates());
/// assert_eq!(ReindexPolicy::default(), ReindexPolicy::Full);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexPolicy {
    /// Indexed, but changes never trigger reindexing of the container.
    None,
    /// Reindex the direct container only if a projected property changed.
    Shallow,
    /// Reindex containers transitively.
    #[default]
    Full,
}

impl ReindexPolicy {
    /// Returns the policy name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Shallow => "shallow",
            Self::Full => "full",
        }
    }

    /// Returns `true` if traversal continues past an edge with this policy.
    pub fn propagates(&self) -> bool {
        matches!(self, Self::Full)
    }
}

// ============================================================================
// ObjectType
// ============================================================================

/// A class of domain objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    /// Type name.
    pub name: TypeName,
    /// Whether each instance is an index document.
    #[serde(default)]
    pub root: bool,
    /// Supertype, whose embeddings this type inherits as an embedded object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<TypeName>,
}

impl ObjectType {
    /// Creates a root type: one index document per instance.
    pub fn root(name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            root: true,
            extends: None,
        }
    }

    /// Creates a type that is only indexed through its containers.
    pub fn embedded(name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            root: false,
            extends: None,
        }
    }

    /// Sets the supertype.
    pub fn extending(mut self, supertype: impl Into<TypeName>) -> Self {
        self.extends = Some(supertype.into());
        self
    }
}

// ============================================================================
// Embedding
// ============================================================================

/// Edge `owner → target`: `owner` embeds `target` through `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embedding {
    /// Containing type.
    pub owner: TypeName,
    /// Property of the owner holding the embedded object(s).
    pub path: String,
    /// Embedded type.
    pub target: TypeName,
    /// Reindexing policy of this relationship.
    #[serde(default)]
    pub policy: ReindexPolicy,
    /// Properties of the target projected into the owner's document.
    /// Only consulted by [`ReindexPolicy::Shallow`].
    #[serde(default)]
    pub projected: BTreeSet<String>,
    /// Maximum hop count from a changed object at which this edge may still
    /// be traversed. Unbounded when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

impl Embedding {
    /// Creates a `FULL` embedding with no projection and no depth bound.
    pub fn new(
        owner: impl Into<TypeName>,
        path: impl Into<String>,
        target: impl Into<TypeName>,
    ) -> Self {
        Self {
            owner: owner.into(),
            path: path.into(),
            target: target.into(),
            policy: ReindexPolicy::default(),
            projected: BTreeSet::new(),
            max_depth: None,
        }
    }

    /// Sets the reindexing policy.
    pub fn with_policy(mut self, policy: ReindexPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the projected properties.
    pub fn projecting<I, P>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.projected = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the depth bound.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Returns `true` if an edge reached at `depth` hops may be traversed.
    pub fn allows_depth(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|max| depth <= max)
    }

    /// `owner.path`, for logs.
    pub fn label(&self) -> String {
        format!("{}.{}", self.owner, self.path)
    }
}

// ============================================================================
// DependencyGraph
// ============================================================================

/// Immutable reindexing dependency graph.
///
/// Built once by [`crate::DependencyGraphBuilder`] and shared read-only
/// (usually behind an `Arc`) by every concurrent resolution.
#[derive(Clone, Debug)]
pub struct DependencyGraph {
    pub(crate) graph: DiGraph<ObjectType, Embedding>,
    pub(crate) node_indices: HashMap<TypeName, NodeIndex>,
}

impl DependencyGraph {
    pub(crate) fn from_parts(
        graph: DiGraph<ObjectType, Embedding>,
        node_indices: HashMap<TypeName, NodeIndex>,
    ) -> Self {
        Self {
            graph,
            node_indices,
        }
    }

    /// Returns the number of types.
    pub fn type_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of embeddings.
    pub fn embedding_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Gets a type by name.
    pub fn get_type(&self, name: &TypeName) -> Option<&ObjectType> {
        self.get_index(name).map(|idx| &self.graph[idx])
    }

    /// Gets the petgraph index of a type.
    pub fn get_index(&self, name: &TypeName) -> Option<NodeIndex> {
        self.node_indices.get(name).copied()
    }

    /// Checks if a type exists.
    pub fn contains_type(&self, name: &TypeName) -> bool {
        self.node_indices.contains_key(name)
    }

    /// Returns `true` if the type is a root type.
    pub fn is_root(&self, name: &TypeName) -> bool {
        self.get_type(name).is_some_and(|t| t.root)
    }

    /// Returns an iterator over all types.
    pub fn iter_types(&self) -> impl Iterator<Item = &ObjectType> {
        self.graph.node_weights()
    }

    /// Returns an iterator over all embeddings.
    pub fn iter_embeddings(&self) -> impl Iterator<Item = &Embedding> {
        self.graph.edge_weights()
    }

    /// Gets an embedding by edge index.
    pub fn embedding(&self, edge: EdgeIndex) -> Option<&Embedding> {
        self.graph.edge_weight(edge)
    }

    /// The type followed by its supertypes, nearest first.
    ///
    /// Supertype chains are acyclic once built; the walk still stops on a
    /// repeated name.
    pub fn lineage(&self, name: &TypeName) -> Vec<TypeName> {
        let mut chain = Vec::new();
        let mut current = self.get_type(name);
        while let Some(object_type) = current {
            if chain.contains(&object_type.name) {
                break;
            }
            chain.push(object_type.name.clone());
            current = object_type
                .extends
                .as_ref()
                .and_then(|parent| self.get_type(parent));
        }
        chain
    }

    /// Embeddings through which a change to `name` may propagate: edges
    /// targeting the type itself or any of its supertypes.
    pub fn embeddings_into(&self, name: &TypeName) -> Vec<(EdgeIndex, &Embedding)> {
        self.lineage(name)
            .iter()
            .filter_map(|t| self.get_index(t))
            .flat_map(|idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .map(|e| (e.id(), e.weight()))
            })
            .collect()
    }

    /// Embeddings declared by `name` as an owner.
    pub fn embeddings_of(&self, name: &TypeName) -> Vec<&Embedding> {
        self.get_index(name)
            .map(|idx| {
                self.graph
                    .edges_directed(idx, Direction::Outgoing)
                    .map(|e| e.weight())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct and indirect subtypes of `name`, excluding itself.
    pub fn subtypes(&self, name: &TypeName) -> Vec<TypeName> {
        self.iter_types()
            .filter(|t| t.name != *name && self.lineage(&t.name).contains(name))
            .map(|t| t.name.clone())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
