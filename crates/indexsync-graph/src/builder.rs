//! DependencyGraphBuilder for constructing reindexing dependency graphs.
//!
//! The builder runs in three phases:
//!
//! 1. Create a node for every declared [`ObjectType`] and validate supertypes
//! 2. Create an edge for every [`Embedding`]; references to undeclared types
//!    are collected and reported together as one configuration error
//! 3. Detect cycles of propagating (`FULL`) edges and either reject them or
//!    bound them with the default max depth, per [`CyclePolicy`]
//!
//! A graph with an unbounded `FULL` cycle is never returned.

use std::collections::{BTreeSet, HashMap, HashSet};

use indexsync_core::config::GraphConfig;
use indexsync_core::{CyclePolicy, Error, Result, TypeName};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::{DependencyGraph, Embedding, ObjectType, ReindexPolicy};

// ============================================================================
// Declarations and statistics
// ============================================================================

/// Serializable set of type and embedding declarations.
///
/// ```rust
/// use indexsync_graph::GraphDefinition;
///
/// let definition = GraphDefinition::from_json_str(r#"{
///     "types": [
///         {"name": "Customer", "root": true},
///         {"name": "Order"}
///     ],
///     "embeddings": [
///         {"owner": "Customer", "path": "orders", "target": "Order",
///          "policy": "shallow", "projected": ["total", "status"]}
///     ]
/// }"#).unwrap();
/// assert_eq!(definition.types.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Declared types.
    #[serde(default)]
    pub types: Vec<ObjectType>,
    /// Declared embeddings.
    #[serde(default)]
    pub embeddings: Vec<Embedding>,
}

impl GraphDefinition {
    /// Parses a JSON definition.
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Statistics from a graph build.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Number of types created.
    pub types_created: usize,
    /// Number of embeddings created.
    pub embeddings_created: usize,
    /// Identical embeddings declared more than once.
    pub duplicate_embeddings: usize,
    /// Strongly connected components of propagating edges, as sorted type names.
    pub cycles: Vec<Vec<TypeName>>,
    /// Embeddings (`owner.path`) that received the default depth bound.
    pub bounded_edges: Vec<String>,
}

// ============================================================================
// DependencyGraphBuilder
// ============================================================================

/// Builder for [`DependencyGraph`].
///
/// ```rust
/// use indexsync_graph::{DependencyGraphBuilder, Embedding, ObjectType, ReindexPolicy};
///
/// let (graph, stats) = DependencyGraphBuilder::new()
///     .add_type(ObjectType::root("Customer"))
///     .add_type(ObjectType::embedded("Order"))
///     .add_embedding(
///         Embedding::new("Customer", "orders", "Order")
///             .with_policy(ReindexPolicy::Shallow)
///             .projecting(["total", "status"]),
///     )
///     .build()
///     .unwrap();
///
/// assert_eq!(graph.type_count(), 2);
/// assert!(stats.cycles.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct DependencyGraphBuilder {
    types: Vec<ObjectType>,
    embeddings: Vec<Embedding>,
    default_max_depth: usize,
    cycle_policy: CyclePolicy,
}

impl Default for DependencyGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraphBuilder {
    /// Creates a builder with the default graph configuration.
    pub fn new() -> Self {
        Self::with_config(&GraphConfig::default())
    }

    /// Creates a builder using the given configuration.
    pub fn with_config(config: &GraphConfig) -> Self {
        Self {
            types: Vec::new(),
            embeddings: Vec::new(),
            default_max_depth: config.default_max_depth,
            cycle_policy: config.cycle_policy,
        }
    }

    /// Creates a builder preloaded with a definition.
    pub fn from_definition(definition: GraphDefinition, config: &GraphConfig) -> Self {
        Self::with_config(config)
            .add_types(definition.types)
            .add_embeddings(definition.embeddings)
    }

    /// Sets the depth bound given to unbounded cyclic edges.
    pub fn with_default_max_depth(mut self, depth: usize) -> Self {
        self.default_max_depth = depth;
        self
    }

    /// Sets the cycle policy.
    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Declares a type.
    pub fn add_type(mut self, object_type: ObjectType) -> Self {
        self.types.push(object_type);
        self
    }

    /// Declares several types.
    pub fn add_types(mut self, types: impl IntoIterator<Item = ObjectType>) -> Self {
        self.types.extend(types);
        self
    }

    /// Declares an embedding.
    pub fn add_embedding(mut self, embedding: Embedding) -> Self {
        self.embeddings.push(embedding);
        self
    }

    /// Declares several embeddings.
    pub fn add_embeddings(mut self, embeddings: impl IntoIterator<Item = Embedding>) -> Self {
        self.embeddings.extend(embeddings);
        self
    }

    /// Builds the graph.
    ///
    /// Fails with a configuration error on duplicate types, unknown
    /// supertypes, supertype cycles, dangling embedding references,
    /// conflicting embeddings, or (under [`CyclePolicy::Reject`]) unbounded
    /// cycles of `FULL` edges.
    pub fn build(self) -> Result<(DependencyGraph, BuildStats)> {
        let mut stats = BuildStats::default();

        // Phase 1: nodes
        let mut graph = DiGraph::<ObjectType, Embedding>::new();
        let mut node_indices: HashMap<TypeName, NodeIndex> = HashMap::new();
        for object_type in self.types {
            if node_indices.contains_key(&object_type.name) {
                return Err(Error::config(format!(
                    "type '{}' is declared more than once",
                    object_type.name
                )));
            }
            let name = object_type.name.clone();
            let idx = graph.add_node(object_type);
            node_indices.insert(name, idx);
            stats.types_created += 1;
        }
        check_supertypes(&graph, &node_indices)?;

        // Phase 2: edges
        let mut dangling_refs = Vec::new();
        let mut declared: HashMap<(TypeName, String), Embedding> = HashMap::new();
        for embedding in self.embeddings {
            let from = node_indices.get(&embedding.owner).copied();
            let to = node_indices.get(&embedding.target).copied();
            let (Some(from), Some(to)) = (from, to) else {
                dangling_refs.push(format!("{} -> {}", embedding.label(), embedding.target));
                continue;
            };

            let key = (embedding.owner.clone(), embedding.path.clone());
            if let Some(existing) = declared.get(&key) {
                if *existing == embedding {
                    stats.duplicate_embeddings += 1;
                    continue;
                }
                return Err(Error::config(format!(
                    "embedding '{}' is declared twice with different settings",
                    embedding.label()
                )));
            }

            if embedding.policy == ReindexPolicy::Shallow && embedding.projected.is_empty() {
                log::warn!(
                    "Shallow embedding '{}' projects no properties; only inserts and deletes will propagate",
                    embedding.label()
                );
            }

            declared.insert(key, embedding.clone());
            graph.add_edge(from, to, embedding);
            stats.embeddings_created += 1;
        }

        if !dangling_refs.is_empty() {
            return Err(Error::config(format!(
                "embeddings reference undeclared types: {}",
                dangling_refs.join(", ")
            )));
        }

        let mut dependency_graph = DependencyGraph::from_parts(graph, node_indices);

        // Phase 3: cycles
        let unbounded = find_cycles(&dependency_graph, &mut stats);
        if !unbounded.is_empty() {
            let labels: Vec<String> = unbounded
                .iter()
                .filter_map(|&e| dependency_graph.embedding(e).map(Embedding::label))
                .collect();
            match self.cycle_policy {
                CyclePolicy::Reject => {
                    return Err(Error::config(format!(
                        "cyclic FULL embeddings without a max depth: {}",
                        labels.join(", ")
                    )));
                }
                CyclePolicy::Bound => {
                    for edge in unbounded {
                        if let Some(embedding) = dependency_graph.graph.edge_weight_mut(edge) {
                            embedding.max_depth = Some(self.default_max_depth);
                        }
                    }
                    log::warn!(
                        "Bounded cyclic embeddings at depth {}: {}",
                        self.default_max_depth,
                        labels.join(", ")
                    );
                    stats.bounded_edges = labels;
                }
            }
        }

        log::info!(
            "Dependency graph built: {} types, {} embeddings, {} cycles",
            stats.types_created,
            stats.embeddings_created,
            stats.cycles.len()
        );

        Ok((dependency_graph, stats))
    }
}

// ============================================================================
// Validation helpers
// ============================================================================

fn check_supertypes(
    graph: &DiGraph<ObjectType, Embedding>,
    node_indices: &HashMap<TypeName, NodeIndex>,
) -> Result<()> {
    for object_type in graph.node_weights() {
        let mut seen = HashSet::from([object_type.name.clone()]);
        let mut current = object_type.extends.clone();
        while let Some(parent) = current {
            let idx = node_indices.get(&parent).ok_or_else(|| {
                Error::config(format!(
                    "type '{}' extends undeclared type '{parent}'",
                    object_type.name
                ))
            })?;
            if !seen.insert(parent.clone()) {
                return Err(Error::config(format!(
                    "type '{}' has a cyclic supertype chain",
                    object_type.name
                )));
            }
            current = graph[*idx].extends.clone();
        }
    }
    Ok(())
}

/// Finds cycles along which changes propagate and returns the unbounded
/// `FULL` embeddings on them.
///
/// A change to type `T` propagates to owner `A` through every `FULL` edge
/// `A → B` where `B` is `T` or a supertype of `T`, so the propagation graph
/// gets one edge `T → A` per such pair.
fn find_cycles(graph: &DependencyGraph, stats: &mut BuildStats) -> Vec<EdgeIndex> {
    let mut propagation = DiGraph::<TypeName, EdgeIndex>::new();
    let mut indices = HashMap::new();
    for object_type in graph.iter_types() {
        indices.insert(
            object_type.name.clone(),
            propagation.add_node(object_type.name.clone()),
        );
    }

    for edge in graph.graph.edge_indices() {
        let Some(embedding) = graph.embedding(edge) else {
            continue;
        };
        if !embedding.policy.propagates() {
            continue;
        }
        let mut changed_types = graph.subtypes(&embedding.target);
        changed_types.push(embedding.target.clone());
        for changed in changed_types {
            if let (Some(&from), Some(&to)) = (indices.get(&changed), indices.get(&embedding.owner))
            {
                propagation.add_edge(from, to, edge);
            }
        }
    }

    let mut unbounded = BTreeSet::new();
    for component in tarjan_scc(&propagation) {
        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let internal: Vec<EdgeIndex> = propagation
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = propagation.edge_endpoints(e)?;
                (members.contains(&a) && members.contains(&b)).then(|| propagation[e])
            })
            .collect();
        if internal.is_empty() {
            continue;
        }

        let mut names: Vec<TypeName> = component.iter().map(|&n| propagation[n].clone()).collect();
        names.sort();
        stats.cycles.push(names);

        unbounded.extend(internal.into_iter().filter(|&e| {
            graph
                .embedding(e)
                .is_some_and(|embedding| embedding.max_depth.is_none())
        }));
    }
    unbounded.into_iter().collect()
}

// ============================================================================
// Tests
// ============================================================================
