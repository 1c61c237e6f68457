//! Routing of root types to physical indexes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use indexsync_core::config::WorkspaceConfig;
use indexsync_core::{Error, Result, TypeName};

use crate::backend::IndexBackend;
use crate::workspace::IndexWorkspace;

/// Physical indexes by name, and which root types they hold.
#[derive(Debug, Clone)]
pub struct IndexRegistry {
    indexes: BTreeMap<String, IndexWorkspace>,
    routes: HashMap<TypeName, String>,
    queue_capacity: usize,
}

impl IndexRegistry {
    /// Creates an empty registry.
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            indexes: BTreeMap::new(),
            routes: HashMap::new(),
            queue_capacity: config.queue_capacity,
        }
    }

    /// Adds an index and spawns its workspace worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn add_index(
        &mut self,
        name: impl Into<String>,
        backend: Arc<dyn IndexBackend>,
    ) -> Result<&mut Self> {
        let name = name.into();
        if self.indexes.contains_key(&name) {
            return Err(Error::config(format!("index '{name}' is registered twice")));
        }
        let workspace = IndexWorkspace::new(name.clone(), backend, self.queue_capacity);
        self.indexes.insert(name, workspace);
        Ok(self)
    }

    /// Stores documents of `type_name` in index `index`.
    pub fn route(&mut self, type_name: impl Into<TypeName>, index: &str) -> Result<&mut Self> {
        if !self.indexes.contains_key(index) {
            return Err(Error::not_found("index", index));
        }
        self.routes.insert(type_name.into(), index.to_string());
        Ok(self)
    }

    /// Workspace of an index.
    pub fn workspace(&self, index: &str) -> Result<&IndexWorkspace> {
        self.indexes
            .get(index)
            .ok_or_else(|| Error::not_found("index", index))
    }

    /// Workspace holding documents of a root type.
    ///
    /// An unrouted type is a configuration error.
    pub fn workspace_for_type(&self, type_name: &TypeName) -> Result<&IndexWorkspace> {
        let index = self.routes.get(type_name).ok_or_else(|| {
            Error::config(format!("root type '{type_name}' is not routed to any index"))
        })?;
        self.workspace(index)
    }

    /// Iterates indexes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexWorkspace> {
        self.indexes.values()
    }

    /// Number of indexes.
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Returns `true` if no index is registered.
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Closes every workspace, reporting the first failure.
    pub async fn close_all(&self) -> Result<()> {
        let mut first_error = None;
        for workspace in self.indexes.values() {
            if let Err(e) = workspace.close().await {
                log::error!("Closing index '{}' failed: {e}", workspace.name());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
