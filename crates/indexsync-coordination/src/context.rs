//! The owned state of automatic indexing.

use std::sync::Arc;

use indexsync_core::{ChangeEvent, IndexSyncConfig, Result};
use indexsync_fts::{DocumentProducer, IndexRegistry, IndexingPlan, PlanOutcome};
use indexsync_graph::ReindexingResolver;

/// Everything a coordination strategy needs to turn change events into
/// index writes.
///
/// Cheap to clone; every component is shared.
#[derive(Clone)]
pub struct IndexingContext {
    resolver: ReindexingResolver,
    registry: Arc<IndexRegistry>,
    producer: Arc<dyn DocumentProducer>,
    config: Arc<IndexSyncConfig>,
}

impl std::fmt::Debug for IndexingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingContext")
            .field("resolver", &self.resolver)
            .field("indexes", &self.registry.len())
            .field("strategy", &self.config.coordination.strategy)
            .finish()
    }
}

impl IndexingContext {
    /// Creates a context with the default configuration.
    pub fn new(
        resolver: ReindexingResolver,
        registry: IndexRegistry,
        producer: Arc<dyn DocumentProducer>,
    ) -> Self {
        Self {
            resolver,
            registry: Arc::new(registry),
            producer,
            config: Arc::new(IndexSyncConfig::default()),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: IndexSyncConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Replaces the document producer.
    pub fn with_producer(mut self, producer: Arc<dyn DocumentProducer>) -> Self {
        self.producer = producer;
        self
    }

    /// The reindexing resolver.
    pub fn resolver(&self) -> &ReindexingResolver {
        &self.resolver
    }

    /// The index registry.
    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    /// The configuration.
    pub fn config(&self) -> &IndexSyncConfig {
        &self.config
    }

    /// Checks that the configuration is valid, that every type of the graph
    /// has an identifier mapping, and that every root type is routed to an
    /// index.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;
        self.resolver.validate()?;
        for object_type in self.resolver.graph().iter_types().filter(|t| t.root) {
            self.registry.workspace_for_type(&object_type.name)?;
        }
        Ok(())
    }

    /// Creates an empty plan with the configured plan settings.
    pub fn new_plan(&self) -> IndexingPlan {
        IndexingPlan::new(self.config.plan.clone())
    }

    /// Resolves events and records the affected documents in `plan`.
    ///
    /// Events are applied in order, so later events supersede earlier ones
    /// for the same document.
    pub async fn record(&self, plan: &mut IndexingPlan, events: &[ChangeEvent]) -> Result<()> {
        for event in events {
            let resolved = self.resolver.resolve(event).await?;
            log::debug!(
                "{} {}#{} affects {} documents",
                event.kind().name(),
                event.object_type(),
                event.id(),
                resolved.len()
            );
            for (key, trigger) in resolved {
                plan.push(key, trigger.operation().into())?;
            }
        }
        Ok(())
    }

    /// Builds the plan of one unit of work.
    pub async fn plan_for(&self, events: &[ChangeEvent]) -> Result<IndexingPlan> {
        let mut plan = self.new_plan();
        self.record(&mut plan, events).await?;
        Ok(plan)
    }

    /// Executes a plan against the registry.
    pub async fn execute(&self, plan: IndexingPlan) -> Result<PlanOutcome> {
        plan.execute(&self.registry, Arc::clone(&self.producer)).await
    }

    /// Builds and executes the plan of one unit of work.
    pub async fn index(&self, events: &[ChangeEvent]) -> Result<PlanOutcome> {
        let plan = self.plan_for(events).await?;
        self.execute(plan).await
    }
}
