//! Explicit per-process context bundle. Replaces the teacher's global
//! service locator: every collaborator a job or worker loop needs is
//! passed through this struct rather than reached for via statics.

use std::sync::Arc;

use redwork_core::{
    EventBus, FailureSink, JobFactory, KeyStorePool, QueueEngine, StatCounter, StatusTracker,
};

use crate::registry::WorkerRegistry;

#[derive(Clone)]
pub struct Context {
    pub pool: KeyStorePool,
    pub prefix: String,
    pub events: EventBus,
    pub queues: QueueEngine,
    pub status: StatusTracker,
    pub stats: StatCounter,
    pub registry: WorkerRegistry,
    pub failures: Arc<dyn FailureSink>,
    pub factory: Arc<dyn JobFactory>,
}

impl Context {
    pub fn new(
        pool: KeyStorePool,
        prefix: impl Into<String>,
        events: EventBus,
        failures: Arc<dyn FailureSink>,
        factory: Arc<dyn JobFactory>,
    ) -> Self {
        let prefix = prefix.into();
        let queues = QueueEngine::new(pool.clone(), prefix.clone(), events.clone());
        let status = StatusTracker::new(pool.clone(), prefix.clone());
        let stats = StatCounter::new(pool.clone(), prefix.clone());
        let registry = WorkerRegistry::new(pool.clone(), prefix.clone());

        Context {
            pool,
            prefix,
            events,
            queues,
            status,
            stats,
            registry,
            failures,
            factory,
        }
    }
}
