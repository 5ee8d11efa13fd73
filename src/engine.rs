//! Wiring of the engine components.
//!
//! [`Engine::open`] builds the production stack from a config: SQLite
//! store and event sink, `yt-dlp` and command collaborators, and the
//! pipeline, registry, orchestrator and sweeper on top. Tests call
//! [`Engine::new`] with an in-memory store and fakes instead.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::events::SqliteEventSink;
use crate::jobs::JobRegistry;
use crate::orchestrator::BatchOrchestrator;
use crate::pipeline::ItemPipeline;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::sweep::Sweeper;
use crate::traits::{Collaborators, EventSink};

pub struct Engine {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<ItemPipeline>,
    pub registry: Arc<JobRegistry>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub sweeper: Arc<Sweeper>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn Store>, collaborators: Collaborators) -> Self {
        let pipeline = Arc::new(ItemPipeline::new(
            store.clone(),
            collaborators,
            config.pipeline.clone(),
        ));
        let registry = Arc::new(JobRegistry::new(config.jobs.clone()));
        let orchestrator = Arc::new(BatchOrchestrator::new(pipeline.clone(), registry.clone()));
        let sweeper = Arc::new(Sweeper::new(pipeline.clone(), config.sweep.clone()));

        Self {
            config: Arc::new(config),
            store,
            pipeline,
            registry,
            orchestrator,
            sweeper,
        }
    }

    /// Opens the database (applying the schema if needed) and builds the
    /// production collaborators.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::apply_schema(&pool).await?;

        let store = SqliteStore::new(pool);
        let events: Arc<dyn EventSink> = Arc::new(SqliteEventSink::new(store.pool().clone()));
        let collaborators = Collaborators::from_config(config, events)?;

        Ok(Self::new(config.clone(), Arc::new(store), collaborators))
    }
}
