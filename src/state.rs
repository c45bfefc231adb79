use std::sync::Arc;

use crate::{
    ai::{EmbeddingClient, TextGenerator},
    config::AppConfig,
    pipeline::JobRunner,
    storage::ObjectStorage,
    store::PipelineStore,
};

/// Long-lived collaborators shared by every worker unit of a process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn PipelineStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub generator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn EmbeddingClient>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn PipelineStore>,
        storage: Arc<dyn ObjectStorage>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            storage,
            generator,
            embedder,
        }
    }

    pub fn runner(&self) -> JobRunner {
        JobRunner::new(
            self.store.clone(),
            self.storage.clone(),
            self.generator.clone(),
            self.embedder.clone(),
            &self.config.pipeline,
        )
    }
}
