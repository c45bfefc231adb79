use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::ai::{EmbeddingClient, TextGenerator};
use crate::config::PipelineSettings;
use crate::draft::DraftGenerator;
use crate::error::PipelineResult;
use crate::facts::FactsBuilder;
use crate::indexer::Indexer;
use crate::models::JobRun;
use crate::retrieval::{ContextProvider, Retriever};
use crate::storage::ObjectStorage;
use crate::store::PipelineStore;

use super::context::{error_payload, JobContext, Stage};
use super::progress;
use super::stages::Stages;

/// Drives one job run from RUNNING to SUCCESS or FAILED.
///
/// Only the runner touches the run's status and progress. SUCCESS is committed together with
/// the draft by the complete stage; any error up to and including that commit is caught here
/// once, stored as the run's error payload, and then returned to the caller for logging.
pub struct JobRunner {
    store: Arc<dyn PipelineStore>,
    stages: Stages,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        storage: Arc<dyn ObjectStorage>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn EmbeddingClient>,
        settings: &PipelineSettings,
    ) -> Self {
        let retriever: Arc<dyn ContextProvider> = Arc::new(Retriever::new(
            store.clone(),
            embedder.clone(),
            settings.retrieval_candidates,
        ));
        let stages = Stages {
            store: store.clone(),
            storage,
            indexer: Indexer::new(store.clone(), embedder, settings),
            facts: FactsBuilder::new(generator.clone(), settings.facts_input_budget),
            drafts: DraftGenerator::new(generator, Some(retriever), settings.context_max_tokens),
            classifier_sample_chars: settings.classifier_sample_chars,
        };
        Self { store, stages }
    }

    /// Claims the given QUEUED run and executes it.
    pub async fn run(&self, job_id: Uuid) -> PipelineResult<JobRun> {
        let job = self.store.claim_job_run(job_id).await?;
        self.execute(job).await
    }

    /// Claims the oldest QUEUED run, if there is one, and executes it.
    pub async fn run_next(&self) -> PipelineResult<Option<JobRun>> {
        match self.store.claim_next_job_run().await? {
            Some(job) => self.execute(job).await.map(Some),
            None => Ok(None),
        }
    }

    async fn execute(&self, job: JobRun) -> PipelineResult<JobRun> {
        info!(job_id = %job.id, report_id = %job.report_id, "job started");
        let mut ctx = JobContext::new(&job);

        match self.drive(&mut ctx).await {
            Ok(()) => {
                info!(
                    job_id = %ctx.job_id,
                    report_id = %ctx.report_id,
                    draft_version = ?ctx.draft_version,
                    "job completed"
                );
                self.store.load_job_run(ctx.job_id).await
            }
            Err(err) => {
                error!(
                    job_id = %ctx.job_id,
                    report_id = %ctx.report_id,
                    stage = %ctx.stage,
                    progress = ctx.progress,
                    error = %err,
                    "job failed"
                );
                let payload = error_payload(&err, ctx.stage);
                if let Err(mark_err) = self.store.mark_failed(ctx.job_id, payload).await {
                    error!(job_id = %ctx.job_id, error = %mark_err, "failed to record job failure");
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, ctx: &mut JobContext) -> PipelineResult<()> {
        ctx.enter(Stage::ListFiles);
        self.stages.list_files(ctx).await?;
        self.checkpoint(ctx, progress::FILES_LISTED).await?;

        ctx.enter(Stage::Extract);
        let total = ctx.files.len();
        for index in 0..total {
            self.stages.process_file(ctx, index).await?;
            self.checkpoint(ctx, progress::after_file(index + 1, total))
                .await?;
        }

        ctx.enter(Stage::Facts);
        self.stages.build_facts(ctx).await?;
        self.checkpoint(ctx, progress::FACTS_BUILT).await?;

        ctx.enter(Stage::Draft);
        let draft = self.stages.generate_draft(ctx).await?;
        self.checkpoint(ctx, progress::DRAFT_GENERATED).await?;

        ctx.enter(Stage::Complete);
        self.stages.finalize(ctx, &draft).await?;
        ctx.progress = progress::COMPLETE;
        Ok(())
    }

    async fn checkpoint(&self, ctx: &mut JobContext, progress: i32) -> PipelineResult<()> {
        self.store.update_progress(ctx.job_id, progress).await?;
        ctx.progress = progress;
        info!(job_id = %ctx.job_id, stage = %ctx.stage, progress, "checkpoint");
        Ok(())
    }
}
