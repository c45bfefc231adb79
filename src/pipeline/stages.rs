use std::sync::Arc;

use tokio::task;

use crate::classifier::{self, FileCategory};
use crate::draft::{Draft, DraftGenerator, TemplateSchema};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::{self, Extraction};
use crate::facts::{Facts, FactsBuilder};
use crate::indexer::Indexer;
use crate::models::ReportFile;
use crate::storage::ObjectStorage;
use crate::store::PipelineStore;

use super::context::JobContext;

/// The pipeline's stage functions with their collaborators injected.
pub struct Stages {
    pub(crate) store: Arc<dyn PipelineStore>,
    pub(crate) storage: Arc<dyn ObjectStorage>,
    pub(crate) indexer: Indexer,
    pub(crate) facts: FactsBuilder,
    pub(crate) drafts: DraftGenerator,
    pub(crate) classifier_sample_chars: usize,
}

impl Stages {
    pub async fn list_files(&self, ctx: &mut JobContext) -> PipelineResult<()> {
        let files = self.store.list_report_files(ctx.report_id).await?;
        if files.is_empty() {
            return Err(PipelineError::NoFiles(ctx.report_id));
        }
        tracing::info!(job_id = %ctx.job_id, files = files.len(), "listed report files");
        ctx.files = files;
        Ok(())
    }

    /// Download, extract, classify and index one file. Download and parse problems are
    /// logged and recorded as a failed extraction; store and embedding errors are fatal.
    pub async fn process_file(&self, ctx: &mut JobContext, index: usize) -> PipelineResult<()> {
        let Some(file) = ctx.files.get(index).cloned() else {
            return Ok(());
        };

        let extraction = match self.storage.get_object(&file.storage_key).await {
            Ok(bytes) => extract_blocking(bytes, &file).await?,
            Err(err) => {
                tracing::warn!(
                    job_id = %ctx.job_id,
                    file_id = %file.id,
                    error = %err,
                    "failed to download file; continuing without it"
                );
                Extraction::failed(
                    extract::DocumentFormat::detect(&file.mime, &file.filename),
                    format!("download failed: {err}"),
                )
            }
        };

        if let Some(error) = &extraction.error {
            tracing::warn!(job_id = %ctx.job_id, file_id = %file.id, %error, "extraction failed");
        }

        let category = self.classify(&file, &extraction);
        self.store.set_file_kind(file.id, category).await?;
        if let Some(entry) = ctx.files.get_mut(index) {
            entry.kind = Some(category.as_str().to_string());
        }
        tracing::info!(
            job_id = %ctx.job_id,
            file_id = %file.id,
            kind = %category,
            "classified file"
        );

        if extraction.success && extraction.has_text() {
            self.indexer
                .index_file(ctx.report_id, file.id, &extraction)
                .await?;
        }

        ctx.extractions.insert(file.id, extraction);
        Ok(())
    }

    fn classify(&self, file: &ReportFile, extraction: &Extraction) -> FileCategory {
        let text = extraction
            .has_text()
            .then_some(extraction.full_text.as_str());
        classifier::classify_with_sample(
            &file.filename,
            &file.mime,
            text,
            self.classifier_sample_chars,
        )
    }

    pub async fn build_facts(&self, ctx: &mut JobContext) -> PipelineResult<()> {
        let facts = self.facts.build_facts(&ctx.extractions, &ctx.files).await?;
        tracing::info!(
            job_id = %ctx.job_id,
            agenda_items = facts.agenda.len(),
            participants = facts.participants.len(),
            "built facts"
        );
        ctx.facts = Some(facts);
        Ok(())
    }

    pub async fn generate_draft(&self, ctx: &JobContext) -> PipelineResult<Draft> {
        let schema = match self.store.template_schema(ctx.report_id).await? {
            Some(schema) => schema,
            None => TemplateSchema::default_schema(),
        };
        let fallback = Facts::default();
        let facts = ctx.facts.as_ref().unwrap_or(&fallback);
        let draft = self
            .drafts
            .generate_draft(facts, &schema, ctx.report_id)
            .await?;
        tracing::info!(
            job_id = %ctx.job_id,
            template_id = %draft.template_id,
            sections = draft.sections.len(),
            "generated draft"
        );
        Ok(draft)
    }

    /// Commits the draft version, the report's review status and the run's SUCCESS together.
    pub async fn finalize(&self, ctx: &mut JobContext, draft: &Draft) -> PipelineResult<()> {
        let fallback = Facts::default();
        let facts = ctx.facts.as_ref().unwrap_or(&fallback);
        let version = self
            .store
            .finalize_draft(ctx.report_id, ctx.job_id, draft, facts)
            .await?;
        tracing::info!(job_id = %ctx.job_id, version, "saved draft version");
        ctx.draft_version = Some(version);
        Ok(())
    }
}

async fn extract_blocking(bytes: Vec<u8>, file: &ReportFile) -> PipelineResult<Extraction> {
    let mime = file.mime.clone();
    let filename = file.filename.clone();
    let extraction =
        task::spawn_blocking(move || extract::extract_file(&bytes, &mime, &filename)).await?;
    Ok(extraction)
}
