//! Relational store contract used by the pipeline, and its diesel implementation.

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::{exists, max};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use pgvector::{Vector, VectorExpressionMethods};
use serde_json::Value;
use tokio::task;
use uuid::Uuid;

use crate::classifier::FileCategory;
use crate::db::PgPool;
use crate::draft::{Draft, TemplateSchema};
use crate::error::{PipelineError, PipelineResult};
use crate::facts::Facts;
use crate::jobs::{self, JobQueueError};
use crate::models::{
    DocTemplate, DocumentChunk, JobRun, NewDocumentChunk, NewReportDraftVersion, Report,
    ReportFile,
};
use crate::retrieval::{score_chunk, RetrievedChunk};
use crate::schema::{doc_templates, document_chunks, report_draft_versions, report_files, reports};

pub const REPORT_STATUS_READY_TO_REVIEW: &str = "ready_to_review";

#[async_trait]
pub trait PipelineStore: Send + Sync + 'static {
    /// QUEUED -> RUNNING for the given run; any other current status is an error.
    async fn claim_job_run(&self, job_id: Uuid) -> PipelineResult<JobRun>;

    /// Reserves the oldest QUEUED run, if any.
    async fn claim_next_job_run(&self) -> PipelineResult<Option<JobRun>>;

    async fn load_job_run(&self, job_id: Uuid) -> PipelineResult<JobRun>;

    async fn update_progress(&self, job_id: Uuid, progress: i32) -> PipelineResult<()>;

    async fn mark_failed(&self, job_id: Uuid, error_payload: Value) -> PipelineResult<()>;

    /// Files of a report in upload order.
    async fn list_report_files(&self, report_id: Uuid) -> PipelineResult<Vec<ReportFile>>;

    async fn set_file_kind(&self, file_id: Uuid, kind: FileCategory) -> PipelineResult<()>;

    async fn file_has_chunks(&self, file_id: Uuid) -> PipelineResult<bool>;

    async fn insert_chunks(&self, chunks: Vec<NewDocumentChunk>) -> PipelineResult<usize>;

    async fn has_embedded_chunks(&self, report_id: Uuid) -> PipelineResult<bool>;

    /// Up to `top_k` embedded chunks of a report, nearest to `query` by cosine distance.
    /// Equal distances are ordered by chunk id; unembedded chunks are never returned.
    async fn nearest_chunks(
        &self,
        report_id: Uuid,
        query: Vec<f32>,
        top_k: usize,
    ) -> PipelineResult<Vec<RetrievedChunk>>;

    /// Section layout of the report's template, or `None` when it has none.
    async fn template_schema(&self, report_id: Uuid) -> PipelineResult<Option<TemplateSchema>>;

    /// Completes a RUNNING job in one commit: appends the next draft version, moves the
    /// report to `ready_to_review` and marks the run SUCCESS. Returns the version number.
    /// Nothing is written when any step fails.
    async fn finalize_draft(
        &self,
        report_id: Uuid,
        job_id: Uuid,
        draft: &Draft,
        facts: &Facts,
    ) -> PipelineResult<i32>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_conn<T, F>(&self, op: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> PipelineResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(PipelineError::pool)?;
            op(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn claim_job_run(&self, job_id: Uuid) -> PipelineResult<JobRun> {
        self.with_conn(move |conn| Ok(jobs::claim_job_run(conn, job_id)?))
            .await
    }

    async fn claim_next_job_run(&self) -> PipelineResult<Option<JobRun>> {
        self.with_conn(|conn| Ok(jobs::claim_next_job_run(conn)?))
            .await
    }

    async fn load_job_run(&self, job_id: Uuid) -> PipelineResult<JobRun> {
        self.with_conn(move |conn| {
            jobs::find_job_run(conn, job_id).map_err(|err| match err {
                JobQueueError::NotFound(id) => PipelineError::JobNotFound(id),
                other => other.into(),
            })
        })
        .await
    }

    async fn update_progress(&self, job_id: Uuid, progress: i32) -> PipelineResult<()> {
        self.with_conn(move |conn| Ok(jobs::update_job_progress(conn, job_id, progress)?))
            .await
    }

    async fn mark_failed(&self, job_id: Uuid, error_payload: Value) -> PipelineResult<()> {
        self.with_conn(move |conn| Ok(jobs::mark_job_failed(conn, job_id, error_payload)?))
            .await
    }

    async fn list_report_files(&self, report_id: Uuid) -> PipelineResult<Vec<ReportFile>> {
        self.with_conn(move |conn| {
            let files = report_files::table
                .filter(report_files::report_id.eq(report_id))
                .order((report_files::created_at.asc(), report_files::id.asc()))
                .load::<ReportFile>(conn)?;
            Ok(files)
        })
        .await
    }

    async fn set_file_kind(&self, file_id: Uuid, kind: FileCategory) -> PipelineResult<()> {
        self.with_conn(move |conn| {
            diesel::update(report_files::table.find(file_id))
                .set(report_files::kind.eq(Some(kind.as_str())))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn file_has_chunks(&self, file_id: Uuid) -> PipelineResult<bool> {
        self.with_conn(move |conn| {
            let found = diesel::select(exists(
                document_chunks::table.filter(document_chunks::file_id.eq(file_id)),
            ))
            .get_result::<bool>(conn)?;
            Ok(found)
        })
        .await
    }

    async fn insert_chunks(&self, chunks: Vec<NewDocumentChunk>) -> PipelineResult<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.with_conn(move |conn| {
            let inserted = diesel::insert_into(document_chunks::table)
                .values(&chunks)
                .execute(conn)?;
            Ok(inserted)
        })
        .await
    }

    async fn has_embedded_chunks(&self, report_id: Uuid) -> PipelineResult<bool> {
        self.with_conn(move |conn| {
            let found = diesel::select(exists(
                document_chunks::table
                    .filter(document_chunks::report_id.eq(report_id))
                    .filter(document_chunks::embedding.is_not_null()),
            ))
            .get_result::<bool>(conn)?;
            Ok(found)
        })
        .await
    }

    async fn nearest_chunks(
        &self,
        report_id: Uuid,
        query: Vec<f32>,
        top_k: usize,
    ) -> PipelineResult<Vec<RetrievedChunk>> {
        let limit = i64::try_from(top_k).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let target = Vector::from(query.clone());
            let chunks = document_chunks::table
                .filter(document_chunks::report_id.eq(report_id))
                .filter(document_chunks::embedding.is_not_null())
                .order((
                    document_chunks::embedding.cosine_distance(target).asc(),
                    document_chunks::id.asc(),
                ))
                .limit(limit)
                .load::<DocumentChunk>(conn)?;
            Ok(chunks
                .into_iter()
                .filter_map(|chunk| score_chunk(&query, chunk))
                .collect())
        })
        .await
    }

    async fn template_schema(&self, report_id: Uuid) -> PipelineResult<Option<TemplateSchema>> {
        self.with_conn(move |conn| {
            let Some(report) = reports::table
                .find(report_id)
                .first::<Report>(conn)
                .optional()?
            else {
                return Ok(None);
            };
            let Some(template_id) = report.template_id else {
                return Ok(None);
            };
            let Some(template) = doc_templates::table
                .find(template_id)
                .first::<DocTemplate>(conn)
                .optional()?
            else {
                tracing::warn!(%report_id, %template_id, "report references a missing template");
                return Ok(None);
            };
            TemplateSchema::from_json(template.schema_json, &template.id.to_string())
        })
        .await
    }

    async fn finalize_draft(
        &self,
        report_id: Uuid,
        job_id: Uuid,
        draft: &Draft,
        facts: &Facts,
    ) -> PipelineResult<i32> {
        let template_id = draft.template_id.clone();
        let draft_json = serde_json::to_value(draft)?;
        let facts_json = serde_json::to_value(facts)?;

        self.with_conn(move |conn| {
            conn.transaction::<_, PipelineError, _>(|conn| {
                jobs::mark_job_succeeded(conn, job_id)?;

                let current = report_draft_versions::table
                    .filter(report_draft_versions::report_id.eq(report_id))
                    .select(max(report_draft_versions::version_no))
                    .first::<Option<i32>>(conn)?;
                let version_no = current.unwrap_or(0) + 1;

                diesel::insert_into(report_draft_versions::table)
                    .values(&NewReportDraftVersion {
                        id: Uuid::new_v4(),
                        report_id,
                        version_no,
                        template_id,
                        draft_json,
                        facts_json,
                        job_run_id: Some(job_id),
                    })
                    .execute(conn)?;

                diesel::update(reports::table.find(report_id))
                    .set((
                        reports::status.eq(REPORT_STATUS_READY_TO_REVIEW),
                        reports::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;

                Ok(version_no)
            })
        })
        .await
    }
}
