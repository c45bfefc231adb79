use std::collections::HashMap;
use std::env;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use lopdf::{dictionary, Document, Object, Stream};
use once_cell::sync::Lazy;
use serde_json::Value;
use sijadin::ai::{EmbeddingClient, GenerationRequest, ServiceError, TextGenerator};
use sijadin::classifier::FileCategory;
use sijadin::config::PipelineSettings;
use sijadin::db::{self, PgPool};
use sijadin::draft::{Draft, TemplateSchema};
use sijadin::error::{PipelineError, PipelineResult};
use sijadin::facts::Facts;
use sijadin::jobs::{
    JobQueueError, JobStatus, STATUS_FAILED, STATUS_QUEUED, STATUS_RUNNING, STATUS_SUCCESS,
};
use sijadin::models::{DocumentChunk, JobRun, NewDocumentChunk, ReportFile};
use sijadin::retrieval::{rank_chunks, RetrievedChunk};
use sijadin::storage::ObjectStorage;
use sijadin::store::{PipelineStore, REPORT_STATUS_READY_TO_REVIEW};
use sijadin::JobRunner;
use tokio::sync::Mutex;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
pub const FACTS_JSON: &str = r#"{
  "activity_name": "Bimtek SPBE",
  "activity_purpose": "Peningkatan kapasitas",
  "location": "Bandung",
  "date_start": "2024-03-04",
  "date_end": "2024-03-06",
  "unit": "Diskominfo",
  "participants": [{"name": "Ani", "role": "Analis"}],
  "agenda": [{"time": "09:00", "activity": "Pembukaan"}],
  "activity_summary": "Bimbingan teknis tiga hari",
  "key_outcomes": ["Rencana aksi"]
}"#;

#[allow(dead_code)]
#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        let guard = self.objects.lock().await;
        Ok(guard.contains_key(key))
    }
}

#[allow(dead_code)]
impl FakeStorage {
    pub async fn put(&self, key: &str, bytes: Vec<u8>) {
        let mut guard = self.objects.lock().await;
        guard.insert(key.to_string(), bytes);
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct SavedDraft {
    pub report_id: Uuid,
    pub job_id: Uuid,
    pub version: i32,
    pub draft: Draft,
    pub facts: Facts,
}

#[allow(dead_code)]
#[derive(Default)]
struct MemoryState {
    runs: HashMap<Uuid, JobRun>,
    files: Vec<ReportFile>,
    chunks: Vec<DocumentChunk>,
    report_status: HashMap<Uuid, String>,
    schemas: HashMap<Uuid, TemplateSchema>,
    drafts: Vec<SavedDraft>,
    progress_log: Vec<(Uuid, i32)>,
    seen_at_listing: Vec<JobRun>,
}

/// In-memory store with the same status transitions as the Postgres queue.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_finalize: AtomicBool,
}

#[allow(dead_code)]
impl MemoryStore {
    pub async fn enqueue(&self, report_id: Uuid) -> JobRun {
        let run = JobRun {
            id: Uuid::new_v4(),
            report_id,
            status: STATUS_QUEUED.to_string(),
            progress: 0,
            started_at: None,
            finished_at: None,
            error_json: None,
            created_at: Utc::now().naive_utc(),
        };
        let mut state = self.state.lock().await;
        state.runs.insert(run.id, run.clone());
        run
    }

    pub async fn add_file(
        &self,
        report_id: Uuid,
        filename: &str,
        mime: &str,
        size_bytes: usize,
    ) -> ReportFile {
        let id = Uuid::new_v4();
        let file = ReportFile {
            id,
            report_id,
            kind: None,
            filename: filename.to_string(),
            mime: mime.to_string(),
            size_bytes: size_bytes as i64,
            storage_key: format!("reports/{report_id}/{id}/{filename}"),
            created_at: Utc::now().naive_utc(),
        };
        let mut state = self.state.lock().await;
        state.files.push(file.clone());
        file
    }

    pub async fn set_schema(&self, report_id: Uuid, schema: TemplateSchema) {
        let mut state = self.state.lock().await;
        state.schemas.insert(report_id, schema);
    }

    pub async fn run(&self, job_id: Uuid) -> Option<JobRun> {
        self.state.lock().await.runs.get(&job_id).cloned()
    }

    pub async fn file(&self, file_id: Uuid) -> Option<ReportFile> {
        let state = self.state.lock().await;
        state.files.iter().find(|file| file.id == file_id).cloned()
    }

    pub async fn chunks(&self) -> Vec<DocumentChunk> {
        self.state.lock().await.chunks.clone()
    }

    pub async fn drafts(&self) -> Vec<SavedDraft> {
        self.state.lock().await.drafts.clone()
    }

    pub async fn report_status(&self, report_id: Uuid) -> Option<String> {
        self.state.lock().await.report_status.get(&report_id).cloned()
    }

    /// Running runs of the report as they were when its files were listed.
    pub async fn seen_at_listing(&self, job_id: Uuid) -> Vec<JobRun> {
        let state = self.state.lock().await;
        state
            .seen_at_listing
            .iter()
            .filter(|run| run.id == job_id)
            .cloned()
            .collect()
    }

    /// Makes every later `finalize_draft` fail as if the commit was lost.
    pub fn fail_finalize(&self) {
        self.fail_finalize.store(true, Ordering::SeqCst);
    }

    pub async fn progress_log(&self, job_id: Uuid) -> Vec<i32> {
        let state = self.state.lock().await;
        state
            .progress_log
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, progress)| *progress)
            .collect()
    }
}

#[allow(dead_code)]
fn invalid_transition(run: &JobRun, to: JobStatus) -> PipelineError {
    PipelineError::Queue(JobQueueError::InvalidTransition {
        job_id: run.id,
        from: run.status.clone(),
        to,
    })
}

#[allow(dead_code)]
fn running_run(state: &mut MemoryState, job_id: Uuid, to: JobStatus) -> PipelineResult<&mut JobRun> {
    let run = state
        .runs
        .get_mut(&job_id)
        .ok_or(PipelineError::JobNotFound(job_id))?;
    if run.status != STATUS_RUNNING {
        return Err(invalid_transition(run, to));
    }
    Ok(run)
}

#[allow(dead_code)]
fn start(run: &mut JobRun) {
    run.status = STATUS_RUNNING.to_string();
    run.progress = 0;
    run.started_at = Some(Utc::now().naive_utc());
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn claim_job_run(&self, job_id: Uuid) -> PipelineResult<JobRun> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&job_id)
            .ok_or(PipelineError::JobNotFound(job_id))?;
        if run.status != STATUS_QUEUED {
            return Err(invalid_transition(run, JobStatus::Running));
        }
        start(run);
        Ok(run.clone())
    }

    async fn claim_next_job_run(&self) -> PipelineResult<Option<JobRun>> {
        let mut state = self.state.lock().await;
        let next = state
            .runs
            .values_mut()
            .filter(|run| run.status == STATUS_QUEUED)
            .min_by_key(|run| run.created_at);
        Ok(next.map(|run| {
            start(run);
            run.clone()
        }))
    }

    async fn load_job_run(&self, job_id: Uuid) -> PipelineResult<JobRun> {
        self.run(job_id)
            .await
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    async fn update_progress(&self, job_id: Uuid, progress: i32) -> PipelineResult<()> {
        let mut state = self.state.lock().await;
        let run = running_run(&mut state, job_id, JobStatus::Running)?;
        run.progress = progress.clamp(0, 100);
        state.progress_log.push((job_id, progress));
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error_payload: Value) -> PipelineResult<()> {
        let mut state = self.state.lock().await;
        let run = running_run(&mut state, job_id, JobStatus::Failed)?;
        run.status = STATUS_FAILED.to_string();
        run.error_json = Some(error_payload);
        run.finished_at = Some(Utc::now().naive_utc());
        Ok(())
    }

    async fn list_report_files(&self, report_id: Uuid) -> PipelineResult<Vec<ReportFile>> {
        let mut state = self.state.lock().await;
        let active: Vec<JobRun> = state
            .runs
            .values()
            .filter(|run| run.report_id == report_id && run.status == STATUS_RUNNING)
            .cloned()
            .collect();
        state.seen_at_listing.extend(active);
        Ok(state
            .files
            .iter()
            .filter(|file| file.report_id == report_id)
            .cloned()
            .collect())
    }

    async fn set_file_kind(&self, file_id: Uuid, kind: FileCategory) -> PipelineResult<()> {
        let mut state = self.state.lock().await;
        if let Some(file) = state.files.iter_mut().find(|file| file.id == file_id) {
            file.kind = Some(kind.as_str().to_string());
        }
        Ok(())
    }

    async fn file_has_chunks(&self, file_id: Uuid) -> PipelineResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .chunks
            .iter()
            .any(|chunk| chunk.file_id == Some(file_id)))
    }

    async fn insert_chunks(&self, chunks: Vec<NewDocumentChunk>) -> PipelineResult<usize> {
        let mut state = self.state.lock().await;
        let count = chunks.len();
        let now = Utc::now().naive_utc();
        state
            .chunks
            .extend(chunks.into_iter().map(|chunk| DocumentChunk {
                id: chunk.id,
                report_id: chunk.report_id,
                file_id: chunk.file_id,
                content: chunk.content,
                chunk_index: chunk.chunk_index,
                source_type: chunk.source_type,
                page_number: chunk.page_number,
                embedding: chunk.embedding,
                created_at: now,
            }));
        Ok(count)
    }

    async fn has_embedded_chunks(&self, report_id: Uuid) -> PipelineResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .chunks
            .iter()
            .any(|chunk| chunk.report_id == report_id && chunk.embedding.is_some()))
    }

    async fn nearest_chunks(
        &self,
        report_id: Uuid,
        query: Vec<f32>,
        top_k: usize,
    ) -> PipelineResult<Vec<RetrievedChunk>> {
        let state = self.state.lock().await;
        let chunks = state
            .chunks
            .iter()
            .filter(|chunk| chunk.report_id == report_id)
            .cloned()
            .collect();
        Ok(rank_chunks(&query, chunks, top_k))
    }

    async fn template_schema(&self, report_id: Uuid) -> PipelineResult<Option<TemplateSchema>> {
        Ok(self.state.lock().await.schemas.get(&report_id).cloned())
    }

    async fn finalize_draft(
        &self,
        report_id: Uuid,
        job_id: Uuid,
        draft: &Draft,
        facts: &Facts,
    ) -> PipelineResult<i32> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(PipelineError::Pool("connection reset during commit".into()));
        }
        let mut state = self.state.lock().await;
        running_run(&mut state, job_id, JobStatus::Success)?;

        let version = state
            .drafts
            .iter()
            .filter(|saved| saved.report_id == report_id)
            .map(|saved| saved.version)
            .max()
            .unwrap_or(0)
            + 1;
        state.drafts.push(SavedDraft {
            report_id,
            job_id,
            version,
            draft: draft.clone(),
            facts: facts.clone(),
        });
        state
            .report_status
            .insert(report_id, REPORT_STATUS_READY_TO_REVIEW.to_string());

        let run = running_run(&mut state, job_id, JobStatus::Success)?;
        run.status = STATUS_SUCCESS.to_string();
        run.progress = 100;
        run.error_json = None;
        run.finished_at = Some(Utc::now().naive_utc());
        Ok(version)
    }
}

/// Answers the facts prompt with canned JSON and every section prompt with fixed prose.
#[allow(dead_code)]
pub struct ScriptedGenerator {
    facts_response: String,
    fail_sections: bool,
    requests: Mutex<Vec<GenerationRequest>>,
}

#[allow(dead_code)]
impl ScriptedGenerator {
    pub fn new(facts_response: impl Into<String>) -> Self {
        Self {
            facts_response: facts_response.into(),
            fail_sections: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_sections(mut self) -> Self {
        self.fail_sections = true;
        self
    }

    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }
}

#[allow(dead_code)]
pub fn is_facts_request(request: &GenerationRequest) -> bool {
    request.prompt.contains("Return ONLY valid JSON")
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError> {
        let facts = is_facts_request(&request);
        self.requests.lock().await.push(request);
        if facts {
            return Ok(self.facts_response.clone());
        }
        if self.fail_sections {
            return Err(ServiceError::Status {
                status: 400,
                body: "quota exceeded".into(),
            });
        }
        Ok("Isi bagian yang dihasilkan.".to_string())
    }
}

/// Deterministic letter-frequency vectors, so related texts land close together.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeEmbedder {
    fail: bool,
}

#[allow(dead_code)]
impl FakeEmbedder {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        if self.fail {
            return Err(ServiceError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        let mut vector = vec![0.0_f32; 8];
        for byte in text.to_lowercase().bytes().filter(u8::is_ascii_alphanumeric) {
            vector[usize::from(byte) % 8] += 1.0;
        }
        vector[0] += 1.0;
        Ok(vector)
    }
}

#[allow(dead_code)]
pub fn runner(
    store: Arc<MemoryStore>,
    storage: Arc<dyn ObjectStorage>,
    generator: Arc<ScriptedGenerator>,
    embedder: Arc<FakeEmbedder>,
) -> JobRunner {
    JobRunner::new(
        store,
        storage,
        generator,
        embedder,
        &PipelineSettings::default(),
    )
}

/// One Helvetica text line per page.
#[allow(dead_code)]
pub fn build_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for text in pages {
        let content = format!("BT /F1 12 Tf 50 700 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf should serialize");
    bytes
}

#[allow(dead_code)]
pub fn build_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("png should encode");
    bytes.into_inner()
}

/// Pool against `TEST_DATABASE_URL` with migrations applied and tables emptied, or `None`
/// when the variable is unset.
#[allow(dead_code)]
pub async fn test_pool() -> Result<Option<PgPool>> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        return Ok(None);
    };
    let pool = db::init_pool_with_size(&database_url, db::DEFAULT_MAX_POOL_SIZE)?;
    prepare_database(&pool).await?;
    Ok(Some(pool))
}

#[allow(dead_code)]
pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

#[allow(dead_code)]
pub async fn with_conn<F, T>(pool: &PgPool, f: F) -> Result<T>
where
    F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to get connection: {err}"))?;
        f(&mut conn)
    })
    .await
    .context("database task panicked")?
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    with_conn(pool, |conn| {
        db::run_migrations(conn)?;
        truncate_all(conn)
    })
    .await
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE report_draft_versions, document_chunks, job_runs, report_files, reports, doc_templates CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
