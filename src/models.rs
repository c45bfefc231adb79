use chrono::NaiveDateTime;
use diesel::prelude::*;
use pgvector::Vector;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = doc_templates)]
pub struct DocTemplate {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub schema_json: serde_json::Value,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = reports)]
pub struct Report {
    pub id: Uuid,
    pub template_id: Option<Uuid>,
    pub title: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = report_files)]
#[diesel(belongs_to(Report))]
pub struct ReportFile {
    pub id: Uuid,
    pub report_id: Uuid,
    pub kind: Option<String>,
    pub filename: String,
    pub mime: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = job_runs)]
#[diesel(belongs_to(Report))]
pub struct JobRun {
    pub id: Uuid,
    pub report_id: Uuid,
    pub status: String,
    pub progress: i32,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub error_json: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = job_runs)]
pub struct NewJobRun {
    pub id: Uuid,
    pub report_id: Uuid,
    pub status: String,
    pub progress: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_chunks)]
#[diesel(belongs_to(Report))]
pub struct DocumentChunk {
    pub id: Uuid,
    pub report_id: Uuid,
    pub file_id: Option<Uuid>,
    pub content: String,
    pub chunk_index: i32,
    pub source_type: Option<String>,
    pub page_number: Option<i32>,
    pub embedding: Option<Vector>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = document_chunks)]
pub struct NewDocumentChunk {
    pub id: Uuid,
    pub report_id: Uuid,
    pub file_id: Option<Uuid>,
    pub content: String,
    pub chunk_index: i32,
    pub source_type: Option<String>,
    pub page_number: Option<i32>,
    pub embedding: Option<Vector>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = report_draft_versions)]
#[diesel(belongs_to(Report))]
pub struct ReportDraftVersion {
    pub id: Uuid,
    pub report_id: Uuid,
    pub version_no: i32,
    pub template_id: String,
    pub draft_json: serde_json::Value,
    pub facts_json: serde_json::Value,
    pub job_run_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = report_draft_versions)]
pub struct NewReportDraftVersion {
    pub id: Uuid,
    pub report_id: Uuid,
    pub version_no: i32,
    pub template_id: String,
    pub draft_json: serde_json::Value,
    pub facts_json: serde_json::Value,
    pub job_run_id: Option<Uuid>,
}
