use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::extract::Extraction;
use crate::facts::Facts;
use crate::models::{JobRun, ReportFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ListFiles,
    Extract,
    Facts,
    Draft,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ListFiles => "list_files",
            Stage::Extract => "extract",
            Stage::Facts => "facts",
            Stage::Draft => "draft",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working state of one job run, threaded through the stages. Nothing in here outlives the
/// run except what the complete stage commits.
#[derive(Debug)]
pub struct JobContext {
    pub job_id: Uuid,
    pub report_id: Uuid,
    pub stage: Stage,
    pub progress: i32,
    pub files: Vec<ReportFile>,
    pub extractions: BTreeMap<Uuid, Extraction>,
    pub facts: Option<Facts>,
    pub draft_version: Option<i32>,
}

impl JobContext {
    pub fn new(job: &JobRun) -> Self {
        Self {
            job_id: job.id,
            report_id: job.report_id,
            stage: Stage::ListFiles,
            progress: job.progress,
            files: Vec::new(),
            extractions: BTreeMap::new(),
            facts: None,
            draft_version: None,
        }
    }

    pub fn enter(&mut self, stage: Stage) {
        tracing::debug!(job_id = %self.job_id, stage = %stage, "entering stage");
        self.stage = stage;
    }
}

/// Error record stored on a failed run: message, failing stage, `source()` chain, time.
pub fn error_payload(err: &PipelineError, stage: Stage) -> Value {
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }

    json!({
        "error": err.to_string(),
        "stage": stage.as_str(),
        "chain": chain,
        "timestamp": Utc::now().to_rfc3339(),
    })
}
