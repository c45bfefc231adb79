use std::fmt;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{JobRun, NewJobRun};
use crate::schema::job_runs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => STATUS_QUEUED,
            JobStatus::Running => STATUS_RUNNING,
            JobStatus::Success => STATUS_SUCCESS,
            JobStatus::Failed => STATUS_FAILED,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            STATUS_QUEUED => Some(JobStatus::Queued),
            STATUS_RUNNING => Some(JobStatus::Running),
            STATUS_SUCCESS => Some(JobStatus::Success),
            STATUS_FAILED => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("report {0} already has a queued or running job")]
    AlreadyActive(Uuid),
    #[error("job run {0} not found")]
    NotFound(Uuid),
    #[error("job run {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: String,
        to: JobStatus,
    },
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// Job trigger: creates a QUEUED run unless the report already has an active one.
/// The partial unique index on `job_runs(report_id)` backs the check against races.
pub fn enqueue_job_run(conn: &mut PgConnection, report_id: Uuid) -> JobQueueResult<JobRun> {
    conn.transaction(|conn| {
        if let Some(active) = find_active_job_run(conn, report_id)? {
            return Err(JobQueueError::AlreadyActive(active.report_id));
        }

        let new_run = NewJobRun {
            id: Uuid::new_v4(),
            report_id,
            status: STATUS_QUEUED.to_string(),
            progress: 0,
        };

        diesel::insert_into(job_runs::table)
            .values(&new_run)
            .execute(conn)
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    JobQueueError::AlreadyActive(report_id)
                }
                other => JobQueueError::Database(other),
            })?;

        let run = job_runs::table.find(new_run.id).first(conn)?;
        Ok(run)
    })
}

pub fn find_job_run(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<JobRun> {
    job_runs::table
        .find(job_id)
        .first(conn)
        .optional()?
        .ok_or(JobQueueError::NotFound(job_id))
}

pub fn find_active_job_run(
    conn: &mut PgConnection,
    report_id: Uuid,
) -> JobQueueResult<Option<JobRun>> {
    let run = job_runs::table
        .filter(job_runs::report_id.eq(report_id))
        .filter(job_runs::status.eq_any([STATUS_QUEUED, STATUS_RUNNING]))
        .first(conn)
        .optional()?;
    Ok(run)
}

/// QUEUED -> RUNNING for a specific run.
pub fn claim_job_run(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<JobRun> {
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        job_runs::table
            .find(job_id)
            .filter(job_runs::status.eq(STATUS_QUEUED)),
    )
    .set((
        job_runs::status.eq(STATUS_RUNNING),
        job_runs::progress.eq(0),
        job_runs::started_at.eq(Some(now)),
    ))
    .execute(conn)?;

    if updated == 0 {
        let current = find_job_run(conn, job_id)?;
        return Err(JobQueueError::InvalidTransition {
            job_id,
            from: current.status,
            to: JobStatus::Running,
        });
    }

    find_job_run(conn, job_id)
}

/// Claims the oldest QUEUED run, skipping rows another worker is claiming.
pub fn claim_next_job_run(conn: &mut PgConnection) -> JobQueueResult<Option<JobRun>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        let run_opt = job_runs::table
            .filter(job_runs::status.eq(STATUS_QUEUED))
            .order(job_runs::created_at.asc())
            .for_update()
            .skip_locked()
            .first::<JobRun>(conn)
            .optional()?;

        if let Some(run) = run_opt {
            diesel::update(job_runs::table.find(run.id))
                .set((
                    job_runs::status.eq(STATUS_RUNNING),
                    job_runs::progress.eq(0),
                    job_runs::started_at.eq(Some(now)),
                ))
                .execute(conn)?;

            let refreshed = job_runs::table.find(run.id).first(conn)?;
            Ok::<Option<JobRun>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<JobRun>, diesel::result::Error>(None)
        }
    })
    .map_err(JobQueueError::from)
}

pub fn update_job_progress(
    conn: &mut PgConnection,
    job_id: Uuid,
    progress: i32,
) -> JobQueueResult<()> {
    let updated = diesel::update(
        job_runs::table
            .find(job_id)
            .filter(job_runs::status.eq(STATUS_RUNNING)),
    )
    .set(job_runs::progress.eq(progress.clamp(0, 100)))
    .execute(conn)?;

    ensure_running(conn, job_id, updated, JobStatus::Running)
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    let updated = diesel::update(
        job_runs::table
            .find(job_id)
            .filter(job_runs::status.eq(STATUS_RUNNING)),
    )
    .set((
        job_runs::status.eq(STATUS_SUCCESS),
        job_runs::progress.eq(100),
        job_runs::error_json.eq::<Option<Value>>(None),
        job_runs::finished_at.eq(Some(Utc::now().naive_utc())),
    ))
    .execute(conn)?;

    ensure_running(conn, job_id, updated, JobStatus::Success)
}

/// Progress is left at its last checkpoint.
pub fn mark_job_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_payload: Value,
) -> JobQueueResult<()> {
    let updated = diesel::update(
        job_runs::table
            .find(job_id)
            .filter(job_runs::status.eq(STATUS_RUNNING)),
    )
    .set((
        job_runs::status.eq(STATUS_FAILED),
        job_runs::error_json.eq(Some(error_payload)),
        job_runs::finished_at.eq(Some(Utc::now().naive_utc())),
    ))
    .execute(conn)?;

    ensure_running(conn, job_id, updated, JobStatus::Failed)
}

fn ensure_running(
    conn: &mut PgConnection,
    job_id: Uuid,
    updated: usize,
    to: JobStatus,
) -> JobQueueResult<()> {
    if updated > 0 {
        return Ok(());
    }
    let current = find_job_run(conn, job_id)?;
    Err(JobQueueError::InvalidTransition {
        job_id,
        from: current.status,
        to,
    })
}
