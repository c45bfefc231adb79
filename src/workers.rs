use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{error, info};

use crate::{error::PipelineError, pipeline::JobRunner};

/// One worker unit: reserves QUEUED runs one at a time and drives them to a terminal state.
pub struct Worker {
    id: usize,
    runner: Arc<JobRunner>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(id: usize, runner: Arc<JobRunner>, poll_interval: Duration) -> Self {
        Self {
            id,
            runner,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(worker = self.id, "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(worker = self.id, error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Returns whether a run was processed.
    pub async fn tick(&self) -> Result<bool, PipelineError> {
        match self.runner.run_next().await? {
            Some(run) => {
                info!(
                    worker = self.id,
                    job_id = %run.id,
                    status = %run.status,
                    "job run finished"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
