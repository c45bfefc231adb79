//! Report processing pipeline: list files, extract and classify each, build facts, generate
//! and persist the draft. [`JobRunner`] sequences the stages and owns the run's state.

pub mod context;
pub mod progress;
pub mod runner;
pub mod stages;

pub use context::{error_payload, JobContext, Stage};
pub use runner::JobRunner;
