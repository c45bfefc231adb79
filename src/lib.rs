pub mod ai;
pub mod classifier;
pub mod config;
pub mod db;
pub mod draft;
pub mod error;
pub mod extract;
pub mod facts;
pub mod indexer;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;
pub mod workers;

pub use pipeline::JobRunner;
pub use workers::Worker;
