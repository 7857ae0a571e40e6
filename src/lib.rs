pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod telemetry;
pub mod uploads;

pub use config::Config;

use std::sync::Arc;

use db::RecordStore;
use pipeline::DiagnosisPipeline;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub pipeline: Arc<DiagnosisPipeline>,
    pub config: Arc<Config>,
}
