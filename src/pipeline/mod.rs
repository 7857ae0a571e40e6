//! Diagnosis pipeline: classify, estimate spread, look up weather, write the
//! report, persisting each stage's result as it lands.

pub mod orchestrator;
pub mod policy;
pub mod prompt;
pub mod report;

pub use orchestrator::{DEFAULT_LANGUAGE, Diagnosis, DiagnosisPipeline, PipelineError};
pub use policy::{FailurePolicy, Stage, StagePolicies};
pub use prompt::PromptTemplate;
pub use report::{LlmReportGenerator, ReportGenerationError, ReportGenerator};
