mod record;
mod report;
mod weather;

pub use record::{Record, RecordSummary, RecordUpdate};
pub use report::{DiseaseReport, GeneratedReport, Treatment};
pub use weather::{Location, WeeklyAverages};
