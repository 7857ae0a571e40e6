use std::fmt;
use std::str::FromStr;

/// What the orchestrator does when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the request and surface the error.
    Fatal,
    /// Log, count, and continue without the stage's output.
    Degrade,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fatal" => Ok(FailurePolicy::Fatal),
            "degrade" => Ok(FailurePolicy::Degrade),
            other => Err(format!("unknown failure policy {other:?}, expected fatal|degrade")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailurePolicy::Fatal => "fatal",
            FailurePolicy::Degrade => "degrade",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classification,
    SpreadEstimation,
    Weather,
    ReportGeneration,
    ReportPersist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classification => "classification",
            Stage::SpreadEstimation => "spread_estimation",
            Stage::Weather => "weather",
            Stage::ReportGeneration => "report_generation",
            Stage::ReportPersist => "report_persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage failure policy table. Classification and report generation are
/// always fatal: without a label or a report there is nothing to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicies {
    spread_estimation: FailurePolicy,
    weather: FailurePolicy,
    report_persist: FailurePolicy,
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            spread_estimation: FailurePolicy::Degrade,
            weather: FailurePolicy::Degrade,
            report_persist: FailurePolicy::Fatal,
        }
    }
}

impl StagePolicies {
    pub fn new(
        spread_estimation: FailurePolicy,
        weather: FailurePolicy,
        report_persist: FailurePolicy,
    ) -> Self {
        Self {
            spread_estimation,
            weather,
            report_persist,
        }
    }

    pub fn policy(&self, stage: Stage) -> FailurePolicy {
        match stage {
            Stage::Classification | Stage::ReportGeneration => FailurePolicy::Fatal,
            Stage::SpreadEstimation => self.spread_estimation,
            Stage::Weather => self.weather,
            Stage::ReportPersist => self.report_persist,
        }
    }
}
